//! `polo` – command line driver for the semantic map pipeline.
//!
//! ```text
//! polo simulate [--steps N] [--json]   replay a synthetic scene through the full loop
//! polo config show                     print the effective configuration
//! polo config init [--force]           write the default configuration
//! ```
//!
//! The replay runs the loop a navigation stack would: per step one
//! [`SemanticMapModule::update`], then the global map manager writes the
//! local map back and recenters the window, then the policy feature stack
//! is built.

mod config;
mod scene;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use polo_map::features::{map_feature_channels, map_features};
use polo_map::{GlobalMapManager, Plane};
use polo_perception::{AgentStep, SemanticMapModule};
use polo_types::{InstanceDict, empty_instance_dict};
use tracing::{info, warn};

use config::CliConfig;
use scene::Scene;

#[derive(Parser, Debug)]
#[command(name = "polo")]
#[command(version, about = "Probabilistic semantic occupancy mapping")]
struct Cli {
    /// Config file instead of `~/.polo/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a synthetic floor/wall/object scene.
    Simulate {
        /// Override the configured number of steps.
        #[arg(long)]
        steps: Option<usize>,
        /// Print the collected instances as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Inspect or create the configuration file.
    #[command(subcommand)]
    Config(ConfigAction),
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the filter (default "info"); POLO_LOG_FORMAT=json
    // switches to newline-delimited JSON. User-facing output stays println!.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("POLO_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(config::config_path);

    let result = match cli.command {
        Command::Simulate { steps, json } => load_config(&path).and_then(|mut cfg| {
            if let Some(steps) = steps {
                cfg.scene.steps = steps;
            }
            simulate(&cfg, json)
        }),
        Command::Config(ConfigAction::Show) => load_config(&path).and_then(|cfg| {
            toml::to_string_pretty(&cfg)
                .map(|raw| println!("{raw}"))
                .map_err(|e| format!("Failed to serialize config: {e}"))
        }),
        Command::Config(ConfigAction::Init { force }) => init_config(&path, force),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &std::path::Path) -> Result<CliConfig, String> {
    match config::load_from(path)? {
        Some(cfg) => {
            info!(path = %path.display(), "config loaded");
            Ok(cfg)
        }
        None => {
            warn!(path = %path.display(), "no config file, using defaults");
            let mut cfg = CliConfig::default();
            config::apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

fn init_config(path: &std::path::Path, force: bool) -> Result<(), String> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    config::save_to(&CliConfig::default(), path)?;
    println!(
        "  {} Config saved to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Replay
// ─────────────────────────────────────────────────────────────────────────────

fn simulate(cfg: &CliConfig, json: bool) -> Result<(), String> {
    let err = |e: polo_types::MapError| e.to_string();
    let module = SemanticMapModule::new(cfg.map.clone()).map_err(err)?;
    let manager = GlobalMapManager::new(&cfg.map).map_err(err)?;
    let mut agent = manager.init_agent().map_err(err)?;
    let mut scene = Scene::new(&cfg.scene, &cfg.map).map_err(err)?;
    let mut found: InstanceDict = empty_instance_dict(cfg.map.num_sem_categories);

    let sizes = manager.sizes();
    println!(
        "  {} local {}×{}, global {}×{} cells at {} cm, {} feature channels",
        "map".bold().cyan(),
        sizes.local_map_size,
        sizes.local_map_size,
        sizes.global_map_size,
        sizes.global_map_size,
        sizes.resolution_cm,
        map_feature_channels(module.map_layout()),
    );
    println!(
        "  {:>4}  {:>8}  {:>8}  {:>7}  {:>8}  {:>8}  {:>9}",
        "step", "x (cm)", "y (cm)", "heading", "explored", "obstacle", "instances"
    );

    for step in 0..cfg.scene.steps {
        let rendered = scene.advance().map_err(err)?;
        let out = module
            .update(&AgentStep {
                frame: &rendered.frame,
                pose_delta: rendered.pose_delta,
                camera_pose: None,
                prev_map: &agent.local_map,
                prev_pose: agent.local_pose,
                detections: rendered.detections.as_ref(),
                bounds: agent.bounds,
            })
            .map_err(err)?;

        let step_instances: usize = out.instances.values().map(Vec::len).sum();
        for (class_id, records) in out.instances {
            found.entry(class_id).or_default().extend(records);
        }
        manager
            .update_global_map_and_pose(&mut agent, out.map, out.pose)
            .map_err(err)?;
        let features = map_features(&agent.local_map, &agent.global_map).map_err(err)?;

        let global = &agent.global_map;
        let count = |plane: Plane| global.plane(plane).iter().filter(|&&v| v > 0.0).count();
        println!(
            "  {:>4}  {:>8.1}  {:>8.1}  {:>7.3}  {:>8}  {:>8}  {:>9}",
            step,
            agent.global_pose.x_cm,
            agent.global_pose.y_cm,
            agent.global_pose.heading_rad,
            count(Plane::Explored),
            count(Plane::Obstacle),
            step_instances,
        );
        tracing::debug!(step, feature_shape = ?features.dim(), "policy features built");
    }

    let total: usize = found.values().map(Vec::len).sum();
    println!(
        "\n  {} {} instance observation(s) over {} step(s)",
        "✓".green().bold(),
        total,
        cfg.scene.steps
    );
    if json {
        let raw = serde_json::to_string_pretty(&found)
            .map_err(|e| format!("Failed to serialize instances: {e}"))?;
        println!("{raw}");
    }
    Ok(())
}

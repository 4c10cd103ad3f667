//! Configuration Vault – reads/writes `~/.polo/config.toml`.

use polo_map::MapConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Synthetic replay parameters for `polo simulate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Number of update steps.
    #[serde(default = "default_steps")]
    pub steps: usize,

    /// Forward motion per step (cm).
    #[serde(default = "default_forward")]
    pub forward_cm: f32,

    /// Heading change per step (degrees, counter-clockwise).
    #[serde(default = "default_turn")]
    pub turn_deg: f32,

    /// Distance from the start pose to the facing wall (cm).
    #[serde(default = "default_wall_distance")]
    pub wall_distance_cm: f32,

    /// Wall height (cm).
    #[serde(default = "default_wall_height")]
    pub wall_height_cm: f32,

    /// Object centre relative to the start pose: lateral, forward (cm).
    #[serde(default = "default_object_offset")]
    pub object_offset_cm: (f32, f32),

    /// Half side of the object's square footprint (cm).
    #[serde(default = "default_object_half_width")]
    pub object_half_width_cm: f32,

    #[serde(default = "default_object_height")]
    pub object_height_cm: f32,

    /// Semantic category painted on the object.
    #[serde(default = "default_object_class")]
    pub object_class: usize,

    /// Detector score reported for the object.
    #[serde(default = "default_detection_score")]
    pub detection_score: f32,

    /// Relevance of categories other than the object's.
    #[serde(default = "default_background_relevance")]
    pub background_relevance: f32,
}

fn default_steps() -> usize {
    20
}
fn default_forward() -> f32 {
    10.0
}
fn default_turn() -> f32 {
    2.0
}
fn default_wall_distance() -> f32 {
    400.0
}
fn default_wall_height() -> f32 {
    250.0
}
fn default_object_offset() -> (f32, f32) {
    (40.0, 250.0)
}
fn default_object_half_width() -> f32 {
    20.0
}
fn default_object_height() -> f32 {
    60.0
}
fn default_object_class() -> usize {
    1
}
fn default_detection_score() -> f32 {
    0.8
}
fn default_background_relevance() -> f32 {
    0.1
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            forward_cm: default_forward(),
            turn_deg: default_turn(),
            wall_distance_cm: default_wall_distance(),
            wall_height_cm: default_wall_height(),
            object_offset_cm: default_object_offset(),
            object_half_width_cm: default_object_half_width(),
            object_height_cm: default_object_height(),
            object_class: default_object_class(),
            detection_score: default_detection_score(),
            background_relevance: default_background_relevance(),
        }
    }
}

/// Persisted user configuration stored in `~/.polo/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default = "default_map")]
    pub map: MapConfig,

    #[serde(default)]
    pub scene: SceneConfig,
}

/// A lighter map than the library default so a replay runs in seconds:
/// 120×160 frames over a 24 m map.
fn default_map() -> MapConfig {
    MapConfig {
        frame_height: 120,
        frame_width: 160,
        du_scale: 2,
        map_size_cm: 2400,
        ..MapConfig::default()
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            map: default_map(),
            scene: SceneConfig::default(),
        }
    }
}

/// Return the path to `~/.polo/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".polo").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<CliConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: CliConfig =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `POLO_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `POLO_MAP_RESOLUTION` | `map.map_resolution_cm` |
/// | `POLO_VISION_RANGE` | `map.vision_range` |
/// | `POLO_PROBABILITY_PRIOR` | `map.probability_prior` |
/// | `POLO_STEPS` | `scene.steps` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut CliConfig) {
    if let Ok(v) = std::env::var("POLO_MAP_RESOLUTION")
        && let Ok(res) = v.parse::<usize>()
    {
        cfg.map.map_resolution_cm = res;
    }
    if let Ok(v) = std::env::var("POLO_VISION_RANGE")
        && let Ok(range) = v.parse::<usize>()
    {
        cfg.map.vision_range = range;
    }
    if let Ok(v) = std::env::var("POLO_PROBABILITY_PRIOR")
        && let Ok(prior) = v.parse::<f32>()
    {
        cfg.map.probability_prior = prior;
    }
    if let Ok(v) = std::env::var("POLO_STEPS")
        && let Ok(steps) = v.parse::<usize>()
    {
        cfg.scene.steps = steps;
    }
}

/// Save the config to `path`, creating its directory if necessary.
pub fn save_to(cfg: &CliConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = CliConfig::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.map.frame_width, 160);
        assert_eq!(loaded.map.map_size_cm, 2400);
        assert_eq!(loaded.scene.object_class, 1);
        assert_eq!(loaded.scene.object_offset_cm, (40.0, 250.0));
    }

    #[test]
    fn default_config_has_valid_geometry() {
        let geometry = CliConfig::default().map.geometry().expect("valid");
        assert_eq!(geometry.local_map_size, 240);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[map]\nvision_range = 60\n\n[scene]\nsteps = 3\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.map.vision_range, 60);
        // A present [map] table uses the library defaults for missing keys.
        assert_eq!(loaded.map.frame_height, 480);
        assert_eq!(loaded.scene.forward_cm, 10.0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[map\nvision_range = ").expect("write");
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"));
    }

    #[test]
    fn config_path_points_to_polo_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".polo"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let result = load_from(&path).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn apply_env_overrides_changes_map_and_scene() {
        // SAFETY: the only test touching these variables.
        unsafe {
            std::env::set_var("POLO_MAP_RESOLUTION", "10");
            std::env::set_var("POLO_VISION_RANGE", "not-a-number");
            std::env::set_var("POLO_PROBABILITY_PRIOR", "0.3");
            std::env::set_var("POLO_STEPS", "7");
        }
        let mut cfg = CliConfig::default();
        let original_range = cfg.map.vision_range;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.map.map_resolution_cm, 10);
        assert_eq!(cfg.map.vision_range, original_range);
        assert!((cfg.map.probability_prior - 0.3).abs() < 1e-6);
        assert_eq!(cfg.scene.steps, 7);
        unsafe {
            std::env::remove_var("POLO_MAP_RESOLUTION");
            std::env::remove_var("POLO_VISION_RANGE");
            std::env::remove_var("POLO_PROBABILITY_PRIOR");
            std::env::remove_var("POLO_STEPS");
        }
    }
}

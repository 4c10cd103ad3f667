//! Log-odds helpers.
//!
//! Probabilities are clamped into `[eps, 1 - eps]` before the logit so that
//! 0 and 1 map to finite values; callers then clamp the result into the
//! symmetric bound of the map.

/// `log(p / (1 - p))` with `p` clamped into `[eps, 1 - eps]`.
pub fn logit(p: f32, eps: f32) -> f32 {
    let p = p.clamp(eps, 1.0 - eps);
    (p / (1.0 - p)).ln()
}

/// Clamp a log-odds value into `[-bound, bound]`.
pub fn clamp_log_odds(l: f32, bound: f32) -> f32 {
    l.clamp(-bound, bound)
}

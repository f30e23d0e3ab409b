//! Tunable parameters with the defaults the tool ships with.
//!
//! Every field has a default, so a JSON document only needs to list the
//! values it overrides:
//!
//! ```json
//! { "matching": { "max_detection_dim": 1500, "ransac_threshold_px": 6.0 } }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Feature matching options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Lowe ratio: keep a match when `best < ratio * second_best`.
    pub ratio: f32,
    /// Minimum ratio-test survivors before a fit is attempted.
    pub min_matches: usize,
    /// Robust-fit outlier threshold in full-resolution pixels.
    /// Tuned for ~2000px working images; scale it with `max_detection_dim`.
    pub ransac_threshold_px: f64,
    /// Longer image side is capped at this many pixels before detection.
    pub max_detection_dim: u32,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            ratio: 0.70,
            min_matches: 9,
            ransac_threshold_px: 8.0,
            max_detection_dim: 2000,
        }
    }
}

/// Label suggestion and orientation heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelParams {
    /// Clicks farther than this from every component get no suggestion.
    pub hit_radius_px: f64,
    /// Score penalty per degree of deviation from the nearest axis.
    pub deviation_weight: f64,
    /// Rotation samples deviating this much or more are dropped.
    pub rotation_outlier_deg: f64,
    /// Reference prefixes trusted for orientation (two-pin passives).
    pub safe_prefixes: Vec<String>,
    /// Projected components beyond this magnitude on either axis are discarded.
    pub projection_bound: f64,
}

impl Default for LabelParams {
    fn default() -> Self {
        Self {
            hit_radius_px: 150.0,
            deviation_weight: 0.1,
            rotation_outlier_deg: 20.0,
            safe_prefixes: ["R", "C", "L", "D", "VD"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            projection_bound: 50_000.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    pub matching: MatchParams,
    pub labels: LabelParams,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Loads [RegistrationParams] from a JSON file.
pub fn load_params(path: &Path) -> Result<RegistrationParams, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

//! Tracker configuration.
//!
//! Custom names are appended after the predefined entries of each registry,
//! so the list lengths are bounded by the free slots.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Capture a call-site fingerprint for every tracked allocation.
    pub capture_backtraces: bool,

    /// Tracker frames dropped from the top of each fingerprint.
    #[validate(range(max = 8))]
    pub backtrace_skip: usize,

    /// Pools 4..8; 0..4 are predefined.
    #[validate(length(max = 4))]
    #[validate(custom(function = validation::validate_names))]
    pub pools: Vec<String>,

    /// Tags 1..4; tag 0 is the default.
    #[validate(length(max = 3))]
    #[validate(custom(function = validation::validate_names))]
    pub tags: Vec<String>,

    /// Markers 1..8; marker 0 is the default.
    #[validate(length(max = 7))]
    #[validate(custom(function = validation::validate_names))]
    pub markers: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capture_backtraces: true,
            backtrace_skip: 2,
            pools: Vec::new(),
            tags: Vec::new(),
            markers: Vec::new(),
        }
    }
}

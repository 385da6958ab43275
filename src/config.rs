//! Scheduler configuration.
//!
//! Values come from an optional TOML file; command line flags override them.
//!
//! ```toml
//! tick_budget = 10000
//! max_tick_length_ms = 300.0
//! max_ticks = 50000
//! max_marshal_depth = 5
//! speed = 0.75
//! pause_on_entry = false
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_TICK_BUDGET: usize = 10_000;
pub const DEFAULT_MAX_TICK_LENGTH_MS: f64 = 300.0;
pub const DEFAULT_MAX_MARSHAL_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Raw interpreter steps allowed per tick before yielding to the host.
    pub tick_budget: usize,

    /// Tick length at speed 0.0. The clock scales this by `(1 - speed)^2`.
    pub max_tick_length_ms: f64,

    /// Ticks after which a run is ended as timed out. `None` runs forever.
    pub max_ticks: Option<u64>,

    /// Nesting depth kept when handing host values to the interpreter.
    pub max_marshal_depth: usize,

    /// Initial speed slider position in [0, 1].
    pub speed: f64,

    /// Start runs paused at the first user line.
    pub pause_on_entry: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_budget: DEFAULT_TICK_BUDGET,
            max_tick_length_ms: DEFAULT_MAX_TICK_LENGTH_MS,
            max_ticks: None,
            max_marshal_depth: DEFAULT_MAX_MARSHAL_DEPTH,
            speed: 1.0,
            pause_on_entry: false,
        }
    }
}

impl SchedulerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_budget == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_budget",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.max_tick_length_ms.is_finite() || self.max_tick_length_ms < 0.0 {
            return Err(ConfigError::Invalid {
                field: "max_tick_length_ms",
                reason: format!("{} is not a non-negative number", self.max_tick_length_ms),
            });
        }
        if !(0.0..=1.0).contains(&self.speed) {
            return Err(ConfigError::Invalid {
                field: "speed",
                reason: format!("{} is outside 0.0..=1.0", self.speed),
            });
        }
        Ok(())
    }
}

//! Engine configuration
//!
//! Configuration is read from a TOML file named by `TALLY_CONFIG_PATH` (default
//! `tally.toml`), falling back to defaults when the file is missing, and then
//! overridden field by field from `TALLY_*` environment variables.
//!
//! ```toml
//! identity_mode = "equality"
//! clock = "pseudo"
//! update_policy = "coalesce"
//! conflict_strategy = "salience_fifo"
//! pseudo_clock_start_ms = 0
//! ```

use crate::error::{TallyError, TallyResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;
use tracing::{info, warn};

/// How inserted facts are identified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Every insert creates a new fact
    #[default]
    Identity,
    /// Inserting a value equal to an existing fact returns the existing handle
    Equality,
}

/// Which clock drives temporal reasoning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    #[default]
    Realtime,
    Pseudo,
}

/// How updates interact with accumulate results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Retract then insert; every intermediate accumulate result propagates
    #[default]
    RetractInsert,
    /// Accumulate results propagate once per update, and only if they changed
    Coalesce,
}

/// Ordering of activations that share a salience
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Earlier activations fire first
    #[default]
    SalienceFifo,
    /// Later activations fire first
    SalienceLifo,
}

macro_rules! parse_snake_case {
    ($ty:ty, $setting:literal, { $($text:literal => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = TallyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($variant),)+
                    other => Err(TallyError::configuration(
                        $setting,
                        format!("unrecognised value '{other}'"),
                    )),
                }
            }
        }
    };
}

parse_snake_case!(IdentityMode, "identity_mode", {
    "identity" => IdentityMode::Identity,
    "equality" => IdentityMode::Equality,
});
parse_snake_case!(ClockMode, "clock", {
    "realtime" => ClockMode::Realtime,
    "pseudo" => ClockMode::Pseudo,
});
parse_snake_case!(UpdatePolicy, "update_policy", {
    "retract_insert" => UpdatePolicy::RetractInsert,
    "coalesce" => UpdatePolicy::Coalesce,
});
parse_snake_case!(ConflictStrategy, "conflict_strategy", {
    "salience_fifo" => ConflictStrategy::SalienceFifo,
    "salience_lifo" => ConflictStrategy::SalienceLifo,
});

/// Per-session engine settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub identity_mode: IdentityMode,
    pub clock: ClockMode,
    pub update_policy: UpdatePolicy,
    pub conflict_strategy: ConflictStrategy,
    /// Initial reading of a pseudo clock, epoch millis
    pub pseudo_clock_start_ms: i64,
}

impl EngineConfig {
    /// Defaults with a pseudo clock starting at zero
    pub fn pseudo_clock() -> Self {
        Self { clock: ClockMode::Pseudo, ..Self::default() }
    }

    pub fn with_identity_mode(mut self, mode: IdentityMode) -> Self {
        self.identity_mode = mode;
        self
    }

    pub fn with_update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.update_policy = policy;
        self
    }

    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    pub fn from_toml_str(text: &str) -> TallyResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from `TALLY_CONFIG_PATH` (or `tally.toml`), then apply environment overrides
    pub fn load() -> TallyResult<Self> {
        let config_path =
            std::env::var("TALLY_CONFIG_PATH").unwrap_or_else(|_| "tally.toml".to_string());

        let config = match fs::read_to_string(&config_path) {
            Ok(text) => Self::from_toml_str(&text)?,
            Err(_) => {
                warn!(
                    "Configuration file '{}' not found. Using default configuration.",
                    config_path
                );
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `TALLY_*` overrides from a variable lookup
    pub fn apply_overrides<F>(mut self, lookup: F) -> TallyResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("TALLY_IDENTITY_MODE") {
            self.identity_mode = mode.parse()?;
        }
        if let Some(clock) = lookup("TALLY_CLOCK") {
            self.clock = clock.parse()?;
        }
        if let Some(policy) = lookup("TALLY_UPDATE_POLICY") {
            self.update_policy = policy.parse()?;
        }
        if let Some(strategy) = lookup("TALLY_CONFLICT_STRATEGY") {
            self.conflict_strategy = strategy.parse()?;
        }
        if let Some(start) = lookup("TALLY_PSEUDO_CLOCK_START_MS") {
            self.pseudo_clock_start_ms = start.parse().map_err(|_| {
                TallyError::configuration("pseudo_clock_start_ms", format!("not an integer: {start}"))
            })?;
        }

        info!(
            identity_mode = ?self.identity_mode,
            clock = ?self.clock,
            update_policy = ?self.update_policy,
            "Engine configuration resolved"
        );
        Ok(self)
    }
}

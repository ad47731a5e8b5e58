//! Error types for the Tally engine
//!
//! Compile problems are gathered per rule and reported together so a rule set is
//! either accepted whole or rejected with every diagnostic at once. Runtime misuse
//! (stale handles, unknown queries, schema violations) and action failures surface
//! through the same [`TallyError`] enum.

use crate::types::FactHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single diagnostic produced while compiling a knowledge base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleError {
    /// Rule, query or fact type the diagnostic belongs to
    pub rule_name: String,
    /// Human readable description of the problem
    pub message: String,
}

impl RuleError {
    pub fn new(rule_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { rule_name: rule_name.into(), message: message.into() }
    }
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule_name, self.message)
    }
}

/// Error type for engine operations
#[derive(Error, Debug)]
pub enum TallyError {
    /// The rule set was rejected; nothing from it was installed
    #[error("Compile error: {} problem(s), first: {}", .0.len(), first_problem(.0))]
    Compile(Vec<RuleError>),

    /// The handle was never issued or has already been retracted
    #[error("Unknown fact handle {handle}")]
    UnknownHandle { handle: FactHandle },

    /// No query with this name exists in the knowledge base
    #[error("Unknown query '{name}'")]
    UnknownQuery { name: String },

    /// Query invoked with the wrong number of positional parameters
    #[error("Query '{name}' expects {expected} parameter(s), got {actual}")]
    QueryArity { name: String, expected: usize, actual: usize },

    /// Fact does not conform to its declared type
    #[error("Schema error for '{fact_type}': {message}")]
    Schema { fact_type: String, message: String },

    /// Clock misuse, such as advancing a realtime clock
    #[error("Clock error: {message}")]
    Clock { message: String },

    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {message}")]
    Configuration { message: String, setting: Option<String> },

    /// A rule action returned an error; earlier effects of the cycle remain applied
    #[error("Action of rule '{rule}' failed: {source}")]
    Action {
        rule: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The session actor has stopped
    #[error("Session is closed")]
    SessionClosed,

    /// Engine bookkeeping reached a state it should never reach
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn first_problem(errors: &[RuleError]) -> String {
    errors.first().map(ToString::to_string).unwrap_or_default()
}

impl TallyError {
    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TallyError::Compile(_) => "compile",
            TallyError::UnknownHandle { .. } => "unknown_handle",
            TallyError::UnknownQuery { .. } | TallyError::QueryArity { .. } => "query",
            TallyError::Schema { .. } => "schema",
            TallyError::Clock { .. } => "clock",
            TallyError::Configuration { .. } => "configuration",
            TallyError::Action { .. } => "action",
            TallyError::SessionClosed => "session",
            TallyError::Internal { .. } => "internal",
        }
    }

    /// Whether the session remains usable after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TallyError::SessionClosed | TallyError::Internal { .. })
    }

    /// Compile diagnostics, empty for every other variant
    pub fn compile_errors(&self) -> &[RuleError] {
        match self {
            TallyError::Compile(errors) => errors,
            _ => &[],
        }
    }

    pub fn schema(fact_type: &str, message: impl Into<String>) -> Self {
        Self::Schema { fact_type: fact_type.to_string(), message: message.into() }
    }

    pub fn configuration(setting: &str, message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into(), setting: Some(setting.to_string()) }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    pub(crate) fn action(rule: &str, error: anyhow::Error) -> Self {
        Self::Action { rule: rule.to_string(), source: error.into() }
    }
}

impl From<toml::de::Error> for TallyError {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration { message: error.to_string(), setting: None }
    }
}

/// Result type alias for engine operations
pub type TallyResult<T> = Result<T, TallyError>;

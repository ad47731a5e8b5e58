#![allow(missing_docs)]
//! Core of the Tally production-rule engine.
//!
//! Rules are declared as data plus closures, compiled into a shared Rete network
//! held by a [`KnowledgeBase`], and evaluated incrementally by [`Session`]s as
//! facts are inserted, updated and retracted.
//!
//! ```text
//! KnowledgeBase::builder().declare(..).rule(..).query(..).build()
//!        │ Arc<KnowledgeBase>
//!        ▼
//! Session ── insert/update/retract ──► Rete matcher ──► Agenda ──► fire_all ──► actions
//!        └── query(name, params) ──► lazy rows
//! ```

/// Agenda groups, focus stack and conflict resolution
pub mod agenda;
/// Single-owner async session front end
pub mod actor;
/// Incremental accumulate functions
pub mod aggregation;
/// Per-session network memories and token propagation
pub mod beta_network;
/// Engine configuration and environment overrides
pub mod config;
/// Knowledge base compilation and hot reload
pub mod engine;
/// Error types and result alias
pub mod error;
/// Working memory
pub mod fact_store;
/// Engine event listeners
pub mod listener;
/// Named parameterized queries
pub mod query;
/// Rete network compiler
pub mod rete_network;
/// Rete node definitions
pub mod rete_nodes;
/// Rule, condition and query definitions
pub mod rule;
/// Stateful and stateless sessions, rule execution
pub mod session;
/// Tracing subscriber setup
pub mod telemetry;
/// Session clocks, windows and event expiry
pub mod temporal;
/// Facts, handles, schemas and bindings
pub mod types;

pub use actor::{SessionHandle, spawn_session};
pub use agenda::{ActivationInfo, ActivationState, AgendaStats};
pub use config::{ClockMode, ConflictStrategy, EngineConfig, IdentityMode, UpdatePolicy};
pub use engine::{KnowledgeBase, KnowledgeBaseBuilder, RuleRegistry};
pub use error::{RuleError, TallyError, TallyResult};
pub use listener::{EngineEvent, EngineListener, EventLog, FiringOutcome, TracingListener};
pub use query::{QueryResults, Row};
pub use rete_network::NetworkStats;
pub use rule::{
    Accumulate, AccumulateFunction, Condition, Constraint, MAIN_GROUP, Operand, Operator, Pattern,
    Query, Rule, TemporalOperator, Window,
};
pub use session::{EngineContext, ExecutionResults, RuleContext, Session, SessionStats, StatelessSession};
pub use tally_types::FactValue;
pub use types::{Binding, Fact, FactHandle, FactRole, FactType, FieldType};

//! Engine event listeners
//!
//! Listeners observe working-memory changes and the activation lifecycle of a
//! session. Every method has an empty default, so a listener implements only
//! what it needs. Listeners run synchronously inside the session operation that
//! produced the event and cannot mutate the session.

use crate::agenda::ActivationInfo;
use crate::types::{Fact, FactHandle};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub trait EngineListener: Send + std::fmt::Debug {
    fn on_fact_inserted(&mut self, _handle: FactHandle, _fact: &Fact) {}

    fn on_fact_updated(&mut self, _handle: FactHandle, _previous: &Fact, _current: &Fact) {}

    fn on_fact_retracted(&mut self, _handle: FactHandle, _fact: &Fact) {}

    fn on_activation_created(&mut self, _activation: &ActivationInfo) {}

    fn on_activation_cancelled(&mut self, _activation: &ActivationInfo) {}

    fn before_rule_fired(&mut self, _activation: &ActivationInfo) {}

    fn after_rule_fired(&mut self, _activation: &ActivationInfo, _outcome: &FiringOutcome) {}

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Result of running one rule action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum FiringOutcome {
    Completed,
    Failed { error: String },
}

/// Listener that writes every event to `tracing`
#[derive(Debug, Default)]
pub struct TracingListener;

impl EngineListener for TracingListener {
    fn on_fact_inserted(&mut self, handle: FactHandle, fact: &Fact) {
        debug!(%handle, fact_type = %fact.fact_type, "Fact inserted");
    }

    fn on_fact_updated(&mut self, handle: FactHandle, _previous: &Fact, current: &Fact) {
        debug!(%handle, fact_type = %current.fact_type, "Fact updated");
    }

    fn on_fact_retracted(&mut self, handle: FactHandle, fact: &Fact) {
        debug!(%handle, fact_type = %fact.fact_type, "Fact retracted");
    }

    fn after_rule_fired(&mut self, activation: &ActivationInfo, outcome: &FiringOutcome) {
        match outcome {
            FiringOutcome::Completed => info!(
                rule = %activation.rule,
                activation = activation.id,
                salience = activation.salience,
                "Rule fired"
            ),
            FiringOutcome::Failed { error } => warn!(
                rule = %activation.rule,
                activation = activation.id,
                error = %error,
                "Rule action failed"
            ),
        }
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Recorded engine event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum EngineEvent {
    FactInserted { handle: FactHandle },
    FactUpdated { handle: FactHandle },
    FactRetracted { handle: FactHandle },
    ActivationCreated { rule: String },
    ActivationCancelled { rule: String },
    RuleFired { rule: String, outcome: FiringOutcome },
}

/// Listener that appends events to a shared log
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Rules fired so far, in firing order
    pub fn fired_rules(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::RuleFired { rule, .. } => Some(rule),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: EngineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl EngineListener for EventLog {
    fn on_fact_inserted(&mut self, handle: FactHandle, _fact: &Fact) {
        self.push(EngineEvent::FactInserted { handle });
    }

    fn on_fact_updated(&mut self, handle: FactHandle, _previous: &Fact, _current: &Fact) {
        self.push(EngineEvent::FactUpdated { handle });
    }

    fn on_fact_retracted(&mut self, handle: FactHandle, _fact: &Fact) {
        self.push(EngineEvent::FactRetracted { handle });
    }

    fn on_activation_created(&mut self, activation: &ActivationInfo) {
        self.push(EngineEvent::ActivationCreated { rule: activation.rule.clone() });
    }

    fn on_activation_cancelled(&mut self, activation: &ActivationInfo) {
        self.push(EngineEvent::ActivationCancelled { rule: activation.rule.clone() });
    }

    fn after_rule_fired(&mut self, activation: &ActivationInfo, outcome: &FiringOutcome) {
        self.push(EngineEvent::RuleFired { rule: activation.rule.clone(), outcome: outcome.clone() });
    }

    fn name(&self) -> &str {
        "event-log"
    }
}

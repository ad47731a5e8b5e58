//! Sessions: working memory, agenda and the fire loop
//!
//! A [`Session`] owns one working memory, one set of network memories and one
//! agenda, all driven by a shared [`KnowledgeBase`]. Every mutation runs the
//! matcher to completion and applies the resulting activation changes to the
//! agenda before it returns. Rules only fire inside [`Session::fire_all`].
//!
//! ## Fire cycle
//!
//! ```text
//! fire_all(limit)
//!   └─ loop: prune expired events ─► pop best activation of the focused group
//!            ─► run action with RuleContext (may insert/update/retract/focus/halt)
//!            ─► stop on empty group, limit reached, halt() or action error
//! ```
//!
//! Actions that fail abort the cycle with [`TallyError::Action`]. Effects applied
//! before the failure, including those made by the failing action itself before
//! it returned, stay in place.

use crate::agenda::{Activation, ActivationInfo, Agenda, AgendaStats};
use crate::beta_network::{NetworkEvent, NetworkMemory};
use crate::config::{EngineConfig, UpdatePolicy};
use crate::engine::KnowledgeBase;
use crate::error::{TallyError, TallyResult};
use crate::fact_store::WorkingMemory;
use crate::listener::{EngineListener, EventLog, FiringOutcome};
use crate::query::{QueryResults, QuerySource};
use crate::rete_nodes::{TerminalId, TokenId};
use crate::temporal::{ExpiryQueue, SessionClock, duration_millis, event_timestamp};
use crate::types::{Binding, Fact, FactHandle, FactType};
use ahash::AHashMap;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tally_types::FactValue;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Named, typed values shared by a session's rule actions
#[derive(Default)]
pub struct EngineContext {
    values: AHashMap<String, Box<dyn Any + Send>>,
}

impl EngineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value under `name`
    pub fn set<T: Any + Send>(&mut self, name: impl Into<String>, value: T) {
        self.values.insert(name.into(), Box::new(value));
    }

    /// Value under `name` when it has type `T`
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.values.get(name).and_then(|value| value.downcast_ref())
    }

    pub fn get_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.values.get_mut(name).and_then(|value| value.downcast_mut())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.values.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort();
        f.debug_struct("EngineContext").field("values", &names).finish()
    }
}

/// Point-in-time counters for one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub knowledge_base: Uuid,
    pub facts: usize,
    pub pending_activations: usize,
    pub tokens: usize,
    pub left_memory: usize,
    pub scheduled_expiries: usize,
    pub now: i64,
    pub focus: Vec<String>,
    pub agenda: AgendaStats,
}

/// A stateful rule session
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    base: Arc<KnowledgeBase>,
    config: EngineConfig,
    store: WorkingMemory,
    memory: NetworkMemory,
    agenda: Agenda,
    clock: SessionClock,
    expiry: ExpiryQueue,
    context: EngineContext,
    listeners: Vec<Box<dyn EngineListener>>,
    /// Rule whose action is currently running
    firing: Option<usize>,
    halted: bool,
}

impl Session {
    #[instrument(skip(base, config), fields(knowledge_base = %base.id()))]
    pub fn new(base: Arc<KnowledgeBase>, config: EngineConfig) -> Self {
        let store = WorkingMemory::new(config.identity_mode);
        let mut memory = NetworkMemory::new(Arc::clone(&base.network));
        memory.initialize(&store);
        let mut session = Self {
            id: Uuid::new_v4(),
            clock: SessionClock::new(config.clock, config.pseudo_clock_start_ms),
            agenda: Agenda::new(config.conflict_strategy),
            base,
            config,
            store,
            memory,
            expiry: ExpiryQueue::default(),
            context: EngineContext::new(),
            listeners: Vec::new(),
            firing: None,
            halted: false,
        };
        session.apply_network_events();
        info!(session = %session.id, "Session created");
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.base
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn add_listener(&mut self, listener: Box<dyn EngineListener>) {
        debug!(listener = listener.name(), "Listener added");
        self.listeners.push(listener);
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut EngineContext {
        &mut self.context
    }

    // ---------------------------------------------------------------------------------------------
    // Working memory
    // ---------------------------------------------------------------------------------------------

    /// Insert a fact; in equality mode an equal live fact's handle is returned unchanged
    #[instrument(skip(self, fact), fields(session = %self.id, fact_type = %fact.fact_type))]
    pub fn insert(&mut self, fact: Fact) -> TallyResult<FactHandle> {
        self.sync_clock();
        let base = Arc::clone(&self.base);
        let fact_type = declared_type(&base, &fact)?;
        fact_type.validate(&fact)?;
        if let Some(existing) = self.store.find_equal(&fact) {
            debug!(handle = %existing, "Equal fact already present");
            return Ok(existing);
        }

        let now = self.clock.now();
        let timestamp = event_timestamp(fact_type, &fact, now);
        let handle = self.store.insert(fact, timestamp);
        if let Some(after) = fact_type.expires_after {
            self.expiry.schedule(handle, timestamp.saturating_add(duration_millis(after)));
        }
        if let Some(fact) = self.store.get(handle) {
            for listener in &mut self.listeners {
                listener.on_fact_inserted(handle, fact);
            }
        }
        self.memory.assert_fact(handle, &self.store, now);
        self.apply_network_events();
        Ok(handle)
    }

    /// Replace the value of a live fact, keeping its handle
    #[instrument(skip(self, fact), fields(session = %self.id, %handle))]
    pub fn update(&mut self, handle: FactHandle, fact: Fact) -> TallyResult<()> {
        self.sync_clock();
        let Some(entry) = self.store.entry(handle) else {
            return Err(TallyError::UnknownHandle { handle });
        };
        if entry.fact.fact_type != fact.fact_type {
            return Err(TallyError::schema(
                &entry.fact.fact_type,
                format!("update of {handle} cannot change its type to '{}'", fact.fact_type),
            ));
        }
        let previous_timestamp = entry.timestamp;
        let base = Arc::clone(&self.base);
        let fact_type = declared_type(&base, &fact)?;
        fact_type.validate(&fact)?;

        let now = self.clock.now();
        let timestamp = event_timestamp(fact_type, &fact, previous_timestamp);
        let coalesce = self.config.update_policy == UpdatePolicy::Coalesce;
        if coalesce {
            self.memory.begin_coalescing();
        }
        self.memory.retract_fact(handle, &self.store);
        let previous = self.store.replace(handle, fact, timestamp)?;
        self.memory.assert_fact(handle, &self.store, now);
        if coalesce {
            self.memory.end_coalescing(&self.store);
        }
        if timestamp != previous_timestamp {
            if let Some(after) = fact_type.expires_after {
                self.expiry.schedule(handle, timestamp.saturating_add(duration_millis(after)));
            }
        }
        if let Some(current) = self.store.get(handle) {
            for listener in &mut self.listeners {
                listener.on_fact_updated(handle, &previous.fact, current);
            }
        }
        self.apply_network_events();
        Ok(())
    }

    /// Update a fact in place through a closure
    pub fn modify<F>(&mut self, handle: FactHandle, change: F) -> TallyResult<()>
    where
        F: FnOnce(&mut Fact),
    {
        let mut fact = self.store.get(handle).cloned().ok_or(TallyError::UnknownHandle { handle })?;
        change(&mut fact);
        self.update(handle, fact)
    }

    /// Remove a fact; activations depending on it are cancelled before this returns
    #[instrument(skip(self), fields(session = %self.id))]
    pub fn retract(&mut self, handle: FactHandle) -> TallyResult<Fact> {
        self.sync_clock();
        if !self.store.contains(handle) {
            return Err(TallyError::UnknownHandle { handle });
        }
        self.retract_internal(handle)
    }

    fn retract_internal(&mut self, handle: FactHandle) -> TallyResult<Fact> {
        self.memory.retract_fact(handle, &self.store);
        let entry = self.store.remove(handle)?;
        self.expiry.cancel(handle);
        for listener in &mut self.listeners {
            listener.on_fact_retracted(handle, &entry.fact);
        }
        self.apply_network_events();
        Ok(entry.fact)
    }

    pub fn get_object(&self, handle: FactHandle) -> Option<&Fact> {
        self.store.get(handle)
    }

    /// Live facts in handle order, optionally of one type
    pub fn iterate_objects<'a>(
        &'a self,
        type_filter: Option<&'a str>,
    ) -> Box<dyn Iterator<Item = (FactHandle, &'a Fact)> + 'a> {
        match type_filter {
            Some(fact_type) => Box::new(self.store.iter_type(fact_type)),
            None => Box::new(self.store.iter()),
        }
    }

    /// Live facts matching `predicate`, in handle order
    pub fn iterate<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = (FactHandle, &'a Fact)> + 'a
    where
        P: Fn(&Fact) -> bool + 'a,
    {
        self.store.iter().filter(move |(_, fact)| predicate(fact))
    }

    pub fn fact_count(&self) -> usize {
        self.store.len()
    }

    // ---------------------------------------------------------------------------------------------
    // Time
    // ---------------------------------------------------------------------------------------------

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Advance the pseudo clock and process everything that expired meanwhile
    #[instrument(skip(self), fields(session = %self.id))]
    pub fn advance_time(&mut self, by: Duration) -> TallyResult<i64> {
        let now = self.clock.advance(by)?;
        self.sync_clock();
        Ok(now)
    }

    /// Retract expired events and prune time windows up to the current clock
    fn sync_clock(&mut self) {
        let now = self.clock.now();
        for handle in self.expiry.take_due(now) {
            debug!(%handle, now, "Event expired");
            if self.store.contains(handle) {
                if let Err(error) = self.retract_internal(handle) {
                    warn!(%handle, %error, "Failed to retract expired event");
                }
            }
        }
        self.memory.expire_windows(&self.store, now);
        self.apply_network_events();
    }

    // ---------------------------------------------------------------------------------------------
    // Agenda
    // ---------------------------------------------------------------------------------------------

    fn apply_network_events(&mut self) {
        for event in self.memory.take_events() {
            match event {
                NetworkEvent::Activated { terminal, token } => self.create_activation(terminal, token),
                NetworkEvent::Deactivated { terminal, token } => {
                    if let Some(activation) = self.agenda.cancel(terminal, token) {
                        if !self.listeners.is_empty() {
                            let info = self.info(&activation);
                            for listener in &mut self.listeners {
                                listener.on_activation_cancelled(&info);
                            }
                        }
                    }
                }
            }
        }
    }

    fn create_activation(&mut self, terminal: TerminalId, token: TokenId) {
        let base = Arc::clone(&self.base);
        let definition = &base.network.terminals[terminal];
        let rule = &base.rules[definition.rule];

        if rule.no_loop && self.firing == Some(definition.rule) {
            debug!(rule = %rule.name, "Activation suppressed by no-loop");
            self.agenda.record_suppressed();
            return;
        }
        if rule.lock_on_active && self.agenda.is_locked(&rule.agenda_group) {
            debug!(rule = %rule.name, "Activation suppressed by lock-on-active");
            self.agenda.record_suppressed();
            return;
        }

        let binding = self.memory.binding(&definition.scope, token, &self.store);
        let id = self.agenda.create(definition.rule, terminal, token, rule.salience, &rule.agenda_group, binding).id;
        if rule.auto_focus {
            self.agenda.set_focus(&rule.agenda_group);
        }
        if !self.listeners.is_empty() {
            let Some(info) = self.agenda.get(id).map(|activation| self.info(activation)) else {
                return;
            };
            for listener in &mut self.listeners {
                listener.on_activation_created(&info);
            }
        }
    }

    fn info(&self, activation: &Activation) -> ActivationInfo {
        ActivationInfo {
            id: activation.id,
            rule: self.base.rules[activation.rule].name.clone(),
            agenda_group: activation.group.clone(),
            salience: activation.salience,
            state: activation.state,
            binding: activation.binding.clone(),
        }
    }

    pub fn set_focus(&mut self, group: &str) {
        self.agenda.set_focus(group);
    }

    pub fn pop_focus(&mut self) -> Option<String> {
        self.agenda.pop_focus()
    }

    pub fn focus(&self) -> &str {
        self.agenda.focus()
    }

    /// Cancel every pending activation of `group`
    pub fn clear_agenda_group(&mut self, group: &str) -> usize {
        let cleared = self.agenda.clear_group(group);
        if !self.listeners.is_empty() {
            for activation in &cleared {
                let info = self.info(activation);
                for listener in &mut self.listeners {
                    listener.on_activation_cancelled(&info);
                }
            }
        }
        cleared.len()
    }

    /// Pending activations, grouped by agenda group in firing order
    pub fn pending_activations(&self) -> Vec<ActivationInfo> {
        self.agenda.pending().map(|activation| self.info(activation)).collect()
    }

    /// Fire activations of the focused group until it is empty, `limit` rules
    /// fired, or an action halts the session; returns the number fired.
    ///
    /// A failing action stops the cycle with [`TallyError::Action`]; everything
    /// it and earlier actions did remains applied.
    #[instrument(skip(self), fields(session = %self.id))]
    pub fn fire_all(&mut self, limit: Option<usize>) -> TallyResult<usize> {
        self.sync_clock();
        self.halted = false;
        let mut fired = 0;
        let outcome = loop {
            if self.halted || limit.is_some_and(|limit| fired >= limit) {
                break Ok(());
            }
            self.sync_clock();
            let Some(activation) = self.agenda.pop_next() else {
                break Ok(());
            };
            fired += 1;
            if let Err(error) = self.fire(activation) {
                break Err(error);
            }
        };
        self.agenda.unlock();
        self.halted = false;
        info!(fired, pending = self.agenda.len(), focus = self.agenda.focus(), "Fire cycle finished");
        outcome.map(|()| fired)
    }

    fn fire(&mut self, activation: Activation) -> TallyResult<()> {
        let base = Arc::clone(&self.base);
        let rule = &base.rules[activation.rule];
        let info = (!self.listeners.is_empty()).then(|| self.info(&activation));
        if let Some(info) = &info {
            for listener in &mut self.listeners {
                listener.before_rule_fired(info);
            }
        }

        debug!(rule = %rule.name, activation = activation.id, "Firing rule");
        let previous = self.firing.replace(activation.rule);
        let result = {
            let mut context = RuleContext { session: self, binding: &activation.binding, rule: &rule.name };
            (rule.action)(&mut context)
        };
        self.firing = previous;

        if let Some(info) = &info {
            let outcome = match &result {
                Ok(()) => FiringOutcome::Completed,
                Err(error) => FiringOutcome::Failed { error: format!("{error:#}") },
            };
            for listener in &mut self.listeners {
                listener.after_rule_fired(info, &outcome);
            }
        }
        result.map_err(|error| TallyError::action(&rule.name, error))
    }

    // ---------------------------------------------------------------------------------------------
    // Queries and diagnostics
    // ---------------------------------------------------------------------------------------------

    /// Run a named query; the result can be iterated any number of times
    pub fn query(&self, name: &str, params: &[FactValue]) -> TallyResult<QueryResults<'_>> {
        let query = self
            .base
            .queries
            .get(name)
            .ok_or_else(|| TallyError::UnknownQuery { name: name.to_string() })?;
        if query.parameters.len() != params.len() {
            return Err(TallyError::QueryArity {
                name: name.to_string(),
                expected: query.parameters.len(),
                actual: params.len(),
            });
        }
        let source = QuerySource {
            network: &self.base.network,
            memory: &self.memory,
            store: &self.store,
            expiry: &self.expiry,
            now: self.clock.now(),
        };
        Ok(QueryResults::new(query, source, params))
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id,
            knowledge_base: self.base.id(),
            facts: self.store.len(),
            pending_activations: self.agenda.len(),
            tokens: self.memory.token_count(),
            left_memory: self.memory.left_memory_len(),
            scheduled_expiries: self.expiry.len(),
            now: self.clock.now(),
            focus: self.agenda.focus_stack().to_vec(),
            agenda: self.agenda.stats(),
        }
    }
}

fn declared_type<'a>(base: &'a KnowledgeBase, fact: &Fact) -> TallyResult<&'a FactType> {
    base.fact_type(&fact.fact_type)
        .ok_or_else(|| TallyError::schema(&fact.fact_type, "fact type is not declared"))
}

/// Handle given to rule actions for reading the match and changing the session
pub struct RuleContext<'a> {
    session: &'a mut Session,
    binding: &'a Binding,
    rule: &'a str,
}

impl RuleContext<'_> {
    pub fn rule_name(&self) -> &str {
        self.rule
    }

    pub fn binding(&self) -> &Binding {
        self.binding
    }

    /// Handle bound to a fact variable
    pub fn handle(&self, variable: &str) -> anyhow::Result<FactHandle> {
        self.binding
            .handle(variable)
            .ok_or_else(|| anyhow::anyhow!("variable '{variable}' is not bound to a fact in rule '{}'", self.rule))
    }

    /// Current value of the fact bound to `variable`
    pub fn fact(&self, variable: &str) -> anyhow::Result<&Fact> {
        let handle = self.handle(variable)?;
        self.session.get_object(handle).ok_or_else(|| anyhow::anyhow!("fact {handle} is no longer live"))
    }

    /// Value variable: a field binding, accumulate result or query parameter
    pub fn value(&self, variable: &str) -> Option<&FactValue> {
        self.binding.value(variable)
    }

    pub fn insert(&mut self, fact: Fact) -> TallyResult<FactHandle> {
        self.session.insert(fact)
    }

    pub fn update(&mut self, handle: FactHandle, fact: Fact) -> TallyResult<()> {
        self.session.update(handle, fact)
    }

    pub fn modify<F>(&mut self, handle: FactHandle, change: F) -> TallyResult<()>
    where
        F: FnOnce(&mut Fact),
    {
        self.session.modify(handle, change)
    }

    pub fn retract(&mut self, handle: FactHandle) -> TallyResult<Fact> {
        self.session.retract(handle)
    }

    pub fn get_object(&self, handle: FactHandle) -> Option<&Fact> {
        self.session.get_object(handle)
    }

    pub fn set_focus(&mut self, group: &str) {
        self.session.set_focus(group);
    }

    pub fn pop_focus(&mut self) -> Option<String> {
        self.session.pop_focus()
    }

    pub fn clear_agenda_group(&mut self, group: &str) -> usize {
        self.session.clear_agenda_group(group)
    }

    /// Stop the current fire cycle once this action returns
    pub fn halt(&mut self) {
        self.session.halted = true;
    }

    pub fn now(&self) -> i64 {
        self.session.now()
    }

    pub fn query(&self, name: &str, params: &[FactValue]) -> TallyResult<QueryResults<'_>> {
        self.session.query(name, params)
    }

    pub fn context(&self) -> &EngineContext {
        &self.session.context
    }

    pub fn context_mut(&mut self) -> &mut EngineContext {
        &mut self.session.context
    }
}

/// Outcome of one stateless execution
#[derive(Debug)]
pub struct ExecutionResults {
    pub fired: usize,
    /// Rules in firing order
    pub fired_rules: Vec<String>,
    /// Working memory at the end of the run
    pub facts: Vec<(FactHandle, Fact)>,
    pub context: EngineContext,
}

/// Runs a fresh session per call: insert everything, fire, discard
#[derive(Debug, Clone)]
pub struct StatelessSession {
    base: Arc<KnowledgeBase>,
    config: EngineConfig,
    limit: Option<usize>,
}

impl StatelessSession {
    pub fn new(base: Arc<KnowledgeBase>) -> Self {
        Self { base, config: EngineConfig::default(), limit: None }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Cap the number of firings per execution
    pub fn with_fire_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn execute(&self, facts: impl IntoIterator<Item = Fact>) -> TallyResult<ExecutionResults> {
        self.execute_with(facts, |_| Ok(()))
    }

    /// Like [`StatelessSession::execute`], with a setup step (globals, focus) before facts go in
    #[instrument(skip_all)]
    pub fn execute_with<F>(&self, facts: impl IntoIterator<Item = Fact>, setup: F) -> TallyResult<ExecutionResults>
    where
        F: FnOnce(&mut Session) -> TallyResult<()>,
    {
        let mut session = Session::new(Arc::clone(&self.base), self.config.clone());
        let log = EventLog::new();
        session.add_listener(Box::new(log.clone()));
        setup(&mut session)?;
        for fact in facts {
            session.insert(fact)?;
        }
        let fired = session.fire_all(self.limit)?;
        let facts = session.store.iter().map(|(handle, fact)| (handle, fact.clone())).collect();
        Ok(ExecutionResults { fired, fired_rules: log.fired_rules(), facts, context: session.context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClockMode;
    use crate::rule::{Operator, Pattern, Rule};
    use crate::types::FieldType;

    fn create_test_base(rules: Vec<Rule>) -> Arc<KnowledgeBase> {
        KnowledgeBase::builder()
            .declare(FactType::new("Counter").field("value", FieldType::Integer))
            .rules(rules)
            .build()
            .unwrap()
    }

    #[test]
    fn test_no_loop_stops_self_reactivation() {
        let rule = Rule::new("increment")
            .no_loop(true)
            .when(Pattern::new("Counter").var("$c").with("value", Operator::LessThan, 100))
            .then(|ctx| {
                let handle = ctx.handle("$c")?;
                ctx.modify(handle, |fact| {
                    let next = fact.value("value").as_i64().unwrap_or(0) + 1;
                    fact.set("value", next);
                })?;
                Ok(())
            });
        let mut session = create_test_base(vec![rule]).new_session();
        let handle = session.insert(Fact::new("Counter").with("value", 0)).unwrap();
        assert_eq!(session.fire_all(None).unwrap(), 1);
        assert_eq!(session.get_object(handle).unwrap().value("value"), FactValue::Integer(1));
        assert_eq!(session.stats().agenda.suppressed, 1);
    }

    #[test]
    fn test_context_values_reach_actions() {
        let rule = Rule::new("tally").when(Pattern::new("Counter")).then(|ctx| {
            if let Some(total) = ctx.context_mut().get_mut::<i64>("total") {
                *total += 1;
            }
            Ok(())
        });
        let mut session = create_test_base(vec![rule]).new_session();
        session.context_mut().set("total", 0_i64);
        for value in 0..3 {
            session.insert(Fact::new("Counter").with("value", value)).unwrap();
        }
        assert_eq!(session.fire_all(None).unwrap(), 3);
        assert_eq!(session.context().get::<i64>("total"), Some(&3));
    }

    #[test]
    fn test_undeclared_type_is_schema_error() {
        let mut session = create_test_base(Vec::new()).new_session();
        let err = session.insert(Fact::new("Ghost")).unwrap_err();
        assert_eq!(err.category(), "schema");
    }

    #[test]
    fn test_realtime_clock_cannot_advance() {
        let mut session = create_test_base(Vec::new()).new_session();
        assert!(matches!(session.advance_time(Duration::from_secs(1)), Err(TallyError::Clock { .. })));
        let mut pseudo = create_test_base(Vec::new()).new_session_with(EngineConfig {
            clock: ClockMode::Pseudo,
            ..EngineConfig::default()
        });
        let start = pseudo.now();
        assert_eq!(pseudo.advance_time(Duration::from_millis(5)).unwrap(), start + 5);
    }
}

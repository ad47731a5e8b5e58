//! Knowledge base: the compiled, immutable form of a rule set
//!
//! A [`KnowledgeBase`] holds the declared fact types, the rules, the compiled
//! queries and the shared Rete network. It is built once, wrapped in an `Arc`
//! and used by any number of sessions concurrently.
//!
//! Compilation is all-or-nothing: every rule, query and type is checked and all
//! problems are reported together in [`TallyError::Compile`].

use crate::config::EngineConfig;
use crate::error::{RuleError, TallyError, TallyResult};
use crate::query::{CompiledQuery, compile_query};
use crate::rete_network::{NetworkStats, ReteNetwork};
use crate::rule::{Query, Rule};
use crate::session::{Session, StatelessSession};
use crate::types::FactType;
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct KnowledgeBase {
    id: Uuid,
    built_at: DateTime<Utc>,
    pub(crate) types: AHashMap<String, FactType>,
    pub(crate) rules: Vec<Rule>,
    pub(crate) queries: AHashMap<String, CompiledQuery>,
    pub(crate) network: Arc<ReteNetwork>,
}

impl KnowledgeBase {
    pub fn builder() -> KnowledgeBaseBuilder {
        KnowledgeBaseBuilder::default()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// New stateful session with the default configuration
    pub fn new_session(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self), EngineConfig::default())
    }

    pub fn new_session_with(self: &Arc<Self>, config: EngineConfig) -> Session {
        Session::new(Arc::clone(self), config)
    }

    pub fn new_stateless_session(self: &Arc<Self>) -> StatelessSession {
        StatelessSession::new(Arc::clone(self))
    }

    pub fn fact_type(&self, name: &str) -> Option<&FactType> {
        self.types.get(name)
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn query_names(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.network.stats()
    }
}

/// Collects declarations, rules and queries for compilation
#[derive(Debug, Default, Clone)]
pub struct KnowledgeBaseBuilder {
    types: Vec<FactType>,
    rules: Vec<Rule>,
    queries: Vec<Query>,
}

impl KnowledgeBaseBuilder {
    pub fn declare(mut self, fact_type: FactType) -> Self {
        self.types.push(fact_type);
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn query(mut self, query: Query) -> Self {
        self.queries.push(query);
        self
    }

    /// Compile everything, or report every problem found
    #[instrument(skip(self), fields(types = self.types.len(), rules = self.rules.len(), queries = self.queries.len()))]
    pub fn build(self) -> TallyResult<Arc<KnowledgeBase>> {
        let mut errors = Vec::new();

        let mut types = AHashMap::new();
        for fact_type in self.types {
            if types.contains_key(&fact_type.name) {
                errors.push(RuleError::new(&fact_type.name, "fact type declared twice"));
                continue;
            }
            types.insert(fact_type.name.clone(), fact_type);
        }

        let mut network = ReteNetwork::new();
        let mut names = AHashSet::new();
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                errors.push(RuleError::new(&rule.name, "rule name must not be empty"));
            } else if !names.insert(rule.name.as_str()) {
                errors.push(RuleError::new(&rule.name, "duplicate rule name"));
            }
            if rule.agenda_group.trim().is_empty() {
                errors.push(RuleError::new(&rule.name, "agenda group must not be empty"));
            }
            if let Err(message) = network.add_rule(index, rule, &types) {
                errors.push(RuleError::new(&rule.name, message));
            }
        }

        let mut queries = AHashMap::new();
        for query in &self.queries {
            if queries.contains_key(&query.name) {
                errors.push(RuleError::new(&query.name, "duplicate query name"));
                continue;
            }
            match compile_query(query, &mut network, &types) {
                Ok(compiled) => {
                    queries.insert(query.name.clone(), compiled);
                }
                Err(message) => errors.push(RuleError::new(&query.name, message)),
            }
        }

        if !errors.is_empty() {
            warn!(problems = errors.len(), "Rule set rejected");
            return Err(TallyError::Compile(errors));
        }

        network.finalize();
        let stats = network.stats();
        let base = KnowledgeBase {
            id: Uuid::new_v4(),
            built_at: Utc::now(),
            types,
            rules: self.rules,
            queries,
            network: Arc::new(network),
        };
        info!(
            knowledge_base = %base.id,
            alpha_memories = stats.alpha_memories,
            beta_nodes = stats.beta_nodes,
            shared_nodes = stats.shared_nodes,
            "Knowledge base built"
        );
        Ok(Arc::new(base))
    }
}

/// Holder of the current knowledge base that can be swapped at runtime
///
/// Sessions keep the base they were created from; only sessions created after a
/// successful [`RuleRegistry::reload`] see the new rules.
#[derive(Debug)]
pub struct RuleRegistry {
    current: RwLock<Arc<KnowledgeBase>>,
}

impl RuleRegistry {
    pub fn new(base: Arc<KnowledgeBase>) -> Self {
        Self { current: RwLock::new(base) }
    }

    pub fn current(&self) -> Arc<KnowledgeBase> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Compile `builder` and swap it in; on error the current base stays
    #[instrument(skip(self, builder))]
    pub fn reload(&self, builder: KnowledgeBaseBuilder) -> TallyResult<Arc<KnowledgeBase>> {
        let base = builder.build()?;
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = std::mem::replace(&mut *guard, Arc::clone(&base));
        info!(previous = %previous.id, current = %base.id, "Knowledge base reloaded");
        Ok(base)
    }

    pub fn new_session(&self) -> Session {
        self.current().new_session()
    }
}

//! Agenda: pending activations, agenda groups and the focus stack
//!
//! Activations live in per-group conflict sets ordered by salience (highest
//! first) and then by creation sequence. Only the group on top of the focus
//! stack may fire; `MAIN` sits at the bottom and is never popped.
//!
//! ## Conflict resolution
//!
//! ```text
//! focus stack          conflict set of the top group
//! ┌──────────┐         (salience desc, seq asc)   ◄── salience_fifo
//! │ "audit"  │ ──────► [s=100 #4] [s=50 #2] [s=50 #7]
//! ├──────────┤
//! │ "MAIN"   │         (salience desc, seq desc)  ◄── salience_lifo
//! └──────────┘
//! ```
//!
//! ## Lock-on-active
//!
//! The group on top of the stack becomes *locked* once it fires. While locked,
//! `lock_on_active` rules of that group get no new activations. Any focus change
//! and the end of a fire cycle unlock it.

use crate::config::ConflictStrategy;
use crate::rete_nodes::{TerminalId, TokenId};
use crate::rule::MAIN_GROUP;
use crate::types::Binding;
use ahash::AHashMap;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use tracing::debug;

pub type ActivationId = u64;

/// Lifecycle of an activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    Pending,
    Fired,
    Cancelled,
}

/// A rule match waiting on (or removed from) the agenda
#[derive(Debug, Clone)]
pub struct Activation {
    pub id: ActivationId,
    pub rule: usize,
    pub terminal: TerminalId,
    pub token: TokenId,
    pub salience: i32,
    pub group: String,
    pub state: ActivationState,
    /// Variables of the match, captured at creation
    pub binding: Binding,
    seq: i64,
}

/// Caller-facing snapshot of an activation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationInfo {
    pub id: ActivationId,
    pub rule: String,
    pub agenda_group: String,
    pub salience: i32,
    pub state: ActivationState,
    #[serde(skip)]
    pub binding: Binding,
}

/// Counters kept over a session's lifetime
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgendaStats {
    pub created: u64,
    pub fired: u64,
    pub cancelled: u64,
    /// Creations refused by `no_loop` or `lock_on_active`
    pub suppressed: u64,
}

type ConflictKey = (Reverse<i32>, i64);

#[derive(Debug)]
pub struct Agenda {
    strategy: ConflictStrategy,
    activations: AHashMap<ActivationId, Activation>,
    by_token: AHashMap<(TerminalId, TokenId), ActivationId>,
    groups: BTreeMap<String, BTreeMap<ConflictKey, ActivationId>>,
    focus: Vec<String>,
    locked: Option<String>,
    next_id: ActivationId,
    stats: AgendaStats,
}

impl Agenda {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy,
            activations: AHashMap::new(),
            by_token: AHashMap::new(),
            groups: BTreeMap::new(),
            focus: vec![MAIN_GROUP.to_string()],
            locked: None,
            next_id: 1,
            stats: AgendaStats::default(),
        }
    }

    /// Add a pending activation for a terminal token
    pub fn create(
        &mut self,
        rule: usize,
        terminal: TerminalId,
        token: TokenId,
        salience: i32,
        group: &str,
        binding: Binding,
    ) -> &Activation {
        let id = self.next_id;
        self.next_id += 1;
        let seq = i64::try_from(id).unwrap_or(i64::MAX);
        let order = match self.strategy {
            ConflictStrategy::SalienceFifo => seq,
            ConflictStrategy::SalienceLifo => -seq,
        };
        self.groups.entry(group.to_string()).or_default().insert((Reverse(salience), order), id);
        self.by_token.insert((terminal, token), id);
        self.stats.created += 1;
        debug!(activation = id, rule, group, salience, "Activation created");
        self.activations.entry(id).or_insert(Activation {
            id,
            rule,
            terminal,
            token,
            salience,
            group: group.to_string(),
            state: ActivationState::Pending,
            binding,
            seq: order,
        })
    }

    /// Cancel the pending activation of a terminal token, if any
    pub fn cancel(&mut self, terminal: TerminalId, token: TokenId) -> Option<Activation> {
        let id = self.by_token.remove(&(terminal, token))?;
        let mut activation = self.activations.remove(&id)?;
        self.unlink(&activation);
        activation.state = ActivationState::Cancelled;
        self.stats.cancelled += 1;
        debug!(activation = id, rule = activation.rule, "Activation cancelled");
        Some(activation)
    }

    /// Cancel every pending activation of `group`
    pub fn clear_group(&mut self, group: &str) -> Vec<Activation> {
        let ids: Vec<ActivationId> = self
            .groups
            .remove(group)
            .map(|set| set.into_values().collect())
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| {
                let mut activation = self.activations.remove(&id)?;
                self.by_token.remove(&(activation.terminal, activation.token));
                activation.state = ActivationState::Cancelled;
                self.stats.cancelled += 1;
                Some(activation)
            })
            .collect()
    }

    /// Take the best activation of the focused group and lock the group
    pub fn pop_next(&mut self) -> Option<Activation> {
        let group = self.focus.last()?.clone();
        let set = self.groups.get_mut(&group)?;
        let (_, id) = set.pop_first()?;
        if set.is_empty() {
            self.groups.remove(&group);
        }
        let mut activation = self.activations.remove(&id)?;
        self.by_token.remove(&(activation.terminal, activation.token));
        activation.state = ActivationState::Fired;
        self.stats.fired += 1;
        self.locked = Some(group);
        Some(activation)
    }

    fn unlink(&mut self, activation: &Activation) {
        if let Some(set) = self.groups.get_mut(&activation.group) {
            set.remove(&(Reverse(activation.salience), activation.seq));
            if set.is_empty() {
                self.groups.remove(&activation.group);
            }
        }
    }

    /// Push `group` unless it is already on top
    pub fn set_focus(&mut self, group: &str) {
        if self.focus() != group {
            self.focus.push(group.to_string());
            self.locked = None;
            debug!(group, depth = self.focus.len(), "Focus pushed");
        }
    }

    /// Pop the focused group; `MAIN` at the bottom stays
    pub fn pop_focus(&mut self) -> Option<String> {
        if self.focus.len() <= 1 {
            return None;
        }
        self.locked = None;
        self.focus.pop()
    }

    pub fn focus(&self) -> &str {
        self.focus.last().map_or(MAIN_GROUP, String::as_str)
    }

    pub fn focus_stack(&self) -> &[String] {
        &self.focus
    }

    pub fn is_locked(&self, group: &str) -> bool {
        self.locked.as_deref() == Some(group)
    }

    pub fn unlock(&mut self) {
        self.locked = None;
    }

    pub fn get(&self, id: ActivationId) -> Option<&Activation> {
        self.activations.get(&id)
    }

    /// Pending activations, group by group in firing order
    pub fn pending(&self) -> impl Iterator<Item = &Activation> + '_ {
        self.groups.values().flat_map(|set| set.values()).filter_map(|id| self.activations.get(id))
    }

    pub fn len(&self) -> usize {
        self.activations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activations.is_empty()
    }

    pub fn stats(&self) -> AgendaStats {
        self.stats
    }

    pub fn record_suppressed(&mut self) {
        self.stats.suppressed += 1;
    }
}

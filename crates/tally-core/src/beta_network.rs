//! Per-session Rete memories and token propagation
//!
//! A [`NetworkMemory`] pairs the shared [`ReteNetwork`] definition with one
//! session's state: alpha memory contents, each beta node's left memory, the
//! token arena and the bookkeeping of negative, existential and accumulate
//! nodes. Every mutation runs to completion and leaves activation create/cancel
//! events in a queue the session drains into its agenda.
//!
//! ## Propagation rules
//!
//! - **Assert**: a fact joins every alpha memory it passes, then right-activates
//!   the successors deepest first, so a fact feeding two levels of one chain is
//!   paired with itself exactly once.
//! - **Retract**: tokens holding the fact are deleted with all descendants
//!   (cancelling their activations) before negative and existential nodes are
//!   unblocked, so no activation ever outlives a fact it depends on.
//! - **Update**: retract then assert of the same handle. Under the coalescing
//!   policy accumulate refreshes are deferred to the end of the update and only
//!   re-emitted when the result changed.

use crate::aggregation::AccumulatorState;
use crate::fact_store::WorkingMemory;
use crate::rete_network::ReteNetwork;
use crate::rete_nodes::{
    AlphaId, BetaKind, ConstantScope, NodeId, ROOT_TOKEN, Scope, TerminalId, TokenId, VarLoc, all_pass,
};
use crate::rule::Window;
use crate::temporal::in_time_window;
use crate::types::{Binding, Fact, FactHandle};
use ahash::AHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tally_types::FactValue;
use tracing::debug;

/// Activation lifecycle signal produced by terminal nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Activated { terminal: TerminalId, token: TokenId },
    Deactivated { terminal: TerminalId, token: TokenId },
}

#[derive(Debug, Clone)]
struct Token {
    parent: Option<TokenId>,
    node: Option<NodeId>,
    depth: usize,
    handle: Option<FactHandle>,
    value: Option<FactValue>,
    children: Vec<TokenId>,
}

#[derive(Debug, Default)]
struct AlphaMemory {
    facts: BTreeSet<FactHandle>,
    index: AHashMap<String, AHashMap<FactValue, BTreeSet<FactHandle>>>,
    /// Window order: timestamp for time windows, arrival sequence for length windows
    order: BTreeSet<(i64, FactHandle)>,
    order_key: AHashMap<FactHandle, i64>,
    next_seq: i64,
}

#[derive(Debug, Default)]
struct NodeMemory {
    left: BTreeSet<TokenId>,
    left_keys: AHashMap<TokenId, FactValue>,
    left_index: AHashMap<FactValue, BTreeSet<TokenId>>,
    /// Negative/exists: right facts currently matching each left token
    matches: AHashMap<TokenId, BTreeSet<FactHandle>>,
    /// Negative/exists/accumulate: left tokens each right fact matches
    matched_by: AHashMap<FactHandle, BTreeSet<TokenId>>,
    /// Pass-through or result token emitted for a left token
    outputs: AHashMap<TokenId, TokenId>,
    accumulators: AHashMap<TokenId, AccumulatorState>,
}

/// Resolves depth-addressed variables along a token chain
pub(crate) struct TokenScope<'a> {
    tokens: &'a AHashMap<TokenId, Token>,
    store: &'a WorkingMemory,
    token: TokenId,
}

impl TokenScope<'_> {
    fn at_depth(&self, depth: usize) -> Option<&Token> {
        let mut current = self.tokens.get(&self.token)?;
        while current.depth > depth {
            current = self.tokens.get(&current.parent?)?;
        }
        (current.depth == depth).then_some(current)
    }

    fn fact_at(&self, depth: usize) -> Option<(FactHandle, &Fact)> {
        let handle = self.at_depth(depth)?.handle?;
        self.store.get(handle).map(|fact| (handle, fact))
    }
}

impl Scope<VarLoc> for TokenScope<'_> {
    fn value(&self, reference: &VarLoc) -> FactValue {
        match reference {
            VarLoc::Field(depth, field) => {
                self.fact_at(*depth).map(|(_, fact)| fact.value(field)).unwrap_or(FactValue::Null)
            }
            VarLoc::Result(depth) => self
                .at_depth(*depth)
                .and_then(|token| token.value.clone())
                .unwrap_or(FactValue::Null),
            VarLoc::Fact(_) => FactValue::Null,
        }
    }

    fn timestamp(&self, reference: &VarLoc) -> Option<i64> {
        match reference {
            VarLoc::Fact(depth) => {
                let handle = self.at_depth(*depth)?.handle?;
                self.store.timestamp(handle)
            }
            _ => None,
        }
    }
}

/// One session's view of the network
#[derive(Debug)]
pub struct NetworkMemory {
    network: Arc<ReteNetwork>,
    alphas: Vec<AlphaMemory>,
    nodes: Vec<NodeMemory>,
    tokens: AHashMap<TokenId, Token>,
    next_token: TokenId,
    tokens_by_fact: AHashMap<FactHandle, BTreeSet<TokenId>>,
    fact_alphas: AHashMap<FactHandle, Vec<AlphaId>>,
    events: Vec<NetworkEvent>,
    deferred: Option<BTreeSet<(NodeId, TokenId)>>,
}

impl NetworkMemory {
    pub fn new(network: Arc<ReteNetwork>) -> Self {
        let alphas = network.alphas.iter().map(|_| AlphaMemory::default()).collect();
        let nodes = network.nodes.iter().map(|_| NodeMemory::default()).collect();
        let mut tokens = AHashMap::new();
        tokens.insert(
            ROOT_TOKEN,
            Token { parent: None, node: None, depth: 0, handle: None, value: None, children: Vec::new() },
        );
        Self {
            network,
            alphas,
            nodes,
            tokens,
            next_token: ROOT_TOKEN + 1,
            tokens_by_fact: AHashMap::new(),
            fact_alphas: AHashMap::new(),
            events: Vec::new(),
            deferred: None,
        }
    }

    /// Seed the root token: fires condition-free rules and top-level negations
    pub fn initialize(&mut self, store: &WorkingMemory) {
        let net = Arc::clone(&self.network);
        for &terminal in &net.root_terminals {
            self.events.push(NetworkEvent::Activated { terminal, token: ROOT_TOKEN });
        }
        for &node in &net.root_children {
            self.left_activate(&net, node, ROOT_TOKEN, store);
        }
    }

    pub fn take_events(&mut self) -> Vec<NetworkEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Left tokens held across all beta memories
    pub fn left_memory_len(&self) -> usize {
        self.nodes.iter().map(|node| node.left.len()).sum()
    }

    pub fn is_live(&self, token: TokenId) -> bool {
        self.tokens.contains_key(&token)
    }

    /// Propagate a fact that is already in the store
    pub fn assert_fact(&mut self, handle: FactHandle, store: &WorkingMemory, now: i64) {
        let net = Arc::clone(&self.network);
        let Some(entry) = store.entry(handle) else {
            return;
        };

        let mut entered = Vec::new();
        for alpha in net.candidate_alphas(&entry.fact) {
            let def = &net.alphas[alpha];
            if !all_pass(&def.tests, &entry.fact, entry.timestamp, &ConstantScope) {
                continue;
            }
            let order_key = match def.window {
                Some(Window::Time(span)) => {
                    if !in_time_window(entry.timestamp, now, span) {
                        continue;
                    }
                    entry.timestamp
                }
                _ => {
                    let memory = &mut self.alphas[alpha];
                    memory.next_seq += 1;
                    memory.next_seq
                }
            };
            self.alpha_add(alpha, handle, &entry.fact, order_key);
            entered.push(alpha);
        }
        self.fact_alphas.insert(handle, entered.clone());

        for &alpha in &entered {
            if let Some(Window::Length(capacity)) = net.alphas[alpha].window {
                while self.alphas[alpha].facts.len() > capacity {
                    let Some(&(_, oldest)) = self.alphas[alpha].order.first() else {
                        break;
                    };
                    debug!(alpha, handle = %oldest, "Evicted from length window");
                    self.retract_from_alpha(&net, alpha, oldest, store);
                }
            }
        }

        let mut targets: Vec<NodeId> = entered
            .iter()
            .filter(|&&alpha| self.alphas[alpha].facts.contains(&handle))
            .flat_map(|&alpha| net.alphas[alpha].successors.iter().copied())
            .collect();
        targets.sort_by_key(|&node| (std::cmp::Reverse(net.nodes[node].depth), node));
        targets.dedup();
        for node in targets {
            self.right_activate(&net, node, handle, store);
        }
    }

    /// Remove a fact from every memory; the store must still hold its current value
    pub fn retract_fact(&mut self, handle: FactHandle, store: &WorkingMemory) {
        let net = Arc::clone(&self.network);
        let Some(fact) = store.get(handle) else {
            return;
        };
        let alphas = self.fact_alphas.remove(&handle).unwrap_or_default();
        for &alpha in &alphas {
            self.alpha_remove(alpha, handle, fact);
        }
        for token in self.tokens_by_fact.remove(&handle).unwrap_or_default() {
            self.delete_token(&net, token);
        }
        for &alpha in &alphas {
            for &node in &net.alphas[alpha].successors {
                if !net.nodes[node].kind.is_join() {
                    self.right_retract(&net, node, handle, store);
                }
            }
        }
    }

    /// Drop facts that fell out of time windows
    pub fn expire_windows(&mut self, store: &WorkingMemory, now: i64) {
        let net = Arc::clone(&self.network);
        for (alpha, def) in net.alphas.iter().enumerate() {
            let Some(Window::Time(span)) = def.window else {
                continue;
            };
            let expired: Vec<FactHandle> = self.alphas[alpha]
                .order
                .iter()
                .take_while(|(timestamp, _)| !in_time_window(*timestamp, now, span))
                .map(|(_, handle)| *handle)
                .collect();
            for handle in expired {
                debug!(alpha, handle = %handle, "Expired from time window");
                self.retract_from_alpha(&net, alpha, handle, store);
            }
        }
    }

    /// Defer accumulate refreshes until [`NetworkMemory::end_coalescing`]
    pub fn begin_coalescing(&mut self) {
        self.deferred.get_or_insert_with(BTreeSet::new);
    }

    /// Re-emit deferred accumulate results whose value changed
    pub fn end_coalescing(&mut self, store: &WorkingMemory) {
        let net = Arc::clone(&self.network);
        let Some(dirty) = self.deferred.take() else {
            return;
        };
        for (node, left) in dirty {
            if self.nodes[node].accumulators.contains_key(&left) {
                self.refresh_accumulate(&net, node, left, store, true);
            }
        }
    }

    /// Materialise the variables of a token chain
    pub fn binding(&self, scope: &[(String, VarLoc)], token: TokenId, store: &WorkingMemory) -> Binding {
        let view = TokenScope { tokens: &self.tokens, store, token };
        let mut binding = Binding::default();
        for (name, loc) in scope {
            match loc {
                VarLoc::Fact(depth) => {
                    if let Some(handle) = view.at_depth(*depth).and_then(|t| t.handle) {
                        binding.facts.insert(name.clone(), handle);
                    }
                }
                other => {
                    binding.values.insert(name.clone(), view.value(other));
                }
            }
        }
        binding.handles = self.chain_handles(token);
        binding
    }

    /// Facts a token chain depends on, root first
    pub fn chain_handles(&self, token: TokenId) -> Vec<FactHandle> {
        let mut handles = Vec::new();
        let mut current = self.tokens.get(&token);
        while let Some(t) = current {
            handles.extend(t.handle);
            current = t.parent.and_then(|p| self.tokens.get(&p));
        }
        handles.reverse();
        handles
    }

    pub fn alpha_members(&self, alpha: AlphaId) -> &BTreeSet<FactHandle> {
        &self.alphas[alpha].facts
    }

    /// Members of an alpha memory whose indexed `field` matches `key`
    pub fn alpha_lookup(&self, alpha: AlphaId, field: &str, key: &FactValue) -> Option<&BTreeSet<FactHandle>> {
        self.alphas[alpha].index.get(field).and_then(|buckets| buckets.get(&key.index_key()))
    }

    // ---------------------------------------------------------------------------------------------
    // Alpha memory maintenance
    // ---------------------------------------------------------------------------------------------

    fn alpha_add(&mut self, alpha: AlphaId, handle: FactHandle, fact: &Fact, order_key: i64) {
        let fields = &self.network.alphas[alpha].indexed_fields;
        let memory = &mut self.alphas[alpha];
        memory.facts.insert(handle);
        for field in fields {
            memory
                .index
                .entry(field.clone())
                .or_default()
                .entry(fact.value(field).index_key())
                .or_default()
                .insert(handle);
        }
        memory.order.insert((order_key, handle));
        memory.order_key.insert(handle, order_key);
    }

    fn alpha_remove(&mut self, alpha: AlphaId, handle: FactHandle, fact: &Fact) {
        let memory = &mut self.alphas[alpha];
        if !memory.facts.remove(&handle) {
            return;
        }
        for (field, buckets) in &mut memory.index {
            let key = fact.value(field).index_key();
            if let Some(bucket) = buckets.get_mut(&key) {
                bucket.remove(&handle);
                if bucket.is_empty() {
                    buckets.remove(&key);
                }
            }
        }
        if let Some(order_key) = memory.order_key.remove(&handle) {
            memory.order.remove(&(order_key, handle));
        }
    }

    /// Remove a fact from a single alpha memory (window eviction)
    fn retract_from_alpha(&mut self, net: &ReteNetwork, alpha: AlphaId, handle: FactHandle, store: &WorkingMemory) {
        let Some(fact) = store.get(handle) else {
            return;
        };
        self.alpha_remove(alpha, handle, fact);
        if let Some(alphas) = self.fact_alphas.get_mut(&handle) {
            alphas.retain(|&a| a != alpha);
        }
        let doomed: Vec<TokenId> = self
            .tokens_by_fact
            .get(&handle)
            .into_iter()
            .flatten()
            .copied()
            .filter(|token| {
                self.tokens
                    .get(token)
                    .and_then(|t| t.node)
                    .is_some_and(|node| net.nodes[node].kind.alpha() == Some(alpha))
            })
            .collect();
        for token in doomed {
            self.delete_token(net, token);
        }
        for &node in &net.alphas[alpha].successors {
            if !net.nodes[node].kind.is_join() {
                self.right_retract(net, node, handle, store);
            }
        }
    }

    /// Right-fact candidates for a left token, via the join index when there is one
    fn right_candidates(&self, net: &ReteNetwork, node: NodeId, left: TokenId, store: &WorkingMemory) -> Vec<FactHandle> {
        let kind = &net.nodes[node].kind;
        let Some(alpha) = kind.alpha() else {
            return Vec::new();
        };
        match kind.index() {
            Some(index) => {
                let scope = TokenScope { tokens: &self.tokens, store, token: left };
                let key = scope.value(&index.left);
                self.alpha_lookup(alpha, &index.field, &key)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default()
            }
            None => self.alphas[alpha].facts.iter().copied().collect(),
        }
    }

    fn passes(&self, net: &ReteNetwork, node: NodeId, left: TokenId, handle: FactHandle, store: &WorkingMemory) -> bool {
        let Some(entry) = store.entry(handle) else {
            return false;
        };
        let scope = TokenScope { tokens: &self.tokens, store, token: left };
        all_pass(net.nodes[node].kind.tests(), &entry.fact, entry.timestamp, &scope)
    }

    // ---------------------------------------------------------------------------------------------
    // Beta propagation
    // ---------------------------------------------------------------------------------------------

    fn left_activate(&mut self, net: &ReteNetwork, node: NodeId, left: TokenId, store: &WorkingMemory) {
        let def = &net.nodes[node];
        self.nodes[node].left.insert(left);
        if let Some(index) = def.kind.index() {
            let key = TokenScope { tokens: &self.tokens, store, token: left }.value(&index.left).index_key();
            let memory = &mut self.nodes[node];
            memory.left_index.entry(key.clone()).or_default().insert(left);
            memory.left_keys.insert(left, key);
        }

        match &def.kind {
            BetaKind::Join { .. } => {
                let matched: Vec<FactHandle> = self
                    .right_candidates(net, node, left, store)
                    .into_iter()
                    .filter(|&h| self.passes(net, node, left, h, store))
                    .collect();
                for handle in matched {
                    self.emit(net, node, left, Some(handle), None, store);
                }
            }
            BetaKind::Negative { .. } | BetaKind::Exists { .. } => {
                let matched: BTreeSet<FactHandle> = self
                    .right_candidates(net, node, left, store)
                    .into_iter()
                    .filter(|&h| self.passes(net, node, left, h, store))
                    .collect();
                let memory = &mut self.nodes[node];
                for &handle in &matched {
                    memory.matched_by.entry(handle).or_default().insert(left);
                }
                let blocked = !matched.is_empty();
                memory.matches.insert(left, matched);
                let negative = matches!(def.kind, BetaKind::Negative { .. });
                if blocked != negative {
                    let out = self.emit(net, node, left, None, None, store);
                    self.nodes[node].outputs.insert(left, out);
                }
            }
            BetaKind::Accumulate { function, .. } => {
                let field = function.field();
                let mut state = AccumulatorState::new(function.clone());
                for handle in self.right_candidates(net, node, left, store) {
                    if !self.passes(net, node, left, handle, store) {
                        continue;
                    }
                    let value = contribution(store, handle, field);
                    state.add(handle, value);
                    self.nodes[node].matched_by.entry(handle).or_default().insert(left);
                }
                self.nodes[node].accumulators.insert(left, state);
                self.refresh_accumulate(net, node, left, store, false);
            }
            BetaKind::Eval { eval, scope } => {
                let binding = self.binding(scope, left, store);
                if (eval.predicate)(&binding) {
                    let out = self.emit(net, node, left, None, None, store);
                    self.nodes[node].outputs.insert(left, out);
                }
            }
        }
    }

    fn right_activate(&mut self, net: &ReteNetwork, node: NodeId, handle: FactHandle, store: &WorkingMemory) {
        let def = &net.nodes[node];
        let candidates: Vec<TokenId> = match def.kind.index() {
            Some(index) => {
                let key = store.get(handle).map(|f| f.value(&index.field).index_key()).unwrap_or(FactValue::Null);
                self.nodes[node]
                    .left_index
                    .get(&key)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default()
            }
            None => self.nodes[node].left.iter().copied().collect(),
        };
        let lefts: Vec<TokenId> =
            candidates.into_iter().filter(|&left| self.passes(net, node, left, handle, store)).collect();

        for left in lefts {
            match &def.kind {
                BetaKind::Join { .. } => {
                    self.emit(net, node, left, Some(handle), None, store);
                }
                BetaKind::Negative { .. } | BetaKind::Exists { .. } => {
                    let memory = &mut self.nodes[node];
                    let matched = memory.matches.entry(left).or_default();
                    let first = matched.is_empty();
                    matched.insert(handle);
                    memory.matched_by.entry(handle).or_default().insert(left);
                    if !first {
                        continue;
                    }
                    if matches!(def.kind, BetaKind::Negative { .. }) {
                        if let Some(out) = self.nodes[node].outputs.remove(&left) {
                            self.delete_token(net, out);
                        }
                    } else {
                        let out = self.emit(net, node, left, None, None, store);
                        self.nodes[node].outputs.insert(left, out);
                    }
                }
                BetaKind::Accumulate { function, .. } => {
                    let value = contribution(store, handle, function.field());
                    let memory = &mut self.nodes[node];
                    if let Some(state) = memory.accumulators.get_mut(&left) {
                        state.add(handle, value);
                        memory.matched_by.entry(handle).or_default().insert(left);
                        self.refresh_accumulate(net, node, left, store, false);
                    }
                }
                BetaKind::Eval { .. } => {}
            }
        }
    }

    fn right_retract(&mut self, net: &ReteNetwork, node: NodeId, handle: FactHandle, store: &WorkingMemory) {
        let lefts = self.nodes[node].matched_by.remove(&handle).unwrap_or_default();
        for left in lefts {
            match &net.nodes[node].kind {
                BetaKind::Negative { .. } | BetaKind::Exists { .. } => {
                    let memory = &mut self.nodes[node];
                    let Some(matched) = memory.matches.get_mut(&left) else {
                        continue;
                    };
                    if !matched.remove(&handle) || !matched.is_empty() {
                        continue;
                    }
                    if matches!(net.nodes[node].kind, BetaKind::Negative { .. }) {
                        let out = self.emit(net, node, left, None, None, store);
                        self.nodes[node].outputs.insert(left, out);
                    } else if let Some(out) = self.nodes[node].outputs.remove(&left) {
                        self.delete_token(net, out);
                    }
                }
                BetaKind::Accumulate { .. } => {
                    let removed = self.nodes[node]
                        .accumulators
                        .get_mut(&left)
                        .is_some_and(|state| state.remove(handle));
                    if removed {
                        self.refresh_accumulate(net, node, left, store, false);
                    }
                }
                BetaKind::Join { .. } | BetaKind::Eval { .. } => {}
            }
        }
    }

    /// Replace the result token of an accumulate node for one left token
    fn refresh_accumulate(&mut self, net: &ReteNetwork, node: NodeId, left: TokenId, store: &WorkingMemory, only_if_changed: bool) {
        if !only_if_changed {
            if let Some(dirty) = self.deferred.as_mut() {
                dirty.insert((node, left));
                return;
            }
        }
        let BetaKind::Accumulate { having, .. } = &net.nodes[node].kind else {
            return;
        };
        let Some(state) = self.nodes[node].accumulators.get(&left) else {
            return;
        };
        let result = state.result().filter(|value| match having {
            Some((operator, operand)) => {
                let scope = TokenScope { tokens: &self.tokens, store, token: left };
                operator.apply(value, &operand.resolve(&scope))
            }
            None => true,
        });

        if only_if_changed {
            let current = self.nodes[node]
                .outputs
                .get(&left)
                .and_then(|out| self.tokens.get(out))
                .and_then(|t| t.value.as_ref());
            if current == result.as_ref() {
                return;
            }
        }
        if let Some(out) = self.nodes[node].outputs.remove(&left) {
            self.delete_token(net, out);
        }
        if let Some(value) = result {
            let out = self.emit(net, node, left, None, Some(value), store);
            self.nodes[node].outputs.insert(left, out);
        }
    }

    fn emit(
        &mut self,
        net: &ReteNetwork,
        node: NodeId,
        parent: TokenId,
        handle: Option<FactHandle>,
        value: Option<FactValue>,
        store: &WorkingMemory,
    ) -> TokenId {
        let id = self.next_token;
        self.next_token += 1;
        let def = &net.nodes[node];
        self.tokens.insert(
            id,
            Token { parent: Some(parent), node: Some(node), depth: def.depth, handle, value, children: Vec::new() },
        );
        if let Some(p) = self.tokens.get_mut(&parent) {
            p.children.push(id);
        }
        if let Some(h) = handle {
            self.tokens_by_fact.entry(h).or_default().insert(id);
        }
        for &terminal in &def.terminals {
            self.events.push(NetworkEvent::Activated { terminal, token: id });
        }
        for &child in &def.children {
            self.left_activate(net, child, id, store);
        }
        id
    }

    /// Delete a token and everything derived from it
    fn delete_token(&mut self, net: &ReteNetwork, id: TokenId) {
        let Some(token) = self.tokens.remove(&id) else {
            return;
        };
        for &child in &token.children {
            self.delete_token(net, child);
        }
        if let Some(node) = token.node {
            let def = &net.nodes[node];
            for &terminal in &def.terminals {
                self.events.push(NetworkEvent::Deactivated { terminal, token: id });
            }
            for &child in &def.children {
                self.remove_left(child, id);
            }
        }
        if let Some(handle) = token.handle {
            if let Some(set) = self.tokens_by_fact.get_mut(&handle) {
                set.remove(&id);
                if set.is_empty() {
                    self.tokens_by_fact.remove(&handle);
                }
            }
        }
        if let Some(parent) = token.parent.and_then(|p| self.tokens.get_mut(&p)) {
            parent.children.retain(|&c| c != id);
        }
    }

    /// Forget a left token at a node whose parent token is gone
    fn remove_left(&mut self, node: NodeId, left: TokenId) {
        let memory = &mut self.nodes[node];
        memory.left.remove(&left);
        if let Some(key) = memory.left_keys.remove(&left) {
            if let Some(set) = memory.left_index.get_mut(&key) {
                set.remove(&left);
                if set.is_empty() {
                    memory.left_index.remove(&key);
                }
            }
        }
        let mut released: Vec<FactHandle> = Vec::new();
        if let Some(matched) = memory.matches.remove(&left) {
            released.extend(matched);
        }
        if let Some(state) = memory.accumulators.remove(&left) {
            released.extend(state.contributors());
        }
        for handle in released {
            if let Some(set) = memory.matched_by.get_mut(&handle) {
                set.remove(&left);
                if set.is_empty() {
                    memory.matched_by.remove(&handle);
                }
            }
        }
        memory.outputs.remove(&left);
        if let Some(dirty) = self.deferred.as_mut() {
            dirty.remove(&(node, left));
        }
    }
}

/// Value a fact contributes to an accumulate function
fn contribution(store: &WorkingMemory, handle: FactHandle, field: Option<&str>) -> FactValue {
    match (field, store.get(handle)) {
        (Some(field), Some(fact)) => fact.value(field),
        _ => FactValue::Null,
    }
}

//! Named, parameterized queries over working memory
//!
//! Queries compile against the same alpha memories as rules, so their single-fact
//! filtering is maintained incrementally. The join part runs on demand: each
//! call walks the alpha memories depth-first and yields one [`Row`] per match,
//! lazily, without touching the agenda.
//!
//! Variables are addressed by name rather than by token depth, because query
//! rows are built one step at a time instead of as network tokens.

use crate::aggregation::AccumulatorState;
use crate::beta_network::NetworkMemory;
use crate::fact_store::WorkingMemory;
use crate::rete_network::{
    Declarations, Declared, Element, RefStyle, ReteNetwork, check_accumulate_function,
    check_no_declarations, check_pattern, compile_constraint, compile_operand, normalize,
};
use crate::rete_nodes::{AlphaId, Scope, Test, TestOperand, all_pass};
use crate::rule::{AccumulateFunction, Eval, Operator, Pattern, Query, Window};
use crate::temporal::{ExpiryQueue, in_time_window};
use crate::types::{Binding, Fact, FactHandle, FactType};
use ahash::AHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use tally_types::FactValue;

/// Name-based variable reference used inside query tests
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum QueryRef {
    Value(String),
    Field { variable: String, field: String },
    Fact(String),
}

pub(crate) struct Named;

impl RefStyle for Named {
    type Ref = QueryRef;

    fn value_ref(name: &str, declared: &Declared) -> Option<QueryRef> {
        match declared {
            Declared::Field { .. } | Declared::Result { .. } | Declared::Parameter => {
                Some(QueryRef::Value(name.to_string()))
            }
            Declared::Fact { .. } => None,
        }
    }

    fn field_ref(name: &str, _: usize, field: &str) -> QueryRef {
        QueryRef::Field { variable: name.to_string(), field: field.to_string() }
    }

    fn fact_ref(name: &str, _: usize) -> QueryRef {
        QueryRef::Fact(name.to_string())
    }
}

/// Alpha memory a step reads, narrowed by the index on `field` when present
#[derive(Debug, Clone)]
struct StepSource {
    alpha: AlphaId,
    lookup: Option<(String, QueryRef)>,
}

#[derive(Debug, Clone)]
enum QueryStep {
    Match {
        source: StepSource,
        variable: Option<String>,
        bindings: Vec<(String, String)>,
        tests: Vec<Test<QueryRef>>,
    },
    Not { source: StepSource, tests: Vec<Test<QueryRef>> },
    Exists { source: StepSource, tests: Vec<Test<QueryRef>> },
    Accumulate {
        source: StepSource,
        tests: Vec<Test<QueryRef>>,
        function: AccumulateFunction,
        result: String,
        having: Option<(Operator, TestOperand<QueryRef>)>,
    },
    Eval(Eval),
}

/// A query compiled against a knowledge base's network
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub name: String,
    pub parameters: Vec<String>,
    branches: Vec<Vec<QueryStep>>,
}

/// One query match: fact variables and value variables (parameters included)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Row {
    pub facts: BTreeMap<String, FactHandle>,
    pub values: BTreeMap<String, FactValue>,
}

impl Row {
    pub fn handle(&self, variable: &str) -> Option<FactHandle> {
        self.facts.get(variable).copied()
    }

    pub fn value(&self, variable: &str) -> Option<&FactValue> {
        self.values.get(variable)
    }

    fn to_binding(&self) -> Binding {
        Binding {
            facts: self.facts.clone(),
            values: self.values.clone(),
            handles: self.facts.values().copied().collect(),
        }
    }
}

/// Compile a query; alpha memories are added to (or shared with) `network`
pub(crate) fn compile_query(
    query: &Query,
    network: &mut ReteNetwork,
    types: &AHashMap<String, FactType>,
) -> Result<CompiledQuery, String> {
    let mut branches = Vec::new();
    for branch in normalize(&query.condition)? {
        let mut decls = Declarations::default();
        for parameter in &query.parameters {
            decls.declare(parameter, Declared::Parameter)?;
        }
        let mut steps = Vec::with_capacity(branch.len());
        for (position, element) in branch.iter().enumerate() {
            let depth = position + 1;
            let step = match element {
                Element::Pattern(pattern) => {
                    let (source, tests) = query_parts(pattern, network, types, &decls)?;
                    if let Some(variable) = &pattern.variable {
                        decls.declare(
                            variable,
                            Declared::Fact { depth, fact_type: pattern.fact_type.clone() },
                        )?;
                    }
                    for (variable, field) in &pattern.bindings {
                        decls.declare(variable, Declared::Field { depth, field: field.clone() })?;
                    }
                    QueryStep::Match {
                        source,
                        variable: pattern.variable.clone(),
                        bindings: pattern.bindings.clone(),
                        tests,
                    }
                }
                Element::Not(pattern) => {
                    check_no_declarations(pattern, "not/exists")?;
                    let (source, tests) = query_parts(pattern, network, types, &decls)?;
                    QueryStep::Not { source, tests }
                }
                Element::Exists(pattern) => {
                    check_no_declarations(pattern, "not/exists")?;
                    let (source, tests) = query_parts(pattern, network, types, &decls)?;
                    QueryStep::Exists { source, tests }
                }
                Element::Forall { base, require } => {
                    check_no_declarations(base, "forall")?;
                    let fact_type = check_pattern(base, types)?;
                    let (source, mut tests) = query_parts(base, network, types, &decls)?;
                    let required = require
                        .iter()
                        .map(|c| compile_constraint::<Named>(c, fact_type, types, &decls))
                        .collect::<Result<Vec<_>, _>>()?;
                    tests.push(Test::Not(Box::new(Test::All(required))));
                    QueryStep::Not { source, tests }
                }
                Element::Accumulate(acc) => {
                    check_no_declarations(&acc.source, "accumulate")?;
                    let fact_type = check_pattern(&acc.source, types)?;
                    check_accumulate_function(&acc.function, fact_type)?;
                    let (source, tests) = query_parts(&acc.source, network, types, &decls)?;
                    let having = acc
                        .having
                        .as_ref()
                        .map(|(op, operand)| {
                            compile_operand::<Named>(operand, types, &decls).map(|o| (*op, o))
                        })
                        .transpose()?;
                    decls.declare(&acc.result, Declared::Result { depth })?;
                    QueryStep::Accumulate {
                        source,
                        tests,
                        function: acc.function.clone(),
                        result: acc.result.clone(),
                        having,
                    }
                }
                Element::Eval(eval) => QueryStep::Eval(eval.clone()),
            };
            steps.push(step);
        }
        branches.push(steps);
    }
    Ok(CompiledQuery { name: query.name.clone(), parameters: query.parameters.clone(), branches })
}

fn query_parts(
    pattern: &Pattern,
    network: &mut ReteNetwork,
    types: &AHashMap<String, FactType>,
    decls: &Declarations,
) -> Result<(StepSource, Vec<Test<QueryRef>>), String> {
    let fact_type = check_pattern(pattern, types)?;
    let alpha = network.constant_alpha(pattern, fact_type, types)?;
    let tests = pattern
        .constraints
        .iter()
        .filter(|c| !c.is_constant())
        .map(|c| compile_constraint::<Named>(c, fact_type, types, decls))
        .collect::<Result<Vec<_>, _>>()?;
    let lookup = tests
        .iter()
        .find_map(Test::equality_ref)
        .filter(|(_, reference)| !matches!(reference, QueryRef::Fact(_)))
        .map(|(field, reference)| (field.to_string(), reference.clone()));
    if let Some((field, _)) = &lookup {
        network.register_index(alpha, field);
    }
    Ok((StepSource { alpha, lookup }, tests))
}

/// Read-only view of a session used while a query runs
#[derive(Clone, Copy)]
pub(crate) struct QuerySource<'a> {
    pub network: &'a ReteNetwork,
    pub memory: &'a NetworkMemory,
    pub store: &'a WorkingMemory,
    pub expiry: &'a ExpiryQueue,
    pub now: i64,
}

impl QuerySource<'_> {
    /// Candidate members for a step, still live at `now`; window and expiry pruning may be pending
    fn members(&self, source: &StepSource, row: &Row) -> Vec<FactHandle> {
        let alpha = source.alpha;
        let span = match self.network.alphas[alpha].window {
            Some(Window::Time(span)) => Some(span),
            _ => None,
        };
        let candidates = match &source.lookup {
            Some((field, reference)) => {
                let key = RowScope { row, store: self.store }.value(reference);
                self.memory.alpha_lookup(alpha, field, &key)
            }
            None => Some(self.memory.alpha_members(alpha)),
        };
        candidates
            .into_iter()
            .flatten()
            .copied()
            .filter(|&handle| !self.expiry.is_expired(handle, self.now))
            .filter(|&handle| {
                span.is_none_or(|span| {
                    self.store.timestamp(handle).is_some_and(|ts| in_time_window(ts, self.now, span))
                })
            })
            .collect()
    }
}

struct RowScope<'a> {
    row: &'a Row,
    store: &'a WorkingMemory,
}

impl Scope<QueryRef> for RowScope<'_> {
    fn value(&self, reference: &QueryRef) -> FactValue {
        match reference {
            QueryRef::Value(name) => self.row.values.get(name).cloned().unwrap_or(FactValue::Null),
            QueryRef::Field { variable, field } => self
                .row
                .handle(variable)
                .and_then(|handle| self.store.get(handle))
                .map_or(FactValue::Null, |fact| fact.value(field)),
            QueryRef::Fact(_) => FactValue::Null,
        }
    }

    fn timestamp(&self, reference: &QueryRef) -> Option<i64> {
        match reference {
            QueryRef::Fact(name) => self.store.timestamp(self.row.handle(name)?),
            _ => None,
        }
    }
}

/// Restartable result set of one query call; every iteration re-reads the session
pub struct QueryResults<'a> {
    query: &'a CompiledQuery,
    source: QuerySource<'a>,
    initial: Row,
}

impl<'a> QueryResults<'a> {
    pub(crate) fn new(query: &'a CompiledQuery, source: QuerySource<'a>, params: &[FactValue]) -> Self {
        let values = query.parameters.iter().cloned().zip(params.iter().cloned()).collect();
        Self { query, source, initial: Row { facts: BTreeMap::new(), values } }
    }

    pub fn iter(&self) -> QueryIter<'a> {
        QueryIter {
            query: self.query,
            source: self.source,
            initial: self.initial.clone(),
            next_branch: 0,
            stack: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn to_vec(&self) -> Vec<Row> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &QueryResults<'a> {
    type Item = Row;
    type IntoIter = QueryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

struct Frame {
    step: usize,
    row: Row,
    candidates: Vec<FactHandle>,
    next: usize,
}

enum Descent {
    Emit(Row),
    Branch(Frame),
    Dead,
}

/// Lazy depth-first walk over one query's branches
pub struct QueryIter<'a> {
    query: &'a CompiledQuery,
    source: QuerySource<'a>,
    initial: Row,
    next_branch: usize,
    stack: Vec<Frame>,
}

impl QueryIter<'_> {
    fn steps(&self) -> &[QueryStep] {
        &self.query.branches[self.next_branch - 1]
    }

    fn passes(&self, tests: &[Test<QueryRef>], handle: FactHandle, row: &Row) -> bool {
        let Some(entry) = self.source.store.entry(handle) else {
            return false;
        };
        all_pass(tests, &entry.fact, entry.timestamp, &RowScope { row, store: self.source.store })
    }

    /// Run deterministic steps from `step` until a pattern needs enumerating
    fn descend(&self, mut step: usize, mut row: Row) -> Descent {
        let steps = self.steps();
        while let Some(current) = steps.get(step) {
            match current {
                QueryStep::Match { source, .. } => {
                    let candidates = self.source.members(source, &row);
                    return Descent::Branch(Frame { step, row, candidates, next: 0 });
                }
                QueryStep::Not { source, tests } => {
                    if self.source.members(source, &row).into_iter().any(|h| self.passes(tests, h, &row)) {
                        return Descent::Dead;
                    }
                }
                QueryStep::Exists { source, tests } => {
                    if !self.source.members(source, &row).into_iter().any(|h| self.passes(tests, h, &row)) {
                        return Descent::Dead;
                    }
                }
                QueryStep::Accumulate { source, tests, function, result, having } => {
                    let field = function.field();
                    let values = self
                        .source
                        .members(source, &row)
                        .into_iter()
                        .filter(|&h| self.passes(tests, h, &row))
                        .map(|h| (h, field_value(self.source.store.get(h), field)));
                    let scope = RowScope { row: &row, store: self.source.store };
                    let value = AccumulatorState::from_values(function.clone(), values)
                        .result()
                        .filter(|value| {
                            having.as_ref().is_none_or(|(op, operand)| op.apply(value, &operand.resolve(&scope)))
                        });
                    match value {
                        Some(value) => {
                            row.values.insert(result.clone(), value);
                        }
                        None => return Descent::Dead,
                    }
                }
                QueryStep::Eval(eval) => {
                    if !(eval.predicate)(&row.to_binding()) {
                        return Descent::Dead;
                    }
                }
            }
            step += 1;
        }
        Descent::Emit(row)
    }

    /// Extend `row` with `handle` at a pattern step, if it matches
    fn extend(&self, step: usize, handle: FactHandle, row: &Row) -> Option<Row> {
        let QueryStep::Match { variable, bindings, tests, .. } = self.steps().get(step)? else {
            return None;
        };
        if !self.passes(tests, handle, row) {
            return None;
        }
        let fact = self.source.store.get(handle)?;
        let mut row = row.clone();
        if let Some(variable) = variable {
            row.facts.insert(variable.clone(), handle);
        }
        for (variable, field) in bindings {
            row.values.insert(variable.clone(), fact.value(field));
        }
        Some(row)
    }
}

impl Iterator for QueryIter<'_> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                if self.next_branch >= self.query.branches.len() {
                    return None;
                }
                self.next_branch += 1;
                match self.descend(0, self.initial.clone()) {
                    Descent::Emit(row) => return Some(row),
                    Descent::Branch(frame) => self.stack.push(frame),
                    Descent::Dead => {}
                }
                continue;
            };
            let Some(&handle) = frame.candidates.get(frame.next) else {
                self.stack.pop();
                continue;
            };
            frame.next += 1;
            let step = frame.step;
            let row = frame.row.clone();
            let Some(extended) = self.extend(step, handle, &row) else {
                continue;
            };
            match self.descend(step + 1, extended) {
                Descent::Emit(row) => return Some(row),
                Descent::Branch(frame) => self.stack.push(frame),
                Descent::Dead => {}
            }
        }
    }
}

fn field_value(fact: Option<&Fact>, field: Option<&str>) -> FactValue {
    match (fact, field) {
        (Some(fact), Some(field)) => fact.value(field),
        _ => FactValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityMode;
    use crate::rule::{Condition, Operand};
    use crate::types::FieldType;
    use std::sync::Arc;

    fn create_test_types() -> AHashMap<String, FactType> {
        [
            FactType::new("Customer").field("id", FieldType::Integer).field("tier", FieldType::String),
            FactType::new("Order").field("customer", FieldType::Integer).field("total", FieldType::Float),
        ]
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect()
    }

    #[test]
    fn test_parameterised_join_query() {
        let types = create_test_types();
        let mut network = ReteNetwork::new();
        let query = Query::new("orders_of_tier").param("$tier").when(Condition::all(vec![
            Pattern::new("Customer").var("$c").with("tier", Operator::Equal, Operand::var("$tier")).into(),
            Pattern::new("Order")
                .var("$o")
                .with("customer", Operator::Equal, Operand::field("$c", "id"))
                .bind("$total", "total")
                .into(),
        ]));
        let compiled = compile_query(&query, &mut network, &types).unwrap();
        network.finalize();
        let network = Arc::new(network);

        let mut store = WorkingMemory::new(IdentityMode::Identity);
        let mut memory = NetworkMemory::new(Arc::clone(&network));
        memory.initialize(&store);
        for fact in [
            Fact::new("Customer").with("id", 1).with("tier", "gold"),
            Fact::new("Customer").with("id", 2).with("tier", "basic"),
            Fact::new("Order").with("customer", 1).with("total", 10.0),
            Fact::new("Order").with("customer", 1).with("total", 20.0),
            Fact::new("Order").with("customer", 2).with("total", 5.0),
        ] {
            let handle = store.insert(fact, 0);
            memory.assert_fact(handle, &store, 0);
        }

        let expiry = ExpiryQueue::default();
        let source = QuerySource { network: &network, memory: &memory, store: &store, expiry: &expiry, now: 0 };
        let results = QueryResults::new(&compiled, source, &["gold".into()]);
        let totals: Vec<FactValue> = results.iter().filter_map(|row| row.value("$total").cloned()).collect();
        assert_eq!(totals, vec![FactValue::Float(10.0), FactValue::Float(20.0)]);
        assert_eq!(results.count(), 2);
        assert!(QueryResults::new(&compiled, source, &["platinum".into()]).is_empty());

        // Both steps read their alpha memory through the equality index
        let indexed: Vec<(&str, &[String])> = network
            .alphas
            .iter()
            .map(|alpha| (alpha.fact_type.as_str(), alpha.indexed_fields.as_slice()))
            .collect();
        assert!(indexed.contains(&("Customer", &["tier".to_string()][..])));
        assert!(indexed.contains(&("Order", &["customer".to_string()][..])));
        let QueryStep::Match { source: orders, .. } = &compiled.branches[0][1] else {
            panic!("second step should match orders");
        };
        let mut row = Row::default();
        row.facts.insert("$c".to_string(), FactHandle(2));
        assert_eq!(source.members(orders, &row), vec![FactHandle(5)]);
    }

    #[test]
    fn test_query_rejects_unbound_variables() {
        let types = create_test_types();
        let mut network = ReteNetwork::new();
        let query = Query::new("bad").when(Pattern::new("Order").with("customer", Operator::Equal, Operand::var("$x")));
        assert!(compile_query(&query, &mut network, &types).is_err());
    }
}

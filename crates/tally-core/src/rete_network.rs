//! Rete network compiler
//!
//! Turns rule condition trees into the shared node graph described in
//! [`crate::rete_nodes`]. Compilation happens once per knowledge base; sessions
//! only ever read the result.
//!
//! ## Compilation steps
//!
//! 1. **Normalise** each condition into disjunctive branches of flat elements.
//!    `Or` splits a rule into independent branches, `Not(Or(a, b))` becomes
//!    `Not(a), Not(b)` and `Exists(Or(a, b))` becomes one branch per `Exists`.
//! 2. **Validate** every branch left to right: fact types and fields exist,
//!    variables are bound before use and never rebound, temporal operators join
//!    events, and negated elements bind nothing.
//! 3. **Build** alpha memories from constant constraints (shared by identical
//!    type, tests and window) and beta nodes from the remaining tests (shared
//!    by identical parent and structure).
//!
//! ```text
//! Rule "low-credit": Applicant(credit_score < 600) as $a, not Blacklist(id == $a.id)
//!
//!   alpha#0 Applicant[credit_score < 600] ──► join#0 (depth 1)
//!   alpha#1 Blacklist[]                   ──► not#1  (depth 2, index id = $a.id)
//!                                                └──► terminal(low-credit)
//! ```

use crate::rete_nodes::{
    AlphaDef, AlphaId, BetaKind, BetaNodeDef, JoinIndex, NodeId, TerminalDef, TerminalId, Test,
    TestOperand, VarLoc,
};
use crate::rule::{
    Accumulate, AccumulateFunction, Condition, Constraint, Eval, Operand, Pattern, Rule, Window,
};
use crate::types::{Fact, FactType, FieldType};
use ahash::AHashMap;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use tally_types::FactValue;
use tracing::debug;

/// Upper bound on alternatives a single condition may expand into
const MAX_BRANCHES: usize = 256;

/// Flat element of one normalised branch
#[derive(Debug, Clone)]
pub(crate) enum Element {
    Pattern(Pattern),
    Not(Pattern),
    Exists(Pattern),
    Forall { base: Pattern, require: Vec<Constraint> },
    Accumulate(Accumulate),
    Eval(Eval),
}

/// Expand a condition tree into disjunctive branches
pub(crate) fn normalize(condition: &Condition) -> Result<Vec<Vec<Element>>, String> {
    let branches = dnf(condition)?;
    if branches.len() > MAX_BRANCHES {
        return Err(format!(
            "condition expands to {} alternatives (limit {MAX_BRANCHES})",
            branches.len()
        ));
    }
    Ok(branches)
}

fn dnf(condition: &Condition) -> Result<Vec<Vec<Element>>, String> {
    match condition {
        Condition::Pattern(p) => Ok(vec![vec![Element::Pattern(p.clone())]]),
        Condition::And(children) => {
            let mut acc: Vec<Vec<Element>> = vec![Vec::new()];
            for child in children {
                let alternatives = dnf(child)?;
                let mut next = Vec::with_capacity(acc.len() * alternatives.len());
                for prefix in &acc {
                    for alternative in &alternatives {
                        let mut branch = prefix.clone();
                        branch.extend(alternative.iter().cloned());
                        next.push(branch);
                    }
                }
                if next.len() > MAX_BRANCHES {
                    return Err(format!("condition expands to more than {MAX_BRANCHES} alternatives"));
                }
                acc = next;
            }
            Ok(acc)
        }
        Condition::Or(children) => {
            if children.is_empty() {
                return Err("empty disjunction".to_string());
            }
            let mut out = Vec::new();
            for child in children {
                out.extend(dnf(child)?);
            }
            Ok(out)
        }
        Condition::Not(inner) => negate(inner),
        Condition::Exists(inner) => exists(inner),
        Condition::Forall { base, require } => {
            Ok(vec![vec![Element::Forall { base: base.clone(), require: require.clone() }]])
        }
        Condition::Accumulate(acc) => Ok(vec![vec![Element::Accumulate((**acc).clone())]]),
        Condition::Eval(eval) => Ok(vec![vec![Element::Eval(eval.clone())]]),
    }
}

fn negate(condition: &Condition) -> Result<Vec<Vec<Element>>, String> {
    match condition {
        Condition::Pattern(p) => Ok(vec![vec![Element::Not(p.clone())]]),
        Condition::Or(children) => {
            dnf(&Condition::And(children.iter().map(|c| Condition::not(c.clone())).collect()))
        }
        Condition::And(children) if children.len() == 1 => negate(&children[0]),
        Condition::Not(inner) => exists(inner),
        Condition::Exists(inner) => negate(inner),
        Condition::Forall { base, require } => {
            let counterexample = base
                .clone()
                .constraint(Constraint::negate(Constraint::All(require.clone())));
            Ok(vec![vec![Element::Exists(counterexample)]])
        }
        Condition::Eval(eval) => {
            let predicate = Arc::clone(&eval.predicate);
            Ok(vec![vec![Element::Eval(Eval {
                name: format!("not {}", eval.name),
                predicate: Arc::new(move |binding| !predicate(binding)),
            })]])
        }
        Condition::And(_) | Condition::Accumulate(_) => {
            Err("negation scope must be a single pattern".to_string())
        }
    }
}

fn exists(condition: &Condition) -> Result<Vec<Vec<Element>>, String> {
    match condition {
        Condition::Pattern(p) => Ok(vec![vec![Element::Exists(p.clone())]]),
        Condition::Or(children) => {
            let mut out = Vec::new();
            for child in children {
                out.extend(exists(child)?);
            }
            Ok(out)
        }
        Condition::And(children) if children.len() == 1 => exists(&children[0]),
        Condition::Not(inner) => negate(inner),
        Condition::Exists(inner) => exists(inner),
        Condition::Forall { .. } | Condition::Eval(_) => dnf(condition),
        Condition::And(_) | Condition::Accumulate(_) => {
            Err("existential scope must be a single pattern".to_string())
        }
    }
}

/// What a variable name refers to while a branch is being compiled
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Declared {
    Fact { depth: usize, fact_type: String },
    Field { depth: usize, field: String },
    Result { depth: usize },
    Parameter,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct Declarations {
    vars: BTreeMap<String, Declared>,
}

impl Declarations {
    pub fn declare(&mut self, name: &str, declared: Declared) -> Result<(), String> {
        if self.vars.contains_key(name) {
            return Err(format!("variable '{name}' is already bound"));
        }
        self.vars.insert(name.to_string(), declared);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&Declared, String> {
        self.vars.get(name).ok_or_else(|| format!("unbound variable '{name}'"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Declared)> {
        self.vars.iter()
    }

    /// Depth-addressed view of every declared variable
    pub fn positional_scope(&self) -> Vec<(String, VarLoc)> {
        self.vars
            .iter()
            .filter_map(|(name, declared)| {
                let loc = match declared {
                    Declared::Fact { depth, .. } => VarLoc::Fact(*depth),
                    Declared::Field { depth, field } => VarLoc::Field(*depth, field.clone()),
                    Declared::Result { depth } => VarLoc::Result(*depth),
                    Declared::Parameter => return None,
                };
                Some((name.clone(), loc))
            })
            .collect()
    }
}

/// How compiled tests address variables
pub(crate) trait RefStyle {
    type Ref;
    fn value_ref(name: &str, declared: &Declared) -> Option<Self::Ref>;
    fn field_ref(name: &str, depth: usize, field: &str) -> Self::Ref;
    fn fact_ref(name: &str, depth: usize) -> Self::Ref;
}

/// Depth-based addressing used by rule branches
pub(crate) struct Positional;

impl RefStyle for Positional {
    type Ref = VarLoc;

    fn value_ref(_: &str, declared: &Declared) -> Option<VarLoc> {
        match declared {
            Declared::Field { depth, field } => Some(VarLoc::Field(*depth, field.clone())),
            Declared::Result { depth } => Some(VarLoc::Result(*depth)),
            Declared::Fact { .. } | Declared::Parameter => None,
        }
    }

    fn field_ref(_: &str, depth: usize, field: &str) -> VarLoc {
        VarLoc::Field(depth, field.to_string())
    }

    fn fact_ref(_: &str, depth: usize) -> VarLoc {
        VarLoc::Fact(depth)
    }
}

pub(crate) fn compile_operand<S: RefStyle>(
    operand: &Operand,
    types: &AHashMap<String, FactType>,
    decls: &Declarations,
) -> Result<TestOperand<S::Ref>, String> {
    match operand {
        Operand::Literal(value) => Ok(TestOperand::Literal(value.clone())),
        Operand::Variable(name) => match decls.lookup(name)? {
            Declared::Fact { .. } => Err(format!(
                "'{name}' is a fact variable; compare one of its fields instead"
            )),
            declared => S::value_ref(name, declared)
                .map(TestOperand::Ref)
                .ok_or_else(|| format!("variable '{name}' is not usable here")),
        },
        Operand::Field { variable, field } => match decls.lookup(variable)? {
            Declared::Fact { depth, fact_type } => {
                let declared_type = types
                    .get(fact_type)
                    .ok_or_else(|| format!("unknown fact type '{fact_type}'"))?;
                if !declared_type.has_field(field) {
                    return Err(format!("fact type '{fact_type}' has no field '{field}'"));
                }
                Ok(TestOperand::Ref(S::field_ref(variable, *depth, field)))
            }
            _ => Err(format!("'{variable}' is not a fact variable")),
        },
    }
}

/// Compile a constraint on a fact of `fact_type`
pub(crate) fn compile_constraint<S: RefStyle>(
    constraint: &Constraint,
    fact_type: &FactType,
    types: &AHashMap<String, FactType>,
    decls: &Declarations,
) -> Result<Test<S::Ref>, String> {
    let compile_all = |items: &[Constraint]| {
        items
            .iter()
            .map(|c| compile_constraint::<S>(c, fact_type, types, decls))
            .collect::<Result<Vec<_>, _>>()
    };
    match constraint {
        Constraint::Compare { field, operator, operand } => {
            if !fact_type.has_field(field) {
                return Err(format!("fact type '{}' has no field '{field}'", fact_type.name));
            }
            Ok(Test::Compare {
                field: field.clone(),
                operator: *operator,
                operand: compile_operand::<S>(operand, types, decls)?,
            })
        }
        Constraint::Temporal { operator, variable } => {
            if !fact_type.is_event() {
                return Err(format!(
                    "temporal operators need an event pattern; '{}' is not an event type",
                    fact_type.name
                ));
            }
            match decls.lookup(variable)? {
                Declared::Fact { depth, fact_type: target }
                    if types.get(target).is_some_and(FactType::is_event) =>
                {
                    Ok(Test::Temporal { operator: *operator, target: S::fact_ref(variable, *depth) })
                }
                Declared::Fact { .. } => Err(format!("'{variable}' is not bound to an event")),
                _ => Err(format!("'{variable}' is not a fact variable")),
            }
        }
        Constraint::All(items) => Ok(Test::All(compile_all(items)?)),
        Constraint::Any(items) => Ok(Test::Any(compile_all(items)?)),
        Constraint::Not(inner) => Ok(Test::Not(Box::new(compile_constraint::<S>(
            inner, fact_type, types, decls,
        )?))),
    }
}

/// Check a pattern's type, bindings and window
pub(crate) fn check_pattern<'a>(
    pattern: &Pattern,
    types: &'a AHashMap<String, FactType>,
) -> Result<&'a FactType, String> {
    let fact_type = types
        .get(&pattern.fact_type)
        .ok_or_else(|| format!("unknown fact type '{}'", pattern.fact_type))?;
    for (variable, field) in &pattern.bindings {
        if !fact_type.has_field(field) {
            return Err(format!(
                "cannot bind '{variable}': fact type '{}' has no field '{field}'",
                fact_type.name
            ));
        }
    }
    match pattern.window {
        Some(_) if !fact_type.is_event() => Err(format!(
            "windows apply to event types only; '{}' is not an event type",
            fact_type.name
        )),
        Some(Window::Length(0)) => Err("length window must hold at least one event".to_string()),
        _ => Ok(fact_type),
    }
}

/// Negated and aggregated patterns cannot export variables
pub(crate) fn check_no_declarations(pattern: &Pattern, context: &str) -> Result<(), String> {
    if pattern.variable.is_some() || !pattern.bindings.is_empty() {
        return Err(format!(
            "patterns inside {context} cannot bind variables ('{}')",
            pattern.fact_type
        ));
    }
    Ok(())
}

pub(crate) fn check_accumulate_function(
    function: &AccumulateFunction,
    fact_type: &FactType,
) -> Result<(), String> {
    let Some(field) = function.field() else {
        return Ok(());
    };
    let field_type = fact_type
        .fields
        .get(field)
        .ok_or_else(|| format!("fact type '{}' has no field '{field}'", fact_type.name))?;
    let numeric = matches!(
        field_type,
        FieldType::Integer | FieldType::Float | FieldType::Number | FieldType::Any
    );
    match function {
        AccumulateFunction::Sum(_) | AccumulateFunction::Average(_) if !numeric => Err(format!(
            "{} needs a numeric field; '{field}' is {field_type:?}",
            function.name()
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Default, Clone)]
struct TypeDispatch {
    by_field: BTreeMap<String, AHashMap<FactValue, Vec<AlphaId>>>,
    unindexed: Vec<AlphaId>,
}

/// Size of a compiled network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub alpha_memories: usize,
    pub beta_nodes: usize,
    pub terminals: usize,
    /// Node requests satisfied by an existing node
    pub shared_nodes: usize,
}

/// Compiled, immutable Rete network shared by all sessions of a knowledge base
#[derive(Debug, Default)]
pub struct ReteNetwork {
    pub(crate) alphas: Vec<AlphaDef>,
    pub(crate) nodes: Vec<BetaNodeDef>,
    pub(crate) terminals: Vec<TerminalDef>,
    pub(crate) root_children: Vec<NodeId>,
    pub(crate) root_terminals: Vec<TerminalId>,
    dispatch: AHashMap<String, TypeDispatch>,
    alpha_keys: AHashMap<String, AlphaId>,
    node_keys: AHashMap<String, NodeId>,
    shared_nodes: usize,
}

impl ReteNetwork {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            alpha_memories: self.alphas.len(),
            beta_nodes: self.nodes.len(),
            terminals: self.terminals.len(),
            shared_nodes: self.shared_nodes,
        }
    }

    /// Compile every branch of a rule
    pub(crate) fn add_rule(
        &mut self,
        rule_index: usize,
        rule: &Rule,
        types: &AHashMap<String, FactType>,
    ) -> Result<(), String> {
        let branches = normalize(&rule.condition)?;
        for branch in &branches {
            self.add_branch(rule_index, branch, types)?;
        }
        debug!(rule = %rule.name, branches = branches.len(), "Compiled rule");
        Ok(())
    }

    fn add_branch(
        &mut self,
        rule_index: usize,
        branch: &[Element],
        types: &AHashMap<String, FactType>,
    ) -> Result<(), String> {
        let mut parent: Option<NodeId> = None;
        let mut depth = 0;
        let mut decls = Declarations::default();

        for element in branch {
            depth += 1;
            let node = match element {
                Element::Pattern(pattern) => {
                    let fact_type = check_pattern(pattern, types)?;
                    let (alpha, tests) = self.pattern_parts(pattern, fact_type, types, &decls)?;
                    let index = choose_index(&tests);
                    self.node(parent, BetaKind::Join { alpha, tests, index })
                }
                Element::Not(pattern) | Element::Exists(pattern) => {
                    check_no_declarations(pattern, "not/exists")?;
                    let fact_type = check_pattern(pattern, types)?;
                    let (alpha, tests) = self.pattern_parts(pattern, fact_type, types, &decls)?;
                    let index = choose_index(&tests);
                    let kind = if matches!(element, Element::Not(_)) {
                        BetaKind::Negative { alpha, tests, index }
                    } else {
                        BetaKind::Exists { alpha, tests, index }
                    };
                    self.node(parent, kind)
                }
                Element::Forall { base, require } => {
                    check_no_declarations(base, "forall")?;
                    let fact_type = check_pattern(base, types)?;
                    let (alpha, mut tests) = self.pattern_parts(base, fact_type, types, &decls)?;
                    let index = choose_index(&tests);
                    let required = require
                        .iter()
                        .map(|c| compile_constraint::<Positional>(c, fact_type, types, &decls))
                        .collect::<Result<Vec<_>, _>>()?;
                    tests.push(Test::Not(Box::new(Test::All(required))));
                    self.node(parent, BetaKind::Negative { alpha, tests, index })
                }
                Element::Accumulate(acc) => {
                    check_no_declarations(&acc.source, "accumulate")?;
                    let fact_type = check_pattern(&acc.source, types)?;
                    check_accumulate_function(&acc.function, fact_type)?;
                    let (alpha, tests) = self.pattern_parts(&acc.source, fact_type, types, &decls)?;
                    let index = choose_index(&tests);
                    let having = acc
                        .having
                        .as_ref()
                        .map(|(op, operand)| {
                            compile_operand::<Positional>(operand, types, &decls).map(|o| (*op, o))
                        })
                        .transpose()?;
                    self.node(
                        parent,
                        BetaKind::Accumulate {
                            alpha,
                            tests,
                            index,
                            function: acc.function.clone(),
                            having,
                        },
                    )
                }
                Element::Eval(eval) => self.node(
                    parent,
                    BetaKind::Eval { eval: eval.clone(), scope: decls.positional_scope() },
                ),
            };

            match element {
                Element::Pattern(pattern) => {
                    if let Some(variable) = &pattern.variable {
                        decls.declare(
                            variable,
                            Declared::Fact { depth, fact_type: pattern.fact_type.clone() },
                        )?;
                    }
                    for (variable, field) in &pattern.bindings {
                        decls.declare(variable, Declared::Field { depth, field: field.clone() })?;
                    }
                }
                Element::Accumulate(acc) => decls.declare(&acc.result, Declared::Result { depth })?,
                _ => {}
            }
            parent = Some(node);
        }

        let terminal = self.terminals.len();
        self.terminals.push(TerminalDef {
            rule: rule_index,
            node: parent,
            scope: decls.positional_scope(),
        });
        match parent {
            Some(node) => self.nodes[node].terminals.push(terminal),
            None => self.root_terminals.push(terminal),
        }
        Ok(())
    }

    /// Alpha memory plus join tests for a pattern at the current branch position
    fn pattern_parts(
        &mut self,
        pattern: &Pattern,
        fact_type: &FactType,
        types: &AHashMap<String, FactType>,
        decls: &Declarations,
    ) -> Result<(AlphaId, Vec<Test<VarLoc>>), String> {
        let mut constant = Vec::new();
        let mut joined = Vec::new();
        for constraint in &pattern.constraints {
            let test = compile_constraint::<Positional>(constraint, fact_type, types, decls)?;
            if constraint.is_constant() {
                constant.push(test);
            } else {
                joined.push(test);
            }
        }
        Ok((self.alpha(fact_type, constant, pattern.window), joined))
    }

    /// Alpha memory holding facts of `pattern`'s type that pass its constant constraints
    pub(crate) fn constant_alpha(
        &mut self,
        pattern: &Pattern,
        fact_type: &FactType,
        types: &AHashMap<String, FactType>,
    ) -> Result<AlphaId, String> {
        let empty = Declarations::default();
        let constant = pattern
            .constraints
            .iter()
            .filter(|c| c.is_constant())
            .map(|c| compile_constraint::<Positional>(c, fact_type, types, &empty))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.alpha(fact_type, constant, pattern.window))
    }

    fn alpha(&mut self, fact_type: &FactType, tests: Vec<Test<VarLoc>>, window: Option<Window>) -> AlphaId {
        let mut keyed: Vec<(String, Test<VarLoc>)> =
            tests.into_iter().map(|t| (format!("{t:?}"), t)).collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        let key = format!(
            "{}|{}|{window:?}",
            fact_type.name,
            keyed.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join("&")
        );
        if let Some(&id) = self.alpha_keys.get(&key) {
            return id;
        }

        let tests: Vec<Test<VarLoc>> = keyed.into_iter().map(|(_, t)| t).collect();
        let id = self.alphas.len();
        let dispatch = self.dispatch.entry(fact_type.name.clone()).or_default();
        match tests.iter().find_map(Test::equality_literal) {
            Some((field, value)) => dispatch
                .by_field
                .entry(field.to_string())
                .or_default()
                .entry(value.index_key())
                .or_default()
                .push(id),
            None => dispatch.unindexed.push(id),
        }
        self.alphas.push(AlphaDef {
            fact_type: fact_type.name.clone(),
            tests,
            window,
            indexed_fields: Vec::new(),
            successors: Vec::new(),
        });
        self.alpha_keys.insert(key, id);
        id
    }

    pub(crate) fn register_index(&mut self, alpha: AlphaId, field: &str) {
        let fields = &mut self.alphas[alpha].indexed_fields;
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
    }

    fn node(&mut self, parent: Option<NodeId>, kind: BetaKind) -> NodeId {
        let key = format!("{parent:?}|{}", kind.sharing_key());
        if let Some(&id) = self.node_keys.get(&key) {
            self.shared_nodes += 1;
            return id;
        }

        let id = self.nodes.len();
        let depth = parent.map_or(1, |p| self.nodes[p].depth + 1);
        if let Some(alpha) = kind.alpha() {
            self.alphas[alpha].successors.push(id);
            if let Some(index) = kind.index() {
                let field = index.field.clone();
                self.register_index(alpha, &field);
            }
        }
        match parent {
            Some(p) => self.nodes[p].children.push(id),
            None => self.root_children.push(id),
        }
        debug!(node = id, kind = kind.label(), depth, "Created beta node");
        self.nodes.push(BetaNodeDef { id, parent, depth, kind, children: Vec::new(), terminals: Vec::new() });
        self.node_keys.insert(key, id);
        id
    }

    /// Order alpha successors deepest first so a fact never joins with itself twice
    pub(crate) fn finalize(&mut self) {
        let depths: Vec<usize> = self.nodes.iter().map(|n| n.depth).collect();
        for alpha in &mut self.alphas {
            alpha.successors.sort_by_key(|&id| (Reverse(depths[id]), id));
        }
    }

    /// Alpha memories that may accept `fact`, in id order
    pub(crate) fn candidate_alphas(&self, fact: &Fact) -> Vec<AlphaId> {
        let Some(dispatch) = self.dispatch.get(&fact.fact_type) else {
            return Vec::new();
        };
        let mut out = dispatch.unindexed.clone();
        for (field, buckets) in &dispatch.by_field {
            if let Some(ids) = buckets.get(&fact.value(field).index_key()) {
                out.extend_from_slice(ids);
            }
        }
        out.sort_unstable();
        out
    }
}

fn choose_index(tests: &[Test<VarLoc>]) -> Option<JoinIndex> {
    tests.iter().find_map(|test| match test.equality_ref() {
        Some((field, loc @ (VarLoc::Field(..) | VarLoc::Result(_)))) => {
            Some(JoinIndex { field: field.to_string(), left: loc.clone() })
        }
        _ => None,
    })
}

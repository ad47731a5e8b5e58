//! Rule, condition and query definitions
//!
//! Rules arrive as already-built values: a condition tree over fact patterns plus an
//! action closure. Nothing here is evaluated directly; [`crate::engine`] compiles
//! these definitions into the shared matching network.
//!
//! ```text
//! Rule
//!  ├─ Condition ── Pattern ── Constraint (Compare | Temporal | All | Any | Not)
//!  │     ├─ And / Or
//!  │     ├─ Not / Exists / Forall      (scope: one pattern)
//!  │     ├─ Accumulate                 (source pattern + function → result variable)
//!  │     └─ Eval                       (named predicate over the binding)
//!  └─ Action: Fn(&mut RuleContext) -> anyhow::Result<()>
//! ```

use crate::session::RuleContext;
use crate::temporal::duration_millis;
use crate::types::Binding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tally_types::FactValue;

/// Default agenda group every rule belongs to unless told otherwise
pub const MAIN_GROUP: &str = "MAIN";

/// Comparison operators for field constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    /// Field value is an element of the operand array
    MemberOf,
}

impl Operator {
    /// Evaluate `lhs <op> rhs`; incompatible operands never match
    pub fn apply(self, lhs: &FactValue, rhs: &FactValue) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Operator::Equal => lhs.loose_eq(rhs),
            Operator::NotEqual => !lhs.loose_eq(rhs),
            Operator::GreaterThan => lhs.partial_cmp(rhs) == Some(Greater),
            Operator::LessThan => lhs.partial_cmp(rhs) == Some(Less),
            Operator::GreaterThanOrEqual => matches!(lhs.partial_cmp(rhs), Some(Greater | Equal)),
            Operator::LessThanOrEqual => matches!(lhs.partial_cmp(rhs), Some(Less | Equal)),
            Operator::Contains => contains(lhs, rhs).unwrap_or(false),
            Operator::NotContains => contains(lhs, rhs).is_some_and(|found| !found),
            Operator::StartsWith => match (lhs, rhs) {
                (FactValue::String(a), FactValue::String(b)) => a.starts_with(b.as_str()),
                _ => false,
            },
            Operator::EndsWith => match (lhs, rhs) {
                (FactValue::String(a), FactValue::String(b)) => a.ends_with(b.as_str()),
                _ => false,
            },
            Operator::MemberOf => contains(rhs, lhs).unwrap_or(false),
        }
    }
}

fn contains(haystack: &FactValue, needle: &FactValue) -> Option<bool> {
    match (haystack, needle) {
        (FactValue::String(a), FactValue::String(b)) => Some(a.contains(b.as_str())),
        (FactValue::Array(items), needle) => Some(items.iter().any(|v| v.loose_eq(needle))),
        _ => None,
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::GreaterThanOrEqual => ">=",
            Operator::LessThanOrEqual => "<=",
            Operator::Contains => "contains",
            Operator::NotContains => "not contains",
            Operator::StartsWith => "starts with",
            Operator::EndsWith => "ends with",
            Operator::MemberOf => "memberOf",
        };
        f.write_str(symbol)
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Literal(FactValue),
    /// A value variable: a field binding, accumulate result or query parameter
    Variable(String),
    /// A field of a fact bound to a fact variable by an earlier pattern
    Field { variable: String, field: String },
}

impl Operand {
    pub fn var(name: impl Into<String>) -> Self {
        Operand::Variable(name.into())
    }

    pub fn field(variable: impl Into<String>, field: impl Into<String>) -> Self {
        Operand::Field { variable: variable.into(), field: field.into() }
    }

    pub(crate) fn variable(&self) -> Option<&str> {
        match self {
            Operand::Literal(_) => None,
            Operand::Variable(v) | Operand::Field { variable: v, .. } => Some(v),
        }
    }
}

impl From<FactValue> for Operand {
    fn from(value: FactValue) -> Self {
        Operand::Literal(value)
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Operand::Literal(value.into())
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Literal(value.into())
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Literal(value.into())
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Operand::Literal(value.into())
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Operand::Literal(value.into())
    }
}

impl From<String> for Operand {
    fn from(value: String) -> Self {
        Operand::Literal(value.into())
    }
}

impl From<Vec<FactValue>> for Operand {
    fn from(value: Vec<FactValue>) -> Self {
        Operand::Literal(FactValue::Array(value))
    }
}

/// Relations between the timestamps of two events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemporalOperator {
    /// This event happened between `min` and `max` before the other
    Before { min: Duration, max: Duration },
    /// This event happened between `min` and `max` after the other
    After { min: Duration, max: Duration },
    /// Timestamps are at most `tolerance` apart
    Coincides { tolerance: Duration },
}

impl TemporalOperator {
    pub fn before(min: Duration, max: Duration) -> Self {
        TemporalOperator::Before { min, max }
    }

    pub fn after(min: Duration, max: Duration) -> Self {
        TemporalOperator::After { min, max }
    }

    pub fn coincides(tolerance: Duration) -> Self {
        TemporalOperator::Coincides { tolerance }
    }

    /// Whether the relation holds from `this` (the constrained event) to `other`
    pub fn holds(&self, this: i64, other: i64) -> bool {
        match *self {
            TemporalOperator::Before { min, max } => {
                let gap = other.saturating_sub(this);
                gap >= duration_millis(min) && gap <= duration_millis(max)
            }
            TemporalOperator::After { min, max } => {
                let gap = this.saturating_sub(other);
                gap >= duration_millis(min) && gap <= duration_millis(max)
            }
            TemporalOperator::Coincides { tolerance } => {
                this.abs_diff(other) <= duration_millis(tolerance).unsigned_abs()
            }
        }
    }
}

/// A test applied to the fact matched by a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    Compare { field: String, operator: Operator, operand: Operand },
    /// Temporal relation between this event and the event bound to `variable`
    Temporal { operator: TemporalOperator, variable: String },
    All(Vec<Constraint>),
    Any(Vec<Constraint>),
    Not(Box<Constraint>),
}

impl Constraint {
    pub fn compare(field: impl Into<String>, operator: Operator, operand: impl Into<Operand>) -> Self {
        Constraint::Compare { field: field.into(), operator, operand: operand.into() }
    }

    pub fn temporal(operator: TemporalOperator, variable: impl Into<String>) -> Self {
        Constraint::Temporal { operator, variable: variable.into() }
    }

    pub fn any(constraints: Vec<Constraint>) -> Self {
        Constraint::Any(constraints)
    }

    pub fn all(constraints: Vec<Constraint>) -> Self {
        Constraint::All(constraints)
    }

    pub fn negate(constraint: Constraint) -> Self {
        Constraint::Not(Box::new(constraint))
    }

    /// Variables this constraint reads
    pub(crate) fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Constraint::Compare { operand, .. } => out.extend(operand.variable()),
            Constraint::Temporal { variable, .. } => out.push(variable),
            Constraint::All(items) | Constraint::Any(items) => {
                items.iter().for_each(|c| c.collect_variables(out));
            }
            Constraint::Not(inner) => inner.collect_variables(out),
        }
    }

    /// Constant constraints only read the fact itself and can run in alpha memories
    pub(crate) fn is_constant(&self) -> bool {
        self.variables().is_empty()
    }
}

/// Sliding window restricting which events a pattern sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Window {
    /// Events whose timestamp is within this duration of the session clock
    Time(Duration),
    /// The most recent `n` events that pass the pattern's constant constraints
    Length(usize),
}

/// A single-fact match over one fact type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub fact_type: String,
    /// Fact variable bound to the matched fact's handle
    pub variable: Option<String>,
    pub constraints: Vec<Constraint>,
    /// Value variables bound from fields: `(variable, field)`
    pub bindings: Vec<(String, String)>,
    pub window: Option<Window>,
}

impl Pattern {
    pub fn new(fact_type: impl Into<String>) -> Self {
        Self {
            fact_type: fact_type.into(),
            variable: None,
            constraints: Vec::new(),
            bindings: Vec::new(),
            window: None,
        }
    }

    /// Bind the matched fact to a variable
    pub fn var(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }

    pub fn with(self, field: impl Into<String>, operator: Operator, operand: impl Into<Operand>) -> Self {
        self.constraint(Constraint::compare(field, operator, operand))
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Bind a field value to a variable
    pub fn bind(mut self, variable: impl Into<String>, field: impl Into<String>) -> Self {
        self.bindings.push((variable.into(), field.into()));
        self
    }

    pub fn temporal(self, operator: TemporalOperator, variable: impl Into<String>) -> Self {
        self.constraint(Constraint::temporal(operator, variable))
    }

    pub fn over(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }
}

/// Accumulate functions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulateFunction {
    Count,
    Sum(String),
    Average(String),
    Min(String),
    Max(String),
    CollectSet(String),
    CollectList(String),
}

impl AccumulateFunction {
    /// Field the function folds over, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            AccumulateFunction::Count => None,
            AccumulateFunction::Sum(f)
            | AccumulateFunction::Average(f)
            | AccumulateFunction::Min(f)
            | AccumulateFunction::Max(f)
            | AccumulateFunction::CollectSet(f)
            | AccumulateFunction::CollectList(f) => Some(f),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccumulateFunction::Count => "count",
            AccumulateFunction::Sum(_) => "sum",
            AccumulateFunction::Average(_) => "average",
            AccumulateFunction::Min(_) => "min",
            AccumulateFunction::Max(_) => "max",
            AccumulateFunction::CollectSet(_) => "collect_set",
            AccumulateFunction::CollectList(_) => "collect_list",
        }
    }
}

/// Fold of all facts matching `source` into a value bound to `result`
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulate {
    pub source: Pattern,
    pub function: AccumulateFunction,
    pub result: String,
    /// Propagate only when `result <op> operand` holds
    pub having: Option<(Operator, Operand)>,
}

impl Accumulate {
    pub fn new(source: Pattern, function: AccumulateFunction, result: impl Into<String>) -> Self {
        Self { source, function, result: result.into(), having: None }
    }

    pub fn having(mut self, operator: Operator, operand: impl Into<Operand>) -> Self {
        self.having = Some((operator, operand.into()));
        self
    }
}

pub type EvalFn = Arc<dyn Fn(&Binding) -> bool + Send + Sync>;

/// Named predicate over the variables bound so far
#[derive(Clone)]
pub struct Eval {
    pub name: String,
    pub predicate: EvalFn,
}

impl fmt::Debug for Eval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eval").field("name", &self.name).finish_non_exhaustive()
    }
}

impl PartialEq for Eval {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.predicate, &other.predicate)
    }
}

/// Condition tree forming a rule's left-hand side
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Pattern(Pattern),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Exists(Box<Condition>),
    /// Every fact matching `base` also satisfies `require`
    Forall { base: Pattern, require: Vec<Constraint> },
    Accumulate(Box<Accumulate>),
    Eval(Eval),
}

impl Condition {
    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::And(conditions)
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Or(conditions)
    }

    pub fn not(condition: impl Into<Condition>) -> Self {
        Condition::Not(Box::new(condition.into()))
    }

    pub fn exists(condition: impl Into<Condition>) -> Self {
        Condition::Exists(Box::new(condition.into()))
    }

    pub fn forall(base: Pattern, require: Vec<Constraint>) -> Self {
        Condition::Forall { base, require }
    }

    pub fn accumulate(accumulate: Accumulate) -> Self {
        Condition::Accumulate(Box::new(accumulate))
    }

    pub fn eval<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Binding) -> bool + Send + Sync + 'static,
    {
        Condition::Eval(Eval { name: name.into(), predicate: Arc::new(predicate) })
    }
}

impl From<Pattern> for Condition {
    fn from(pattern: Pattern) -> Self {
        Condition::Pattern(pattern)
    }
}

impl From<Accumulate> for Condition {
    fn from(accumulate: Accumulate) -> Self {
        Condition::accumulate(accumulate)
    }
}

pub type ActionFn = Arc<dyn Fn(&mut RuleContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// A production rule: condition tree, conflict-resolution attributes and action
#[derive(Clone)]
pub struct Rule {
    pub name: String,
    pub salience: i32,
    pub agenda_group: String,
    /// The rule's own action cannot re-activate it
    pub no_loop: bool,
    /// No new activations while the rule's agenda group is active
    pub lock_on_active: bool,
    /// Activating the rule gives its agenda group the focus
    pub auto_focus: bool,
    pub condition: Condition,
    pub action: ActionFn,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("salience", &self.salience)
            .field("agenda_group", &self.agenda_group)
            .field("no_loop", &self.no_loop)
            .field("lock_on_active", &self.lock_on_active)
            .field("auto_focus", &self.auto_focus)
            .field("condition", &self.condition)
            .finish_non_exhaustive()
    }
}

impl Rule {
    /// A rule with an empty condition and no-op action
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            salience: 0,
            agenda_group: MAIN_GROUP.to_string(),
            no_loop: false,
            lock_on_active: false,
            auto_focus: false,
            condition: Condition::And(Vec::new()),
            action: Arc::new(|_| Ok(())),
        }
    }

    pub fn salience(mut self, salience: i32) -> Self {
        self.salience = salience;
        self
    }

    pub fn agenda_group(mut self, group: impl Into<String>) -> Self {
        self.agenda_group = group.into();
        self
    }

    pub fn no_loop(mut self, enabled: bool) -> Self {
        self.no_loop = enabled;
        self
    }

    pub fn lock_on_active(mut self, enabled: bool) -> Self {
        self.lock_on_active = enabled;
        self
    }

    pub fn auto_focus(mut self, enabled: bool) -> Self {
        self.auto_focus = enabled;
        self
    }

    pub fn when(mut self, condition: impl Into<Condition>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn then<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut RuleContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.action = Arc::new(action);
        self
    }
}

/// Named, parameterized read-only lookup
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub name: String,
    /// Positional parameters, bound as value variables before matching
    pub parameters: Vec<String>,
    pub condition: Condition,
}

impl Query {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), parameters: Vec::new(), condition: Condition::And(Vec::new()) }
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(name.into());
        self
    }

    pub fn when(mut self, condition: impl Into<Condition>) -> Self {
        self.condition = condition.into();
        self
    }
}

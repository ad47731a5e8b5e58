//! Node definitions of the compiled Rete network
//!
//! These are the immutable halves of the network, shared by every session of a
//! knowledge base. Per-session state (memories, tokens) lives in
//! [`crate::beta_network`].
//!
//! ```text
//!            fact ──► type dispatch ──► AlphaDef (constant tests, window)
//!                                            │ successors (deepest first)
//!  root token ──► BetaNodeDef ──► BetaNodeDef ──► ... ──► TerminalDef ──► activation
//!                 Join | Negative | Exists | Accumulate | Eval
//! ```
//!
//! A partial match is a chain of tokens, one per beta level; variables are
//! addressed by the depth of the token that carries them ([`VarLoc`]).

use crate::rule::{AccumulateFunction, Eval, Operator, TemporalOperator, Window};
use crate::types::Fact;
use std::borrow::Cow;
use tally_types::FactValue;

pub type AlphaId = usize;
pub type NodeId = usize;
pub type TerminalId = usize;
pub type TokenId = u64;

/// Token at the top of every chain; present in every session from the start
pub const ROOT_TOKEN: TokenId = 0;

static NULL: FactValue = FactValue::Null;

/// Where a variable lives inside a token chain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VarLoc {
    /// The fact matched at this depth
    Fact(usize),
    /// A field of the fact matched at this depth
    Field(usize, String),
    /// The accumulate result produced at this depth
    Result(usize),
}

/// Compiled constraint; `R` addresses variables (depth-based in rules, names in queries)
#[derive(Debug, Clone, PartialEq)]
pub enum Test<R> {
    Compare { field: String, operator: Operator, operand: TestOperand<R> },
    Temporal { operator: TemporalOperator, target: R },
    All(Vec<Test<R>>),
    Any(Vec<Test<R>>),
    Not(Box<Test<R>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestOperand<R> {
    Literal(FactValue),
    Ref(R),
}

/// Resolves variable references while a test runs
pub trait Scope<R> {
    fn value(&self, reference: &R) -> FactValue;
    fn timestamp(&self, reference: &R) -> Option<i64>;
}

/// Scope for constant tests, which reference no variables
pub struct ConstantScope;

impl<R> Scope<R> for ConstantScope {
    fn value(&self, _: &R) -> FactValue {
        FactValue::Null
    }

    fn timestamp(&self, _: &R) -> Option<i64> {
        None
    }
}

impl<R> TestOperand<R> {
    pub fn resolve<'a, S: Scope<R>>(&'a self, scope: &S) -> Cow<'a, FactValue> {
        match self {
            TestOperand::Literal(value) => Cow::Borrowed(value),
            TestOperand::Ref(reference) => Cow::Owned(scope.value(reference)),
        }
    }
}

impl<R> Test<R> {
    /// Evaluate against `fact` (with its event `timestamp`)
    pub fn evaluate<S: Scope<R>>(&self, fact: &Fact, timestamp: i64, scope: &S) -> bool {
        match self {
            Test::Compare { field, operator, operand } => {
                let lhs = fact.get(field).unwrap_or(&NULL);
                operator.apply(lhs, &operand.resolve(scope))
            }
            Test::Temporal { operator, target } => {
                scope.timestamp(target).is_some_and(|other| operator.holds(timestamp, other))
            }
            Test::All(tests) => tests.iter().all(|t| t.evaluate(fact, timestamp, scope)),
            Test::Any(tests) => tests.iter().any(|t| t.evaluate(fact, timestamp, scope)),
            Test::Not(test) => !test.evaluate(fact, timestamp, scope),
        }
    }

    /// `field == <variable>` tests can drive a hash join
    pub fn equality_ref(&self) -> Option<(&str, &R)> {
        match self {
            Test::Compare { field, operator: Operator::Equal, operand: TestOperand::Ref(r) } => {
                Some((field, r))
            }
            _ => None,
        }
    }

    /// `field == literal` tests can drive alpha dispatch
    pub fn equality_literal(&self) -> Option<(&str, &FactValue)> {
        match self {
            Test::Compare { field, operator: Operator::Equal, operand: TestOperand::Literal(v) } => {
                Some((field, v))
            }
            _ => None,
        }
    }
}

pub fn all_pass<R, S: Scope<R>>(tests: &[Test<R>], fact: &Fact, timestamp: i64, scope: &S) -> bool {
    tests.iter().all(|t| t.evaluate(fact, timestamp, scope))
}

/// Single-type memory fed by constant tests
#[derive(Debug, Clone)]
pub struct AlphaDef {
    pub fact_type: String,
    pub tests: Vec<Test<VarLoc>>,
    pub window: Option<Window>,
    /// Fields with a hash index, used by joins and queries
    pub indexed_fields: Vec<String>,
    /// Beta nodes fed by this memory, deepest first
    pub successors: Vec<NodeId>,
}

/// Hash join between a right-fact field and a left-token value
#[derive(Debug, Clone, PartialEq)]
pub struct JoinIndex {
    pub field: String,
    pub left: VarLoc,
}

#[derive(Debug, Clone)]
pub enum BetaKind {
    /// Extends the partial match with each fact passing `tests`
    Join { alpha: AlphaId, tests: Vec<Test<VarLoc>>, index: Option<JoinIndex> },
    /// Passes a partial match while no fact passes `tests`
    Negative { alpha: AlphaId, tests: Vec<Test<VarLoc>>, index: Option<JoinIndex> },
    /// Passes a partial match once while at least one fact passes `tests`
    Exists { alpha: AlphaId, tests: Vec<Test<VarLoc>>, index: Option<JoinIndex> },
    /// Folds facts passing `tests` into one result value per partial match
    Accumulate {
        alpha: AlphaId,
        tests: Vec<Test<VarLoc>>,
        index: Option<JoinIndex>,
        function: AccumulateFunction,
        having: Option<(Operator, TestOperand<VarLoc>)>,
    },
    /// Passes a partial match when the predicate holds over its binding
    Eval { eval: Eval, scope: Vec<(String, VarLoc)> },
}

impl BetaKind {
    pub fn alpha(&self) -> Option<AlphaId> {
        match self {
            BetaKind::Join { alpha, .. }
            | BetaKind::Negative { alpha, .. }
            | BetaKind::Exists { alpha, .. }
            | BetaKind::Accumulate { alpha, .. } => Some(*alpha),
            BetaKind::Eval { .. } => None,
        }
    }

    pub fn tests(&self) -> &[Test<VarLoc>] {
        match self {
            BetaKind::Join { tests, .. }
            | BetaKind::Negative { tests, .. }
            | BetaKind::Exists { tests, .. }
            | BetaKind::Accumulate { tests, .. } => tests,
            BetaKind::Eval { .. } => &[],
        }
    }

    pub fn index(&self) -> Option<&JoinIndex> {
        match self {
            BetaKind::Join { index, .. }
            | BetaKind::Negative { index, .. }
            | BetaKind::Exists { index, .. }
            | BetaKind::Accumulate { index, .. } => index.as_ref(),
            BetaKind::Eval { .. } => None,
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self, BetaKind::Join { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            BetaKind::Join { .. } => "join",
            BetaKind::Negative { .. } => "not",
            BetaKind::Exists { .. } => "exists",
            BetaKind::Accumulate { .. } => "accumulate",
            BetaKind::Eval { .. } => "eval",
        }
    }

    /// Structural identity used for node sharing
    pub fn sharing_key(&self) -> String {
        match self {
            BetaKind::Eval { eval, scope } => format!(
                "eval:{}:{:p}:{:?}",
                eval.name,
                std::sync::Arc::as_ptr(&eval.predicate),
                scope
            ),
            BetaKind::Join { alpha, tests, index } => format!("join:{alpha}:{tests:?}:{index:?}"),
            BetaKind::Negative { alpha, tests, index } => format!("not:{alpha}:{tests:?}:{index:?}"),
            BetaKind::Exists { alpha, tests, index } => {
                format!("exists:{alpha}:{tests:?}:{index:?}")
            }
            BetaKind::Accumulate { alpha, tests, index, function, having } => {
                format!("acc:{alpha}:{tests:?}:{index:?}:{function:?}:{having:?}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BetaNodeDef {
    pub id: NodeId,
    /// `None` for nodes fed directly by the root token
    pub parent: Option<NodeId>,
    /// Depth of the tokens this node emits; the root token has depth 0
    pub depth: usize,
    pub kind: BetaKind,
    pub children: Vec<NodeId>,
    pub terminals: Vec<TerminalId>,
}

/// End of one rule branch: every token reaching it is an activation
#[derive(Debug, Clone)]
pub struct TerminalDef {
    pub rule: usize,
    /// `None` when the branch has no conditions
    pub node: Option<NodeId>,
    /// Variables visible to the rule's action
    pub scope: Vec<(String, VarLoc)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScope(FactValue, i64);

    impl Scope<VarLoc> for FixedScope {
        fn value(&self, _: &VarLoc) -> FactValue {
            self.0.clone()
        }

        fn timestamp(&self, _: &VarLoc) -> Option<i64> {
            Some(self.1)
        }
    }

    #[test]
    fn test_compound_tests_evaluate() {
        let fact = Fact::new("Order").with("amount", 120).with("region", "EU");
        let test = Test::Any(vec![
            Test::Compare {
                field: "amount".into(),
                operator: Operator::GreaterThan,
                operand: TestOperand::Ref(VarLoc::Field(1, "limit".into())),
            },
            Test::Not(Box::new(Test::Compare {
                field: "region".into(),
                operator: Operator::Equal,
                operand: TestOperand::Literal("EU".into()),
            })),
        ]);
        assert!(test.evaluate(&fact, 0, &FixedScope(FactValue::Integer(100), 0)));
        assert!(!test.evaluate(&fact, 0, &FixedScope(FactValue::Integer(500), 0)));
    }

    #[test]
    fn test_missing_fields_read_as_null() {
        let test: Test<VarLoc> = Test::Compare {
            field: "missing".into(),
            operator: Operator::Equal,
            operand: TestOperand::Literal(FactValue::Null),
        };
        assert!(test.evaluate(&Fact::new("Order"), 0, &ConstantScope));
    }

    #[test]
    fn test_temporal_test_reads_target_timestamp() {
        let test = Test::Temporal {
            operator: TemporalOperator::before(
                std::time::Duration::ZERO,
                std::time::Duration::from_millis(10),
            ),
            target: VarLoc::Fact(1),
        };
        let fact = Fact::new("Tick");
        assert!(test.evaluate(&fact, 95, &FixedScope(FactValue::Null, 100)));
        assert!(!test.evaluate(&fact, 80, &FixedScope(FactValue::Null, 100)));
        assert!(!test.evaluate(&fact, 95, &ConstantScope));
    }
}

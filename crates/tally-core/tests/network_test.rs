//! Matching behaviour through the session API: joins, negation, quantifiers and updates

use std::sync::Arc;
use tally_core::{
    Condition, EngineConfig, Fact, FactType, FactValue, FieldType, IdentityMode, KnowledgeBase, Operand,
    Operator, Pattern, Rule, Session, TallyError,
};

fn create_test_base(rules: Vec<Rule>) -> Arc<KnowledgeBase> {
    KnowledgeBase::builder()
        .declare(
            FactType::new("Applicant")
                .field("id", FieldType::Integer)
                .field("credit_score", FieldType::Integer),
        )
        .declare(FactType::new("Blacklist").field("id", FieldType::Integer))
        .declare(FactType::new("Customer").field("id", FieldType::Integer))
        .declare(
            FactType::new("Order")
                .field("customer", FieldType::Integer)
                .field("paid", FieldType::Boolean),
        )
        .rules(rules)
        .build()
        .unwrap()
}

fn create_test_session(rules: Vec<Rule>) -> Session {
    create_test_base(rules).new_session()
}

fn applicant(id: i64, score: i64) -> Fact {
    Fact::new("Applicant").with("id", id).with("credit_score", score)
}

fn blacklisted_rule() -> Rule {
    Rule::new("blacklisted").when(Condition::all(vec![
        Pattern::new("Applicant").var("$a").bind("$id", "id").into(),
        Pattern::new("Blacklist").var("$b").with("id", Operator::Equal, Operand::var("$id")).into(),
    ]))
}

#[test]
fn test_retract_leaves_no_dangling_activations() {
    let mut session = create_test_session(vec![blacklisted_rule()]);
    let applicants: Vec<_> = (1..=3).map(|id| session.insert(applicant(id, 500)).unwrap()).collect();
    let listed: Vec<_> =
        (1..=2).map(|id| session.insert(Fact::new("Blacklist").with("id", id)).unwrap()).collect();
    assert_eq!(session.pending_activations().len(), 2);

    session.retract(applicants[0]).unwrap();
    let pending = session.pending_activations();
    assert_eq!(pending.len(), 1);
    assert!(pending.iter().all(|info| !info.binding.depends_on(applicants[0])));
    assert_eq!(pending[0].binding.handle("$b"), Some(listed[1]));
    assert_eq!(pending[0].binding.value("$id"), Some(&FactValue::Integer(2)));

    session.retract(listed[1]).unwrap();
    assert!(session.pending_activations().is_empty());
    println!("✅ Retractions cancelled every dependent activation");
}

#[test]
fn test_retract_is_not_repeatable() {
    let mut session = create_test_session(vec![blacklisted_rule()]);
    let handle = session.insert(applicant(1, 500)).unwrap();
    let retracted = session.retract(handle).unwrap();
    assert_eq!(retracted.value("id"), FactValue::Integer(1));

    assert!(matches!(session.retract(handle), Err(TallyError::UnknownHandle { handle: h }) if h == handle));
    assert!(matches!(session.update(handle, applicant(1, 600)), Err(TallyError::UnknownHandle { .. })));
    assert!(session.get_object(handle).is_none());
    assert_eq!(session.fact_count(), 0);
}

#[test]
fn test_update_cannot_change_type_or_break_schema() {
    let mut session = create_test_session(Vec::new());
    let handle = session.insert(applicant(1, 500)).unwrap();

    let err = session.update(handle, Fact::new("Blacklist").with("id", 1)).unwrap_err();
    assert_eq!(err.category(), "schema");
    let err = session.update(handle, Fact::new("Applicant").with("credit_score", "high")).unwrap_err();
    assert_eq!(err.category(), "schema");
    assert_eq!(session.get_object(handle), Some(&applicant(1, 500)));
}

#[test]
fn test_equality_mode_deduplicates_inserts() {
    let base = create_test_base(vec![Rule::new("any").when(Pattern::new("Applicant"))]);

    let mut equality = base.new_session_with(EngineConfig::default().with_identity_mode(IdentityMode::Equality));
    let first = equality.insert(applicant(1, 500)).unwrap();
    let second = equality.insert(applicant(1, 500)).unwrap();
    assert_eq!(first, second);
    assert_eq!(equality.fact_count(), 1);
    assert_eq!(equality.pending_activations().len(), 1);

    let mut identity = base.new_session();
    let first = identity.insert(applicant(1, 500)).unwrap();
    let second = identity.insert(applicant(1, 500)).unwrap();
    assert_ne!(first, second);
    assert_eq!(identity.pending_activations().len(), 2);
    println!("✅ Equality mode returned the existing handle");
}

#[test]
fn test_equality_mode_after_update_to_equal_value() {
    let base = create_test_base(vec![Rule::new("any").when(Pattern::new("Applicant"))]);
    let mut session = base.new_session_with(EngineConfig::default().with_identity_mode(IdentityMode::Equality));

    let older = session.insert(applicant(1, 500)).unwrap();
    let newer = session.insert(applicant(2, 500)).unwrap();
    session.update(newer, applicant(1, 500)).unwrap();
    session.retract(older).unwrap();

    assert_eq!(session.insert(applicant(1, 500)).unwrap(), newer);
    assert_eq!(session.fact_count(), 1);
    assert_eq!(session.pending_activations().len(), 1);
    println!("✅ Equal insert found the surviving fact after retracting its twin");
}

#[test]
fn test_update_moves_fact_in_and_out_of_match() {
    let mut session = create_test_session(vec![
        Rule::new("subprime").when(Pattern::new("Applicant").var("$a").with("credit_score", Operator::LessThan, 600)),
    ]);
    let handle = session.insert(applicant(1, 700)).unwrap();
    assert!(session.pending_activations().is_empty());

    session.modify(handle, |fact| fact.set("credit_score", 550)).unwrap();
    assert_eq!(session.pending_activations().len(), 1);

    session.update(handle, applicant(1, 650)).unwrap();
    assert!(session.pending_activations().is_empty());
    assert_eq!(session.get_object(handle).unwrap().value("credit_score"), FactValue::Integer(650));
}

#[test]
fn test_disjunction_activates_per_branch() {
    let mut session = create_test_session(vec![Rule::new("flagged").when(Condition::any(vec![
        Pattern::new("Applicant").var("$a").with("credit_score", Operator::LessThan, 600).into(),
        Pattern::new("Applicant").var("$a").with("id", Operator::Equal, 1).into(),
    ]))]);
    session.insert(applicant(1, 500)).unwrap();
    session.insert(applicant(2, 500)).unwrap();
    session.insert(applicant(1, 800)).unwrap();
    assert_eq!(session.pending_activations().len(), 4);
}

#[test]
fn test_negation_tracks_blockers() {
    let mut session = create_test_session(vec![Rule::new("clean").when(Condition::all(vec![
        Pattern::new("Applicant").var("$a").bind("$id", "id").into(),
        Condition::not(Pattern::new("Blacklist").with("id", Operator::Equal, Operand::var("$id"))),
    ]))]);
    session.insert(applicant(1, 500)).unwrap();
    assert_eq!(session.pending_activations().len(), 1);

    let first = session.insert(Fact::new("Blacklist").with("id", 1)).unwrap();
    let second = session.insert(Fact::new("Blacklist").with("id", 1)).unwrap();
    assert!(session.pending_activations().is_empty());

    session.retract(first).unwrap();
    assert!(session.pending_activations().is_empty());
    session.retract(second).unwrap();
    assert_eq!(session.pending_activations().len(), 1);
}

#[test]
fn test_exists_activates_once_for_many_witnesses() {
    let mut session = create_test_session(vec![
        Rule::new("any-blacklist").when(Condition::exists(Pattern::new("Blacklist"))),
    ]);
    assert!(session.pending_activations().is_empty());

    let handles: Vec<_> = (1..=3).map(|id| session.insert(Fact::new("Blacklist").with("id", id)).unwrap()).collect();
    assert_eq!(session.pending_activations().len(), 1);

    session.retract(handles[0]).unwrap();
    session.retract(handles[1]).unwrap();
    assert_eq!(session.pending_activations().len(), 1);
    assert_eq!(session.stats().agenda.created, 1);

    session.retract(handles[2]).unwrap();
    assert!(session.pending_activations().is_empty());
}

#[test]
fn test_forall_requires_every_match_to_comply() {
    let mut session = create_test_session(vec![Rule::new("settled").when(Condition::all(vec![
        Pattern::new("Customer").var("$c").bind("$id", "id").into(),
        Condition::forall(
            Pattern::new("Order").with("customer", Operator::Equal, Operand::var("$id")),
            vec![tally_core::Constraint::compare("paid", Operator::Equal, true)],
        ),
    ]))]);
    session.insert(Fact::new("Customer").with("id", 1)).unwrap();
    assert_eq!(session.pending_activations().len(), 1, "no orders holds vacuously");

    let order = session.insert(Fact::new("Order").with("customer", 1).with("paid", false)).unwrap();
    session.insert(Fact::new("Order").with("customer", 2).with("paid", false)).unwrap();
    assert!(session.pending_activations().is_empty());

    session.modify(order, |fact| fact.set("paid", true)).unwrap();
    session.insert(Fact::new("Order").with("customer", 1).with("paid", true)).unwrap();
    assert_eq!(session.pending_activations().len(), 1);
}

#[test]
fn test_eval_filters_on_bound_values() {
    let mut session = create_test_session(vec![Rule::new("subprime").when(Condition::all(vec![
        Pattern::new("Applicant").var("$a").bind("$score", "credit_score").into(),
        Condition::eval("below 600", |binding| {
            binding.value("$score").and_then(FactValue::as_i64).is_some_and(|score| score < 600)
        }),
    ]))]);
    session.insert(applicant(1, 550)).unwrap();
    session.insert(applicant(2, 650)).unwrap();
    let pending = session.pending_activations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].binding.value("$score"), Some(&FactValue::Integer(550)));
}

#[test]
fn test_self_join_binds_distinct_pairs() {
    let mut session = create_test_session(vec![Rule::new("pairs").when(Condition::all(vec![
        Pattern::new("Applicant").var("$x").bind("$score", "credit_score").into(),
        Pattern::new("Applicant")
            .var("$y")
            .with("credit_score", Operator::GreaterThan, Operand::var("$score"))
            .into(),
    ]))]);
    for (id, score) in [(1, 500), (2, 600), (3, 700)] {
        session.insert(applicant(id, score)).unwrap();
    }
    assert_eq!(session.pending_activations().len(), 3);
}

#[test]
fn test_compile_errors_are_collected() {
    let err = KnowledgeBase::builder()
        .declare(FactType::new("Applicant").field("id", FieldType::Integer))
        .rule(Rule::new("unknown-type").when(Pattern::new("Ghost")))
        .rule(Rule::new("unbound").when(Pattern::new("Applicant").with("id", Operator::Equal, Operand::var("$x"))))
        .rule(Rule::new("bad-field").when(Pattern::new("Applicant").with("age", Operator::Equal, 1)))
        .build()
        .unwrap_err();
    assert_eq!(err.category(), "compile");
    let rules: Vec<_> = err.compile_errors().iter().map(|e| e.rule_name.as_str()).collect();
    assert_eq!(rules, vec!["unknown-type", "unbound", "bad-field"]);
}

#[test]
fn test_iteration_over_working_memory() {
    let mut session = create_test_session(Vec::new());
    session.insert(applicant(1, 500)).unwrap();
    session.insert(Fact::new("Blacklist").with("id", 1)).unwrap();
    session.insert(applicant(2, 700)).unwrap();

    assert_eq!(session.iterate_objects(None).count(), 3);
    assert_eq!(session.iterate_objects(Some("Applicant")).count(), 2);
    let good: Vec<_> = session
        .iterate(|fact| fact.value("credit_score").as_i64().is_some_and(|score| score > 600))
        .map(|(_, fact)| fact.value("id"))
        .collect();
    assert_eq!(good, vec![FactValue::Integer(2)]);
}

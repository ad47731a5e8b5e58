//! End-to-end scenarios: credit screening, event bursts and rule ordering

use std::sync::Arc;
use std::time::Duration;
use tally_core::{
    Accumulate, AccumulateFunction, ClockMode, Condition, EngineConfig, Fact, FactType, FactValue,
    FieldType, KnowledgeBase, Operand, Operator, Pattern, Rule, RuleContext, TemporalOperator,
};

fn create_applicant_type() -> FactType {
    FactType::new("Applicant")
        .field("id", FieldType::Integer)
        .field("name", FieldType::String)
        .field("credit_score", FieldType::Integer)
}

fn push_log(ctx: &mut RuleContext<'_>, entry: &str) -> anyhow::Result<()> {
    ctx.context_mut()
        .get_mut::<Vec<String>>("log")
        .ok_or_else(|| anyhow::anyhow!("log global missing"))?
        .push(entry.to_string());
    Ok(())
}

#[test]
fn test_low_credit_applicant_fires_once() {
    let base = KnowledgeBase::builder()
        .declare(create_applicant_type())
        .rule(
            Rule::new("low-credit")
                .salience(100)
                .when(Pattern::new("Applicant").var("$a").with("credit_score", Operator::LessThan, 600))
                .then(|ctx| push_log(ctx, "low-credit")),
        )
        .build()
        .unwrap();
    let mut session = base.new_session();
    session.context_mut().set("log", Vec::<String>::new());

    session.insert(Fact::new("Applicant").with("credit_score", 550)).unwrap();
    let pending = session.pending_activations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].rule, "low-credit");
    assert_eq!(pending[0].salience, 100);

    assert_eq!(session.fire_all(None).unwrap(), 1);
    assert_eq!(session.context().get::<Vec<String>>("log").unwrap(), &vec!["low-credit".to_string()]);
    assert_eq!(session.fire_all(None).unwrap(), 0);
    println!("✅ Low-credit applicant fired exactly once");
}

#[test]
fn test_five_readings_before_reference_event() {
    let base = KnowledgeBase::builder()
        .declare(FactType::event("Reading").field("value", FieldType::Integer).timestamp("ts"))
        .declare(FactType::event("Check").timestamp("ts"))
        .rule(
            Rule::new("burst").when(Condition::all(vec![
                Pattern::new("Check").var("$check").into(),
                Condition::accumulate(
                    Accumulate::new(
                        Pattern::new("Reading").temporal(
                            TemporalOperator::before(Duration::ZERO, Duration::from_millis(10)),
                            "$check",
                        ),
                        AccumulateFunction::Count,
                        "$n",
                    )
                    .having(Operator::GreaterThanOrEqual, 5),
                ),
            ])),
        )
        .build()
        .unwrap();
    let mut session = base.new_session_with(EngineConfig { clock: ClockMode::Pseudo, ..EngineConfig::default() });

    let t = 1_000_i64;
    let readings: Vec<_> = (0..5)
        .map(|i| session.insert(Fact::new("Reading").with("value", i).with("ts", t + i)).unwrap())
        .collect();
    session.insert(Fact::new("Check").with("ts", t + 4)).unwrap();

    let pending = session.pending_activations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].binding.value("$n"), Some(&FactValue::Integer(5)));

    session.retract(readings[2]).unwrap();
    assert!(session.pending_activations().is_empty());
    println!("✅ Burst activation appeared at five readings and was cancelled at four");
}

#[test]
fn test_blacklist_fires_before_low_credit() {
    let base = KnowledgeBase::builder()
        .declare(create_applicant_type())
        .declare(FactType::new("Blacklist").field("id", FieldType::Integer))
        .rule(
            Rule::new("low-credit")
                .salience(50)
                .when(Pattern::new("Applicant").with("credit_score", Operator::LessThan, 600))
                .then(|ctx| push_log(ctx, "low-credit")),
        )
        .rule(
            Rule::new("blacklisted")
                .salience(100)
                .when(Condition::all(vec![
                    Pattern::new("Applicant").var("$a").bind("$id", "id").into(),
                    Pattern::new("Blacklist").with("id", Operator::Equal, Operand::var("$id")).into(),
                ]))
                .then(|ctx| push_log(ctx, "blacklist")),
        )
        .build()
        .unwrap();
    let mut session = base.new_session();
    session.context_mut().set("log", Vec::<String>::new());

    session.insert(Fact::new("Applicant").with("id", 7).with("credit_score", 550)).unwrap();
    session.insert(Fact::new("Blacklist").with("id", 7)).unwrap();

    assert_eq!(session.fire_all(None).unwrap(), 2);
    assert_eq!(
        session.context().get::<Vec<String>>("log").unwrap(),
        &vec!["blacklist".to_string(), "low-credit".to_string()]
    );
    println!("✅ Salience ordered blacklist ahead of low-credit");
}

#[test]
fn test_knowledge_base_serves_many_sessions() {
    let base: Arc<KnowledgeBase> = KnowledgeBase::builder()
        .declare(create_applicant_type())
        .rule(Rule::new("any").when(Pattern::new("Applicant")))
        .build()
        .unwrap();
    let mut first = base.new_session();
    let mut second = base.new_session();
    first.insert(Fact::new("Applicant").with("id", 1)).unwrap();
    assert_eq!(first.pending_activations().len(), 1);
    assert!(second.pending_activations().is_empty());
    assert_eq!(second.fire_all(None).unwrap(), 0);
    assert_ne!(first.id(), second.id());
}

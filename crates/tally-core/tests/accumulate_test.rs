//! Accumulate results kept consistent with working memory under change

use proptest::prelude::*;
use std::sync::Arc;
use tally_core::{
    Accumulate, AccumulateFunction, ActivationInfo, Condition, EngineConfig, EngineEvent, EventLog, Fact,
    FactHandle, FactType, FactValue, FieldType, KnowledgeBase, Operand, Operator, Pattern, Rule, Session,
    UpdatePolicy,
};

fn create_test_base(rules: Vec<Rule>) -> Arc<KnowledgeBase> {
    KnowledgeBase::builder()
        .declare(
            FactType::new("Sale")
                .field("region", FieldType::String)
                .field("amount", FieldType::Integer)
                .field("note", FieldType::String),
        )
        .declare(FactType::new("Region").field("name", FieldType::String))
        .rules(rules)
        .build()
        .unwrap()
}

fn sale(region: &str, amount: i64) -> Fact {
    Fact::new("Sale").with("region", region).with("amount", amount)
}

fn accumulate(function: AccumulateFunction, result: &str) -> Condition {
    Condition::accumulate(Accumulate::new(Pattern::new("Sale"), function, result))
}

fn pending_for(session: &Session, rule: &str) -> Vec<ActivationInfo> {
    session.pending_activations().into_iter().filter(|info| info.rule == rule).collect()
}

fn totals_rules() -> Vec<Rule> {
    vec![
        Rule::new("totals").when(Condition::all(vec![
            accumulate(AccumulateFunction::Count, "$n"),
            accumulate(AccumulateFunction::Sum("amount".to_string()), "$sum"),
        ])),
        Rule::new("peak").when(accumulate(AccumulateFunction::Max("amount".to_string()), "$max")),
        Rule::new("mean").when(accumulate(AccumulateFunction::Average("amount".to_string()), "$avg")),
        Rule::new("ledger").when(accumulate(AccumulateFunction::CollectList("amount".to_string()), "$all")),
    ]
}

#[derive(Debug, Clone)]
enum Step {
    Insert(i64),
    Update(usize, i64),
    Retract(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (-50_i64..50).prop_map(Step::Insert),
        (any::<usize>(), -50_i64..50).prop_map(|(i, v)| Step::Update(i, v)),
        any::<usize>().prop_map(Step::Retract),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_results_match_rescan(steps in prop::collection::vec(step(), 1..40), coalesce in any::<bool>()) {
        let policy = if coalesce { UpdatePolicy::Coalesce } else { UpdatePolicy::RetractInsert };
        let mut session = create_test_base(totals_rules())
            .new_session_with(EngineConfig::default().with_update_policy(policy));
        let mut live: Vec<FactHandle> = Vec::new();

        for step in steps {
            match step {
                Step::Insert(amount) => live.push(session.insert(sale("north", amount)).unwrap()),
                Step::Update(i, amount) if !live.is_empty() => {
                    let handle = live[i % live.len()];
                    session.update(handle, sale("north", amount)).unwrap();
                }
                Step::Retract(i) if !live.is_empty() => {
                    let handle = live.remove(i % live.len());
                    session.retract(handle).unwrap();
                }
                _ => {}
            }

            let amounts: Vec<i64> = session
                .iterate_objects(Some("Sale"))
                .filter_map(|(_, fact)| fact.value("amount").as_i64())
                .collect();
            let totals = pending_for(&session, "totals");
            prop_assert_eq!(totals.len(), 1);
            prop_assert_eq!(totals[0].binding.value("$n"), Some(&FactValue::Integer(i64::try_from(amounts.len()).unwrap())));
            prop_assert_eq!(totals[0].binding.value("$sum"), Some(&FactValue::Integer(amounts.iter().sum())));

            let peak = pending_for(&session, "peak");
            match amounts.iter().max() {
                Some(max) => {
                    prop_assert_eq!(peak.len(), 1);
                    prop_assert_eq!(peak[0].binding.value("$max"), Some(&FactValue::Integer(*max)));
                }
                None => prop_assert!(peak.is_empty()),
            }

            let mean = pending_for(&session, "mean");
            if amounts.is_empty() {
                prop_assert!(mean.is_empty());
            } else {
                let expected = amounts.iter().sum::<i64>() as f64 / amounts.len() as f64;
                prop_assert_eq!(mean.len(), 1);
                prop_assert_eq!(mean[0].binding.value("$avg"), Some(&FactValue::Float(expected)));
            }

            let ledger = pending_for(&session, "ledger");
            let listed: Vec<FactValue> = amounts.iter().copied().map(FactValue::Integer).collect();
            prop_assert_eq!(ledger.len(), 1);
            prop_assert_eq!(ledger[0].binding.value("$all"), Some(&FactValue::Array(listed)));
        }
    }
}

#[test]
fn test_empty_set_results() {
    let mut session = create_test_base(vec![
        Rule::new("count").when(accumulate(AccumulateFunction::Count, "$v")),
        Rule::new("sum").when(accumulate(AccumulateFunction::Sum("amount".to_string()), "$v")),
        Rule::new("average").when(accumulate(AccumulateFunction::Average("amount".to_string()), "$v")),
        Rule::new("min").when(accumulate(AccumulateFunction::Min("amount".to_string()), "$v")),
        Rule::new("set").when(accumulate(AccumulateFunction::CollectSet("region".to_string()), "$v")),
    ])
    .new_session();

    let value = |session: &Session, rule: &str| pending_for(session, rule).first().and_then(|info| info.binding.value("$v").cloned());
    assert_eq!(value(&session, "count"), Some(FactValue::Integer(0)));
    assert_eq!(value(&session, "sum"), Some(FactValue::Integer(0)));
    assert_eq!(value(&session, "set"), Some(FactValue::Array(Vec::new())));
    assert!(pending_for(&session, "average").is_empty());
    assert!(pending_for(&session, "min").is_empty());

    session.insert(sale("north", 4)).unwrap();
    session.insert(sale("south", 8)).unwrap();
    session.insert(sale("north", 6)).unwrap();
    assert_eq!(value(&session, "average"), Some(FactValue::Float(6.0)));
    assert_eq!(value(&session, "min"), Some(FactValue::Integer(4)));
    assert_eq!(
        value(&session, "set"),
        Some(FactValue::Array(vec![FactValue::from("north"), FactValue::from("south")]))
    );
    println!("✅ Empty-set and populated accumulate results as expected");
}

#[test]
fn test_per_group_total_with_threshold() {
    let rule = Rule::new("big-region").when(Condition::all(vec![
        Pattern::new("Region").var("$r").bind("$name", "name").into(),
        Condition::accumulate(
            Accumulate::new(
                Pattern::new("Sale").with("region", Operator::Equal, Operand::var("$name")),
                AccumulateFunction::Sum("amount".to_string()),
                "$total",
            )
            .having(Operator::GreaterThan, 100),
        ),
    ]));
    let mut session = create_test_base(vec![rule]).new_session();
    session.insert(Fact::new("Region").with("name", "north")).unwrap();
    session.insert(Fact::new("Region").with("name", "south")).unwrap();

    let big = session.insert(sale("north", 80)).unwrap();
    session.insert(sale("south", 30)).unwrap();
    assert!(session.pending_activations().is_empty());

    session.insert(sale("north", 40)).unwrap();
    let pending = session.pending_activations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].binding.value("$name"), Some(&FactValue::from("north")));
    assert_eq!(pending[0].binding.value("$total"), Some(&FactValue::Integer(120)));

    session.modify(big, |fact| fact.set("region", "south")).unwrap();
    let pending = session.pending_activations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].binding.value("$name"), Some(&FactValue::from("south")));
    assert_eq!(pending[0].binding.value("$total"), Some(&FactValue::Integer(110)));
}

fn cancellations_after_irrelevant_update(policy: UpdatePolicy) -> (usize, usize) {
    let base = create_test_base(vec![
        Rule::new("total").when(accumulate(AccumulateFunction::Sum("amount".to_string()), "$sum")),
    ]);
    let mut session = base.new_session_with(EngineConfig::default().with_update_policy(policy));
    let handle = session.insert(sale("north", 10)).unwrap();
    let log = EventLog::new();
    session.add_listener(Box::new(log.clone()));

    session.modify(handle, |fact| fact.set("note", "rechecked")).unwrap();
    assert_eq!(pending_for(&session, "total").len(), 1);
    let cancelled = log
        .events()
        .iter()
        .filter(|event| matches!(event, EngineEvent::ActivationCancelled { .. }))
        .count();
    let created = log
        .events()
        .iter()
        .filter(|event| matches!(event, EngineEvent::ActivationCreated { .. }))
        .count();
    (cancelled, created)
}

#[test]
fn test_coalesce_hides_unchanged_results() {
    let (cancelled, created) = cancellations_after_irrelevant_update(UpdatePolicy::RetractInsert);
    assert!(cancelled >= 1);
    assert!(created >= 1);

    let (cancelled, created) = cancellations_after_irrelevant_update(UpdatePolicy::Coalesce);
    assert_eq!((cancelled, created), (0, 0));
    println!("✅ Coalesce kept the unchanged total's activation");
}

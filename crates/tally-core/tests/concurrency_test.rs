//! Sharing knowledge bases across threads, the session actor and hot reload

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tally_core::{
    EngineConfig, Fact, FactType, FactValue, FieldType, KnowledgeBase, KnowledgeBaseBuilder, Operator, Pattern,
    Query, Rule, RuleRegistry, StatelessSession, TallyError, spawn_session,
};

fn create_test_builder(threshold: i64) -> KnowledgeBaseBuilder {
    KnowledgeBase::builder()
        .declare(FactType::new("Applicant").field("id", FieldType::Integer).field("credit_score", FieldType::Integer))
        .declare(FactType::new("Decision").field("id", FieldType::Integer).field("outcome", FieldType::String))
        .rule(
            Rule::new("decline")
                .when(
                    Pattern::new("Applicant")
                        .var("$a")
                        .bind("$id", "id")
                        .with("credit_score", Operator::LessThan, threshold),
                )
                .then(|ctx| {
                    let id = ctx.value("$id").cloned().unwrap_or(FactValue::Null);
                    ctx.insert(Fact::new("Decision").with("id", id).with("outcome", "declined"))?;
                    Ok(())
                }),
        )
        .query(Query::new("decisions").when(Pattern::new("Decision").var("$d").bind("$id", "id")))
}

fn applicant(id: i64, score: i64) -> Fact {
    Fact::new("Applicant").with("id", id).with("credit_score", score)
}

#[test]
fn test_parallel_sessions_share_one_base() {
    let base = create_test_builder(600).build().unwrap();
    let fired: Vec<usize> = thread::scope(|scope| {
        let workers: Vec<_> = (0..4_i64)
            .map(|worker| {
                let base = Arc::clone(&base);
                scope.spawn(move || {
                    let mut session = base.new_session();
                    for i in 0..=worker {
                        session.insert(applicant(worker * 100 + i, 500)).unwrap();
                    }
                    session.insert(applicant(worker * 100 + 99, 700)).unwrap();
                    let fired = session.fire_all(None).unwrap();
                    assert_eq!(session.query("decisions", &[]).unwrap().count(), fired);
                    fired
                })
            })
            .collect();
        workers.into_iter().map(|worker| worker.join().unwrap()).collect()
    });
    assert_eq!(fired, vec![1, 2, 3, 4]);
    println!("✅ Four sessions ran concurrently over one knowledge base");
}

#[tokio::test]
async fn test_session_actor_round_trip() {
    let base = create_test_builder(600).build().unwrap();
    let (handle, task) = spawn_session(base.new_session_with(EngineConfig::pseudo_clock()));

    let low = handle.insert(applicant(1, 550)).await.unwrap();
    handle.insert(applicant(2, 650)).await.unwrap();
    assert_eq!(handle.stats().await.unwrap().pending_activations, 1);

    assert_eq!(handle.fire_all(None).await.unwrap(), 1);
    let rows = handle.query("decisions", Vec::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value("$id"), Some(&FactValue::Integer(1)));

    assert_eq!(handle.get_object(low).await.unwrap(), Some(applicant(1, 550)));
    handle.update(low, applicant(1, 560)).await.unwrap();
    assert_eq!(handle.retract(low).await.unwrap(), applicant(1, 560));
    assert!(matches!(handle.retract(low).await, Err(TallyError::UnknownHandle { .. })));

    handle.set_focus("review").await.unwrap();
    assert_eq!(handle.pop_focus().await.unwrap().as_deref(), Some("review"));
    assert_eq!(handle.advance_time(Duration::from_secs(2)).await.unwrap(), 2_000);

    drop(handle);
    let session = task.await.unwrap();
    assert_eq!(session.fact_count(), 2);
}

#[tokio::test]
async fn test_concurrent_handles_are_serialised() {
    let base = create_test_builder(600).build().unwrap();
    let (handle, task) = spawn_session(base.new_session());

    let inserts: Vec<_> = (0..20_i64)
        .map(|id| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.insert(applicant(id, 500)).await })
        })
        .collect();
    for insert in inserts {
        insert.await.unwrap().unwrap();
    }
    assert_eq!(handle.fire_all(None).await.unwrap(), 20);
    drop(handle);
    assert_eq!(task.await.unwrap().fact_count(), 40);
}

#[tokio::test]
async fn test_stopped_actor_reports_session_closed() {
    let base = create_test_builder(600).build().unwrap();
    let (handle, task) = spawn_session(base.new_session());
    task.abort();
    assert!(task.await.is_err());

    let err = handle.insert(applicant(1, 500)).await.unwrap_err();
    assert!(matches!(err, TallyError::SessionClosed));
    assert!(!err.is_recoverable());
}

#[test]
fn test_registry_reload_affects_new_sessions_only() {
    let registry = RuleRegistry::new(create_test_builder(600).build().unwrap());
    let mut before = registry.new_session();

    registry.reload(create_test_builder(700)).unwrap();
    let mut after = registry.new_session();

    before.insert(applicant(1, 650)).unwrap();
    after.insert(applicant(1, 650)).unwrap();
    assert!(before.pending_activations().is_empty());
    assert_eq!(after.pending_activations().len(), 1);
    assert_ne!(before.knowledge_base().id(), after.knowledge_base().id());
}

#[test]
fn test_failed_reload_keeps_current_base() {
    let registry = RuleRegistry::new(create_test_builder(600).build().unwrap());
    let current = registry.current().id();
    let broken = create_test_builder(600).rule(Rule::new("decline"));
    let err = registry.reload(broken).unwrap_err();
    assert_eq!(err.category(), "compile");
    assert_eq!(registry.current().id(), current);
}

#[test]
fn test_stateless_session_runs_to_completion() {
    let base = create_test_builder(600).build().unwrap();
    let stateless = StatelessSession::new(Arc::clone(&base));

    let results = stateless.execute([applicant(1, 550), applicant(2, 580), applicant(3, 720)]).unwrap();
    assert_eq!(results.fired, 2);
    assert_eq!(results.fired_rules, vec!["decline", "decline"]);
    assert_eq!(results.facts.iter().filter(|(_, fact)| fact.fact_type == "Decision").count(), 2);

    // Each execution starts from empty working memory.
    let again = base.new_stateless_session().with_fire_limit(1).execute_with([applicant(4, 100)], |session| {
        session.context_mut().set("caller", "batch".to_string());
        Ok(())
    });
    let again = again.unwrap();
    assert_eq!(again.fired, 1);
    assert_eq!(again.facts.len(), 2);
    assert_eq!(again.context.get::<String>("caller").map(String::as_str), Some("batch"));
}

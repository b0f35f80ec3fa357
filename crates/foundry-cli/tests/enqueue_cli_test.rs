//! Integration tests for what `foundry enqueue` and `foundry reset-sessions`
//! do, against a real PostgreSQL instance. Mirrors the base crate's CLI
//! integration tests by exercising the library calls the command bodies
//! make, rather than spawning the compiled binary.

use foundry_core::queue::{self, TaskSpec};
use foundry_db::models::{DependencyType, QueueLocation};
use foundry_db::queries::{sessions, tasks};
use foundry_test_utils::{create_test_db, drop_test_db};

fn spec(task_id: &str, depends_on: Vec<(String, DependencyType)>) -> TaskSpec {
    TaskSpec {
        task_id: task_id.to_string(),
        intent: "add middleware".to_string(),
        instructions: "Create src/auth/middleware.ts".to_string(),
        acceptance_criteria: vec!["function authMiddleware exported".to_string()],
        task_type: None,
        agent_mode: None,
        working_directory: None,
        required_artifacts: vec!["src/auth/middleware.ts".to_string()],
        test_command: None,
        expected_json_schema: None,
        depends_on,
        retry_max: 3,
        feature_id: None,
    }
}

#[tokio::test]
async fn enqueue_splits_ready_and_waiting() {
    let (pool, db_name) = create_test_db().await;

    let specs = vec![
        spec("a", vec![]),
        spec("b", vec![("a".to_string(), DependencyType::Hard)]),
    ];
    queue::enqueue(&pool, "proj1", "ship the thing", "/tmp/proj1", specs)
        .await
        .expect("enqueue should succeed");

    let all_tasks = tasks::list_tasks_for_project(&pool, "proj1").await.unwrap();
    assert_eq!(all_tasks.len(), 2);

    let a = all_tasks.iter().find(|t| t.task_id == "a").unwrap();
    let b = all_tasks.iter().find(|t| t.task_id == "b").unwrap();
    assert_eq!(a.queue_location, QueueLocation::Ready);
    assert_eq!(b.queue_location, QueueLocation::Waiting);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn enqueue_rejects_duplicate_task_id_on_second_call() {
    let (pool, db_name) = create_test_db().await;

    queue::enqueue(&pool, "proj2", "ship it", "/tmp/proj2", vec![spec("dup", vec![])])
        .await
        .expect("first enqueue should succeed");

    let result = queue::enqueue(&pool, "proj2", "ship it", "/tmp/proj2", vec![spec("dup", vec![])]).await;
    assert!(result.is_err(), "second enqueue of the same task_id should fail");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn enqueue_rejects_hard_dependency_cycle() {
    let (pool, db_name) = create_test_db().await;

    let specs = vec![
        spec("a", vec![("b".to_string(), DependencyType::Hard)]),
        spec("b", vec![("a".to_string(), DependencyType::Hard)]),
    ];
    let result = queue::enqueue(&pool, "proj3", "ship it", "/tmp/proj3", specs).await;
    assert!(result.is_err(), "circular hard dependency should be rejected");

    let remaining = tasks::list_tasks_for_project(&pool, "proj3").await.unwrap();
    assert!(remaining.is_empty(), "no task should be persisted on a rejected enqueue");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reset_sessions_evicts_all_when_no_feature_id_given() {
    let (pool, db_name) = create_test_db().await;

    sessions::upsert_session(&pool, "proj4", "feat-a", "sess-a", "claude", 100, None)
        .await
        .unwrap();
    sessions::upsert_session(&pool, "proj4", "feat-b", "sess-b", "claude", 200, None)
        .await
        .unwrap();

    let all = sessions::list_sessions(&pool, "proj4").await.unwrap();
    for session in &all {
        sessions::evict_session(&pool, "proj4", &session.feature_id).await.unwrap();
    }

    let remaining = sessions::list_sessions(&pool, "proj4").await.unwrap();
    assert!(remaining.is_empty());

    pool.close().await;
    drop_test_db(&db_name).await;
}

//! Integration tests for task/queue query functions.

use foundry_db::models::{DependencyType, QueueLocation, TaskStatus, TaskType};
use foundry_db::queries::{projects, tasks};
use foundry_test_utils::{create_test_db, drop_test_db};

fn new_task(task_id: &str, project_id: &str, queue_location: QueueLocation) -> tasks::NewTask {
    tasks::NewTask {
        task_id: task_id.to_string(),
        project_id: project_id.to_string(),
        intent: "do the thing".to_string(),
        instructions: "do it well".to_string(),
        acceptance_criteria: vec!["criterion one".to_string()],
        task_type: TaskType::Coding,
        agent_mode: None,
        working_directory: None,
        required_artifacts: vec![],
        test_command: None,
        expected_json_schema: None,
        retry_max: 3,
        feature_id: None,
        queue_location,
    }
}

#[tokio::test]
async fn ready_task_is_retrievable_and_waiting_is_not() {
    let (pool, db_name) = create_test_db().await;
    projects::ensure_project(&pool, "proj1", "ship it", "/sandbox/proj1")
        .await
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    tasks::insert_task(&mut tx, &new_task("t1", "proj1", QueueLocation::Ready))
        .await
        .unwrap();
    tasks::insert_task(&mut tx, &new_task("t2", "proj1", QueueLocation::Waiting))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let popped = tasks::pop_ready_head(&pool, "proj1").await.unwrap();
    assert_eq!(popped.unwrap().task_id, "t1");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn promotion_waits_for_hard_dependencies_only() {
    let (pool, db_name) = create_test_db().await;
    projects::ensure_project(&pool, "proj2", "ship it", "/sandbox/proj2")
        .await
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    tasks::insert_task(&mut tx, &new_task("base", "proj2", QueueLocation::Ready))
        .await
        .unwrap();
    tasks::insert_task(
        &mut tx,
        &new_task("dependent", "proj2", QueueLocation::Waiting),
    )
    .await
    .unwrap();
    tasks::insert_dependency(&mut tx, "proj2", "dependent", "base", DependencyType::Hard)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // Not yet promotable: "base" hasn't completed.
    let promotable = tasks::promotable_waiting_tasks(&pool, "proj2").await.unwrap();
    assert!(promotable.is_empty());

    // Complete "base"; "dependent" should now be promotable.
    tasks::transition_status(
        &pool,
        "proj2",
        "base",
        TaskStatus::Ready,
        TaskStatus::InProgress,
    )
    .await
    .unwrap();
    tasks::complete_task(&pool, "proj2", "base", &serde_json::json!({"valid": true}))
        .await
        .unwrap();

    let promotable = tasks::promotable_waiting_tasks(&pool, "proj2").await.unwrap();
    assert_eq!(promotable, vec!["dependent".to_string()]);

    tasks::promote_to_ready(&pool, "proj2", "dependent").await.unwrap();
    let popped = tasks::pop_ready_head(&pool, "proj2").await.unwrap();
    assert_eq!(popped.unwrap().task_id, "dependent");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn soft_dependency_never_blocks_promotion() {
    let (pool, db_name) = create_test_db().await;
    projects::ensure_project(&pool, "proj3", "ship it", "/sandbox/proj3")
        .await
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    tasks::insert_task(&mut tx, &new_task("advisory", "proj3", QueueLocation::Ready))
        .await
        .unwrap();
    tasks::insert_task(
        &mut tx,
        &new_task("dependent", "proj3", QueueLocation::Waiting),
    )
    .await
    .unwrap();
    tasks::insert_dependency(
        &mut tx,
        "proj3",
        "dependent",
        "advisory",
        DependencyType::Soft,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    // "advisory" hasn't completed, but the dependency is soft, so
    // "dependent" is immediately promotable.
    let promotable = tasks::promotable_waiting_tasks(&pool, "proj3").await.unwrap();
    assert_eq!(promotable, vec!["dependent".to_string()]);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn optimistic_transition_fails_on_status_mismatch() {
    let (pool, db_name) = create_test_db().await;
    projects::ensure_project(&pool, "proj4", "ship it", "/sandbox/proj4")
        .await
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    tasks::insert_task(&mut tx, &new_task("t1", "proj4", QueueLocation::Ready))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let ok = tasks::transition_status(
        &pool,
        "proj4",
        "t1",
        TaskStatus::Ready,
        TaskStatus::InProgress,
    )
    .await
    .unwrap();
    assert!(ok);

    // Second transition from the same "from" state fails: already moved on.
    let stale = tasks::transition_status(
        &pool,
        "proj4",
        "t1",
        TaskStatus::Ready,
        TaskStatus::InProgress,
    )
    .await
    .unwrap();
    assert!(!stale);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reset_in_progress_tasks_recovers_from_crash() {
    let (pool, db_name) = create_test_db().await;
    projects::ensure_project(&pool, "proj5", "ship it", "/sandbox/proj5")
        .await
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    tasks::insert_task(&mut tx, &new_task("t1", "proj5", QueueLocation::Ready))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    tasks::transition_status(
        &pool,
        "proj5",
        "t1",
        TaskStatus::Ready,
        TaskStatus::InProgress,
    )
    .await
    .unwrap();

    let recovered = tasks::reset_in_progress_tasks(&pool, "proj5").await.unwrap();
    assert_eq!(recovered, vec!["t1".to_string()]);

    let task = tasks::get_task(&pool, "proj5", "t1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Ready);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn blocked_task_is_never_re_promoted() {
    let (pool, db_name) = create_test_db().await;
    projects::ensure_project(&pool, "proj7", "ship it", "/sandbox/proj7")
        .await
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    tasks::insert_task(&mut tx, &new_task("base", "proj7", QueueLocation::Ready))
        .await
        .unwrap();
    tasks::insert_task(&mut tx, &new_task("dependent", "proj7", QueueLocation::Waiting))
        .await
        .unwrap();
    tasks::insert_dependency(&mut tx, "proj7", "dependent", "base", DependencyType::Hard)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    tasks::transition_status(&pool, "proj7", "base", TaskStatus::Ready, TaskStatus::InProgress)
        .await
        .unwrap();
    tasks::complete_task(&pool, "proj7", "base", &serde_json::json!({"valid": true}))
        .await
        .unwrap();

    // "dependent" is promotable once, gets dispatched, then blocked.
    let promotable = tasks::promotable_waiting_tasks(&pool, "proj7").await.unwrap();
    assert_eq!(promotable, vec!["dependent".to_string()]);
    tasks::promote_to_ready(&pool, "proj7", "dependent").await.unwrap();
    tasks::block_task(&pool, "proj7", "dependent", "helper could not confirm").await.unwrap();

    let blocked = tasks::get_task(&pool, "proj7", "dependent").await.unwrap().unwrap();
    assert_eq!(blocked.status, TaskStatus::Blocked);
    assert_eq!(blocked.queue_location, QueueLocation::Waiting);

    // An unrelated task completing must not resurrect the blocked task.
    let promotable_after_block = tasks::promotable_waiting_tasks(&pool, "proj7").await.unwrap();
    assert!(
        promotable_after_block.is_empty(),
        "blocked task must not be re-promoted: {promotable_after_block:?}"
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_exists_detects_duplicate_enqueue() {
    let (pool, db_name) = create_test_db().await;
    projects::ensure_project(&pool, "proj6", "ship it", "/sandbox/proj6")
        .await
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    assert!(!tasks::task_exists(&mut tx, "proj6", "dup").await.unwrap());
    tasks::insert_task(&mut tx, &new_task("dup", "proj6", QueueLocation::Ready))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx2 = pool.begin().await.unwrap();
    assert!(tasks::task_exists(&mut tx2, "proj6", "dup").await.unwrap());
    tx2.rollback().await.unwrap();

    drop_test_db(&db_name).await;
}

//! Execution record lifecycle: guarded finalize, backfill, startup cleanup.

use cronhost_core::artifact::ArtifactMarker;
use cronhost_core::status::ExecutionStatus;
use cronhost_db::models::execution::TriggerSource;
use cronhost_db::models::script::CreateScript;
use cronhost_db::repositories::{ArtifactRepo, ExecutionRepo, ScriptRepo};
use cronhost_db::SqlitePool;

async fn pool_with_script() -> (SqlitePool, i64) {
    let pool = cronhost_db::connect_memory().await.unwrap();
    let script = ScriptRepo::create(&pool, &CreateScript::named("nightly-report"))
        .await
        .unwrap();
    (pool, script.id)
}

#[tokio::test]
async fn create_running_then_finalize_success() {
    let (pool, script_id) = pool_with_script().await;

    let execution = ExecutionRepo::create_running(&pool, script_id, TriggerSource::Manual, false)
        .await
        .unwrap();
    assert_eq!(execution.status(), Some(ExecutionStatus::Running));
    assert!(execution.finished_at.is_none());

    let won = ExecutionRepo::finalize(
        &pool,
        execution.id,
        ExecutionStatus::Success,
        Some(0),
        "all good\n",
        "",
        None,
    )
    .await
    .unwrap();
    assert!(won);

    let finalized = ExecutionRepo::find_by_id(&pool, execution.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finalized.status(), Some(ExecutionStatus::Success));
    assert_eq!(finalized.exit_code, Some(0));
    assert_eq!(finalized.stdout, "all good\n");
    assert!(finalized.is_finished());

    let finished = finalized.finished_at.unwrap();
    assert!(finished >= finalized.started_at);
    assert!(finalized.duration_ms.unwrap() >= 0);
}

#[tokio::test]
async fn finalize_loses_against_prior_cancellation() {
    let (pool, script_id) = pool_with_script().await;
    let execution = ExecutionRepo::create_running(&pool, script_id, TriggerSource::Manual, false)
        .await
        .unwrap();

    // Cancellation wins the race...
    let won = ExecutionRepo::finalize(
        &pool,
        execution.id,
        ExecutionStatus::Cancelled,
        None,
        "",
        "",
        Some("Cancelled by user"),
    )
    .await
    .unwrap();
    assert!(won);

    // ...so the natural-completion path loses and must backfill instead.
    let won = ExecutionRepo::finalize(
        &pool,
        execution.id,
        ExecutionStatus::Success,
        Some(0),
        "late output\n",
        "",
        None,
    )
    .await
    .unwrap();
    assert!(!won);

    ExecutionRepo::backfill(&pool, execution.id, Some(0), "late output\n", "")
        .await
        .unwrap();

    let row = ExecutionRepo::find_by_id(&pool, execution.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status(), Some(ExecutionStatus::Cancelled));
    assert_eq!(row.error_message.as_deref(), Some("Cancelled by user"));
    // Backfilled fields landed without touching the status.
    assert_eq!(row.exit_code, Some(0));
    assert_eq!(row.stdout, "late output\n");
}

#[tokio::test]
async fn backfill_does_not_overwrite_existing_fields() {
    let (pool, script_id) = pool_with_script().await;
    let execution = ExecutionRepo::create_running(&pool, script_id, TriggerSource::Test, true)
        .await
        .unwrap();

    ExecutionRepo::finalize(
        &pool,
        execution.id,
        ExecutionStatus::Failed,
        Some(2),
        "original",
        "boom",
        Some("exit 2"),
    )
    .await
    .unwrap();

    ExecutionRepo::backfill(&pool, execution.id, Some(99), "replacement", "noise")
        .await
        .unwrap();

    let row = ExecutionRepo::find_by_id(&pool, execution.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.exit_code, Some(2));
    assert_eq!(row.stdout, "original");
    assert_eq!(row.stderr, "boom");
}

#[tokio::test]
async fn interrupt_running_is_idempotent() {
    let (pool, script_id) = pool_with_script().await;
    for _ in 0..3 {
        ExecutionRepo::create_running(&pool, script_id, TriggerSource::Scheduler, false)
            .await
            .unwrap();
    }
    assert_eq!(ExecutionRepo::count_running(&pool).await.unwrap(), 3);

    let flipped = ExecutionRepo::interrupt_running(&pool, "Execution interrupted by service restart")
        .await
        .unwrap();
    assert_eq!(flipped, 3);
    assert_eq!(ExecutionRepo::count_running(&pool).await.unwrap(), 0);

    // Second pass finds nothing to do.
    let flipped = ExecutionRepo::interrupt_running(&pool, "Execution interrupted by service restart")
        .await
        .unwrap();
    assert_eq!(flipped, 0);

    let rows = ExecutionRepo::list_by_script(&pool, script_id, 10, 0)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    for row in rows {
        assert_eq!(row.status(), Some(ExecutionStatus::Failed));
        assert_eq!(
            row.error_message.as_deref(),
            Some("Execution interrupted by service restart")
        );
    }
}

#[tokio::test]
async fn artifacts_attach_to_their_execution() {
    let (pool, script_id) = pool_with_script().await;
    let execution = ExecutionRepo::create_running(&pool, script_id, TriggerSource::Manual, false)
        .await
        .unwrap();

    let marker = ArtifactMarker::parse_line("ARTIFACT_SAVED:out_123.txt:42:out.txt").unwrap();
    let artifact = ArtifactRepo::create(&pool, execution.id, &marker).await.unwrap();
    assert_eq!(artifact.stored_filename, "out_123.txt");
    assert_eq!(artifact.size_bytes, 42);

    let listed = ArtifactRepo::list_by_execution(&pool, execution.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].original_filename, "out.txt");
    assert_eq!(
        ArtifactRepo::count_by_execution(&pool, execution.id).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn script_snapshot_round_trip() {
    let pool = cronhost_db::connect_memory().await.unwrap();

    let mut dto = CreateScript::named("etl-sync");
    dto.cron_expression = Some("*/5 * * * *".into());
    dto.dependencies = Some("requests\npandas>=2.0".into());
    dto.timeout_secs = Some(120);
    dto.alert_on_success = Some(true);
    let script = ScriptRepo::create(&pool, &dto).await.unwrap();

    let by_name = ScriptRepo::find_by_name(&pool, "etl-sync").await.unwrap().unwrap();
    assert_eq!(by_name.id, script.id);
    assert_eq!(by_name.cron_expression, "*/5 * * * *");
    assert_eq!(by_name.timeout_secs, 120);
    assert!(by_name.enabled);
    assert!(by_name.alert_on_success);
    assert!(by_name.last_alert_at.is_none());

    ScriptRepo::set_enabled(&pool, script.id, false).await.unwrap();
    assert!(ScriptRepo::list_enabled(&pool).await.unwrap().is_empty());

    let now = chrono::Utc::now();
    ScriptRepo::set_last_alert_at(&pool, script.id, now).await.unwrap();
    let reread = ScriptRepo::find_by_id(&pool, script.id).await.unwrap().unwrap();
    let stored = reread.last_alert_at.expect("throttle timestamp persisted");
    assert!((stored - now).num_seconds().abs() < 1);
}

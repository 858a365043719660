use testresult::TestResult;

use crate::shared;
use switchyard::{
    Event, Hook, Isolation, JobEnvelope, RedisFailureBackend, StatusState, Worker,
};

fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

fn queued_envelope(ctx: &switchyard::Context, class: &str, id: &str) -> JobEnvelope {
    JobEnvelope {
        args: vec![serde_json::Value::Null],
        class: class.to_string(),
        id: Some(id.to_string()),
        prefix: Some(ctx.storage.namespace().to_string()),
        queue: None,
        queue_time: Some(0.0),
    }
}

#[tokio::test]
async fn test_successful_perform_updates_everything() -> TestResult {
    let ctx = shared::context();
    let queue = shared::random_string();
    let token = shared::random_string();

    let id = ctx
        .enqueue(
            &queue,
            "TouchJob",
            Some(serde_json::json!({"token": token})),
            true,
        )
        .await?
        .expect("enqueue was not vetoed");

    let worker = Worker::new(&ctx, vec![queue.clone()]);
    assert!(worker.process_one().await?);
    assert!(!worker.process_one().await?);

    assert!(shared::was_touched(&token));
    assert_eq!(
        ctx.storage.job_status(&id).await?.map(|s| s.status),
        Some(StatusState::Complete)
    );
    assert_eq!(ctx.storage.stat("processed").await?, 1);
    assert_eq!(
        ctx.storage.stat(&format!("processed:{}", worker.id())).await?,
        1
    );
    assert_eq!(ctx.storage.stat("failed").await?, 0);
    assert_eq!(ctx.storage.job_pid(&id).await?, None);
    assert_eq!(ctx.failure.count().await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_handler_error_routes_to_failure_sink() -> TestResult {
    let ctx = shared::context();
    let queue = shared::random_string();

    let id = ctx
        .enqueue(&queue, "FailingJob", None, true)
        .await?
        .expect("enqueue was not vetoed");

    let worker = Worker::new(&ctx, vec![queue.clone()]);
    assert!(worker.process_one().await?);

    assert_eq!(
        ctx.storage.job_status(&id).await?.map(|s| s.status),
        Some(StatusState::Failed)
    );
    assert_eq!(ctx.failure.count().await?, 1);
    assert_eq!(ctx.storage.stat("failed").await?, 1);
    assert_eq!(ctx.storage.stat(&format!("failed:{}", worker.id())).await?, 1);
    assert_eq!(ctx.storage.stat("processed").await?, 0);

    let backend = RedisFailureBackend::new(&ctx.storage);
    let records = backend.all(0, 10).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["exception"], "HandlerError");
    assert_eq!(records[0]["error"], "handler exploded");
    assert_eq!(records[0]["queue"], queue);
    assert_eq!(records[0]["worker"], worker.id());
    assert_eq!(records[0]["payload"]["class"], "FailingJob");

    Ok(())
}

#[tokio::test]
async fn test_panicking_handler_is_contained() -> TestResult {
    let ctx = shared::context();
    let queue = shared::random_string();

    ctx.enqueue(&queue, "PanickingJob", None, false).await?;

    let worker = Worker::new(&ctx, vec![queue.clone()]);
    assert!(worker.process_one().await?);

    let backend = RedisFailureBackend::new(&ctx.storage);
    let records = backend.all(0, 10).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["exception"], "Panic");
    assert_eq!(records[0]["error"], "kaboom");

    Ok(())
}

#[tokio::test]
async fn test_unknown_class_is_a_resolution_failure() -> TestResult {
    let ctx = shared::context();
    let queue = shared::random_string();

    let id = ctx
        .enqueue(&queue, "NotARegisteredJob", None, true)
        .await?
        .expect("enqueue was not vetoed");

    let worker = Worker::new(&ctx, vec![queue.clone()]);
    assert!(worker.process_one().await?);

    assert_eq!(
        ctx.storage.job_status(&id).await?.map(|s| s.status),
        Some(StatusState::Failed)
    );
    let backend = RedisFailureBackend::new(&ctx.storage);
    let records = backend.all(0, 10).await?;
    assert_eq!(records[0]["exception"], "JobResolutionError");

    Ok(())
}

#[tokio::test]
async fn test_vetoed_perform_leaves_no_trace() -> TestResult {
    let ctx = shared::context();
    let queue = shared::random_string();
    let token = shared::random_string();

    ctx.events.on(Event::BeforePerform, |_| Hook::Veto);

    let id = ctx
        .enqueue(
            &queue,
            "TouchJob",
            Some(serde_json::json!({"token": token})),
            true,
        )
        .await?
        .expect("enqueue was not vetoed");

    let worker = Worker::new(&ctx, vec![queue.clone()]);
    assert!(worker.process_one().await?);

    // The handler never ran, nothing was recorded as a failure and the
    // status was not moved to FAILED.
    assert!(!shared::was_touched(&token));
    assert_eq!(ctx.failure.count().await?, 0);
    assert_eq!(ctx.storage.stat("failed").await?, 0);
    assert_eq!(ctx.storage.stat("processed").await?, 0);
    assert_eq!(
        ctx.storage.job_status(&id).await?.map(|s| s.status),
        Some(StatusState::Running)
    );

    Ok(())
}

#[tokio::test]
async fn test_dirty_exit_from_job_child() -> TestResult {
    let ctx = shared::context();
    let queue = shared::random_string();

    let id = ctx
        .enqueue(&queue, "NoopJob", None, true)
        .await?
        .expect("enqueue was not vetoed");

    let worker = Worker::new(&ctx, vec![queue.clone()]).isolation(Isolation::Subprocess {
        program: "/bin/sh".into(),
        args: vec!["-c".to_string(), "cat >/dev/null; exit 3".to_string()],
    });
    assert!(worker.process_one().await?);

    assert_eq!(
        ctx.storage.job_status(&id).await?.map(|s| s.status),
        Some(StatusState::Failed)
    );
    assert_eq!(ctx.storage.stat("failed").await?, 1);
    assert_eq!(ctx.storage.stat(&format!("failed:{}", worker.id())).await?, 1);
    assert_eq!(ctx.storage.job_pid(&id).await?, None);

    let backend = RedisFailureBackend::new(&ctx.storage);
    let records = backend.all(0, 10).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["exception"], "DirtyExit");
    assert_eq!(records[0]["error"], "job process exited dirty (code 3)");

    Ok(())
}

#[tokio::test]
async fn test_registration_lifecycle() -> TestResult {
    let ctx = shared::context();
    let queue = shared::random_string();

    let worker = Worker::new(&ctx, vec![queue]);
    worker.register().await?;

    assert!(ctx.storage.workers().await?.contains(&worker.id().to_string()));
    assert!(ctx.storage.worker_started(worker.id()).await?.is_some());

    worker.unregister().await?;

    assert!(!ctx.storage.workers().await?.contains(&worker.id().to_string()));
    assert!(ctx.storage.worker_started(worker.id()).await?.is_none());
    assert_eq!(ctx.storage.working_on(worker.id()).await?.map(|w| w.queue), None);

    Ok(())
}

#[tokio::test]
async fn test_orphaned_worker_is_reaped() -> TestResult {
    let ctx = shared::context();

    // A worker registered on this host whose pid is long gone.
    let orphan_id = format!("{}:999999:q1", local_hostname());
    ctx.storage.register_worker(&orphan_id).await?;

    let job_id = shared::random_string();
    let abandoned = switchyard::Job::new("q1", queued_envelope(&ctx, "NoopJob", &job_id));
    ctx.storage.create_status(&job_id).await?;
    ctx.storage
        .update_status(&job_id, None, StatusState::Running, None)
        .await?;
    ctx.storage.set_working_on(&orphan_id, &abandoned).await?;

    let worker = Worker::new(&ctx, vec!["q1".to_string()]);
    worker.prune_dead_workers().await?;

    assert!(!ctx.storage.workers().await?.contains(&orphan_id));
    assert_eq!(
        ctx.storage.job_status(&job_id).await?.map(|s| s.status),
        Some(StatusState::Failed)
    );

    let backend = RedisFailureBackend::new(&ctx.storage);
    let records = backend.all(0, 10).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["exception"], "DirtyExit");
    assert_eq!(records[0]["worker"], orphan_id);
    assert_eq!(ctx.storage.stat("failed").await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_live_workers_are_not_pruned() -> TestResult {
    let ctx = shared::context();

    // Same host, our own live pid under a different worker identity.
    let live_id = format!("{}:{}:other", local_hostname(), std::process::id());
    ctx.storage.register_worker(&live_id).await?;

    // A dead pid on a different host is not ours to reap.
    let remote_id = "elsewhere.example.com:999999:q1".to_string();
    ctx.storage.register_worker(&remote_id).await?;

    let worker = Worker::new(&ctx, vec!["q1".to_string()]);
    worker.prune_dead_workers().await?;

    let workers = ctx.storage.workers().await?;
    assert!(workers.contains(&live_id));
    assert!(workers.contains(&remote_id));

    Ok(())
}

#[tokio::test]
async fn test_star_queue_enumerates_registry() -> TestResult {
    let ctx = shared::context();
    let queue = shared::random_string();
    let token = shared::random_string();

    ctx.enqueue(
        &queue,
        "TouchJob",
        Some(serde_json::json!({"token": token})),
        false,
    )
    .await?;

    let worker = Worker::new(&ctx, vec!["*".to_string()]);
    assert!(worker.process_one().await?);
    assert!(shared::was_touched(&token));

    Ok(())
}

#[tokio::test]
async fn test_poll_order_is_caller_supplied_priority() -> TestResult {
    let ctx = shared::context();
    let high = shared::random_string();
    let low = shared::random_string();

    ctx.enqueue(&low, "NoopJob", Some(serde_json::json!({"lane": "low"})), false)
        .await?;
    ctx.enqueue(&high, "NoopJob", Some(serde_json::json!({"lane": "high"})), false)
        .await?;

    // The worker polls `high` first even though `low` was enqueued earlier.
    let worker = Worker::new(&ctx, vec![high.clone(), low.clone()]);
    assert!(worker.process_one().await?);

    assert_eq!(ctx.storage.size(&high).await?, 0);
    assert_eq!(ctx.storage.size(&low).await?, 1);

    Ok(())
}

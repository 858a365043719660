use testresult::TestResult;

use crate::shared;
use switchyard::{Scheduler, SwitchyardError};

#[tokio::test]
async fn test_promotion_moves_only_due_jobs() -> TestResult {
    let ctx = shared::context();

    assert!(ctx.enqueue_at(100, "q1", "Job", Some(serde_json::json!({"x": 1}))).await?);
    assert!(ctx.enqueue_at(200, "q1", "Job", Some(serde_json::json!({"x": 2}))).await?);

    let scheduler = Scheduler::new(&ctx);
    assert_eq!(scheduler.promote_due(150).await?, 1);

    let envelope = ctx.storage.pop("q1").await?.expect("promoted job present");
    assert_eq!(envelope.args_value(), &serde_json::json!({"x": 1}));
    assert_eq!(envelope.queue.as_deref(), Some("q1"));
    assert_eq!(ctx.storage.pop("q1").await?, None);

    assert_eq!(ctx.storage.delayed_queue_size().await?, 1);
    assert_eq!(ctx.storage.size_at_timestamp(200).await?, 1);
    assert_eq!(ctx.storage.next_delayed_timestamp(Some(150)).await?, None);
    assert_eq!(ctx.storage.next_delayed_timestamp(Some(250)).await?, Some(200));

    Ok(())
}

#[tokio::test]
async fn test_past_due_timestamps_are_observed_late() -> TestResult {
    let ctx = shared::context();

    ctx.enqueue_at(100, "q1", "Job", None).await?;

    // The scheduler was "down" until long after the timestamp.
    assert_eq!(ctx.storage.next_delayed_timestamp(Some(100_000)).await?, Some(100));

    Ok(())
}

#[tokio::test]
async fn test_enqueue_in_schedules_in_the_future() -> TestResult {
    let ctx = shared::context();
    let queue = shared::random_string();

    assert!(ctx.enqueue_in(3600, &queue, "Job", None).await?);

    assert_eq!(ctx.storage.delayed_queue_size().await?, 1);
    assert_eq!(ctx.storage.next_delayed_timestamp(None).await?, None);

    Ok(())
}

#[tokio::test]
async fn test_fifo_within_a_timestamp() -> TestResult {
    let ctx = shared::context();

    for n in 0..3 {
        ctx.enqueue_at(500, "q1", "Job", Some(serde_json::json!({"n": n}))).await?;
    }

    for n in 0..3 {
        let envelope = ctx
            .storage
            .next_item_for_timestamp(500)
            .await?
            .expect("item present");
        assert_eq!(envelope.args_value(), &serde_json::json!({"n": n}));
    }
    assert_eq!(ctx.storage.next_item_for_timestamp(500).await?, None);

    Ok(())
}

#[tokio::test]
async fn test_pop_prunes_emptied_timestamp() -> TestResult {
    let ctx = shared::context();

    ctx.enqueue_at(100, "q1", "Job", None).await?;
    assert_eq!(ctx.storage.delayed_queue_size().await?, 1);

    ctx.storage.next_item_for_timestamp(100).await?;

    assert_eq!(ctx.storage.delayed_queue_size().await?, 0);
    assert_eq!(ctx.storage.size_at_timestamp(100).await?, 0);
    assert_eq!(ctx.storage.next_delayed_timestamp(Some(1_000)).await?, None);

    Ok(())
}

#[tokio::test]
async fn test_remove_delayed_matches_by_canonical_json() -> TestResult {
    let ctx = shared::context();
    let args = Some(serde_json::json!({"x": 1}));

    ctx.enqueue_at(100, "q1", "Job", args.clone()).await?;
    ctx.enqueue_at(200, "q1", "Job", args.clone()).await?;
    ctx.enqueue_at(200, "q1", "Job", Some(serde_json::json!({"x": 2}))).await?;
    ctx.enqueue_at(300, "q2", "Job", args.clone()).await?;

    // Same class and args on a different queue must not match.
    assert_eq!(ctx.remove_delayed("q1", "Job", args.clone()).await?, 2);

    let survivor = ctx
        .storage
        .next_item_for_timestamp(200)
        .await?
        .expect("unmatched entry survives");
    assert_eq!(survivor.args_value(), &serde_json::json!({"x": 2}));
    assert_eq!(ctx.storage.next_item_for_timestamp(100).await?, None);
    assert!(ctx.storage.next_item_for_timestamp(300).await?.is_some());

    Ok(())
}

#[tokio::test]
async fn test_remove_delayed_from_timestamp_prunes_schedule() -> TestResult {
    let ctx = shared::context();
    let args = Some(serde_json::json!({"x": 1}));

    ctx.enqueue_at(100, "q1", "Job", args.clone()).await?;
    ctx.enqueue_at(200, "q1", "Job", args.clone()).await?;

    assert_eq!(
        ctx.remove_delayed_from_timestamp(100, "q1", "Job", args.clone()).await?,
        1
    );

    // Only the emptied timestamp is gone from the schedule.
    assert_eq!(ctx.storage.size_at_timestamp(100).await?, 0);
    assert_eq!(ctx.storage.next_delayed_timestamp(Some(1_000)).await?, Some(200));
    assert_eq!(ctx.storage.delayed_queue_size().await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_schedule_invariant_after_mixed_operations() -> TestResult {
    let ctx = shared::context();

    ctx.enqueue_at(100, "q1", "A", None).await?;
    ctx.enqueue_at(100, "q1", "B", None).await?;
    ctx.enqueue_at(200, "q1", "C", None).await?;

    ctx.storage.next_item_for_timestamp(100).await?;

    // 100 still has one entry, so both timestamps remain scheduled.
    assert_eq!(ctx.storage.delayed_queue_size().await?, 2);
    assert_eq!(ctx.storage.size_at_timestamp(100).await?, 1);

    ctx.storage.next_item_for_timestamp(100).await?;
    assert_eq!(ctx.storage.delayed_queue_size().await?, 1);
    assert_eq!(ctx.storage.next_delayed_timestamp(Some(1_000)).await?, Some(200));

    Ok(())
}

#[tokio::test]
async fn test_schedule_rejects_empty_destination() -> TestResult {
    let ctx = shared::context();

    assert!(matches!(
        ctx.enqueue_at(100, "", "Job", None).await,
        Err(SwitchyardError::Config(_))
    ));
    assert!(matches!(
        ctx.enqueue_at(100, "q1", "", None).await,
        Err(SwitchyardError::Config(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_vetoed_schedule_writes_nothing() -> TestResult {
    let ctx = shared::context();

    ctx.events.on(switchyard::Event::BeforeSchedule, |_| switchyard::Hook::Veto);

    assert!(!ctx.enqueue_at(100, "q1", "Job", None).await?);
    assert_eq!(ctx.storage.delayed_queue_size().await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_promotion_runs_through_worker() -> TestResult {
    let ctx = shared::context();
    let queue = shared::random_string();
    let token = shared::random_string();

    ctx.enqueue_at(
        100,
        &queue,
        "TouchJob",
        Some(serde_json::json!({"token": token})),
    )
    .await?;

    Scheduler::new(&ctx).promote_ready().await?;

    let worker = switchyard::Worker::new(&ctx, vec![queue.clone()]);
    assert!(worker.process_one().await?);
    assert!(shared::was_touched(&token));

    Ok(())
}

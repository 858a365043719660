use testresult::TestResult;

use crate::shared;

#[tokio::test]
async fn test_counters_start_at_zero() -> TestResult {
    let storage = shared::storage();

    assert_eq!(storage.stat("processed").await?, 0);
    assert_eq!(storage.stat("failed").await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_counters_are_monotone() -> TestResult {
    let storage = shared::storage();

    assert_eq!(storage.incr_stat("processed", 1).await?, 1);
    assert_eq!(storage.incr_stat("processed", 1).await?, 2);
    assert_eq!(storage.incr_stat("processed", 5).await?, 7);
    assert_eq!(storage.stat("processed").await?, 7);

    Ok(())
}

#[tokio::test]
async fn test_clear_resets_a_single_counter() -> TestResult {
    let storage = shared::storage();

    storage.incr_stat("processed", 3).await?;
    storage.incr_stat("failed", 2).await?;

    storage.clear_stat("processed").await?;

    assert_eq!(storage.stat("processed").await?, 0);
    assert_eq!(storage.stat("failed").await?, 2);

    Ok(())
}

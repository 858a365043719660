use testresult::TestResult;

use crate::shared;
use switchyard::StatusState;

#[tokio::test]
async fn test_create_initializes_waiting() -> TestResult {
    let storage = shared::storage();
    let id = shared::random_string();

    assert!(!storage.is_tracking(&id).await?);
    storage.create_status(&id).await?;

    assert!(storage.is_tracking(&id).await?);
    let status = storage.job_status(&id).await?.expect("record exists");
    assert_eq!(status.status, StatusState::Waiting);
    assert_eq!(status.started, status.updated);

    Ok(())
}

#[tokio::test]
async fn test_forward_transitions_are_applied() -> TestResult {
    let storage = shared::storage();
    let id = shared::random_string();
    storage.create_status(&id).await?;

    assert!(storage.update_status(&id, None, StatusState::Running, None).await?);
    assert_eq!(
        storage.job_status(&id).await?.map(|s| s.status),
        Some(StatusState::Running)
    );

    assert!(
        storage
            .update_status(&id, None, StatusState::Complete, Some(serde_json::json!("done")))
            .await?
    );
    let status = storage.job_status(&id).await?.expect("record exists");
    assert_eq!(status.status, StatusState::Complete);
    assert_eq!(status.result, Some(serde_json::json!("done")));

    Ok(())
}

#[tokio::test]
async fn test_late_writers_never_regress_terminal_state() -> TestResult {
    let storage = shared::storage();
    let id = shared::random_string();
    storage.create_status(&id).await?;

    assert!(storage.update_status(&id, None, StatusState::Complete, None).await?);

    assert!(!storage.update_status(&id, None, StatusState::Running, None).await?);
    assert!(!storage.update_status(&id, None, StatusState::Failed, None).await?);
    assert!(!storage.update_status(&id, None, StatusState::Waiting, None).await?);

    assert_eq!(
        storage.job_status(&id).await?.map(|s| s.status),
        Some(StatusState::Complete)
    );

    Ok(())
}

#[tokio::test]
async fn test_untracked_jobs_ignore_updates() -> TestResult {
    let storage = shared::storage();
    let id = shared::random_string();

    assert!(!storage.update_status(&id, None, StatusState::Running, None).await?);
    assert!(!storage.is_tracking(&id).await?);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), switchyard::SwitchyardError> {
    switchyard::init_tracing();

    let storage = switchyard::Storage::builder().from_env()?.build()?;
    let ctx = switchyard::Context::new(storage, switchyard::HandlerRegistry::new());

    let job_id = ctx
        .enqueue(
            "mail",
            "SendEmail",
            Some(serde_json::json!({"to": "someone@example.com", "subject": "hello"})),
            true,
        )
        .await?;
    println!("enqueued {job_id:?}");

    ctx.enqueue_in(60, "maintenance", "Cleanup", None).await?;
    println!("scheduled Cleanup in 60s");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), switchyard::SwitchyardError> {
    switchyard::init_tracing();

    let storage = switchyard::Storage::builder().from_env()?.build()?;
    let ctx = switchyard::Context::new(storage, switchyard::HandlerRegistry::new());

    switchyard::run_scheduler(ctx, switchyard::SchedulerOptions::from_env()?).await
}

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct SendEmail {
    to: String,
    subject: String,
}

#[async_trait::async_trait]
impl switchyard::JobHandler for SendEmail {
    async fn perform(&mut self, _: &switchyard::JobContext) -> Result<(), switchyard::JobError> {
        println!("sending {:?} to {}", self.subject, self.to);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Cleanup {}

#[async_trait::async_trait]
impl switchyard::JobHandler for Cleanup {
    async fn set_up(&mut self) -> Result<(), switchyard::JobError> {
        println!("cleanup: acquiring resources");
        Ok(())
    }

    async fn perform(&mut self, ctx: &switchyard::JobContext) -> Result<(), switchyard::JobError> {
        println!("cleanup on queue {}", ctx.queue);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), switchyard::SwitchyardError> {
    switchyard::init_tracing();

    let storage = switchyard::Storage::builder().from_env()?.build()?;
    let mut registry = switchyard::HandlerRegistry::new();
    registry.register::<SendEmail>("SendEmail");
    registry.register::<Cleanup>("Cleanup");

    let ctx = switchyard::Context::new(storage, registry);
    switchyard::run_worker(ctx, switchyard::WorkerOptions::from_env()?).await
}

use std::path::PathBuf;
use std::process::Stdio;

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::io::AsyncWriteExt;

use crate::error::SwitchyardError;
use crate::failure::JobFailure;
use crate::job::{BoxedHandler, Job, JobContext, JobError};

/// How a reserved job is executed.
///
/// Unix `fork()` has no safe equivalent under an async runtime, so the
/// fault-isolation boundary is either a caught panic (in-process) or a real
/// child process fed the reserved job over stdin.
#[derive(Debug, Clone, Default)]
pub enum Isolation {
    /// Run the handler on the worker task. Panics are contained and
    /// recorded as failures; an abort-class fault takes down the whole
    /// worker.
    #[default]
    InProcess,
    /// Spawn `program args…` per job, writing the reserved job as JSON to
    /// its stdin, typically the same binary dispatching to
    /// [`crate::perform_stdin`]. A non-zero or signalled exit is recorded as
    /// a dirty exit. The child builds its own connection pool.
    Subprocess {
        program: PathBuf,
        args: Vec<String>,
    },
}

/// Runs the handler lifecycle, containing panics.
pub(crate) async fn invoke(mut handler: BoxedHandler, ctx: JobContext) -> Result<(), JobFailure> {
    let lifecycle = async move {
        handler.set_up().await?;
        handler.perform(&ctx).await?;
        handler.tear_down().await?;
        Ok::<(), JobError>(())
    };

    match AssertUnwindSafe(lifecycle).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(JobFailure::handler(&error)),
        Err(panic) => Err(JobFailure::panic(panic_message(panic))),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic occurred".to_string()
    }
}

/// Environment variable through which the parent worker hands its identity
/// to a job child process.
pub(crate) const WORKER_ID_ENV: &str = "SWITCHYARD_WORKER_ID";

/// Spawns the isolation child and feeds it the reserved job on stdin.
pub(crate) async fn spawn_child(
    program: &std::path::Path,
    args: &[String],
    worker_id: &str,
    job: &Job,
) -> Result<tokio::process::Child, SwitchyardError> {
    let payload = serde_json::to_vec(job)?;
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .env(WORKER_ID_ENV, worker_id)
        .stdin(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&payload).await?;
        stdin.shutdown().await?;
    }

    Ok(child)
}

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::context::Context;
use crate::error::SwitchyardError;
use crate::executor::{Isolation, WORKER_ID_ENV};
use crate::job::Job;
use crate::scheduler::Scheduler;
use crate::worker::Worker;

/// Runtime options for [`run_worker`], typically read from the environment.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Queue names in priority order; `*` enumerates the registry.
    pub queues: Vec<String>,
    /// Blocking-pop timeout, or the sleep between empty polls.
    pub interval: Duration,
    /// Number of concurrent worker tasks to spawn.
    pub count: usize,
    pub blocking: bool,
    pub isolation: Isolation,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            queues: vec!["*".to_string()],
            interval: Duration::from_secs(5),
            count: 1,
            blocking: false,
            isolation: Isolation::default(),
        }
    }
}

impl WorkerOptions {
    /// Reads `QUEUE` (required), `INTERVAL`, `COUNT` and `BLOCKING`.
    pub fn from_env() -> Result<Self, SwitchyardError> {
        let queue = std::env::var("QUEUE")
            .map_err(|_| SwitchyardError::config("QUEUE is not set"))?;
        let queues: Vec<String> = queue
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();
        if queues.is_empty() {
            return Err(SwitchyardError::config("QUEUE contains no queue names"));
        }

        let interval = match std::env::var("INTERVAL") {
            Ok(raw) => {
                let seconds: f64 = raw.parse().map_err(|_| {
                    SwitchyardError::Config(format!("invalid INTERVAL `{raw}`"))
                })?;
                if seconds <= 0.0 {
                    return Err(SwitchyardError::config("INTERVAL must be positive"));
                }
                Duration::from_secs_f64(seconds)
            }
            Err(_) => Duration::from_secs(5),
        };

        let count = match std::env::var("COUNT") {
            Ok(raw) => {
                let count: usize = raw
                    .parse()
                    .map_err(|_| SwitchyardError::Config(format!("invalid COUNT `{raw}`")))?;
                count.max(1)
            }
            Err(_) => 1,
        };

        Ok(Self {
            queues,
            interval,
            count,
            blocking: env_flag("BLOCKING")?,
            isolation: Isolation::default(),
        })
    }
}

/// Runtime options for [`run_scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

impl SchedulerOptions {
    /// Reads `INTERVAL` (seconds, fractional allowed).
    pub fn from_env() -> Result<Self, SwitchyardError> {
        let interval = match std::env::var("INTERVAL") {
            Ok(raw) => {
                let seconds: f64 = raw.parse().map_err(|_| {
                    SwitchyardError::Config(format!("invalid INTERVAL `{raw}`"))
                })?;
                if seconds <= 0.0 {
                    return Err(SwitchyardError::config("INTERVAL must be positive"));
                }
                Duration::from_secs_f64(seconds)
            }
            Err(_) => Self::default().interval,
        };
        Ok(Self { interval })
    }
}

/// Spawns `count` workers and runs them until they shut down (normally via
/// a process signal). Returns the first worker error, if any.
pub async fn run_worker(ctx: Context, opts: WorkerOptions) -> Result<(), SwitchyardError> {
    let mut handles = Vec::with_capacity(opts.count);
    for index in 0..opts.count {
        let mut worker = Worker::new(&ctx, opts.queues.clone())
            .interval(opts.interval)
            .blocking(opts.blocking)
            .isolation(opts.isolation.clone());
        if opts.count > 1 {
            worker = worker.indexed(index);
        }
        handles.push(tokio::spawn(async move { worker.work().await }));
    }

    for handle in handles {
        handle
            .await
            .map_err(|e| SwitchyardError::Generic(format!("worker task aborted: {e}")))??;
    }
    Ok(())
}

/// Runs the promotion daemon until a TERM/INT arrives.
pub async fn run_scheduler(ctx: Context, opts: SchedulerOptions) -> Result<(), SwitchyardError> {
    let scheduler = Scheduler::new(&ctx).interval(opts.interval);
    let token = scheduler.shutdown_token();
    tokio::spawn(async move {
        if shutdown_signal().await.is_ok() {
            token.cancel();
        }
    });
    scheduler.run().await
}

/// Child-process entry point for [`Isolation::Subprocess`]: reads one
/// reserved job as JSON from stdin and performs it through the normal
/// status, counter and failure paths. Handler failures are recorded and
/// still exit cleanly; a non-zero exit means the job could not even be
/// attempted.
pub async fn perform_stdin(ctx: Context) -> Result<(), SwitchyardError> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    let job: Job = serde_json::from_str(&input)?;

    let worker_id = std::env::var(WORKER_ID_ENV)
        .unwrap_or_else(|_| format!("{}:{}:", hostname(), std::process::id()));

    crate::worker::perform_job(&ctx, &worker_id, &job).await?;
    Ok(())
}

/// Initializes the tracing subscriber: `VVERBOSE` selects debug logging,
/// `VERBOSE` info, otherwise `RUST_LOG` (default `warn`) applies.
pub fn init_tracing() {
    let filter = if env_flag("VVERBOSE").unwrap_or(false) {
        EnvFilter::new("debug")
    } else if env_flag("VERBOSE").unwrap_or(false) {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .ok();
}

fn env_flag(name: &str) -> Result<bool, SwitchyardError> {
    match std::env::var(name) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "" | "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(SwitchyardError::Config(format!(
                "invalid boolean `{raw}` for {name}"
            ))),
        },
        Err(_) => Ok(false),
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = ctrl_c => Ok(()),
        _ = terminate.recv() => Ok(()),
    }
}

fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

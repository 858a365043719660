use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::SwitchyardError;
use crate::events::{Event, EventData};
use crate::executor::{self, Isolation};
use crate::failure::JobFailure;
use crate::job::Job;
use crate::status::StatusState;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);
const PRUNE_PERIOD: Duration = Duration::from_secs(300);

/// A long-running job processor bound to an ordered list of queues.
///
/// Each worker registers itself under `host:pid[-n]:q1,q2`, reserves
/// envelopes from its queues, executes them through the configured
/// [`Isolation`] mode and reacts to process signals between reservation
/// cycles:
///
/// | Signal | Effect |
/// |---|---|
/// | TERM, INT | finish the in-flight job, then exit |
/// | QUIT | graceful shutdown, same as TERM |
/// | PIPE | treated as a shutdown request |
/// | USR1 | SIGKILL the job child, record a dirty exit, keep going |
/// | USR2 | pause reserving |
/// | CONT | resume reserving |
pub struct Worker {
    ctx: Context,
    queues: Vec<String>,
    interval: Duration,
    blocking: bool,
    isolation: Isolation,
    id: String,
    shutdown: CancellationToken,
    paused: Arc<AtomicBool>,
    child_pid: Arc<Mutex<Option<u32>>>,
}

impl Worker {
    /// Creates a worker polling `queues` in the given priority order. The
    /// name `*` expands to every registered queue, re-enumerated (sorted) at
    /// each cycle.
    pub fn new(ctx: &Context, queues: Vec<String>) -> Self {
        let id = format!("{}:{}:{}", hostname(), std::process::id(), queues.join(","));
        Self {
            ctx: ctx.clone(),
            queues,
            interval: DEFAULT_INTERVAL,
            blocking: false,
            isolation: Isolation::default(),
            id,
            shutdown: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
            child_pid: Arc::new(Mutex::new(None)),
        }
    }

    /// Distinguishes this worker from siblings sharing the process, e.g.
    /// when a launcher spawns several worker tasks.
    pub fn indexed(mut self, index: usize) -> Self {
        self.id = format!(
            "{}:{}-{}:{}",
            hostname(),
            std::process::id(),
            index,
            self.queues.join(",")
        );
        self
    }

    /// Seconds to block on reservation (blocking mode) or to sleep after an
    /// empty poll.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Reserve with a blocking pop across all queues instead of polling them
    /// in order.
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Token that requests shutdown as if a TERM had been received.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The main loop: register, then reserve and process until shutdown is
    /// requested. Infrastructure errors during reservation are logged and
    /// followed by an interval sleep; they never kill the loop.
    pub async fn work(&self) -> Result<(), SwitchyardError> {
        tracing::info!(worker = self.id, queues = ?self.queues, blocking = self.blocking, "Worker starting");
        self.register().await?;
        if let Err(e) = self.prune_dead_workers().await {
            tracing::warn!(error = %e, "Startup orphan pruning failed");
        }

        let heartbeat = self.spawn_heartbeat();
        let signals = self.spawn_signal_listener();
        self.ctx
            .events
            .emit(Event::BeforeFirstFork, &EventData::Worker { worker: &self.id });

        let mut last_prune = Instant::now();

        while !self.shutdown.is_cancelled() {
            if self.paused.load(Ordering::SeqCst) {
                self.sleep_interval().await;
                continue;
            }

            if last_prune.elapsed() >= PRUNE_PERIOD {
                if let Err(e) = self.prune_dead_workers().await {
                    tracing::warn!(error = %e, "Periodic orphan pruning failed");
                }
                last_prune = Instant::now();
            }

            self.ctx
                .events
                .emit(Event::BeforeReserve, &EventData::Reserve { queues: &self.queues });

            let job = match self.reserve().await {
                Ok(job) => job,
                Err(e) => {
                    tracing::error!(error = %e, "Reservation failed");
                    self.sleep_interval().await;
                    continue;
                }
            };

            let Some(job) = job else {
                if !self.blocking {
                    self.sleep_interval().await;
                }
                continue;
            };

            self.ctx.events.emit(Event::AfterReserve, &EventData::Job(&job));
            self.process(job).await;
        }

        heartbeat.abort();
        signals.abort();
        self.unregister().await?;
        tracing::info!(worker = self.id, "Worker stopped");
        Ok(())
    }

    /// Reserves and processes at most one job; returns whether a job was
    /// reserved. Useful for hosts embedding their own loop and for draining
    /// queues in tests.
    pub async fn process_one(&self) -> Result<bool, SwitchyardError> {
        match self.reserve().await? {
            Some(job) => {
                self.ctx.events.emit(Event::AfterReserve, &EventData::Job(&job));
                self.process(job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Adds this worker to the registry and records its start time.
    pub async fn register(&self) -> Result<(), SwitchyardError> {
        self.ctx.storage.register_worker(&self.id).await?;
        self.ctx.storage.heartbeat(&self.id).await
    }

    /// Removes this worker and everything it owns from the registry.
    pub async fn unregister(&self) -> Result<(), SwitchyardError> {
        self.ctx.storage.clear_working_on(&self.id).await?;
        self.ctx.storage.unregister_worker(&self.id).await
    }

    async fn reserve(&self) -> Result<Option<Job>, SwitchyardError> {
        let queues = self.resolve_queues().await?;
        if self.blocking {
            let reserved = self
                .ctx
                .storage
                .blocking_pop(&queues, self.interval.as_secs_f64())
                .await?;
            Ok(reserved.map(|(queue, envelope)| Job::new(queue, envelope)))
        } else {
            for queue in &queues {
                if let Some(envelope) = self.ctx.storage.pop(queue).await? {
                    tracing::debug!(queue, "Reserved job");
                    return Ok(Some(Job::new(queue.clone(), envelope)));
                }
            }
            Ok(None)
        }
    }

    async fn resolve_queues(&self) -> Result<Vec<String>, SwitchyardError> {
        if self.queues.iter().any(|queue| queue == "*") {
            self.ctx.storage.queues().await
        } else {
            Ok(self.queues.clone())
        }
    }

    async fn process(&self, job: Job) {
        self.ctx.events.emit(Event::BeforeFork, &EventData::Job(&job));

        if let Err(e) = self.ctx.storage.set_working_on(&self.id, &job).await {
            tracing::error!(error = %e, "Could not record working-on state");
        }

        match &self.isolation {
            Isolation::InProcess => {
                if let Err(e) = perform_job(&self.ctx, &self.id, &job).await {
                    tracing::error!(error = %e, job_id = job.id(), "Job processing aborted");
                }
            }
            Isolation::Subprocess { program, args } => {
                self.run_child(program, args, &job).await;
            }
        }

        if let Err(e) = self.ctx.storage.clear_working_on(&self.id).await {
            tracing::error!(error = %e, "Could not clear working-on state");
        }
    }

    async fn run_child(&self, program: &std::path::Path, args: &[String], job: &Job) {
        let mut child = match executor::spawn_child(program, args, &self.id, job).await {
            Ok(child) => child,
            Err(e) => {
                fail_job(
                    &self.ctx,
                    &self.id,
                    job,
                    JobFailure::handler_message(format!("failed to spawn job child: {e}")),
                )
                .await;
                return;
            }
        };

        let pid = child.id();
        if let (Some(pid), Some(id)) = (pid, job.id()) {
            if let Err(e) = self.ctx.storage.set_job_pid(id, pid).await {
                tracing::warn!(error = %e, "Could not record child pid");
            }
        }
        *self.child_pid.lock().unwrap_or_else(PoisonError::into_inner) = pid;

        let status = child.wait().await;
        *self.child_pid.lock().unwrap_or_else(PoisonError::into_inner) = None;

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                let code = exit_code(status);
                fail_job(&self.ctx, &self.id, job, JobFailure::dirty_exit(code)).await;
            }
            Err(e) => {
                fail_job(
                    &self.ctx,
                    &self.id,
                    job,
                    JobFailure::handler_message(format!("failed to wait for job child: {e}")),
                )
                .await;
            }
        }
    }

    /// Unregisters every worker on this host whose process is gone, routing
    /// its abandoned working-on job to the failure sink.
    pub async fn prune_dead_workers(&self) -> Result<(), SwitchyardError> {
        let local_host = hostname();
        for worker_id in self.ctx.storage.workers().await? {
            if worker_id == self.id {
                continue;
            }
            let Some((host, pid)) = parse_worker_id(&worker_id) else {
                tracing::warn!(worker = worker_id, "Unparseable worker id in registry");
                continue;
            };
            if host != local_host || pid_alive(pid) {
                continue;
            }

            tracing::warn!(worker = worker_id, pid, "Pruning dead worker");
            if let Some(working) = self.ctx.storage.working_on(&worker_id).await? {
                let job = Job::new(working.queue, working.payload);
                fail_job(&self.ctx, &worker_id, &job, JobFailure::orphaned(&worker_id)).await;
            }
            self.ctx.storage.unregister_worker(&worker_id).await?;
        }
        Ok(())
    }

    fn spawn_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let storage = self.ctx.storage.clone();
        let id = self.id.clone();
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = storage.heartbeat(&id).await {
                    tracing::warn!(error = %e, "Heartbeat write failed");
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(HEARTBEAT_PERIOD) => {}
                }
            }
        })
    }

    fn spawn_signal_listener(&self) -> tokio::task::JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        let paused = Arc::clone(&self.paused);
        let child_pid = Arc::clone(&self.child_pid);
        tokio::spawn(async move {
            let streams = (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
                signal(SignalKind::quit()),
                signal(SignalKind::pipe()),
                signal(SignalKind::user_defined1()),
                signal(SignalKind::user_defined2()),
                signal(SignalKind::from_raw(libc::SIGCONT)),
            );
            let (Ok(mut term), Ok(mut int), Ok(mut quit), Ok(mut pipe), Ok(mut usr1), Ok(mut usr2), Ok(mut cont)) =
                streams
            else {
                tracing::error!("Could not install signal handlers");
                return;
            };

            loop {
                tokio::select! {
                    _ = term.recv() => request_shutdown(&shutdown, "TERM"),
                    _ = int.recv() => request_shutdown(&shutdown, "INT"),
                    _ = quit.recv() => request_shutdown(&shutdown, "QUIT"),
                    _ = pipe.recv() => request_shutdown(&shutdown, "PIPE"),
                    _ = usr1.recv() => kill_child(&child_pid),
                    _ = usr2.recv() => {
                        tracing::info!("USR2 received, pausing job reservation");
                        paused.store(true, Ordering::SeqCst);
                    }
                    _ = cont.recv() => {
                        tracing::info!("CONT received, resuming job reservation");
                        paused.store(false, Ordering::SeqCst);
                    }
                }
            }
        })
    }

    async fn sleep_interval(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.interval) => {}
        }
    }
}

/// Executes one reserved job through the full lifecycle: RUNNING status,
/// `AfterFork`, handler resolution, `BeforePerform` veto check, the handler
/// itself, then COMPLETE status and the processed counters. Returns whether
/// the job actually ran; vetoed and failed jobs yield `false` (failures are
/// already recorded when this returns).
pub(crate) async fn perform_job(
    ctx: &Context,
    worker_id: &str,
    job: &Job,
) -> Result<bool, SwitchyardError> {
    let prefix = job.envelope.prefix.as_deref();
    if let Some(id) = job.id() {
        ctx.storage.set_job_pid(id, std::process::id()).await?;
        ctx.storage
            .update_status(id, prefix, StatusState::Running, None)
            .await?;
    }
    ctx.events.emit(Event::AfterFork, &EventData::Job(job));

    let handler = match ctx.registry.build(job.class(), job.args().clone()) {
        Ok(handler) => handler,
        Err(SwitchyardError::NotRegistered(class)) => {
            fail_job(ctx, worker_id, job, JobFailure::resolution(&class)).await;
            return Ok(false);
        }
        Err(e) => {
            fail_job(
                ctx,
                worker_id,
                job,
                JobFailure::handler_message(format!("could not build handler: {e}")),
            )
            .await;
            return Ok(false);
        }
    };

    if ctx.events.emit(Event::BeforePerform, &EventData::Job(job)).vetoed() {
        tracing::debug!(class = job.class(), "Perform vetoed by listener");
        if let Some(id) = job.id() {
            ctx.storage.clear_job_pid(id).await?;
        }
        return Ok(false);
    }

    tracing::info!(job_id = job.id(), queue = job.queue, class = job.class(), "Job started");
    let start = Instant::now();

    match executor::invoke(handler, job.context()).await {
        Ok(()) => {
            ctx.events.emit(Event::AfterPerform, &EventData::Job(job));
            if let Some(id) = job.id() {
                ctx.storage
                    .update_status(id, prefix, StatusState::Complete, None)
                    .await?;
                ctx.storage.clear_job_pid(id).await?;
            }
            ctx.storage.incr_stat("processed", 1).await?;
            ctx.storage
                .incr_stat(&format!("processed:{worker_id}"), 1)
                .await?;
            tracing::info!(
                job_id = job.id(),
                queue = job.queue,
                class = job.class(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Job finished"
            );
            Ok(true)
        }
        Err(failure) => {
            fail_job(ctx, worker_id, job, failure).await;
            Ok(false)
        }
    }
}

/// Records a job failure: `OnFailure` event, FAILED status, the failure
/// sink, the pid record and the failed counters. Every step is best-effort;
/// errors while recording a failure are logged and swallowed so the loop
/// never recurses on a Redis outage.
pub(crate) async fn fail_job(ctx: &Context, worker_id: &str, job: &Job, failure: JobFailure) {
    tracing::error!(
        job_id = job.id(),
        queue = job.queue,
        class = job.class(),
        exception = failure.kind.exception(),
        error = failure.error,
        "Job failed"
    );
    ctx.events.emit(
        Event::OnFailure,
        &EventData::Failure {
            job,
            error: &failure.error,
        },
    );

    if let Some(id) = job.id() {
        let prefix = job.envelope.prefix.as_deref();
        if let Err(e) = ctx
            .storage
            .update_status(id, prefix, StatusState::Failed, None)
            .await
        {
            tracing::error!(error = %e, "Could not update status to failed");
        }
    }
    if let Err(e) = ctx
        .failure
        .record(&job.envelope, &job.queue, worker_id, &failure)
        .await
    {
        tracing::error!(error = %e, "Could not record job failure");
    }
    if let Some(id) = job.id() {
        if let Err(e) = ctx.storage.clear_job_pid(id).await {
            tracing::error!(error = %e, "Could not clear pid record");
        }
    }
    if let Err(e) = ctx.storage.incr_stat("failed", 1).await {
        tracing::error!(error = %e, "Could not increment failed counter");
    }
    if let Err(e) = ctx
        .storage
        .incr_stat(&format!("failed:{worker_id}"), 1)
        .await
    {
        tracing::error!(error = %e, "Could not increment per-worker failed counter");
    }
}

fn request_shutdown(token: &CancellationToken, signal_name: &str) {
    tracing::info!(signal = signal_name, "Shutdown requested");
    token.cancel();
}

fn kill_child(slot: &Mutex<Option<u32>>) {
    let pid = *slot.lock().unwrap_or_else(PoisonError::into_inner);
    match pid {
        Some(pid) => {
            tracing::warn!(pid, "USR1 received, killing job child");
            #[allow(unsafe_code)]
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGKILL);
            }
        }
        None => tracing::warn!("USR1 received but no job child is running"),
    }
}

/// Probes liveness with a null signal.
#[allow(unsafe_code)]
fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

/// Splits a `host:pid[-n]:queues` worker id into its host and pid.
fn parse_worker_id(id: &str) -> Option<(&str, u32)> {
    let (host, rest) = id.split_once(':')?;
    let (pid_part, _queues) = rest.split_once(':')?;
    let pid_digits = pid_part.split('-').next()?;
    let pid = pid_digits.parse().ok()?;
    Some((host, pid))
}

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::SwitchyardError;
use crate::job_envelope::JobEnvelope;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Delayed-job promotion daemon.
///
/// One scheduler process per deployment moves envelopes whose timestamp has
/// arrived from the delayed lists onto their destination queues. The loop is
/// stateless between iterations: every successful promotion is a durable
/// Redis operation, and cleanup-after-pop keeps the schedule sorted set
/// consistent with the per-timestamp lists.
pub struct Scheduler {
    ctx: Context,
    interval: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            interval: DEFAULT_INTERVAL,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Token that stops the promotion loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the promotion loop until the shutdown token fires. Transport
    /// errors are logged and followed by a normal interval sleep, so a Redis
    /// outage never turns into a tight loop.
    pub async fn run(&self) -> Result<(), SwitchyardError> {
        tracing::info!(interval = ?self.interval, "Starting delayed-job scheduler");

        loop {
            if self.shutdown.is_cancelled() {
                tracing::info!("Scheduler stopped");
                return Ok(());
            }

            if let Err(e) = self.promote_ready().await {
                tracing::error!(error = %e, "Promotion pass failed");
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Scheduler stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Drains every timestamp due now. Returns the number of promoted jobs.
    pub async fn promote_ready(&self) -> Result<usize, SwitchyardError> {
        self.promote_due(chrono::Utc::now().timestamp()).await
    }

    /// Drains every timestamp at or before `at`.
    pub async fn promote_due(&self, at: i64) -> Result<usize, SwitchyardError> {
        let mut promoted = 0;
        while let Some(timestamp) = self.ctx.storage.next_delayed_timestamp(Some(at)).await? {
            while let Some(envelope) = self.ctx.storage.next_item_for_timestamp(timestamp).await? {
                self.promote(timestamp, envelope).await?;
                promoted += 1;
            }
        }
        if promoted > 0 {
            tracing::info!(promoted, "Promoted delayed jobs");
        }
        Ok(promoted)
    }

    /// Pushes one delayed envelope onto its destination queue, preserving
    /// the stored envelope as-is. Delivery is at-least-once: when the push
    /// fails the envelope is re-inserted at the head of its timestamp list
    /// before the error propagates.
    async fn promote(
        &self,
        timestamp: i64,
        envelope: JobEnvelope,
    ) -> Result<(), SwitchyardError> {
        let Some(queue) = envelope.queue.clone() else {
            tracing::warn!(
                timestamp,
                class = envelope.class,
                "Dropping delayed entry without a destination queue"
            );
            return Ok(());
        };

        tracing::debug!(queue, class = envelope.class, timestamp, "Promoting delayed job");
        match self.ctx.storage.push(&queue, &envelope).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(requeue_error) = self.ctx.storage.requeue_delayed(timestamp, &envelope).await
                {
                    tracing::error!(
                        error = %requeue_error,
                        timestamp,
                        "Could not re-insert delayed job after a failed promotion"
                    );
                }
                Err(e)
            }
        }
    }
}

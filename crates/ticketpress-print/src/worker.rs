// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print worker: the single consumer of the job queue.
//
// One job at a time: claim (short locked transaction), render, deliver over
// raw TCP, finalize.  A failed job is requeued on its own.  Rows stuck in
// `printing` are swept back into the retry cycle at startup and again after
// any storage error, since with a single worker no other claim can be in
// flight at those points.
//
// `JobQueue` is synchronous and may wait on the SQLite busy timeout, so
// every queue call runs on the blocking thread pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, watch};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use ticketpress_core::AppConfig;
use ticketpress_core::error::{Result, TicketpressError};
use ticketpress_core::types::{ClaimedJob, JobId};

use crate::queue::JobQueue;
use crate::raw_client::RawTcpTransport;
use crate::receipt;
use crate::retry::{RetryPolicy, classify_error};

/// `last_error` recorded for jobs found in `printing` at startup.
pub const STRANDED_ERROR: &str = "worker stopped while the job was printing";

/// `last_error` recorded for jobs whose outcome could not be written.
pub const UNRECORDED_ERROR: &str = "job outcome could not be recorded";

/// Outcome of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing eligible (empty queue, backoff pending, or printer disabled).
    Idle,
    /// Job delivered and marked done.
    Printed(JobId),
    /// Delivery failed; job requeued with backoff.
    Failed { job_id: JobId, error: String },
}

/// Long-running consumer that drains the queue into the printer.
pub struct PrintWorker {
    queue: Arc<Mutex<JobQueue>>,
    transport: RawTcpTransport,
    policy: RetryPolicy,
    idle_interval: Duration,
    wake: Arc<Notify>,
    polls: Arc<AtomicU64>,
}

impl PrintWorker {
    pub fn new(queue: Arc<Mutex<JobQueue>>, config: &AppConfig) -> Self {
        Self {
            queue,
            transport: RawTcpTransport::from_config(config),
            policy: RetryPolicy::from_config(config),
            idle_interval: config.idle_interval(),
            wake: Arc::new(Notify::new()),
            polls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Share a wake signal with producers so an idle worker polls at once.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = wake;
        self
    }

    /// Counter of claim attempts, readable while the worker runs.
    pub fn poll_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.polls)
    }

    async fn with_queue<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut JobQueue) -> Result<T> + Send + 'static,
    {
        let queue = Arc::clone(&self.queue);
        tokio::task::spawn_blocking(move || {
            let mut queue = queue
                .lock()
                .map_err(|_| TicketpressError::Persistence("queue lock poisoned".into()))?;
            f(&mut queue)
        })
        .await
        .map_err(|e| TicketpressError::Persistence(format!("queue task failed: {e}")))?
    }

    /// Move jobs orphaned in `printing` by a previous run back into the
    /// retry cycle.
    pub async fn recover_stranded(&self) -> Result<usize> {
        self.sweep_printing(STRANDED_ERROR).await
    }

    async fn sweep_printing(&self, reason: &'static str) -> Result<usize> {
        let next_run_at = self.policy.next_run_at(Utc::now());
        self.with_queue(move |queue| queue.recover_stranded(reason, next_run_at))
            .await
    }

    /// Run a single claim/deliver/finalize cycle without sleeping.
    ///
    /// Delivery failures are absorbed into `Tick::Failed`; only database
    /// errors are returned as `Err`.
    pub async fn run_once(&self) -> Result<Tick> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        trace!("looking for next print job");

        let Some(claimed) = self
            .with_queue(|queue| queue.claim_next(Utc::now()))
            .await?
        else {
            return Ok(Tick::Idle);
        };

        let span = info_span!("job", job.id = %claimed.job.id, attempts = claimed.job.attempts);
        self.process(&claimed).instrument(span).await
    }

    async fn process(&self, claimed: &ClaimedJob) -> Result<Tick> {
        let job_id = claimed.job.id;
        match self.deliver(claimed).await {
            Ok(sent) => {
                if let Err(err) = self.with_queue(move |queue| queue.mark_done(job_id)).await {
                    // Already printed; a requeue may reprint the ticket.
                    error!(error = %err, "failed to mark job done");
                    self.requeue(job_id, err.to_string()).await;
                    return Err(err);
                }
                info!(bytes = sent, "job printed");
                Ok(Tick::Printed(job_id))
            }
            Err(err) => {
                warn!(
                    error = %err,
                    kind = classify_error(&err).as_str(),
                    "print attempt failed"
                );
                let error = err.to_string();
                let next_run_at = self.policy.next_run_at(Utc::now());
                let recorded = error.clone();
                self.with_queue(move |queue| queue.requeue_failed(job_id, &recorded, next_run_at))
                    .await?;
                Ok(Tick::Failed { job_id, error })
            }
        }
    }

    async fn deliver(&self, claimed: &ClaimedJob) -> Result<usize> {
        let body = receipt::render_stored(&claimed.job.payload)?;
        debug!(
            printer = %claimed.printer.address(),
            bytes = body.len(),
            "rendered ticket"
        );
        self.transport
            .send(&claimed.printer.ip_address, claimed.printer.port, body.as_bytes())
            .await
    }

    async fn requeue(&self, job_id: JobId, error: String) {
        let next_run_at = self.policy.next_run_at(Utc::now());
        if let Err(requeue_err) = self
            .with_queue(move |queue| queue.requeue_failed(job_id, &error, next_run_at))
            .await
        {
            error!(
                error = %requeue_err,
                "could not requeue job; it will be swept before the next claim"
            );
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// An in-flight delivery always completes before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        match self.recover_stranded().await {
            Ok(0) => {}
            Ok(count) => info!(count, "startup sweep requeued stranded jobs"),
            Err(err) => error!(error = %err, "startup sweep failed"),
        }

        info!(idle_ms = self.idle_interval.as_millis(), "print worker started");

        let mut sweep_pending = false;
        loop {
            if *shutdown.borrow() {
                break;
            }

            // A storage error may have left the current job in `printing`,
            // where no claim can see it.
            if sweep_pending {
                match self.sweep_printing(UNRECORDED_ERROR).await {
                    Ok(count) => {
                        sweep_pending = false;
                        if count > 0 {
                            warn!(count, "requeued jobs left in printing after a storage error");
                        }
                    }
                    Err(err) => error!(error = %err, "sweep after storage error failed"),
                }
            }

            let (pause, wakeable) = match self.run_once().await {
                Ok(Tick::Printed(_)) => continue,
                Ok(Tick::Idle) => {
                    trace!(
                        "no eligible print jobs; polling again in {:?}",
                        self.idle_interval
                    );
                    (self.idle_interval, true)
                }
                Ok(Tick::Failed { .. }) => (self.policy.error_pause, false),
                Err(err) => {
                    error!(
                        error = %err,
                        kind = classify_error(&err).as_str(),
                        "print worker iteration failed"
                    );
                    sweep_pending = true;
                    (self.policy.error_pause, false)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.wake.notified(), if wakeable => {
                    debug!("woken by new submission");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            polls = self.polls.load(Ordering::Relaxed),
            "print worker stopped"
        );
    }
}

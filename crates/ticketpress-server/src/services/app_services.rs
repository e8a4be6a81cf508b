// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer — opens the job database and provides the
// operations the HTTP handlers call.
//
// The rusqlite-backed JobQueue is `Send` but not `Sync`, so it is wrapped in
// `Arc<Mutex<>>` for sharing across request tasks.  Every method here is
// synchronous and may wait on the SQLite busy timeout; async callers run
// them through `AppServices::blocking`.  The print worker gets its own
// connection to the same file.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::Notify;
use tracing::{info, warn};

use ticketpress_core::AppConfig;
use ticketpress_core::error::{Result, TicketpressError};
use ticketpress_core::types::{
    JobId, JobStats, JobStatus, PrintJob, PrinterSettings, PrinterSettingsUpdate,
};
use ticketpress_print::{JobProducer, JobQueue, PrintWorker};

/// Shared services handed to every request handler.
///
/// All fields are cheaply cloneable (Arc-wrapped).
#[derive(Clone)]
pub struct AppServices {
    job_queue: Arc<Mutex<JobQueue>>,
    producer: JobProducer,
    wake: Arc<Notify>,
    /// `None` for in-memory databases, which cannot be opened twice.
    database_path: Option<PathBuf>,
    config: Arc<AppConfig>,
}

impl AppServices {
    /// Open the database named in `config`, creating its directory and the
    /// schema if needed.
    pub fn init(config: AppConfig) -> Result<Self> {
        let path = config.database_path.clone();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!(path = %path.display(), "initialising app services");

        let queue = JobQueue::open(&path)?;
        Self::build(queue, Some(path), config)
    }

    /// Services backed by an in-memory database.  The worker shares the
    /// request handlers' connection.
    pub fn in_memory(config: AppConfig) -> Result<Self> {
        let queue = JobQueue::open_in_memory()?;
        Self::build(queue, None, config)
    }

    fn build(queue: JobQueue, database_path: Option<PathBuf>, config: AppConfig) -> Result<Self> {
        // Seed the settings row so administrators always read a full record.
        let settings = queue.settings().get()?;
        if settings.is_usable() {
            info!(printer = %settings.address(), "printer settings loaded");
        } else {
            warn!(
                printer = %settings.address(),
                enabled = settings.enabled,
                "printer not configured; jobs stay queued until it is"
            );
        }

        let job_queue = Arc::new(Mutex::new(queue));
        let wake = Arc::new(Notify::new());
        Ok(Self {
            producer: JobProducer::new(Arc::clone(&job_queue), Arc::clone(&wake)),
            job_queue,
            wake,
            database_path,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Build the print worker, wired to this service's wake signal.
    pub fn print_worker(&self) -> Result<PrintWorker> {
        let queue = match &self.database_path {
            Some(path) => Arc::new(Mutex::new(JobQueue::open(path)?)),
            None => Arc::clone(&self.job_queue),
        };
        Ok(PrintWorker::new(queue, &self.config).with_wake(Arc::clone(&self.wake)))
    }

    /// Run a synchronous service call on the blocking thread pool.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&AppServices) -> Result<T> + Send + 'static,
    {
        let services = self.clone();
        tokio::task::spawn_blocking(move || f(&services))
            .await
            .map_err(|e| TicketpressError::Persistence(format!("queue task failed: {e}")))?
    }

    fn queue(&self) -> Result<MutexGuard<'_, JobQueue>> {
        self.job_queue
            .lock()
            .map_err(|_| TicketpressError::Persistence("queue lock poisoned".into()))
    }

    // -- Jobs ----------------------------------------------------------------

    /// Validate and enqueue an untrusted submission.
    pub fn submit(&self, body: Value) -> Result<JobId> {
        self.producer.submit(body)
    }

    pub fn get_job(&self, job_id: JobId) -> Result<Option<PrintJob>> {
        self.queue()?.get_job(job_id)
    }

    pub fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<PrintJob>> {
        self.queue()?.list_jobs(status, limit)
    }

    pub fn stats(&self) -> Result<JobStats> {
        self.queue()?.stats()
    }

    // -- Printer settings ----------------------------------------------------

    pub fn printer_settings(&self) -> Result<PrinterSettings> {
        self.queue()?.settings().get()
    }

    pub fn update_printer_settings(
        &self,
        update: &PrinterSettingsUpdate,
    ) -> Result<PrinterSettings> {
        let settings = self.queue()?.settings().set(update)?;
        info!(
            printer = %settings.address(),
            enabled = settings.enabled,
            usable = settings.is_usable(),
            "printer settings updated"
        );
        // A newly enabled printer should start draining without waiting
        // out the idle interval.
        self.wake.notify_one();
        Ok(settings)
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable print job queue backed by SQLite.
//
// Producers append rows in `queued` state; the worker claims one row at a
// time, moves it to `printing`, and finalizes it to `done` or `failed`.
// Claiming runs inside a `BEGIN IMMEDIATE` transaction, which takes the
// database write lock before the eligible row is selected, so two workers
// (even in different processes) can never claim the same job.  The lock is
// released as soon as the row is marked `printing`; the slow network write
// happens outside any transaction.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info, instrument, warn};

use ticketpress_core::error::{Result, TicketpressError};
use ticketpress_core::types::{
    ClaimedJob, JobId, JobPayload, JobStats, JobStatus, PrintJob, PrinterSettings,
};

use crate::settings::SettingsStore;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Schema for both tables.  The settings row is pinned to `id = 1`.
const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS print_jobs (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        payload     TEXT    NOT NULL,
        status      TEXT    NOT NULL DEFAULT 'queued'
                    CHECK (status IN ('queued', 'printing', 'done', 'failed')),
        attempts    INTEGER NOT NULL DEFAULT 0,
        last_error  TEXT,
        next_run_at TEXT,
        created_at  TEXT    NOT NULL,
        updated_at  TEXT    NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_print_jobs_eligible
        ON print_jobs (status, next_run_at);

    CREATE TABLE IF NOT EXISTS printer_settings (
        id         INTEGER PRIMARY KEY CHECK (id = 1),
        ip_address TEXT    NOT NULL DEFAULT '',
        port       INTEGER NOT NULL DEFAULT 9100,
        enabled    INTEGER NOT NULL DEFAULT 0
    );
"#;

const JOB_COLUMNS: &str =
    "id, payload, status, attempts, last_error, next_run_at, created_at, updated_at";

/// Oldest eligible job, joined against an enabled and configured printer.
const CLAIM_SQL: &str = r#"
    SELECT j.id, j.payload, j.status, j.attempts, j.last_error,
           j.next_run_at, j.created_at, j.updated_at,
           s.ip_address, s.port, s.enabled
    FROM print_jobs j
    JOIN printer_settings s
      ON s.id = 1 AND s.enabled = 1 AND trim(s.ip_address) <> ''
    WHERE j.status IN ('queued', 'failed')
      AND (j.next_run_at IS NULL OR j.next_run_at <= ?1)
    ORDER BY j.id ASC
    LIMIT 1
"#;

/// Persistent job queue backed by a SQLite database.
///
/// All methods are synchronous because `rusqlite` does not support async
/// natively, and a call may wait up to the busy timeout.  Async callers run
/// each call under `spawn_blocking` and never hold the surrounding mutex
/// across an `.await`.
pub struct JobQueue {
    conn: Connection,
}

impl JobQueue {
    /// Open (or create) the queue database at the given path.
    ///
    /// Enables WAL so the HTTP server and the worker can use separate
    /// connections, and sets a busy timeout so a writer waits for the claim
    /// lock instead of failing.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| TicketpressError::Persistence(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| TicketpressError::Persistence(format!("WAL pragma: {e}")))?;

        let queue = Self::init(conn)?;
        info!("job queue database opened");
        Ok(queue)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TicketpressError::Persistence(format!("open in-memory: {e}")))?;

        let queue = Self::init(conn)?;
        debug!("in-memory job queue database opened");
        Ok(queue)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| TicketpressError::Persistence(format!("busy timeout: {e}")))?;
        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| TicketpressError::Persistence(format!("create tables: {e}")))?;
        Ok(Self { conn })
    }

    /// Access the printer settings singleton stored in the same database.
    pub fn settings(&self) -> SettingsStore<'_> {
        SettingsStore::new(&self.conn)
    }

    /// Append a new job in `queued` state and return its id.
    #[instrument(skip(self, payload), fields(kind = %payload.kind))]
    pub fn enqueue(&self, payload: &JobPayload) -> Result<JobId> {
        let payload_json = serde_json::to_string(payload)?;
        let now = encode_ts(Utc::now());

        self.conn
            .execute(
                "INSERT INTO print_jobs (payload, status, attempts, next_run_at, created_at, updated_at)
                 VALUES (?1, 'queued', 0, NULL, ?2, ?2)",
                params![payload_json, now],
            )
            .map_err(|e| TicketpressError::Persistence(format!("insert job: {e}")))?;

        let id = JobId(self.conn.last_insert_rowid());
        info!(job_id = %id, "job inserted into queue");
        Ok(id)
    }

    /// Claim the oldest eligible job and mark it `printing`.
    ///
    /// Returns `None` when nothing is eligible at `now`, which includes the
    /// case where the printer is disabled or has no address.
    pub fn claim_next(&mut self, now: DateTime<Utc>) -> Result<Option<ClaimedJob>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| TicketpressError::Persistence(format!("begin claim: {e}")))?;

        let claimed = tx
            .query_row(CLAIM_SQL, params![encode_ts(now)], |row| {
                let job = row_to_print_job(row)?;
                let printer = PrinterSettings {
                    ip_address: row.get(8)?,
                    port: row.get(9)?,
                    enabled: row.get(10)?,
                };
                Ok(ClaimedJob { job, printer })
            })
            .optional()
            .map_err(|e| TicketpressError::Persistence(format!("select eligible job: {e}")))?;

        let Some(mut claimed) = claimed else {
            tx.commit()
                .map_err(|e| TicketpressError::Persistence(format!("commit idle poll: {e}")))?;
            return Ok(None);
        };

        let updated_at = Utc::now();
        tx.execute(
            "UPDATE print_jobs SET status = 'printing', updated_at = ?1 WHERE id = ?2",
            params![encode_ts(updated_at), claimed.job.id.0],
        )
        .map_err(|e| TicketpressError::Persistence(format!("mark printing: {e}")))?;

        tx.commit()
            .map_err(|e| TicketpressError::Persistence(format!("commit claim: {e}")))?;

        claimed.job.status = JobStatus::Printing;
        claimed.job.updated_at = updated_at;
        debug!(job_id = %claimed.job.id, printer = %claimed.printer.address(), "job claimed");
        Ok(Some(claimed))
    }

    /// Finalize a delivered job.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn mark_done(&self, job_id: JobId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE print_jobs SET status = 'done', next_run_at = NULL, updated_at = ?1
                 WHERE id = ?2",
                params![encode_ts(Utc::now()), job_id.0],
            )
            .map_err(|e| TicketpressError::Persistence(format!("mark done: {e}")))?;

        if rows == 0 {
            return Err(TicketpressError::Persistence(format!("job {job_id} not found")));
        }
        debug!("job marked done");
        Ok(())
    }

    /// Record a failed attempt for one job and schedule its retry.
    #[instrument(skip(self, error), fields(job_id = %job_id))]
    pub fn requeue_failed(
        &self,
        job_id: JobId,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE print_jobs
                 SET status = 'failed', attempts = attempts + 1, last_error = ?1,
                     next_run_at = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![error, encode_ts(next_run_at), encode_ts(Utc::now()), job_id.0],
            )
            .map_err(|e| TicketpressError::Persistence(format!("requeue failed job: {e}")))?;

        if rows == 0 {
            return Err(TicketpressError::Persistence(format!("job {job_id} not found")));
        }
        debug!(%next_run_at, "job requeued after failure");
        Ok(())
    }

    /// Move every job left in `printing` to `failed` and schedule a retry.
    ///
    /// Called when a worker starts and after a worker-side storage error:
    /// with a single worker, any `printing` row at those points has no
    /// delivery in flight.  Returns the number of rows recovered.
    #[instrument(skip(self, error))]
    pub fn recover_stranded(&self, error: &str, next_run_at: DateTime<Utc>) -> Result<usize> {
        let rows = self
            .conn
            .execute(
                "UPDATE print_jobs
                 SET status = 'failed', attempts = attempts + 1, last_error = ?1,
                     next_run_at = ?2, updated_at = ?3
                 WHERE status = 'printing'",
                params![error, encode_ts(next_run_at), encode_ts(Utc::now())],
            )
            .map_err(|e| TicketpressError::Persistence(format!("recover stranded jobs: {e}")))?;

        if rows > 0 {
            warn!(count = rows, "recovered jobs stranded in printing");
        }
        Ok(rows)
    }

    /// Retrieve a single job by its ID.
    pub fn get_job(&self, job_id: JobId) -> Result<Option<PrintJob>> {
        self.conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM print_jobs WHERE id = ?1"),
                params![job_id.0],
                row_to_print_job,
            )
            .optional()
            .map_err(|e| TicketpressError::Persistence(format!("get job: {e}")))
    }

    /// List jobs newest first, optionally restricted to one status.
    pub fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<PrintJob>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM print_jobs
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY id DESC
                 LIMIT ?2"
            ))
            .map_err(|e| TicketpressError::Persistence(format!("prepare list jobs: {e}")))?;

        let jobs = stmt
            .query_map(params![status.map(|s| s.as_str()), limit], row_to_print_job)
            .map_err(|e| TicketpressError::Persistence(format!("query list jobs: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TicketpressError::Persistence(format!("collect rows: {e}")))?;

        debug!(count = jobs.len(), "listed jobs");
        Ok(jobs)
    }

    /// Count jobs per status.
    pub fn stats(&self) -> Result<JobStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM print_jobs GROUP BY status")
            .map_err(|e| TicketpressError::Persistence(format!("prepare stats: {e}")))?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| TicketpressError::Persistence(format!("query stats: {e}")))?;

        let mut stats = JobStats::default();
        for row in rows {
            let (status, count) =
                row.map_err(|e| TicketpressError::Persistence(format!("stats row: {e}")))?;
            let count = u64::try_from(count).unwrap_or(0);
            match JobStatus::parse(&status) {
                Some(JobStatus::Queued) => stats.queued = count,
                Some(JobStatus::Printing) => stats.printing = count,
                Some(JobStatus::Done) => stats.done = count,
                Some(JobStatus::Failed) => stats.failed = count,
                None => warn!(%status, "unknown status label in print_jobs"),
            }
        }
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Timestamps and row mapping
// ---------------------------------------------------------------------------

/// Fixed-width UTC encoding so that string comparison in SQL is
/// chronological.
pub(crate) fn encode_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decode_ts(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Map a SQLite row to a `PrintJob`.
///
/// Column indices must match `JOB_COLUMNS` (and the first eight columns of
/// `CLAIM_SQL`).
fn row_to_print_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrintJob> {
    let status_label: String = row.get(2)?;
    let status = JobStatus::parse(&status_label).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown job status {status_label:?}").into(),
        )
    })?;

    let next_run_at = row
        .get::<_, Option<String>>(5)?
        .map(|text| decode_ts(5, &text))
        .transpose()?;
    let created_at = decode_ts(6, &row.get::<_, String>(6)?)?;
    let updated_at = decode_ts(7, &row.get::<_, String>(7)?)?;

    Ok(PrintJob {
        id: JobId(row.get(0)?),
        payload: row.get(1)?,
        status,
        attempts: row.get(3)?,
        last_error: row.get(4)?,
        next_run_at,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use ticketpress_core::types::PrinterSettingsUpdate;

    fn receipt() -> JobPayload {
        JobPayload::new("receipt", json!({ "text": "1 x Pho Bo" }))
    }

    fn enable_printer(queue: &JobQueue) {
        queue
            .settings()
            .set(&PrinterSettingsUpdate {
                ip_address: Some("127.0.0.1".into()),
                port: Some(9100),
                enabled: Some(true),
            })
            .expect("enable printer");
    }

    fn ready_queue() -> JobQueue {
        let queue = JobQueue::open_in_memory().expect("open in-memory db");
        enable_printer(&queue);
        queue
    }

    #[test]
    fn enqueue_creates_queued_row() {
        let queue = JobQueue::open_in_memory().expect("open in-memory db");
        let id = queue.enqueue(&receipt()).expect("enqueue");

        let job = queue.get_job(id).expect("get_job").expect("found");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert!(job.next_run_at.is_none());
        assert!(job.last_error.is_none());
        let payload: JobPayload = serde_json::from_str(&job.payload).expect("payload");
        assert_eq!(payload, receipt());
    }

    #[test]
    fn ids_are_monotonic() {
        let queue = JobQueue::open_in_memory().expect("open in-memory db");
        let a = queue.enqueue(&receipt()).expect("enqueue a");
        let b = queue.enqueue(&receipt()).expect("enqueue b");
        assert!(b > a);
    }

    #[test]
    fn claim_takes_oldest_first_and_marks_printing() {
        let mut queue = ready_queue();
        let first = queue.enqueue(&receipt()).expect("enqueue 1");
        let second = queue.enqueue(&receipt()).expect("enqueue 2");

        let claimed = queue.claim_next(Utc::now()).expect("claim").expect("a job");
        assert_eq!(claimed.job.id, first);
        assert_eq!(claimed.job.status, JobStatus::Printing);
        assert_eq!(claimed.printer.address(), "127.0.0.1:9100");

        let stored = queue.get_job(first).expect("get").expect("found");
        assert_eq!(stored.status, JobStatus::Printing);

        let next = queue.claim_next(Utc::now()).expect("claim").expect("a job");
        assert_eq!(next.job.id, second);
        assert!(queue.claim_next(Utc::now()).expect("claim").is_none());
    }

    #[test]
    fn disabled_printer_blocks_all_claims() {
        let mut queue = ready_queue();
        for _ in 0..3 {
            queue.enqueue(&receipt()).expect("enqueue");
        }
        queue
            .settings()
            .set(&PrinterSettingsUpdate {
                enabled: Some(false),
                ..Default::default()
            })
            .expect("disable");

        assert!(queue.claim_next(Utc::now()).expect("claim").is_none());
        assert_eq!(queue.stats().expect("stats").queued, 3);
    }

    #[test]
    fn missing_settings_row_blocks_claims() {
        let mut queue = JobQueue::open_in_memory().expect("open in-memory db");
        queue.enqueue(&receipt()).expect("enqueue");
        assert!(queue.claim_next(Utc::now()).expect("claim").is_none());
    }

    #[test]
    fn unconfigured_address_blocks_claims() {
        let mut queue = JobQueue::open_in_memory().expect("open in-memory db");
        queue
            .settings()
            .set(&PrinterSettingsUpdate {
                enabled: Some(true),
                ..Default::default()
            })
            .expect("enable without address");
        queue.enqueue(&receipt()).expect("enqueue");
        assert!(queue.claim_next(Utc::now()).expect("claim").is_none());
    }

    #[test]
    fn blank_address_blocks_claims() {
        let mut queue = JobQueue::open_in_memory().expect("open in-memory db");
        let settings = queue
            .settings()
            .set(&PrinterSettingsUpdate {
                ip_address: Some("   ".into()),
                port: None,
                enabled: Some(true),
            })
            .expect("enable with blank address");
        assert!(!settings.is_usable());

        queue.enqueue(&receipt()).expect("enqueue");
        assert!(queue.claim_next(Utc::now()).expect("claim").is_none());
    }

    #[test]
    fn failed_job_waits_for_next_run_at() {
        let mut queue = ready_queue();
        let id = queue.enqueue(&receipt()).expect("enqueue");
        let now = Utc::now();

        queue.claim_next(now).expect("claim").expect("a job");
        queue
            .requeue_failed(id, "connection refused", now + ChronoDuration::seconds(10))
            .expect("requeue");

        assert!(queue.claim_next(now + ChronoDuration::seconds(9)).expect("claim").is_none());

        let again = queue
            .claim_next(now + ChronoDuration::seconds(10))
            .expect("claim")
            .expect("eligible again");
        assert_eq!(again.job.id, id);
        assert_eq!(again.job.attempts, 1);
        assert_eq!(again.job.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn attempts_increase_by_one_per_failure() {
        let mut queue = ready_queue();
        let id = queue.enqueue(&receipt()).expect("enqueue");
        let mut now = Utc::now();

        for expected in 1..=4u32 {
            queue.claim_next(now).expect("claim").expect("eligible");
            let next = now + ChronoDuration::seconds(10);
            queue.requeue_failed(id, "timeout", next).expect("requeue");

            let job = queue.get_job(id).expect("get").expect("found");
            assert_eq!(job.attempts, expected);
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.next_run_at.map(encode_ts), Some(encode_ts(next)));
            now = next;
        }
    }

    #[test]
    fn done_jobs_are_never_reclaimed() {
        let mut queue = ready_queue();
        let id = queue.enqueue(&receipt()).expect("enqueue");
        queue.claim_next(Utc::now()).expect("claim").expect("a job");
        queue.mark_done(id).expect("done");

        let job = queue.get_job(id).expect("get").expect("found");
        assert_eq!(job.status, JobStatus::Done);
        assert!(queue
            .claim_next(Utc::now() + ChronoDuration::days(1))
            .expect("claim")
            .is_none());
    }

    #[test]
    fn recover_stranded_only_touches_printing_rows() {
        let mut queue = ready_queue();
        let stranded = queue.enqueue(&receipt()).expect("enqueue 1");
        let waiting = queue.enqueue(&receipt()).expect("enqueue 2");
        queue.claim_next(Utc::now()).expect("claim").expect("a job");

        let next = Utc::now() + ChronoDuration::seconds(10);
        let count = queue.recover_stranded("interrupted", next).expect("recover");
        assert_eq!(count, 1);

        let job = queue.get_job(stranded).expect("get").expect("found");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("interrupted"));

        let untouched = queue.get_job(waiting).expect("get").expect("found");
        assert_eq!(untouched.status, JobStatus::Queued);
        assert_eq!(untouched.attempts, 0);
    }

    #[test]
    fn finalizing_unknown_job_is_an_error() {
        let queue = JobQueue::open_in_memory().expect("open in-memory db");
        assert!(queue.mark_done(JobId(42)).is_err());
        assert!(queue.requeue_failed(JobId(42), "x", Utc::now()).is_err());
    }

    #[test]
    fn list_and_stats() {
        let mut queue = ready_queue();
        let a = queue.enqueue(&receipt()).expect("enqueue a");
        let b = queue.enqueue(&receipt()).expect("enqueue b");
        let c = queue.enqueue(&receipt()).expect("enqueue c");
        queue.claim_next(Utc::now()).expect("claim").expect("a");
        queue.mark_done(a).expect("done");

        let all = queue.list_jobs(None, 10).expect("list");
        assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![c, b, a]);

        let queued = queue.list_jobs(Some(JobStatus::Queued), 1).expect("list queued");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, c);

        let stats = queue.stats().expect("stats");
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.done, 1);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn timestamps_sort_lexically() {
        let early = Utc::now();
        let late = early + ChronoDuration::milliseconds(1);
        assert!(encode_ts(early) < encode_ts(late));
        assert!(encode_ts(early).ends_with('Z'));
    }

    #[test]
    fn concurrent_workers_never_claim_the_same_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jobs.db");

        let queue = JobQueue::open(&path).expect("open");
        enable_printer(&queue);
        let total = 40;
        for _ in 0..total {
            queue.enqueue(&receipt()).expect("enqueue");
        }
        drop(queue);

        let workers = 4;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let mut queue = JobQueue::open(&path).expect("open worker connection");
                    barrier.wait();
                    let mut claimed = Vec::new();
                    while let Some(job) = queue.claim_next(Utc::now()).expect("claim") {
                        claimed.push(job.job.id);
                    }
                    claimed
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut count = 0;
        for handle in handles {
            for id in handle.join().expect("worker thread") {
                count += 1;
                assert!(seen.insert(id), "job {id} claimed twice");
            }
        }
        assert_eq!(count, total);
    }
}

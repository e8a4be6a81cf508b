// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job producer: validate a submission, append it to the queue, wake the
// worker.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, warn};

use ticketpress_core::error::{Result, TicketpressError};
use ticketpress_core::types::{JobId, JobPayload};

use crate::queue::JobQueue;

/// Cheaply cloneable handle used by request handlers.
#[derive(Clone)]
pub struct JobProducer {
    queue: Arc<Mutex<JobQueue>>,
    wake: Arc<Notify>,
}

impl JobProducer {
    pub fn new(queue: Arc<Mutex<JobQueue>>, wake: Arc<Notify>) -> Self {
        Self { queue, wake }
    }

    /// Validate an untrusted JSON body and enqueue it.
    pub fn submit(&self, body: Value) -> Result<JobId> {
        let payload = JobPayload::from_value(body).inspect_err(|e| {
            debug!(error = %e, "rejected print submission");
        })?;
        self.submit_payload(&payload)
    }

    /// Enqueue an already validated payload.
    pub fn submit_payload(&self, payload: &JobPayload) -> Result<JobId> {
        let id = {
            let queue = self
                .queue
                .lock()
                .map_err(|_| TicketpressError::Persistence("queue lock poisoned".into()))?;
            queue.enqueue(payload).inspect_err(|e| {
                warn!(error = %e, "failed to persist print job");
            })?
        };

        // A stored permit wakes the worker even if it is mid-delivery.
        self.wake.notify_one();
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ticketpress_core::types::JobStatus;

    fn producer() -> (JobProducer, Arc<Mutex<JobQueue>>, Arc<Notify>) {
        let queue = Arc::new(Mutex::new(JobQueue::open_in_memory().expect("open")));
        let wake = Arc::new(Notify::new());
        (
            JobProducer::new(Arc::clone(&queue), Arc::clone(&wake)),
            queue,
            wake,
        )
    }

    #[test]
    fn valid_submission_is_queued() {
        let (producer, queue, _) = producer();
        let id = producer
            .submit(json!({ "type": "receipt", "content": { "text": "hi" } }))
            .expect("submit");

        let job = queue.lock().unwrap().get_job(id).unwrap().expect("stored");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert!(job.next_run_at.is_none());
        assert_eq!(job.payload, r#"{"type":"receipt","content":{"text":"hi"}}"#);
    }

    #[test]
    fn invalid_submission_never_reaches_the_queue() {
        let (producer, queue, _) = producer();
        let err = producer.submit(json!({ "content": {} })).unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(queue.lock().unwrap().stats().unwrap().total(), 0);
    }

    #[tokio::test]
    async fn submission_wakes_the_worker() {
        let (producer, _, wake) = producer();
        producer
            .submit(json!({ "type": "receipt", "content": "x" }))
            .expect("submit");

        tokio::time::timeout(std::time::Duration::from_millis(100), wake.notified())
            .await
            .expect("permit stored by submit");
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy for failed deliveries.
//
// Every failure is retried after a fixed delay.  There is no attempt
// ceiling; a job leaves the retry cycle only by printing or by an operator
// editing the table.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use ticketpress_core::AppConfig;
use ticketpress_core::error::TicketpressError;

/// Where a failure came from, for logs and operator triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The stored payload could not be rendered.
    Payload,
    /// The printer could not be reached or dropped the connection.
    Printer,
    /// The database rejected a read or write.
    Storage,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payload => "payload",
            Self::Printer => "printer",
            Self::Storage => "storage",
        }
    }
}

/// Classify a worker-side error.
pub fn classify_error(err: &TicketpressError) -> FailureKind {
    match err {
        TicketpressError::PayloadParse(_)
        | TicketpressError::InvalidPayload(_)
        | TicketpressError::Serialization(_) => FailureKind::Payload,
        TicketpressError::Connect(_) | TicketpressError::Write(_) => FailureKind::Printer,
        TicketpressError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                FailureKind::Storage
            }
            _ => FailureKind::Printer,
        },
        TicketpressError::Persistence(_) | TicketpressError::Config(_) => FailureKind::Storage,
    }
}

/// Backoff timings used by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before a failed job becomes eligible again.
    pub retry_delay: Duration,
    /// Worker pause after handling a failure.
    pub error_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(10),
            error_pause: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            retry_delay: config.retry_delay(),
            error_pause: config.error_pause(),
        }
    }

    /// When a job failing at `now` may run again.
    pub fn next_run_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.retry_delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));
        let at = now + delay;
        debug!(delay_ms = self.retry_delay.as_millis(), %at, "scheduling retry");
        at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printer_errors_are_printer_failures() {
        let err = TicketpressError::Connect("connection refused".into());
        assert_eq!(classify_error(&err), FailureKind::Printer);
        let err = TicketpressError::Write("broken pipe".into());
        assert_eq!(classify_error(&err), FailureKind::Printer);
    }

    #[test]
    fn parse_errors_are_payload_failures() {
        let err = TicketpressError::PayloadParse("expected value".into());
        assert_eq!(classify_error(&err), FailureKind::Payload);
    }

    #[test]
    fn database_errors_are_storage_failures() {
        let err = TicketpressError::Persistence("database is locked".into());
        assert_eq!(classify_error(&err), FailureKind::Storage);
        assert_eq!(classify_error(&err).as_str(), "storage");
    }

    #[test]
    fn next_run_at_is_fixed_delay() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        assert_eq!(policy.next_run_at(now) - now, chrono::Duration::seconds(10));
    }

    #[test]
    fn policy_follows_config() {
        let config = AppConfig {
            retry_delay_ms: 500,
            error_pause_ms: 50,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.retry_delay, Duration::from_millis(500));
        assert_eq!(policy.error_pause, Duration::from_millis(50));
    }
}

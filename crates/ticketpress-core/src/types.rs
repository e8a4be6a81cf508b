// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Ticketpress print queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TicketpressError};

/// Standard raw printing port (HP JetDirect).
pub const DEFAULT_PRINTER_PORT: u16 = 9100;

/// Identifier of a print job, assigned by the database in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a print job.
///
/// `Failed` is not terminal: the job becomes eligible again once its
/// `next_run_at` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for the worker.
    Queued,
    /// Claimed by the worker, delivery in progress.
    Printing,
    /// Bytes handed to the printer without an I/O error.
    Done,
    /// Last delivery attempt failed, waiting for `next_run_at`.
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [Self::Queued, Self::Printing, Self::Done, Self::Failed];

    /// Label stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Printing => "printing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status label.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "queued" => Some(Self::Queued),
            "printing" => Some(Self::Printing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a producer submits: a type discriminator plus arbitrary content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Value,
}

impl JobPayload {
    pub fn new(kind: impl Into<String>, content: Value) -> Self {
        Self {
            kind: kind.into(),
            content,
        }
    }

    /// Validate an untrusted JSON body.
    ///
    /// The body must be an object with a non-blank string `type` and a
    /// `content` member (any JSON value, including `null`).
    pub fn from_value(body: Value) -> Result<Self> {
        let Value::Object(mut map) = body else {
            return Err(TicketpressError::InvalidPayload(
                "body must be a JSON object".into(),
            ));
        };

        let kind = match map.remove("type") {
            Some(Value::String(kind)) if !kind.trim().is_empty() => kind,
            Some(Value::String(_)) => {
                return Err(TicketpressError::InvalidPayload(
                    "`type` must not be blank".into(),
                ));
            }
            Some(_) => {
                return Err(TicketpressError::InvalidPayload(
                    "`type` must be a string".into(),
                ));
            }
            None => {
                return Err(TicketpressError::InvalidPayload("missing `type`".into()));
            }
        };

        let content = map
            .remove("content")
            .ok_or_else(|| TicketpressError::InvalidPayload("missing `content`".into()))?;

        Ok(Self { kind, content })
    }
}

/// A persisted print job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub id: JobId,
    /// Serialized `JobPayload` exactly as stored.
    pub payload: String,
    pub status: JobStatus,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// `None` means eligible immediately.
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The single configured receipt printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterSettings {
    /// Empty means unconfigured.
    pub ip_address: String,
    pub port: u16,
    pub enabled: bool,
}

impl PrinterSettings {
    /// Whether the worker is allowed to claim jobs for this printer.
    ///
    /// Mirrors the claim query: enabled, with a non-blank address.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.ip_address.trim().is_empty()
    }

    /// `host:port` socket address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }
}

impl Default for PrinterSettings {
    fn default() -> Self {
        Self {
            ip_address: String::new(),
            port: DEFAULT_PRINTER_PORT,
            enabled: false,
        }
    }
}

/// Partial settings update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterSettingsUpdate {
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// A job that has been claimed, together with the printer it must go to.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: PrintJob,
    pub printer: PrinterSettings,
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub queued: u64,
    pub printing: u64,
    pub done: u64,
    pub failed: u64,
}

impl JobStats {
    pub fn total(&self) -> u64 {
        self.queued + self.printing + self.done + self.failed
    }
}

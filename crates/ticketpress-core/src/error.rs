// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Ticketpress.

use thiserror::Error;

/// Top-level error type for all Ticketpress operations.
#[derive(Debug, Error)]
pub enum TicketpressError {
    // -- Producer errors --
    #[error("invalid print payload: {0}")]
    InvalidPayload(String),

    // -- Worker errors --
    #[error("cannot parse stored payload: {0}")]
    PayloadParse(String),

    #[error("printer unreachable: {0}")]
    Connect(String),

    #[error("printer write failed: {0}")]
    Write(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TicketpressError {
    /// Whether the error was raised before anything reached the queue.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidPayload(_))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TicketpressError>;

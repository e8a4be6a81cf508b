// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ticketpress — Core types, configuration and error definitions shared by
// the print queue, the worker, and the HTTP server.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::TicketpressError;
pub use types::*;

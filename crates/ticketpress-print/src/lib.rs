// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ticketpress Print — durable SQLite job queue, raw TCP printer transport,
// and the worker that drains one into the other.  This crate bridges between
// the core domain types defined in `ticketpress-core` and the kitchen
// printer on the restaurant LAN.

pub mod producer;
pub mod queue;
pub mod raw_client;
pub mod receipt;
pub mod retry;
pub mod settings;
pub mod worker;

pub use producer::JobProducer;
pub use queue::JobQueue;
pub use raw_client::RawTcpTransport;
pub use retry::RetryPolicy;
pub use settings::SettingsStore;
pub use worker::{PrintWorker, Tick};

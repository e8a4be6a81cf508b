// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP printer transport (JetDirect, port 9100).
//
// Open a TCP socket, dump the ticket bytes plus a few blank lines so the
// paper clears the cutter, close.  Nothing is read back: success only means
// the bytes reached the OS without an I/O error, not that the printer put
// ink on paper.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use ticketpress_core::AppConfig;
use ticketpress_core::error::{Result, TicketpressError};

/// Blank lines appended after every ticket.
pub const FEED_PADDING: &[u8] = b"\n\n\n";

/// Write granularity, for progress logging.
const CHUNK_SIZE: usize = 8192;

/// Raw TCP transport with explicit bounds on connect and write.
#[derive(Debug, Clone, Copy)]
pub struct RawTcpTransport {
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl RawTcpTransport {
    pub fn new(connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            write_timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.connect_timeout(), config.write_timeout())
    }

    /// Send `body` followed by [`FEED_PADDING`] to `host:port`.
    ///
    /// Returns the total number of bytes written.
    pub async fn send(&self, host: &str, port: u16, body: &[u8]) -> Result<usize> {
        let addr = format!("{host}:{port}");
        info!(addr = %addr, total = body.len(), "connecting via raw TCP");

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                TicketpressError::Connect(format!(
                    "connection to {addr} timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| TicketpressError::Connect(format!("connect to {addr}: {e}")))?;

        let sent = tokio::time::timeout(self.write_timeout, write_ticket(&mut stream, body))
            .await
            .map_err(|_| {
                TicketpressError::Write(format!(
                    "write to {addr} timed out after {}ms",
                    self.write_timeout.as_millis()
                ))
            })??;

        info!(addr = %addr, sent, "raw TCP ticket sent");
        Ok(sent)
    }
}

/// Write body and padding, then flush and shut down the write half.
async fn write_ticket(stream: &mut TcpStream, body: &[u8]) -> Result<usize> {
    let mut sent = 0;
    for chunk in body.chunks(CHUNK_SIZE) {
        stream.write_all(chunk).await.map_err(|e| {
            TicketpressError::Write(format!("send failed at byte {sent}: {e}"))
        })?;
        sent += chunk.len();
        debug!(sent, total = body.len(), "raw TCP progress");
    }

    stream
        .write_all(FEED_PADDING)
        .await
        .map_err(|e| TicketpressError::Write(format!("send feed padding: {e}")))?;
    sent += FEED_PADDING.len();

    stream
        .flush()
        .await
        .map_err(|e| TicketpressError::Write(format!("flush: {e}")))?;
    stream
        .shutdown()
        .await
        .map_err(|e| TicketpressError::Write(format!("shutdown: {e}")))?;

    Ok(sent)
}

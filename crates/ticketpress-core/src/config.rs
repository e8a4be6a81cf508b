// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TicketpressError};

/// Name of the config file inside the data directory.
pub const CONFIG_FILE: &str = "ticketpress.json";

/// Daemon settings.  Durations are stored in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database holding jobs and printer settings.
    pub database_path: PathBuf,
    /// Address the HTTP ingress binds to.
    pub bind_address: String,
    /// Sleep between polls when nothing is eligible.
    pub idle_interval_ms: u64,
    /// Pause after a failed delivery before the next poll.
    pub error_pause_ms: u64,
    /// How far in the future a failed job is rescheduled.
    pub retry_delay_ms: u64,
    /// Upper bound on establishing the printer connection.
    pub connect_timeout_ms: u64,
    /// Upper bound on writing a whole ticket.
    pub write_timeout_ms: u64,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("ticketpress.db"),
            bind_address: "0.0.0.0:8080".into(),
            idle_interval_ms: 1_000,
            error_pause_ms: 2_000,
            retry_delay_ms: 10_000,
            connect_timeout_ms: 10_000,
            write_timeout_ms: 30_000,
            log_level: "info".into(),
        }
    }
}

impl AppConfig {
    /// Read a JSON config file.  Missing keys take their default value.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            TicketpressError::Config(format!("read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&data)
            .map_err(|e| TicketpressError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Load the configuration used by the daemon.
    ///
    /// Looks at `TICKETPRESS_CONFIG`, then `ticketpress.json` in the data
    /// directory, then falls back to defaults with the database placed in
    /// the data directory.  `TICKETPRESS_DB` and `TICKETPRESS_BIND`
    /// override the corresponding fields.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let mut config = match std::env::var_os("TICKETPRESS_CONFIG") {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => {
                let path = data_dir.join(CONFIG_FILE);
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self {
                        database_path: data_dir.join("ticketpress.db"),
                        ..Self::default()
                    }
                }
            }
        };

        if let Ok(db) = std::env::var("TICKETPRESS_DB") {
            config.database_path = PathBuf::from(db);
        }
        if let Ok(bind) = std::env::var("TICKETPRESS_BIND") {
            config.bind_address = bind;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the worker spin or never time out.
    pub fn validate(&self) -> Result<()> {
        if self.idle_interval_ms == 0 {
            return Err(TicketpressError::Config(
                "idle_interval_ms must be greater than zero".into(),
            ));
        }
        if self.connect_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(TicketpressError::Config(
                "printer timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn error_pause(&self) -> Duration {
        Duration::from_millis(self.error_pause_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Return the application data directory, creating it if needed.
pub fn data_dir() -> PathBuf {
    let dir = base_data_dir().join("ticketpress");
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn base_data_dir() -> PathBuf {
    // Try XDG data dir, then fallback to home
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from("/tmp")
}

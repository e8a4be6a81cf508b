// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer settings singleton (`printer_settings`, row id 1).
//
// The worker never reads this table directly; the claim query joins it.
// Administration reads and upserts it through `SettingsStore`.

use rusqlite::{Connection, params};
use tracing::{debug, info, instrument};

use ticketpress_core::error::{Result, TicketpressError};
use ticketpress_core::types::{DEFAULT_PRINTER_PORT, PrinterSettings, PrinterSettingsUpdate};

/// Borrowed view of the settings row on a queue connection.
pub struct SettingsStore<'c> {
    conn: &'c Connection,
}

impl<'c> SettingsStore<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Return the current settings, creating the default row if absent.
    pub fn get(&self) -> Result<PrinterSettings> {
        let defaults = PrinterSettings::default();
        self.conn
            .execute(
                "INSERT OR IGNORE INTO printer_settings (id, ip_address, port, enabled)
                 VALUES (1, ?1, ?2, ?3)",
                params![defaults.ip_address, defaults.port, defaults.enabled],
            )
            .map_err(|e| TicketpressError::Persistence(format!("init settings: {e}")))?;

        let settings = self
            .conn
            .query_row(
                "SELECT ip_address, port, enabled FROM printer_settings WHERE id = 1",
                [],
                |row| {
                    Ok(PrinterSettings {
                        ip_address: row.get(0)?,
                        port: row.get(1)?,
                        enabled: row.get(2)?,
                    })
                },
            )
            .map_err(|e| TicketpressError::Persistence(format!("read settings: {e}")))?;

        debug!(?settings, "printer settings read");
        Ok(settings)
    }

    /// Upsert the provided fields and return the resulting settings.
    ///
    /// Fields left as `None` keep their stored value (or the default when
    /// the row does not exist yet).  The address is not validated.
    #[instrument(skip(self))]
    pub fn set(&self, update: &PrinterSettingsUpdate) -> Result<PrinterSettings> {
        self.conn
            .execute(
                "INSERT INTO printer_settings (id, ip_address, port, enabled)
                 VALUES (1, COALESCE(?1, ''), COALESCE(?2, ?4), COALESCE(?3, 0))
                 ON CONFLICT(id) DO UPDATE SET
                     ip_address = COALESCE(?1, ip_address),
                     port       = COALESCE(?2, port),
                     enabled    = COALESCE(?3, enabled)",
                params![
                    update.ip_address,
                    update.port,
                    update.enabled,
                    DEFAULT_PRINTER_PORT
                ],
            )
            .map_err(|e| TicketpressError::Persistence(format!("upsert settings: {e}")))?;

        let settings = self.get()?;
        info!(
            ip_address = %settings.ip_address,
            port = settings.port,
            enabled = settings.enabled,
            "printer settings updated"
        );
        Ok(settings)
    }
}

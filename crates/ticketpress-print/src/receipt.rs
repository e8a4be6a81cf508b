// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Plain-text rendering of stored payloads for 80 mm receipt printers.
//
// The web tier decides what a ticket contains; this module only lays it out
// as human-readable lines.  No printer control codes are emitted.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use ticketpress_core::error::{Result, TicketpressError};
use ticketpress_core::types::JobPayload;

/// Characters per line on 80 mm paper with Font A.
pub const LINE_WIDTH: usize = 42;

/// An order ticket as sent by the ordering frontend.
///
/// Decoding is lenient: numbers may arrive as strings, and fields of the
/// wrong shape are dropped rather than rejected.
#[derive(Debug, Deserialize)]
struct OrderTicket {
    #[serde(default, alias = "title", deserialize_with = "lenient_text")]
    restaurant: Option<String>,
    #[serde(default, alias = "orderId", deserialize_with = "lenient_text")]
    order_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    table: Option<String>,
    items: Vec<TicketItem>,
    #[serde(default, deserialize_with = "lenient_number")]
    total: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    footer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TicketItem {
    #[serde(default, deserialize_with = "lenient_text")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    title: Option<String>,
    #[serde(default, alias = "quantity", deserialize_with = "lenient_number")]
    qty: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    note: Option<String>,
}

impl TicketItem {
    fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.title.as_deref())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("?")
    }

    fn quantity(&self) -> f64 {
        self.qty.unwrap_or(1.0)
    }
}

/// Any JSON value as display text; `null` and empty strings become `None`.
fn lenient_text<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Value::deserialize(de)?;
    Ok(match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        other => Some(scalar_text(&other)),
    })
}

/// A number, or a string holding one (`"9.50"`, `"9,50"`).
fn lenient_number<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<f64>, D::Error> {
    let value = Value::deserialize(de)?;
    Ok(match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite()))
}

/// Decode a stored payload string and render it.
pub fn render_stored(payload: &str) -> Result<String> {
    let payload: JobPayload = serde_json::from_str(payload)
        .map_err(|e| TicketpressError::PayloadParse(format!("decode payload: {e}")))?;
    render(&payload)
}

/// Render the body that is sent to the printer.  Always ends with exactly
/// one newline.
pub fn render(payload: &JobPayload) -> Result<String> {
    let content = &payload.content;
    let text = match content {
        Value::String(text) => text.clone(),
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                text.clone()
            } else if let Some(Value::Array(lines)) = map.get("lines") {
                lines.iter().map(line_text).collect::<Vec<_>>().join("\n")
            } else if map.contains_key("items") {
                match serde_json::from_value::<OrderTicket>(content.clone()) {
                    Ok(ticket) => render_order(&ticket),
                    Err(e) => {
                        warn!(
                            kind = %payload.kind,
                            error = %e,
                            "order ticket not recognised; printing raw content"
                        );
                        pretty(content)?
                    }
                }
            } else {
                pretty(content)?
            }
        }
        other => pretty(other)?,
    };

    Ok(format!("{}\n", text.trim_end_matches('\n')))
}

fn line_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pretty(value: &Value) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| TicketpressError::PayloadParse(format!("render content: {e}")))
}

fn render_order(ticket: &OrderTicket) -> String {
    let rule = "-".repeat(LINE_WIDTH);
    let mut lines = Vec::new();

    if let Some(name) = &ticket.restaurant {
        lines.push(center(name));
    }
    if let Some(order_id) = &ticket.order_id {
        lines.push(format!("Order #{order_id}"));
    }
    if let Some(table) = &ticket.table {
        lines.push(format!("Table {table}"));
    }
    lines.push(rule.clone());

    for item in &ticket.items {
        let label = format!("{} x {}", quantity_text(item.quantity()), item.label());
        match item.price {
            Some(price) => lines.push(columns(&label, &money(price * item.quantity()))),
            None => lines.push(label),
        }
        if let Some(note) = item.note.as_deref().filter(|n| !n.trim().is_empty()) {
            lines.push(format!("   > {note}"));
        }
    }

    if let Some(total) = ticket.total {
        lines.push(rule);
        lines.push(columns("TOTAL", &money(total)));
    }
    if let Some(footer) = &ticket.footer {
        lines.push(String::new());
        lines.push(center(footer));
    }

    lines.join("\n")
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whole quantities print without decimals; `0.5` stays `0.5`.
fn quantity_text(qty: f64) -> String {
    if qty.fract() == 0.0 {
        format!("{qty:.0}")
    } else {
        let text = format!("{qty:.3}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn money(amount: f64) -> String {
    format!("{amount:.2}")
}

/// Left label, right-aligned value.  Long labels push the value to the
/// next line rather than overflowing the paper.
fn columns(left: &str, right: &str) -> String {
    let used = left.chars().count() + right.chars().count();
    if used < LINE_WIDTH {
        format!("{left}{}{right}", " ".repeat(LINE_WIDTH - used))
    } else {
        format!("{left}\n{right:>width$}", width = LINE_WIDTH)
    }
}

fn center(text: &str) -> String {
    let len = text.chars().count();
    if len >= LINE_WIDTH {
        return text.to_string();
    }
    format!("{}{text}", " ".repeat((LINE_WIDTH - len) / 2))
}

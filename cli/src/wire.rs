//! Encoding shared by the HTTP client and the development server.
//!
//! Row queries travel as URL parameters: `order=name.asc`,
//! `embed=recipe_ingredients` and one `column=eq.<json>` per equality filter.
//! Change feeds travel as server-sent events with one JSON `ChangeEvent` per
//! `data:` line.

use hearth_core::error::{Result, SyncError};
use hearth_core::remote::{ChangeEvent, Query, Table};
use serde_json::Value;

pub fn encode_query(query: &Query) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{direction}", order.column)));
    }
    if let Some(embed) = query.embed {
        params.push(("embed".to_string(), embed.to_string()));
    }
    for (column, value) in &query.filters {
        params.push((column.clone(), format!("eq.{value}")));
    }
    params
}

pub fn decode_query(params: &[(String, String)]) -> Result<Query> {
    let mut query = Query::new();
    for (key, value) in params {
        match key.as_str() {
            "order" => {
                let (column, direction) = value.rsplit_once('.').unwrap_or((value.as_str(), "asc"));
                let ascending = match direction {
                    "asc" => true,
                    "desc" => false,
                    other => {
                        return Err(SyncError::validation(format!(
                            "Invalid order direction '{other}'"
                        )));
                    }
                };
                query = query.order_by(column, ascending);
            }
            "embed" => query = query.embed(value.parse::<Table>()?),
            column => {
                let raw = value.strip_prefix("eq.").ok_or_else(|| {
                    SyncError::validation(format!("Unsupported filter on '{column}': {value}"))
                })?;
                // Values are JSON; a bare word is accepted as a string.
                let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
                query = query.eq(column, value);
            }
        }
    }
    Ok(query)
}

/// Splits a server-sent event byte stream into change events.
#[derive(Default)]
pub struct EventStreamDecoder {
    buf: Vec<u8>,
}

impl EventStreamDecoder {
    /// Consume a chunk and return every complete `data:` payload in it.
    /// Comments, other fields and blank lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<std::result::Result<ChangeEvent, String>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                out.push(serde_json::from_str(data.trim()).map_err(|e| e.to_string()));
            }
        }
        out
    }
}

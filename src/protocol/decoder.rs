//! Tabular response decoding.
//!
//! A tabular response is a header, a run of column-definition frames, a
//! sentinel, a run of row frames, and a second sentinel. [`SentinelSplitter`]
//! tracks the "read until a terminal sentinel recurs" part independently of
//! what the frames contain, so the same splitter also fits zone transfers
//! (opening and closing SOA) and directory listings.
//!
//! [`ResponseDecoder`] is push-based: feed it frame payloads one at a time
//! and it yields a [`ResultSet`] only once the closing sentinel arrives.
//! Nothing partial is ever returned.

use crate::core::lenenc::{PacketCursor, ERROR_SENTINEL};
use crate::error::{ProbeError, Result};
use serde::Serialize;
use std::fmt;

/// Where a frame falls relative to the sentinels seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// Ordinary frame inside section `section` (0-based)
    Data { section: usize },
    /// Sentinel closing section `section`, more sections follow
    Boundary { section: usize },
    /// The terminal sentinel
    Complete,
}

pub struct SentinelSplitter<F> {
    is_sentinel: F,
    required: usize,
    seen: usize,
}

impl<F: Fn(&[u8]) -> bool> SentinelSplitter<F> {
    /// Complete after `required` sentinels (at least one).
    pub fn new(is_sentinel: F, required: usize) -> Self {
        Self {
            is_sentinel,
            required: required.max(1),
            seen: 0,
        }
    }

    pub fn observe(&mut self, frame: &[u8]) -> Result<Split> {
        if self.is_complete() {
            return Err(ProbeError::Protocol(
                "frame received after terminal sentinel".into(),
            ));
        }
        if (self.is_sentinel)(frame) {
            self.seen += 1;
            if self.seen == self.required {
                Ok(Split::Complete)
            } else {
                Ok(Split::Boundary {
                    section: self.seen - 1,
                })
            }
        } else {
            Ok(Split::Data { section: self.seen })
        }
    }

    pub fn sentinels_seen(&self) -> usize {
        self.seen
    }

    pub fn is_complete(&self) -> bool {
        self.seen >= self.required
    }
}

/// EOF packet: `0xFE` tag on a payload shorter than 9 bytes.
pub fn is_eof_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && payload.len() < 9
}

/// A server-side error report (`0xFF`, code, optional `#` + SQL state, message).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    pub code: u16,
    pub sql_state: Option<String>,
    pub message: String,
}

impl ServerError {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cur = PacketCursor::new(payload);
        if cur.u8("error tag")? != ERROR_SENTINEL {
            return Err(ProbeError::Protocol("not an error packet".into()));
        }
        let code = cur.u16_le("error code")?;
        let sql_state = if cur.peek() == Some(b'#') {
            cur.skip(1, "sql state marker")?;
            Some(String::from_utf8_lossy(cur.bytes(5, "sql state")?).into_owned())
        } else {
            None
        };
        let message = String::from_utf8_lossy(cur.rest()).into_owned();
        Ok(Self {
            code,
            sql_state,
            message,
        })
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sql_state {
            Some(ref state) => write!(f, "{} ({}): {}", self.code, state, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub type_code: u8,
}

pub type Row = Vec<Option<String>>;

/// Fully decoded tabular response, owned by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStep {
    NeedMore,
    Complete(ResultSet),
}

pub struct ResponseDecoder {
    column_count: usize,
    columns: Vec<Column>,
    rows: Vec<Row>,
    splitter: SentinelSplitter<fn(&[u8]) -> bool>,
}

impl ResponseDecoder {
    pub fn new(column_count: usize) -> Self {
        Self {
            column_count,
            columns: Vec::with_capacity(column_count),
            rows: Vec::new(),
            splitter: SentinelSplitter::new(is_eof_packet as fn(&[u8]) -> bool, 2),
        }
    }

    /// Start from the result-set header frame (a length-encoded column count).
    pub fn from_header(payload: &[u8]) -> Result<Self> {
        let mut cur = PacketCursor::new(payload);
        let count = cur.lenenc_len("column count")?;
        if count == 0 {
            return Err(ProbeError::Protocol("result set with zero columns".into()));
        }
        let count = usize::try_from(count)
            .map_err(|_| ProbeError::Protocol(format!("column count {count} out of range")))?;
        Ok(Self::new(count))
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Feed the next frame payload.
    pub fn push(&mut self, payload: &[u8]) -> Result<DecodeStep> {
        if payload.first() == Some(&ERROR_SENTINEL) {
            let err = ServerError::parse(payload)?;
            return Err(ProbeError::Protocol(format!(
                "server error inside result set: {err}"
            )));
        }

        match self.splitter.observe(payload)? {
            Split::Data { section: 0 } => {
                if self.columns.len() == self.column_count {
                    return Err(ProbeError::Protocol(format!(
                        "more than {} column definitions",
                        self.column_count
                    )));
                }
                self.columns.push(parse_column_definition(payload)?);
                Ok(DecodeStep::NeedMore)
            }
            Split::Data { .. } => {
                self.rows.push(parse_text_row(payload, self.column_count)?);
                Ok(DecodeStep::NeedMore)
            }
            Split::Boundary { .. } => {
                if self.columns.len() != self.column_count {
                    return Err(ProbeError::Protocol(format!(
                        "expected {} column definitions, got {}",
                        self.column_count,
                        self.columns.len()
                    )));
                }
                Ok(DecodeStep::NeedMore)
            }
            Split::Complete => Ok(DecodeStep::Complete(ResultSet {
                columns: std::mem::take(&mut self.columns),
                rows: std::mem::take(&mut self.rows),
            })),
        }
    }

    /// Decode a complete sequence of frames following the header.
    pub fn decode_all<'a, I>(mut self, frames: I) -> Result<ResultSet>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        for frame in frames {
            if let DecodeStep::Complete(set) = self.push(frame)? {
                return Ok(set);
            }
        }
        Err(ProbeError::truncated("result set"))
    }
}

/// Protocol 4.1 column definition; only the name and type are kept.
fn parse_column_definition(payload: &[u8]) -> Result<Column> {
    let mut cur = PacketCursor::new(payload);
    for field in ["catalog", "schema", "table", "org_table"] {
        cur.lenenc_bytes(field)?;
    }
    let name = cur
        .lenenc_bytes("name")?
        .map(|n| String::from_utf8_lossy(n).into_owned())
        .unwrap_or_default();
    cur.lenenc_bytes("org_name")?;
    let fixed_len = cur.lenenc_len("fixed fields length")?;
    if fixed_len < 0x0C {
        return Err(ProbeError::truncated("column fixed fields"));
    }
    let _charset = cur.u16_le("character set")?;
    let _length = cur.u32_le("column length")?;
    let type_code = cur.u8("column type")?;
    Ok(Column { name, type_code })
}

fn parse_text_row(payload: &[u8], columns: usize) -> Result<Row> {
    let mut cur = PacketCursor::new(payload);
    let mut row = Vec::with_capacity(columns);
    for _ in 0..columns {
        row.push(
            cur.lenenc_bytes("row value")?
                .map(|v| String::from_utf8_lossy(v).into_owned()),
        );
    }
    cur.finish("row")?;
    Ok(row)
}

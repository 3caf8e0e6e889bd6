//! Input trace parsing.
//!
//! The format is line-oriented text: the first line is a decimal record
//! count, then one `offset,size,type` record per line with byte-valued
//! `offset`/`size` and `type` of `r` or `w`. Anything malformed is a
//! startup failure naming the offending line; a harness run never starts
//! on a trace it cannot fully parse.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to read trace: {0}")]
    Io(#[from] io::Error),
    #[error("trace is empty: missing record count")]
    MissingCount,
    #[error("line 1: bad record count {0:?}")]
    BadCount(String),
    #[error("line {line}: malformed record {text:?}")]
    BadRecord { line: usize, text: String },
    #[error("trace ends early: expected {expected} records, found {found}")]
    Truncated { expected: u64, found: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
}

impl OpKind {
    pub fn as_char(self) -> char {
        match self {
            OpKind::Read => 'r',
            OpKind::Write => 'w',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceOp {
    pub offset: u64,
    pub size: u64,
    pub kind: OpKind,
}

#[derive(Debug, Clone)]
pub struct Trace {
    ops: Vec<TraceOp>,
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self, TraceError> {
        Trace::parse(BufReader::new(File::open(path)?))
    }

    pub fn parse<R: BufRead>(reader: R) -> Result<Self, TraceError> {
        let mut lines = reader.lines().enumerate();

        let expected: u64 = loop {
            match lines.next() {
                None => return Err(TraceError::MissingCount),
                Some((_, line)) => {
                    let line = line?;
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    break text
                        .parse()
                        .map_err(|_| TraceError::BadCount(text.to_string()))?;
                }
            }
        };

        let mut ops = Vec::with_capacity(expected as usize);
        for (index, line) in lines {
            if ops.len() as u64 == expected {
                break;
            }
            let line = line?;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            ops.push(parse_record(index + 1, text)?);
        }
        if (ops.len() as u64) < expected {
            return Err(TraceError::Truncated {
                expected,
                found: ops.len() as u64,
            });
        }
        Ok(Trace { ops })
    }

    pub fn ops(&self) -> &[TraceOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Largest single-operation size; the driver's data buffer is sized
    /// from this before the first request.
    pub fn max_io_size(&self) -> u64 {
        self.ops.iter().map(|op| op.size).max().unwrap_or(0)
    }
}

fn parse_record(line: usize, text: &str) -> Result<TraceOp, TraceError> {
    let bad = || TraceError::BadRecord {
        line,
        text: text.to_string(),
    };
    let mut fields = text.split(',');
    let offset = fields.next().ok_or_else(bad)?.trim();
    let size = fields.next().ok_or_else(bad)?.trim();
    let kind = fields.next().ok_or_else(bad)?.trim();
    if fields.next().is_some() {
        return Err(bad());
    }
    let kind = match kind {
        "r" => OpKind::Read,
        "w" => OpKind::Write,
        _ => return Err(bad()),
    };
    Ok(TraceOp {
        offset: offset.parse().map_err(|_| bad())?,
        size: size.parse().map_err(|_| bad())?,
        kind,
    })
}

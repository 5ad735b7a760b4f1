use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthError};

/// W3C trace id: 32 lowercase hex chars, not all zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

/// W3C span id: 16 lowercase hex chars, not all zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(String);

fn hex_id(input: &str, width: usize, what: &str) -> Result<String> {
    let input = input.trim();
    if input.len() != width || !input.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SynthError::Parse(format!(
            "{what} must be {width} hex chars, got {input:?}"
        )));
    }
    if input.bytes().all(|b| b == b'0') {
        return Err(SynthError::Parse(format!("{what} {input} is all zeros")));
    }
    Ok(input.to_ascii_lowercase())
}

impl TraceId {
    pub fn parse(input: &str) -> Result<Self> {
        hex_id(input, 32, "trace id").map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SpanId {
    pub fn parse(input: &str) -> Result<Self> {
        hex_id(input, 16, "span id").map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TraceId {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl FromStr for SpanId {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

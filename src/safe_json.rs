//! Bounds-checked JSON decoding.
//!
//! Client bodies (and upstream responses) are decoded through [`parse`],
//! which rejects oversized and deeply nested documents *before* handing
//! the text to `serde_json`:
//!
//! 1. `text.len() > max_size` → [`JsonError::PayloadTooLarge`]
//! 2. bracket nesting deeper than `max_depth` → [`JsonError::TooDeep`]
//! 3. syntax error → [`JsonError::InvalidJson`]
//!
//! The depth scan is a single linear pass over the raw bytes. Brackets that
//! appear inside string literals are ignored, so a description such as
//! `"[[[[[["` does not count towards nesting.

use serde_json::Value;
use thiserror::Error;

/// Default maximum document size (10 MiB).
pub const DEFAULT_MAX_SIZE: usize = 10 * 1024 * 1024;

/// Default maximum bracket nesting depth.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Size and depth bounds applied before parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonLimits {
    pub max_size: usize,
    pub max_depth: usize,
}

impl Default for JsonLimits {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Structured parse failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JsonError {
    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("JSON nesting depth {depth} exceeds the limit of {max}")]
    TooDeep { depth: usize, max: usize },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

impl JsonError {
    /// Stable error code used in response envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            JsonError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            JsonError::TooDeep { .. } => "TOO_DEEP",
            JsonError::InvalidJson(_) => "INVALID_JSON",
        }
    }
}

/// Parse `text` into a JSON value, enforcing `limits` first.
pub fn parse(text: &str, limits: &JsonLimits) -> Result<Value, JsonError> {
    if text.len() > limits.max_size {
        return Err(JsonError::PayloadTooLarge {
            size: text.len(),
            max: limits.max_size,
        });
    }

    let depth = max_nesting_depth(text);
    if depth > limits.max_depth {
        return Err(JsonError::TooDeep {
            depth,
            max: limits.max_depth,
        });
    }

    serde_json::from_str(text).map_err(|e| JsonError::InvalidJson(describe_syntax_error(&e)))
}

/// Decode raw bytes, treating non-UTF-8 input as invalid JSON.
///
/// The size check runs on the byte length so oversized binary garbage is
/// still reported as too large rather than as an encoding problem.
pub fn parse_bytes(bytes: &[u8], limits: &JsonLimits) -> Result<Value, JsonError> {
    if bytes.len() > limits.max_size {
        return Err(JsonError::PayloadTooLarge {
            size: bytes.len(),
            max: limits.max_size,
        });
    }

    let text = std::str::from_utf8(bytes)
        .map_err(|_| JsonError::InvalidJson("Request body is not valid UTF-8".to_string()))?;
    parse(text, limits)
}

/// Maximum `{`/`[` nesting depth of the raw text, ignoring string contents.
///
/// Unbalanced closers never drive the counter below zero; the real parser
/// reports those as syntax errors.
pub fn max_nesting_depth(text: &str) -> usize {
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for byte in text.bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    max_depth
}

/// Human-readable syntax error without echoing the offending input.
fn describe_syntax_error(e: &serde_json::Error) -> String {
    use serde_json::error::Category;

    let what = match e.classify() {
        Category::Eof => "unexpected end of input",
        Category::Syntax => "syntax error",
        Category::Data => "invalid value",
        Category::Io => "read failure",
    };
    format!("{what} at line {} column {}", e.line(), e.column())
}

//! Schema validation for client payloads.
//!
//! Every payload goes through the same pipeline:
//!
//! ```text
//! safe_json::parse → FieldReader (strict keys) → per-field Rule → domain rules
//! ```
//!
//! Each [`Rule`] is a small pure transform from a JSON value to a typed,
//! sanitized value (or a message). [`FieldReader`] applies rules field by
//! field, collects *all* issues instead of stopping at the first, and
//! rejects unknown top-level keys. A payload is either fully valid or
//! rejected with its issue list; there is no partial acceptance.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::sanitize::{sanitize_text, validate_pubkey};
use crate::ssrf::SsrfGuard;

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum token name length (characters, after sanitization).
pub const MAX_TOKEN_NAME_LENGTH: usize = 32;

/// Maximum token symbol length.
pub const MAX_TOKEN_SYMBOL_LENGTH: usize = 10;

/// Maximum token description length.
pub const MAX_DESCRIPTION_LENGTH: usize = 1000;

/// Maximum social handle length (X/Twitter handles are 15, Telegram 32).
pub const MAX_HANDLE_LENGTH: usize = 32;

/// Idempotency keys must be at least this long to be meaningfully unique.
pub const MIN_IDEMPOTENCY_KEY_LENGTH: usize = 8;

/// Maximum idempotency key length.
pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 128;

/// Maximum length of a single proxied path segment.
pub const MAX_PATH_SEGMENT_LENGTH: usize = 128;

/// Maximum number of proxied path segments.
pub const MAX_PATH_SEGMENTS: usize = 8;

/// Maximum forwarded query parameters.
pub const MAX_QUERY_PARAMS: usize = 16;

/// Maximum length of a forwarded query value.
pub const MAX_QUERY_VALUE_LENGTH: usize = 256;

// =============================================================================
// Issues
// =============================================================================

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

/// Every issue found in a rejected payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Issues(Vec<Issue>);

impl Issues {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![Issue {
            path: path.into(),
            message: message.into(),
        }])
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(Issue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.0.iter()
    }

    /// Issue for `path`, if any.
    pub fn for_path(&self, path: &str) -> Option<&Issue> {
        self.0.iter().find(|i| i.path == path)
    }
}

impl fmt::Display for Issues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for issue in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            if issue.path.is_empty() {
                write!(f, "{}", issue.message)?;
            } else {
                write!(f, "{}: {}", issue.path, issue.message)?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Rules
// =============================================================================

/// Shared dependencies for rules that need more than the value itself.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub ssrf: &'a SsrfGuard,
}

/// A named, pure field transform.
pub trait Rule {
    type Output;

    fn apply(&self, value: &Value, ctx: &ValidationContext<'_>) -> Result<Self::Output, String>;
}

/// Character classes for [`TextRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// Letters, digits, spaces and light punctuation.
    DisplayName,
    /// ASCII letters and digits only.
    Ticker,
    /// Any printable text.
    Prose,
    /// ASCII letters, digits and underscore.
    Handle,
}

impl Charset {
    fn allows(self, c: char) -> bool {
        match self {
            Charset::DisplayName => {
                c.is_alphanumeric()
                    || c == ' '
                    || matches!(c, '-' | '_' | '.' | ',' | '\'' | '!' | '&' | '(' | ')' | '#' | '$')
            }
            Charset::Ticker => c.is_ascii_alphanumeric(),
            Charset::Prose => !c.is_control(),
            Charset::Handle => c.is_ascii_alphanumeric() || c == '_',
        }
    }
}

/// Sanitized string with length bounds and a character class.
#[derive(Debug, Clone, Copy)]
pub struct TextRule {
    pub min_len: usize,
    pub max_len: usize,
    pub charset: Charset,
}

impl Rule for TextRule {
    type Output = String;

    fn apply(&self, value: &Value, _ctx: &ValidationContext<'_>) -> Result<String, String> {
        let raw = value.as_str().ok_or("Expected a string")?;
        let text = sanitize_text(raw);
        let len = text.chars().count();

        if len < self.min_len {
            return Err(if self.min_len == 1 {
                "Must not be empty".to_string()
            } else {
                format!("Must be at least {} characters", self.min_len)
            });
        }
        if len > self.max_len {
            return Err(format!("Must be at most {} characters", self.max_len));
        }
        if let Some(c) = text.chars().find(|c| !self.charset.allows(*c)) {
            return Err(format!("Contains invalid character '{}'", c.escape_default()));
        }

        Ok(text)
    }
}

/// Token display name.
pub const TOKEN_NAME: TextRule = TextRule {
    min_len: 1,
    max_len: MAX_TOKEN_NAME_LENGTH,
    charset: Charset::DisplayName,
};

/// Token ticker symbol.
pub const TOKEN_SYMBOL: TextRule = TextRule {
    min_len: 1,
    max_len: MAX_TOKEN_SYMBOL_LENGTH,
    charset: Charset::Ticker,
};

/// Free-form token description.
pub const DESCRIPTION: TextRule = TextRule {
    min_len: 0,
    max_len: MAX_DESCRIPTION_LENGTH,
    charset: Charset::Prose,
};

/// Social media handle (without the leading `@`).
pub const SOCIAL_HANDLE: TextRule = TextRule {
    min_len: 1,
    max_len: MAX_HANDLE_LENGTH,
    charset: Charset::Handle,
};

/// Solana public key in base58.
#[derive(Debug, Clone, Copy)]
pub struct PubkeyRule;

impl Rule for PubkeyRule {
    type Output = String;

    fn apply(&self, value: &Value, _ctx: &ValidationContext<'_>) -> Result<String, String> {
        let raw = value.as_str().ok_or("Expected a string")?;
        validate_pubkey(raw)
            .ok_or_else(|| "Must be a base58 public key of 32-44 characters".to_string())
    }
}

/// URL that must pass the SSRF guard. Yields the normalized URL.
#[derive(Debug, Clone, Copy)]
pub struct UrlRule;

impl Rule for UrlRule {
    type Output = String;

    fn apply(&self, value: &Value, ctx: &ValidationContext<'_>) -> Result<String, String> {
        let raw = value.as_str().ok_or("Expected a string")?;
        let candidate = sanitize_text(raw);

        match ctx.ssrf.validate(&candidate) {
            Ok(url) => Ok(url.into()),
            Err(reason) => {
                tracing::debug!(reason = %reason, "URL rejected by SSRF guard");
                metrics::record_ssrf_rejection();
                Err(reason)
            }
        }
    }
}

/// Unsigned integer within bounds. Accepts JSON numbers or digit strings
/// (amounts above 2^53 cannot travel as JS numbers).
#[derive(Debug, Clone, Copy)]
pub struct IntegerRule {
    pub min: u64,
    pub max: u64,
}

impl Rule for IntegerRule {
    type Output = u64;

    fn apply(&self, value: &Value, _ctx: &ValidationContext<'_>) -> Result<u64, String> {
        let out_of_range = || format!("Must be an integer between {} and {}", self.min, self.max);

        let n = match value {
            Value::Number(n) => n.as_u64().ok_or_else(out_of_range)?,
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() || s.len() > 20 || !s.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(out_of_range());
                }
                s.parse::<u64>().map_err(|_| out_of_range())?
            }
            _ => return Err(out_of_range()),
        };

        if !(self.min..=self.max).contains(&n) {
            return Err(out_of_range());
        }
        Ok(n)
    }
}

/// Non-negative decimal within bounds and with limited fractional digits.
#[derive(Debug, Clone, Copy)]
pub struct DecimalRule {
    pub min: Decimal,
    pub max: Decimal,
    pub max_scale: u32,
}

impl Rule for DecimalRule {
    type Output = Decimal;

    fn apply(&self, value: &Value, _ctx: &ValidationContext<'_>) -> Result<Decimal, String> {
        let text = match value {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_string(),
            _ => return Err("Expected a number".to_string()),
        };
        if text.len() > 40 {
            return Err("Expected a number".to_string());
        }

        let parsed = Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|_| "Expected a number".to_string())?
            .normalize();

        if parsed.scale() > self.max_scale {
            return Err(format!(
                "Must have at most {} decimal places",
                self.max_scale
            ));
        }
        if parsed < self.min || parsed > self.max {
            return Err(format!("Must be between {} and {}", self.min, self.max));
        }
        Ok(parsed)
    }
}

/// JSON boolean.
#[derive(Debug, Clone, Copy)]
pub struct BoolRule;

impl Rule for BoolRule {
    type Output = bool;

    fn apply(&self, value: &Value, _ctx: &ValidationContext<'_>) -> Result<bool, String> {
        value.as_bool().ok_or_else(|| "Expected a boolean".to_string())
    }
}

/// String from a fixed set.
#[derive(Debug, Clone, Copy)]
pub struct OneOfRule {
    pub allowed: &'static [&'static str],
}

impl Rule for OneOfRule {
    type Output = &'static str;

    fn apply(&self, value: &Value, _ctx: &ValidationContext<'_>) -> Result<&'static str, String> {
        let raw = value.as_str().ok_or("Expected a string")?;
        self.allowed
            .iter()
            .find(|a| **a == raw)
            .copied()
            .ok_or_else(|| format!("Must be one of: {}", self.allowed.join(", ")))
    }
}

/// Raw JSON container (array and/or object) passed through unchanged.
///
/// Depth and size were already bounded by the safe JSON parser.
#[derive(Debug, Clone, Copy)]
pub struct ContainerRule;

impl Rule for ContainerRule {
    type Output = Value;

    fn apply(&self, value: &Value, _ctx: &ValidationContext<'_>) -> Result<Value, String> {
        match value {
            Value::Array(_) | Value::Object(_) => Ok(value.clone()),
            _ => Err("Expected an array or object".to_string()),
        }
    }
}

/// JSON-RPC request id: short string or non-negative integer.
#[derive(Debug, Clone, Copy)]
pub struct RpcIdRule;

impl Rule for RpcIdRule {
    type Output = Value;

    fn apply(&self, value: &Value, _ctx: &ValidationContext<'_>) -> Result<Value, String> {
        match value {
            Value::Number(n) if n.is_u64() => Ok(value.clone()),
            Value::String(s) if s.len() <= 64 && !s.chars().any(char::is_control) => {
                Ok(value.clone())
            }
            _ => Err("Must be a string of at most 64 characters or a non-negative integer".to_string()),
        }
    }
}

// =============================================================================
// Field reader
// =============================================================================

/// Strict reader over a JSON object.
pub struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    ctx: ValidationContext<'a>,
    known: Vec<&'static str>,
    issues: Issues,
}

impl<'a> FieldReader<'a> {
    /// # Errors
    ///
    /// Rejects anything that is not a JSON object.
    pub fn new(value: &'a Value, ctx: ValidationContext<'a>) -> Result<Self, Issues> {
        let object = value
            .as_object()
            .ok_or_else(|| Issues::single("", "Expected a JSON object"))?;

        Ok(Self {
            object,
            ctx,
            known: Vec::new(),
            issues: Issues::default(),
        })
    }

    /// Apply `rule` to a required field.
    pub fn required<R: Rule>(&mut self, key: &'static str, rule: &R) -> Option<R::Output> {
        self.known.push(key);
        match self.object.get(key) {
            None | Some(Value::Null) => {
                self.issues.push(key, "Required");
                None
            }
            Some(value) => self.apply(key, value, rule),
        }
    }

    /// Apply `rule` to an optional field. Missing and `null` both yield
    /// `Some(None)`; an invalid value yields `None`.
    pub fn optional<R: Rule>(&mut self, key: &'static str, rule: &R) -> Option<Option<R::Output>> {
        self.known.push(key);
        match self.object.get(key) {
            None | Some(Value::Null) => Some(None),
            Some(value) => self.apply(key, value, rule).map(Some),
        }
    }

    /// Record a domain-rule failure (cross-field checks and the like).
    pub fn issue(&mut self, path: &str, message: impl Into<String>) {
        self.issues.push(path, message);
    }

    fn apply<R: Rule>(&mut self, key: &'static str, value: &Value, rule: &R) -> Option<R::Output> {
        match rule.apply(value, &self.ctx) {
            Ok(out) => Some(out),
            Err(message) => {
                self.issues.push(key, message);
                None
            }
        }
    }

    /// Reject unknown keys and return the built payload if nothing failed.
    pub fn finish<T>(mut self, built: Option<T>) -> Result<T, Issues> {
        let mut unknown: Vec<&String> = self
            .object
            .keys()
            .filter(|k| !self.known.contains(&k.as_str()))
            .collect();
        unknown.sort();
        for key in unknown {
            self.issues.push(key.as_str(), "Unknown field");
        }

        if !self.issues.is_empty() {
            return Err(self.issues);
        }
        built.ok_or_else(|| Issues::single("", "Invalid payload"))
    }
}

/// A payload type that can be built from a strictly-read JSON object.
///
/// Implementations must read every field before short-circuiting so that
/// all issues are reported together.
pub trait Validate: Sized {
    fn from_fields(fields: &mut FieldReader<'_>) -> Option<Self>;
}

/// Run the full validation pipeline on a parsed JSON value.
pub fn validate<T: Validate>(value: &Value, ctx: ValidationContext<'_>) -> Result<T, Issues> {
    let mut fields = FieldReader::new(value, ctx)?;
    let built = T::from_fields(&mut fields);
    fields.finish(built)
}

// =============================================================================
// Header / path validators
// =============================================================================

/// Validate a caller-supplied idempotency key.
///
/// Rules:
/// - 8 to 128 characters
/// - ASCII letters, digits, `-` and `_` only
pub fn validate_idempotency_key(key: &str) -> AppResult<String> {
    let key = key.trim();

    if key.len() < MIN_IDEMPOTENCY_KEY_LENGTH || key.len() > MAX_IDEMPOTENCY_KEY_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Idempotency-Key must be between {MIN_IDEMPOTENCY_KEY_LENGTH} and {MAX_IDEMPOTENCY_KEY_LENGTH} characters"
        )));
    }

    if let Some(pos) = key
        .chars()
        .position(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    {
        return Err(AppError::BadRequest(format!(
            "Idempotency-Key contains invalid character at position {pos}"
        )));
    }

    Ok(key.to_string())
}

/// Validate a proxied upstream path segment.
///
/// Rules:
/// - Must be between 1 and 128 characters
/// - Must start and end with an alphanumeric character
/// - Can contain alphanumeric characters, dots, underscores, and hyphens
/// - Cannot contain consecutive special characters (rules out `..`)
pub fn validate_path_segment(segment: &str) -> AppResult<()> {
    if segment.is_empty() {
        return Err(AppError::BadRequest(
            "Path segment cannot be empty".to_string(),
        ));
    }

    if segment.len() > MAX_PATH_SEGMENT_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Path segment cannot exceed {MAX_PATH_SEGMENT_LENGTH} characters"
        )));
    }

    let chars: Vec<char> = segment.chars().collect();

    if !chars.first().is_some_and(|c| c.is_ascii_alphanumeric())
        || !chars.last().is_some_and(|c| c.is_ascii_alphanumeric())
    {
        return Err(AppError::BadRequest(
            "Path segment must start and end with an alphanumeric character".to_string(),
        ));
    }

    let mut prev_special = false;
    for (i, &c) in chars.iter().enumerate() {
        let is_special = c == '.' || c == '_' || c == '-';

        if !c.is_ascii_alphanumeric() && !is_special {
            return Err(AppError::BadRequest(format!(
                "Path segment contains invalid character '{}' at position {i}",
                c.escape_default()
            )));
        }

        if is_special && prev_special {
            return Err(AppError::BadRequest(format!(
                "Path segment cannot contain consecutive special characters at position {i}"
            )));
        }

        prev_special = is_special;
    }

    Ok(())
}

/// Validate a full proxied path (`a/b/c`), returning its segments.
pub fn validate_proxy_path(path: &str) -> AppResult<Vec<&str>> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    if segments.len() > MAX_PATH_SEGMENTS {
        return Err(AppError::BadRequest(format!(
            "Path cannot have more than {MAX_PATH_SEGMENTS} segments"
        )));
    }

    for segment in &segments {
        validate_path_segment(segment)?;
    }

    Ok(segments)
}

/// Validate a forwarded query string (`a=1&b=2`), returning decoded pairs.
///
/// Keys are 1-64 ASCII letters, digits or `_`; values are sanitized and
/// capped at [`MAX_QUERY_VALUE_LENGTH`] characters.
pub fn validate_query_pairs(raw: Option<&str>) -> AppResult<Vec<(String, String)>> {
    let Some(raw) = raw.filter(|q| !q.is_empty()) else {
        return Ok(Vec::new());
    };

    let mut pairs = Vec::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        if pairs.len() == MAX_QUERY_PARAMS {
            return Err(AppError::BadRequest(format!(
                "Query cannot have more than {MAX_QUERY_PARAMS} parameters"
            )));
        }

        if key.is_empty()
            || key.len() > 64
            || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(AppError::BadRequest(format!(
                "Invalid query parameter name '{}'",
                key.escape_default()
            )));
        }

        let value = sanitize_text(&value);
        if value.chars().count() > MAX_QUERY_VALUE_LENGTH {
            return Err(AppError::BadRequest(format!(
                "Query parameter '{key}' exceeds {MAX_QUERY_VALUE_LENGTH} characters"
            )));
        }

        pairs.push((key.into_owned(), value));
    }

    Ok(pairs)
}

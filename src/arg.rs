//! Typed route arguments and wire-value coercion.
//!
//! Every logical parameter of a route (path capture, query parameter,
//! body field, or plugin-injected slot) is described by an [`Arg`]. The
//! argument's [`ArgType`] is a tag checked at registration time, so the
//! binder dispatches on a plain enum rather than reflected type tokens.
//!
//! Coercion comes in two wire forms: [`read_primitive`] for text sources
//! (query string, form fields, path captures) and [`read_json_primitive`]
//! for parsed JSON values. Custom argument shapes plug in through an
//! [`ArgReader`] closure, the JSON `Reader` contract.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::HttpError;

/// FNV-1a 64 over the identifier bytes.
///
/// Route literals and argument names are matched by this hash first and
/// confirmed by string comparison on the rare equal-hash branch, so
/// constructed collisions cannot alias two identifiers.
pub fn hash_name(name: &str) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in name.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

/// Tagged argument type, fixed at registration.
#[derive(Debug, Clone)]
pub enum ArgType {
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    Char,
    /// UTF-8 text.
    Text,
    /// ISO-8601 timestamp, carried as epoch milliseconds UTC.
    DateTime,
    /// Closed set of named variants, matched by exact name.
    Enum(Arc<[String]>),
    /// Receives the raw request body, bypassing body parsing.
    Body,
    /// Decoded exclusively by the argument's [`ArgReader`].
    Custom,
}

impl ArgType {
    /// Build an enum type from its variant names.
    pub fn enumeration<I, S>(variants: I) -> ArgType
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ArgType::Enum(variants.into_iter().map(Into::into).collect())
    }

    pub fn is_body(&self) -> bool {
        matches!(self, ArgType::Body)
    }
}

impl fmt::Display for ArgType {
    /// Simple name used in client-facing error messages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgType::Int32 => "Int32",
            ArgType::Int64 => "Int64",
            ArgType::Float32 => "Float32",
            ArgType::Float64 => "Float64",
            ArgType::Bool => "Bool",
            ArgType::Char => "Char",
            ArgType::Text => "String",
            ArgType::DateTime => "DateTime",
            ArgType::Enum(_) => "Enum",
            ArgType::Body => "BodyContent",
            ArgType::Custom => "Custom",
        };
        f.write_str(name)
    }
}

/// A decoded argument value, one variant per [`ArgType`] plus the raw
/// forms produced by body capture and custom readers.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    Char(char),
    Text(String),
    /// Epoch milliseconds UTC.
    DateTime(i64),
    Enum(String),
    Bytes(Vec<u8>),
    Json(JsonValue),
}

impl ArgValue {
    /// JSON rendition, used by the default response writer.
    pub fn to_json(&self) -> JsonValue {
        match self {
            ArgValue::Int32(v) => JsonValue::from(*v),
            ArgValue::Int64(v) => JsonValue::from(*v),
            ArgValue::Float32(v) => JsonValue::from(*v as f64),
            ArgValue::Float64(v) => JsonValue::from(*v),
            ArgValue::Bool(v) => JsonValue::from(*v),
            ArgValue::Char(v) => JsonValue::from(v.to_string()),
            ArgValue::Text(v) => JsonValue::from(v.clone()),
            ArgValue::DateTime(v) => JsonValue::from(*v),
            ArgValue::Enum(v) => JsonValue::from(v.clone()),
            ArgValue::Bytes(v) => JsonValue::from(v.clone()),
            ArgValue::Json(v) => v.clone(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int32(v) => Some(*v as i64),
            ArgValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Text(v) | ArgValue::Enum(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ArgValue::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

/// Whether an argument is read from the wire or injected by a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Bound from path, query, or body; reported when missing.
    Public,
    /// Populated by a plugin before the handler runs; never wire-read.
    Internal,
}

/// The JSON `Reader` contract: decode a parsed JSON value into an
/// [`ArgValue`]. Installed per-argument at registration.
pub type ArgReader = Arc<dyn Fn(&JsonValue) -> Result<ArgValue, HttpError> + Send + Sync>;

/// One logical parameter of a route.
#[derive(Clone)]
pub struct Arg {
    pub name: String,
    pub name_hash: u64,
    pub ty: ArgType,
    pub reader: Option<ArgReader>,
    pub visibility: Visibility,
    pub optional: bool,
    pub default: Option<ArgValue>,
    /// Filled from a captured path segment rather than the query string.
    pub is_path: bool,
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arg")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("visibility", &self.visibility)
            .field("optional", &self.optional)
            .field("is_path", &self.is_path)
            .field("has_reader", &self.reader.is_some())
            .finish()
    }
}

impl Arg {
    fn new(name: &str, ty: ArgType, visibility: Visibility) -> Self {
        Arg {
            name: name.to_string(),
            name_hash: hash_name(name),
            ty,
            reader: None,
            visibility,
            optional: false,
            default: None,
            is_path: false,
        }
    }

    /// A required public argument.
    pub fn required(name: &str, ty: ArgType) -> Self {
        Arg::new(name, ty, Visibility::Public)
    }

    /// An optional public argument with a default applied when absent.
    pub fn optional(name: &str, ty: ArgType, default: Option<ArgValue>) -> Self {
        let mut arg = Arg::new(name, ty, Visibility::Public);
        arg.optional = true;
        arg.default = default;
        arg
    }

    /// A plugin-injected slot, invisible to the wire.
    pub fn internal(name: &str, ty: ArgType) -> Self {
        Arg::new(name, ty, Visibility::Internal)
    }

    /// The single argument receiving the raw request body.
    pub fn body(name: &str) -> Self {
        Arg::new(name, ArgType::Body, Visibility::Public)
    }

    pub fn with_reader(mut self, reader: ArgReader) -> Self {
        self.reader = Some(reader);
        self
    }
}

/// Coerce a text wire value into the argument's type.
///
/// Used for query parameters, form fields, and path captures. Failure is
/// always `BadRequest` naming the offending value.
pub fn read_primitive(s: &str, ty: &ArgType) -> Result<ArgValue, HttpError> {
    let bad = |detail: &str| HttpError::BadRequest(format!("cannot read '{}' as {}", s, detail));
    match ty {
        ArgType::Int32 => s.parse::<i32>().map(ArgValue::Int32).map_err(|_| bad("Int32")),
        ArgType::Int64 => s.parse::<i64>().map(ArgValue::Int64).map_err(|_| bad("Int64")),
        ArgType::Float32 => s
            .parse::<f32>()
            .map(ArgValue::Float32)
            .map_err(|_| bad("Float32")),
        ArgType::Float64 => s
            .parse::<f64>()
            .map(ArgValue::Float64)
            .map_err(|_| bad("Float64")),
        ArgType::Bool => match s {
            "true" => Ok(ArgValue::Bool(true)),
            "false" => Ok(ArgValue::Bool(false)),
            _ => Err(bad("Bool (expected 'true' or 'false')")),
        },
        ArgType::Char => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(ArgValue::Char(c)),
                _ => Err(bad("Char (expected exactly one character)")),
            }
        }
        ArgType::Text => Ok(ArgValue::Text(s.to_string())),
        ArgType::DateTime => parse_iso8601(s).map(ArgValue::DateTime).ok_or_else(|| {
            bad("DateTime (expected ISO-8601, e.g. 2024-06-01T12:30:00Z)")
        }),
        ArgType::Enum(variants) => {
            if variants.iter().any(|v| v == s) {
                Ok(ArgValue::Enum(s.to_string()))
            } else {
                Err(bad("Enum (no such variant)"))
            }
        }
        ArgType::Body => Err(bad("BodyContent (body arguments are not wire-coerced)")),
        ArgType::Custom => Err(bad("Custom (no primitive coercion registered)")),
    }
}

/// Coerce a parsed JSON value into the argument's type.
///
/// JSON numbers and booleans are accepted natively; JSON strings are
/// re-coerced through [`read_primitive`], which is what lets clients send
/// `"42"` for an integer field.
pub fn read_json_primitive(value: &JsonValue, ty: &ArgType) -> Result<ArgValue, HttpError> {
    if let JsonValue::String(s) = value {
        return read_primitive(s, ty);
    }
    let bad =
        |detail: &str| HttpError::BadRequest(format!("cannot read JSON {} as {}", value, detail));
    match ty {
        ArgType::Int32 => value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(ArgValue::Int32)
            .ok_or_else(|| bad("Int32")),
        ArgType::Int64 => value.as_i64().map(ArgValue::Int64).ok_or_else(|| bad("Int64")),
        ArgType::Float32 => value
            .as_f64()
            .map(|v| ArgValue::Float32(v as f32))
            .ok_or_else(|| bad("Float32")),
        ArgType::Float64 => value
            .as_f64()
            .map(ArgValue::Float64)
            .ok_or_else(|| bad("Float64")),
        ArgType::Bool => value.as_bool().map(ArgValue::Bool).ok_or_else(|| bad("Bool")),
        ArgType::DateTime => value
            .as_i64()
            .map(ArgValue::DateTime)
            .ok_or_else(|| bad("DateTime (expected ISO-8601 string or epoch milliseconds)")),
        ArgType::Char | ArgType::Text | ArgType::Enum(_) => {
            // Non-string JSON for text-shaped types is a type error.
            Err(bad(&ty.to_string()))
        }
        ArgType::Body => Err(bad("BodyContent (body arguments are not JSON-coerced)")),
        ArgType::Custom => Err(bad("Custom (no primitive coercion registered)")),
    }
}

/// Parse an ISO-8601 timestamp into epoch milliseconds UTC.
///
/// Accepts `YYYY-MM-DD`, optionally followed by `THH:MM[:SS[.fff]]` and a
/// zone designator `Z` or `±HH:MM`. A missing zone means UTC. Returns
/// `None` on any syntax or range violation.
fn parse_iso8601(s: &str) -> Option<i64> {
    let bytes = s.as_bytes();
    if bytes.len() < 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let year: i64 = s.get(0..4)?.parse().ok()?;
    let month: u32 = s.get(5..7)?.parse().ok()?;
    let day: u32 = s.get(8..10)?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let mut seconds_of_day: i64 = 0;
    let mut millis: i64 = 0;
    let mut offset_seconds: i64 = 0;
    let mut rest = &s[10..];

    if let Some(stripped) = rest.strip_prefix('T') {
        // Split off the zone designator first.
        let (time_part, zone_part) = match stripped.find(['Z', '+', '-']) {
            Some(pos) => (&stripped[..pos], Some(&stripped[pos..])),
            None => (stripped, None),
        };

        let mut fields = time_part.split(':');
        let hour: i64 = fields.next()?.parse().ok()?;
        let minute: i64 = fields.next()?.parse().ok()?;
        let (second, frac): (i64, i64) = match fields.next() {
            Some(sec) => match sec.split_once('.') {
                Some((whole, frac)) => {
                    let padded = format!("{:0<3}", frac);
                    (whole.parse().ok()?, padded.get(0..3)?.parse().ok()?)
                }
                None => (sec.parse().ok()?, 0),
            },
            None => (0, 0),
        };
        if fields.next().is_some() || hour > 23 || minute > 59 || second > 60 {
            return None;
        }
        seconds_of_day = hour * 3600 + minute * 60 + second;
        millis = frac;

        if let Some(zone) = zone_part {
            if zone == "Z" {
                offset_seconds = 0;
            } else {
                let sign: i64 = if zone.starts_with('-') { -1 } else { 1 };
                let (oh, om) = zone.get(1..)?.split_once(':')?;
                let oh: i64 = oh.parse().ok()?;
                let om: i64 = om.parse().ok()?;
                offset_seconds = sign * (oh * 3600 + om * 60);
            }
        }
        rest = "";
    }
    if !rest.is_empty() {
        return None;
    }

    let days = days_from_civil(year, month, day);
    Some((days * 86_400 + seconds_of_day - offset_seconds) * 1000 + millis)
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if m > 2 { m - 3 } else { m + 9 } as i64;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

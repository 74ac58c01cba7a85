//! Argument binding.
//!
//! Turns the matched route plus the raw request into the typed argument
//! array handed to plugins and the handler. Slots fill in a fixed order
//! (query string, path captures, body) and [`check_args`] runs last,
//! applying defaults and producing the client-facing message for any
//! required argument that is still empty.
//!
//! Query-string and path errors abort immediately; body parse errors are
//! recorded and binding continues, so `check_args` can name both the
//! missing argument and the parse failure that caused it. When a body
//! error is followed by a later successful write to the same slot, the
//! write stands.

use serde_json::Value as JsonValue;

use crate::arg::{hash_name, read_json_primitive, read_primitive, Arg, ArgValue, Visibility};
use crate::error::HttpError;
use crate::http::{percent_decode, Body, HeaderMap};
use crate::route::Route;

/// Result of binding: the argument slots plus the first recorded body
/// parse error, if any.
#[derive(Debug)]
pub struct BoundArgs {
    pub values: Vec<Option<ArgValue>>,
    pub parse_error: Option<HttpError>,
}

/// Can this argument be filled from a named wire field (query, JSON
/// field, form field)?
fn wire_named(arg: &Arg) -> bool {
    arg.visibility == Visibility::Public && !arg.is_path && !arg.ty.is_body()
}

/// Bind all arguments for `route`.
///
/// `captured` is the matcher's parameter list, deepest segment first.
/// Does not run [`check_args`]; the dispatcher calls it after binding so
/// the parse error can be folded into the missing-argument message.
pub fn bind_args(
    route: &Route,
    uri: &str,
    captured: &[String],
    headers: &HeaderMap,
    body: &Body,
) -> Result<BoundArgs, HttpError> {
    let mut values: Vec<Option<ArgValue>> = vec![None; route.args.len()];
    let mut parse_error: Option<HttpError> = None;

    bind_query(route, uri, &mut values)?;
    bind_path(route, captured, &mut values)?;

    if let Some(body_index) = route.body_arg {
        // The raw-body argument swallows the buffer; no parsing at all.
        values[body_index] = Some(ArgValue::Bytes(body.remaining().to_vec()));
    } else if !body.is_empty() {
        let is_json = headers
            .get("content-type")
            .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/json"))
            .unwrap_or(false);
        if is_json {
            bind_body_json(route, body.remaining(), &mut values, &mut parse_error);
        } else {
            bind_body_form(route, body.remaining(), &mut values, &mut parse_error);
        }
    }

    Ok(BoundArgs {
        values,
        parse_error,
    })
}

/// Fill slots from the query string. Syntax and coercion errors abort.
fn bind_query(
    route: &Route,
    uri: &str,
    values: &mut [Option<ArgValue>],
) -> Result<(), HttpError> {
    let query = match uri.split_once('?') {
        Some((_, q)) => q,
        None => return Ok(()),
    };

    for fragment in query.split('&') {
        if fragment.is_empty() {
            continue;
        }
        let (raw_name, raw_value) = fragment.split_once('=').ok_or_else(|| {
            HttpError::BadRequest(format!("query fragment '{}' is missing '='", fragment))
        })?;
        let name = percent_decode(raw_name, true)?;
        let hash = hash_name(&name);

        for (i, arg) in route.args.iter().enumerate() {
            if !wire_named(arg) || arg.name_hash != hash || arg.name != name {
                continue;
            }
            if raw_value.is_empty() {
                // Empty value leaves the slot unset; defaults apply later.
                continue;
            }
            let value = percent_decode(raw_value, true)?;
            values[i] = Some(coerce_text(arg, &value)?);
        }
    }
    Ok(())
}

/// Coerce a decoded text value, with the reader fallback: if primitive
/// coercion fails and the argument has a reader, the text is re-parsed
/// as JSON and offered to the reader; if that fails too, the original
/// coercion error propagates.
fn coerce_text(arg: &Arg, value: &str) -> Result<ArgValue, HttpError> {
    match read_primitive(value, &arg.ty) {
        Ok(v) => Ok(v),
        Err(original) => {
            if let Some(reader) = &arg.reader {
                if let Ok(parsed) = serde_json::from_str::<JsonValue>(value) {
                    if let Ok(v) = reader(&parsed) {
                        return Ok(v);
                    }
                }
            }
            Err(original)
        }
    }
}

/// Rebind the matcher's reverse-order captures to their argument slots.
fn bind_path(
    route: &Route,
    captured: &[String],
    values: &mut [Option<ArgValue>],
) -> Result<(), HttpError> {
    for (i, raw) in captured.iter().enumerate() {
        let segment = route
            .capture_from_end(i)
            .expect("matcher produced more captures than the route declares");
        let arg_index = segment
            .arg_index
            .expect("capture segment without an argument");
        let arg = &route.args[arg_index];
        let decoded = percent_decode(raw, false)?;
        // Reader if present, else primitive coercion, same as body fields.
        let value = match &arg.reader {
            Some(reader) => reader(&JsonValue::String(decoded))?,
            None => read_primitive(&decoded, &arg.ty)?,
        };
        values[arg_index] = Some(value);
    }
    Ok(())
}

/// Read one JSON field into an argument slot, honoring the argument's
/// reader when present.
fn read_field(arg: &Arg, value: &JsonValue) -> Result<ArgValue, HttpError> {
    match &arg.reader {
        Some(reader) => reader(value),
        None => read_json_primitive(value, &arg.ty),
    }
}

/// Fill slots from a JSON object body.
///
/// Unknown fields are skipped; `null` leaves the slot unset; the first
/// error is recorded and binding continues. The string-wrapping fallback
/// supports clients that double-encode JSON inside a string: when a
/// direct read of a string-valued field fails, the *decoded* contents of
/// that string (escape sequences already resolved by the outer parse)
/// are parsed as JSON and read again.
fn bind_body_json(
    route: &Route,
    body: &[u8],
    values: &mut [Option<ArgValue>],
    parse_error: &mut Option<HttpError>,
) {
    let parsed: JsonValue = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            record(parse_error, HttpError::from(e));
            return;
        }
    };
    let object = match parsed {
        JsonValue::Object(map) => map,
        other => {
            record(
                parse_error,
                HttpError::BadRequest(format!(
                    "expected a JSON object body, got {}",
                    json_kind(&other)
                )),
            );
            return;
        }
    };

    for (field, value) in &object {
        let hash = hash_name(field);
        for (i, arg) in route.args.iter().enumerate() {
            if !wire_named(arg) || arg.name_hash != hash || &arg.name != field {
                continue;
            }
            if value.is_null() {
                continue;
            }
            match read_field(arg, value) {
                Ok(v) => values[i] = Some(v),
                Err(original) => {
                    let mut recovered = false;
                    if let JsonValue::String(inner) = value {
                        if let Ok(nested) = serde_json::from_str::<JsonValue>(inner) {
                            if let Ok(v) = read_field(arg, &nested) {
                                values[i] = Some(v);
                                recovered = true;
                            }
                        }
                    }
                    if !recovered {
                        record(parse_error, original);
                    }
                }
            }
        }
    }
}

/// Fill slots from a form-encoded body. Errors are recorded, not raised,
/// matching the body-binding contract.
fn bind_body_form(
    route: &Route,
    body: &[u8],
    values: &mut [Option<ArgValue>],
    parse_error: &mut Option<HttpError>,
) {
    let text = match std::str::from_utf8(body) {
        Ok(t) => t,
        Err(_) => {
            record(
                parse_error,
                HttpError::BadRequest("form body is not valid UTF-8".to_string()),
            );
            return;
        }
    };

    for fragment in text.split('&') {
        if fragment.is_empty() {
            continue;
        }
        let (raw_name, raw_value) = match fragment.split_once('=') {
            Some(pair) => pair,
            None => {
                record(
                    parse_error,
                    HttpError::BadRequest(format!("form fragment '{}' is missing '='", fragment)),
                );
                continue;
            }
        };
        let name = match percent_decode(raw_name, true) {
            Ok(n) => n,
            Err(e) => {
                record(parse_error, e);
                continue;
            }
        };
        let hash = hash_name(&name);

        for (i, arg) in route.args.iter().enumerate() {
            if !wire_named(arg) || arg.name_hash != hash || arg.name != name {
                continue;
            }
            if raw_value.is_empty() {
                continue;
            }
            match percent_decode(raw_value, true).and_then(|v| coerce_text(arg, &v)) {
                Ok(v) => values[i] = Some(v),
                Err(e) => record(parse_error, e),
            }
        }
    }
}

fn record(slot: &mut Option<HttpError>, error: HttpError) {
    // First error wins; later ones would usually be knock-on noise.
    if slot.is_none() {
        *slot = Some(error);
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Apply defaults and report the first still-missing required argument.
///
/// Internal slots are skipped; plugins populate those after binding.
/// Idempotent: re-running on a populated array changes nothing.
pub fn check_args(
    route: &Route,
    values: &mut [Option<ArgValue>],
    parse_error: Option<&HttpError>,
) -> Result<(), HttpError> {
    for (i, arg) in route.args.iter().enumerate() {
        if values[i].is_some() || arg.visibility != Visibility::Public {
            continue;
        }
        if arg.optional {
            values[i] = arg.default.clone();
            continue;
        }
        let mut message = format!(
            "Request to {} is missing required query parameter \"{}\" of type {}",
            route.name, arg.name, arg.ty
        );
        if let Some(cause) = parse_error {
            message.push_str(&format!(" because of: {}", cause));
        }
        return Err(HttpError::BadRequest(message));
    }
    Ok(())
}

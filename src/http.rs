//! Wire-facing request/response types and the transport contract.
//!
//! The dispatch core does not own sockets or HTTP framing. The transport
//! hands it a fully buffered [`Request`] plus a [`Responder`] that
//! consumes exactly one [`Response`]; everything in between is this
//! crate's job.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::error::HttpError;

/// HTTP methods the router indexes on.
///
/// Parsing is strict uppercase; an unrecognized method never reaches the
/// route trees and is handed to the default handler instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    pub fn parse(s: &str) -> Option<Method> {
        match s {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "PATCH" => Some(Method::Patch),
            "HEAD" => Some(Method::Head),
            "OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive header map.
///
/// Keys are folded to ASCII lowercase on insert and lookup, so
/// `Content-Type`, `content-type`, and `CONTENT-TYPE` are the same header.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: HashMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        HeaderMap::default()
    }

    /// Build from name/value pairs; later pairs overwrite earlier ones.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.set(name, value);
        }
        map
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.entries
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A buffered request body with a mutable reader index.
///
/// The transport may have consumed framing bytes already; `remaining()`
/// is everything at and after the current index, which is what the binder
/// and `BodyContent` arguments see.
#[derive(Debug, Clone, Default)]
pub struct Body {
    bytes: Vec<u8>,
    reader_index: usize,
}

impl Body {
    pub fn new(bytes: Vec<u8>) -> Self {
        Body {
            bytes,
            reader_index: 0,
        }
    }

    pub fn empty() -> Self {
        Body::default()
    }

    /// Bytes at and after the reader index.
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.reader_index.min(self.bytes.len())..]
    }

    /// Advance the reader index, saturating at the end of the buffer.
    pub fn advance(&mut self, n: usize) {
        self.reader_index = (self.reader_index + n).min(self.bytes.len());
    }

    pub fn reader_index(&self) -> usize {
        self.reader_index
    }

    pub fn is_empty(&self) -> bool {
        self.remaining().is_empty()
    }
}

/// A fully buffered incoming request as delivered by the transport.
#[derive(Debug, Clone)]
pub struct Request {
    /// Raw method string; parsed by the dispatcher.
    pub method: String,
    /// Raw path plus query, e.g. `/users/42?verbose=true`.
    pub uri: String,
    pub headers: HeaderMap,
    pub content: Body,
    /// Peer address, when the transport knows one.
    pub peer: Option<SocketAddr>,
}

impl Request {
    pub fn new(method: &str, uri: &str) -> Self {
        Request {
            method: method.to_string(),
            uri: uri.to_string(),
            headers: HeaderMap::new(),
            content: Body::empty(),
            peer: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, bytes: Vec<u8>) -> Self {
        self.content = Body::new(bytes);
        self
    }
}

/// The response handed back to the transport.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Response sink supplied by the transport; invoked exactly once per
/// request. A transport whose connection has gone away supplies a no-op.
pub type Responder = Box<dyn FnOnce(Response) + Send>;

/// Decode percent escapes; `plus_as_space` additionally maps `+` to a
/// space (query-string and form semantics, not path semantics).
pub fn percent_decode(input: &str, plus_as_space: bool) -> Result<String, HttpError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16));
                let lo = bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                    }
                    _ => {
                        return Err(HttpError::BadRequest(format!(
                            "malformed percent escape in '{}'",
                            input
                        )))
                    }
                }
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out)
        .map_err(|_| HttpError::BadRequest(format!("invalid UTF-8 after decoding '{}'", input)))
}

/// Resolve the API version a client asked for.
///
/// `Accept` wins when it parses as a non-negative integer (RPC clients
/// repurpose it as a plain version tag); otherwise `API-VERSION`;
/// otherwise 0. Malformed values, including ordinary media-type
/// `Accept` headers, are treated as absent.
pub fn requested_version(headers: &HeaderMap) -> u32 {
    fn parse(v: &str) -> Option<u32> {
        v.trim().parse::<u32>().ok()
    }
    headers
        .get("accept")
        .and_then(parse)
        .or_else(|| headers.get("api-version").and_then(parse))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_is_strict() {
        assert_eq!(Method::parse("GET"), Some(Method::Get));
        assert_eq!(Method::parse("get"), None);
        assert_eq!(Method::parse("BREW"), None);
    }

    #[test]
    fn test_header_map_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.set("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        headers.set("CONTENT-TYPE", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_body_reader_index() {
        let mut body = Body::new(b"0123456789".to_vec());
        assert_eq!(body.remaining(), b"0123456789");
        body.advance(4);
        assert_eq!(body.remaining(), b"456789");
        assert_eq!(body.reader_index(), 4);
        body.advance(100);
        assert!(body.is_empty());
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("hello%20world", false).unwrap(), "hello world");
        assert_eq!(percent_decode("a%2Fb", false).unwrap(), "a/b");
        assert_eq!(percent_decode("a+b", true).unwrap(), "a b");
        // '+' stays literal in path position.
        assert_eq!(percent_decode("a+b", false).unwrap(), "a+b");
        assert!(percent_decode("bad%2", false).is_err());
        assert!(percent_decode("bad%zz", false).is_err());
    }

    #[test]
    fn test_requested_version_precedence() {
        let accept = HeaderMap::from_pairs([("Accept", "3"), ("API-VERSION", "1")]);
        assert_eq!(requested_version(&accept), 3);

        let fallback = HeaderMap::from_pairs([("Accept", "application/json"), ("API-VERSION", "2")]);
        assert_eq!(requested_version(&fallback), 2);

        let absent = HeaderMap::new();
        assert_eq!(requested_version(&absent), 0);

        let malformed = HeaderMap::from_pairs([("API-VERSION", "-4")]);
        assert_eq!(requested_version(&malformed), 0);
    }
}

//! Raw response head parsing.
//!
//! # Design
//! The native transport hands back the response head exactly as it came off
//! the wire: a status line, `Name: value\r\n` fields and a blank line. The
//! status code is reported separately, so the status line is only checked
//! and skipped. Fields are parsed with `httparse`, which reports a block
//! without its terminating blank line as partial; that is rejected rather
//! than truncated.
//!
//! A transport that saw interim `1xx` responses delivers several heads back
//! to back. All but the last are skipped.
//!
//! `ParsedHeaders` keeps fields in arrival order with their original
//! spelling. Lookups compare names case-insensitively and nothing is merged
//! or deduplicated.

use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::error::HeaderError;

/// Ordered, case-insensitive header multimap.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ParsedHeaders {
    entries: Vec<(String, HeaderValue)>,
}

impl ParsedHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: HeaderValue) {
        self.entries.push((name.into(), value));
    }

    /// First value for `name`.
    pub fn get<'a>(&'a self, name: &'a str) -> Option<&'a HeaderValue> {
        self.get_all(name).next()
    }

    /// Every value for `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert to an `http::HeaderMap`. Names are lowercased; the relative
    /// order of repeated names is kept.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                map.append(name, value.clone());
            }
        }
        map
    }

    /// Serialize the fields followed by the terminating blank line.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.entries {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

impl fmt::Debug for ParsedHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Parse a raw response head into its header fields.
///
/// Nothing is returned unless the entire block parses.
pub fn parse(raw: &[u8], max_headers: usize) -> Result<ParsedHeaders, HeaderError> {
    let mut rest = raw;
    loop {
        let line_end = find_crlf(rest).ok_or(HeaderError::MissingStatusLine)?;
        let status_line = &rest[..line_end];
        if !status_line.starts_with(b"HTTP/") {
            return Err(HeaderError::MissingStatusLine);
        }

        let fields = &rest[line_end + 2..];
        let mut slots = vec![httparse::EMPTY_HEADER; max_headers];
        let (consumed, parsed) = match httparse::parse_headers(fields, &mut slots) {
            Ok(httparse::Status::Complete(done)) => done,
            Ok(httparse::Status::Partial) => return Err(HeaderError::Unterminated),
            Err(httparse::Error::TooManyHeaders) => return Err(HeaderError::TooManyHeaders),
            Err(_) => return Err(HeaderError::InvalidField),
        };

        let remaining = &fields[consumed..];
        if remaining.is_empty() {
            let mut headers = ParsedHeaders::new();
            for field in parsed {
                let value =
                    HeaderValue::from_bytes(field.value).map_err(|_| HeaderError::InvalidField)?;
                headers.append(field.name, value);
            }
            return Ok(headers);
        }

        if is_informational(status_line) && remaining.starts_with(b"HTTP/") {
            rest = remaining;
            continue;
        }
        return Err(HeaderError::TrailingBytes);
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|pair| pair == b"\r\n")
}

/// `HTTP/1.1 100 Continue` and friends.
fn is_informational(status_line: &[u8]) -> bool {
    let mut parts = status_line.split(|b| *b == b' ');
    parts.next();
    matches!(parts.next(), Some([b'1', d1, d2]) if d1.is_ascii_digit() && d2.is_ascii_digit())
}

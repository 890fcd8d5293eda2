//! Request translation.
//!
//! # Design
//! `translate` is pure: it validates and reshapes an [`HttpRequestData`]
//! into a [`NativeRequest`] and never touches the network or the body
//! reader. Anything the transport could not put on the wire is rejected
//! here, before any scope or worker slot is committed.

use http::header::{CONTENT_LENGTH, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Uri};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::TranslationError;
use crate::http::{HttpRequestData, RequestBody};
use crate::native::{NativeBody, NativeRequest};

/// Map a client request onto the native transport's representation.
pub fn translate(
    request: HttpRequestData,
    config: &EngineConfig,
) -> Result<NativeRequest, TranslationError> {
    let uri = parse_url(&request.url)?;

    let mut headers = HeaderMap::with_capacity(request.headers.len() + 1);
    for (name, value) in &request.headers {
        let (name, value) = header_pair(name, value)?;
        headers.append(name, value);
    }

    if !headers.contains_key(USER_AGENT) {
        if let Some(agent) = &config.user_agent {
            let (_, value) = header_pair(USER_AGENT.as_str(), agent)?;
            headers.insert(USER_AGENT, value);
        }
    }

    let body = match request.body {
        RequestBody::Empty => NativeBody::None,
        RequestBody::Bytes(bytes) => NativeBody::Buffer(bytes),
        RequestBody::Reader { reader, length } => {
            if let Some(length) = length {
                if !headers.contains_key(CONTENT_LENGTH) {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
                }
            }
            NativeBody::Stream { reader, length }
        }
    };

    Ok(NativeRequest {
        id: Uuid::new_v4(),
        method: request.method,
        uri,
        headers,
        body,
        timeout: request.options.timeout.or_else(|| config.request_timeout()),
    })
}

fn parse_url(url: &str) -> Result<Uri, TranslationError> {
    let uri: Uri = url
        .parse()
        .map_err(|_| TranslationError::InvalidUrl(url.to_string()))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(other) => return Err(TranslationError::UnsupportedScheme(other.to_string())),
        None => return Err(TranslationError::InvalidUrl(url.to_string())),
    }
    if uri.authority().is_none() {
        return Err(TranslationError::InvalidUrl(url.to_string()));
    }
    Ok(uri)
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), TranslationError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| TranslationError::InvalidHeaderName(name.to_string()))?;
    // Tab is the only control byte allowed inside a field value.
    if value.bytes().any(|b| (b < 0x20 && b != b'\t') || b == 0x7f) {
        return Err(TranslationError::InvalidHeaderValue {
            name: name.to_string(),
        });
    }
    let header_value = HeaderValue::from_str(value).map_err(|_| {
        TranslationError::InvalidHeaderValue {
            name: name.to_string(),
        }
    })?;
    Ok((header_name, header_value))
}

//! Request and response shapes at the client-abstraction boundary.
//!
//! # Design
//! `HttpRequestData` is what a generic HTTP client hands to an engine: plain
//! owned data, with header names and values kept as strings so the
//! translator can reject what the native transport cannot send. The engine
//! takes it by value; once handed over it is never observed again by the
//! caller.
//!
//! `HttpResponseData` is what the engine hands back. Its body is still being
//! filled by a producer task when the caller receives it, and it is bound to
//! the call's cancellation scope.

use std::fmt;
use std::io::Read;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::{Method, StatusCode, Version};

use crate::body::ResponseBody;
use crate::headers::ParsedHeaders;
use crate::scope::Scope;

/// An engine-agnostic HTTP request.
#[derive(Debug)]
pub struct HttpRequestData {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub options: RequestOptions,
}

impl HttpRequestData {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            options: RequestOptions::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Append a header. Repeated names are kept in order.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Override the engine-wide timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }
}

/// Payload of a request.
pub enum RequestBody {
    Empty,
    /// Fully materialized bytes.
    Bytes(Bytes),
    /// A blocking producer, read by the native transport on a worker thread.
    Reader {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
}

impl RequestBody {
    pub fn reader(reader: impl Read + Send + 'static, length: Option<u64>) -> Self {
        RequestBody::Reader {
            reader: Box::new(reader),
            length,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            RequestBody::Reader { length, .. } => {
                f.debug_struct("Reader").field("length", length).finish()
            }
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        RequestBody::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// Per-request overrides of [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
}

/// An engine-agnostic HTTP response.
#[derive(Debug)]
pub struct HttpResponseData {
    pub status: StatusCode,
    /// When the engine accepted the request, before the transfer ran.
    pub request_time: SystemTime,
    pub headers: ParsedHeaders,
    pub version: Version,
    pub body: ResponseBody,
    /// Cancelling this scope fails any pending read of `body`.
    pub call_scope: Scope,
}

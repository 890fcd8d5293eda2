//! The native, blocking transfer library and its boundary types.
//!
//! # Design
//! The engine never talks to the transfer library directly. It hands a
//! [`NativeRequest`] to a [`NativeTransport`] on a worker thread and gets a
//! [`RawTransferResult`] back: status, protocol token and the head and body
//! as raw bytes. Everything above this seam parses those bytes itself.
//!
//! [`UreqTransport`] is the production implementation. One `ureq::Agent` is
//! opened per engine and shared by all worker threads; its connection pool is
//! the shared native context. The agent already parses the head, so it is
//! serialized back into wire form, which is what a header callback of a C
//! transfer library would have collected.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{TransferError, TransferErrorKind};
use crate::scope::Scope;

/// A request in the form the transport consumes.
pub struct NativeRequest {
    pub id: Uuid,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: NativeBody,
    /// Effective timeout after per-request overrides.
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for NativeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub enum NativeBody {
    None,
    Buffer(Bytes),
    /// Read by the transport while it sends the request.
    Stream {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
}

/// Everything the transport produced for one completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransferResult {
    pub status: u16,
    /// `"1.0"`, `"1.1"`, `"2"` ...; see [`version_token`].
    pub version: String,
    pub header_bytes: Vec<u8>,
    pub body_bytes: Vec<u8>,
}

/// A blocking transfer library.
///
/// `perform` runs on a dedicated worker thread and may block. It may be
/// called from several threads at once. Implementations that can interrupt a
/// running transfer should poll `scope` and return
/// [`TransferErrorKind::Aborted`] once it is cancelled.
pub trait NativeTransport: Send + Sync + 'static {
    fn perform(
        &self,
        request: NativeRequest,
        scope: &Scope,
    ) -> Result<RawTransferResult, TransferError>;

    /// Release the native handle. Later transfers fail with
    /// [`TransferErrorKind::Closed`].
    fn close(&self) {}
}

/// Protocol token for `version`, as reported in [`RawTransferResult`].
pub fn version_token(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "unknown",
    }
}

// ---------------------------------------------------------------------------
// ureq
// ---------------------------------------------------------------------------

/// Size of one body read; the scope is polled between reads.
const READ_CHUNK: usize = 16 * 1024;

/// [`NativeTransport`] backed by a shared `ureq::Agent`.
///
/// Each transfer carries its own deadline, so a call abandoned by a timeout
/// frees its thread when the deadline passes. The body is read in chunks and
/// the read stops as soon as the scope is cancelled or the transport closed.
pub struct UreqTransport {
    agent: Mutex<Option<ureq::Agent>>,
    closed: AtomicBool,
    max_body: u64,
}

impl UreqTransport {
    /// Open the native handle.
    pub fn open(config: &EngineConfig) -> Result<Self, TransferError> {
        let proxy = match &config.proxy {
            Some(url) => Some(ureq::Proxy::new(url).map_err(map_ureq_error)?),
            None => None,
        };
        let tls = ureq::tls::TlsConfig::builder()
            .disable_verification(!config.ssl_verify)
            .build();

        // Status codes are data here, not errors.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(config.max_redirects)
            .max_redirects_will_error(false)
            .timeout_connect(config.connect_timeout())
            .timeout_global(config.request_timeout())
            .proxy(proxy)
            .tls_config(tls)
            .build()
            .new_agent();

        Ok(Self {
            agent: Mutex::new(Some(agent)),
            closed: AtomicBool::new(false),
            max_body: config.max_response_body,
        })
    }

    fn agent(&self) -> Result<ureq::Agent, TransferError> {
        self.agent
            .lock()
            .clone()
            .ok_or_else(|| TransferError::new(TransferErrorKind::Closed, "agent released"))
    }

    fn run<B: ureq::AsSendBody>(
        &self,
        builder: http::request::Builder,
        body: B,
        timeout: Option<Duration>,
    ) -> Result<http::Response<ureq::Body>, TransferError> {
        let agent = self.agent()?;
        let request = builder
            .body(body)
            .map_err(|e| TransferError::new(TransferErrorKind::Protocol, e.to_string()))?;
        let request = agent
            .configure_request(request)
            .timeout_global(timeout)
            .build();
        agent.run(request).map_err(map_ureq_error)
    }

    fn check_live(&self, scope: &Scope) -> Result<(), TransferError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransferError::new(TransferErrorKind::Closed, "agent released"));
        }
        if scope.is_cancelled() {
            return Err(TransferError::new(TransferErrorKind::Aborted, "call cancelled"));
        }
        Ok(())
    }

    /// Read the body up to `max_body`, giving up once the call is abandoned.
    fn read_body(&self, reader: &mut impl Read, scope: &Scope) -> Result<Vec<u8>, TransferError> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            self.check_live(scope)?;
            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(out),
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(map_io_error(err)),
            };
            if (out.len() + n) as u64 > self.max_body {
                return Err(TransferError::new(
                    TransferErrorKind::BodyTooLarge,
                    format!("body exceeds {} bytes", self.max_body),
                ));
            }
            out.extend_from_slice(&buf[..n]);
        }
    }
}

impl NativeTransport for UreqTransport {
    fn perform(
        &self,
        request: NativeRequest,
        scope: &Scope,
    ) -> Result<RawTransferResult, TransferError> {
        self.check_live(scope)?;

        let mut builder = http::Request::builder()
            .method(request.method)
            .uri(request.uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = request.headers;
        }

        let timeout = request.timeout;
        let response = match request.body {
            NativeBody::None => self.run(builder, (), timeout),
            NativeBody::Buffer(bytes) => self.run(builder, bytes.to_vec(), timeout),
            NativeBody::Stream { reader, .. } => {
                self.run(builder, ureq::SendBody::from_owned_reader(reader), timeout)
            }
        }?;

        let (parts, mut body) = response.into_parts();
        let body_bytes = self.read_body(&mut body.as_reader(), scope)?;

        Ok(RawTransferResult {
            status: parts.status.as_u16(),
            version: version_token(parts.version).to_string(),
            header_bytes: serialize_head(parts.version, parts.status, &parts.headers),
            body_bytes,
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.agent.lock().take();
    }
}

/// Write a response head back into wire form.
fn serialize_head(version: Version, status: http::StatusCode, headers: &HeaderMap) -> Vec<u8> {
    let mut out = format!(
        "{:?} {} {}\r\n",
        version,
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

fn map_ureq_error(err: ureq::Error) -> TransferError {
    let kind = match &err {
        ureq::Error::Timeout(_) => TransferErrorKind::Timeout,
        ureq::Error::HostNotFound => TransferErrorKind::HostNotFound,
        ureq::Error::ConnectionFailed => TransferErrorKind::ConnectFailed,
        ureq::Error::TooManyRedirects => TransferErrorKind::TooManyRedirects,
        ureq::Error::BodyExceedsLimit(_) => TransferErrorKind::BodyTooLarge,
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            TransferErrorKind::ConnectionRefused
        }
        ureq::Error::Io(_) => TransferErrorKind::Io,
        ureq::Error::Protocol(_) => TransferErrorKind::Protocol,
        _ => TransferErrorKind::Other,
    };
    TransferError::new(kind, err.to_string())
}

fn map_io_error(err: io::Error) -> TransferError {
    let kind = match err.kind() {
        io::ErrorKind::TimedOut => TransferErrorKind::Timeout,
        io::ErrorKind::ConnectionRefused => TransferErrorKind::ConnectionRefused,
        _ => TransferErrorKind::Io,
    };
    TransferError::new(kind, err.to_string())
}

//! Error types for the transfer engine.
//!
//! # Design
//! Every failure the engine reports is a structured variant of [`Error`].
//! The variants line up with the stage that failed: translating the request,
//! running the native transfer, interpreting the status code or header
//! block, or calling into an engine that has already been closed.
//!
//! `IllegalState` and `Runtime` are kept only so hosts that matched on the
//! old generic signals still compile. The engine never constructs them.

use std::fmt;

/// Errors returned by the engine and by response body streams.
#[derive(Debug)]
pub enum Error {
    /// The request could not be mapped onto the native transport.
    Translation(TranslationError),

    /// The native transport failed before a complete response was received.
    Transfer(TransferError),

    /// The native transport reported a status code outside `100..=599`.
    InvalidStatus(u16),

    /// The raw header block was malformed.
    InvalidHeaders(HeaderError),

    /// The engine was closed before or while the operation ran.
    EngineClosed,

    /// The call scope was cancelled.
    Cancelled,

    #[deprecated(note = "use the structured variants instead")]
    IllegalState(String),

    #[deprecated(note = "use the structured variants instead")]
    Runtime(String),
}

impl Error {
    /// Returns true if this error was caused by cancellation or engine close.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::EngineClosed)
    }

    /// Returns the transfer error, if this is one.
    pub fn as_transfer(&self) -> Option<&TransferError> {
        match self {
            Error::Transfer(err) => Some(err),
            _ => None,
        }
    }
}

#[allow(deprecated)]
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Translation(err) => write!(f, "request translation failed: {err}"),
            Error::Transfer(err) => write!(f, "transfer failed: {err}"),
            Error::InvalidStatus(code) => write!(f, "invalid status code {code}"),
            Error::InvalidHeaders(err) => write!(f, "invalid response headers: {err}"),
            Error::EngineClosed => write!(f, "engine is closed"),
            Error::Cancelled => write!(f, "call was cancelled"),
            Error::IllegalState(msg) => write!(f, "illegal state: {msg}"),
            Error::Runtime(msg) => write!(f, "runtime error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Translation(err) => Some(err),
            Error::Transfer(err) => Some(err),
            Error::InvalidHeaders(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TranslationError> for Error {
    fn from(err: TranslationError) -> Self {
        Error::Translation(err)
    }
}

impl From<TransferError> for Error {
    fn from(err: TransferError) -> Self {
        Error::Transfer(err)
    }
}

impl From<HeaderError> for Error {
    fn from(err: HeaderError) -> Self {
        Error::InvalidHeaders(err)
    }
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// A request or protocol token that cannot be represented natively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    /// The URL did not parse as an absolute URI.
    InvalidUrl(String),

    /// The URL scheme is not `http` or `https`.
    UnsupportedScheme(String),

    /// A header name is not a valid HTTP token.
    InvalidHeaderName(String),

    /// A header value contains bytes the transport cannot transmit.
    InvalidHeaderValue { name: String },

    /// The transport reported a protocol version token with no mapping.
    UnknownVersion(String),
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationError::InvalidUrl(url) => write!(f, "invalid url {url:?}"),
            TranslationError::UnsupportedScheme(scheme) => {
                write!(f, "unsupported scheme {scheme:?}")
            }
            TranslationError::InvalidHeaderName(name) => {
                write!(f, "invalid header name {name:?}")
            }
            TranslationError::InvalidHeaderValue { name } => {
                write!(f, "header {name:?} has a value that cannot be transmitted")
            }
            TranslationError::UnknownVersion(token) => {
                write!(f, "unknown protocol version {token:?}")
            }
        }
    }
}

impl std::error::Error for TranslationError {}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

/// Classification of a native transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    ConnectionRefused,
    HostNotFound,
    ConnectFailed,
    Timeout,
    TooManyRedirects,
    BodyTooLarge,
    Io,
    Protocol,
    /// The native handle was released before the transfer started.
    Closed,
    /// The transfer was abandoned because its call scope was cancelled.
    Aborted,
    Other,
}

impl fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferErrorKind::ConnectionRefused => "connection refused",
            TransferErrorKind::HostNotFound => "host not found",
            TransferErrorKind::ConnectFailed => "connect failed",
            TransferErrorKind::Timeout => "timed out",
            TransferErrorKind::TooManyRedirects => "too many redirects",
            TransferErrorKind::BodyTooLarge => "body too large",
            TransferErrorKind::Io => "i/o error",
            TransferErrorKind::Protocol => "protocol error",
            TransferErrorKind::Closed => "transport closed",
            TransferErrorKind::Aborted => "aborted",
            TransferErrorKind::Other => "transport error",
        };
        f.write_str(name)
    }
}

/// A native transport failure with the transport's own message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferError {
    pub kind: TransferErrorKind,
    pub message: String,
}

impl TransferError {
    pub fn new(kind: TransferErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for TransferError {}

// ---------------------------------------------------------------------------
// Header parsing
// ---------------------------------------------------------------------------

/// Reasons a raw header block is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// The block does not start with a CRLF-terminated status line.
    MissingStatusLine,

    /// The block ends before the blank line that terminates it.
    Unterminated,

    /// A field line is not of the form `Name: value`.
    InvalidField,

    /// More fields than `max_header_count`.
    TooManyHeaders,

    /// Bytes follow the final header block.
    TrailingBytes,
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::MissingStatusLine => write!(f, "missing status line"),
            HeaderError::Unterminated => write!(f, "header block is not terminated"),
            HeaderError::InvalidField => write!(f, "malformed header field"),
            HeaderError::TooManyHeaders => write!(f, "too many header fields"),
            HeaderError::TrailingBytes => write!(f, "unexpected bytes after header block"),
        }
    }
}

impl std::error::Error for HeaderError {}

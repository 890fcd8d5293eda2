//! An HTTP client engine that runs requests on a blocking native transport.
//!
//! # Overview
//! A generic HTTP client hands the engine an [`HttpRequestData`]; the engine
//! translates it, runs the transfer on a dedicated worker thread, and
//! rebuilds an [`HttpResponseData`] with a streaming body from the raw bytes
//! the transport produced. The caller's async runtime is never blocked.
//!
//! # Design
//! - `translate` is pure and rejects anything the transport cannot send.
//! - `worker` owns the [`NativeTransport`] and its threads; callers suspend
//!   on a oneshot reply.
//! - `reconstruct` parses the raw head with `headers` and feeds the body
//!   through a channel bound to the call's [`Scope`].
//! - `engine` wires these together and owns the scope tree: closing the
//!   engine cancels every outstanding call and open body.

pub mod body;
pub mod config;
pub mod engine;
pub mod error;
pub mod headers;
pub mod http;
pub mod native;
pub mod reconstruct;
pub mod scope;
pub mod translate;
pub mod worker;

pub use body::ResponseBody;
pub use config::EngineConfig;
pub use engine::{Dispatcher, EngineState, HttpClientEngine, NativeEngine};
pub use error::{Error, HeaderError, TransferError, TransferErrorKind, TranslationError};
pub use headers::ParsedHeaders;
pub use crate::http::{HttpRequestData, HttpResponseData, RequestBody, RequestOptions};
pub use native::{NativeBody, NativeRequest, NativeTransport, RawTransferResult, UreqTransport};
pub use scope::Scope;

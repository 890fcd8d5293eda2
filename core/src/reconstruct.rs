//! Response reconstruction.
//!
//! # Design
//! `build` consumes a [`RawTransferResult`] exactly once. Status, version and
//! header block are all validated before anything is spawned, so a failure
//! leaves no producer task or open body behind. Only then is the body handed
//! to a producer task that writes it into the body channel; the transport's
//! buffer moves into a `Bytes` without copying.
//!
//! Status policy: codes outside `100..=599` are rejected with
//! [`Error::InvalidStatus`]. There is no fallback status.

use std::time::SystemTime;

use bytes::Bytes;
use http::{StatusCode, Version};
use tracing::trace;

use crate::body::{BodySender, ResponseBody};
use crate::config::EngineConfig;
use crate::error::{Error, TranslationError};
use crate::headers;
use crate::http::HttpResponseData;
use crate::native::RawTransferResult;
use crate::scope::Scope;

/// Assemble the response for a completed transfer.
///
/// Must be called inside a tokio runtime; the body producer is spawned on it.
pub fn build(
    raw: RawTransferResult,
    request_time: SystemTime,
    call_scope: Scope,
    config: &EngineConfig,
) -> Result<HttpResponseData, Error> {
    let status = map_status(raw.status)?;
    let version = map_version(&raw.version)?;
    let headers = headers::parse(&raw.header_bytes, config.max_header_count)?;

    let (sender, body) = ResponseBody::channel(call_scope.clone(), config.body_channel_capacity);
    tokio::spawn(produce(sender, Bytes::from(raw.body_bytes)));

    Ok(HttpResponseData {
        status,
        request_time,
        headers,
        version,
        body,
        call_scope,
    })
}

/// Write an already complete body in a single send.
async fn produce(sender: BodySender, body: Bytes) {
    if body.is_empty() {
        return;
    }
    let len = body.len();
    if sender.send(body).await.is_err() {
        trace!("body of {} bytes dropped, reader gone or call cancelled", len);
    }
}

/// Map a numeric status code, rejecting anything outside `100..=599`.
pub fn map_status(code: u16) -> Result<StatusCode, Error> {
    if !(100..=599).contains(&code) {
        return Err(Error::InvalidStatus(code));
    }
    StatusCode::from_u16(code).map_err(|_| Error::InvalidStatus(code))
}

/// Map a transport protocol token onto an HTTP version.
pub fn map_version(token: &str) -> Result<Version, TranslationError> {
    match token {
        "0.9" => Ok(Version::HTTP_09),
        "1.0" => Ok(Version::HTTP_10),
        "1.1" => Ok(Version::HTTP_11),
        "2" | "2.0" => Ok(Version::HTTP_2),
        "3" | "3.0" => Ok(Version::HTTP_3),
        other => Err(TranslationError::UnknownVersion(other.to_string())),
    }
}

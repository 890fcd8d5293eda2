use std::time::Duration;

use axum::{
    body::Bytes,
    extract::Path,
    http::{header, HeaderMap, Method, StatusCode},
    response::AppendHeaders,
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// Largest body `/bytes/{len}` will produce.
pub const MAX_GENERATED_BYTES: usize = 16 * 1024 * 1024;

/// What `/echo` saw of the request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Echo {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

pub fn app() -> Router {
    Router::new()
        .route("/hello", get(hello))
        .route("/echo", any(echo))
        .route("/cookies", get(cookies))
        .route("/status/{code}", get(status))
        .route("/slow/{ms}", get(slow))
        .route("/bytes/{len}", get(generated_bytes))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn hello() -> ([(header::HeaderName, &'static str); 1], &'static str) {
    ([(header::CONTENT_TYPE, "text/plain")], "hi")
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    Json(Echo {
        method: method.to_string(),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn cookies() -> (AppendHeaders<[(header::HeaderName, &'static str); 2]>, &'static str) {
    (
        AppendHeaders([
            (header::SET_COOKIE, "first=1"),
            (header::SET_COOKIE, "second=2"),
        ]),
        "cookies",
    )
}

async fn status(Path(code): Path<u16>) -> Result<StatusCode, StatusCode> {
    StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn slow(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

async fn generated_bytes(Path(len): Path<usize>) -> Result<Vec<u8>, StatusCode> {
    if len > MAX_GENERATED_BYTES {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    Ok((0..len).map(|i| (i % 251) as u8).collect())
}

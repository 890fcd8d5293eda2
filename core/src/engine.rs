//! The engine facade.
//!
//! # Design
//! `NativeEngine` chains translation, the transfer worker and response
//! reconstruction behind the pluggable [`HttpClientEngine`] contract.
//!
//! Lifecycle: `Created -> Running -> Closing -> Closed`. `close` first shuts
//! the worker down so it accepts nothing new, then cancels the engine-wide
//! context, which cascades to every live call scope and so to every open
//! body. A closed engine fails `execute` with [`Error::EngineClosed`] without
//! touching the transport.
//!
//! Every call runs in a child scope of the engine context. The scope is
//! cancelled if the call fails, times out, or the `execute` future is
//! dropped; on success it travels with the response and ends when the body
//! is read to the end.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{Error, TransferError, TransferErrorKind};
use crate::http::{HttpRequestData, HttpResponseData};
use crate::native::{NativeTransport, UreqTransport};
use crate::reconstruct;
use crate::scope::Scope;
use crate::translate::translate;
use crate::worker::TransferWorker;

/// The capability set a pluggable HTTP engine provides to a client.
#[async_trait]
pub trait HttpClientEngine: Send + Sync {
    fn config(&self) -> &EngineConfig;

    /// How the engine schedules its work.
    fn dispatcher(&self) -> Dispatcher;

    async fn execute(&self, request: HttpRequestData) -> Result<HttpResponseData, Error>;

    /// Release the engine. Idempotent.
    fn close(&self);
}

/// Describes where an engine's work runs.
///
/// Futures returned by `execute` and body reads run on whichever runtime
/// polls them and never block it. Native transfers run on `worker_threads`
/// dedicated threads named `{thread_name}-{index}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatcher {
    pub worker_threads: usize,
    pub thread_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Running,
    Closing,
    Closed,
}

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

/// An [`HttpClientEngine`] that runs requests on a blocking native transport.
pub struct NativeEngine {
    config: EngineConfig,
    worker: TransferWorker,
    context: Scope,
    state: AtomicU8,
}

impl NativeEngine {
    /// Open an engine backed by [`UreqTransport`].
    pub fn new(config: EngineConfig) -> Result<Self, Error> {
        let transport = UreqTransport::open(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Open an engine over any native transport.
    pub fn with_transport(
        config: EngineConfig,
        transport: Arc<dyn NativeTransport>,
    ) -> Result<Self, Error> {
        let state = AtomicU8::new(CREATED);
        let worker = TransferWorker::start(transport, &config).map_err(|err| {
            TransferError::new(
                TransferErrorKind::Io,
                format!("spawning transfer threads: {err}"),
            )
        })?;
        state.store(RUNNING, Ordering::SeqCst);

        Ok(Self {
            config,
            worker,
            context: Scope::root(),
            state,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            worker_threads: self.worker.threads(),
            thread_name: self.config.thread_name.clone(),
        }
    }

    pub fn state(&self) -> EngineState {
        match self.state.load(Ordering::SeqCst) {
            CREATED => EngineState::Created,
            RUNNING => EngineState::Running,
            CLOSING => EngineState::Closing,
            _ => EngineState::Closed,
        }
    }

    /// The engine-wide scope every call scope descends from.
    pub fn context(&self) -> &Scope {
        &self.context
    }

    /// Transfers currently running inside the native transport.
    pub fn in_flight(&self) -> usize {
        self.worker.in_flight()
    }

    /// Execute one request.
    ///
    /// Resolves once the transfer is complete and the head is parsed. The
    /// body of the returned response is still being filled concurrently.
    pub async fn execute(&self, request: HttpRequestData) -> Result<HttpResponseData, Error> {
        if self.state() != EngineState::Running {
            return Err(Error::EngineClosed);
        }
        let request_time = SystemTime::now();

        let native = translate(request, &self.config)?;
        let timeout = native.timeout;
        debug!(id = %native.id, method = %native.method, uri = %native.uri, "executing request");

        let call = CallGuard::new(self.context.child());
        let transfer = self.worker.execute(native, call.scope());
        let raw = match timeout {
            Some(limit) => {
                tokio::select! {
                    result = transfer => result,
                    _ = tokio::time::sleep(limit) => {
                        call.scope().cancel();
                        Err(Error::Transfer(TransferError::new(
                            TransferErrorKind::Timeout,
                            format!("no response within {limit:?}"),
                        )))
                    }
                }
            }
            None => transfer.await,
        }?;

        let response =
            reconstruct::build(raw, request_time, call.scope().clone(), &self.config)?;
        call.disarm();
        Ok(response)
    }

    /// Shut the worker down and cancel every outstanding call. Idempotent.
    pub fn close(&self) {
        if self
            .state
            .compare_exchange(RUNNING, CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        debug!("closing engine, {} calls outstanding", self.context.live_children());
        self.worker.shutdown();
        self.context.cancel();
        self.state.store(CLOSED, Ordering::SeqCst);
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl HttpClientEngine for NativeEngine {
    fn config(&self) -> &EngineConfig {
        NativeEngine::config(self)
    }

    fn dispatcher(&self) -> Dispatcher {
        NativeEngine::dispatcher(self)
    }

    async fn execute(&self, request: HttpRequestData) -> Result<HttpResponseData, Error> {
        NativeEngine::execute(self, request).await
    }

    fn close(&self) {
        NativeEngine::close(self)
    }
}

/// Cancels the call scope unless the call produced a response.
struct CallGuard {
    scope: Scope,
    armed: bool,
}

impl CallGuard {
    fn new(scope: Scope) -> Self {
        Self { scope, armed: true }
    }

    fn scope(&self) -> &Scope {
        &self.scope
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.armed {
            self.scope.cancel();
        }
    }
}

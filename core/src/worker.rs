//! Transfer worker: runs blocking native transfers off the caller's runtime.
//!
//! # Design
//! The worker owns the engine's [`NativeTransport`] and a fixed set of named
//! OS threads that pull jobs from one shared queue. A caller enqueues a job
//! together with a oneshot reply channel and its call scope, then suspends
//! until either the reply arrives or the scope is cancelled. No tokio worker
//! thread ever blocks on the transport.
//!
//! Jobs whose scope was cancelled while queued are skipped. Time spent in the
//! queue counts against the request timeout: the transport only gets what is
//! left, and a job whose deadline passed while queued never starts. A
//! transfer that completes after its scope was cancelled has its result
//! dropped.
//!
//! `shutdown` stops accepting jobs, cancels the scope of every queued or
//! running job, and releases the native handle. Threads exit once the queue
//! is drained; they are not joined. A running native call ends at its
//! deadline or the next time the transport polls its scope.

use std::collections::HashMap;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Error, TransferError, TransferErrorKind};
use crate::native::{NativeRequest, NativeTransport, RawTransferResult};
use crate::scope::Scope;

struct Job {
    request: NativeRequest,
    scope: Scope,
    queued_at: Instant,
    reply: oneshot::Sender<Result<RawTransferResult, Error>>,
}

struct Shared {
    transport: Arc<dyn NativeTransport>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    /// Scopes of every job that has been queued and not yet finished.
    active: Mutex<HashMap<Uuid, Scope>>,
}

pub struct TransferWorker {
    shared: Arc<Shared>,
    jobs: Mutex<Option<Sender<Job>>>,
    threads: usize,
}

impl TransferWorker {
    /// Spawn the transfer threads.
    pub fn start(transport: Arc<dyn NativeTransport>, config: &EngineConfig) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let shared = Arc::new(Shared {
            transport,
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            active: Mutex::new(HashMap::new()),
        });

        let threads = config.worker_threads.max(1);
        for index in 0..threads {
            let rx = rx.clone();
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || run(shared, rx))?;
        }
        debug!("transfer worker started with {} threads", threads);

        Ok(Self {
            shared,
            jobs: Mutex::new(Some(tx)),
            threads,
        })
    }

    /// Run `request` on a transfer thread and wait for its result.
    ///
    /// Returns [`Error::Cancelled`] as soon as `scope` is cancelled, or
    /// [`Error::EngineClosed`] if the cancellation came from `shutdown`.
    pub async fn execute(
        &self,
        request: NativeRequest,
        scope: &Scope,
    ) -> Result<RawTransferResult, Error> {
        if self.is_closed() {
            return Err(Error::EngineClosed);
        }

        let id = request.id;
        let (reply, rx) = oneshot::channel();
        self.shared.active.lock().insert(id, scope.clone());
        {
            let jobs = self.jobs.lock();
            let sent = match jobs.as_ref() {
                Some(jobs) => jobs
                    .send(Job {
                        request,
                        scope: scope.clone(),
                        queued_at: Instant::now(),
                        reply,
                    })
                    .is_ok(),
                None => false,
            };
            if !sent {
                self.shared.active.lock().remove(&id);
                return Err(Error::EngineClosed);
            }
        }

        tokio::select! {
            biased;
            result = rx => match result {
                Ok(result) => result,
                Err(_) => Err(self.cancellation_error()),
            },
            _ = scope.cancelled() => Err(self.cancellation_error()),
        }
    }

    /// Stop accepting transfers, abort the outstanding ones and release the
    /// native handle. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.jobs.lock().take();

        let active: Vec<Scope> = self.shared.active.lock().drain().map(|(_, s)| s).collect();
        for scope in &active {
            scope.cancel();
        }
        self.shared.transport.close();
        debug!(
            "transfer worker shut down, {} transfers aborted, {} still on a thread",
            active.len(),
            self.in_flight()
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Transfers currently inside the native transport.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    fn cancellation_error(&self) -> Error {
        if self.is_closed() {
            Error::EngineClosed
        } else {
            Error::Cancelled
        }
    }
}

impl Drop for TransferWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: Arc<Shared>, jobs: Receiver<Job>) {
    for job in jobs.iter() {
        shared.process(job);
    }
    trace!("transfer thread exiting");
}

impl Shared {
    fn process(&self, job: Job) {
        let Job {
            mut request,
            scope,
            queued_at,
            reply,
        } = job;
        let id = request.id;

        if self.closed.load(Ordering::SeqCst) {
            self.active.lock().remove(&id);
            let _ = reply.send(Err(Error::EngineClosed));
            return;
        }
        if scope.is_cancelled() || reply.is_closed() {
            trace!("skipping transfer {} abandoned while queued", id);
            self.active.lock().remove(&id);
            return;
        }
        if let Some(limit) = request.timeout {
            let remaining = limit.saturating_sub(queued_at.elapsed());
            if remaining.is_zero() {
                debug!("transfer {} timed out while queued", id);
                self.active.lock().remove(&id);
                let _ = reply.send(Err(Error::Transfer(TransferError::new(
                    TransferErrorKind::Timeout,
                    format!("no response within {limit:?}"),
                ))));
                return;
            }
            request.timeout = Some(remaining);
        }

        let method = request.method.clone();
        let uri = request.uri.clone();
        let started = Instant::now();

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = catch_unwind(AssertUnwindSafe(|| self.transport.perform(request, &scope)))
            .unwrap_or_else(|_| {
                Err(TransferError::new(TransferErrorKind::Other, "native transport panicked"))
            });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.active.lock().remove(&id);

        let elapsed = started.elapsed();
        match &result {
            Ok(raw) => debug!(%id, %method, %uri, status = raw.status, ?elapsed, "transfer complete"),
            Err(err) => warn!(%id, %method, %uri, ?elapsed, "transfer failed: {}", err),
        }

        if scope.is_cancelled() {
            debug!("dropping result of transfer {} after its call was cancelled", id);
            return;
        }
        let _ = reply.send(result.map_err(Error::from));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::{HeaderMap, Method, Uri};

    use super::*;
    use crate::native::NativeBody;

    /// Reports the name of the thread it ran on as the body.
    #[derive(Default)]
    struct ThreadNameTransport {
        calls: AtomicUsize,
    }

    impl NativeTransport for ThreadNameTransport {
        fn perform(
            &self,
            _request: NativeRequest,
            _scope: &Scope,
        ) -> Result<RawTransferResult, TransferError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = thread::current().name().unwrap_or_default().to_string();
            Ok(RawTransferResult {
                status: 200,
                version: "1.1".to_string(),
                header_bytes: b"HTTP/1.1 200 OK\r\n\r\n".to_vec(),
                body_bytes: name.into_bytes(),
            })
        }
    }

    /// Blocks until its scope is cancelled.
    struct HangingTransport;

    impl NativeTransport for HangingTransport {
        fn perform(
            &self,
            _request: NativeRequest,
            scope: &Scope,
        ) -> Result<RawTransferResult, TransferError> {
            while !scope.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            Err(TransferError::new(TransferErrorKind::Aborted, "scope cancelled"))
        }
    }

    /// Sleeps, then answers.
    struct SlowTransport {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl NativeTransport for SlowTransport {
        fn perform(
            &self,
            _request: NativeRequest,
            _scope: &Scope,
        ) -> Result<RawTransferResult, TransferError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(RawTransferResult {
                status: 204,
                version: "1.1".to_string(),
                header_bytes: b"HTTP/1.1 204 No Content\r\n\r\n".to_vec(),
                body_bytes: Vec::new(),
            })
        }
    }

    struct PanickingTransport;

    impl NativeTransport for PanickingTransport {
        fn perform(
            &self,
            _request: NativeRequest,
            _scope: &Scope,
        ) -> Result<RawTransferResult, TransferError> {
            panic!("boom");
        }
    }

    fn request() -> NativeRequest {
        NativeRequest {
            id: Uuid::new_v4(),
            method: Method::GET,
            uri: Uri::from_static("http://localhost/"),
            headers: HeaderMap::new(),
            body: NativeBody::None,
            timeout: None,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            worker_threads: 2,
            thread_name: "test-transfer".to_string(),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn runs_on_dedicated_thread() {
        let worker = TransferWorker::start(Arc::new(ThreadNameTransport::default()), &config())
            .unwrap();
        let root = Scope::root();
        let raw = worker.execute(request(), &root.child()).await.unwrap();
        let thread_name = String::from_utf8(raw.body_bytes).unwrap();
        assert!(thread_name.starts_with("test-transfer-"), "{thread_name}");
        assert_eq!(worker.threads(), 2);
    }

    #[tokio::test]
    async fn execute_after_shutdown_fails_without_transfer() {
        let transport = Arc::new(ThreadNameTransport::default());
        let worker = TransferWorker::start(transport.clone(), &config()).unwrap();
        worker.shutdown();
        worker.shutdown();

        let err = worker.execute(request(), &Scope::root()).await.unwrap_err();
        assert!(matches!(err, Error::EngineClosed));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_aborts_running_transfer() {
        let worker = Arc::new(TransferWorker::start(Arc::new(HangingTransport), &config()).unwrap());
        let root = Scope::root();
        let scope = root.child();

        let pending = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.execute(request(), &scope).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("execute should return after shutdown")
            .unwrap();
        assert!(matches!(result, Err(Error::EngineClosed)));
    }

    #[tokio::test]
    async fn cancelled_scope_unblocks_caller() {
        let worker = TransferWorker::start(Arc::new(HangingTransport), &config()).unwrap();
        let root = Scope::root();
        let scope = root.child();

        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = worker.execute(request(), &scope).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn panicking_transport_reports_transfer_error() {
        let worker = TransferWorker::start(Arc::new(PanickingTransport), &config()).unwrap();
        let err = worker
            .execute(request(), &Scope::root().child())
            .await
            .unwrap_err();
        let transfer = err.as_transfer().expect("transfer error");
        assert_eq!(transfer.kind, TransferErrorKind::Other);

        // The thread survived the panic.
        let err = worker
            .execute(request(), &Scope::root().child())
            .await
            .unwrap_err();
        assert!(err.as_transfer().is_some());
    }

    #[tokio::test]
    async fn queued_job_past_its_deadline_never_starts() {
        let transport = Arc::new(SlowTransport {
            delay: Duration::from_millis(100),
            calls: AtomicUsize::new(0),
        });
        let config = EngineConfig {
            worker_threads: 1,
            ..config()
        };
        let worker = Arc::new(TransferWorker::start(transport.clone(), &config).unwrap());
        let root = Scope::root();

        let first = {
            let worker = Arc::clone(&worker);
            let scope = root.child();
            tokio::spawn(async move { worker.execute(request(), &scope).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut late = request();
        late.timeout = Some(Duration::from_millis(10));
        let err = worker.execute(late, &root.child()).await.unwrap_err();

        assert_eq!(err.as_transfer().unwrap().kind, TransferErrorKind::Timeout);
        assert!(first.await.unwrap().is_ok());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}

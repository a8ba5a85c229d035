use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info};

use modelgate_core::{
    MemoryPool, Metrics, ModelMetadata, ParameterMap, Result, ServerError,
};

use crate::{
    BatchReceiver, Batcher, BatcherConfig, RequestContainer, RequestSender, Worker,
    WorkerContext,
};

/// Lifecycle of a worker instance. Transitions are monotone: once a worker
/// leaves a state it never returns to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
    Uninitialized,
    Initialized,
    Acquired,
    Running,
    Released,
    Destroyed,
}

const INGRESS_CAPACITY: usize = 1024;
const BATCH_QUEUE_CAPACITY: usize = 128;

/// Owns one worker plug-in instance: its lifecycle state, its batcher and
/// execution threads, and the ingress queue requests are submitted to.
pub struct WorkerRuntime {
    kind: String,
    state: WorkerState,
    worker: Arc<Mutex<Box<dyn Worker>>>,
    context: WorkerContext,
    batch_size: usize,
    batcher_timeout: Duration,
    metadata: Option<ModelMetadata>,
    ingress: Option<RequestSender>,
    batcher_handle: Option<JoinHandle<()>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl WorkerRuntime {
    pub fn new(
        kind: &str,
        endpoint: &str,
        worker: Box<dyn Worker>,
        pool: Arc<MemoryPool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            kind: kind.to_string(),
            state: WorkerState::Uninitialized,
            worker: Arc::new(Mutex::new(worker)),
            context: WorkerContext {
                endpoint: endpoint.to_string(),
                pool,
                metrics,
                allocators: Vec::new(),
            },
            batch_size: 1,
            batcher_timeout: Duration::from_millis(100),
            metadata: None,
            ingress: None,
            batcher_handle: None,
            worker_handle: None,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn endpoint(&self) -> &str {
        &self.context.endpoint
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == WorkerState::Running
    }

    /// IO descriptors, available once the worker has been acquired.
    pub fn metadata(&self) -> Option<&ModelMetadata> {
        self.metadata.as_ref()
    }

    /// Pure CPU setup: the worker declares its batch size and limits.
    pub fn init(&mut self, parameters: &ParameterMap) -> Result<()> {
        self.expect_state(WorkerState::Uninitialized)?;
        {
            let mut worker = self.worker.lock();
            worker.do_init(parameters)?;
            self.batch_size = worker.batch_size().max(1);
        }
        if let Some(ms) = parameters.get_int("batch_timeout_ms") {
            self.batcher_timeout = Duration::from_millis(ms.max(1) as u64);
        }
        self.state = WorkerState::Initialized;
        Ok(())
    }

    /// External resources: model weights, device handles, IO metadata.
    pub fn acquire(&mut self, parameters: &ParameterMap) -> Result<()> {
        self.expect_state(WorkerState::Initialized)?;
        let mut worker = self.worker.lock();
        worker.do_acquire(parameters)?;
        self.metadata = Some(worker.metadata().clone());
        self.context.allocators = worker.get_allocators();
        drop(worker);
        self.state = WorkerState::Acquired;
        Ok(())
    }

    /// Wire up the queues and start the batcher and execution threads.
    pub fn spawn(&mut self) -> Result<()> {
        self.expect_state(WorkerState::Acquired)?;
        let metadata = self
            .metadata
            .clone()
            .ok_or_else(|| ServerError::Internal("worker acquired without metadata".into()))?;

        let (ingress_tx, ingress_rx) = channel::bounded(INGRESS_CAPACITY);
        let (batch_tx, batch_rx) = channel::bounded(BATCH_QUEUE_CAPACITY);

        let batcher = Batcher::new(
            self.worker.lock().batcher_kind(),
            BatcherConfig {
                batch_size: self.batch_size,
                timeout: self.batcher_timeout,
            },
            self.context.clone(),
            metadata.inputs,
            metadata.outputs,
            ingress_rx,
            batch_tx,
        );
        let batcher_handle = std::thread::Builder::new()
            .name(format!("{}-batcher", self.context.endpoint))
            .spawn(move || batcher.run())
            .map_err(|err| ServerError::Internal(format!("spawning batcher thread: {err}")))?;

        let worker = Arc::clone(&self.worker);
        let ctx = self.context.clone();
        let worker_handle = std::thread::Builder::new()
            .name(self.context.endpoint.clone())
            .spawn(move || {
                {
                    let mut worker = worker.lock();
                    worker.do_run(batch_rx.clone(), &ctx);
                }
                drain_pending(&batch_rx, &ctx);
                info!(endpoint = %ctx.endpoint, "worker thread exiting");
            })
            .map_err(|err| ServerError::Internal(format!("spawning worker thread: {err}")))?;

        self.ingress = Some(ingress_tx);
        self.batcher_handle = Some(batcher_handle);
        self.worker_handle = Some(worker_handle);
        self.state = WorkerState::Running;
        info!(endpoint = %self.context.endpoint, kind = %self.kind, "worker running");
        Ok(())
    }

    /// Hand one request to the ingress queue. Only legal while Running.
    pub fn submit(&self, container: RequestContainer) -> Result<()> {
        if self.state != WorkerState::Running {
            return Err(ServerError::FailedPrecondition(format!(
                "worker {} is not running",
                self.context.endpoint
            )));
        }
        let Some(ingress) = &self.ingress else {
            return Err(ServerError::FailedPrecondition(format!(
                "worker {} has no ingress queue",
                self.context.endpoint
            )));
        };
        match ingress.try_send(Some(container)) {
            Ok(()) => {
                self.context.metrics.queue_depth.inc();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(ServerError::ResourceExhausted(format!(
                "ingress queue for {} is full",
                self.context.endpoint
            ))),
            Err(TrySendError::Disconnected(_)) => Err(ServerError::Unavailable(format!(
                "worker {} is shutting down",
                self.context.endpoint
            ))),
        }
    }

    /// Stop the threads and tear the worker down. The stop sentinel flows
    /// through the batcher so any partial batch is flushed, then both
    /// threads are joined and release/destroy run in order.
    pub fn shutdown(&mut self) {
        if self.state == WorkerState::Running {
            debug!(endpoint = %self.context.endpoint, "stopping worker");
            if let Some(ingress) = self.ingress.take() {
                let _ = ingress.send(None);
            }
            if let Some(handle) = self.batcher_handle.take() {
                let _ = handle.join();
            }
            if let Some(handle) = self.worker_handle.take() {
                let _ = handle.join();
            }
            self.worker.lock().do_release();
            self.state = WorkerState::Released;
        } else if self.state == WorkerState::Acquired {
            self.worker.lock().do_release();
            self.state = WorkerState::Released;
        }

        if matches!(self.state, WorkerState::Initialized | WorkerState::Released) {
            self.worker.lock().do_destroy();
            self.state = WorkerState::Destroyed;
        }
    }

    fn expect_state(&self, expected: WorkerState) -> Result<()> {
        if self.state != expected {
            return Err(ServerError::FailedPrecondition(format!(
                "worker {} is {:?}, expected {:?}",
                self.context.endpoint, self.state, expected
            )));
        }
        Ok(())
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Fail everything still queued after the worker's run loop has ended. On a
/// clean stop the sentinel was already consumed and the channel is
/// disconnected, so this returns immediately; after an unrecoverable worker
/// error it keeps draining until the stop signal arrives.
fn drain_pending(rx: &BatchReceiver, ctx: &WorkerContext) {
    loop {
        match rx.recv() {
            Ok(Some(mut batch)) => {
                for request in batch.requests_mut() {
                    ctx.metrics.request_errors.inc();
                    request.run_callback_error(
                        &ctx.endpoint,
                        ServerError::Unavailable("worker shut down".to_string()),
                    );
                }
                batch.return_buffers(&ctx.pool);
            }
            Ok(None) | Err(_) => return,
        }
    }
}

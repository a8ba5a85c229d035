use std::sync::Arc;

use modelgate_core::{
    AllocatorKind, MemoryPool, Metrics, ModelMetadata, ParameterMap, Result,
};

use crate::{BatchReceiver, BatcherKind};

/// Everything a worker and its batcher need from the surrounding server:
/// the endpoint they serve, the pool their buffers come from, the allocator
/// kinds the worker consumes, and the metrics registry.
#[derive(Clone)]
pub struct WorkerContext {
    pub endpoint: String,
    pub pool: Arc<MemoryPool>,
    pub metrics: Arc<Metrics>,
    pub allocators: Vec<AllocatorKind>,
}

/// The worker plug-in ABI. Implementations target CPU, GPU or FPGA
/// back-ends; the runtime drives the lifecycle and never looks inside.
///
/// `do_run` owns the thread it is called on: it must dequeue batches until
/// it observes the `None` sentinel, invoke each request's callback, and
/// hand the batch buffers back to the pool. A per-request model failure is
/// reported through `run_callback_error` and must not stop the loop; only
/// an unrecoverable failure (device loss) may end it early, after which the
/// runtime fails everything still queued.
pub trait Worker: Send {
    fn do_init(&mut self, parameters: &ParameterMap) -> Result<()>;
    fn do_acquire(&mut self, parameters: &ParameterMap) -> Result<()>;
    fn do_run(&mut self, input: BatchReceiver, ctx: &WorkerContext);
    fn do_release(&mut self);
    fn do_destroy(&mut self);

    /// Allocator kinds this worker can consume, in preference order.
    fn get_allocators(&self) -> Vec<AllocatorKind>;

    /// IO descriptors, valid after `do_acquire`.
    fn metadata(&self) -> &ModelMetadata;

    /// Batch size declared during `do_init`.
    fn batch_size(&self) -> usize;

    /// Which batcher implementation to put in front of this worker.
    fn batcher_kind(&self) -> BatcherKind {
        BatcherKind::Hard
    }
}

/// Factory entry in the worker catalog.
pub type WorkerFactory = fn() -> Box<dyn Worker>;

use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::debug;

use modelgate_core::{
    Buffer, DataType, InferenceRequest, PoolError, ServerError, TensorMetadata,
};

use crate::{Batch, RequestContainer, WorkerContext};

/// Requests flow batcher-ward as `Some(container)`; `None` is the stop
/// sentinel, propagated to the worker queue after any partial batch.
pub type RequestSender = Sender<Option<RequestContainer>>;
pub type RequestReceiver = Receiver<Option<RequestContainer>>;
pub type BatchSender = Sender<Option<Batch>>;
pub type BatchReceiver = Receiver<Option<Batch>>;

/// Which batching policy a worker wants in front of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatcherKind {
    /// Assemble exactly N requests or flush on timeout.
    Hard,
    /// Emit as soon as one request is available, coalescing whatever is
    /// already queued.
    Soft,
}

#[derive(Clone, Debug)]
pub struct BatcherConfig {
    pub batch_size: usize,
    pub timeout: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            timeout: Duration::from_millis(100),
        }
    }
}

/// Consumes one worker's request queue and produces batches onto its batch
/// queue. Owns the buffer reservation for each batch it assembles.
pub struct Batcher {
    kind: BatcherKind,
    config: BatcherConfig,
    ctx: WorkerContext,
    inputs: Vec<TensorMetadata>,
    outputs: Vec<TensorMetadata>,
    rx: RequestReceiver,
    tx: BatchSender,
}

impl Batcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: BatcherKind,
        config: BatcherConfig,
        ctx: WorkerContext,
        inputs: Vec<TensorMetadata>,
        outputs: Vec<TensorMetadata>,
        rx: RequestReceiver,
        tx: BatchSender,
    ) -> Self {
        Self {
            kind,
            config,
            ctx,
            inputs,
            outputs,
            rx,
            tx,
        }
    }

    pub fn run(mut self) {
        match self.kind {
            BatcherKind::Hard => self.run_hard(),
            BatcherKind::Soft => self.run_soft(),
        }
        debug!(model = %self.ctx.endpoint, "batcher exiting");
    }

    fn run_hard(&mut self) {
        loop {
            let first = match self.rx.recv() {
                Ok(container) => container,
                Err(_) => return,
            };
            let Some(first) = first else {
                self.emit(None);
                return;
            };

            let mut batch = None;
            self.admit(first, &mut batch);

            let deadline = Instant::now() + self.config.timeout;
            while batch_len(&batch) < self.config.batch_size {
                match self.rx.recv_deadline(deadline) {
                    Ok(Some(container)) => self.admit(container, &mut batch),
                    Ok(None) => {
                        self.flush(batch);
                        self.emit(None);
                        return;
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        self.flush(batch);
                        return;
                    }
                }
            }
            self.flush(batch);
        }
    }

    fn run_soft(&mut self) {
        loop {
            let first = match self.rx.recv() {
                Ok(container) => container,
                Err(_) => return,
            };
            let Some(first) = first else {
                self.emit(None);
                return;
            };

            let mut batch = None;
            self.admit(first, &mut batch);

            while batch_len(&batch) < self.config.batch_size {
                match self.rx.try_recv() {
                    Ok(Some(container)) => self.admit(container, &mut batch),
                    Ok(None) => {
                        self.flush(batch);
                        self.emit(None);
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.flush(batch);
                        return;
                    }
                }
            }
            self.flush(batch);
        }
    }

    /// Validate one request against the worker's input metadata and land its
    /// payloads in the batch buffers. Invalid requests are failed locally
    /// through their own callback and never enter a batch.
    fn admit(&self, container: RequestContainer, batch: &mut Option<Batch>) {
        let RequestContainer {
            mut request,
            trace,
            start_time,
        } = container;
        self.ctx.metrics.queue_depth.dec();

        if let Err(err) = self.validate(&request) {
            debug!(model = %self.ctx.endpoint, id = %request.id, %err, "rejecting request");
            self.ctx.metrics.request_errors.inc();
            request.run_callback_error(&self.ctx.endpoint, err);
            return;
        }

        if batch.is_none() {
            match self.start_batch() {
                Ok(started) => *batch = Some(started),
                Err(err) => {
                    self.ctx.metrics.request_errors.inc();
                    request.run_callback_error(&self.ctx.endpoint, err.into());
                    return;
                }
            }
        }

        if let Some(batch) = batch.as_mut() {
            let index = batch.size();
            for (i, input) in request.inputs.iter().enumerate() {
                let extent = tensor_extent(&self.inputs[i]);
                batch
                    .input_buffer_mut(i)
                    .write_bytes(&input.data, index * extent);
            }
            batch.add_request(request);
            batch.add_trace(trace);
            batch.add_time(start_time);
        }
    }

    fn validate(&self, request: &InferenceRequest) -> Result<(), ServerError> {
        if request.inputs.len() != self.inputs.len() {
            return Err(ServerError::InvalidArgument(format!(
                "expected {} input tensors, got {}",
                self.inputs.len(),
                request.inputs.len()
            )));
        }
        for (input, meta) in request.inputs.iter().zip(&self.inputs) {
            if input.dtype != meta.dtype {
                return Err(ServerError::InvalidArgument(format!(
                    "tensor {}: dtype {} does not match {}",
                    input.name, input.dtype, meta.dtype
                )));
            }
            if input.shape != meta.shape {
                return Err(ServerError::InvalidArgument(format!(
                    "tensor {}: shape {} does not match {}",
                    input.name, input.shape, meta.shape
                )));
            }
            input.validate()?;
            if input.dtype == DataType::String && input.data.len() > tensor_extent(meta) {
                return Err(ServerError::InvalidArgument(format!(
                    "tensor {}: string payload exceeds tensor extent",
                    input.name
                )));
            }
        }
        Ok(())
    }

    /// Reserve the input and output buffer sets for a fresh batch, sized to
    /// the worker's declared metadata times the batch size.
    fn start_batch(&self) -> Result<Batch, PoolError> {
        let inputs = self.reserve(&self.inputs)?;
        let outputs = match self.reserve(&self.outputs) {
            Ok(outputs) => outputs,
            Err(err) => {
                for buffer in inputs {
                    self.ctx.pool.put(buffer);
                }
                return Err(err);
            }
        };
        let mut batch = Batch::new();
        batch.set_buffers(inputs, outputs);
        Ok(batch)
    }

    fn reserve(&self, metas: &[TensorMetadata]) -> Result<Vec<Buffer>, PoolError> {
        let mut buffers = Vec::with_capacity(metas.len());
        for meta in metas {
            match self
                .ctx
                .pool
                .get(&self.ctx.allocators, meta, self.config.batch_size)
            {
                Ok(buffer) => buffers.push(buffer),
                Err(err) => {
                    for buffer in buffers {
                        self.ctx.pool.put(buffer);
                    }
                    return Err(err);
                }
            }
        }
        Ok(buffers)
    }

    fn flush(&self, batch: Option<Batch>) {
        let Some(mut batch) = batch else { return };
        if batch.is_empty() {
            batch.return_buffers(&self.ctx.pool);
            return;
        }
        self.ctx.metrics.batch_size.observe(batch.size() as f64);
        debug!(model = %self.ctx.endpoint, batch = batch.size(), "dispatching batch");
        self.emit(Some(batch));
    }

    fn emit(&self, item: Option<Batch>) {
        let _ = self.tx.send(item);
    }
}

fn batch_len(batch: &Option<Batch>) -> usize {
    batch.as_ref().map_or(0, Batch::size)
}

fn tensor_extent(meta: &TensorMetadata) -> usize {
    meta.shape.numel() * meta.dtype.size()
}

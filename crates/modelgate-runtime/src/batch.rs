use std::time::Instant;

use tracing::Span;

use modelgate_core::{Buffer, InferenceRequest, MemoryPool};

/// What the batcher produces and pushes to a worker: the merged requests,
/// the pool buffers loaned for their tensor data, and the per-request trace
/// spans and ingress timestamps.
#[derive(Debug, Default)]
pub struct Batch {
    requests: Vec<InferenceRequest>,
    input_buffers: Vec<Buffer>,
    output_buffers: Vec<Buffer>,
    traces: Vec<Span>,
    start_times: Vec<Instant>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_request(&mut self, request: InferenceRequest) {
        self.requests.push(request);
    }

    pub fn set_buffers(&mut self, inputs: Vec<Buffer>, outputs: Vec<Buffer>) {
        self.input_buffers = inputs;
        self.output_buffers = outputs;
    }

    pub fn request(&self, index: usize) -> &InferenceRequest {
        &self.requests[index]
    }

    pub fn request_mut(&mut self, index: usize) -> &mut InferenceRequest {
        &mut self.requests[index]
    }

    pub fn requests(&self) -> &[InferenceRequest] {
        &self.requests
    }

    pub fn requests_mut(&mut self) -> &mut [InferenceRequest] {
        &mut self.requests
    }

    pub fn input_buffer(&self, index: usize) -> &Buffer {
        &self.input_buffers[index]
    }

    pub fn input_buffer_mut(&mut self, index: usize) -> &mut Buffer {
        &mut self.input_buffers[index]
    }

    pub fn output_buffer(&self, index: usize) -> &Buffer {
        &self.output_buffers[index]
    }

    pub fn output_buffer_mut(&mut self, index: usize) -> &mut Buffer {
        &mut self.output_buffers[index]
    }

    pub fn input_size(&self) -> usize {
        self.input_buffers.len()
    }

    pub fn output_size(&self) -> usize {
        self.output_buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn size(&self) -> usize {
        debug_assert_eq!(self.requests.len(), self.traces.len());
        debug_assert_eq!(self.requests.len(), self.start_times.len());
        self.requests.len()
    }

    pub fn add_trace(&mut self, trace: Span) {
        self.traces.push(trace);
    }

    pub fn trace(&self, index: usize) -> &Span {
        &self.traces[index]
    }

    pub fn add_time(&mut self, timestamp: Instant) {
        self.start_times.push(timestamp);
    }

    pub fn time(&self, index: usize) -> Instant {
        self.start_times[index]
    }

    /// Hand every loaned buffer back to the pool. Called by the worker once
    /// the batch has run, and by the runtime when draining a dead queue.
    pub fn return_buffers(&mut self, pool: &MemoryPool) {
        for buffer in self.input_buffers.drain(..) {
            pool.put(buffer);
        }
        for buffer in self.output_buffers.drain(..) {
            pool.put(buffer);
        }
    }
}

//! The echo worker accepts uint32 tensors, adds one to each value and
//! returns them. It exists to exercise the dataplane end to end without a
//! real back-end.

use bytes::Bytes;
use tracing::debug;

use modelgate_core::{
    AllocatorKind, DataType, InferenceResponse, ModelMetadata, OutputTensor, ParameterMap,
    Result, Shape,
};
use modelgate_runtime::{BatchReceiver, Worker, WorkerContext};

const DEFAULT_BATCH_SIZE: usize = 1;

pub struct Echo {
    batch_size: usize,
    metadata: ModelMetadata,
}

impl Echo {
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            metadata: ModelMetadata::new("echo", "cpu"),
        }
    }
}

impl Default for Echo {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker for Echo {
    fn do_init(&mut self, parameters: &ParameterMap) -> Result<()> {
        if let Some(batch_size) = parameters.get_int("batch_size") {
            self.batch_size = batch_size.max(1) as usize;
        }
        Ok(())
    }

    fn do_acquire(&mut self, _parameters: &ParameterMap) -> Result<()> {
        self.metadata
            .add_input_tensor("input", &[1], DataType::Uint32);
        self.metadata
            .add_output_tensor("output", &[1], DataType::Uint32);
        Ok(())
    }

    fn do_run(&mut self, input: BatchReceiver, ctx: &WorkerContext) {
        while let Ok(Some(mut batch)) = input.recv() {
            debug!(endpoint = %ctx.endpoint, batch = batch.size(), "echo got batch");
            for index in 0..batch.size() {
                let span = batch.trace(index).clone();
                let _guard = span.enter();

                let request = batch.request(index);
                let id = request.id.clone();
                let mut named_values = Vec::with_capacity(request.inputs.len());
                for (i, tensor) in request.inputs.iter().enumerate() {
                    let value = batch
                        .input_buffer(i)
                        .read::<u32>(index * DataType::Uint32.size());
                    // A requested output names the response tensor; the
                    // input name is the fallback.
                    let name = request
                        .outputs
                        .get(i)
                        .filter(|out| !out.name.is_empty())
                        .map(|out| out.name.clone())
                        .unwrap_or_else(|| tensor.name.clone());
                    named_values.push((name, value.wrapping_add(1)));
                }

                let mut response = InferenceResponse::new(&self.metadata.name, &id);
                for (name, value) in named_values {
                    response.add_output(OutputTensor::new(
                        &name,
                        Shape::from_slice(&[1]),
                        DataType::Uint32,
                        Bytes::copy_from_slice(&value.to_le_bytes()),
                    ));
                }

                let start = batch.time(index);
                batch.request_mut(index).run_callback_once(response);
                ctx.metrics.pipeline_egress.inc();
                ctx.metrics
                    .request_latency
                    .observe(start.elapsed().as_secs_f64());
            }
            batch.return_buffers(&ctx.pool);
        }
        debug!(endpoint = %ctx.endpoint, "echo ending");
    }

    fn do_release(&mut self) {}

    fn do_destroy(&mut self) {}

    fn get_allocators(&self) -> Vec<AllocatorKind> {
        vec![AllocatorKind::Cpu]
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}

//! Fan-out sibling of the echo worker: two uint32 inputs, three uint32
//! outputs populated by cyclically replaying the concatenated input values.
//! Outputs are staged through the batch's pool buffers the way an
//! accelerator worker would fill its tensor memory.

use bytes::Bytes;
use tracing::debug;

use modelgate_core::{
    AllocatorKind, DataType, InferenceResponse, ModelMetadata, OutputTensor, ParameterMap,
    Result, Shape,
};
use modelgate_runtime::{BatchReceiver, Worker, WorkerContext};

const INPUT_LENGTHS: [usize; 2] = [1, 2];
const OUTPUT_LENGTHS: [usize; 3] = [1, 4, 3];

pub struct EchoMulti {
    batch_size: usize,
    metadata: ModelMetadata,
}

impl EchoMulti {
    pub fn new() -> Self {
        Self {
            batch_size: 1,
            metadata: ModelMetadata::new("echo_multi", "cpu"),
        }
    }
}

impl Default for EchoMulti {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker for EchoMulti {
    fn do_init(&mut self, parameters: &ParameterMap) -> Result<()> {
        if let Some(batch_size) = parameters.get_int("batch_size") {
            self.batch_size = batch_size.max(1) as usize;
        }
        Ok(())
    }

    fn do_acquire(&mut self, _parameters: &ParameterMap) -> Result<()> {
        for (i, len) in INPUT_LENGTHS.iter().enumerate() {
            self.metadata
                .add_input_tensor(&format!("input{i}"), &[*len], DataType::Uint32);
        }
        for (i, len) in OUTPUT_LENGTHS.iter().enumerate() {
            self.metadata
                .add_output_tensor(&format!("output{i}"), &[*len], DataType::Uint32);
        }
        Ok(())
    }

    fn do_run(&mut self, input: BatchReceiver, ctx: &WorkerContext) {
        let word = DataType::Uint32.size();
        while let Ok(Some(mut batch)) = input.recv() {
            debug!(endpoint = %ctx.endpoint, batch = batch.size(), "echo_multi got batch");
            for index in 0..batch.size() {
                let span = batch.trace(index).clone();
                let _guard = span.enter();

                let mut args = Vec::new();
                for (i, len) in INPUT_LENGTHS.iter().enumerate() {
                    let extent = len * word;
                    for k in 0..*len {
                        args.push(
                            batch
                                .input_buffer(i)
                                .read::<u32>(index * extent + k * word),
                        );
                    }
                }

                let mut cursor = 0;
                let mut outputs = Vec::with_capacity(OUTPUT_LENGTHS.len());
                for (t, len) in OUTPUT_LENGTHS.iter().enumerate() {
                    let extent = len * word;
                    let base = index * extent;
                    for k in 0..*len {
                        batch
                            .output_buffer_mut(t)
                            .write(args[cursor % args.len()], base + k * word);
                        cursor += 1;
                    }
                    outputs.push(OutputTensor::new(
                        &format!("output{t}"),
                        Shape::from_slice(&[*len]),
                        DataType::Uint32,
                        Bytes::copy_from_slice(&batch.output_buffer(t).data(base)[..extent]),
                    ));
                }

                let id = batch.request(index).id.clone();
                let mut response = InferenceResponse::new(&self.metadata.name, &id);
                for output in outputs {
                    response.add_output(output);
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
        debug!(endpoint = %ctx.endpoint, "echo_multi ending");
    }

    fn do_release(&mut self) {}

    fn do_destroy(&mut self) {}

    fn get_allocators(&self) -> Vec<AllocatorKind> {
        vec![AllocatorKind::CpuPinned, AllocatorKind::Cpu]
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}

//! Pipeline counters and latency summaries. The registry is an explicit
//! dependency handed to the façade and the worker runtimes; there is no
//! process-wide metrics singleton.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    /// Requests accepted by the façade.
    pub pipeline_ingress: IntCounter,
    /// Responses dispatched by workers.
    pub pipeline_egress: IntCounter,
    /// Requests failed anywhere in the pipeline.
    pub request_errors: IntCounter,
    /// Seconds from façade ingress to callback.
    pub request_latency: Histogram,
    /// Requests sitting in worker ingress queues.
    pub queue_depth: IntGauge,
    /// Requests per emitted batch.
    pub batch_size: Histogram,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let pipeline_ingress = IntCounter::new(
            "modelgate_pipeline_ingress_total",
            "Requests accepted by the facade",
        )?;
        let pipeline_egress = IntCounter::new(
            "modelgate_pipeline_egress_total",
            "Responses dispatched by workers",
        )?;
        let request_errors = IntCounter::new(
            "modelgate_request_errors_total",
            "Requests failed in the pipeline",
        )?;
        let request_latency = Histogram::with_opts(HistogramOpts::new(
            "modelgate_request_latency_seconds",
            "Seconds from ingress to callback",
        ))?;
        let queue_depth = IntGauge::new(
            "modelgate_queue_depth",
            "Requests queued at worker ingress",
        )?;
        let batch_size = Histogram::with_opts(
            HistogramOpts::new("modelgate_batch_size", "Requests per emitted batch")
                .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0]),
        )?;

        registry.register(Box::new(pipeline_ingress.clone()))?;
        registry.register(Box::new(pipeline_egress.clone()))?;
        registry.register(Box::new(request_errors.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(batch_size.clone()))?;

        Ok(Self {
            registry,
            pipeline_ingress,
            pipeline_egress,
            request_errors,
            request_latency,
            queue_depth,
            batch_size,
        })
    }
}

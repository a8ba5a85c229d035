use std::time::Instant;

use tracing::Span;

use modelgate_core::InferenceRequest;

/// Transport envelope for one request on its way to a worker: the request
/// itself, its trace span, and the ingress timestamp.
#[derive(Debug)]
pub struct RequestContainer {
    pub request: InferenceRequest,
    pub trace: Span,
    pub start_time: Instant,
}

impl RequestContainer {
    pub fn new(request: InferenceRequest) -> Self {
        let trace = tracing::info_span!("infer", id = %request.id);
        Self {
            request,
            trace,
            start_time: Instant::now(),
        }
    }
}

//! The dispatch façade front-end adapters talk to. Thin by design: it
//! validates, resolves names through the endpoint registry and forwards.
//! All collaborators are injected at construction.

use std::sync::Arc;

use tracing::warn;

use modelgate_core::{
    MemoryPool, Metrics, ModelMetadata, ParameterMap, Result, ServerError, ServerMetadata,
};
use modelgate_runtime::RequestContainer;
use modelgate_workers::WorkerCatalog;

use crate::{has_hardware, Endpoints, ModelRepository};

pub struct SharedState {
    endpoints: Endpoints,
    repository: ModelRepository,
    metadata: ServerMetadata,
    metrics: Arc<Metrics>,
}

impl SharedState {
    pub fn new(
        catalog: WorkerCatalog,
        repository: ModelRepository,
        pool: Arc<MemoryPool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            endpoints: Endpoints::new(catalog, pool, Arc::clone(&metrics)),
            repository,
            metadata: ServerMetadata::default(),
            metrics,
        }
    }

    pub fn server_metadata(&self) -> &ServerMetadata {
        &self.metadata
    }

    pub fn server_live(&self) -> bool {
        true
    }

    pub fn server_ready(&self) -> bool {
        true
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn repository(&self) -> &ModelRepository {
        &self.repository
    }

    pub fn model_list(&self) -> Vec<String> {
        self.endpoints.list()
    }

    pub fn model_ready(&self, model: &str) -> Result<bool> {
        self.endpoints.ready(model)
    }

    pub fn model_metadata(&self, model: &str) -> Result<ModelMetadata> {
        self.endpoints.metadata(model)
    }

    /// Load a worker by kind; returns the endpoint name requests should use.
    pub fn worker_load(&self, worker_kind: &str, parameters: &ParameterMap) -> Result<String> {
        self.endpoints.load(worker_kind, parameters)
    }

    pub fn worker_unload(&self, endpoint: &str) -> Result<()> {
        self.endpoints.unload(endpoint)
    }

    /// Load a model from the repository: the descriptor synthesizes the
    /// worker kind and parameters, and the model name becomes the endpoint.
    pub fn model_load(&self, model: &str, parameters: &ParameterMap) -> Result<String> {
        let mut merged = parameters.clone();
        merged.merge(&self.repository.parse_model(model)?);
        merged.put("endpoint", model);
        let worker_kind = merged
            .get_string("worker")
            .map(str::to_string)
            .ok_or_else(|| {
                ServerError::Internal(format!("descriptor for {model} names no worker"))
            })?;
        self.endpoints.load(&worker_kind, &merged)
    }

    pub fn model_unload(&self, endpoint: &str) -> Result<()> {
        self.endpoints.unload(endpoint)
    }

    /// Accept one request for `model`. Successful return means the request
    /// is in the worker's ingress queue and its callback will be invoked;
    /// failure is synchronous and the callback never fires.
    pub fn model_infer(&self, model: &str, container: RequestContainer) -> Result<()> {
        if container.request.inputs.is_empty() {
            return Err(ServerError::InvalidArgument(
                "request has no input tensors".to_string(),
            ));
        }
        for input in &container.request.inputs {
            input.validate()?;
        }
        self.metrics.pipeline_ingress.inc();
        self.endpoints.submit(model, container)
    }

    pub fn has_hardware(&self, kind: &str, count: usize) -> bool {
        has_hardware(kind, count)
    }

    /// Load every model already present in the repository. Individual
    /// failures are logged and skipped so one broken descriptor does not
    /// block the rest.
    pub fn load_repository(&self) -> Vec<String> {
        let mut loaded = Vec::new();
        for model in self.repository.scan() {
            match self.model_load(&model, &ParameterMap::new()) {
                Ok(endpoint) => loaded.push(endpoint),
                Err(err) => warn!(model = %model, %err, "error loading model"),
            }
        }
        loaded
    }
}

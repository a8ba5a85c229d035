//! The endpoint registry: model names resolving to running workers, with
//! reference counting so a worker instance can back several load calls
//! when the sharing key matches.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use modelgate_core::{
    sharing_key, MemoryPool, Metrics, ModelMetadata, ParameterMap, Result, ServerError,
};
use modelgate_runtime::{RequestContainer, WorkerRuntime};
use modelgate_workers::WorkerCatalog;

struct Entry {
    runtime: WorkerRuntime,
    refcount: usize,
    sharing_key: Option<String>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    keys: HashMap<String, String>,
}

pub struct Endpoints {
    catalog: WorkerCatalog,
    pool: Arc<MemoryPool>,
    metrics: Arc<Metrics>,
    inner: RwLock<Inner>,
}

impl Endpoints {
    pub fn new(catalog: WorkerCatalog, pool: Arc<MemoryPool>, metrics: Arc<Metrics>) -> Self {
        Self {
            catalog,
            pool,
            metrics,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn catalog(&self) -> &WorkerCatalog {
        &self.catalog
    }

    /// Load a worker of `worker_kind`, or share an existing instance when
    /// one with the same sharing key is already running. Returns the
    /// endpoint name the worker answers to.
    pub fn load(&self, worker_kind: &str, parameters: &ParameterMap) -> Result<String> {
        let share = parameters.get_bool("share").unwrap_or(true);
        let key = sharing_key(worker_kind, parameters);

        let mut inner = self.inner.write();
        if share {
            if let Some(name) = inner.keys.get(&key).cloned() {
                if let Some(entry) = inner.entries.get_mut(&name) {
                    entry.refcount += 1;
                    info!(endpoint = %name, refcount = entry.refcount, "sharing loaded worker");
                    return Ok(name);
                }
            }
        }

        let worker = self.catalog.create(worker_kind).ok_or_else(|| {
            ServerError::NotFound(format!("unknown worker kind: {worker_kind}"))
        })?;

        let name = match parameters.get_string("endpoint") {
            Some(requested) => {
                if inner.entries.contains_key(requested) {
                    return Err(ServerError::AlreadyExists(format!(
                        "endpoint {requested} already exists"
                    )));
                }
                requested.to_string()
            }
            None => derive_name(&inner.entries, worker_kind),
        };

        let mut runtime = WorkerRuntime::new(
            worker_kind,
            &name,
            worker,
            Arc::clone(&self.pool),
            Arc::clone(&self.metrics),
        );
        if let Err(err) = start(&mut runtime, parameters) {
            runtime.shutdown();
            return Err(err);
        }

        inner.entries.insert(
            name.clone(),
            Entry {
                runtime,
                refcount: 1,
                sharing_key: share.then(|| key.clone()),
            },
        );
        if share {
            inner.keys.insert(key, name.clone());
        }
        info!(endpoint = %name, kind = %worker_kind, "loaded worker");
        Ok(name)
    }

    /// Drop one reference to the endpoint; the last reference stops the
    /// worker and removes the name. The registry entry disappears before
    /// the threads are joined, so no new request can race the teardown.
    pub fn unload(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let Some(entry) = inner.entries.get_mut(name) else {
            return Err(ServerError::NotFound(format!("unknown endpoint: {name}")));
        };
        entry.refcount -= 1;
        if entry.refcount > 0 {
            info!(endpoint = %name, refcount = entry.refcount, "dropped worker reference");
            return Ok(());
        }

        let Some(mut entry) = inner.entries.remove(name) else {
            return Ok(());
        };
        if let Some(key) = entry.sharing_key.take() {
            inner.keys.remove(&key);
        }
        drop(inner);

        entry.runtime.shutdown();
        info!(endpoint = %name, "unloaded worker");
        Ok(())
    }

    pub fn ready(&self, name: &str) -> Result<bool> {
        let inner = self.inner.read();
        match inner.entries.get(name) {
            Some(entry) => Ok(entry.runtime.is_running()),
            None => Err(ServerError::NotFound(format!("unknown endpoint: {name}"))),
        }
    }

    pub fn list(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut names: Vec<String> = inner.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn metadata(&self, name: &str) -> Result<ModelMetadata> {
        let inner = self.inner.read();
        let Some(entry) = inner.entries.get(name) else {
            return Err(ServerError::NotFound(format!("unknown endpoint: {name}")));
        };
        entry
            .runtime
            .metadata()
            .cloned()
            .ok_or_else(|| ServerError::Internal(format!("endpoint {name} has no metadata")))
    }

    /// Route one request to the endpoint's ingress queue.
    pub fn submit(&self, name: &str, container: RequestContainer) -> Result<()> {
        let inner = self.inner.read();
        let Some(entry) = inner.entries.get(name) else {
            return Err(ServerError::NotFound(format!("unknown endpoint: {name}")));
        };
        entry.runtime.submit(container)
    }
}

fn start(runtime: &mut WorkerRuntime, parameters: &ParameterMap) -> Result<()> {
    runtime.init(parameters)?;
    runtime.acquire(parameters)?;
    runtime.spawn()
}

fn derive_name(entries: &HashMap<String, Entry>, kind: &str) -> String {
    if !entries.contains_key(kind) {
        return kind.to_string();
    }
    let mut suffix = 1;
    loop {
        let candidate = format!("{kind}-{suffix}");
        if !entries.contains_key(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

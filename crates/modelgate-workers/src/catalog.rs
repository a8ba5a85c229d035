use std::collections::HashMap;

use modelgate_runtime::{Worker, WorkerFactory};

use crate::{Echo, EchoMulti};

/// Capability table mapping worker kinds to factories. Passed to the server
/// at construction; a deployment registers exactly the back-ends it links.
#[derive(Clone, Default)]
pub struct WorkerCatalog {
    factories: HashMap<String, WorkerFactory>,
}

impl WorkerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in workers registered.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        catalog.register("echo", || Box::new(Echo::new()));
        catalog.register("echo_multi", || Box::new(EchoMulti::new()));
        catalog
    }

    pub fn register(&mut self, kind: &str, factory: WorkerFactory) {
        self.factories.insert(kind.to_string(), factory);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn create(&self, kind: &str) -> Option<Box<dyn Worker>> {
        self.factories.get(kind).map(|factory| factory())
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};
use modelgate_core::{observability, MemoryPool, Metrics};
use modelgate_server::{ModelRepository, RepositoryMonitor, SharedState};
use modelgate_workers::WorkerCatalog;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            repository,
            log,
            no_load_existing,
            monitor,
            monitor_interval_ms,
        } => serve(
            repository,
            log,
            !no_load_existing,
            monitor,
            Duration::from_millis(monitor_interval_ms),
        ),
    }
}

fn serve(
    repository: String,
    log: String,
    load_existing: bool,
    monitor: bool,
    monitor_interval: Duration,
) -> Result<()> {
    observability::init_logging(&log);

    let pool = Arc::new(MemoryPool::new());
    let metrics = Arc::new(Metrics::new()?);
    let catalog = WorkerCatalog::with_defaults();
    let repository = ModelRepository::new(repository);

    let state = Arc::new(SharedState::new(catalog, repository, pool, metrics));

    if load_existing {
        let loaded = state.load_repository();
        tracing::info!(models = loaded.len(), "loaded repository models");
    }

    let _monitor = monitor.then(|| RepositoryMonitor::start(Arc::clone(&state), monitor_interval));

    tracing::info!(
        repository = %state.repository().path().display(),
        "modelgated running; front-end adapters attach via SharedState"
    );
    loop {
        std::thread::park();
    }
}

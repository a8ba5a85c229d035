pub mod endpoints;
pub mod hardware;
pub mod repository;
pub mod shared_state;

pub use endpoints::Endpoints;
pub use hardware::has_hardware;
pub use repository::{parse_config, ModelConfig, ModelRepository, RepositoryMonitor};
pub use shared_state::SharedState;

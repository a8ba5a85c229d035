pub mod batch;
pub mod batcher;
pub mod container;
pub mod worker;
pub mod worker_runtime;

pub use batch::*;
pub use batcher::*;
pub use container::*;
pub use worker::*;
pub use worker_runtime::*;

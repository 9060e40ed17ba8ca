pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod pool;
pub mod render;
pub mod server;
pub mod shutdown;

pub use config::{RenderConfig, ServerConfig};
pub use error::{RenderError, Result};
pub use job::{JobSource, JobSpec, OutputKind};
pub use pool::{Dispatcher, JobResult, PoolHandle, PoolStats};

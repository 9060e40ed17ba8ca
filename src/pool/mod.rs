//! Session pool and job dispatcher.
//!
//! - [`session`]: one reusable handle to a rendering engine instance
//! - [`sessions`]: the fixed-capacity pool with crash replacement
//! - [`dispatcher`]: FIFO queueing and binding of jobs to idle sessions

pub mod dispatcher;
pub mod session;
pub mod sessions;

pub use dispatcher::{Dispatcher, JobResult, PoolHandle};
pub use session::{Session, SessionStatus};
pub use sessions::{PoolStats, SessionPool};

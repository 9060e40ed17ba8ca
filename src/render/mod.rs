//! Per-job render pipeline: the load→wait→capture state machine and its two
//! bounded retry policies.

pub mod pipeline;
pub mod retry;

//! Shared scaffolding for pool and pipeline integration tests.
//!
//! Spawns dispatchers over the scriptable mock engine with timings shrunk
//! for fast tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use renderd::config::RenderConfig;
use renderd::engine::mock::MockEngineFactory;
use renderd::job::{JobSource, JobSpec, OutputKind};
use renderd::pool::{Dispatcher, PoolHandle};

/// Render config with short timings for fast tests.
pub fn test_config(pool_size: usize) -> RenderConfig {
    let mut config = RenderConfig::default()
        .with_pool_size(pool_size)
        .with_queue_limit(8)
        .with_job_timeout(Duration::from_secs(2));
    config.text_poll_min = Duration::from_millis(10);
    config.text_poll_max = Duration::from_millis(20);
    config.blank_retry_delay = Duration::from_millis(5);
    config.settle_delay = Duration::from_millis(1);
    config.refill_retry_delay = Duration::from_millis(20);
    config
}

/// A running dispatcher plus everything a test needs to steer it.
pub struct TestPool {
    pub handle: PoolHandle,
    pub factory: Arc<MockEngineFactory>,
    pub shutdown: CancellationToken,
    pub drain: JoinHandle<()>,
}

pub async fn spawn_pool(config: RenderConfig, factory: Arc<MockEngineFactory>) -> TestPool {
    let shutdown = CancellationToken::new();
    let (handle, drain) = Dispatcher::spawn(config, factory.clone(), shutdown.clone())
        .await
        .expect("mock factory never fails");
    TestPool {
        handle,
        factory,
        shutdown,
        drain,
    }
}

/// A spec pointing at a unique URL, so recordings can be told apart.
pub fn url_spec(kind: OutputKind, name: &str) -> JobSpec {
    JobSpec::new(kind, JobSource::Url(format!("http://example.com/{name}")))
}

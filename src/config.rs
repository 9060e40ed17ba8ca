use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;

/// Reference payload a blank/failed PDF render is compared against.
///
/// The comparison skips the leading bytes holding the non-deterministic
/// ModDate, see [`crate::render::pipeline`]. Deployments whose engine build
/// produces a different empty document can swap the reference via
/// [`RenderConfig::with_blank_reference`].
static BLANK_RENDER_FIXTURE: &[u8] = include_bytes!("../fixtures/render_failed.pdf");

/// Headers attached to every navigation so rendered pages are never served
/// from an intermediary cache.
pub const DEFAULT_HEADERS: &str =
    "Cache-Control: no-cache, no-store, must-revalidate\nPragma: no-cache";

/// Configuration for the session pool and per-job render pipeline.
///
/// Built once by the composition root and handed to the dispatcher at
/// construction; nothing in the pipeline reads the environment.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Number of rendering sessions the pool owns. Fixed for the pool's
    /// lifetime.
    pub pool_size: usize,
    /// Maximum number of jobs held in the pending queue before `enqueue`
    /// rejects with backpressure.
    pub queue_limit: usize,
    /// Per-job deadline, armed when navigation starts.
    pub job_timeout: Duration,
    /// Default viewport width for image capture.
    pub window_width: u32,
    /// Default viewport height for image capture.
    pub window_height: u32,
    /// Lower bound on the spacing between text-search attempts.
    pub text_poll_min: Duration,
    /// Upper bound on the spacing between text-search attempts.
    pub text_poll_max: Duration,
    /// Total PDF capture attempts before a persistently blank output is
    /// reported as a render failure.
    pub blank_retry_attempts: usize,
    /// Delay between blank-output capture attempts.
    pub blank_retry_delay: Duration,
    /// Settle time between a viewport resize and the capture.
    pub settle_delay: Duration,
    /// Spacing between replacement attempts once the pool has no live
    /// session left to trigger a retry on release.
    pub refill_retry_delay: Duration,
    /// Reference bytes for blank-render detection. `None` disables the check.
    pub blank_reference: Option<Bytes>,
    /// Extra headers sent with every navigation.
    pub extra_headers: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            queue_limit: 100,
            job_timeout: Duration::from_secs(30),
            window_width: 1024,
            window_height: 768,
            text_poll_min: Duration::from_millis(750),
            text_poll_max: Duration::from_millis(1000),
            blank_retry_attempts: 5,
            blank_retry_delay: Duration::from_millis(50),
            settle_delay: Duration::from_millis(50),
            refill_retry_delay: Duration::from_secs(1),
            blank_reference: Some(Bytes::from_static(BLANK_RENDER_FIXTURE)),
            extra_headers: DEFAULT_HEADERS.to_string(),
        }
    }
}

impl RenderConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_queue_limit(mut self, queue_limit: usize) -> Self {
        self.queue_limit = queue_limit;
        self
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn with_window(mut self, width: u32, height: u32) -> Self {
        self.window_width = width;
        self.window_height = height;
        self
    }

    pub fn with_blank_reference(mut self, reference: Option<Bytes>) -> Self {
        self.blank_reference = reference;
        self
    }
}

/// One accepted access key. The label shows up in request logs and gates the
/// stats endpoint (only `global` may read it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKey {
    pub key: String,
    pub label: String,
}

/// Configuration for the HTTP surface.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Accepted access keys. Empty means open access with the `global` label.
    pub access_keys: Vec<AccessKey>,
    /// Cap on requested viewport dimensions, keeps captures bounded.
    pub max_dimension: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            access_keys: Vec::new(),
            max_dimension: 3000,
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    /// Parse a `key[:label]` comma-separated list. Keys without a label get
    /// the `global` label.
    pub fn with_keys(mut self, spec: &str) -> Self {
        self.access_keys = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((key, label)) => AccessKey {
                    key: key.to_string(),
                    label: label.to_string(),
                },
                None => AccessKey {
                    key: entry.to_string(),
                    label: "global".to_string(),
                },
            })
            .collect();
        self
    }

    /// Resolve a presented key to its label, if accepted.
    pub fn key_label(&self, presented: Option<&str>) -> Option<&str> {
        if self.access_keys.is_empty() {
            return Some("global");
        }
        let presented = presented?;
        self.access_keys
            .iter()
            .find(|k| k.key == presented)
            .map(|k| k.label.as_str())
    }
}

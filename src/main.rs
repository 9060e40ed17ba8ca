use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use renderd::config::{RenderConfig, ServerConfig};
use renderd::engine::chrome::{ChromeConfig, ChromeEngineFactory};
use renderd::pool::Dispatcher;
use renderd::server::{self, AppState};
use renderd::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "renderd")]
#[command(version)]
#[command(about = "Render URLs or posted HTML to PDF/PNG/JPEG through a pool of headless sessions")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "RENDERD_LISTEN", default_value = "0.0.0.0:3000")]
    listen: SocketAddr,

    /// Number of rendering sessions in the pool
    #[arg(long, env = "RENDERD_POOL_SIZE", default_value_t = 2)]
    pool_size: usize,

    /// Maximum queued jobs before requests are rejected
    #[arg(long, env = "RENDERD_QUEUE_LIMIT", default_value_t = 100)]
    queue_limit: usize,

    /// Per-job timeout in seconds
    #[arg(long, env = "RENDERD_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Default viewport width
    #[arg(long, env = "RENDERD_WINDOW_WIDTH", default_value_t = 1024)]
    window_width: u32,

    /// Default viewport height
    #[arg(long, env = "RENDERD_WINDOW_HEIGHT", default_value_t = 768)]
    window_height: u32,

    /// Comma-separated access keys, `key[:label]`. Empty disables auth.
    #[arg(long, env = "RENDERD_ACCESS_KEYS", default_value = "")]
    access_keys: String,

    /// Disable the Chromium sandbox (needed in some containers)
    #[arg(long, env = "RENDERD_NO_SANDBOX", default_value_t = false)]
    no_sandbox: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let render_config = RenderConfig::default()
        .with_pool_size(args.pool_size)
        .with_queue_limit(args.queue_limit)
        .with_job_timeout(Duration::from_secs(args.timeout))
        .with_window(args.window_width, args.window_height);
    let server_config = ServerConfig::new(args.listen).with_keys(&args.access_keys);

    let factory = Arc::new(ChromeEngineFactory::new(ChromeConfig {
        window_width: args.window_width,
        window_height: args.window_height,
        navigation_timeout: Duration::from_secs(args.timeout.max(1) * 2),
        sandbox: !args.no_sandbox,
    }));

    let shutdown = install_shutdown_handler();

    tracing::info!(
        pool_size = args.pool_size,
        queue_limit = args.queue_limit,
        timeout_secs = args.timeout,
        "starting render pool"
    );
    let (pool, drain) = Dispatcher::spawn(render_config.clone(), factory, shutdown.clone()).await?;

    let state = AppState::new(pool, server_config.clone(), render_config);
    server::serve(state, server_config.listen_addr, shutdown).await?;

    // The server has stopped accepting requests; wait for the dispatcher to
    // finish queued and in-flight jobs.
    drain.await?;
    Ok(())
}

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mockhearth::config::{Args, Config};
use mockhearth::generation::{self, GenerationCell};
use mockhearth::http::{self, ServerHandles, ServerTimeouts};
use mockhearth::ratelimiter::RateLimiterStore;
use mockhearth::template::DefaultTemplateRegistry;
use mockhearth::trace::RingBuffer;
use mockhearth::watcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_args(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    let registry = DefaultTemplateRegistry;
    let generation = generation::build_generation(
        &config.root,
        &registry,
        config.default_engine.as_deref(),
    )
    .map_err(|err| anyhow::anyhow!("initial scenario load failed: {err}"))?;

    info!(
        scenarios = generation.index.len(),
        root = %config.root.display(),
        "loaded initial generation"
    );

    let generation_cell = Arc::new(GenerationCell::new(generation));
    let rate_limiter = RateLimiterStore::new(config.rate_limit.ttl());
    rate_limiter.start_sweeper();
    let trace = Arc::new(RingBuffer::new(config.trace_capacity));

    let shutdown = CancellationToken::new();
    let watch_root = config.root.clone();
    let watch_cancel = shutdown.clone();
    let watch_cell = Arc::clone(&generation_cell);
    let watch_engine = config.default_engine.clone();
    let watch_debounce = config.watch.debounce();

    let watcher_handle = watcher::spawn(watch_root.clone(), watch_debounce, watch_cancel, move || {
        let registry = DefaultTemplateRegistry;
        match generation::build_generation(&watch_root, &registry, watch_engine.as_deref()) {
            Ok(generation) => {
                info!(scenarios = generation.index.len(), "reloaded scenario generation");
                watch_cell.publish(generation);
            }
            Err(err) => {
                error!(%err, "scenario reload failed, keeping previous generation live");
            }
        }
    });

    // `read_timeout`/`write_timeout` are not enforced as independent deadlines
    // (see DESIGN.md — hyper 1.x's http1::Builder has no split read/write
    // deadline hook and `idle_timeout` already covers the same failure mode
    // for this crate's single-exchange connections); surface the configured
    // values at startup so an operator tuning them can see they were read.
    info!(
        read_timeout_secs = %config.server.read_timeout().as_secs(),
        write_timeout_secs = %config.server.write_timeout().as_secs(),
        idle_timeout_secs = %config.server.idle_timeout().as_secs(),
        "server timeouts configured"
    );

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let handles = ServerHandles {
        generation: generation_cell,
        rate_limiter: Arc::clone(&rate_limiter),
        trace,
    };

    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("shutdown signal received");
        }
        server_shutdown.cancel();
    });

    let timeouts = ServerTimeouts {
        idle: config.server.idle_timeout(),
        shutdown_grace: config.server.shutdown_timeout(),
    };
    let result = http::run(addr, handles, shutdown.clone(), timeouts).await;

    shutdown.cancel();
    rate_limiter.stop();
    let _ = watcher_handle.join();

    result.map_err(anyhow::Error::from)
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

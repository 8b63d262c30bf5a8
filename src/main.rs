use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::runtime::Builder;
use tracing::{debug, info, warn};

use nsproxy::cli::Cli;
use nsproxy::config::Config;
use nsproxy::http::BackendClient;
use nsproxy::lookup::LookupOrchestrator;
use nsproxy::proxy::{self, ProxyState};

fn main() -> Result<()> {
    let num_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    // Every request waits on DNS, the cache and a backend, so allow a few
    // more threads than cores, capped to limit context switching.
    let worker_threads = std::cmp::min(num_cpus + 2, 16);

    debug!("Configuring Tokio runtime with {} worker threads", worker_threads);

    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(&cli).context("Invalid configuration")?;

    let lookup = LookupOrchestrator::from_config(&config).context("Failed to set up host lookup")?;
    let backend = BackendClient::new(config.upstream_timeout)?;
    let state = Arc::new(ProxyState::new(lookup, backend));

    let nameservers: Vec<String> = config.nameservers.iter().map(ToString::to_string).collect();
    info!("Using nameservers {} ({:?} selection)", nameservers.join(","), config.selection);
    if config.use_cache {
        info!("Caching resolutions in {:?}", config.cache_backend);
    } else {
        info!("Resolution cache disabled");
    }

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen))?;
    info!("starting up on {}.", config.listen);

    proxy::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}

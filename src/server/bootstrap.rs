use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::admission::{loops, AdmissionController, ReplayPolicy};
use crate::buffer;
use crate::cache::ResponseCache;
use crate::config::{CliOverrides, Config, Mode};
use crate::metrics::Metrics;
use crate::proxy;
use crate::server::state::{AppState, BufferState, ProxyState};
use crate::server;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub cli: CliOverrides,
}

/// Lifecycle: load config → build mode-specific state → start background
/// loops → serve → graceful shutdown (spec.md §9: "model each [periodic
/// task] as a task that owns a timer and a reference to the
/// controller/buffer; shutdown via a cancellation signal").
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = Arc::new(Config::load(args.cli)?);

    tracing::info!(
        "server: starting, mode={:?}, listen={}, admin_listen={}",
        config.mode,
        config.listen,
        config.admin_listen,
    );

    let shutdown = Arc::new(Notify::new());
    let metrics = Metrics::install();

    let state = match config.mode {
        Mode::Proxy => build_proxy_state(config.clone(), metrics.clone(), &shutdown),
        Mode::Buffered => build_buffered_state(config.clone(), metrics.clone(), &shutdown),
    };

    start_admin_server(&config.admin_listen, state.clone());

    tracing::info!("server: starting listener, listen={}", config.listen);
    let listen = config.listen.clone();
    let proxy_handle = tokio::spawn({
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(&listen, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = proxy_handle.await {
        tracing::error!("server: listener task error: {}", e);
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn build_proxy_state(config: Arc<Config>, metrics: Metrics, shutdown: &Arc<Notify>) -> AppState {
    let admission = Arc::new(AdmissionController::new(config.sample_size, config.f_min));
    let replay_policy = ReplayPolicy::new(config.replay_on_400);
    let cache = config
        .cache_enabled
        .then(|| ResponseCache::new(config.cache_ttl, config.internal_subnets.clone()));
    let client = proxy::build_origin_client(config.connect_timeout);

    loops::start_control_loop(admission.clone(), config.clone(), shutdown.clone());
    loops::start_stall_detector(admission.clone(), config.clone(), shutdown.clone());
    loops::start_stats_logger(admission.clone(), config.clone(), shutdown.clone());

    let state = Arc::new(ProxyState {
        config,
        admission,
        replay_policy,
        cache,
        client,
        metrics,
    });

    AppState::Proxy(state)
}

fn build_buffered_state(config: Arc<Config>, metrics: Metrics, shutdown: &Arc<Notify>) -> AppState {
    let (producer, consumer) = buffer::bounded(config.buffer_capacity);
    let consumer = buffer::shared(consumer);
    let stats = buffer::new_rolling_average();

    let forward_host = config
        .forward_host
        .clone()
        .expect("Config::validate() guarantees forward_host is set in buffered mode");

    let client = reqwest::Client::builder()
        .timeout(config.upstream_timeout)
        .connect_timeout(config.connect_timeout)
        .build()
        .expect("reqwest client configuration is valid");

    for worker_id in 0..config.buffer_workers {
        let consumer = consumer.clone();
        let forward_host = forward_host.clone();
        let client = client.clone();
        let stats = stats.clone();
        let shutdown = shutdown.clone();
        tracing::info!("buffer: starting drain worker, id={}", worker_id);
        tokio::spawn(buffer::run_drain_worker(
            consumer,
            forward_host,
            client,
            stats,
            shutdown,
        ));
    }

    {
        let producer = producer.clone();
        let stats = stats.clone();
        let interval = config.buffer_metrics_interval;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            buffer::run_stats_emitter(move || producer.len(), stats, interval, shutdown).await;
        });
    }

    let state = Arc::new(BufferState {
        config,
        producer,
        metrics,
    });

    AppState::Buffered(state)
}

fn init_tracing() {
    let (non_blocking, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    // The non-blocking writer's worker thread must outlive `main` for the
    // process lifetime, so the guard is intentionally never dropped.
    std::mem::forget(guard);
}

fn start_admin_server(admin_listen: &str, state: AppState) {
    let admin_listen = admin_listen.to_string();
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&admin_listen, state).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}

mod admin;
pub mod bootstrap;
pub mod runtime;
pub mod state;

pub use state::{AppState, BufferState, ProxyState};

use crate::buffer;
use crate::proxy::{self, full_body, BoxBody};
use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

const PROXY_HEALTH_PATH: &str = "/proxy_health";

/// Dispatch one request to the right handler for the active deployment
/// mode (spec.md §6). `/proxy_health` is intercepted ahead of both modes'
/// own routing since it is never forwarded to the origin/buffer.
async fn route(
    req: Request<Incoming>,
    state: AppState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    if req.uri().path() == PROXY_HEALTH_PATH {
        return Ok(proxy_health_response(&state));
    }

    match state {
        AppState::Proxy(s) => proxy::handle_request(req, s, peer_addr).await,
        AppState::Buffered(s) => buffer::handle_inbox(req, s).await,
    }
}

/// `GET /proxy_health` (spec.md §4.7, §6). In proxy mode, reflects whether
/// the sample fraction has bottomed out at F_min — the convention that an
/// instance saturated at the floor should be pulled out of rotation. In
/// buffered mode there is no admission controller, so it always reports OK
/// as long as the listener is serving at all (original_source
/// `federation-buffer/buffer.go`'s `serveHealthCheck`).
fn proxy_health_response(state: &AppState) -> Response<BoxBody> {
    match state {
        AppState::Proxy(s) => {
            let fraction = s.admission.fraction();
            if fraction >= s.admission.f_min() {
                text_response(StatusCode::OK, "OK".to_string())
            } else {
                let avg = s.admission.estimator.read();
                text_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!(
                        "Service Unavailable - Average Response Time: {}",
                        humantime::format_duration(avg)
                    ),
                )
            }
        }
        AppState::Buffered(_) => text_response(StatusCode::OK, "OK".to_string()),
    }
}

fn text_response(status: StatusCode, body: String) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(full_body(body))
        .expect("static response is well-formed")
}

/// Run the main listener with graceful shutdown support.
///
/// When `shutdown` is notified the server stops accepting new connections
/// and waits up to `DRAIN_TIMEOUT` for in-flight requests to complete
/// before forcibly dropping them (spec.md §5: "on shutdown, the drain
/// worker must stop accepting new dequeues but flush in-flight dispatch
/// before exit").
pub async fn run_proxy_server(listen: &str, state: AppState, shutdown: Arc<Notify>) -> Result<()> {
    const DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: listening, addr={}", addr);

    let in_flight = Arc::new(tokio::sync::Semaphore::new(0));
    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => {
                metrics::counter!("shed_connections_total", "outcome" => "accepted").increment(1);
                v
            }
            Err(e) => {
                error!("server: accept failed, error={}", e);
                metrics::counter!("shed_connections_total", "outcome" => "error").increment(1);
                continue;
            }
        };

        metrics::gauge!("shed_connections_active").increment(1.0);
        active_conns.fetch_add(1, Ordering::Relaxed);

        let state = state.clone();
        in_flight.add_permits(1);
        let in_flight = in_flight.clone();
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { route(req, state, peer_addr).await }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .http2()
                .keep_alive_interval(Some(std::time::Duration::from_secs(20)))
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: connection error, peer={}, error={}", peer_addr, e);
                }
            }

            metrics::gauge!("shed_connections_active").decrement(1.0);
            active_conns.fetch_sub(1, Ordering::Relaxed);
            let _ = in_flight.acquire().await;
        });
    }

    let active = active_conns.load(Ordering::Relaxed);
    if active > 0 {
        info!("server: waiting for {} active connections to drain", active);
        let drain = async {
            loop {
                if active_conns.load(Ordering::Relaxed) == 0 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        };
        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(_) => info!("server: all connections drained"),
            Err(_) => {
                let remaining = active_conns.load(Ordering::Relaxed);
                info!(
                    "server: drain timeout ({}s), {} connections still active",
                    DRAIN_TIMEOUT.as_secs(),
                    remaining
                );
            }
        }
    }

    Ok(())
}

/// Run the admin server for operational health/readiness checks and
/// Prometheus metrics — ambient ops surface, not part of spec.md's wire
/// contract (SPEC_FULL.md §2).
pub async fn run_admin_server(listen: &str, state: AppState) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { admin::handle_admin(req, state) }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: admin: connection error, error={}", e);
                }
            }
        });
    }
}

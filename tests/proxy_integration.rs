use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use shed_proxy::admission::replay::REPLAY_HEADER;
use shed_proxy::admission::{AdmissionController, ReplayPolicy};
use shed_proxy::config::Config;
use shed_proxy::proxy::build_origin_client;
use shed_proxy::server::{run_proxy_server, AppState, ProxyState};

/// Starts a trivial origin that echoes the request path as the body and
/// honors `x-mock-status` to let tests trigger 5xx responses on demand.
async fn spawn_mock_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let svc = service_fn(|req: Request<hyper::body::Incoming>| async move {
                    let status = req
                        .headers()
                        .get("x-mock-status")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u16>().ok())
                        .unwrap_or(200);
                    let body = req.uri().path().to_string();
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(status)
                            .body(Full::new(Bytes::from(body)))
                            .unwrap(),
                    )
                });
                let _ = auto::Builder::new(TokioExecutor::new())
                    .http1()
                    .serve_connection(io, svc)
                    .await;
            });
        }
    });

    addr
}

async fn spawn_proxy(state: AppState) -> (SocketAddr, Arc<Notify>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let shutdown = Arc::new(Notify::new());
    let listen = addr.to_string();
    let server_state = state.clone();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        run_proxy_server(&listen, server_state, server_shutdown)
            .await
            .unwrap();
    });

    // give the listener a moment to bind before tests start connecting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown)
}

/// `Metrics::install()` sets the process-global recorder, so only the first
/// call across this whole test binary may actually install it.
fn shared_metrics() -> shed_proxy::metrics::Metrics {
    static METRICS: std::sync::OnceLock<shed_proxy::metrics::Metrics> = std::sync::OnceLock::new();
    METRICS
        .get_or_init(shed_proxy::metrics::Metrics::install)
        .clone()
}

fn build_proxy_state(origin: SocketAddr, f_min: f64, sample_size: u32) -> AppState {
    let mut config = Config::default();
    config.origin = format!("http://{origin}");
    config.f_min = f_min;
    config.sample_size = sample_size;
    config.upstream_timeout = Duration::from_secs(5);
    let config = Arc::new(config);

    let admission = Arc::new(AdmissionController::new(config.sample_size, config.f_min));
    let replay_policy = ReplayPolicy::new(config.replay_on_400);
    let client = build_origin_client(config.connect_timeout);
    let metrics = shared_metrics();

    AppState::Proxy(Arc::new(ProxyState {
        config,
        admission,
        replay_policy,
        cache: None,
        client,
        metrics,
    }))
}

#[tokio::test]
async fn forwards_admitted_requests_to_the_origin() {
    let origin = spawn_mock_origin().await;
    let state = build_proxy_state(origin, 1.0, 500); // F stays at 1.0, everything admitted
    let (addr, _shutdown) = spawn_proxy(state).await;

    let resp = reqwest::get(format!("http://{addr}/widgets/42"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert_eq!(body, "/widgets/42");
}

#[tokio::test]
async fn stamps_replay_header_on_5xx_origin_responses() {
    let origin = spawn_mock_origin().await;
    let state = build_proxy_state(origin, 1.0, 500);
    let (addr, _shutdown) = spawn_proxy(state).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{addr}/boom"))
        .header("x-mock-status", "503")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 503);
    assert_eq!(resp.headers().get(REPLAY_HEADER).unwrap(), "elsewhere=true");
}

#[tokio::test]
async fn sheds_load_once_the_sample_fraction_bottoms_out() {
    let origin = spawn_mock_origin().await;
    // A tiny sample window and a floor fraction that admits essentially
    // nothing lets the test force shedding deterministically via `tick()`
    // instead of racing the background control loop.
    let state = build_proxy_state(origin, 0.01, 10);
    if let AppState::Proxy(s) = &state {
        s.admission.estimator.observe(Duration::from_secs(2));
        for _ in 0..30 {
            s.admission.tick(1, 0.05, 0.05); // latency target ~0ns: always decays F
        }
        assert!((s.admission.fraction() - s.admission.f_min()).abs() < 1e-9);
    }

    let (addr, _shutdown) = spawn_proxy(state).await;

    let client = reqwest::Client::new();
    // The very first request in a window can still be admitted
    // (floor(F_min * S) may be 0, so only c <= 0 ever qualifies, which the
    // first increment already exceeds) — so drive a handful of requests and
    // require that at least one comes back shed.
    let mut saw_shed = false;
    for _ in 0..5 {
        let resp = client.get(format!("http://{addr}/ping")).send().await.unwrap();
        if resp.status() == 503 {
            let body = resp.text().await.unwrap();
            assert_eq!(body, "Service Unavailable");
            saw_shed = true;
        }
    }
    assert!(saw_shed, "expected at least one shed response once F bottomed out");
}

#[tokio::test]
async fn proxy_health_reports_ok_once_fraction_settles_at_the_floor() {
    // tick() clamps F to [F_min, 1.0], so sustained overload can only ever
    // bring F down to F_min, never below it — and spec.md §4.7's rule is
    // `F >= F_min -> OK`, so even a fully shed instance still reports
    // healthy by this convention (matches original_source `lemmy/proxy.go`'s
    // `currentSampleFraction >= minSampleFraction`).
    let origin = spawn_mock_origin().await;
    let state = build_proxy_state(origin, 0.10, 500);
    if let AppState::Proxy(s) = &state {
        s.admission.estimator.observe(Duration::from_secs(2));
        for _ in 0..30 {
            s.admission.tick(1, 0.05, 0.05);
        }
        assert!((s.admission.fraction() - s.admission.f_min()).abs() < 1e-9);
    }
    let (addr, _shutdown) = spawn_proxy(state).await;

    let resp = reqwest::get(format!("http://{addr}/proxy_health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn proxy_health_reports_ok_at_full_fraction() {
    let origin = spawn_mock_origin().await;
    let state = build_proxy_state(origin, 0.10, 500);
    let (addr, _shutdown) = spawn_proxy(state).await;

    let resp = reqwest::get(format!("http://{addr}/proxy_health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

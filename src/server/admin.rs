use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};

use super::state::AppState;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn json_body(value: serde_json::Value) -> BoxBody {
    full_body(value.to_string())
}

/// Ops surface: `/health` liveness, `/ready` readiness (reflects the
/// admission/buffer state), `/metrics` Prometheus exposition
/// (SPEC_FULL.md §2 — carried regardless of spec.md's Non-goals, which
/// scope out feature surface, not the ambient ops substrate).
pub fn handle_admin(
    req: Request<Incoming>,
    state: AppState,
) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/health" | "/healthz" => Ok(Response::builder()
            .status(200)
            .header("content-type", "application/json")
            .body(json_body(serde_json::json!({"status": "ok"})))
            .unwrap()),

        "/ready" | "/readyz" => {
            let body = match &state {
                AppState::Proxy(s) => serde_json::json!({
                    "status": "ready",
                    "mode": "proxy",
                    "sample_fraction": s.admission.fraction(),
                    "ema_latency_ms": s.admission.estimator.read().as_secs_f64() * 1000.0,
                    "cache_enabled": s.cache.is_some(),
                }),
                AppState::Buffered(s) => serde_json::json!({
                    "status": "ready",
                    "mode": "buffered",
                    "queue_length": s.producer.len(),
                }),
            };
            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(json_body(body))
                .unwrap())
        }

        "/metrics" => {
            let body = state.metrics().render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(Response::builder()
            .status(404)
            .header("content-type", "application/json")
            .body(json_body(serde_json::json!({"error": "not found"})))
            .unwrap()),
    }
}

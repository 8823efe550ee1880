use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use http::{HeaderName, HeaderValue, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use tracing::warn;

use crate::server::state::ProxyState;

use super::context::{full_body, BoxBody, RequestContext};

/// `User-Agent` Consul stamps on its HTTP health checks — exempted from
/// load shedding so a deploy orchestrator never sees a shed instance as
/// healthy by accident (original_source `lemmy/proxy.go`).
const HEALTH_CHECK_USER_AGENT: &str = "Consul Health Check";

/// Handle one incoming request: admission check, forward to origin, replay
/// stamping, latency recording (spec.md §4.3).
pub async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ProxyState>,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().as_str().to_string();
    let uri_path = req.uri().path().to_string();

    let mut ctx = RequestContext::new(method, uri_path.clone(), peer_addr.ip());

    let is_replay_src = state.replay_policy.is_replay_src(req.headers());
    ctx.is_replay_src = is_replay_src;

    let is_health_check_ua = req
        .headers()
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua == HEALTH_CHECK_USER_AGENT)
        .unwrap_or(false);

    if let Some(cache) = state.cache.as_ref() {
        if req.method() == hyper::Method::GET && uri_path == state.config.cache_path {
            if cache.bypasses(peer_addr.ip()) {
                metrics::counter!("shed_cache_requests_total", "outcome" => "bypass").increment(1);
            } else if let Some(cached) = cache.get(&uri_path) {
                metrics::counter!("shed_cache_requests_total", "outcome" => "hit").increment(1);
                return Ok(cached);
            } else {
                metrics::counter!("shed_cache_requests_total", "outcome" => "miss").increment(1);
            }
        }
    }

    if !is_replay_src && !is_health_check_ua && !state.admission.admit() {
        ctx.admitted = false;
        return Ok(ctx.shed_response());
    }

    let upstream_start = Instant::now();
    let result = forward_to_origin(req, &state).await;

    match result {
        Ok(mut resp) => {
            state.admission.estimator.observe(upstream_start.elapsed());

            if state.replay_policy.should_stamp(resp.status()) {
                state
                    .replay_policy
                    .stamp_if_not_replay(resp.headers_mut(), is_replay_src);
            }

            if let Some(cache) = state.cache.as_ref() {
                if uri_path == state.config.cache_path && resp.status() == StatusCode::OK {
                    resp = cache.put_and_rebuild(&uri_path, resp).await;
                }
            }

            ctx.finalize_metrics(resp.status());
            Ok(resp)
        }
        Err(e) => {
            warn!("proxy: upstream transport error, path={}, error={}", uri_path, e);
            state.admission.estimator.observe(upstream_start.elapsed());

            let mut resp = Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .body(full_body(e.to_string()))
                .expect("static response is well-formed");

            state
                .replay_policy
                .stamp_if_not_replay(resp.headers_mut(), is_replay_src);

            ctx.finalize_metrics(resp.status());
            Ok(resp)
        }
    }
}

async fn forward_to_origin(
    req: Request<Incoming>,
    state: &ProxyState,
) -> Result<Response<BoxBody>, Box<dyn std::error::Error + Send + Sync>> {
    let (mut parts, body) = req.into_parts();

    remove_hop_headers(&mut parts.headers);
    inject_forwarded_headers(&mut parts.headers);

    let uri: http::Uri = format!(
        "{}{}",
        state.config.origin,
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    )
    .parse()?;
    parts.uri = uri;

    if let Some(host) = parts.uri.host() {
        if let Ok(v) = HeaderValue::from_str(host) {
            parts.headers.insert(HOST, v);
        }
    }

    let origin_req = Request::from_parts(parts, body.boxed());

    let resp = tokio::time::timeout(state.config.upstream_timeout, state.client.request(origin_req))
        .await??;

    let (resp_parts, resp_body) = resp.into_parts();
    let mut builder = Response::builder().status(resp_parts.status);
    for (name, value) in &resp_parts.headers {
        builder = builder.header(name, value);
    }
    Ok(builder.body(resp_body.map_err(hyper::Error::from).boxed())?)
}

fn remove_hop_headers(headers: &mut http::HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("te"),
        HeaderName::from_static("trailers"),
        TRANSFER_ENCODING,
        HeaderName::from_static("upgrade"),
    ];
    for h in hop_headers {
        headers.remove(h);
    }
}

fn inject_forwarded_headers(headers: &mut http::HeaderMap) {
    static XFP: HeaderName = HeaderName::from_static("x-forwarded-proto");
    if !headers.contains_key(&XFP) {
        headers.insert(XFP.clone(), HeaderValue::from_static("http"));
    }
}

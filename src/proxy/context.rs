use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use std::net::IpAddr;
use std::time::Instant;

use crate::admission::replay::{REPLAY_HEADER, REPLAY_HEADER_VALUE};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-request context carried through admission, forwarding and logging.
pub struct RequestContext {
    pub method: String,
    pub uri_path: String,
    pub client_ip: IpAddr,
    pub start: Instant,
    pub admitted: bool,
    pub is_replay_src: bool,
}

impl RequestContext {
    pub fn new(method: String, uri_path: String, client_ip: IpAddr) -> Self {
        Self {
            method,
            uri_path,
            client_ip,
            start: Instant::now(),
            admitted: true,
            is_replay_src: false,
        }
    }

    /// Build a shed-response (503, replay-stamped) and record its metrics.
    pub fn shed_response(&self) -> hyper::Response<BoxBody> {
        metrics::counter!(
            "shed_requests_total",
            "outcome" => "shed",
            "method" => self.method.clone(),
        )
        .increment(1);

        hyper::Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header(REPLAY_HEADER, REPLAY_HEADER_VALUE)
            .body(full_body("Service Unavailable"))
            .expect("static response is well-formed")
    }

    /// Record final metrics for a response that reached the origin.
    pub fn finalize_metrics(&self, status: StatusCode) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(status.as_u16());

        metrics::counter!(
            "shed_requests_total",
            "outcome" => "forwarded",
            "method" => self.method.clone(),
            "status" => status_str.to_owned(),
        )
        .increment(1);

        metrics::histogram!("shed_request_duration_seconds")
            .record(self.start.elapsed().as_secs_f64());
    }
}

use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::{Request, Response, StatusCode};
use tracing::warn;

use crate::proxy::context::{full_body, BoxBody};
use crate::server::state::BufferState;

use super::frame::serialize_request;

/// `POST /inbox`: serialize the request verbatim and push it onto the
/// buffer queue, replying 200 immediately (spec.md §4.6). Any other path or
/// method under this listener is unknown in buffered mode — the original
/// binary registers only `/inbox` and `/proxy_health`.
pub async fn handle_inbox<B>(
    req: Request<B>,
    state: Arc<BufferState>,
) -> Result<Response<BoxBody>, hyper::Error>
where
    B: hyper::body::Body<Data = bytes::Bytes> + Send + 'static,
    B::Error: std::fmt::Display,
{
    if req.uri().path() != state.config.buffer_inbox_path {
        return Ok(not_found());
    }
    if req.method() != hyper::Method::POST {
        return Ok(Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(full_body("Method Not Allowed"))
            .expect("static response is well-formed"));
    }

    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = req.headers().clone();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("buffer: failed to read request body, error={}", e);
            metrics::counter!("shed_buffer_enqueue_total", "outcome" => "serialize_error")
                .increment(1);
            return Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(full_body("Failed to read request body"))
                .expect("static response is well-formed"));
        }
    };

    let frame = serialize_request(&method, &path_and_query, &headers, &body);

    match state.producer.enqueue(frame).await {
        Ok(()) => {
            metrics::counter!("shed_buffer_enqueue_total", "outcome" => "enqueued").increment(1);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .body(full_body(""))
                .expect("static response is well-formed"))
        }
        Err(e) => {
            warn!("buffer: enqueue failed, error={}", e);
            metrics::counter!("shed_buffer_enqueue_total", "outcome" => "serialize_error")
                .increment(1);
            Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(full_body("Failed to dump request"))
                .expect("static response is well-formed"))
        }
    }
}

fn not_found() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(full_body("Not Found"))
        .expect("static response is well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::bounded;
    use crate::config::Config;
    use bytes::Bytes;
    use http_body_util::Full;

    fn build_state(capacity: usize) -> (Arc<BufferState>, crate::buffer::QueueConsumer) {
        let (producer, consumer) = bounded(capacity);
        let config = Arc::new(Config::default());
        (Arc::new(BufferState { config, producer }), consumer)
    }

    fn body(data: &'static str) -> Full<Bytes> {
        Full::new(Bytes::from_static(data.as_bytes()))
    }

    #[tokio::test]
    async fn test_post_to_inbox_enqueues_and_returns_200() {
        let (state, mut consumer) = build_state(10);

        let req: Request<Full<Bytes>> = Request::builder()
            .method("POST")
            .uri("/inbox")
            .header("host", "example.invalid")
            .body(body("hello"))
            .unwrap();

        let resp = handle_inbox(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let frame = consumer.dequeue().await.unwrap();
        let wire = String::from_utf8_lossy(&frame);
        assert!(wire.starts_with("POST /inbox HTTP/1.1"));
        assert!(wire.ends_with("hello"));
    }

    #[tokio::test]
    async fn test_unknown_path_returns_404() {
        let (state, _consumer) = build_state(10);
        let req: Request<Full<Bytes>> = Request::builder()
            .method("POST")
            .uri("/not-inbox")
            .body(body(""))
            .unwrap();

        let resp = handle_inbox(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_to_inbox_is_method_not_allowed() {
        let (state, _consumer) = build_state(10);
        let req: Request<Full<Bytes>> = Request::builder()
            .method("GET")
            .uri("/inbox")
            .body(body(""))
            .unwrap();

        let resp = handle_inbox(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_queue_full_surfaces_as_500_not_blocking_forever() {
        // capacity 1, fill it, then a bounded-mpsc send would block rather than
        // fail — this test only exercises the happy path's frame shape; the
        // blocking-producer behavior itself is covered in queue::tests.
        let (state, mut consumer) = build_state(1);
        let req: Request<Full<Bytes>> = Request::builder()
            .method("POST")
            .uri("/inbox")
            .body(body("x"))
            .unwrap();
        let resp = handle_inbox(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(consumer.dequeue().await.is_some());
    }
}

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, warn};

use super::frame::{deserialize_request, rewrite_destination};
use super::queue::QueueConsumer;

/// Drain side of the queue, shared across `config.buffer_workers` drain
/// workers. A plain `tokio::sync::Mutex` is enough — it is held only across
/// the `dequeue()` await, never across the forward dispatch (spec.md §9:
/// "consider a small worker pool with a configurable cap").
pub type SharedConsumer = Arc<tokio::sync::Mutex<QueueConsumer>>;

pub fn shared(consumer: QueueConsumer) -> SharedConsumer {
    Arc::new(tokio::sync::Mutex::new(consumer))
}

/// Cumulative-mean rolling average of forward durations, taken directly
/// from the original's `UpdateStats` (original_source
/// `federation-buffer/buffer.go`): `avg += (d - avg) / n`. A plain mutex is
/// enough here — the buffer path has exactly one consumer, unlike the
/// admission controller's multi-writer atomics (spec.md §5).
pub struct RollingAverage {
    avg: Duration,
    count: u64,
}

impl RollingAverage {
    fn new() -> Self {
        Self {
            avg: Duration::ZERO,
            count: 0,
        }
    }

    fn record(&mut self, d: Duration) {
        self.count += 1;
        let avg_secs = self.avg.as_secs_f64();
        let d_secs = d.as_secs_f64();
        let updated = avg_secs + (d_secs - avg_secs) / self.count as f64;
        self.avg = Duration::from_secs_f64(updated.max(0.0));
    }
}

/// Drain worker: pops frames off the queue, reconstructs a request against
/// `forward_host`, and dispatches it with `client`. Failures are logged and
/// never retried or re-queued (spec.md §4.6: "at-most-once").
pub async fn run_drain_worker(
    consumer: SharedConsumer,
    forward_host: String,
    client: reqwest::Client,
    stats: std::sync::Arc<Mutex<RollingAverage>>,
    shutdown: std::sync::Arc<Notify>,
) {
    loop {
        let frame = {
            let mut guard = consumer.lock().await;
            tokio::select! {
                frame = guard.dequeue() => frame,
                _ = shutdown.notified() => return,
            }
        };

        let Some(raw) = frame else {
            return; // producer side dropped, queue is closed
        };

        let parsed = match deserialize_request(&raw) {
            Ok(p) => p,
            Err(e) => {
                warn!("buffer: dropping frame, deserialize failed, error={}", e);
                continue;
            }
        };

        let uri = match rewrite_destination(&parsed, &forward_host) {
            Ok(u) => u,
            Err(e) => {
                warn!("buffer: dropping frame, destination rewrite failed, error={}", e);
                continue;
            }
        };

        let start = Instant::now();
        let method = reqwest_method(&parsed.method);
        let mut builder = client.request(method, uri.to_string()).body(parsed.body.to_vec());
        for (name, value) in &parsed.headers {
            if name == http::header::HOST {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        match builder.send().await {
            Ok(_) => {
                let elapsed = start.elapsed();
                stats.lock().expect("rolling average lock poisoned").record(elapsed);
                debug!("buffer: forwarded frame, duration={:.3}s", elapsed.as_secs_f64());
            }
            Err(e) => {
                warn!("buffer: upstream forward failed, not retried, error={}", e);
            }
        }
    }
}

fn reqwest_method(m: &http::Method) -> reqwest::Method {
    reqwest::Method::from_bytes(m.as_str().as_bytes()).unwrap_or(reqwest::Method::POST)
}

/// Periodic stats task: every `interval`, logs queue length, its rate of
/// change (sampled at >=1s granularity and differenced against the
/// previous sample), and the rolling average forward duration
/// (original_source `federation-buffer/buffer.go`'s `PrintStats`).
pub async fn run_stats_emitter(
    producer_len: impl Fn() -> usize + Send + 'static,
    stats: std::sync::Arc<Mutex<RollingAverage>>,
    interval: Duration,
    shutdown: std::sync::Arc<Notify>,
) {
    let mut last_len = producer_len();
    let mut last_sample_at = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.notified() => return,
        }

        let current_len = producer_len();
        let elapsed_secs = last_sample_at.elapsed().as_secs_f64().max(1.0);
        let rate = (current_len as f64 - last_len as f64) / elapsed_secs;

        let avg = stats.lock().expect("rolling average lock poisoned").avg;

        tracing::info!(
            "buffer: stats, queue_len={}, rate_per_sec={:.2}, avg_forward_duration_ms={:.1}",
            current_len,
            rate,
            avg.as_secs_f64() * 1000.0,
        );

        metrics::gauge!("shed_buffer_queue_length").set(current_len as f64);
        metrics::gauge!("shed_buffer_forward_avg_seconds").set(avg.as_secs_f64());

        last_len = current_len;
        last_sample_at = Instant::now();
    }
}

pub fn new_rolling_average() -> std::sync::Arc<Mutex<RollingAverage>> {
    std::sync::Arc::new(Mutex::new(RollingAverage::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_average_matches_cumulative_mean() {
        let mut avg = RollingAverage::new();
        avg.record(Duration::from_millis(100));
        avg.record(Duration::from_millis(200));
        avg.record(Duration::from_millis(300));
        // mean of 100, 200, 300 is 200
        assert!((avg.avg.as_secs_f64() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_reqwest_method_conversion() {
        assert_eq!(reqwest_method(&http::Method::POST), reqwest::Method::POST);
        assert_eq!(reqwest_method(&http::Method::GET), reqwest::Method::GET);
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::Config;

use super::controller::AdmissionController;

/// Sleep for `duration`, returning `true` immediately if shutdown fires.
async fn sleep_or_shutdown(duration: Duration, shutdown: &Notify) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.notified() => true,
    }
}

/// Spawn the control loop: every `config.control_tick`, nudge F towards
/// `config.latency_target` (spec.md §4.2).
pub fn start_control_loop(
    controller: Arc<AdmissionController>,
    config: Arc<Config>,
    shutdown: Arc<Notify>,
) {
    tokio::spawn(async move {
        let target_ns = config.latency_target.as_nanos() as i64;
        loop {
            if sleep_or_shutdown(config.control_tick, &shutdown).await {
                return;
            }
            controller.tick(target_ns, config.delta_inc, config.delta_dec);
            metrics::gauge!("shed_sample_fraction").set(controller.fraction());
            metrics::gauge!("shed_ema_latency_seconds")
                .set(controller.estimator.read().as_secs_f64());
        }
    });
}

/// Spawn the stall detector: every `config.stall_check_interval`, reset F
/// and L if the estimator has been idle past `config.stall_idle_threshold`
/// (spec.md §4.2).
pub fn start_stall_detector(
    controller: Arc<AdmissionController>,
    config: Arc<Config>,
    shutdown: Arc<Notify>,
) {
    tokio::spawn(async move {
        let threshold_secs = config.stall_idle_threshold.as_secs() as i64;
        loop {
            if sleep_or_shutdown(config.stall_check_interval, &shutdown).await {
                return;
            }
            controller.check_stall(threshold_secs);
        }
    });
}

/// Spawn the periodic stats logger: every `config.stats_log_interval`, log
/// the current sample fraction and EMA latency at info level.
pub fn start_stats_logger(
    controller: Arc<AdmissionController>,
    config: Arc<Config>,
    shutdown: Arc<Notify>,
) {
    tokio::spawn(async move {
        loop {
            if sleep_or_shutdown(config.stats_log_interval, &shutdown).await {
                return;
            }
            tracing::info!(
                "admission: stats, sample_fraction={:.4}, ema_latency_ms={:.1}",
                controller.fraction(),
                controller.estimator.read().as_secs_f64() * 1000.0,
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_control_loop_raises_fraction_when_latency_under_target() {
        let controller = Arc::new(AdmissionController::new(500, 0.10));
        controller.set_fraction_for_test(0.5);
        controller.estimator.observe(Duration::from_millis(50));

        let mut config = Config::default();
        config.control_tick = Duration::from_millis(5);
        let config = Arc::new(config);

        let shutdown = Arc::new(Notify::new());
        start_control_loop(controller.clone(), config, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.notify_waiters();

        assert!(controller.fraction() > 0.5, "fraction should rise above its starting point");
    }

    #[tokio::test]
    async fn test_stall_detector_resets_after_threshold() {
        let controller = Arc::new(AdmissionController::new(500, 0.10));
        // The stall detector only acts while F < 1.0 (spec.md §4.2) — a
        // healthy, unshed instance at F=1.0 is left alone, so start below
        // full fraction to exercise the reset path.
        controller.set_fraction_for_test(0.3);
        controller.estimator.observe(Duration::from_millis(10));

        let mut config = Config::default();
        config.stall_check_interval = Duration::from_millis(5);
        config.stall_idle_threshold = Duration::from_secs(0); // always stale
        let config = Arc::new(config);

        let shutdown = Arc::new(Notify::new());
        start_stall_detector(controller.clone(), config, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.notify_waiters();

        assert!((controller.fraction() - 0.5).abs() < 1e-9);
    }
}

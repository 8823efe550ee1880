use anyhow::{bail, Result};
use ipnetwork::IpNetwork;
use std::time::Duration;

/// Deployment mode, selected via `--mode` / the `SHED_MODE` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Synchronous admission-controlled reverse proxy (spec.md §4.1-4.5).
    Proxy,
    /// Bounded in-memory request buffer + async drain worker (spec.md §4.6).
    Buffered,
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "proxy" => Ok(Mode::Proxy),
            "buffered" => Ok(Mode::Buffered),
            other => bail!("unknown mode '{other}', expected 'proxy' or 'buffered'"),
        }
    }
}

/// Fully resolved runtime configuration — CLI defaults overlaid with
/// environment variable overrides, validated once at startup.
///
/// Business knobs (sample size, latency target, deltas, ...) all default to
/// the "mature variant" values spec.md settles on when reference
/// implementations disagree (see SPEC_FULL.md §10).
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub listen: String,
    pub admin_listen: String,

    /// Proxy mode: the single configured upstream origin.
    pub origin: String,
    /// Buffered mode: `host:port` of the forward target (no scheme).
    pub forward_host: Option<String>,

    /// S — sample window size.
    pub sample_size: u32,
    /// F_min — floor of the sample fraction.
    pub f_min: f64,
    /// L_target — admission controller's latency target.
    pub latency_target: Duration,
    /// Δ_inc — sample fraction increase step per control tick.
    pub delta_inc: f64,
    /// Δ_dec — sample fraction decrease step per control tick.
    pub delta_dec: f64,
    /// Whether HTTP 400 responses also get stamped with the replay directive
    /// (one reference variant does this, the mature one does not).
    pub replay_on_400: bool,

    pub control_tick: Duration,
    pub stall_check_interval: Duration,
    pub stall_idle_threshold: Duration,
    pub stats_log_interval: Duration,

    pub cache_enabled: bool,
    pub cache_path: String,
    pub cache_ttl: Duration,
    /// CIDR blocks that bypass the response cache entirely.
    pub internal_subnets: Vec<IpNetwork>,

    pub buffer_capacity: usize,
    pub buffer_workers: usize,
    pub buffer_metrics_interval: Duration,
    /// Path the buffered-mode listener accepts enqueues on (spec.md §4.6).
    pub buffer_inbox_path: String,

    pub upstream_timeout: Duration,
    /// TCP connect timeout for the origin client (not spec'd; sensible default).
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Proxy,
            listen: "0.0.0.0:8080".to_string(),
            admin_listen: "0.0.0.0:9091".to_string(),
            origin: "http://127.0.0.1:8536".to_string(),
            forward_host: None,
            sample_size: 500,
            f_min: 0.10,
            latency_target: Duration::from_millis(700),
            delta_inc: 0.05,
            delta_dec: 0.05,
            replay_on_400: false,
            control_tick: Duration::from_millis(500),
            stall_check_interval: Duration::from_secs(5),
            stall_idle_threshold: Duration::from_secs(5),
            stats_log_interval: Duration::from_secs(5),
            cache_enabled: false,
            cache_path: "/nodeinfo/2.0.json".to_string(),
            cache_ttl: Duration::from_secs(3600),
            internal_subnets: default_internal_subnets(),
            buffer_capacity: 10_000,
            buffer_workers: 1,
            buffer_metrics_interval: Duration::from_secs(10),
            buffer_inbox_path: "/inbox".to_string(),
            upstream_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

fn default_internal_subnets() -> Vec<IpNetwork> {
    ["172.16.0.0/16", "172.19.0.0/16"]
        .iter()
        .map(|s| s.parse().expect("built-in CIDR literal is valid"))
        .collect()
}

impl Config {
    /// Build config from CLI-supplied overrides, then apply environment
    /// variable overrides on top (env wins — matches the teacher's
    /// `apply_env_overrides` layering and the original Go binaries reading
    /// straight from the environment).
    pub fn load(cli: CliOverrides) -> Result<Self> {
        let mut config = Config::default();

        if let Some(v) = cli.mode {
            config.mode = v;
        }
        if let Some(v) = cli.listen {
            config.listen = v;
        }
        if let Some(v) = cli.admin_listen {
            config.admin_listen = v;
        }
        if let Some(v) = cli.origin {
            config.origin = v;
        }
        if let Some(v) = cli.forward_host {
            config.forward_host = Some(v);
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("SHED_MODE") {
            self.mode = v.parse()?;
        }

        // PORT / FORWARD_HOST are the two env vars spec.md §6 names exactly.
        if let Ok(v) = std::env::var("PORT") {
            let port: u16 = v
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid u16, got '{v}'"))?;
            self.listen = replace_port(&self.listen, port);
        }
        if let Ok(v) = std::env::var("FORWARD_HOST") {
            self.forward_host = Some(v);
        }

        if let Ok(v) = std::env::var("SHED_ADMIN_LISTEN") {
            self.admin_listen = v;
        }
        if let Ok(v) = std::env::var("SHED_ORIGIN") {
            self.origin = v;
        }
        if let Ok(v) = std::env::var("SHED_SAMPLE_SIZE") {
            self.sample_size = v.parse()?;
        }
        if let Ok(v) = std::env::var("SHED_F_MIN") {
            self.f_min = v.parse()?;
        }
        if let Ok(v) = std::env::var("SHED_LATENCY_TARGET_MS") {
            self.latency_target = Duration::from_millis(v.parse()?);
        }
        if let Ok(v) = std::env::var("SHED_DELTA") {
            let d: f64 = v.parse()?;
            self.delta_inc = d;
            self.delta_dec = d;
        }
        if let Ok(v) = std::env::var("SHED_DELTA_INC") {
            self.delta_inc = v.parse()?;
        }
        if let Ok(v) = std::env::var("SHED_DELTA_DEC") {
            self.delta_dec = v.parse()?;
        }
        if let Ok(v) = std::env::var("SHED_REPLAY_ON_400") {
            self.replay_on_400 = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("SHED_CACHE_ENABLED") {
            self.cache_enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("SHED_CACHE_PATH") {
            self.cache_path = v;
        }
        if let Ok(v) = std::env::var("SHED_CACHE_TTL_SECS") {
            self.cache_ttl = Duration::from_secs(v.parse()?);
        }
        if let Ok(v) = std::env::var("SHED_INTERNAL_SUBNETS") {
            self.internal_subnets = v
                .split(',')
                .map(|s| s.trim().parse::<IpNetwork>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| anyhow::anyhow!("invalid SHED_INTERNAL_SUBNETS entry: {e}"))?;
        }
        if let Ok(v) = std::env::var("SHED_BUFFER_CAPACITY") {
            self.buffer_capacity = v.parse()?;
        }
        if let Ok(v) = std::env::var("SHED_BUFFER_WORKERS") {
            self.buffer_workers = v.parse()?;
        }
        if let Ok(v) = std::env::var("SHED_BUFFER_INBOX_PATH") {
            self.buffer_inbox_path = v;
        }
        if let Ok(v) = std::env::var("SHED_UPSTREAM_TIMEOUT_SECS") {
            self.upstream_timeout = Duration::from_secs(v.parse()?);
        }
        if let Ok(v) = std::env::var("SHED_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout = Duration::from_secs(v.parse()?);
        }

        Ok(())
    }

    /// Configuration-fatal validation — the only error class that aborts the
    /// process at startup (spec.md §7).
    pub fn validate(&self) -> Result<()> {
        if self.mode == Mode::Buffered && self.forward_host.is_none() {
            bail!("FORWARD_HOST environment variable must be set in buffered mode");
        }
        if self.f_min <= 0.0 || self.f_min > 1.0 {
            bail!("f_min must be in (0.0, 1.0], got {}", self.f_min);
        }
        if self.sample_size == 0 {
            bail!("sample_size must be > 0");
        }
        if self.buffer_workers == 0 {
            bail!("buffer_workers must be > 0");
        }
        Ok(())
    }
}

/// Replace the `:port` suffix of a `host:port` listen address.
fn replace_port(listen: &str, port: u16) -> String {
    match listen.rsplit_once(':') {
        Some((host, _)) => format!("{host}:{port}"),
        None => format!("0.0.0.0:{port}"),
    }
}

/// Raw overrides gathered from `clap` in `main.rs`, before environment
/// variables are layered on top.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub mode: Option<Mode>,
    pub listen: Option<String>,
    pub admin_listen: Option<String>,
    pub origin: Option<String>,
    pub forward_host: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_buffered_mode_requires_forward_host() {
        let mut cfg = Config::default();
        cfg.mode = Mode::Buffered;
        assert!(cfg.validate().is_err());
        cfg.forward_host = Some("127.0.0.1:9000".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_replace_port() {
        assert_eq!(replace_port("0.0.0.0:8080", 9000), "0.0.0.0:9000");
        assert_eq!(replace_port("badaddr", 9000), "0.0.0.0:9000");
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("proxy".parse::<Mode>().unwrap(), Mode::Proxy);
        assert_eq!("buffered".parse::<Mode>().unwrap(), Mode::Buffered);
        assert!("bogus".parse::<Mode>().is_err());
    }

    #[test]
    fn test_default_internal_subnets_cover_expected_ranges() {
        let subnets = default_internal_subnets();
        let ip: std::net::IpAddr = "172.16.5.1".parse().unwrap();
        assert!(subnets.iter().any(|n| n.contains(ip)));
        let ip2: std::net::IpAddr = "172.19.1.1".parse().unwrap();
        assert!(subnets.iter().any(|n| n.contains(ip2)));
        let ip3: std::net::IpAddr = "8.8.8.8".parse().unwrap();
        assert!(!subnets.iter().any(|n| n.contains(ip3)));
    }
}

use std::sync::Arc;

use crate::admission::{AdmissionController, ReplayPolicy};
use crate::buffer::QueueProducer;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::proxy::OriginClient;

/// Shared state for the synchronous admission-controlled proxy (spec.md
/// §4.1-§4.5). Owned by the listener root and handed to every request task
/// behind one `Arc` (spec.md §9: "a single `AdmissionController` value
/// owned by the listener root, passed by shared reference to each
/// handler").
pub struct ProxyState {
    pub config: Arc<Config>,
    pub admission: Arc<AdmissionController>,
    pub replay_policy: ReplayPolicy,
    pub cache: Option<ResponseCache>,
    pub client: OriginClient,
    pub metrics: Metrics,
}

/// Shared state for the buffered deployment mode (spec.md §4.6). The
/// listener side only needs a producer handle; the drain worker(s) own the
/// consumer half separately (see `server::bootstrap`).
pub struct BufferState {
    pub config: Arc<Config>,
    pub producer: QueueProducer,
    pub metrics: Metrics,
}

/// The two deployment modes are mutually exclusive at startup (spec.md §6:
/// `--mode proxy|buffered`), so the listener dispatches on one or the
/// other rather than carrying both unconditionally.
#[derive(Clone)]
pub enum AppState {
    Proxy(Arc<ProxyState>),
    Buffered(Arc<BufferState>),
}

impl AppState {
    pub fn metrics(&self) -> &Metrics {
        match self {
            AppState::Proxy(s) => &s.metrics,
            AppState::Buffered(s) => &s.metrics,
        }
    }
}

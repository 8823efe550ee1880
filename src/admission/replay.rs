use http::{HeaderMap, HeaderValue, StatusCode};

pub const REPLAY_HEADER: &str = "fly-replay";
pub const REPLAY_HEADER_VALUE: &str = "elsewhere=true";
pub const REPLAY_SRC_HEADER: &str = "fly-replay-src";

/// Decides when a response should be stamped with the platform replay
/// directive, and whether an incoming request is itself a replay — in
/// which case it must never be denied or re-stamped, or the platform would
/// bounce it forever (spec.md §4.4).
pub struct ReplayPolicy {
    pub replay_on_400: bool,
}

impl ReplayPolicy {
    pub fn new(replay_on_400: bool) -> Self {
        Self { replay_on_400 }
    }

    /// A request carrying `fly-replay-src` has already been redirected once
    /// by the platform; it is always admitted and never stamped again.
    pub fn is_replay_src(&self, headers: &HeaderMap) -> bool {
        headers.contains_key(REPLAY_SRC_HEADER)
    }

    /// Whether an upstream response status should trigger a replay stamp.
    pub fn should_stamp(&self, status: StatusCode) -> bool {
        status.is_server_error() || (self.replay_on_400 && status == StatusCode::BAD_REQUEST)
    }

    /// Stamp the replay header onto a response's headers, unless the
    /// originating request was itself a replay.
    pub fn stamp(&self, headers: &mut HeaderMap, request_headers: &HeaderMap) {
        if self.is_replay_src(request_headers) {
            return;
        }
        headers.insert(REPLAY_HEADER, HeaderValue::from_static(REPLAY_HEADER_VALUE));
    }

    /// Same as `stamp`, but for callers that already know whether the
    /// originating request was a replay and don't have its headers at hand.
    pub fn stamp_if_not_replay(&self, headers: &mut HeaderMap, is_replay_src: bool) {
        if is_replay_src {
            return;
        }
        headers.insert(REPLAY_HEADER, HeaderValue::from_static(REPLAY_HEADER_VALUE));
    }
}

//! At-most-once request handling per IPMI session: a retransmit that
//! arrives while the original request is still being processed is dropped
//! silently; one that arrives after the original has completed gets the
//! cached response replayed (`original_source/asyncbmc.py::AsyncSessionProxy`,
//! `handle_raw_request`).

use std::collections::HashMap;
use tokio::sync::Mutex;

struct SessionState {
    last_sequence: Option<u8>,
    in_flight: bool,
    cached_response: Option<Vec<u8>>,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            last_sequence: None,
            in_flight: false,
            cached_response: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum DedupDecision {
    /// A fresh request (or a retry that never got a response cached) —
    /// the caller should run the handler.
    Proceed,
    /// A retransmit of a request whose response is already known — the
    /// caller should resend `Vec<u8>` without re-running the handler.
    Replay(Vec<u8>),
    /// A retransmit that arrived while the first attempt is still being
    /// handled — silently dropped, matching the original's documented
    /// behavior (DESIGN.md Open Question #2).
    Drop,
}

/// Keyed by IPMI session ID; holds one in-flight/most-recent sequence
/// number's worth of state per session, same granularity as the original
/// (it never tracked more than the single latest sequence number).
pub struct ResponseCache {
    sessions: Mutex<HashMap<u32, SessionState>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        ResponseCache {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn begin(&self, session_id: u32, sequence: u8) -> DedupDecision {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(session_id).or_default();

        if state.last_sequence == Some(sequence) {
            if state.in_flight {
                tracing::debug!(session_id, sequence, "dropping retransmit still in flight");
                return DedupDecision::Drop;
            }
            if let Some(response) = state.cached_response.clone() {
                tracing::debug!(session_id, sequence, "replaying cached response for retransmit");
                return DedupDecision::Replay(response);
            }
        }

        state.last_sequence = Some(sequence);
        state.in_flight = true;
        state.cached_response = None;
        DedupDecision::Proceed
    }

    pub async fn complete(&self, session_id: u32, sequence: u8, response: Vec<u8>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(&session_id) {
            if state.last_sequence == Some(sequence) {
                state.in_flight = false;
                state.cached_response = Some(response);
            }
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_sequence_proceeds() {
        let cache = ResponseCache::new();
        assert_eq!(cache.begin(1, 0).await, DedupDecision::Proceed);
    }

    #[tokio::test]
    async fn retransmit_while_in_flight_is_dropped() {
        let cache = ResponseCache::new();
        assert_eq!(cache.begin(1, 5).await, DedupDecision::Proceed);
        assert_eq!(cache.begin(1, 5).await, DedupDecision::Drop);
    }

    #[tokio::test]
    async fn retransmit_after_completion_replays_cached_response() {
        let cache = ResponseCache::new();
        assert_eq!(cache.begin(1, 5).await, DedupDecision::Proceed);
        cache.complete(1, 5, vec![0x00]).await;
        assert_eq!(cache.begin(1, 5).await, DedupDecision::Replay(vec![0x00]));
    }

    #[tokio::test]
    async fn new_sequence_resets_session_state() {
        let cache = ResponseCache::new();
        cache.begin(1, 5).await;
        cache.complete(1, 5, vec![0x00]).await;
        assert_eq!(cache.begin(1, 6).await, DedupDecision::Proceed);
    }
}

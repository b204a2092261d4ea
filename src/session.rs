//! Per-peer session state (§3 "Session", §4.4).
//!
//! Grounded on `original_source/source/oscquery/client.hpp`/`.cpp`
//! (`WPNQueryClient`), which plays both directions of this role in the
//! source: a "direct" client dialing out, and an "indirect" client that is
//! really the server's per-connection peer record. This module models
//! only the server-side peer record the spec calls `Session`; the
//! corresponding client-side state lives in `protocol::client`.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque per-session identifier, used by [`crate::tree::Node`] to track
/// its exact-match listeners without the tree depending on transport
/// types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    pub fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle states from §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Dialing,
    Handshaking,
    Open,
    OscStreamingNegotiated,
    Closing,
    Closed,
}

/// Per-peer subscription table entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub path: String,
    pub listen_all: bool,
}

/// The state the protocol engine keeps for one connected peer.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub peer_ip: IpAddr,
    pub state: SessionState,
    /// Set once the peer negotiates `START_OSC_STREAMING`.
    pub return_udp_port: Option<u16>,
    /// Exact-match `LISTEN` subscriptions.
    listen: HashSet<String>,
    /// Prefix-match `LISTEN_ALL` subscriptions.
    listen_all: HashSet<String>,
    /// §7: "session remains open unless three consecutive malformed
    /// frames occur."
    pub consecutive_malformed: u8,
}

impl Session {
    pub fn new(peer_ip: IpAddr) -> Self {
        Session {
            id: SessionId::next(),
            peer_ip,
            state: SessionState::Handshaking,
            return_udp_port: None,
            listen: HashSet::new(),
            listen_all: HashSet::new(),
            consecutive_malformed: 0,
        }
    }

    pub fn open(&mut self) {
        self.state = SessionState::Open;
    }

    pub fn close(&mut self) {
        // §5 cancellation: drop subscriptions atomically with the state
        // transition, before any further fan-out can consider this peer.
        self.listen.clear();
        self.listen_all.clear();
        self.state = SessionState::Closed;
    }

    pub fn negotiate_osc_streaming(&mut self, local_server_port: u16) {
        self.return_udp_port = Some(local_server_port);
        self.state = SessionState::OscStreamingNegotiated;
    }

    /// `LISTEN` — idempotent, set-semantic (§9 open question resolution:
    /// no ref-counting).
    pub fn listen(&mut self, path: &str) {
        self.listen.insert(path.to_string());
    }

    pub fn ignore(&mut self, path: &str) {
        self.listen.remove(path);
    }

    pub fn listen_all(&mut self, path: &str) {
        self.listen_all.insert(path.to_string());
    }

    pub fn ignore_all(&mut self, path: &str) {
        self.listen_all.remove(path);
    }

    /// Whether this session should receive a value-change frame for
    /// `node_path`: an exact `LISTEN` match, or a `LISTEN_ALL` prefix
    /// match (§4.4: "match when a fired path starts with the subscribed
    /// path").
    pub fn subscribed_to(&self, node_path: &str) -> bool {
        if self.listen.contains(node_path) {
            return true;
        }
        self.listen_all
            .iter()
            .any(|prefix| node_path.starts_with(prefix.as_str()))
    }

    pub fn note_malformed_frame(&mut self) -> bool {
        self.consecutive_malformed += 1;
        self.consecutive_malformed >= 3
    }

    pub fn note_well_formed_frame(&mut self) {
        self.consecutive_malformed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn session() -> Session {
        Session::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[test]
    fn listen_then_ignore_clears_subscription() {
        let mut s = session();
        s.listen("/a/b");
        assert!(s.subscribed_to("/a/b"));
        s.ignore("/a/b");
        assert!(!s.subscribed_to("/a/b"));
    }

    #[test]
    fn listen_all_matches_by_prefix() {
        let mut s = session();
        s.listen_all("/a");
        assert!(s.subscribed_to("/a"));
        assert!(s.subscribed_to("/a/b"));
        assert!(s.subscribed_to("/a/b/c"));
        assert!(!s.subscribed_to("/x"));
    }

    #[test]
    fn duplicate_listen_is_idempotent() {
        let mut s = session();
        s.listen("/a");
        s.listen("/a");
        s.ignore("/a");
        assert!(!s.subscribed_to("/a"));
    }

    #[test]
    fn close_drops_all_subscriptions() {
        let mut s = session();
        s.listen("/a");
        s.listen_all("/b");
        s.close();
        assert!(!s.subscribed_to("/a"));
        assert!(!s.subscribed_to("/b/c"));
        assert_eq!(s.state, SessionState::Closed);
    }

    #[test]
    fn three_consecutive_malformed_frames_is_fatal() {
        let mut s = session();
        assert!(!s.note_malformed_frame());
        assert!(!s.note_malformed_frame());
        assert!(s.note_malformed_frame());
        s.note_well_formed_frame();
        assert_eq!(s.consecutive_malformed, 0);
    }
}

//! The tree-owning event loop (§5 "Scheduling model").
//!
//! No single teacher or `original_source` file covers this directly — the
//! teacher is single-connection/request-response only, and the source
//! spreads the loop across Qt's signal/slot machinery
//! (`qserver.cpp`/`client.cpp`). This is a from-scratch, from-`spec.md`
//! §5 implementation: a single task owns [`Tree`] and the session table;
//! every other task (HTTP/WS I/O, UDP I/O, discovery) only reaches the
//! tree by sending a [`DispatchMessage`] over a bounded channel and
//! awaiting the reply. `Dispatcher`'s own methods are synchronous and
//! side-effect-free beyond the two outbound queues
//! (`outboxes`/`udp_out`), so its fan-out rules are unit-tested without
//! touching a socket.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value as Json;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::discovery::DiscoveredService;
use crate::error::{Error, Result};
use crate::osc;
use crate::session::{Session, SessionId};
use crate::tree::{Node, NodeId, Tree, TreeEvent};
use crate::value::Value;

/// A frame queued for a session's WebSocket writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Per-session outbound queue capacity (§7 `Error::Overflow`): past this,
/// pushing a frame drops the oldest pending one instead of growing
/// unboundedly or blocking the tree loop.
const OUTBOX_CAPACITY: usize = 64;

/// The push side of a session's bounded outbound queue. `tokio::sync::mpsc`
/// has no drop-oldest-on-full policy, so this is a small hand-rolled one:
/// a shared ring buffer plus a `Notify` to wake the paired
/// [`OutboxReceiver`].
struct Outbox {
    state: Arc<Mutex<VecDeque<OutboundFrame>>>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
    capacity: usize,
}

/// The pull side, held by the task writing frames to a session's
/// WebSocket.
pub struct OutboxReceiver {
    state: Arc<Mutex<VecDeque<OutboundFrame>>>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl Outbox {
    fn channel(capacity: usize) -> (Outbox, OutboxReceiver) {
        let state = Arc::new(Mutex::new(VecDeque::new()));
        let notify = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));
        (
            Outbox {
                state: state.clone(),
                notify: notify.clone(),
                closed: closed.clone(),
                capacity,
            },
            OutboxReceiver {
                state,
                notify,
                closed,
            },
        )
    }

    /// Push a frame, dropping the oldest pending one first if already at
    /// capacity. Never blocks.
    fn push(&self, frame: OutboundFrame) {
        let mut pending = self.state.lock().unwrap();
        if pending.len() >= self.capacity {
            pending.pop_front();
            tracing::debug!(error = %Error::Overflow, "dropped oldest pending outbound frame");
        }
        pending.push_back(frame);
        drop(pending);
        self.notify.notify_one();
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

impl OutboxReceiver {
    fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.state.lock().unwrap().pop_front()
    }

    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        loop {
            if let Some(frame) = self.try_recv() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }
}

/// Where a value-change push travels, per §6 point 6 / §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    WebSocketBinary,
}

/// `critical` always wins; otherwise UDP if the session negotiated a
/// return port, else WebSocket binary.
pub fn select_transport(critical: bool, session: &Session) -> Transport {
    if critical {
        Transport::WebSocketBinary
    } else if session.return_udp_port.is_some() {
        Transport::Udp
    } else {
        Transport::WebSocketBinary
    }
}

enum DispatchMessage {
    RegisterSession {
        peer_ip: IpAddr,
        reply: oneshot::Sender<(SessionId, OutboxReceiver)>,
    },
    Command {
        session: SessionId,
        command: String,
        data: Json,
        reply: oneshot::Sender<Result<()>>,
    },
    SetValue {
        session: SessionId,
        path: String,
        value: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Query {
        path: String,
        attribute: Option<String>,
        reply: oneshot::Sender<Option<Json>>,
    },
    Link {
        path: String,
        node: Node,
        reply: oneshot::Sender<NodeId>,
    },
    Remove {
        path: String,
    },
    CloseSession {
        session: SessionId,
    },
    UdpDatagram {
        peer: SocketAddr,
        bytes: Vec<u8>,
    },
    ServiceAdded(DiscoveredService),
}

/// Handle used by I/O tasks to reach the dispatch loop. Cheap to clone.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<DispatchMessage>,
}

impl DispatchHandle {
    pub async fn register_session(&self, peer_ip: IpAddr) -> Result<(SessionId, OutboxReceiver)> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DispatchMessage::RegisterSession { peer_ip, reply })
            .await
            .map_err(|_| Error::TransportClosed)?;
        rx.await.map_err(|_| Error::TransportClosed)
    }

    pub async fn command(&self, session: SessionId, command: String, data: Json) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DispatchMessage::Command {
                session,
                command,
                data,
                reply,
            })
            .await
            .map_err(|_| Error::TransportClosed)?;
        rx.await.map_err(|_| Error::TransportClosed)?
    }

    pub async fn set_value(&self, session: SessionId, path: String, value: Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DispatchMessage::SetValue {
                session,
                path,
                value,
                reply,
            })
            .await
            .map_err(|_| Error::TransportClosed)?;
        rx.await.map_err(|_| Error::TransportClosed)?
    }

    pub async fn query(&self, path: String, attribute: Option<String>) -> Result<Option<Json>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DispatchMessage::Query {
                path,
                attribute,
                reply,
            })
            .await
            .map_err(|_| Error::TransportClosed)?;
        rx.await.map_err(|_| Error::TransportClosed)
    }

    pub async fn link(&self, path: String, node: Node) -> Result<NodeId> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DispatchMessage::Link { path, node, reply })
            .await
            .map_err(|_| Error::TransportClosed)?;
        rx.await.map_err(|_| Error::TransportClosed)
    }

    pub async fn remove(&self, path: String) -> Result<()> {
        self.tx
            .send(DispatchMessage::Remove { path })
            .await
            .map_err(|_| Error::TransportClosed)
    }

    pub async fn close_session(&self, session: SessionId) -> Result<()> {
        self.tx
            .send(DispatchMessage::CloseSession { session })
            .await
            .map_err(|_| Error::TransportClosed)
    }

    pub async fn udp_datagram(&self, peer: SocketAddr, bytes: Vec<u8>) -> Result<()> {
        self.tx
            .send(DispatchMessage::UdpDatagram { peer, bytes })
            .await
            .map_err(|_| Error::TransportClosed)
    }

    pub async fn service_added(&self, service: DiscoveredService) -> Result<()> {
        self.tx
            .send(DispatchMessage::ServiceAdded(service))
            .await
            .map_err(|_| Error::TransportClosed)
    }
}

/// The tree-owning state machine. Lives on exactly one task; every field
/// is touched only from methods on `&mut self`.
pub struct Dispatcher {
    tree: Tree,
    sessions: HashMap<SessionId, Session>,
    outboxes: HashMap<SessionId, Outbox>,
    udp_out: mpsc::UnboundedSender<(SocketAddr, String, Value)>,
    discovered: Vec<DiscoveredService>,
}

impl Dispatcher {
    pub fn new(udp_out: mpsc::UnboundedSender<(SocketAddr, String, Value)>) -> Self {
        Dispatcher {
            tree: Tree::new(),
            sessions: HashMap::new(),
            outboxes: HashMap::new(),
            udp_out,
            discovered: Vec::new(),
        }
    }

    /// Spawn the loop on its own task, returning a handle plus a
    /// bounded-channel capacity matching §5's "incoming frames are
    /// dispatched onto the tree-owning loop via a bounded channel."
    pub fn spawn(
        udp_out: mpsc::UnboundedSender<(SocketAddr, String, Value)>,
    ) -> (DispatchHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(256);
        let dispatcher = Dispatcher::new(udp_out);
        let join = tokio::spawn(dispatcher.run(rx));
        (DispatchHandle { tx }, join)
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<DispatchMessage>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg);
        }
    }

    fn handle(&mut self, msg: DispatchMessage) {
        match msg {
            DispatchMessage::RegisterSession { peer_ip, reply } => {
                let result = self.register_session(peer_ip);
                let _ = reply.send(result);
            }
            DispatchMessage::Command {
                session,
                command,
                data,
                reply,
            } => {
                let _ = reply.send(self.apply_command(session, &command, &data));
            }
            DispatchMessage::SetValue {
                session,
                path,
                value,
                reply,
            } => {
                let _ = reply.send(self.set_value_from_session(session, &path, value));
            }
            DispatchMessage::Query {
                path,
                attribute,
                reply,
            } => {
                let _ = reply.send(self.tree.query(&path, attribute.as_deref()));
            }
            DispatchMessage::Link { path, node, reply } => {
                let (id, events) = self.tree.link(&path, node);
                self.fan_out(events, None);
                let _ = reply.send(id);
            }
            DispatchMessage::Remove { path } => {
                let events = self.tree.remove(&path);
                self.fan_out(events, None);
            }
            DispatchMessage::CloseSession { session } => self.close_session(session),
            DispatchMessage::UdpDatagram { peer, bytes } => self.handle_udp_bytes(peer, &bytes),
            DispatchMessage::ServiceAdded(service) => self.discovered.push(service),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    fn register_session(&mut self, peer_ip: IpAddr) -> (SessionId, OutboxReceiver) {
        let mut session = Session::new(peer_ip);
        session.open();
        let id = session.id;
        let (outbox, receiver) = Outbox::channel(OUTBOX_CAPACITY);
        self.sessions.insert(id, session);
        self.outboxes.insert(id, outbox);
        (id, receiver)
    }

    fn close_session(&mut self, session_id: SessionId) {
        // §5 cancellation: drop the outbox *before* any further fan-out
        // can consider this session, matching the session's own
        // subscription-clearing `close`.
        self.outboxes.remove(&session_id);
        if let Some(mut session) = self.sessions.remove(&session_id) {
            session.close();
        }
    }

    /// WebSocket command grammar (§6): `LISTEN`/`IGNORE`/`LISTEN_ALL`/
    /// `IGNORE_ALL` take a path string as `DATA`; `START_OSC_STREAMING`
    /// takes `{LOCAL_SERVER_PORT, LOCAL_SENDER_PORT}` (§8 S4).
    fn apply_command(&mut self, session_id: SessionId, command: &str, data: &Json) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(Error::TransportClosed)?;
        match command {
            "LISTEN" => session.listen(path_arg(data)?),
            "IGNORE" => session.ignore(path_arg(data)?),
            "LISTEN_ALL" => session.listen_all(path_arg(data)?),
            "IGNORE_ALL" => session.ignore_all(path_arg(data)?),
            "START_OSC_STREAMING" => {
                let port = data
                    .get("LOCAL_SERVER_PORT")
                    .and_then(Json::as_u64)
                    .ok_or_else(|| {
                        Error::MalformedJson("missing LOCAL_SERVER_PORT".to_string())
                    })?;
                session.negotiate_osc_streaming(port as u16);
            }
            other => {
                return Err(Error::MalformedJson(format!("unknown command {other}")));
            }
        }
        Ok(())
    }

    fn set_value_from_session(
        &mut self,
        session_id: SessionId,
        path: &str,
        value: Value,
    ) -> Result<()> {
        let id = self
            .tree
            .find(path)
            .ok_or_else(|| Error::UnknownAddress(path.to_string()))?;
        let events = self.tree.set_value_quiet(id, value)?;
        self.fan_out(events, Some(session_id));
        Ok(())
    }

    fn session_id_for_ip(&self, ip: IpAddr) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, s)| s.peer_ip == ip)
            .map(|(id, _)| *id)
    }

    /// §7: "session remains open unless three consecutive malformed
    /// frames occur" — tracked per originating IP, since UDP carries no
    /// session handshake of its own.
    fn handle_udp_bytes(&mut self, peer: SocketAddr, bytes: &[u8]) {
        match osc::decode_message(bytes) {
            Ok(msg) => {
                let origin = self.session_id_for_ip(peer.ip());
                if let Some(id) = origin {
                    if let Some(session) = self.sessions.get_mut(&id) {
                        session.note_well_formed_frame();
                    }
                }
                if let Some(node_id) = self.tree.find(&msg.address) {
                    if let Ok(events) = self.tree.set_value_quiet(node_id, msg.value) {
                        self.fan_out(events, origin);
                    }
                }
            }
            Err(_) => {
                if let Some(id) = self.session_id_for_ip(peer.ip()) {
                    let fatal = self
                        .sessions
                        .get_mut(&id)
                        .map(|s| s.note_malformed_frame())
                        .unwrap_or(false);
                    if fatal {
                        self.close_session(id);
                    }
                }
            }
        }
    }

    /// Turn tree mutation events into outbound frames (§4.5, §5 ordering
    /// guarantees). `origin` is the session whose own write produced
    /// these events, if any — a `quiet` value change is not echoed back
    /// to it.
    fn fan_out(&mut self, events: Vec<TreeEvent>, origin: Option<SessionId>) {
        for event in events {
            match event {
                TreeEvent::NodeAdded { path, .. } | TreeEvent::NodeReplaced { path, .. } => {
                    if let Some(json) = self.tree.query(&path, None) {
                        self.broadcast_path_event("PATH_ADDED", &path, &json);
                    }
                }
                TreeEvent::NodeRemoved { path } => self.broadcast_path_removed(&path),
                TreeEvent::ValueChanged {
                    id,
                    path,
                    value,
                    quiet,
                } => self.push_value(id, &path, &value, quiet, origin),
                TreeEvent::ValueReceived { .. } => {}
            }
        }
    }

    fn broadcast_path_event(&self, command: &str, path: &str, node_json: &Json) {
        let name = path.rsplit('/').next().unwrap_or(path);
        let mut data = serde_json::Map::new();
        data.insert(name.to_string(), node_json.clone());
        let frame = serde_json::json!({"COMMAND": command, "DATA": data}).to_string();
        self.broadcast_text(frame);
    }

    fn broadcast_path_removed(&self, path: &str) {
        let frame = serde_json::json!({"COMMAND": "PATH_REMOVED", "DATA": path}).to_string();
        self.broadcast_text(frame);
    }

    fn broadcast_text(&self, frame: String) {
        for outbox in self.outboxes.values() {
            outbox.push(OutboundFrame::Text(frame.clone()));
        }
    }

    fn push_value(
        &self,
        id: NodeId,
        path: &str,
        value: &Value,
        quiet: bool,
        origin: Option<SessionId>,
    ) {
        let critical = self.tree.node(id).map(|n| n.critical).unwrap_or(false);
        for (session_id, session) in self.sessions.iter() {
            if quiet && Some(*session_id) == origin {
                continue;
            }
            if !session.subscribed_to(path) {
                continue;
            }
            match select_transport(critical, session) {
                Transport::Udp => {
                    if let Some(port) = session.return_udp_port {
                        let peer = SocketAddr::new(session.peer_ip, port);
                        let _ = self.udp_out.send((peer, path.to_string(), value.clone()));
                    }
                }
                Transport::WebSocketBinary => {
                    if let Some(outbox) = self.outboxes.get(session_id) {
                        if let Ok(bytes) = osc::encode_message(path, value) {
                            outbox.push(OutboundFrame::Binary(bytes));
                        }
                    }
                }
            }
        }
    }
}

fn path_arg(data: &Json) -> Result<&str> {
    data.as_str()
        .ok_or_else(|| Error::MalformedJson("command DATA must be a path string".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn dispatcher() -> (Dispatcher, mpsc::UnboundedReceiver<(SocketAddr, String, Value)>) {
        let (udp_tx, udp_rx) = mpsc::unbounded_channel();
        (Dispatcher::new(udp_tx), udp_rx)
    }

    fn register(d: &mut Dispatcher, ip: IpAddr) -> (SessionId, OutboxReceiver) {
        d.register_session(ip)
    }

    #[test]
    fn listen_then_value_change_pushes_over_websocket() {
        let (mut d, _udp_rx) = dispatcher();
        let (id, mut outbox) = register(&mut d, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let (node_id, _) = d.tree.find_or_create("/a");
        d.tree.node_mut(node_id).unwrap().node_type = crate::value::Type::Float;

        d.apply_command(id, "LISTEN", &Json::String("/a".to_string()))
            .unwrap();
        let events = d.tree.set_value(node_id, Value::Float(1.0)).unwrap();
        d.fan_out(events, None);

        let frame = outbox.try_recv().unwrap();
        assert!(matches!(frame, OutboundFrame::Binary(_)));
    }

    #[test]
    fn osc_streaming_session_receives_udp_push_not_websocket() {
        let (mut d, mut udp_rx) = dispatcher();
        let (id, mut outbox) = register(&mut d, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let (node_id, _) = d.tree.find_or_create("/a");
        d.tree.node_mut(node_id).unwrap().node_type = crate::value::Type::Float;

        d.apply_command(id, "LISTEN", &Json::String("/a".to_string()))
            .unwrap();
        d.apply_command(
            id,
            "START_OSC_STREAMING",
            &serde_json::json!({"LOCAL_SERVER_PORT": 44100, "LOCAL_SENDER_PORT": 0}),
        )
        .unwrap();

        let events = d.tree.set_value(node_id, Value::Float(2.0)).unwrap();
        d.fan_out(events, None);

        assert!(outbox.try_recv().is_none());
        let (peer, path, value) = udp_rx.try_recv().unwrap();
        assert_eq!(peer.port(), 44100);
        assert_eq!(path, "/a");
        assert_eq!(value, Value::Float(2.0));
    }

    #[test]
    fn critical_node_always_uses_websocket_even_with_streaming() {
        let (mut d, mut udp_rx) = dispatcher();
        let (id, mut outbox) = register(&mut d, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let (node_id, _) = d.tree.find_or_create("/a");
        d.tree.node_mut(node_id).unwrap().node_type = crate::value::Type::Float;
        d.tree.node_mut(node_id).unwrap().critical = true;

        d.apply_command(id, "LISTEN", &Json::String("/a".to_string()))
            .unwrap();
        d.apply_command(
            id,
            "START_OSC_STREAMING",
            &serde_json::json!({"LOCAL_SERVER_PORT": 44100, "LOCAL_SENDER_PORT": 0}),
        )
        .unwrap();

        let events = d.tree.set_value(node_id, Value::Float(3.0)).unwrap();
        d.fan_out(events, None);

        assert!(udp_rx.try_recv().is_err());
        assert!(matches!(outbox.try_recv(), Some(OutboundFrame::Binary(_))));
    }

    #[test]
    fn quiet_value_change_is_not_echoed_to_its_origin() {
        let (mut d, _udp_rx) = dispatcher();
        let (id, mut outbox) = register(&mut d, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let (node_id, _) = d.tree.find_or_create("/a");
        d.tree.node_mut(node_id).unwrap().node_type = crate::value::Type::Float;
        d.apply_command(id, "LISTEN", &Json::String("/a".to_string()))
            .unwrap();

        d.set_value_from_session(id, "/a", Value::Float(5.0)).unwrap();
        assert!(outbox.try_recv().is_none());
    }

    #[test]
    fn node_added_broadcasts_path_added_before_any_value_frame() {
        let (mut d, _udp_rx) = dispatcher();
        let (_id_a, mut outbox_a) = register(&mut d, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        let (_id_b, mut outbox_b) = register(&mut d, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));

        let mut node = crate::tree::Node::new_root();
        node.node_type = crate::value::Type::Float;
        node.value = Value::Float(0.0);
        let (_id, events) = d.tree.link("/new", node);
        d.fan_out(events, None);

        for outbox in [&mut outbox_a, &mut outbox_b] {
            let frame = outbox.try_recv().unwrap();
            match frame {
                OutboundFrame::Text(text) => {
                    assert!(text.contains("PATH_ADDED"));
                    assert!(text.contains("/new"));
                }
                other => panic!("expected a PATH_ADDED text frame, got {other:?}"),
            }
        }
    }

    #[test]
    fn outbox_drops_oldest_frame_once_past_capacity() {
        let (outbox, mut rx) = Outbox::channel(2);
        outbox.push(OutboundFrame::Text("a".to_string()));
        outbox.push(OutboundFrame::Text("b".to_string()));
        outbox.push(OutboundFrame::Text("c".to_string()));

        assert_eq!(rx.try_recv(), Some(OutboundFrame::Text("b".to_string())));
        assert_eq!(rx.try_recv(), Some(OutboundFrame::Text("c".to_string())));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn three_consecutive_malformed_udp_frames_close_the_session() {
        let (mut d, _udp_rx) = dispatcher();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let (id, _outbox) = register(&mut d, ip);
        let peer = SocketAddr::new(ip, 9999);

        d.handle_udp_bytes(peer, b"\xff\xfe");
        d.handle_udp_bytes(peer, b"\xff\xfe");
        assert!(d.sessions.contains_key(&id));
        d.handle_udp_bytes(peer, b"\xff\xfe");
        assert!(!d.sessions.contains_key(&id));
    }
}

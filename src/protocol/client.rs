//! Client-side dial/handshake and tree mirroring (§4.5, client role).
//!
//! Grounded on `original_source/source/oscquery/client.cpp`'s
//! `WPNQueryClient`: an HTTP round trip for `HOST_INFO` and the root
//! namespace at connect time, then a WebSocket carrying
//! `PATH_ADDED`/`PATH_REMOVED` commands and binary value frames for as
//! long as the connection lives. Service discovery resolves a
//! `zc://<name>` [`DialTarget`] the same way `m_zconf.startBrowser` does
//! — browse, then match by name.

use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Empty};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::Value as Json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::DialTarget;
use crate::discovery::{matches, DiscoveryPort};
use crate::error::{Error, Result};
use crate::osc;
use crate::protocol::host_info::HostInfo;
use crate::tree::Tree;

/// The write half of a dialed WebSocket connection, kept alive inside the
/// mirror actor so `MirrorHandle` has somewhere to send `LISTEN` and
/// `START_OSC_STREAMING` commands (§6, client-to-server direction).
type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// A client-owned mirror of a remote node's namespace. Mutation is
/// synchronous and socket-free, like [`crate::dispatch::Dispatcher`], so
/// the mirroring rules are unit-tested without a live connection.
#[derive(Default)]
pub struct Mirror {
    tree: Tree,
    host_info: Option<HostInfo>,
}

impl Mirror {
    pub fn new() -> Self {
        Mirror {
            tree: Tree::new(),
            host_info: None,
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn host_info(&self) -> Option<&HostInfo> {
        self.host_info.as_ref()
    }

    pub fn apply_host_info(&mut self, info: HostInfo) {
        self.host_info = Some(info);
    }

    /// Seed the whole mirror from a `GET /` namespace JSON response.
    pub fn apply_namespace(&mut self, json: &Json) -> Result<()> {
        self.tree.update("/", json)?;
        Ok(())
    }

    /// `{"COMMAND": "PATH_ADDED", "DATA": {name: node_json}}` (§6).
    pub fn apply_path_added(&mut self, parent_hint: &str, data: &Json) -> Result<()> {
        let obj = data
            .as_object()
            .ok_or_else(|| Error::MalformedJson("PATH_ADDED DATA must be an object".to_string()))?;
        for (name, node_json) in obj {
            let full_path = node_json
                .get("FULL_PATH")
                .and_then(Json::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| join_path(parent_hint, name));
            self.tree.update(&full_path, node_json)?;
        }
        Ok(())
    }

    /// `{"COMMAND": "PATH_REMOVED", "DATA": "<path>"}` (§6).
    pub fn apply_path_removed(&mut self, data: &Json) -> Result<()> {
        let path = data
            .as_str()
            .ok_or_else(|| Error::MalformedJson("PATH_REMOVED DATA must be a path string".to_string()))?;
        self.tree.remove(path);
        Ok(())
    }

    /// A decoded WS text frame: `{"COMMAND": ..., "DATA": ...}`.
    pub fn apply_command_frame(&mut self, frame: &Json) -> Result<()> {
        let command = frame
            .get("COMMAND")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::MalformedJson("frame missing COMMAND".to_string()))?;
        let data = frame.get("DATA").cloned().unwrap_or(Json::Null);
        match command {
            "PATH_ADDED" => self.apply_path_added("/", &data),
            "PATH_REMOVED" => self.apply_path_removed(&data),
            other => Err(Error::MalformedJson(format!("unknown command {other}"))),
        }
    }

    /// A binary WS frame or UDP datagram carrying a value push.
    pub fn apply_value_frame(&mut self, bytes: &[u8]) -> Result<()> {
        let decoded = osc::decode_message(bytes)?;
        if let Some(id) = self.tree.find(&decoded.address) {
            self.tree.set_value_quiet(id, decoded.value)?;
        }
        Ok(())
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

enum MirrorMessage {
    ApplyHostInfo(HostInfo),
    ApplyNamespace(Json),
    ApplyCommandFrame(Json),
    ApplyValueFrame(Vec<u8>),
    Snapshot(oneshot::Sender<Option<Json>>),
    HostInfoQuery(oneshot::Sender<Option<HostInfo>>),
    AttachSink(WsSink),
    SendCommand(Json, oneshot::Sender<Result<()>>),
}

/// Handle to a [`Mirror`] running on its own task, reached the same way
/// [`crate::dispatch::DispatchHandle`] reaches a `Dispatcher`.
#[derive(Clone)]
pub struct MirrorHandle {
    tx: mpsc::Sender<MirrorMessage>,
}

impl MirrorHandle {
    pub async fn apply_host_info(&self, info: HostInfo) -> Result<()> {
        self.tx
            .send(MirrorMessage::ApplyHostInfo(info))
            .await
            .map_err(|_| Error::TransportClosed)
    }

    pub async fn apply_namespace(&self, json: Json) -> Result<()> {
        self.tx
            .send(MirrorMessage::ApplyNamespace(json))
            .await
            .map_err(|_| Error::TransportClosed)
    }

    pub async fn apply_command_frame(&self, frame: Json) -> Result<()> {
        self.tx
            .send(MirrorMessage::ApplyCommandFrame(frame))
            .await
            .map_err(|_| Error::TransportClosed)
    }

    pub async fn apply_value_frame(&self, bytes: Vec<u8>) -> Result<()> {
        self.tx
            .send(MirrorMessage::ApplyValueFrame(bytes))
            .await
            .map_err(|_| Error::TransportClosed)
    }

    /// The mirrored root namespace, as it would be served by `GET /`.
    pub async fn snapshot(&self) -> Result<Option<Json>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MirrorMessage::Snapshot(reply))
            .await
            .map_err(|_| Error::TransportClosed)?;
        rx.await.map_err(|_| Error::TransportClosed)
    }

    pub async fn host_info(&self) -> Result<Option<HostInfo>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MirrorMessage::HostInfoQuery(reply))
            .await
            .map_err(|_| Error::TransportClosed)?;
        rx.await.map_err(|_| Error::TransportClosed)
    }

    async fn attach_sink(&self, sink: WsSink) -> Result<()> {
        self.tx
            .send(MirrorMessage::AttachSink(sink))
            .await
            .map_err(|_| Error::TransportClosed)
    }

    /// Send a raw `{"COMMAND": ..., "DATA": ...}` frame over the dialed
    /// WebSocket (§6). Fails with [`Error::TransportClosed`] if `dial`
    /// hasn't finished its handshake yet or the socket has since closed.
    pub async fn send_command(&self, command: &str, data: Json) -> Result<()> {
        let frame = serde_json::json!({"COMMAND": command, "DATA": data});
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MirrorMessage::SendCommand(frame, reply))
            .await
            .map_err(|_| Error::TransportClosed)?;
        rx.await.map_err(|_| Error::TransportClosed)?
    }

    pub async fn listen(&self, path: &str) -> Result<()> {
        self.send_command("LISTEN", Json::String(path.to_string())).await
    }

    pub async fn ignore(&self, path: &str) -> Result<()> {
        self.send_command("IGNORE", Json::String(path.to_string())).await
    }

    pub async fn listen_all(&self, path: &str) -> Result<()> {
        self.send_command("LISTEN_ALL", Json::String(path.to_string())).await
    }

    pub async fn ignore_all(&self, path: &str) -> Result<()> {
        self.send_command("IGNORE_ALL", Json::String(path.to_string())).await
    }

    /// Negotiate the UDP value-streaming side channel (§8 S4): `port` is
    /// the local UDP port this client is listening on for value pushes.
    pub async fn start_osc_streaming(&self, port: u16) -> Result<()> {
        self.send_command(
            "START_OSC_STREAMING",
            serde_json::json!({"LOCAL_SERVER_PORT": port}),
        )
        .await
    }
}

fn spawn_mirror() -> (MirrorHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(256);
    let join = tokio::spawn(async move {
        let mut mirror = Mirror::new();
        let mut sink: Option<WsSink> = None;
        while let Some(msg) = rx.recv().await {
            match msg {
                MirrorMessage::ApplyHostInfo(info) => mirror.apply_host_info(info),
                MirrorMessage::ApplyNamespace(json) => {
                    if let Err(err) = mirror.apply_namespace(&json) {
                        tracing::debug!(%err, "failed to apply namespace snapshot");
                    }
                }
                MirrorMessage::ApplyCommandFrame(frame) => {
                    if let Err(err) = mirror.apply_command_frame(&frame) {
                        tracing::debug!(%err, "failed to apply command frame");
                    }
                }
                MirrorMessage::ApplyValueFrame(bytes) => {
                    if let Err(err) = mirror.apply_value_frame(&bytes) {
                        tracing::debug!(%err, "failed to apply value frame");
                    }
                }
                MirrorMessage::Snapshot(reply) => {
                    let _ = reply.send(mirror.tree().query("/", None));
                }
                MirrorMessage::HostInfoQuery(reply) => {
                    let _ = reply.send(mirror.host_info().cloned());
                }
                MirrorMessage::AttachSink(new_sink) => {
                    sink = Some(new_sink);
                }
                MirrorMessage::SendCommand(frame, reply) => {
                    let result = match sink.as_mut() {
                        Some(sink) => sink
                            .send(Message::Text(frame.to_string()))
                            .await
                            .map_err(|_| Error::TransportClosed),
                        None => Err(Error::TransportClosed),
                    };
                    let _ = reply.send(result);
                }
            }
        }
    });
    (MirrorHandle { tx }, join)
}

/// Dial `target`, populate a fresh [`Mirror`] from the HTTP handshake,
/// then keep it live by reading the WebSocket for as long as the
/// connection lasts.
pub async fn dial(
    target: DialTarget,
    discovery: &dyn DiscoveryPort,
) -> Result<(MirrorHandle, tokio::task::JoinHandle<()>)> {
    let (host, port) = resolve(target, discovery).await?;
    let (handle, join) = spawn_mirror();

    let (status, body) = http_get(&host, port, "/?HOST_INFO").await?;
    if status.is_success() {
        if let Ok(info) = serde_json::from_slice::<HostInfo>(&body) {
            handle.apply_host_info(info).await?;
        }
    }

    let (status, body) = http_get(&host, port, "/").await?;
    if status.is_success() {
        if let Ok(json) = serde_json::from_slice::<Json>(&body) {
            handle.apply_namespace(json).await?;
        }
    }

    let ws_url = format!("ws://{host}:{port}/");
    let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|err| Error::HandshakeFailure(err.to_string()))?;
    let (write, mut read) = ws_stream.split();
    handle.attach_sink(write).await?;
    let reader_handle = handle.clone();
    tokio::spawn(async move {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if let Ok(frame) = serde_json::from_str::<Json>(&text) {
                        let _ = reader_handle.apply_command_frame(frame).await;
                    }
                }
                Ok(Message::Binary(bytes)) => {
                    let _ = reader_handle.apply_value_frame(bytes).await;
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    Ok((handle, join))
}

async fn resolve(target: DialTarget, discovery: &dyn DiscoveryPort) -> Result<(String, u16)> {
    match target {
        DialTarget::Direct { host, port } => Ok((host, port)),
        DialTarget::Discover { service_name } => {
            let rx = discovery.browse()?;
            tokio::task::spawn_blocking(move || loop {
                match rx.recv_timeout(Duration::from_secs(30)) {
                    Ok(service) if matches(&service, &service_name) => {
                        return Ok((service.host, service.port));
                    }
                    Ok(_) => continue,
                    Err(_) => {
                        return Err(Error::DiscoveryFailure(format!(
                            "no service named {service_name} found"
                        )))
                    }
                }
            })
            .await
            .map_err(|err| Error::DiscoveryFailure(err.to_string()))?
        }
    }
}

async fn http_get(host: &str, port: u16, path_and_query: &str) -> Result<(StatusCode, Bytes)> {
    let stream = TcpStream::connect((host, port)).await?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|err| Error::HandshakeFailure(err.to_string()))?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let request = Request::builder()
        .uri(path_and_query)
        .header("Host", host)
        .body(Empty::<Bytes>::new())
        .map_err(|err| Error::MalformedFrame(err.to_string()))?;
    let response = sender
        .send_request(request)
        .await
        .map_err(|err| Error::MalformedFrame(err.to_string()))?;
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|err| Error::MalformedFrame(err.to_string()))?
        .to_bytes();
    Ok((status, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn apply_namespace_builds_mirror_tree() {
        let mut mirror = Mirror::new();
        let json = serde_json::json!({
            "FULL_PATH": "/",
            "CONTENTS": {
                "a": {"FULL_PATH": "/a", "TYPE": "f", "VALUE": [0.5]}
            }
        });
        mirror.apply_namespace(&json).unwrap();
        let a = mirror.tree().find("/a").unwrap();
        assert_eq!(mirror.tree().node(a).unwrap().value, Value::Float(0.5));
    }

    #[test]
    fn apply_path_added_inserts_node_under_hinted_parent() {
        let mut mirror = Mirror::new();
        let data = serde_json::json!({"b": {"TYPE": "i", "VALUE": [7]}});
        mirror.apply_path_added("/a", &data).unwrap();
        let b = mirror.tree().find("/a/b").unwrap();
        assert_eq!(mirror.tree().node(b).unwrap().value, Value::Int(7));
    }

    #[test]
    fn apply_path_removed_deletes_subtree() {
        let mut mirror = Mirror::new();
        mirror
            .apply_namespace(&serde_json::json!({
                "FULL_PATH": "/",
                "CONTENTS": {"a": {"FULL_PATH": "/a", "TYPE": "f", "VALUE": [1.0]}}
            }))
            .unwrap();
        mirror
            .apply_path_removed(&Json::String("/a".to_string()))
            .unwrap();
        assert!(mirror.tree().find("/a").is_none());
    }

    #[test]
    fn apply_value_frame_updates_existing_node() {
        let mut mirror = Mirror::new();
        mirror
            .apply_namespace(&serde_json::json!({
                "FULL_PATH": "/",
                "CONTENTS": {"a": {"FULL_PATH": "/a", "TYPE": "f", "VALUE": [0.0]}}
            }))
            .unwrap();
        let bytes = osc::encode_message("/a", &Value::Float(9.5)).unwrap();
        mirror.apply_value_frame(&bytes).unwrap();
        let a = mirror.tree().find("/a").unwrap();
        assert_eq!(mirror.tree().node(a).unwrap().value, Value::Float(9.5));
    }

    #[test]
    fn apply_command_frame_dispatches_by_command_name() {
        let mut mirror = Mirror::new();
        let added = serde_json::json!({
            "COMMAND": "PATH_ADDED",
            "DATA": {"a": {"FULL_PATH": "/a", "TYPE": "f", "VALUE": [1.0]}}
        });
        mirror.apply_command_frame(&added).unwrap();
        assert!(mirror.tree().find("/a").is_some());

        let removed = serde_json::json!({"COMMAND": "PATH_REMOVED", "DATA": "/a"});
        mirror.apply_command_frame(&removed).unwrap();
        assert!(mirror.tree().find("/a").is_none());
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut mirror = Mirror::new();
        let frame = serde_json::json!({"COMMAND": "NONSENSE", "DATA": null});
        assert!(mirror.apply_command_frame(&frame).is_err());
    }

    #[tokio::test]
    async fn send_command_fails_before_a_socket_is_attached() {
        let (handle, _join) = spawn_mirror();
        let err = handle.listen("/a").await.unwrap_err();
        assert!(matches!(err, Error::TransportClosed));
    }

    #[tokio::test]
    async fn snapshot_and_host_info_survive_a_send_command_failure() {
        let (handle, _join) = spawn_mirror();
        handle
            .apply_namespace(serde_json::json!({"FULL_PATH": "/", "CONTENTS": {}}))
            .await
            .unwrap();
        assert!(handle.start_osc_streaming(9001).await.is_err());
        assert!(handle.snapshot().await.unwrap().is_some());
    }
}

//! Server-side HTTP/WebSocket front end (§4.5 "Protocol Engine").
//!
//! Grounded on the teacher's `service.rs` (`OscQueryStatic::call`,
//! `run_oscquery_service`): same accept-loop-plus-`http1::Builder`
//! shape, generalized from a single static JSON responder into the full
//! GET/WS surface, cross-checked against
//! `original_source/source/oscquery/qserver.cpp`'s
//! `onHttpRequestReceived`/`onCommand`. All tree access goes through a
//! [`crate::dispatch::DispatchHandle`] rather than touching a [`Tree`]
//! directly, per §5's "the tree is never touched outside the tree loop."

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_tungstenite::tungstenite::Message;
use hyper_tungstenite::HyperWebsocket;
use hyper_util::rt::TokioIo;
use serde_json::Value as Json;
use tokio::net::{TcpListener, TcpStream};

use crate::dispatch::{DispatchHandle, OutboundFrame};
use crate::error::{Error, Result};
use crate::osc;
use crate::protocol::host_info::HostInfo;
use crate::protocol::reply_queue::{content_type_for_path, HttpReply};
use crate::session::SessionId;

/// Recognized single-attribute query keys (§4.5: `GET /path?VALUE`,
/// `?TYPE`, `?RANGE`, ... return just that attribute instead of the
/// whole node).
const ATTRIBUTES: &[&str] = &[
    "VALUE",
    "TYPE",
    "RANGE",
    "ACCESS",
    "DESCRIPTION",
    "TAGS",
    "CRITICAL",
    "CLIPMODE",
    "EXTENDED_TYPE",
    "UNIT",
    "FULL_PATH",
    "CONTENTS",
];

/// Pulls a recognized attribute name out of a request's raw query string,
/// e.g. `"VALUE"` out of `"VALUE"` or `"VALUE&other"`.
fn attribute_from_query(query: &str) -> Option<&'static str> {
    ATTRIBUTES
        .iter()
        .copied()
        .find(|attr| query.split('&').any(|part| part == *attr))
}

/// Build the reply body for `GET /...` (§6 "Host-info JSON"/"Namespace
/// JSON"). Pure and socket-free: `query` is the request's raw query
/// string, `namespace` the tree's JSON projection of the requested path
/// (already resolved by the caller through the dispatch loop, including
/// any attribute projection named in `query`).
pub fn build_get_reply(host_info: &HostInfo, query: Option<&str>, namespace: Option<Json>) -> HttpReply {
    if query.map(|q| q.contains("HOST_INFO")).unwrap_or(false) {
        return HttpReply::json(serde_json::to_string(host_info).expect("HostInfo always serializes"));
    }
    match namespace {
        Some(json) => HttpReply::json(json.to_string()),
        None => HttpReply::not_found(),
    }
}

fn reply_to_response(reply: HttpReply) -> Response<BoxBody<Bytes, Infallible>> {
    let mut builder = Response::builder()
        .status(reply.status)
        .header("Content-Type", reply.content_type);
    if reply.close {
        builder = builder.header("Connection", "close");
    }
    builder
        .body(Full::new(Bytes::from(reply.body)).boxed())
        .expect("response builder invariants upheld above")
}

/// Accepts TCP connections and serves both the HTTP query surface and
/// the WebSocket command/binary channel over them.
pub struct NodeServer {
    dispatch: DispatchHandle,
    host_info: HostInfo,
}

impl NodeServer {
    pub fn new(dispatch: DispatchHandle, host_info: HostInfo) -> Arc<Self> {
        Arc::new(NodeServer { dispatch, host_info })
    }

    pub async fn run(self: Arc<Self>, tcp_port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", tcp_port))
            .await
            .map_err(|err| Error::from_bind(err, tcp_port))?;
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = server.serve_connection(stream, peer).await {
                    tracing::warn!(%err, %peer, "connection closed with error");
                }
            });
        }
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req| {
            let server = Arc::clone(&self);
            async move { server.handle_request(peer, req).await }
        });
        http1::Builder::new()
            .serve_connection(io, service)
            .with_upgrades()
            .await
            .map_err(|err| Error::MalformedFrame(err.to_string()))
    }

    async fn handle_request(
        self: Arc<Self>,
        peer: SocketAddr,
        mut req: Request<Incoming>,
    ) -> std::result::Result<Response<BoxBody<Bytes, Infallible>>, Infallible> {
        if hyper_tungstenite::is_upgrade_request(&req) {
            return match hyper_tungstenite::upgrade(&mut req, None) {
                Ok((response, websocket)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = server.serve_websocket(peer.ip(), websocket).await {
                            tracing::warn!(%err, %peer, "websocket session ended with error");
                        }
                    });
                    Ok(response.map(|body| body.boxed()))
                }
                Err(err) => {
                    tracing::warn!(%err, "websocket upgrade failed");
                    Ok(reply_to_response(HttpReply::bad_request("upgrade failed")))
                }
            };
        }

        let query = req.uri().query().map(str::to_string);
        let path = req.uri().path().to_string();
        if query.as_deref().map(|q| q.contains("HOST_INFO")).unwrap_or(false) {
            return Ok(reply_to_response(build_get_reply(&self.host_info, query.as_deref(), None)));
        }

        let attribute = query.as_deref().and_then(attribute_from_query);
        let node = self.dispatch.query(path, None).await.ok().flatten();

        if attribute.is_none() {
            if let Some(reply) = self.file_reply(node.as_ref()).await {
                return Ok(reply_to_response(reply));
            }
        }

        let namespace = match (attribute, node) {
            (Some(attr), Some(json)) => json.get(attr).cloned(),
            (None, json) => json,
            (Some(_), None) => None,
        };
        Ok(reply_to_response(build_get_reply(
            &self.host_info,
            query.as_deref(),
            namespace,
        )))
    }

    /// Serves a file-backed node's contents instead of its JSON
    /// projection (§4.2): a node is file-backed when `EXTENDED_TYPE` is
    /// `"file"` and `VALUE` carries a path. `None` when `node` isn't one,
    /// so the caller falls through to the ordinary JSON reply.
    async fn file_reply(&self, node: Option<&Json>) -> Option<HttpReply> {
        let node = node?;
        if node.get("EXTENDED_TYPE").and_then(Json::as_str) != Some("file") {
            return None;
        }
        let path = node.get("VALUE")?.as_array()?.first()?.as_str()?;
        Some(match tokio::fs::read(path).await {
            Ok(bytes) => HttpReply::file(bytes, content_type_for_path(path)),
            Err(err) => {
                tracing::warn!(%err, path, "failed to read file-backed node");
                HttpReply::not_found()
            }
        })
    }

    async fn serve_websocket(self: Arc<Self>, peer_ip: IpAddr, websocket: HyperWebsocket) -> Result<()> {
        let websocket = websocket
            .await
            .map_err(|err| Error::MalformedFrame(err.to_string()))?;
        let (mut sink, mut stream) = websocket.split();
        let (session_id, mut outbox) = self.dispatch.register_session(peer_ip).await?;

        loop {
            tokio::select! {
                incoming = stream.next() => {
                    let Some(incoming) = incoming else { break };
                    match incoming {
                        Ok(Message::Text(text)) => self.handle_command_text(session_id, &text).await,
                        Ok(Message::Binary(bytes)) => self.handle_binary(session_id, &bytes).await,
                        Ok(Message::Close(_)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                outgoing = outbox.recv() => {
                    match outgoing {
                        Some(OutboundFrame::Text(text)) => { let _ = sink.send(Message::Text(text)).await; }
                        Some(OutboundFrame::Binary(bytes)) => { let _ = sink.send(Message::Binary(bytes)).await; }
                        Some(OutboundFrame::Close) | None => break,
                    }
                }
            }
        }
        self.dispatch.close_session(session_id).await
    }

    async fn handle_command_text(&self, session_id: SessionId, text: &str) {
        let Ok(frame) = serde_json::from_str::<Json>(text) else {
            return;
        };
        let Some(command) = frame.get("COMMAND").and_then(Json::as_str) else {
            return;
        };
        let data = frame.get("DATA").cloned().unwrap_or(Json::Null);
        if let Err(err) = self
            .dispatch
            .command(session_id, command.to_string(), data)
            .await
        {
            tracing::debug!(%err, "websocket command rejected");
        }
    }

    async fn handle_binary(&self, session_id: SessionId, bytes: &[u8]) {
        match osc::decode_message(bytes) {
            Ok(msg) => {
                if let Err(err) = self.dispatch.set_value(session_id, msg.address, msg.value).await {
                    tracing::debug!(%err, "value push from websocket rejected");
                }
            }
            Err(err) => tracing::debug!(%err, "malformed binary OSC frame on websocket"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::host_info::Extensions;

    fn host_info() -> HostInfo {
        HostInfo {
            name: "S1".to_string(),
            osc_ip: "0.0.0.0".to_string(),
            osc_port: 9000,
            osc_transport: "UDP".to_string(),
            extensions: Extensions::all(),
        }
    }

    #[test]
    fn host_info_query_short_circuits_namespace_lookup() {
        let reply = build_get_reply(&host_info(), Some("HOST_INFO"), None);
        let body: Json = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body["NAME"], "S1");
        assert_eq!(body["OSC_PORT"], 9000);
    }

    #[test]
    fn namespace_query_returns_the_resolved_json() {
        let namespace = serde_json::json!({"FULL_PATH": "/a", "VALUE": [0.5]});
        let reply = build_get_reply(&host_info(), None, Some(namespace.clone()));
        let body: Json = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body, namespace);
    }

    #[test]
    fn missing_path_is_not_found() {
        let reply = build_get_reply(&host_info(), None, None);
        assert_eq!(reply.status, 404);
    }

    #[test]
    fn attribute_from_query_finds_a_recognized_key_among_others() {
        assert_eq!(attribute_from_query("VALUE"), Some("VALUE"));
        assert_eq!(attribute_from_query("VALUE&TYPE"), Some("VALUE"));
        assert_eq!(attribute_from_query("NONSENSE"), None);
    }
}

//! A bidirectional OSCQuery node: a typed parameter tree, an OSC 1.0
//! wire codec, and the HTTP/WebSocket/UDP protocol engine that keeps a
//! tree and its peers in sync.
//!
//! The tree lives on exactly one task — see [`dispatch`] — and every
//! other task reaches it through a [`DispatchHandle`]. [`protocol`]
//! contains both directions of the wire protocol: [`protocol::server`]
//! serves a tree to peers, [`protocol::client`] dials a peer and mirrors
//! its tree locally.

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod osc;
pub mod protocol;
pub mod session;
pub mod tree;
pub mod udp;
pub mod unit;
pub mod value;

pub use config::{Config, DialTarget};
pub use dispatch::{DispatchHandle, Dispatcher};
pub use error::{Error, Result};
pub use session::{Session, SessionId};
pub use tree::{Node, NodeId, Tree, TreeEvent};
pub use value::{Type, Value};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use discovery::{DiscoveryPort, ZeroconfDiscovery};
use protocol::{HostInfo, NodeServer};
use udp::UdpTransport;

/// A running node: the tree-owning dispatch loop plus its HTTP/WebSocket
/// and UDP transports, wired together the way the teacher's
/// `run_oscquery_service` wires a listener to its responder —
/// generalized from a single static JSON reply into the full
/// read/write/subscribe engine.
pub struct Node {
    pub dispatch: DispatchHandle,
    dispatch_join: JoinHandle<()>,
    server_join: JoinHandle<()>,
    udp_send_join: JoinHandle<()>,
    udp_recv_join: JoinHandle<()>,
}

impl Node {
    pub async fn start(config: Config) -> Result<Self> {
        let udp = Arc::new(UdpTransport::bind(config.udp_port).await?);

        let (udp_out_tx, mut udp_out_rx) = mpsc::unbounded_channel::<(SocketAddr, String, Value)>();
        let (dispatch, dispatch_join) = Dispatcher::spawn(udp_out_tx);

        let sender = Arc::clone(&udp);
        let udp_send_join = tokio::spawn(async move {
            while let Some((peer, address, value)) = udp_out_rx.recv().await {
                if let Err(err) = sender.send_value(peer, &address, &value).await {
                    tracing::warn!(%err, %peer, "failed to send UDP value push");
                }
            }
        });

        let receiver = Arc::clone(&udp);
        let udp_dispatch = dispatch.clone();
        let udp_recv_join = tokio::spawn(async move {
            loop {
                match receiver.recv_raw().await {
                    Ok((bytes, peer)) => {
                        if udp_dispatch.udp_datagram(peer, bytes).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::warn!(%err, "UDP receive failed"),
                }
            }
        });

        let host_info = HostInfo {
            name: config.name.clone(),
            osc_ip: "0.0.0.0".to_string(),
            osc_port: config.udp_port,
            osc_transport: "UDP".to_string(),
            extensions: config.extensions,
        };
        let server = NodeServer::new(dispatch.clone(), host_info);
        let tcp_port = config.tcp_port;
        let server_join = tokio::spawn(async move {
            if let Err(err) = server.run(tcp_port).await {
                tracing::error!(%err, "HTTP/WebSocket server stopped");
            }
        });

        if config.discovery {
            ZeroconfDiscovery.publish(&config.name, config.tcp_port)?;
        }

        Ok(Node {
            dispatch,
            dispatch_join,
            server_join,
            udp_send_join,
            udp_recv_join,
        })
    }

    /// Waits for whichever background task ends first — normally only
    /// on shutdown or an unrecoverable bind/accept error.
    pub async fn join(self) {
        tokio::select! {
            _ = self.dispatch_join => {}
            _ = self.server_join => {}
            _ = self.udp_send_join => {}
            _ = self.udp_recv_join => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn node_starts_and_serves_the_root_namespace() {
        let config = Config::new()
            .with_tcp_port(0)
            .with_udp_port(0)
            .without_discovery();
        let node = Node::start(config).await.unwrap();
        let snapshot = node.dispatch.query("/".to_string(), None).await.unwrap();
        assert_eq!(snapshot.unwrap()["FULL_PATH"], "/");
    }
}

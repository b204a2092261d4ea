//! The single shared outbound UDP socket (§5 "Shared resources": "The UDP
//! socket is a single shared resource owned by the loop, used for all
//! outgoing value datagrams").
//!
//! The teacher never opens a UDP socket at all (`rosc` only supplies wire
//! types); this wraps `tokio::net::UdpSocket` the way `src/osc.rs` wraps
//! `rosc`'s codec, so the dispatch loop has one call site for "send this
//! encoded value to this peer."

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::osc;
use crate::value::Value;

/// Owns the bound UDP socket used for both inbound value frames from
/// peers and outbound value pushes to subscribers.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|err| Error::from_bind(err, port))?;
        Ok(UdpTransport { socket })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Encode `(address, value)` and send it to `peer`.
    pub async fn send_value(&self, peer: SocketAddr, address: &str, value: &Value) -> Result<()> {
        let bytes = osc::encode_message(address, value)?;
        self.socket.send_to(&bytes, peer).await?;
        Ok(())
    }

    /// Receive one datagram, decoding it as an OSC message.
    pub async fn recv_message(&self) -> Result<(osc::DecodedMessage, SocketAddr)> {
        let (bytes, peer) = self.recv_raw().await?;
        let decoded = osc::decode_message(&bytes)
            .map_err(|_| Error::MalformedFrame(format!("bad UDP datagram from {peer}")))?;
        Ok((decoded, peer))
    }

    /// Receive one datagram without decoding it, for callers (the
    /// dispatch loop) that need to apply their own malformed-frame
    /// bookkeeping instead of failing the read outright.
    pub async fn recv_raw(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = [0u8; 65536];
        let (len, peer) = self.socket.recv_from(&mut buf).await?;
        Ok((buf[..len].to_vec(), peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_value_over_loopback() {
        let server = UdpTransport::bind(0).await.unwrap();
        let client = UdpTransport::bind(0).await.unwrap();
        let server_addr: SocketAddr = ([127, 0, 0, 1], server.local_port().unwrap()).into();

        client
            .send_value(server_addr, "/a/b", &Value::Float(1.5))
            .await
            .unwrap();

        let (decoded, _) = server.recv_message().await.unwrap();
        assert_eq!(decoded.address, "/a/b");
        assert_eq!(decoded.value, Value::Float(1.5));
    }
}

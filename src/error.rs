//! Unified error currency for the crate.
//!
//! The teacher (`oscq_rs`) propagates `rosc::OscError` / `hyper::Error` ad
//! hoc at each call site. A node that owns a tree, a session table and
//! three transports needs one error type that crosses those boundaries;
//! this mirrors the error-kind list in the design document almost exactly.

use crate::value::Type;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport closed")]
    TransportClosed,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("malformed OSC message: {0}")]
    MalformedOsc(String),

    #[error("OSC string argument was not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed JSON command: {0}")]
    MalformedJson(String),

    #[error("no node at address {0:?}")]
    UnknownAddress(String),

    #[error("cannot coerce value of type {from:?} into {to:?}")]
    TypeMismatch { from: Type, to: Type },

    #[error("WebSocket handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("service discovery failed: {0}")]
    DiscoveryFailure(String),

    #[error("port already in use: {0}")]
    PortInUse(std::net::SocketAddr),

    #[error("outbound queue overflowed, dropping oldest frame")]
    Overflow,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wraps a `rosc` codec error as our own `MalformedOsc` kind, so the
    /// rest of the crate never has to match on `rosc::OscError` directly.
    pub(crate) fn from_osc(err: rosc::OscError) -> Self {
        Error::MalformedOsc(err.to_string())
    }

    /// Distinguishes a fatal port-in-use bind failure from any other I/O
    /// error, so process startup can tell the two apart (§7: "`PortInUse`
    /// is fatal to the process startup").
    pub(crate) fn from_bind(err: std::io::Error, port: u16) -> Self {
        if err.kind() == std::io::ErrorKind::AddrInUse {
            Error::PortInUse(std::net::SocketAddr::from(([0, 0, 0, 0], port)))
        } else {
            Error::Io(err)
        }
    }
}

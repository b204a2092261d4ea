//! The protocol engine (§4.5): HTTP/WebSocket server surface, the
//! client-side dial/mirror, reply framing, and the `HOST_INFO` payload
//! shared by both directions.

pub mod client;
pub mod host_info;
pub mod reply_queue;
pub mod server;

pub use client::{dial, Mirror, MirrorHandle};
pub use host_info::{Extensions, HostInfo};
pub use reply_queue::HttpReply;
pub use server::{build_get_reply, NodeServer};

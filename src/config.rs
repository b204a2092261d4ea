//! Node configuration (§6 "Configuration").
//!
//! Grounded on the teacher's `OscHostInfo::with_ext_*` builder chain in
//! `oscquery_types.rs`; generalized from "turn individual host-info
//! extension bits on" to the node's full startup configuration.

use crate::protocol::host_info::Extensions;

pub const DEFAULT_TCP_PORT: u16 = 5678;
pub const DEFAULT_UDP_PORT: u16 = 1234;
pub const DEFAULT_NAME: &str = "wpn114";

/// Startup configuration for a node acting as server, client, or both.
#[derive(Debug, Clone)]
pub struct Config {
    pub tcp_port: u16,
    pub udp_port: u16,
    pub name: String,
    pub extensions: Extensions,
    pub discovery: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            name: DEFAULT_NAME.to_string(),
            extensions: Extensions::all(),
            discovery: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    pub fn with_udp_port(mut self, port: u16) -> Self {
        self.udp_port = port;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn without_discovery(mut self) -> Self {
        self.discovery = false;
        self
    }
}

/// A client dial target: either a literal host/port or a `zc://<name>`
/// URI asking the client to resolve `name` through service discovery
/// first (§6 "Configuration").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    Direct { host: String, port: u16 },
    Discover { service_name: String },
}

impl DialTarget {
    /// Parse a configured dial string: `zc://<name>` for discovery, or
    /// `host:port` for a direct TCP target.
    pub fn parse(uri: &str) -> Option<DialTarget> {
        if let Some(name) = uri.strip_prefix("zc://") {
            if name.is_empty() {
                return None;
            }
            return Some(DialTarget::Discover {
                service_name: name.to_string(),
            });
        }
        let (host, port) = uri.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        Some(DialTarget::Direct {
            host: host.to_string(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_configured_values() {
        let config = Config::new();
        assert_eq!(config.tcp_port, 5678);
        assert_eq!(config.udp_port, 1234);
        assert_eq!(config.name, "wpn114");
        assert!(config.discovery);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::new()
            .with_tcp_port(9000)
            .with_udp_port(9001)
            .with_name("S1")
            .without_discovery();
        assert_eq!(config.tcp_port, 9000);
        assert_eq!(config.udp_port, 9001);
        assert_eq!(config.name, "S1");
        assert!(!config.discovery);
    }

    #[test]
    fn parses_discovery_uri() {
        assert_eq!(
            DialTarget::parse("zc://S1"),
            Some(DialTarget::Discover {
                service_name: "S1".to_string()
            })
        );
        assert_eq!(DialTarget::parse("zc://"), None);
    }

    #[test]
    fn parses_direct_host_port() {
        assert_eq!(
            DialTarget::parse("192.168.1.5:5678"),
            Some(DialTarget::Direct {
                host: "192.168.1.5".to_string(),
                port: 5678
            })
        );
        assert_eq!(DialTarget::parse("not-a-target"), None);
    }
}

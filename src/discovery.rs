//! `_oscjson._tcp` service discovery (§6 "Service discovery").
//!
//! The teacher declares `zeroconf` in `Cargo.toml` but never calls it.
//! Grounded on `original_source/source/server.cpp`'s
//! `m_zeroconf.startServicePublish(name, "_oscjson._tcp", "local",
//! tcp_port)` and `original_source/source/oscquery/client.cpp`'s
//! `m_zconf.startBrowser("_oscjson._tcp")` / `serviceAdded` matching by
//! name. `zeroconf`'s event loop is a blocking `poll()` loop, so each
//! side of [`DiscoveryPort`] runs on its own dedicated thread and hands
//! results back over a channel.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use zeroconf::prelude::*;
use zeroconf::{MdnsBrowser, MdnsService, ServiceType};

use crate::error::{Error, Result};

const SERVICE_TYPE: &str = "oscjson";
const PROTOCOL: &str = "tcp";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One `_oscjson._tcp` peer found while browsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// Whether a discovered service is the one a client configured itself to
/// find, matching `original_source`'s "match by name" rule.
pub fn matches(discovered: &DiscoveredService, configured_name: &str) -> bool {
    discovered.name == configured_name
}

/// Seam between the protocol engine and the OS's mDNS stack, so the
/// dispatcher can be tested without touching the network.
pub trait DiscoveryPort: Send + Sync {
    /// Advertise `_oscjson._tcp` under `name` on `tcp_port`. Returns once
    /// registration has been handed off; registration itself happens on
    /// a background thread and keeps running until the process exits.
    fn publish(&self, name: &str, tcp_port: u16) -> Result<()>;

    /// Start browsing for `_oscjson._tcp` peers. Returns a receiver that
    /// yields one [`DiscoveredService`] per announcement for as long as
    /// the background browser thread runs.
    fn browse(&self) -> Result<mpsc::Receiver<DiscoveredService>>;
}

/// Real mDNS-backed [`DiscoveryPort`].
#[derive(Debug, Default)]
pub struct ZeroconfDiscovery;

impl DiscoveryPort for ZeroconfDiscovery {
    fn publish(&self, name: &str, tcp_port: u16) -> Result<()> {
        let name = name.to_string();
        thread::Builder::new()
            .name("oscquery-discovery-publish".to_string())
            .spawn(move || {
                let service_type = match ServiceType::new(SERVICE_TYPE, PROTOCOL) {
                    Ok(t) => t,
                    Err(err) => {
                        tracing::error!(%err, "invalid discovery service type");
                        return;
                    }
                };
                let mut service = MdnsService::new(service_type, tcp_port);
                service.set_name(&name);
                service.set_registered_callback(Box::new(|result, _| match result {
                    Ok(registration) => {
                        tracing::info!(?registration, "oscjson service published")
                    }
                    Err(err) => tracing::error!(%err, "oscjson service registration failed"),
                }));

                let event_loop = match service.register() {
                    Ok(loop_) => loop_,
                    Err(err) => {
                        tracing::error!(%err, "oscjson service registration failed");
                        return;
                    }
                };
                loop {
                    if let Err(err) = event_loop.poll(POLL_INTERVAL) {
                        tracing::error!(%err, "discovery publish loop stopped");
                        break;
                    }
                }
            })
            .map_err(Error::Io)?;
        Ok(())
    }

    fn browse(&self) -> Result<mpsc::Receiver<DiscoveredService>> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("oscquery-discovery-browse".to_string())
            .spawn(move || {
                let service_type = match ServiceType::new(SERVICE_TYPE, PROTOCOL) {
                    Ok(t) => t,
                    Err(err) => {
                        tracing::error!(%err, "invalid discovery service type");
                        return;
                    }
                };
                let mut browser = MdnsBrowser::new(service_type);
                browser.set_context(Box::new(tx));
                browser.set_service_discovered_callback(Box::new(|result, context| {
                    let discovered = match result {
                        Ok(service) => service,
                        Err(err) => {
                            tracing::error!(%err, "discovery browse callback error");
                            return;
                        }
                    };
                    let tx = context
                        .as_ref()
                        .and_then(|ctx| ctx.downcast_ref::<mpsc::Sender<DiscoveredService>>());
                    if let Some(tx) = tx {
                        let _ = tx.send(DiscoveredService {
                            name: discovered.name().clone(),
                            host: discovered.host_name().clone(),
                            port: *discovered.port(),
                        });
                    }
                }));

                let event_loop = match browser.browse_services() {
                    Ok(loop_) => loop_,
                    Err(err) => {
                        tracing::error!(%err, "discovery browse failed to start");
                        return;
                    }
                };
                loop {
                    if let Err(err) = event_loop.poll(POLL_INTERVAL) {
                        tracing::error!(%err, "discovery browse loop stopped");
                        break;
                    }
                }
            })
            .map_err(Error::Io)?;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_compares_by_name_only() {
        let svc = DiscoveredService {
            name: "S1".to_string(),
            host: "192.168.1.2".to_string(),
            port: 5678,
        };
        assert!(matches(&svc, "S1"));
        assert!(!matches(&svc, "S2"));
    }
}

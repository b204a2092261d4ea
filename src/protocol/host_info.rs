//! `GET /?HOST_INFO` reply body (§6 "Host-info JSON").
//!
//! Grounded on the teacher's `OscHostInfo`/`OscHostInfoExtension` and its
//! `with_ext_*` builder chain, extended with the extension flags
//! `spec.md` §6 lists that the teacher's `OscHostInfoExtension` omits:
//! `PATH_REMOVED`, `PATH_ADDED`, `PATH_RENAMED`, `OSC_STREAMING`, `HTML`,
//! `ECHO`.

use serde::{Deserialize, Serialize};

/// The full extension-support map advertised in `HOST_INFO`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extensions {
    #[serde(rename = "ACCESS")]
    pub access: bool,
    #[serde(rename = "VALUE")]
    pub value: bool,
    #[serde(rename = "RANGE")]
    pub range: bool,
    #[serde(rename = "DESCRIPTION")]
    pub description: bool,
    #[serde(rename = "TAGS")]
    pub tags: bool,
    #[serde(rename = "EXTENDED_TYPE")]
    pub extended_type: bool,
    #[serde(rename = "UNIT")]
    pub unit: bool,
    #[serde(rename = "CRITICAL")]
    pub critical: bool,
    #[serde(rename = "CLIPMODE")]
    pub clipmode: bool,
    #[serde(rename = "LISTEN")]
    pub listen: bool,
    #[serde(rename = "PATH_CHANGED")]
    pub path_changed: bool,
    #[serde(rename = "PATH_REMOVED")]
    pub path_removed: bool,
    #[serde(rename = "PATH_ADDED")]
    pub path_added: bool,
    #[serde(rename = "PATH_RENAMED")]
    pub path_renamed: bool,
    #[serde(rename = "OSC_STREAMING")]
    pub osc_streaming: bool,
    #[serde(rename = "HTML")]
    pub html: bool,
    #[serde(rename = "ECHO")]
    pub echo: bool,
}

/// Every extension this node supports, on by default: the engine
/// implements all of §4.2–§4.5 unconditionally, so there is nothing a
/// caller would turn off short of lying to peers about capability.
impl Extensions {
    pub fn all() -> Self {
        Extensions {
            access: true,
            value: true,
            range: true,
            description: true,
            tags: true,
            extended_type: true,
            unit: true,
            critical: true,
            clipmode: true,
            listen: true,
            path_changed: true,
            path_removed: true,
            path_added: true,
            path_renamed: true,
            osc_streaming: true,
            html: false,
            echo: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "OSC_IP")]
    pub osc_ip: String,
    #[serde(rename = "OSC_PORT")]
    pub osc_port: u16,
    #[serde(rename = "OSC_TRANSPORT")]
    pub osc_transport: String,
    #[serde(rename = "EXTENSIONS")]
    pub extensions: Extensions,
}

impl HostInfo {
    pub fn new(name: String, osc_ip: String, osc_port: u16) -> Self {
        HostInfo {
            name,
            osc_ip,
            osc_port,
            osc_transport: "UDP".to_string(),
            extensions: Extensions::all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_sample_vector_fields() {
        let info = HostInfo::new("S1".to_string(), "0.0.0.0".to_string(), 9000);
        assert_eq!(info.name, "S1");
        assert_eq!(info.osc_port, 9000);
        assert_eq!(info.osc_transport, "UDP");
        assert!(info.extensions.value);
        assert!(info.extensions.critical);
        assert!(info.extensions.path_added);
        assert!(info.extensions.path_removed);
        assert!(info.extensions.listen);
        assert!(info.extensions.osc_streaming);
    }

    #[test]
    fn round_trips_through_json() {
        let info = HostInfo::new("node".to_string(), "127.0.0.1".to_string(), 1234);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["NAME"], "node");
        assert_eq!(json["OSC_PORT"], 1234);
        let back: HostInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back.osc_port, 1234);
    }
}

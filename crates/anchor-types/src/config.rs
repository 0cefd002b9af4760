//! Node-level configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_chaindata_path() -> String {
    "chaindata".to_string()
}

/// The per-node configuration record (loaded from a TOML file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Base58 public key of this anchor.
    #[serde(rename = "PUBLIC_KEY")]
    pub public_key: String,
    /// Base64 secret key. Never persisted by the core.
    #[serde(rename = "PRIVATE_KEY")]
    pub private_key: String,
    /// Free-form strings copied into every generated block's extra data.
    #[serde(rename = "EXTRA_DATA_TO_BLOCK", default)]
    pub extra_data_to_block: BTreeMap<String, String>,
    /// HTTP bind interface.
    #[serde(rename = "INTERFACE")]
    pub interface: String,
    /// HTTP bind port.
    #[serde(rename = "PORT")]
    pub port: u16,
    /// Websocket bind interface.
    #[serde(rename = "WEBSOCKET_INTERFACE")]
    pub websocket_interface: String,
    /// Websocket bind port.
    #[serde(rename = "WEBSOCKET_PORT")]
    pub websocket_port: u16,
    /// Websocket URL of the downstream Point of Distribution, if any.
    #[serde(rename = "POINT_OF_DISTRIBUTION_WS", default)]
    pub point_of_distribution_ws: Option<String>,
    /// Directory holding one store per persistent namespace.
    #[serde(rename = "CHAINDATA_PATH", default = "default_chaindata_path")]
    pub chaindata_path: String,
}

impl NodeConfig {
    /// `interface:port` for the HTTP listener.
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.interface, self.port)
    }

    /// `interface:port` for the websocket listener.
    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.websocket_interface, self.websocket_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: NodeConfig = serde_json::from_str(
            r#"{
                "PUBLIC_KEY": "pk",
                "PRIVATE_KEY": "sk",
                "INTERFACE": "0.0.0.0",
                "PORT": 7332,
                "WEBSOCKET_INTERFACE": "0.0.0.0",
                "WEBSOCKET_PORT": 9999
            }"#,
        )
        .unwrap();
        assert!(config.extra_data_to_block.is_empty());
        assert!(config.point_of_distribution_ws.is_none());
        assert_eq!(config.chaindata_path, "chaindata");
        assert_eq!(config.http_addr(), "0.0.0.0:7332");
        assert_eq!(config.ws_addr(), "0.0.0.0:9999");
    }
}

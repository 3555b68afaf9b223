use flint::secret::SecretKey;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PORT: u16 = 40100;

#[derive(Serialize, Deserialize)]
pub struct Server {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Key for encrypting outbound payloads; pushes go out in the clear when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<SecretKey>,
    pub weight: u32,
}

#[derive(Serialize, Deserialize)]
pub struct Rpc {
    pub timeout_ms: u64,
    pub heartbeat_secs: u64,
}

#[derive(Serialize, Deserialize)]
pub struct GatewayConfig {
    pub server: Server,
    pub rpc: Rpc,
}

impl Default for GatewayConfig {
    fn default() -> GatewayConfig {
        GatewayConfig {
            server: Server {
                address: Some(format!("0.0.0.0:{}", DEFAULT_PORT)),
                encryption_key: None,
                weight: 1,
            },
            rpc: Rpc {
                timeout_ms: 3000,
                heartbeat_secs: 10,
            },
        }
    }
}

impl GatewayConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> GatewayConfig {
        serdeconv::from_toml_file(path).expect("Error loading gateway configuration file")
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) {
        serdeconv::to_toml_file(self, path).expect("Error writing gateway configuration file")
    }
}

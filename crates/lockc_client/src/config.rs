use lockc_proto::Endpoint;
use serde::{Deserialize, Serialize};

/// Default host the callback listener binds on. Loopback suits single-host
/// deployments; multi-host setups must supply an address the server can
/// reach.
pub const DEFAULT_CALLBACK_HOST: &str = "127.0.0.1";

/// Default port the lock server listens on.
pub const DEFAULT_SERVER_PORT: u16 = 4117;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Where the lock server lives.
    pub server_endpoint: Endpoint,
    /// Host to bind the callback listener on; the port is OS-assigned.
    #[serde(default = "default_callback_host")]
    pub callback_host: String,
}

impl ClientConfig {
    pub fn new(server_endpoint: Endpoint) -> Self {
        ClientConfig {
            server_endpoint,
            callback_host: DEFAULT_CALLBACK_HOST.to_owned(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::new(Endpoint::localhost(DEFAULT_SERVER_PORT))
    }
}

fn default_callback_host() -> String {
    DEFAULT_CALLBACK_HOST.to_owned()
}

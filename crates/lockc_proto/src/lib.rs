//! Wire protocol shared by the lock server and its caching clients.
//!
//! Clients call the server on [`ACQUIRE_PATH`] and [`RELEASE_PATH`]; the
//! server reaches back to the client's callback endpoint on [`REVOKE_PATH`]
//! and [`RETRY_PATH`]. Every body is JSON and every reply carries a
//! [`Status`].

use std::fmt::{self, Display};
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

mod endpoint;

pub use endpoint::Endpoint;

/// Client -> server: request ownership of a lock.
pub const ACQUIRE_PATH: &str = "/acquire";
/// Client -> server: return a lock to the server.
pub const RELEASE_PATH: &str = "/release";
/// Server -> client: demand a cached lock back.
pub const REVOKE_PATH: &str = "/revoke";
/// Server -> client: a previously refused acquire may now succeed.
pub const RETRY_PATH: &str = "/retry";

/// Identifier of a lock, chosen by the caller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LockId(pub u64);

impl From<u64> for LockId {
    fn from(raw: u64) -> Self {
        LockId(raw)
    }
}

impl Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Identity of a client as seen by the server: `<host>:<callback-port>`,
/// the address the server uses for revoke and retry callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(host: &str, port: u16) -> Self {
        ClientId(format!("{host}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for ClientId {
    fn from(addr: SocketAddr) -> Self {
        ClientId::new(&addr.ip().to_string(), addr.port())
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reply status shared by every operation.
///
/// `Retry` from an acquire means "not now; expect a retry callback later".
/// From a handler it reports a request that referenced an unknown lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireRequest {
    pub lid: LockId,
    pub client_id: ClientId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub lid: LockId,
    pub client_id: ClientId,
}

/// Body of both server-initiated callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub lid: LockId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: Status,
}

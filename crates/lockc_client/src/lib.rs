//! Caching client for the lockc distributed lock service.
//!
//! Locks live on a central server, but ownership is cached here: releasing
//! a lock keeps it local (`Free`), so the next acquire by any thread in
//! this process skips the server round-trip. When another client wants the
//! lock, the server revokes it and the cache hands it back once the current
//! use finishes.
//!
//! ```no_run
//! use lockc_client::{ClientConfig, Endpoint, LockClient, LockId};
//!
//! # fn main() -> lockc_client::Result<()> {
//! let client = LockClient::connect(ClientConfig::new(Endpoint::localhost(4117)), None)?;
//! client.acquire(LockId(1))?;
//! // lock-protected work
//! client.release(LockId(1))?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use log::debug;

pub mod cache;
mod callback;
pub mod config;
mod error;
mod retry;
pub mod transport;

pub use cache::{LockCache, LockState, ReleaseUser};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use lockc_proto::{ClientId, Endpoint, LockId, Status};
pub use transport::{HttpTransport, Op, Transport, TransportError};

use callback::{CallbackListener, CallbackServer};

/// A connected client: the lock cache wired to an HTTP transport and a
/// running callback endpoint. The callback server shuts down when the
/// client is dropped.
pub struct LockClient {
    cache: Arc<LockCache>,
    callbacks: CallbackServer,
}

impl LockClient {
    /// Binds the callback endpoint, derives the client identity from the
    /// bound address, and wires the cache to the server at
    /// `config.server_endpoint`.
    pub fn connect(
        config: ClientConfig,
        release_user: Option<Arc<dyn ReleaseUser>>,
    ) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.server_endpoint.clone())?);
        let listener = CallbackListener::bind(&config.callback_host)?;
        let id = ClientId::from(listener.addr());
        debug!("lock client {id} connecting to {}", config.server_endpoint);
        let cache = Arc::new(LockCache::new(id, transport, release_user));
        let callbacks = listener.serve(cache.clone())?;
        Ok(LockClient { cache, callbacks })
    }

    /// Blocks until the calling thread holds `lid`.
    pub fn acquire(&self, lid: LockId) -> Result<()> {
        self.cache.acquire(lid)
    }

    /// Releases `lid`; the lock stays cached unless the server has revoked
    /// it.
    pub fn release(&self, lid: LockId) -> Result<()> {
        self.cache.release(lid)
    }

    /// This client's identity as registered with the server.
    pub fn client_id(&self) -> &ClientId {
        self.cache.client_id()
    }

    /// Address the server can deliver revoke and retry callbacks to.
    pub fn callback_addr(&self) -> SocketAddr {
        self.callbacks.addr()
    }

    /// Cached state of `lid`, for diagnostics.
    pub fn lock_state(&self, lid: LockId) -> Option<LockState> {
        self.cache.state(lid)
    }
}

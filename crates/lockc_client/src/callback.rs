//! The client's callback endpoint: a small HTTP server the lock server
//! calls back on to revoke cached locks and to green-light refused
//! acquires. The bound address doubles as the client's identity.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use lockc_proto::{CallbackRequest, Status, StatusReply, RETRY_PATH, REVOKE_PATH};
use log::{debug, error};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::cache::LockCache;
use crate::error::Result;

#[derive(Clone)]
struct CallbackState {
    cache: Arc<LockCache>,
}

/// A listener bound on an OS-assigned ephemeral port, not yet serving.
/// Binding is split from serving because the cache needs the bound address
/// (it becomes the client id) before it can be constructed.
pub(crate) struct CallbackListener {
    runtime: Runtime,
    listener: TcpListener,
    addr: SocketAddr,
}

impl CallbackListener {
    pub(crate) fn bind(host: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let listener = runtime.block_on(TcpListener::bind((host, 0)))?;
        let addr = listener.local_addr()?;
        debug!("callback listener bound on {addr}");
        Ok(CallbackListener {
            runtime,
            listener,
            addr,
        })
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Starts serving callbacks into `cache` from a dedicated thread.
    pub(crate) fn serve(self, cache: Arc<LockCache>) -> Result<CallbackServer> {
        let CallbackListener {
            runtime,
            listener,
            addr,
        } = self;
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let app = router(cache);
        let handle = thread::Builder::new()
            .name("lockc-callbacks".to_owned())
            .spawn(move || {
                runtime.block_on(async move {
                    let serve = axum::serve(listener, app).with_graceful_shutdown(
                        async move { shutdown.cancelled().await },
                    );
                    if let Err(e) = serve.await {
                        error!("callback server terminated: {e}");
                    }
                });
            })?;
        Ok(CallbackServer {
            addr,
            cancel,
            handle: Some(handle),
        })
    }
}

/// Handle to the running callback server; shuts down on drop.
pub(crate) struct CallbackServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CallbackServer {
    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn router(cache: Arc<LockCache>) -> Router {
    Router::new()
        .route(REVOKE_PATH, post(revoke))
        .route(RETRY_PATH, post(retry))
        .route("/health", get(http::StatusCode::OK))
        .with_state(CallbackState { cache })
}

// Revoking a Free lock performs a blocking remote release, so the handlers
// hop off the async runtime.

async fn revoke(
    State(state): State<CallbackState>,
    Json(req): Json<CallbackRequest>,
) -> Json<StatusReply> {
    let status = tokio::task::spawn_blocking(move || state.cache.revoke(req.lid))
        .await
        .unwrap_or(Status::Retry);
    Json(StatusReply { status })
}

async fn retry(
    State(state): State<CallbackState>,
    Json(req): Json<CallbackRequest>,
) -> Json<StatusReply> {
    let status = tokio::task::spawn_blocking(move || state.cache.retry(req.lid))
        .await
        .unwrap_or(Status::Retry);
    Json(StatusReply { status })
}

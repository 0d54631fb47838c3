//! In-process lock server used as the oracle in client tests.
//!
//! Implements the server side of the lock protocol: one holder per lock, a
//! FIFO queue of refused acquirers, a revoke to the holder when contention
//! appears, and a retry to the queue head when the lock comes back.
//! Callbacks are delivered from a dispatcher thread through [`CallbackSink`]
//! registrations, never while the server's own state is locked, mirroring
//! the wire's asynchrony without HTTP.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use lockc_client::transport::{Op, Transport, TransportError};
use lockc_proto::{ClientId, LockId, Status};
use log::{debug, warn};
use parking_lot::Mutex;

/// Receiver of server-initiated callbacks; tests implement this by
/// forwarding into a client's revoke and retry entry points.
pub trait CallbackSink: Send + Sync {
    fn revoke(&self, lid: LockId);
    fn retry(&self, lid: LockId);
}

enum Callback {
    Revoke { to: ClientId, lid: LockId },
    Retry { to: ClientId, lid: LockId },
}

#[derive(Default)]
struct ServerLock {
    holder: Option<ClientId>,
    waiters: VecDeque<ClientId>,
    /// A revoke has been sent to the current holder and not yet answered
    /// by a release.
    revoked: bool,
}

pub struct MockLockServer {
    locks: Mutex<HashMap<LockId, ServerLock>>,
    sinks: Mutex<HashMap<ClientId, Arc<dyn CallbackSink>>>,
    outbox: Mutex<Option<Sender<Callback>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl MockLockServer {
    pub fn spawn() -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Callback>();
        let server = Arc::new(MockLockServer {
            locks: Mutex::new(HashMap::new()),
            sinks: Mutex::new(HashMap::new()),
            outbox: Mutex::new(Some(tx)),
            dispatcher: Mutex::new(None),
        });

        // the dispatcher holds a weak handle so dropping the last external
        // Arc closes the outbox and lets the thread drain out
        let dispatcher = {
            let server: Weak<MockLockServer> = Arc::downgrade(&server);
            thread::Builder::new()
                .name("lockc-mock-dispatch".to_owned())
                .spawn(move || {
                    while let Ok(callback) = rx.recv() {
                        let Some(server) = server.upgrade() else { break };
                        server.deliver(callback);
                    }
                })
                .expect("failed to spawn dispatcher thread")
        };
        *server.dispatcher.lock() = Some(dispatcher);
        server
    }

    pub fn register(&self, id: ClientId, sink: Arc<dyn CallbackSink>) {
        self.sinks.lock().insert(id, sink);
    }

    /// Stops callback delivery and joins the dispatcher. Further grants
    /// still work; revokes and retries are dropped.
    pub fn shutdown(&self) {
        self.outbox.lock().take();
        if let Some(handle) = self.dispatcher.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn acquire(&self, lid: LockId, client: ClientId) -> Status {
        let mut locks = self.locks.lock();
        let entry = locks.entry(lid).or_default();
        match &entry.holder {
            None => {
                debug!("mock server: lock {lid} granted to {client}");
                entry.holder = Some(client);
                entry.revoked = false;
                Status::Ok
            }
            Some(holder) if *holder == client => {
                // a caching client only re-acquires after handing back, but
                // be lenient about it
                warn!("mock server: {client} re-acquired held lock {lid}");
                Status::Ok
            }
            Some(holder) => {
                debug!("mock server: lock {lid} busy, queueing {client}");
                if !entry.waiters.contains(&client) {
                    entry.waiters.push_back(client);
                }
                if !entry.revoked {
                    entry.revoked = true;
                    self.send(Callback::Revoke {
                        to: holder.clone(),
                        lid,
                    });
                }
                Status::Retry
            }
        }
    }

    pub fn release(&self, lid: LockId, client: &ClientId) -> Status {
        let mut locks = self.locks.lock();
        let Some(entry) = locks.get_mut(&lid) else {
            warn!("mock server: release of unknown lock {lid} by {client}");
            return Status::Retry;
        };
        if entry.holder.as_ref() != Some(client) {
            warn!("mock server: {client} released lock {lid} it does not hold");
            return Status::Retry;
        }
        debug!("mock server: lock {lid} returned by {client}");
        entry.holder = None;
        entry.revoked = false;
        if let Some(next) = entry.waiters.pop_front() {
            self.send(Callback::Retry { to: next, lid });
        }
        Status::Ok
    }

    /// Holder of `lid` as the server sees it.
    pub fn holder(&self, lid: LockId) -> Option<ClientId> {
        self.locks.lock().get(&lid).and_then(|entry| entry.holder.clone())
    }

    fn send(&self, callback: Callback) {
        if let Some(tx) = self.outbox.lock().as_ref() {
            // unbounded channel; never blocks while state is locked
            let _ = tx.send(callback);
        }
    }

    fn deliver(&self, callback: Callback) {
        let (to, lid, is_revoke) = match &callback {
            Callback::Revoke { to, lid } => (to, *lid, true),
            Callback::Retry { to, lid } => (to, *lid, false),
        };
        let sink = self.sinks.lock().get(to).cloned();
        let Some(sink) = sink else {
            warn!("mock server: no callback sink registered for {to}");
            return;
        };
        if is_revoke {
            sink.revoke(lid);
        } else {
            sink.retry(lid);
        }
    }
}

impl Drop for MockLockServer {
    fn drop(&mut self) {
        self.outbox.lock().take();
        if let Some(handle) = self.dispatcher.lock().take() {
            // the last Arc can die inside the dispatcher itself, right after
            // an upgrade; a thread cannot join itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Adapter exposing the mock server through the client's transport seam.
pub struct MockTransport {
    server: Arc<MockLockServer>,
}

impl MockTransport {
    pub fn new(server: Arc<MockLockServer>) -> Self {
        MockTransport { server }
    }
}

impl Transport for MockTransport {
    fn call(
        &self,
        op: Op,
        lid: LockId,
        client_id: &ClientId,
    ) -> Result<Status, TransportError> {
        Ok(match op {
            Op::Acquire => self.server.acquire(lid, client_id.clone()),
            Op::Release => self.server.release(lid, client_id),
        })
    }
}

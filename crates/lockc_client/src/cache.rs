//! The lock table and per-lock state machine.
//!
//! Each lock known to this client has a record with one of five states:
//!
//! ```text
//!           acquire
//!   None  ----------> Acquiring ----------> Locked
//!   Free  ----------> Locked                      (no server round-trip)
//!   Acquiring/Locked ----> wait on wait_cv  ----> re-evaluate
//!   Releasing -----------> wait on release_cv --> re-evaluate
//!
//!           release
//!   revoke_pending > 0: hand back to server, state -> None
//!   Locked    ----------> Free, signal wait_cv   (stays cached)
//!   Releasing ----------> hand back to server, state -> None
//!
//!           revoke (server callback)
//!   Locked -> Releasing              (holder hands back on release)
//!   Free   -> Releasing, hand back immediately
//!   None / Acquiring / Releasing -> revoke_pending++
//! ```
//!
//! A revoke that lands while the lock is `Acquiring` is deferred via
//! `revoke_pending` so the acquiring thread gets to use the lock at least
//! once before it goes back. Otherwise a contended lock ping-pongs between
//! clients without anyone making progress.
//!
//! Records are only ever mutated under their mutex; remote calls are issued
//! with the mutex released. Waits re-check their predicate in a loop, so
//! spurious wakeups are harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use lockc_proto::{ClientId, LockId, Status};
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::retry;
use crate::transport::{Op, Transport, TransportError};

const ACQUIRE_RETRY_BASE: Duration = Duration::from_millis(100);
const ACQUIRE_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
const RELEASE_RETRY_BASE: Duration = Duration::from_millis(100);
const RELEASE_RETRY_MAX_DELAY: Duration = Duration::from_secs(2);
const RELEASE_RETRY_ATTEMPTS: usize = 5;

/// State of one lock as cached by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// The server owns the lock; we are not trying to get it.
    None,
    /// An acquire request is (or may be) in flight.
    Acquiring,
    /// We hold the lock and a local thread is using it.
    Locked,
    /// We hold the lock but no local thread is using it. A local acquirer
    /// may take it without a server round-trip.
    Free,
    /// We hold the lock and have decided to return it; a release call is
    /// (or may be) in flight.
    Releasing,
}

/// Upper-layer collaborator notified just before a lock is handed back to
/// the server, so state scoped to the lock can be flushed first.
pub trait ReleaseUser: Send + Sync {
    fn on_release_before_handback(&self, lid: LockId);
}

struct LockInner {
    state: LockState,
    owner: Option<ThreadId>,
    revoke_pending: u32,
    retry_ready: bool,
}

struct LockRec {
    inner: Mutex<LockInner>,
    wait_cv: Condvar,
    release_cv: Condvar,
    retry_cv: Condvar,
}

impl LockRec {
    fn new() -> Self {
        LockRec {
            inner: Mutex::new(LockInner {
                state: LockState::None,
                owner: None,
                revoke_pending: 0,
                retry_ready: false,
            }),
            wait_cv: Condvar::new(),
            release_cv: Condvar::new(),
            retry_cv: Condvar::new(),
        }
    }
}

/// Client-side cache of lock ownership.
///
/// Any number of threads may call [`acquire`](LockCache::acquire) and
/// [`release`](LockCache::release) concurrently; the transport delivers
/// [`revoke`](LockCache::revoke) and [`retry`](LockCache::retry) callbacks
/// on its own threads.
pub struct LockCache {
    id: ClientId,
    transport: Arc<dyn Transport>,
    release_user: Option<Arc<dyn ReleaseUser>>,
    locks: Mutex<HashMap<LockId, Arc<LockRec>>>,
}

impl LockCache {
    pub fn new(
        id: ClientId,
        transport: Arc<dyn Transport>,
        release_user: Option<Arc<dyn ReleaseUser>>,
    ) -> Self {
        LockCache {
            id,
            transport,
            release_user,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.id
    }

    /// Current cached state of `lid`, if this client has ever seen it.
    pub fn state(&self, lid: LockId) -> Option<LockState> {
        self.lookup(lid).map(|rec| rec.inner.lock().state)
    }

    /// Record for `lid`, created on first reference. Records are never
    /// removed, so the returned `Arc` stays valid for the process lifetime.
    fn rec(&self, lid: LockId) -> Arc<LockRec> {
        self.locks
            .lock()
            .entry(lid)
            .or_insert_with(|| Arc::new(LockRec::new()))
            .clone()
    }

    fn lookup(&self, lid: LockId) -> Option<Arc<LockRec>> {
        self.locks.lock().get(&lid).cloned()
    }

    /// Blocks until the calling thread holds `lid`.
    ///
    /// Takes the lock from the local cache when it is `Free`; otherwise
    /// queues behind local users, or asks the server and, told to retry,
    /// parks until the server's retry callback arrives.
    pub fn acquire(&self, lid: LockId) -> Result<()> {
        let rec = self.rec(lid);
        let mut need_remote = false;
        {
            let mut inner = rec.inner.lock();
            loop {
                match inner.state {
                    LockState::None => {
                        inner.state = LockState::Acquiring;
                        debug!("{} lock {lid}: None -> Acquiring", self.id);
                        need_remote = true;
                        break;
                    }
                    LockState::Free => {
                        inner.state = LockState::Locked;
                        inner.owner = Some(thread::current().id());
                        debug!("{} lock {lid}: Free -> Locked (cached)", self.id);
                        break;
                    }
                    LockState::Acquiring | LockState::Locked => {
                        // Woken threads are not necessarily next in line;
                        // re-evaluate from the top.
                        while matches!(
                            inner.state,
                            LockState::Acquiring | LockState::Locked
                        ) {
                            rec.wait_cv.wait(&mut inner);
                        }
                    }
                    LockState::Releasing => {
                        while inner.state == LockState::Releasing {
                            rec.release_cv.wait(&mut inner);
                        }
                    }
                }
            }
        }

        if !need_remote {
            return Ok(());
        }

        loop {
            let status = self.remote_acquire(lid);
            let mut inner = rec.inner.lock();
            match status {
                Status::Ok => {
                    inner.state = LockState::Locked;
                    inner.owner = Some(thread::current().id());
                    debug!("{} lock {lid}: Acquiring -> Locked", self.id);
                    return Ok(());
                }
                Status::Retry => {
                    debug!("{} lock {lid}: server busy, waiting for retry", self.id);
                    while !inner.retry_ready {
                        rec.retry_cv.wait(&mut inner);
                    }
                    inner.retry_ready = false;
                    // guard drops here; reissue the call unlocked
                }
            }
        }
    }

    /// Releases `lid` on behalf of the calling thread.
    ///
    /// With no revoke outstanding the lock stays cached (`Free`) so the
    /// next local acquirer skips the server round-trip. A pending or
    /// delivered revoke turns the release into a hand-back.
    pub fn release(&self, lid: LockId) -> Result<()> {
        let Some(rec) = self.lookup(lid) else {
            warn!("{} release of unknown lock {lid}", self.id);
            return Err(Error::UnknownLock(lid));
        };
        let mut handback = false;
        {
            let mut inner = rec.inner.lock();
            if inner.revoke_pending > 0 {
                // A revoke arrived while we were acquiring; now that the
                // lock has been used once, honour it.
                inner.revoke_pending -= 1;
                handback = true;
            } else {
                match inner.state {
                    LockState::Locked => {
                        inner.state = LockState::Free;
                        inner.owner = None;
                        debug!("{} lock {lid}: Locked -> Free", self.id);
                        rec.wait_cv.notify_one();
                    }
                    LockState::Releasing => {
                        handback = true;
                    }
                    state => {
                        warn!(
                            "{} release of lock {lid} in illegal state {state:?}",
                            self.id
                        );
                        return Err(Error::IllegalRelease { lid, state });
                    }
                }
            }
        }
        if handback {
            self.hand_back(&rec, lid);
        }
        Ok(())
    }

    /// Server callback: give the lock back soon.
    pub fn revoke(&self, lid: LockId) -> Status {
        let Some(rec) = self.lookup(lid) else {
            warn!("{} revoke of unknown lock {lid}", self.id);
            return Status::Retry;
        };
        let mut handback = false;
        {
            let mut inner = rec.inner.lock();
            match inner.state {
                LockState::Locked => {
                    inner.state = LockState::Releasing;
                    debug!(
                        "{} lock {lid}: Locked -> Releasing, holder hands back on release",
                        self.id
                    );
                }
                LockState::Free => {
                    inner.state = LockState::Releasing;
                    debug!("{} lock {lid}: Free -> Releasing", self.id);
                    handback = true;
                }
                state => {
                    inner.revoke_pending += 1;
                    debug!(
                        "{} lock {lid}: revoke in {state:?} deferred, {} pending",
                        self.id, inner.revoke_pending
                    );
                }
            }
        }
        if handback {
            self.hand_back(&rec, lid);
        }
        Status::Ok
    }

    /// Server callback: a previously refused acquire may now succeed.
    pub fn retry(&self, lid: LockId) -> Status {
        let Some(rec) = self.lookup(lid) else {
            warn!("{} retry for unknown lock {lid}", self.id);
            return Status::Retry;
        };
        // Flag and signal under the same critical section, or a concurrent
        // acquirer could check the flag, decide to wait, and miss the wakeup.
        let mut inner = rec.inner.lock();
        inner.retry_ready = true;
        rec.retry_cv.notify_one();
        debug!("{} lock {lid}: retry signalled", self.id);
        Status::Ok
    }

    /// Returns the lock to the server: release-user notification, remote
    /// release, then `None` and a broadcast on both condvars. Acquirers may
    /// be parked on either; missing one strands threads.
    fn hand_back(&self, rec: &LockRec, lid: LockId) {
        match &self.release_user {
            Some(user) => user.on_release_before_handback(lid),
            None => debug!("no release user to flush for lock {lid}"),
        }
        debug!("{} handing lock {lid} back to the server", self.id);
        match self.remote_release(lid) {
            Ok(Status::Ok) => {}
            Ok(Status::Retry) => {
                warn!("{} release of lock {lid} refused by server", self.id)
            }
            Err(e) => {
                // Dropping cached ownership anyway: the server is the source
                // of truth and will revoke again if it still sees us as the
                // holder. Staying in Releasing would starve local acquirers.
                error!("{} release of lock {lid} failed: {e}", self.id);
            }
        }
        let mut inner = rec.inner.lock();
        inner.state = LockState::None;
        inner.owner = None;
        debug!("{} lock {lid}: -> None", self.id);
        rec.wait_cv.notify_all();
        rec.release_cv.notify_all();
    }

    /// Remote acquire retries transport failures indefinitely; the server
    /// decides who gets the lock, so there is nothing useful to report to
    /// the caller short of an answer.
    fn remote_acquire(&self, lid: LockId) -> Status {
        let mut backoff =
            retry::exponential_backoff(ACQUIRE_RETRY_BASE, ACQUIRE_RETRY_MAX_DELAY);
        loop {
            match self.transport.call(Op::Acquire, lid, &self.id) {
                Ok(status) => return status,
                Err(e) => {
                    let delay = backoff.next().unwrap_or(ACQUIRE_RETRY_MAX_DELAY);
                    warn!(
                        "{} acquire of lock {lid} failed, retrying in {delay:?}: {e}",
                        self.id
                    );
                    thread::sleep(delay);
                }
            }
        }
    }

    fn remote_release(&self, lid: LockId) -> std::result::Result<Status, TransportError> {
        retry::retry_blocking(
            retry::exponential_backoff(RELEASE_RETRY_BASE, RELEASE_RETRY_MAX_DELAY)
                .take(RELEASE_RETRY_ATTEMPTS),
            "release",
            || self.transport.call(Op::Release, lid, &self.id),
        )
    }
}

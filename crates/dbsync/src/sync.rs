//! Reentrant, in-process readers/writer lock.
//!
//! Any number of threads may hold shared locks at once, and each thread may
//! hold as many as it likes. The exclusive lock is granted once no *other*
//! thread holds a shared lock, which lets a thread that is the sole shared
//! holder upgrade in place. The exclusive lock is reentrant for its owner.
//!
//! There is no queue: a pending exclusive request does not hold back new
//! shared requests, so a constant stream of readers can starve a writer.
//!
//! Holds belonging to threads that have exited are purged before holders are
//! counted, so a leaked lock on a dead thread never blocks writers forever.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use derive_more::Display;
use tracing::trace;

// Waiters wake up at least this often to purge holds left by dead threads,
// which never get to signal the condition variable themselves.
const PURGE_INTERVAL: Duration = Duration::from_millis(50);

thread_local! {
    // Dropped when the thread exits; holders keep a `Weak` to it.
    static LIVENESS: Arc<()> = Arc::new(());
}

fn liveness() -> Weak<()> {
    LIVENESS.with(Arc::downgrade)
}

/// The two kinds of hold a [`SyncLock`] can represent.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    #[display("shared")]
    Shared,
    #[display("exclusive")]
    Exclusive,
}

#[derive(Debug)]
struct Holder {
    count: usize,
    alive: Weak<()>,
}

impl Holder {
    fn new() -> Self {
        Self { count: 0, alive: liveness() }
    }

    fn is_dead(&self) -> bool {
        self.alive.strong_count() == 0
    }
}

#[derive(Debug, Default)]
struct State {
    shared: HashMap<ThreadId, Holder>,
    exclusive: Option<(ThreadId, Holder)>,
}

impl State {
    fn purge(&mut self) {
        let before = self.shared.len();
        self.shared.retain(|_, holder| !holder.is_dead());
        if self.shared.len() != before {
            trace!(purged = before - self.shared.len(), "purged shared holds of dead threads");
        }
        if self.exclusive.as_ref().is_some_and(|(_, holder)| holder.is_dead()) {
            trace!("purged exclusive hold of a dead thread");
            self.exclusive = None;
        }
    }

    fn exclusive_held_by_other(&self, me: ThreadId) -> bool {
        self.exclusive.as_ref().is_some_and(|(owner, _)| *owner != me)
    }

    fn shared_held_by_other(&self, me: ThreadId) -> bool {
        self.shared.keys().any(|owner| *owner != me)
    }
}

/// A reentrant readers/writer lock keyed on the calling thread.
#[derive(Debug, Default)]
pub struct Synchronizer {
    state: Mutex<State>,
    released: Condvar,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, state: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.released
            .wait_timeout(state, PURGE_INTERVAL)
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    /// Take a shared hold.
    ///
    /// Only waits while another thread owns the exclusive lock; pending
    /// exclusive requests are never given priority.
    pub fn acquire_shared(&self) -> SyncLock<'_> {
        let me = thread::current().id();
        let mut state = self.state();
        loop {
            state.purge();
            if !state.exclusive_held_by_other(me) {
                break;
            }
            state = self.wait(state);
        }
        state.shared.entry(me).or_insert_with(Holder::new).count += 1;
        SyncLock::new(self, LockKind::Shared)
    }

    /// Take the exclusive hold, blocking until no other thread holds any lock.
    ///
    /// Shared holds of the calling thread don't count, so a sole reader can
    /// upgrade. Calling this while already owning the exclusive lock nests.
    pub fn acquire_exclusive(&self) -> SyncLock<'_> {
        let me = thread::current().id();
        let mut state = self.state();
        loop {
            state.purge();
            if !state.exclusive_held_by_other(me) && !state.shared_held_by_other(me) {
                break;
            }
            state = self.wait(state);
        }
        match &mut state.exclusive {
            Some((_, holder)) => holder.count += 1,
            None => {
                let mut holder = Holder::new();
                holder.count = 1;
                state.exclusive = Some((me, holder));
            },
        }
        SyncLock::new(self, LockKind::Exclusive)
    }

    /// Number of shared holds the calling thread currently has.
    pub fn shared_count(&self) -> usize {
        let me = thread::current().id();
        self.state().shared.get(&me).map_or(0, |holder| holder.count)
    }

    /// Whether the calling thread owns the exclusive lock.
    pub fn is_exclusive_owner(&self) -> bool {
        let me = thread::current().id();
        self.state().exclusive.as_ref().is_some_and(|(owner, _)| *owner == me)
    }

    fn release(&self, kind: LockKind) {
        let me = thread::current().id();
        let mut state = self.state();
        match kind {
            LockKind::Shared => {
                let Some(holder) = state.shared.get_mut(&me) else {
                    drop(state);
                    panic!("released a shared lock that this thread does not hold");
                };
                holder.count -= 1;
                if holder.count == 0 {
                    state.shared.remove(&me);
                    self.released.notify_all();
                }
            },
            LockKind::Exclusive => {
                let Some((owner, holder)) = state.exclusive.as_mut() else {
                    drop(state);
                    panic!("released the exclusive lock while it is not held");
                };
                if *owner != me {
                    drop(state);
                    panic!("released the exclusive lock from a thread that does not own it");
                }
                holder.count -= 1;
                if holder.count == 0 {
                    state.exclusive = None;
                    self.released.notify_all();
                }
            },
        }
    }
}

/// A hold on a [`Synchronizer`], released when dropped.
///
/// Locks are tied to the thread that acquired them and therefore are not
/// `Send`.
#[must_use = "the lock is released as soon as it is dropped"]
#[derive(Debug)]
pub struct SyncLock<'a> {
    sync: &'a Synchronizer,
    kind: LockKind,
    _thread_bound: PhantomData<*const ()>,
}

impl<'a> SyncLock<'a> {
    fn new(sync: &'a Synchronizer, kind: LockKind) -> Self {
        Self { sync, kind, _thread_bound: PhantomData }
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    /// Release the hold now rather than at the end of the scope.
    pub fn unlock(self) {
        drop(self);
    }
}

impl Drop for SyncLock<'_> {
    fn drop(&mut self) {
        self.sync.release(self.kind);
    }
}

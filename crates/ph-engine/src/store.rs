//! State store
//!
//! Holds the current [`Snapshot`] and fans every committed snapshot out to
//! registered subscribers.
//!
//! # Locking Model
//!
//! Two locks with different jobs:
//!
//! - `inner` guards the current value and the subscriber list. It is held
//!   only long enough to swap an `Arc`, so `current()` never waits on a
//!   writer's computation or on subscriber callbacks.
//! - `writer` serializes writers end to end: read-modify-write, commit and
//!   delivery. It is reentrant so a callback that submits a follow-up update
//!   on the same thread cannot deadlock. `subscribe()` never takes it.
//!
//! Each subscriber also has a delivery gate. Whoever holds the gate hands
//! the subscriber the latest committed snapshot, then checks again after
//! releasing it. A thread that finds the gate busy leaves its version to the
//! holder. Callbacks for one subscriber therefore never overlap and versions
//! only move forward, whether the racing delivery is a replay on the
//! subscribing thread or a nested update from inside a callback.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use ph_core::Snapshot;

/// Callback invoked with every committed snapshot
pub type SnapshotCallback = Arc<dyn Fn(Arc<Snapshot>) + Send + Sync>;

/// Handle returned by [`StateStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Result of a commit: the value replaced and the value now current
#[derive(Debug, Clone)]
pub struct Commit {
    pub previous: Arc<Snapshot>,
    pub current: Arc<Snapshot>,
}

impl Commit {
    /// Whether the commit replaced the snapshot with a different value
    pub fn changed(&self) -> bool {
        !Arc::ptr_eq(&self.previous, &self.current)
    }
}

struct Subscriber {
    id: u64,
    active: AtomicBool,
    delivered: AtomicU64,
    gate: Mutex<()>,
    callback: SnapshotCallback,
}

impl Subscriber {
    fn is_behind(&self, version: u64) -> bool {
        self.active.load(Ordering::SeqCst) && self.delivered.load(Ordering::SeqCst) < version
    }
}

struct Inner {
    snapshot: Arc<Snapshot>,
    version: u64,
    subscribers: Vec<Arc<Subscriber>>,
}

/// Single point of truth for the observable state
pub struct StateStore {
    inner: Mutex<Inner>,
    writer: ReentrantMutex<()>,
    next_id: AtomicU64,
}

impl StateStore {
    /// Create a store holding `initial`
    pub fn new(initial: Snapshot) -> Self {
        Self {
            inner: Mutex::new(Inner {
                snapshot: Arc::new(initial),
                // Starts at 1 so a fresh subscriber (delivered = 0) accepts the replay
                version: 1,
                subscribers: Vec::new(),
            }),
            writer: ReentrantMutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The latest committed snapshot
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.lock().snapshot)
    }

    /// Monotonic commit counter
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Replace the current snapshot and notify every subscriber in order
    pub fn update(&self, snapshot: Snapshot) -> Commit {
        let _writer = self.writer.lock();
        self.commit(snapshot)
    }

    /// Compute a new snapshot from the current one and commit it atomically.
    ///
    /// If `f` fails nothing is committed. If it returns a value equal to the
    /// current snapshot the commit is skipped and subscribers are not called.
    pub fn update_with<E>(
        &self,
        f: impl FnOnce(&Snapshot) -> Result<Snapshot, E>,
    ) -> Result<Commit, E> {
        let _writer = self.writer.lock();
        let current = self.current();
        let next = f(&current)?;
        if next == *current {
            return Ok(Commit {
                previous: Arc::clone(&current),
                current,
            });
        }
        Ok(self.commit(next))
    }

    /// Infallible form of [`update_with`](Self::update_with)
    pub fn modify(&self, f: impl FnOnce(&Snapshot) -> Snapshot) -> Commit {
        match self.update_with::<Infallible>(|current| Ok(f(current))) {
            Ok(commit) => commit,
            Err(never) => match never {},
        }
    }

    /// Register a callback.
    ///
    /// The current snapshot is delivered before this returns, then every
    /// later commit. Registration does not wait for an in-progress writer.
    /// Callbacks run synchronously on the committing thread and must not
    /// block.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(Arc<Snapshot>) + Send + Sync + 'static,
    {
        let subscriber = Arc::new(Subscriber {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            active: AtomicBool::new(true),
            delivered: AtomicU64::new(0),
            gate: Mutex::new(()),
            callback: Arc::new(callback),
        });

        self.inner.lock().subscribers.push(Arc::clone(&subscriber));

        self.deliver(&subscriber);
        SubscriptionHandle(subscriber.id)
    }

    /// Remove a subscription. Returns false if the handle was unknown.
    ///
    /// Once this returns the callback is never invoked again.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let _writer = self.writer.lock();
        let mut inner = self.inner.lock();
        match inner.subscribers.iter().position(|s| s.id == handle.0) {
            Some(index) => {
                let subscriber = inner.subscribers.remove(index);
                subscriber.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    fn commit(&self, next: Snapshot) -> Commit {
        let current = Arc::new(next);
        let (version, previous, subscribers) = {
            let mut inner = self.inner.lock();
            let previous = std::mem::replace(&mut inner.snapshot, Arc::clone(&current));
            inner.version += 1;
            (inner.version, previous, inner.subscribers.clone())
        };

        tracing::trace!(version, subscribers = subscribers.len(), "Snapshot committed");

        for subscriber in &subscribers {
            self.deliver(subscriber);
        }

        Commit { previous, current }
    }

    fn latest(&self) -> (u64, Arc<Snapshot>) {
        let inner = self.inner.lock();
        (inner.version, Arc::clone(&inner.snapshot))
    }

    /// Bring `subscriber` up to the latest committed snapshot
    fn deliver(&self, subscriber: &Subscriber) {
        loop {
            // Busy gate: the holder re-checks after releasing it
            let Some(gate) = subscriber.gate.try_lock() else {
                return;
            };
            loop {
                let (version, snapshot) = self.latest();
                if !subscriber.is_behind(version) {
                    break;
                }
                subscriber.delivered.store(version, Ordering::SeqCst);
                (subscriber.callback)(snapshot);
            }
            drop(gate);

            if !subscriber.is_behind(self.version()) {
                return;
            }
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(Snapshot::default())
    }
}

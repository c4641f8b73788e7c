//! Striped per-document locks
//!
//! Writers of the same document id must be linearised: the version check,
//! translog append, index apply and version-map update of one write happen
//! before the next write to that id starts. Ids are hashed onto a fixed set
//! of mutexes, so unrelated ids may share a stripe but never deadlock (one
//! stripe is held at a time).

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Default number of stripes
pub const DEFAULT_STRIPES: usize = 256;

/// Proof that the lock for an id is held
///
/// Methods suffixed `_under_lock` take this guard so callers cannot touch
/// per-id state without holding the lock.
pub struct IdGuard<'a> {
    stripe: usize,
    _guard: MutexGuard<'a, ()>,
}

impl IdGuard<'_> {
    /// Stripe held by this guard.
    pub fn stripe(&self) -> usize {
        self.stripe
    }
}

/// Fixed-size table of id locks
pub struct KeyedLock {
    stripes: Box<[Mutex<()>]>,
}

impl KeyedLock {
    /// Create a table with `stripes` locks (at least one).
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        KeyedLock {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Stripe an id maps to.
    pub fn stripe_of(&self, id: &str) -> usize {
        let mut hasher = FxHasher::default();
        id.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Block until the lock for `id` is held.
    pub fn acquire(&self, id: &str) -> IdGuard<'_> {
        let stripe = self.stripe_of(id);
        IdGuard {
            stripe,
            _guard: self.stripes[stripe].lock(),
        }
    }

    /// Take the lock for `id` only if it is free.
    pub fn try_acquire(&self, id: &str) -> Option<IdGuard<'_>> {
        let stripe = self.stripe_of(id);
        self.stripes[stripe]
            .try_lock()
            .map(|guard| IdGuard { stripe, _guard: guard })
    }

    /// True if `guard` covers `id`.
    pub fn guards(&self, guard: &IdGuard<'_>, id: &str) -> bool {
        guard.stripe == self.stripe_of(id)
    }
}

impl Default for KeyedLock {
    fn default() -> Self {
        KeyedLock::new(DEFAULT_STRIPES)
    }
}

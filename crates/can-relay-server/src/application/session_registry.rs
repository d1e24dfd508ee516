//! SessionRegistry: the relay's set of live client sessions.
//!
//! Three parties touch the set concurrently:
//!
//! - the accept loop inserts a session for every new connection;
//! - a session's reader removes its own entry when the connection fails;
//! - the broadcast pass iterates the set and removes sessions it could not
//!   deliver to.
//!
//! All three go through the same mutex inside the registry.  Broadcast never
//! iterates the live map: it takes a [`SessionRegistry::snapshot`] and works
//! on that copy, so a concurrent removal cannot invalidate the iteration.
//!
//! # Lifecycle
//!
//! ```text
//! accept ──► insert ──► (broadcast targets) ──► remove_if_present ──► gone
//!                                          └──► drain (server stop)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

/// Identifies one accepted connection for the lifetime of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first group is enough to tell sessions apart in logs.
        let s = self.0.to_string();
        f.write_str(&s[..8])
    }
}

/// Concurrency-safe map of live sessions.
///
/// `S` is the session handle; it is cloned into snapshots, so it should be
/// cheap to clone (an `Arc`).
#[derive(Debug)]
pub struct SessionRegistry<S> {
    sessions: Mutex<HashMap<SessionId, S>>,
}

impl<S: Clone> SessionRegistry<S> {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a session.  An existing entry with the same id is replaced.
    pub fn insert(&self, id: SessionId, session: S) {
        self.lock().insert(id, session);
    }

    /// Removes a session if it is still registered.
    ///
    /// Returns the removed handle, or `None` when another path (a broadcast
    /// pass, the session's own reader, or shutdown) got there first.
    pub fn remove_if_present(&self, id: SessionId) -> Option<S> {
        self.lock().remove(&id)
    }

    /// Copies the current set for iteration outside the lock.
    pub fn snapshot(&self) -> Vec<(SessionId, S)> {
        self.lock()
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect()
    }

    /// Removes and returns every session.
    pub fn drain(&self) -> Vec<(SessionId, S)> {
        self.lock().drain().collect()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, S>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Clone> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

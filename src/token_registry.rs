//! Per-resource save generations.
//!
//! Every formatting attempt takes a [`Token`] from the [`TokenRegistry`] before
//! doing any work. The token is a frozen copy of the resource's version at that
//! moment; the attempt may only write its result back while that version is
//! still the newest one the registry knows about. [`TokenRegistry::run_if_current`]
//! performs that comparison and the write-back under a single lock acquisition,
//! so no newer save can slip in between the check and the apply.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Immutable claim on one save generation of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    resource_id: String,
    version: u64,
}

impl Token {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Mutex-guarded map from resource identifier to its latest version.
///
/// Entries are created lazily on the first [`acquire`](Self::acquire) and are
/// never removed for the lifetime of the registry.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    versions: Mutex<HashMap<String, u64>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the version for `resource_id` and return a copy of the new value.
    pub fn acquire(&self, resource_id: &str) -> Token {
        let mut versions = self.lock();
        let version = versions.entry(resource_id.to_string()).or_insert(0);
        *version += 1;

        log::trace!("acquired token v{} for {resource_id}", *version);

        Token {
            resource_id: resource_id.to_string(),
            version: *version,
        }
    }

    /// Run `action` only if `token` still names the newest version of its resource.
    ///
    /// The comparison and `action` happen under the same lock, so `action` must be
    /// quick and must not call back into the registry. Returns whether `action` ran.
    pub fn run_if_current<F>(&self, token: &Token, action: F) -> bool
    where
        F: FnOnce(),
    {
        let versions = self.lock();
        let live = versions.get(token.resource_id.as_str()).copied();

        if live != Some(token.version) {
            log::trace!(
                "token v{} for {} is stale (live: {:?})",
                token.version,
                token.resource_id,
                live
            );
            return false;
        }

        action();
        drop(versions);
        true
    }

    /// Newest version handed out for `resource_id`, if it has ever been acquired.
    pub fn current_version(&self, resource_id: &str) -> Option<u64> {
        self.lock().get(resource_id).copied()
    }

    /// Number of resources the registry has seen.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panicking commit action poisons the mutex. The map itself is always left
    // consistent (versions are only ever incremented before the action runs), so
    // recover the guard instead of wedging every later save.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.versions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

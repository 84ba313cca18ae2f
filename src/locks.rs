// Copyright 2023 the Tectonic Project
// Licensed under the MIT License

//! Process-wide locks keyed by identifier.
//!
//! Every mutating operation serializes on the identifier it touches: pids,
//! cids, and metadata documents each get their own table. A table is a
//! guarded set of currently-held keys; acquiring a key that is held parks
//! the caller on a condvar until the holder drops its guard.
//!
//! When an operation needs both a pid and a cid, it must take the pid first.
//! No operation may hold two keys from the same table.

use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};

use crate::errors::{HashStoreError, Result};

/// A set of held keys with blocking acquisition.
#[derive(Default)]
pub(crate) struct LockTable {
    held: Mutex<HashSet<String>>,
    freed: Condvar,
}

impl LockTable {
    /// Block until `key` is free, then hold it until the guard drops.
    pub fn lock(&self, key: &str) -> LockGuard<'_> {
        let mut held = self.held.lock();

        while held.contains(key) {
            self.freed.wait(&mut held);
        }

        held.insert(key.to_owned());

        LockGuard {
            table: self,
            key: key.to_owned(),
        }
    }

    /// Take `key` only if no other operation holds it.
    pub fn try_lock(&self, key: &str) -> Result<LockGuard<'_>> {
        let mut held = self.held.lock();

        if held.contains(key) {
            return Err(HashStoreError::RequestInProgress(key.to_owned()));
        }

        held.insert(key.to_owned());

        Ok(LockGuard {
            table: self,
            key: key.to_owned(),
        })
    }
}

/// Exclusive ownership of one key. Releases on drop, so every exit path
/// (including unwinding) gives the key back.
pub(crate) struct LockGuard<'a> {
    table: &'a LockTable,
    key: String,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.table.held.lock();
        held.remove(&self.key);
        self.table.freed.notify_all();
    }
}

/// The three lock tables of a store.
#[derive(Default)]
pub(crate) struct LockRegistry {
    pids: LockTable,
    cids: LockTable,
    metadata: LockTable,
}

impl LockRegistry {
    pub fn lock_pid(&self, pid: &str) -> LockGuard<'_> {
        self.pids.lock(pid)
    }

    pub fn lock_cid(&self, cid: &str) -> LockGuard<'_> {
        self.cids.lock(cid)
    }

    /// Lock one metadata document. Keys are the document names, which
    /// already encode the `(pid, formatId)` pair.
    pub fn lock_metadata_doc(&self, doc_name: &str) -> LockGuard<'_> {
        self.metadata.lock(doc_name)
    }

    /// Take a cid lock only if it is free. The orphan sweep uses this to
    /// step around cids that an ingest is actively touching.
    pub fn try_lock_cid(&self, cid: &str) -> Result<LockGuard<'_>> {
        self.cids.try_lock(cid)
    }
}

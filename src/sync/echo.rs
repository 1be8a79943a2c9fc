// src/sync/echo.rs
//! Recognises feed events that merely repeat this process's own writes.

use std::collections::HashMap;

use crate::store::Collection;

#[derive(Debug, Default)]
pub struct EchoGuard {
    pending: HashMap<(Collection, String), u64>,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers a store-confirmed write that was already applied locally.
    pub fn record(&mut self, collection: Collection, id: &str, version: u64) {
        let entry = self
            .pending
            .entry((collection, id.to_string()))
            .or_insert(version);
        *entry = (*entry).max(version);
    }

    /// True when the feed event at `version` is covered by a recorded write.
    /// The record is dropped once the feed catches up to or passes it.
    pub fn is_echo(&mut self, collection: Collection, id: &str, version: u64) -> bool {
        let key = (collection, id.to_string());
        match self.pending.get(&key).copied() {
            Some(recorded) if version < recorded => true,
            Some(recorded) => {
                self.pending.remove(&key);
                version == recorded
            }
            None => false,
        }
    }

    /// Drops the collection's records whose id fails `keep`. Returns how
    /// many were dropped.
    pub fn retain<F>(&mut self, collection: Collection, keep: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let before = self.pending.len();
        self.pending
            .retain(|(c, id), _| *c != collection || keep(id));
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

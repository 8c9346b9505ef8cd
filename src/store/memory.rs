//! In-memory record store.
//!
//! Changes made through a session are staged on a copy of the flag column
//! and only applied to the store on commit. An optional injected failure on
//! the n-th batch write exercises the rollback path.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::debug;

use super::{RecordStore, StoreSession};
use crate::{DedupError, ObsoleteSet, Record, Result, RouteScope};

/// Records held in memory with transactional flag updates.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<Record>,
    /// 1-based batch number on which `flag_obsolete` fails
    fail_on_batch: Option<usize>,
    commits: usize,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<Record>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    /// Make the n-th batch write of every session fail (1-based).
    pub fn fail_on_batch(mut self, batch: usize) -> Self {
        self.fail_on_batch = Some(batch);
        self
    }

    pub fn insert(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Check whether any record with this identifier is flagged obsolete.
    pub fn is_obsolete(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id && r.obsolete)
    }

    /// Number of sessions committed so far.
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Set a record's flag directly, outside any session.
    pub fn set_obsolete(&mut self, id: &str, obsolete: bool) {
        for record in self.records.iter_mut().filter(|r| r.id == id) {
            record.obsolete = obsolete;
        }
    }
}

impl RecordStore for MemoryStore {
    type Session<'a> = MemorySession<'a>;

    fn begin(&mut self) -> Result<MemorySession<'_>> {
        let staged = self.records.iter().map(|r| r.obsolete).collect();
        Ok(MemorySession {
            store: self,
            staged,
            batches: 0,
        })
    }

    fn flagged_ids(&mut self, scope: &RouteScope) -> Result<ObsoleteSet> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.obsolete && scope.contains(&r.route_id))
            .map(|r| r.id.clone())
            .collect())
    }
}

/// Transaction over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession<'a> {
    store: &'a mut MemoryStore,
    /// Obsolete flag per record, by index
    staged: Vec<bool>,
    batches: usize,
}

impl StoreSession for MemorySession<'_> {
    fn reset_flags(&mut self, scope: &RouteScope) -> Result<usize> {
        let mut changed = 0;
        for (record, flag) in self.store.records.iter().zip(self.staged.iter_mut()) {
            if *flag && scope.contains(&record.route_id) {
                *flag = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn fetch_active(&mut self, scope: &RouteScope) -> Result<Vec<Record>> {
        Ok(self
            .store
            .records
            .iter()
            .zip(&self.staged)
            .filter(|(r, flag)| !**flag && scope.contains(&r.route_id))
            .map(|(r, _)| Record {
                obsolete: false,
                ..r.clone()
            })
            .collect())
    }

    fn duplicate_ids(&mut self) -> Result<BTreeSet<String>> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in &self.store.records {
            *counts.entry(record.id.as_str()).or_insert(0) += 1;
        }
        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, _)| id.to_string())
            .collect())
    }

    fn flag_obsolete(&mut self, ids: &[String], scope: &RouteScope) -> Result<usize> {
        self.batches += 1;
        if self.store.fail_on_batch == Some(self.batches) {
            return Err(DedupError::Store(format!(
                "injected failure on batch {}",
                self.batches
            )));
        }

        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut updated = 0;
        for (record, flag) in self.store.records.iter().zip(self.staged.iter_mut()) {
            if wanted.contains(record.id.as_str()) && scope.contains(&record.route_id) {
                *flag = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn flagged_ids(&mut self, scope: &RouteScope) -> Result<ObsoleteSet> {
        Ok(self
            .store
            .records
            .iter()
            .zip(&self.staged)
            .filter(|(r, flag)| **flag && scope.contains(&r.route_id))
            .map(|(r, _)| r.id.clone())
            .collect())
    }

    fn commit(self) -> Result<()> {
        for (record, flag) in self.store.records.iter_mut().zip(self.staged) {
            record.obsolete = flag;
        }
        self.store.commits += 1;
        debug!("[MemoryStore] committed");
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        debug!("[MemoryStore] rolled back");
        Ok(())
    }
}

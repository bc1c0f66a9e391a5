//! Change detection: only leads whose `updated_at` advanced since the last
//! observation pass downstream.
//!
//! The last-seen map sits behind [`SeenStore`] so the poller owns it
//! explicitly. [`MemorySeenStore`] lives for the process; [`RedbSeenStore`]
//! persists across restarts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::error::{LeadwatchError, Result};
use crate::types::Lead;

/// Last `updated_at` observed per lead id.
pub trait SeenStore: Send + Sync {
    fn last_seen(&self, lead_id: u64) -> Result<Option<i64>>;
    fn record(&self, lead_id: u64, updated_at: i64) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemorySeenStore {
    seen: Mutex<HashMap<u64, i64>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeenStore for MemorySeenStore {
    fn last_seen(&self, lead_id: u64) -> Result<Option<i64>> {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        Ok(seen.get(&lead_id).copied())
    }

    fn record(&self, lead_id: u64, updated_at: i64) -> Result<()> {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(lead_id, updated_at);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// redb
// ---------------------------------------------------------------------------

/// Key: lead id. Value: last observed `updated_at` (unix seconds).
const SEEN: TableDefinition<u64, i64> = TableDefinition::new("seen");

fn seen_err(e: impl ToString) -> LeadwatchError {
    LeadwatchError::Seen(e.to_string())
}

pub struct RedbSeenStore {
    db: Database,
}

impl RedbSeenStore {
    /// Open or create the database at `path`, creating the table up front.
    pub fn open(path: &Path) -> Result<Self> {
        crate::io::ensure_parent(path)?;
        let db = Database::create(path).map_err(seen_err)?;
        let wt = db.begin_write().map_err(seen_err)?;
        wt.open_table(SEEN).map_err(seen_err)?;
        wt.commit().map_err(seen_err)?;
        Ok(Self { db })
    }

    /// Number of leads with a recorded timestamp.
    pub fn len(&self) -> Result<usize> {
        let rt = self.db.begin_read().map_err(seen_err)?;
        let table = rt.open_table(SEEN).map_err(seen_err)?;
        Ok(table.len().map_err(seen_err)? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl SeenStore for RedbSeenStore {
    fn last_seen(&self, lead_id: u64) -> Result<Option<i64>> {
        let rt = self.db.begin_read().map_err(seen_err)?;
        let table = rt.open_table(SEEN).map_err(seen_err)?;
        let value = table.get(lead_id).map_err(seen_err)?;
        Ok(value.map(|v| v.value()))
    }

    fn record(&self, lead_id: u64, updated_at: i64) -> Result<()> {
        let wt = self.db.begin_write().map_err(seen_err)?;
        {
            let mut table = wt.open_table(SEEN).map_err(seen_err)?;
            table.insert(lead_id, updated_at).map_err(seen_err)?;
        }
        wt.commit().map_err(seen_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChangeDetector
// ---------------------------------------------------------------------------

pub struct ChangeDetector<S: SeenStore + ?Sized> {
    store: std::sync::Arc<S>,
}

impl<S: SeenStore + ?Sized> ChangeDetector<S> {
    pub fn new(store: std::sync::Arc<S>) -> Self {
        Self { store }
    }

    /// True when `lead.updated_at` is strictly newer than the last observed
    /// value (0 when never seen). Does not record anything.
    pub fn is_changed(&self, lead: &Lead) -> Result<bool> {
        let last = self.store.last_seen(lead.id)?.unwrap_or(0);
        Ok(lead.updated_at > last)
    }

    /// Record `lead.updated_at` as seen once the lead has been handled.
    /// Never moves the stored value backwards.
    pub fn commit(&self, lead: &Lead) -> Result<()> {
        if self.is_changed(lead)? {
            self.store.record(lead.id, lead.updated_at)?;
        }
        Ok(())
    }

    /// Check and commit in one step.
    pub fn observe(&self, lead: &Lead) -> Result<bool> {
        let changed = self.is_changed(lead)?;
        if changed {
            self.store.record(lead.id, lead.updated_at)?;
        }
        Ok(changed)
    }

    /// Keep only changed leads, in input order. Nothing is committed; the
    /// caller commits each lead after handling it.
    pub fn filter_changed(&self, leads: Vec<Lead>) -> Result<Vec<Lead>> {
        let mut changed = Vec::with_capacity(leads.len());
        for lead in leads {
            if self.is_changed(&lead)? {
                changed.push(lead);
            }
        }
        Ok(changed)
    }
}

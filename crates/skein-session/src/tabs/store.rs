//! Tab persistence

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::TabRecord;
use crate::error::Result;

/// Key-value store holding the serialized tab list
pub trait TabStore: Send + Sync {
    fn load(&self) -> Result<Vec<TabRecord>>;
    fn save(&self, records: &[TabRecord]) -> Result<()>;
}

/// In-memory store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryTabStore {
    records: Arc<Mutex<Vec<TabRecord>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryTabStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-filled with records, as if saved by an earlier run
    pub fn with_records(records: Vec<TabRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
            saves: Arc::default(),
        }
    }

    pub fn records(&self) -> Vec<TabRecord> {
        self.records.lock().clone()
    }

    /// Number of saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl TabStore for MemoryTabStore {
    fn load(&self) -> Result<Vec<TabRecord>> {
        Ok(self.records.lock().clone())
    }

    fn save(&self, records: &[TabRecord]) -> Result<()> {
        *self.records.lock() = records.to_vec();
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabs::TabId;

    #[test]
    fn test_clones_share_contents() {
        let store = MemoryTabStore::new();
        let handle = store.clone();
        let record = TabRecord {
            id: TabId::new(),
            title: "Chat 1".into(),
            project_path: None,
            session_summary: None,
            created_at: 1,
            last_activity_at: 2,
        };
        store.save(&[record.clone()]).unwrap();
        assert_eq!(handle.load().unwrap(), vec![record]);
        assert_eq!(handle.save_count(), 1);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = TabRecord {
            id: TabId::new(),
            title: "Session 89abcdef".into(),
            project_path: Some("/work".into()),
            session_summary: Some(crate::Session::new("0123456789abcdef", "/work")),
            created_at: 1,
            last_activity_at: 2,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["lastActivityAt"], 2);
        assert_eq!(json["sessionSummary"]["projectPath"], "/work");
        assert_eq!(json["id"], record.id.as_str());
        let back: TabRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}

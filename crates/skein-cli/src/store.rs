//! Tab list persistence on disk

use std::fs;
use std::path::{Path, PathBuf};

use skein_session::{Error, Result, TabRecord, TabStore};

const TABS_FILE: &str = "tabs.json";

/// Keeps the tab list as a JSON array in `<state_dir>/tabs.json`
pub struct FileTabStore {
    path: PathBuf,
}

impl FileTabStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(TABS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TabStore for FileTabStore {
    fn load(&self) -> Result<Vec<TabRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Store(format!("{}: {}", self.path.display(), e))),
        };
        serde_json::from_str(&content)
            .map_err(|e| Error::Store(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&self, records: &[TabRecord]) -> Result<()> {
        let store_err = |e: std::io::Error| Error::Store(format!("{}: {}", self.path.display(), e));

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(store_err)?;
        }
        let content =
            serde_json::to_string_pretty(records).map_err(|e| Error::Store(e.to_string()))?;

        // Write then rename so a crash never leaves a truncated list
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(store_err)?;
        fs::rename(&tmp, &self.path).map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_session::{Session, TabId};

    fn record(title: &str) -> TabRecord {
        TabRecord {
            id: TabId::new(),
            title: title.to_string(),
            project_path: Some("/work".into()),
            session_summary: Some(Session::new("abc", "/work")),
            created_at: 10,
            last_activity_at: 20,
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTabStore::new(dir.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTabStore::new(dir.path().join("state"));
        let records = vec![record("Chat 1"), record("widgets")];

        store.save(&records).unwrap();
        assert!(store.path().exists());
        assert!(!store.path().with_extension("json.tmp").exists());
        assert_eq!(store.load().unwrap(), records);

        store.save(&records[1..]).unwrap();
        assert_eq!(store.load().unwrap(), records[1..].to_vec());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTabStore::new(dir.path());
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(Error::Store(_))));
    }
}

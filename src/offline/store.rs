//! The offline key-value store.
//!
//! Three logical tables keyed by string id; records are opaque JSON blobs
//! plus a couple of cross-reference fields. The file-backed store keeps one
//! JSON document per table and replaces it atomically on every save.

use super::{OfflineError, OfflineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreTable {
    PersistentObjects,
    Queries,
    ActionClassesById,
}

impl StoreTable {
    fn file_name(&self) -> &'static str {
        match self {
            Self::PersistentObjects => "persistent-objects.json",
            Self::Queries => "queries.json",
            Self::ActionClassesById => "action-classes.json",
        }
    }
}

/// One stored record. `response` carries the serialized object, `name` the
/// type-name mapping, `query` the owning-query back-pointer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl StoreRecord {
    pub fn response(id: &str, response: String) -> Self {
        Self {
            id: id.to_string(),
            response: Some(response),
            ..Default::default()
        }
    }

    pub fn class_name(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }
}

/// Minimal async load/save interface the offline engine runs against.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn load(&self, id: &str, table: StoreTable) -> OfflineResult<Option<StoreRecord>>;
    async fn save(&self, record: StoreRecord, table: StoreTable) -> OfflineResult<()>;
}

/// In-memory store; the default for tests and short-lived sessions.
#[derive(Default)]
pub struct MemoryObjectStore {
    records: RwLock<HashMap<(StoreTable, String), StoreRecord>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn load(&self, id: &str, table: StoreTable) -> OfflineResult<Option<StoreRecord>> {
        Ok(self
            .records
            .read()
            .map_err(|e| OfflineError::Store(e.to_string()))?
            .get(&(table, id.to_string()))
            .cloned())
    }

    async fn save(&self, record: StoreRecord, table: StoreTable) -> OfflineResult<()> {
        self.records
            .write()
            .map_err(|e| OfflineError::Store(e.to_string()))?
            .insert((table, record.id.clone()), record);
        Ok(())
    }
}

/// File-backed store: one JSON document per table, atomically replaced via a
/// temporary file on every save.
pub struct FileObjectStore {
    directory: PathBuf,
}

impl FileObjectStore {
    pub fn open<P: AsRef<Path>>(directory: P) -> OfflineResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    fn table_path(&self, table: StoreTable) -> PathBuf {
        self.directory.join(table.file_name())
    }

    fn read_table(&self, table: StoreTable) -> OfflineResult<HashMap<String, StoreRecord>> {
        let path = self.table_path(table);
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let contents = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&contents)?)
    }

    fn write_table(
        &self,
        table: StoreTable,
        records: &HashMap<String, StoreRecord>,
    ) -> OfflineResult<()> {
        let temp = NamedTempFile::new_in(&self.directory)?;
        serde_json::to_writer(temp.as_file(), records)?;
        temp.persist(self.table_path(table))
            .map_err(|e| OfflineError::Store(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn load(&self, id: &str, table: StoreTable) -> OfflineResult<Option<StoreRecord>> {
        Ok(self.read_table(table)?.remove(id))
    }

    async fn save(&self, record: StoreRecord, table: StoreTable) -> OfflineResult<()> {
        let mut records = self.read_table(table)?;
        records.insert(record.id.clone(), record);
        self.write_table(table, &records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryObjectStore::new();
        store
            .save(
                StoreRecord::class_name("po-1", "Customer"),
                StoreTable::ActionClassesById,
            )
            .await
            .unwrap();

        let record = store
            .load("po-1", StoreTable::ActionClassesById)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.name.as_deref(), Some("Customer"));

        assert!(
            store
                .load("po-1", StoreTable::Queries)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::open(dir.path()).unwrap();

        let mut record = StoreRecord::response("q-1", "{}".to_string());
        record.query = Some("owner".to_string());
        store.save(record, StoreTable::Queries).await.unwrap();

        let reopened = FileObjectStore::open(dir.path()).unwrap();
        let loaded = reopened
            .load("q-1", StoreTable::Queries)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.query.as_deref(), Some("owner"));
        assert_eq!(loaded.response.as_deref(), Some("{}"));
    }
}

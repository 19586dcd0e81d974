use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::now_s;

/// Confirmed payload -> zone mapping. Ordered so every flush is byte-stable.
pub type Mapping = BTreeMap<String, String>;

/// Durable backend for the confirmed mapping. Every save rewrites the whole map.
pub trait MappingStore: Send {
    fn kind(&self) -> &'static str;

    /// Load the stored mapping. A store that does not exist yet loads as empty.
    fn load(&mut self) -> Result<Mapping>;

    fn save(&mut self, mapping: &Mapping) -> Result<()>;
}

/// Pretty-printed JSON object file, replaced atomically on each save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "inventory.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl MappingStore for JsonFileStore {
    fn kind(&self) -> &'static str {
        "json"
    }

    fn load(&mut self) -> Result<Mapping> {
        if !self.path.exists() {
            return Ok(Mapping::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read inventory file {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Mapping::new());
        }
        let mapping = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid inventory file {}: {}", self.path.display(), e))?;
        Ok(mapping)
    }

    fn save(&mut self, mapping: &Mapping) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create inventory dir {}", parent.display()))?;
            }
        }
        let body = serde_json::to_string_pretty(mapping)?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, body.as_bytes())
            .with_context(|| format!("write inventory file {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace inventory file {}", self.path.display()))?;
        Ok(())
    }
}

pub struct SqliteMappingStore {
    conn: Connection,
}

impl SqliteMappingStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open inventory database {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS confirmed_mappings (
              payload TEXT PRIMARY KEY,
              zone TEXT NOT NULL,
              updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl MappingStore for SqliteMappingStore {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn load(&mut self) -> Result<Mapping> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload, zone FROM confirmed_mappings ORDER BY payload ASC")?;
        let mut rows = stmt.query([])?;
        let mut mapping = Mapping::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            let zone: String = row.get(1)?;
            mapping.insert(payload, zone);
        }
        Ok(mapping)
    }

    fn save(&mut self, mapping: &Mapping) -> Result<()> {
        let updated_at = now_s() as i64;
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM confirmed_mappings", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO confirmed_mappings (payload, zone, updated_at) VALUES (?1, ?2, ?3)",
            )?;
            for (payload, zone) in mapping {
                stmt.execute(params![payload, zone, updated_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    mapping: Mapping,
    saves: u64,
}

/// Shared in-memory store. Clones observe the same state, so a caller can
/// keep a handle after giving the store to an `InventoryStore`.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMappingStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryMappingStore {
    pub fn with_mapping(mapping: Mapping) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState { mapping, saves: 0 })),
        }
    }

    pub fn saves(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).saves
    }

    pub fn stored(&self) -> Mapping {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .mapping
            .clone()
    }
}

impl MappingStore for InMemoryMappingStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn load(&mut self) -> Result<Mapping> {
        Ok(self.stored())
    }

    fn save(&mut self, mapping: &Mapping) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.mapping = mapping.clone();
        state.saves += 1;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreKind {
    #[default]
    Json,
    Sqlite,
}

impl StoreKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Open the configured durable backend.
pub fn open_backend(kind: StoreKind, path: &Path) -> Result<Box<dyn MappingStore>> {
    match kind {
        StoreKind::Json => Ok(Box::new(JsonFileStore::new(path))),
        StoreKind::Sqlite => {
            let path = path
                .to_str()
                .ok_or_else(|| anyhow!("sqlite path {} is not valid UTF-8", path.display()))?;
            Ok(Box::new(SqliteMappingStore::open(path)?))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The stored zone already matched; nothing was written.
    Unchanged,
    /// The mapping changed and was flushed.
    Updated { previous: Option<String> },
}

/// Confirmed inventory with persist-if-changed semantics.
///
/// The in-memory map is authoritative. When a flush fails the change is kept
/// and marked pending; `retry_pending` flushes it on a later cycle.
pub struct InventoryStore {
    backend: Box<dyn MappingStore>,
    mapping: Mapping,
    pending_flush: bool,
    write_count: u64,
}

impl InventoryStore {
    /// Load prior state. A corrupt backend loads as empty with a warning.
    pub fn open(mut backend: Box<dyn MappingStore>) -> Result<Self> {
        let mapping = match backend.load() {
            Ok(mapping) => mapping,
            Err(err) => {
                log::warn!(
                    "inventory {} store unreadable, starting empty: {:#}",
                    backend.kind(),
                    err
                );
                Mapping::new()
            }
        };
        log::info!(
            "inventory loaded {} confirmed mapping(s) from {} store",
            mapping.len(),
            backend.kind()
        );
        Ok(Self {
            backend,
            mapping,
            pending_flush: false,
            write_count: 0,
        })
    }

    /// Record `payload -> zone`. Writes only when the stored zone differs.
    ///
    /// A flush error is returned after the in-memory map has been updated.
    pub fn persist(&mut self, payload: &str, zone: &str) -> Result<PersistOutcome> {
        if self.mapping.get(payload).map(String::as_str) == Some(zone) {
            return Ok(PersistOutcome::Unchanged);
        }
        let previous = self.mapping.insert(payload.to_string(), zone.to_string());
        self.pending_flush = true;
        self.flush()
            .with_context(|| format!("persist mapping {} -> {}", payload, zone))?;
        log::info!("persisted mapping {} -> {}", payload, zone);
        Ok(PersistOutcome::Updated { previous })
    }

    /// Flush a change left over from a failed write. Returns true if a write happened.
    pub fn retry_pending(&mut self) -> Result<bool> {
        if !self.pending_flush {
            return Ok(false);
        }
        self.flush().context("retry pending inventory flush")?;
        log::info!("pending inventory flush succeeded");
        Ok(true)
    }

    fn flush(&mut self) -> Result<()> {
        self.backend.save(&self.mapping)?;
        self.write_count += 1;
        self.pending_flush = false;
        Ok(())
    }

    pub fn get(&self, payload: &str) -> Option<&str> {
        self.mapping.get(payload).map(String::as_str)
    }

    pub fn snapshot(&self) -> Mapping {
        self.mapping.clone()
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Successful durable writes since open.
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    pub fn has_pending_flush(&self) -> bool {
        self.pending_flush
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    struct FlakyStore {
        inner: InMemoryMappingStore,
        failing: Arc<AtomicBool>,
    }

    impl MappingStore for FlakyStore {
        fn kind(&self) -> &'static str {
            "flaky"
        }

        fn load(&mut self) -> Result<Mapping> {
            self.inner.load()
        }

        fn save(&mut self, mapping: &Mapping) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("disk full"));
            }
            self.inner.save(mapping)
        }
    }

    #[test]
    fn repeated_persist_writes_once() {
        let backend = InMemoryMappingStore::default();
        let mut store = InventoryStore::open(Box::new(backend.clone())).unwrap();

        let first = store.persist("BOX-001", "ShelfA").unwrap();
        let second = store.persist("BOX-001", "ShelfA").unwrap();

        assert_eq!(first, PersistOutcome::Updated { previous: None });
        assert_eq!(second, PersistOutcome::Unchanged);
        assert_eq!(backend.saves(), 1);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn json_file_is_written_once_for_repeated_mapping() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("inventory.json");
        let mut store = InventoryStore::open(Box::new(JsonFileStore::new(&path))).unwrap();

        store.persist("BOX-001", "ShelfA").unwrap();
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        store.persist("BOX-001", "ShelfA").unwrap();

        assert_eq!(store.write_count(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), modified);
        let raw = std::fs::read_to_string(&path).unwrap();
        let on_disk: Mapping = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk.get("BOX-001").map(String::as_str), Some("ShelfA"));
    }

    #[test]
    fn relabel_reports_previous_zone_and_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        {
            let mut store = InventoryStore::open(Box::new(JsonFileStore::new(&path))).unwrap();
            store.persist("BOX-001", "ShelfA").unwrap();
            let outcome = store.persist("BOX-001", "ShelfB").unwrap();
            assert_eq!(
                outcome,
                PersistOutcome::Updated {
                    previous: Some("ShelfA".to_string())
                }
            );
        }
        let reopened = InventoryStore::open(Box::new(JsonFileStore::new(&path))).unwrap();
        assert_eq!(reopened.get("BOX-001"), Some("ShelfB"));
        assert_eq!(reopened.write_count(), 0);
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = InventoryStore::open(Box::new(JsonFileStore::new(&path))).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn failed_flush_keeps_memory_and_retries() {
        let failing = Arc::new(AtomicBool::new(true));
        let inner = InMemoryMappingStore::default();
        let backend = FlakyStore {
            inner: inner.clone(),
            failing: failing.clone(),
        };
        let mut store = InventoryStore::open(Box::new(backend)).unwrap();

        assert!(store.persist("BOX-001", "ShelfA").is_err());
        assert_eq!(store.get("BOX-001"), Some("ShelfA"));
        assert!(store.has_pending_flush());
        assert!(store.retry_pending().is_err());

        // Same mapping again is still a no-op for the caller.
        assert_eq!(store.persist("BOX-001", "ShelfA").unwrap(), PersistOutcome::Unchanged);

        failing.store(false, Ordering::SeqCst);
        assert!(store.retry_pending().unwrap());
        assert!(!store.has_pending_flush());
        assert!(!store.retry_pending().unwrap());
        assert_eq!(inner.stored().get("BOX-001").map(String::as_str), Some("ShelfA"));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn sqlite_store_round_trips_mapping() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("inventory.db");
        let db = db.to_str().unwrap();
        {
            let mut store = InventoryStore::open(Box::new(SqliteMappingStore::open(db).unwrap())).unwrap();
            store.persist("BOX-001", "ShelfA").unwrap();
            store.persist("BOX-002", "ShelfB").unwrap();
            store.persist("BOX-001", "ShelfC").unwrap();
        }
        let reopened = InventoryStore::open(Box::new(SqliteMappingStore::open(db).unwrap())).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("BOX-001"), Some("ShelfC"));
        assert_eq!(reopened.backend_kind(), "sqlite");
    }
}

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use lifelike_contracts::config::HISTORY_STORAGE_KEY;
use lifelike_contracts::storage::LocalStore;
use lifelike_contracts::{
    Creation, CreationDescriptor, ImportValidationError, PersistenceWarning, StorageQuotaExceeded,
};
use reqwest::Client as HttpClient;
use serde_json::Value;

/// Where the serialized history lives between sessions.
#[async_trait]
pub trait HistoryStorage: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;
    async fn write(&self, key: &str, value: String) -> Result<()>;
}

/// Fetches one remote seed document. `Ok(None)` for a non-success status.
#[async_trait]
pub trait SeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Option<Value>>;
}

/// [`HistoryStorage`] over a [`LocalStore`] file, run on the blocking pool.
#[derive(Clone)]
pub struct FileHistoryStorage {
    store: Arc<Mutex<LocalStore>>,
}

impl FileHistoryStorage {
    pub fn new(path: impl Into<PathBuf>, quota_bytes: Option<usize>) -> Self {
        Self {
            store: Arc::new(Mutex::new(LocalStore::new(path).with_quota(quota_bytes))),
        }
    }

    async fn with_store<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut LocalStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let mut guard = store
                .lock()
                .map_err(|_| anyhow!("local store lock poisoned"))?;
            op(&mut guard)
        })
        .await
        .context("local store task aborted")?
    }
}

#[async_trait]
impl HistoryStorage for FileHistoryStorage {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_store(move |store| Ok(store.get_item(&key))).await
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        let key = key.to_string();
        self.with_store(move |store| store.set_item(&key, value)).await
    }
}

/// In-process storage, optionally capped like a browser's storage quota.
#[derive(Debug, Default)]
pub struct MemoryHistoryStorage {
    items: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryHistoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn with_item(self, key: &str, value: impl Into<String>) -> Self {
        if let Ok(mut items) = self.items.lock() {
            items.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn item(&self, key: &str) -> Option<String> {
        self.items.lock().ok()?.get(key).cloned()
    }
}

#[async_trait]
impl HistoryStorage for MemoryHistoryStorage {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.item(key))
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow!("memory storage lock poisoned"))?;
        if let Some(quota) = self.quota_bytes {
            let others: usize = items
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, value)| existing.len() + value.len())
                .sum();
            let required = others + key.len() + value.len();
            if required > quota {
                return Err(StorageQuotaExceeded { required, quota }.into());
            }
        }
        items.insert(key.to_string(), value);
        Ok(())
    }
}

pub struct HttpSeedSource {
    http: HttpClient,
    timeout: Duration,
}

impl HttpSeedSource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(),
            timeout,
        }
    }
}

#[async_trait]
impl SeedSource for HttpSeedSource {
    async fn fetch(&self, url: &str) -> Result<Option<Value>> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("seed request failed ({url})"))?;
        if !response.status().is_success() {
            tracing::debug!(url, status = response.status().as_u16(), "seed not available");
            return Ok(None);
        }
        let payload = response
            .json::<Value>()
            .await
            .with_context(|| format!("seed returned invalid JSON ({url})"))?;
        Ok(Some(payload))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedCreation {
    pub creation: Creation,
    /// False when a creation with the same id was already in history.
    pub inserted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedCreation {
    pub file_name: String,
    pub json: String,
}

/// Ordered history of creations, most recent first.
///
/// Lifecycle: construct once, call [`Self::load_initial`], then every
/// mutation flushes the whole collection to storage. Persistence is best
/// effort: failures are logged and the in-memory history stays usable.
pub struct CreationStore {
    storage: Arc<dyn HistoryStorage>,
    seeds: Arc<dyn SeedSource>,
    seed_urls: Vec<String>,
    history: Vec<Creation>,
}

impl CreationStore {
    pub fn new(
        storage: Arc<dyn HistoryStorage>,
        seeds: Arc<dyn SeedSource>,
        seed_urls: Vec<String>,
    ) -> Self {
        Self {
            storage,
            seeds,
            seed_urls,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Creation] {
        &self.history
    }

    pub fn get(&self, id: &str) -> Option<&Creation> {
        self.history.iter().find(|creation| creation.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Restores persisted history, or falls back to the remote seeds when
    /// nothing usable is stored. Replaces the in-memory collection.
    pub async fn load_initial(&mut self) -> &[Creation] {
        let persisted = match self.read_persisted().await {
            Ok(persisted) => persisted,
            Err(warning) => {
                tracing::warn!(error = %warning, "ignoring persisted history");
                Vec::new()
            }
        };

        if !persisted.is_empty() {
            tracing::info!(count = persisted.len(), "restored creation history");
            self.history = persisted;
            return &self.history;
        }

        self.history = self.fetch_seeds().await;
        tracing::info!(
            count = self.history.len(),
            requested = self.seed_urls.len(),
            "seeded creation history"
        );
        self.persist().await;
        &self.history
    }

    async fn read_persisted(&self) -> Result<Vec<Creation>, PersistenceWarning> {
        let raw = self
            .storage
            .read(HISTORY_STORAGE_KEY)
            .await
            .map_err(|err| PersistenceWarning::Read(err.into()))?;
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        let rows: Vec<Value> = serde_json::from_str(&raw)
            .map_err(|err| PersistenceWarning::Read(Box::new(err)))?;

        let mut seen = HashSet::new();
        let mut restored = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed = CreationDescriptor::from_value(row).and_then(CreationDescriptor::into_creation);
            match parsed {
                Ok(creation) if seen.insert(creation.id.clone()) => restored.push(creation),
                Ok(creation) => {
                    tracing::warn!(id = %creation.id, "dropping duplicate persisted creation");
                }
                Err(err) => tracing::warn!(error = %err, "dropping invalid persisted creation"),
            }
        }
        Ok(restored)
    }

    async fn fetch_seeds(&self) -> Vec<Creation> {
        let fetches = self.seed_urls.iter().map(|url| self.fetch_seed(url));
        let mut seen = HashSet::new();
        join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .filter(|creation| seen.insert(creation.id.clone()))
            .collect()
    }

    async fn fetch_seed(&self, url: &str) -> Option<Creation> {
        let payload = match self.seeds.fetch(url).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(url, error = %err, "seed fetch failed");
                return None;
            }
        };
        let parsed = CreationDescriptor::from_value(payload).and_then(CreationDescriptor::into_creation);
        match parsed {
            Ok(creation) => Some(creation),
            Err(err) => {
                tracing::warn!(url, error = %err, "seed is not a valid creation");
                None
            }
        }
    }

    /// Writes the full collection when it is non-empty. Returns the warning
    /// (already logged) if the write did not happen.
    pub async fn persist(&self) -> Option<PersistenceWarning> {
        if self.history.is_empty() {
            return None;
        }
        let result = match serde_json::to_string(&self.history) {
            Ok(serialized) => self
                .storage
                .write(HISTORY_STORAGE_KEY, serialized)
                .await
                .map_err(PersistenceWarning::from_write),
            Err(err) => Err(PersistenceWarning::from(err)),
        };
        match result {
            Ok(()) => None,
            Err(warning) => {
                tracing::warn!(
                    error = %warning,
                    entries = self.history.len(),
                    "could not save creation history"
                );
                Some(warning)
            }
        }
    }

    /// Puts a creation at the front of history and persists. A creation
    /// whose id is already present is ignored.
    pub async fn append(&mut self, creation: Creation) -> bool {
        if self.contains(&creation.id) {
            tracing::debug!(id = %creation.id, "creation already in history");
            return false;
        }
        self.history.insert(0, creation);
        self.persist().await;
        true
    }

    /// Parses a user-supplied creation file. The parsed creation is returned
    /// even when its id is already in history; only new ids are inserted.
    pub async fn import_from(
        &mut self,
        raw_json: &str,
    ) -> Result<ImportedCreation, ImportValidationError> {
        let creation = CreationDescriptor::from_json(raw_json)?.into_creation()?;
        let inserted = self.append(creation.clone()).await;
        Ok(ImportedCreation { creation, inserted })
    }

    pub fn export(creation: &Creation) -> serde_json::Result<ExportedCreation> {
        Ok(ExportedCreation {
            file_name: creation.export_file_name(),
            json: creation.to_export_json()?,
        })
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use lifelike_contracts::config::HISTORY_STORAGE_KEY;
    use lifelike_contracts::errors::{IMPORT_FAILED_NOTICE, INVALID_IMPORT_NOTICE};
    use lifelike_contracts::{Creation, ImportValidationError, PersistenceWarning};
    use serde_json::{json, Value};

    use super::testing::{ScriptedSeeds, SeedReply};
    use super::{CreationStore, FileHistoryStorage, HistoryStorage, MemoryHistoryStorage};

    const SEED_A: &str = "https://seeds.test/a.json";
    const SEED_B: &str = "https://seeds.test/b.json";
    const SEED_C: &str = "https://seeds.test/c.json";

    fn creation(id: &str, name: &str) -> Creation {
        Creation {
            id: id.to_string(),
            name: name.to_string(),
            html: format!("<p>{name}</p>"),
            original_image: None,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn seed_urls() -> Vec<String> {
        vec![SEED_A.to_string(), SEED_B.to_string(), SEED_C.to_string()]
    }

    fn store_with(storage: Arc<MemoryHistoryStorage>, seeds: Arc<ScriptedSeeds>) -> CreationStore {
        CreationStore::new(storage, seeds, seed_urls())
    }

    fn two_of_three_seeds() -> ScriptedSeeds {
        ScriptedSeeds::default()
            .with(SEED_A, SeedReply::Json(json!({"name": "Blog", "html": "<p>blog</p>"})))
            .with(SEED_B, SeedReply::Fail)
            .with(
                SEED_C,
                SeedReply::Json(json!({
                    "id": "chess",
                    "name": "Chess",
                    "html": "<p>chess</p>",
                    "timestamp": "2024-05-01T10:00:00.000Z",
                })),
            )
    }

    #[tokio::test]
    async fn load_initial_prefers_persisted_history() -> anyhow::Result<()> {
        let persisted = serde_json::to_string(&vec![creation("b", "Second"), creation("a", "First")])?;
        let storage = Arc::new(MemoryHistoryStorage::new().with_item(HISTORY_STORAGE_KEY, persisted));
        let seeds = Arc::new(two_of_three_seeds());
        let mut store = store_with(storage, seeds.clone());

        let ids: Vec<String> = store.load_initial().await.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(
            store.get("a").map(|c| c.timestamp),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(seeds.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_persisted_history_falls_back_to_surviving_seeds() -> anyhow::Result<()> {
        let storage = Arc::new(MemoryHistoryStorage::new().with_item(HISTORY_STORAGE_KEY, "{oops"));
        let seeds = Arc::new(two_of_three_seeds());
        let mut store = store_with(storage.clone(), seeds.clone());

        let loaded = store.load_initial().await.to_vec();
        assert_eq!(seeds.call_count(), 3);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "Blog");
        assert!(!loaded[0].id.is_empty());
        assert_eq!(loaded[1].id, "chess");
        assert_eq!(
            loaded[1].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );

        let saved: Vec<Value> = serde_json::from_str(&storage.item(HISTORY_STORAGE_KEY).unwrap_or_default())?;
        assert_eq!(saved.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn empty_persisted_array_and_no_seeds_is_an_empty_history() -> anyhow::Result<()> {
        let storage = Arc::new(MemoryHistoryStorage::new().with_item(HISTORY_STORAGE_KEY, "[]"));
        let seeds = Arc::new(ScriptedSeeds::default().with(SEED_A, SeedReply::NotFound));
        let mut store = store_with(storage.clone(), seeds);

        assert!(store.load_initial().await.is_empty());
        assert_eq!(storage.item(HISTORY_STORAGE_KEY).as_deref(), Some("[]"));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_persisted_rows_are_skipped() -> anyhow::Result<()> {
        let persisted = json!([
            {"id": "ok", "name": "Fine", "html": "<p/>", "timestamp": "2025-01-01T00:00:00.000Z"},
            {"id": "bad", "name": "No html"},
            {"id": "ok", "name": "Duplicate", "html": "<p/>"},
        ]);
        let storage = Arc::new(
            MemoryHistoryStorage::new().with_item(HISTORY_STORAGE_KEY, persisted.to_string()),
        );
        let mut store = store_with(storage, Arc::new(ScriptedSeeds::default()));

        let loaded = store.load_initial().await.to_vec();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "Fine");
        Ok(())
    }

    #[tokio::test]
    async fn append_prepends_and_persists() -> anyhow::Result<()> {
        let storage = Arc::new(MemoryHistoryStorage::new());
        let mut store = store_with(storage.clone(), Arc::new(ScriptedSeeds::default()));

        assert!(store.append(creation("a", "First")).await);
        assert!(store.append(creation("b", "Second")).await);
        assert!(!store.append(creation("a", "Again")).await);

        let ids: Vec<&str> = store.history().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        let saved: Vec<Value> = serde_json::from_str(&storage.item(HISTORY_STORAGE_KEY).unwrap_or_default())?;
        assert_eq!(saved[0]["id"], json!("b"));
        assert_eq!(saved[0]["timestamp"], json!("2025-01-01T00:00:00.000Z"));
        Ok(())
    }

    #[tokio::test]
    async fn import_deduplicates_by_id_but_still_returns_record() -> anyhow::Result<()> {
        let mut store = store_with(Arc::new(MemoryHistoryStorage::new()), Arc::new(ScriptedSeeds::default()));
        store.append(creation("a", "First")).await;

        let raw = CreationStore::export(&creation("a", "First"))?.json;
        let imported = store.import_from(&raw).await?;
        assert!(!imported.inserted);
        assert_eq!(imported.creation.id, "a");
        assert_eq!(store.history().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn export_then_import_preserves_record() -> anyhow::Result<()> {
        let mut original = creation("rt-1", "Round Trip");
        original.original_image = Some("data:image/png;base64,iVBORw0K".to_string());
        let exported = CreationStore::export(&original)?;
        assert_eq!(exported.file_name, "round_trip_artifact.json");

        let mut store = store_with(Arc::new(MemoryHistoryStorage::new()), Arc::new(ScriptedSeeds::default()));
        let imported = store.import_from(&exported.json).await?;
        assert!(imported.inserted);
        assert_eq!(imported.creation, original);
        Ok(())
    }

    #[tokio::test]
    async fn import_of_old_record_goes_to_front() -> anyhow::Result<()> {
        let mut store = store_with(Arc::new(MemoryHistoryStorage::new()), Arc::new(ScriptedSeeds::default()));
        store.append(creation("new", "Newest")).await;

        let raw = json!({
            "id": "old",
            "name": "Ancient",
            "html": "<p>old</p>",
            "timestamp": "1999-12-31T23:59:59.000Z",
        })
        .to_string();
        let imported = store.import_from(&raw).await?;
        assert!(imported.inserted);
        assert_eq!(store.history()[0].id, "old");
        Ok(())
    }

    #[tokio::test]
    async fn parseable_non_record_import_reports_invalid_format() -> anyhow::Result<()> {
        let mut store = store_with(Arc::new(MemoryHistoryStorage::new()), Arc::new(ScriptedSeeds::default()));

        let err = store.import_from("42").await.err();
        assert_eq!(
            err.as_ref().map(ImportValidationError::notice),
            Some(INVALID_IMPORT_NOTICE)
        );
        let err = store.import_from("{broken").await.err();
        assert_eq!(
            err.as_ref().map(ImportValidationError::notice),
            Some(IMPORT_FAILED_NOTICE)
        );
        assert!(store.history().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn numeric_id_import_is_accepted_as_text() -> anyhow::Result<()> {
        let mut store = store_with(Arc::new(MemoryHistoryStorage::new()), Arc::new(ScriptedSeeds::default()));

        let imported = store
            .import_from(r#"{"id": 17, "name": "Chess", "html": "<p>c</p>"}"#)
            .await?;
        assert!(imported.inserted);
        assert_eq!(imported.creation.id, "17");
        assert_eq!(store.history()[0].name, "Chess");
        Ok(())
    }

    #[tokio::test]
    async fn loosely_typed_seed_is_kept() -> anyhow::Result<()> {
        let seeds = ScriptedSeeds::default().with(
            SEED_A,
            SeedReply::Json(json!({"id": 3, "name": "Cassette", "html": "<p/>", "timestamp": "2024-06-02"})),
        );
        let mut store = store_with(Arc::new(MemoryHistoryStorage::new()), Arc::new(seeds));

        let loaded = store.load_initial().await.to_vec();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "3");
        assert_eq!(loaded[0].timestamp, Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap());
        Ok(())
    }

    #[tokio::test]
    async fn invalid_import_leaves_history_untouched() -> anyhow::Result<()> {
        let storage = Arc::new(MemoryHistoryStorage::new());
        let mut store = store_with(storage.clone(), Arc::new(ScriptedSeeds::default()));
        store.append(creation("a", "First")).await;

        let missing = store.import_from(r#"{"name": "No html"}"#).await.err();
        assert!(matches!(missing, Some(ImportValidationError::Schema(_))));
        let garbage = store.import_from("not json at all").await.err();
        assert!(matches!(garbage, Some(ImportValidationError::Malformed(_))));
        assert_eq!(store.history().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn quota_failure_is_a_warning_not_an_error() -> anyhow::Result<()> {
        let storage = Arc::new(MemoryHistoryStorage::with_quota(64));
        let mut store = store_with(storage.clone(), Arc::new(ScriptedSeeds::default()));

        let mut big = creation("big", "Big");
        big.html = "x".repeat(500);
        assert!(store.append(big).await);
        assert_eq!(store.history().len(), 1);
        assert_eq!(storage.item(HISTORY_STORAGE_KEY), None);
        assert!(matches!(
            store.persist().await,
            Some(PersistenceWarning::QuotaExceeded(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn file_storage_round_trips_history() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");

        let mut first = CreationStore::new(
            Arc::new(FileHistoryStorage::new(&path, None)),
            Arc::new(ScriptedSeeds::default()),
            Vec::new(),
        );
        first.append(creation("a", "First")).await;
        first.append(creation("b", "Second")).await;

        let storage = FileHistoryStorage::new(&path, None);
        assert!(storage.read(HISTORY_STORAGE_KEY).await?.is_some());
        let mut second = CreationStore::new(Arc::new(storage), Arc::new(ScriptedSeeds::default()), Vec::new());
        let restored = second.load_initial().await.to_vec();
        assert_eq!(restored, first.history().to_vec());
        Ok(())
    }
}

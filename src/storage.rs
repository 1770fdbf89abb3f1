//! Persistent document storage.
//!
//! Documents are plain JSON values grouped by collection and keyed by a
//! numeric id. [`DocumentBackend`] is the driver boundary; [`Documents`]
//! layers typed access, per-document read-modify-write locking and retried
//! writes on top of whichever backend is configured.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;

/// Driver boundary of the document store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    async fn find(&self, collection: &str, id: u64) -> Result<Option<Value>>;

    /// Inserts or fully replaces one document.
    async fn replace(&self, collection: &str, id: u64, doc: Value) -> Result<()>;

    /// Returns whether a document was removed.
    async fn delete(&self, collection: &str, id: u64) -> Result<bool>;

    async fn ids(&self, collection: &str) -> Result<Vec<u64>>;

    /// Removes every document of a collection and returns how many were removed.
    async fn delete_all(&self, collection: &str) -> Result<usize>;

    async fn stats(&self) -> Result<StorageStats>;
}

/// Manager de almacenamiento basado en archivos JSON
///
/// Layout: `{data_dir}/{collection}/doc_{id}.json`. Writes go to a temporary
/// file first and are renamed into place, so a document is never observed
/// half-written.
pub struct JsonStorage {
    data_dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("no se pudo crear {}", data_dir.display()))?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        Ok(Self {
            data_dir,
            tmp_counter: AtomicU64::new(0),
        })
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.data_dir.join(collection)
    }

    fn document_path(&self, collection: &str, id: u64) -> PathBuf {
        self.collection_dir(collection).join(format!("doc_{}.json", id))
    }

    fn parse_id(path: &std::path::Path) -> Option<u64> {
        if path.extension().map_or(true, |ext| ext != "json") {
            return None;
        }
        path.file_stem()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("doc_"))
            .and_then(|id| id.parse().ok())
    }
}

#[async_trait]
impl DocumentBackend for JsonStorage {
    async fn find(&self, collection: &str, id: u64) -> Result<Option<Value>> {
        let path = self.document_path(collection, id);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let doc = serde_json::from_str(&content)
                    .with_context(|| format!("documento corrupto: {}", path.display()))?;
                Ok(Some(doc))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("error leyendo {}", path.display())),
        }
    }

    async fn replace(&self, collection: &str, id: u64, doc: Value) -> Result<()> {
        let dir = self.collection_dir(collection);
        fs::create_dir_all(&dir).await?;

        let path = self.document_path(collection, id);
        let tmp = dir.join(format!(
            "doc_{}.json.{}.tmp",
            id,
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));

        let content = serde_json::to_string_pretty(&doc)?;
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("error escribiendo {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("error reemplazando {}", path.display()));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: u64) -> Result<bool> {
        match fs::remove_file(self.document_path(collection, id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn ids(&self, collection: &str) -> Result<Vec<u64>> {
        let dir = self.collection_dir(collection);
        let mut files = match fs::read_dir(&dir).await {
            Ok(files) => files,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = files.next_entry().await? {
            if let Some(id) = Self::parse_id(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    async fn delete_all(&self, collection: &str) -> Result<usize> {
        let mut removed = 0;
        for id in self.ids(collection).await? {
            if self.delete(collection, id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<StorageStats> {
        let mut documents = 0;
        let mut total_size = 0;

        let mut collections = fs::read_dir(&self.data_dir).await?;
        while let Some(collection) = collections.next_entry().await? {
            if !collection.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(collection.path()).await?;
            while let Some(entry) = files.next_entry().await? {
                if Self::parse_id(&entry.path()).is_some() {
                    documents += 1;
                    if let Ok(metadata) = entry.metadata().await {
                        total_size += metadata.len();
                    }
                }
            }
        }

        Ok(StorageStats {
            backend: "json",
            documents,
            total_size_bytes: total_size,
            data_dir: Some(self.data_dir.clone()),
        })
    }
}

/// In-process backend. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    docs: DashMap<(String, u64), Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentBackend for MemoryStorage {
    async fn find(&self, collection: &str, id: u64) -> Result<Option<Value>> {
        Ok(self
            .docs
            .get(&(collection.to_string(), id))
            .map(|doc| doc.value().clone()))
    }

    async fn replace(&self, collection: &str, id: u64, doc: Value) -> Result<()> {
        self.docs.insert((collection.to_string(), id), doc);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: u64) -> Result<bool> {
        Ok(self.docs.remove(&(collection.to_string(), id)).is_some())
    }

    async fn ids(&self, collection: &str) -> Result<Vec<u64>> {
        let mut ids: Vec<u64> = self
            .docs
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| entry.key().1)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn delete_all(&self, collection: &str) -> Result<usize> {
        let before = self.docs.len();
        self.docs.retain(|key, _| key.0 != collection);
        Ok(before - self.docs.len())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let total_size = self
            .docs
            .iter()
            .map(|entry| entry.value().to_string().len() as u64)
            .sum();

        Ok(StorageStats {
            backend: "memory",
            documents: self.docs.len(),
            total_size_bytes: total_size,
            data_dir: None,
        })
    }
}

/// Typed view over a [`DocumentBackend`].
///
/// Mutations of one document are serialized through a per-document lock so
/// that read-modify-write cycles never interleave; different documents are
/// never blocked by each other. Every backend call goes through the store's
/// [`RetryPolicy`]; a call that still fails afterwards is returned to the
/// caller and nothing is considered written.
#[derive(Clone)]
pub struct Documents {
    backend: Arc<dyn DocumentBackend>,
    locks: Arc<DashMap<(&'static str, u64), Arc<Mutex<()>>>>,
    retry: RetryPolicy,
}

impl Documents {
    pub fn new(backend: Arc<dyn DocumentBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            locks: Arc::new(DashMap::new()),
            retry,
        }
    }

    fn lock_for(&self, collection: &'static str, id: u64) -> Arc<Mutex<()>> {
        self.locks
            .entry((collection, id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load<T: DeserializeOwned>(&self, collection: &'static str, id: u64) -> Result<Option<T>> {
        let raw = self
            .retry
            .run("lectura de documento", |_| self.backend.find(collection, id))
            .await?;

        raw.map(|value| {
            serde_json::from_value(value)
                .with_context(|| format!("documento {}/{} con formato inválido", collection, id))
        })
        .transpose()
    }

    async fn store<T: Serialize>(&self, collection: &'static str, id: u64, doc: &T) -> Result<()> {
        let value = serde_json::to_value(doc)?;
        self.retry
            .run("escritura de documento", |_| {
                self.backend.replace(collection, id, value.clone())
            })
            .await
            .with_context(|| format!("no se pudo guardar {}/{}", collection, id))
    }

    pub async fn get<T: DeserializeOwned>(&self, collection: &'static str, id: u64) -> Result<Option<T>> {
        self.load(collection, id).await
    }

    pub async fn upsert<T: Serialize>(&self, collection: &'static str, id: u64, doc: &T) -> Result<()> {
        let lock = self.lock_for(collection, id);
        let _guard = lock.lock().await;
        self.store(collection, id, doc).await
    }

    /// Atomic read-modify-write of one document.
    ///
    /// A missing document starts from `init()`. The document is written back
    /// only when `f` succeeds; an error from `f` leaves storage untouched.
    pub async fn update<T, R, E, I, F>(
        &self,
        collection: &'static str,
        id: u64,
        init: I,
        f: F,
    ) -> std::result::Result<R, E>
    where
        T: Serialize + DeserializeOwned,
        I: FnOnce() -> T,
        F: FnOnce(&mut T) -> std::result::Result<R, E>,
        E: From<anyhow::Error>,
    {
        let lock = self.lock_for(collection, id);
        let _guard = lock.lock().await;

        let mut doc = self.load(collection, id).await?.unwrap_or_else(init);
        let out = f(&mut doc)?;
        self.store(collection, id, &doc).await?;
        debug!("💾 Documento {}/{} actualizado", collection, id);
        Ok(out)
    }

    pub async fn delete(&self, collection: &'static str, id: u64) -> Result<bool> {
        let lock = self.lock_for(collection, id);
        let _guard = lock.lock().await;
        self.retry
            .run("borrado de documento", |_| self.backend.delete(collection, id))
            .await
    }

    pub async fn ids(&self, collection: &'static str) -> Result<Vec<u64>> {
        self.retry
            .run("listado de documentos", |_| self.backend.ids(collection))
            .await
    }

    pub async fn delete_all(&self, collection: &'static str) -> Result<usize> {
        let removed = self
            .retry
            .run("borrado de colección", |_| self.backend.delete_all(collection))
            .await?;
        if removed > 0 {
            info!("🗑️ {} documentos eliminados de '{}'", removed, collection);
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        self.backend.stats().await.map_err(|e| {
            warn!("No se pudieron obtener estadísticas de storage: {}", e);
            e
        })
    }
}

/// Estadísticas de almacenamiento
#[derive(Debug)]
pub struct StorageStats {
    pub backend: &'static str,
    pub documents: usize,
    pub total_size_bytes: u64,
    pub data_dir: Option<PathBuf>,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let location = self
            .data_dir
            .as_ref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "(memoria)".to_string());
        write!(
            f,
            "📊 Storage Stats ({}):\n\
             📁 Data Directory: {}\n\
             📝 Documents: {}\n\
             📦 Total Size: {} bytes ({:.2} KB)",
            self.backend,
            location,
            self.documents,
            self.total_size_bytes,
            self.total_size_bytes as f64 / 1024.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        id: u64,
        value: u32,
    }

    #[tokio::test]
    async fn json_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();

        assert_eq!(storage.find("songs", 7).await.unwrap(), None);

        storage
            .replace("songs", 7, serde_json::json!({"id": 7, "queue": ["a"]}))
            .await
            .unwrap();
        storage
            .replace("songs", 3, serde_json::json!({"id": 3, "queue": []}))
            .await
            .unwrap();

        let doc = storage.find("songs", 7).await.unwrap().unwrap();
        assert_eq!(doc["queue"][0], "a");
        assert_eq!(storage.ids("songs").await.unwrap(), vec![3, 7]);
        assert!(dir.path().join("songs").join("doc_7.json").exists());

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.documents, 2);

        assert!(storage.delete("songs", 3).await.unwrap());
        assert!(!storage.delete("songs", 3).await.unwrap());
        assert_eq!(storage.delete_all("songs").await.unwrap(), 1);
        assert!(storage.ids("songs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn json_storage_ignores_stray_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        storage
            .replace("volumes", 1, serde_json::json!({"id": 1, "volume": 0.5}))
            .await
            .unwrap();
        std::fs::write(dir.path().join("volumes").join("notes.txt"), "x").unwrap();

        assert_eq!(storage.ids("volumes").await.unwrap(), vec![1]);
        assert!(storage.ids("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_writes() {
        let docs = Documents::new(Arc::new(MemoryStorage::new()), RetryPolicy::default());

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let docs = docs.clone();
                tokio::spawn(async move {
                    docs.update(
                        "counters",
                        1,
                        || Counter { id: 1, value: 0 },
                        |c: &mut Counter| -> Result<()> {
                            c.value += 1;
                            Ok(())
                        },
                    )
                    .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let counter: Counter = docs.get("counters", 1).await.unwrap().unwrap();
        assert_eq!(counter, Counter { id: 1, value: 50 });
    }

    #[tokio::test]
    async fn failed_mutation_is_not_written() {
        let docs = Documents::new(Arc::new(MemoryStorage::new()), RetryPolicy::default());
        docs.upsert("counters", 2, &Counter { id: 2, value: 5 })
            .await
            .unwrap();

        let result = docs
            .update("counters", 2, Counter::default, |c: &mut Counter| {
                c.value = 99;
                Err::<(), _>(anyhow::anyhow!("rechazado"))
            })
            .await;

        assert!(result.is_err());
        let counter: Counter = docs.get("counters", 2).await.unwrap().unwrap();
        assert_eq!(counter.value, 5);
    }

    #[tokio::test]
    async fn transient_write_failures_are_retried() {
        let mut backend = MockDocumentBackend::new();
        backend.expect_find().returning(|_, _| Ok(None));

        let mut failures = 2;
        backend.expect_replace().times(3).returning(move |_, _, _| {
            if failures > 0 {
                failures -= 1;
                Err(anyhow::anyhow!("conexión reiniciada"))
            } else {
                Ok(())
            }
        });

        let docs = Documents::new(
            Arc::new(backend),
            RetryPolicy::fixed(5, Duration::ZERO),
        );

        let value = docs
            .update("counters", 3, Counter::default, |c: &mut Counter| -> Result<u32> {
                c.value = 1;
                Ok(c.value)
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn exhausted_write_retries_surface_an_error() {
        let mut backend = MockDocumentBackend::new();
        backend
            .expect_replace()
            .times(2)
            .returning(|_, _, _| Err(anyhow::anyhow!("sin conexión")));

        let docs = Documents::new(Arc::new(backend), RetryPolicy::fixed(2, Duration::ZERO));
        let result = docs.upsert("counters", 4, &Counter::default()).await;
        assert!(result.is_err());
    }
}

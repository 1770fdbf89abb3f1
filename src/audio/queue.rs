use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId};
use tracing::{debug, info};

use crate::{
    error::{MusicError, MusicResult},
    storage::Documents,
};

pub const SONGS_COLLECTION: &str = "songs";
pub const VOLUMES_COLLECTION: &str = "volumes";
pub const RESTART_COLLECTION: &str = "restart_resume";

pub const MIN_VOLUME: f32 = 0.01;
pub const MAX_VOLUME: f32 = 1.0;

/// Una canción pendiente en la cola.
///
/// Se persiste como `"referencia"` o, si hay que reanudar, como
/// `["referencia", segundos]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredEntry", into = "StoredEntry")]
pub struct QueueEntry {
    pub reference: String,
    pub resume_offset_secs: Option<u64>,
}

impl QueueEntry {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            resume_offset_secs: None,
        }
    }

    pub fn resuming(reference: impl Into<String>, offset_secs: u64) -> Self {
        Self {
            reference: reference.into(),
            resume_offset_secs: Some(offset_secs),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Plain(String),
    Resume(String, u64),
}

impl From<StoredEntry> for QueueEntry {
    fn from(stored: StoredEntry) -> Self {
        match stored {
            StoredEntry::Plain(reference) => Self::new(reference),
            StoredEntry::Resume(reference, offset) => Self::resuming(reference, offset),
        }
    }
}

impl From<QueueEntry> for StoredEntry {
    fn from(entry: QueueEntry) -> Self {
        match entry.resume_offset_secs {
            Some(offset) => Self::Resume(entry.reference, offset),
            None => Self::Plain(entry.reference),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GuildDocument {
    id: u64,
    #[serde(default)]
    queue: Vec<QueueEntry>,
    #[serde(rename = "loop", default)]
    loop_enabled: bool,
    #[serde(default)]
    text_channel_id: Option<u64>,
}

impl GuildDocument {
    fn new(guild_id: GuildId) -> Self {
        Self {
            id: guild_id.get(),
            queue: Vec::new(),
            loop_enabled: false,
            text_channel_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VolumeDocument {
    id: u64,
    volume: f32,
}

/// Canal de voz que debe reconectarse en el próximo arranque
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartRecord {
    #[serde(rename = "id")]
    pub channel_id: u64,
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
}

/// Estado persistido de la cola de un guild
#[derive(Debug, Clone, PartialEq)]
pub struct GuildQueue {
    pub guild_id: GuildId,
    pub entries: Vec<QueueEntry>,
    pub loop_enabled: bool,
    pub volume: f32,
    pub notify_channel_id: Option<ChannelId>,
}

impl GuildQueue {
    /// Obtiene una página específica de la cola (páginas desde 1)
    pub fn page(&self, page: usize, per_page: usize) -> QueuePage {
        let per_page = per_page.max(1);
        let total_pages = self.entries.len().div_ceil(per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * per_page;

        QueuePage {
            entries: self
                .entries
                .iter()
                .enumerate()
                .skip(start)
                .take(per_page)
                .map(|(i, entry)| (i + 1, entry.clone()))
                .collect(),
            current_page,
            total_pages,
            total_items: self.entries.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePage {
    /// Posición externa (base 1) y entrada.
    pub entries: Vec<(usize, QueueEntry)>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

/// Store de colas por guild.
///
/// Cada mutación es una única lectura-modificación-escritura del documento del
/// guild y queda persistida al volver.
#[derive(Clone)]
pub struct GuildQueueStore {
    docs: Documents,
    default_volume: f32,
}

impl GuildQueueStore {
    pub fn new(docs: Documents, default_volume: f32) -> Self {
        Self {
            docs,
            default_volume: clamp_volume(default_volume, 0.5),
        }
    }

    pub fn documents(&self) -> &Documents {
        &self.docs
    }

    async fn update<R>(
        &self,
        guild_id: GuildId,
        f: impl FnOnce(&mut GuildDocument) -> MusicResult<R>,
    ) -> MusicResult<R> {
        self.docs
            .update(SONGS_COLLECTION, guild_id.get(), || GuildDocument::new(guild_id), f)
            .await
    }

    async fn document(&self, guild_id: GuildId) -> MusicResult<GuildDocument> {
        Ok(self
            .docs
            .get(SONGS_COLLECTION, guild_id.get())
            .await?
            .unwrap_or_else(|| GuildDocument::new(guild_id)))
    }

    pub async fn get(&self, guild_id: GuildId) -> MusicResult<GuildQueue> {
        let doc = self.document(guild_id).await?;
        let volume = self.volume(guild_id).await?;

        Ok(GuildQueue {
            guild_id,
            entries: doc.queue,
            loop_enabled: doc.loop_enabled,
            volume,
            notify_channel_id: doc.text_channel_id.map(ChannelId::new),
        })
    }

    /// Agrega una canción al final (o al inicio) y devuelve el nuevo largo
    pub async fn append(&self, guild_id: GuildId, entry: QueueEntry, at_front: bool) -> MusicResult<usize> {
        self.bulk_append(guild_id, vec![entry], at_front).await
    }

    /// Agrega varias canciones conservando su orden interno
    pub async fn bulk_append(
        &self,
        guild_id: GuildId,
        entries: Vec<QueueEntry>,
        at_front: bool,
    ) -> MusicResult<usize> {
        let added = entries.len();
        let len = self
            .update(guild_id, |doc| {
                if at_front {
                    let rest = std::mem::replace(&mut doc.queue, entries);
                    doc.queue.extend(rest);
                } else {
                    doc.queue.extend(entries);
                }
                Ok(doc.queue.len())
            })
            .await?;

        info!(
            "➕ {} canciones agregadas {} de la cola de guild {}",
            added,
            if at_front { "al inicio" } else { "al final" },
            guild_id
        );
        Ok(len)
    }

    /// Saca la primera canción. Nunca reencola por loop.
    pub async fn pop_front(&self, guild_id: GuildId) -> MusicResult<Option<QueueEntry>> {
        self.update(guild_id, |doc| {
            Ok((!doc.queue.is_empty()).then(|| doc.queue.remove(0)))
        })
        .await
    }

    /// Cierra la canción que terminó de sonar: con loop vuelve al final de la cola.
    ///
    /// La entrada ya salió de la cola al empezar a sonar, así que reaparece una
    /// sola vez por reproducción aunque la cola se haya mezclado o editado.
    pub async fn finish_current(&self, guild_id: GuildId, reference: &str) -> MusicResult<()> {
        self.update(guild_id, |doc| {
            if doc.loop_enabled {
                doc.queue.push(QueueEntry::new(reference));
                debug!("🔁 {} reencolada por loop", reference);
            }
            Ok(())
        })
        .await
    }

    /// Reencola al inicio la canción interrumpida (con su punto de reanudación)
    pub async fn requeue_front(&self, guild_id: GuildId, entry: QueueEntry) -> MusicResult<()> {
        self.update(guild_id, |doc| {
            doc.queue.insert(0, entry);
            Ok(())
        })
        .await
    }

    /// Elimina por posición externa (base 1)
    pub async fn remove_at(&self, guild_id: GuildId, index: usize) -> MusicResult<QueueEntry> {
        self.update(guild_id, |doc| {
            let len = doc.queue.len();
            if index == 0 || index > len {
                return Err(MusicError::IndexError { index, len });
            }
            Ok(doc.queue.remove(index - 1))
        })
        .await
    }

    pub async fn clear(&self, guild_id: GuildId) -> MusicResult<usize> {
        let removed = self
            .update(guild_id, |doc| Ok(std::mem::take(&mut doc.queue).len()))
            .await?;
        info!("🗑️ Cola limpiada en guild {} ({} canciones)", guild_id, removed);
        Ok(removed)
    }

    /// Mezcla la cola
    pub async fn shuffle(&self, guild_id: GuildId) -> MusicResult<usize> {
        self.update(guild_id, |doc| {
            doc.queue.shuffle(&mut rand::thread_rng());
            Ok(doc.queue.len())
        })
        .await
    }

    pub async fn set_loop(&self, guild_id: GuildId, enabled: bool) -> MusicResult<()> {
        self.update(guild_id, |doc| {
            doc.loop_enabled = enabled;
            Ok(())
        })
        .await
    }

    pub async fn toggle_loop(&self, guild_id: GuildId) -> MusicResult<bool> {
        let enabled = self
            .update(guild_id, |doc| {
                doc.loop_enabled = !doc.loop_enabled;
                Ok(doc.loop_enabled)
            })
            .await?;

        if enabled {
            info!("🔁 Loop activado en guild {}", guild_id);
        } else {
            info!("➡️ Loop desactivado en guild {}", guild_id);
        }
        Ok(enabled)
    }

    pub async fn set_notify_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<()> {
        self.update(guild_id, |doc| {
            doc.text_channel_id = Some(channel_id.get());
            Ok(())
        })
        .await
    }

    /// Guarda el volumen por defecto y devuelve el valor efectivo
    pub async fn set_volume(&self, guild_id: GuildId, volume: f32) -> MusicResult<f32> {
        let volume = clamp_volume(volume, self.default_volume);
        self.docs
            .upsert(
                VOLUMES_COLLECTION,
                guild_id.get(),
                &VolumeDocument {
                    id: guild_id.get(),
                    volume,
                },
            )
            .await?;
        Ok(volume)
    }

    pub async fn volume(&self, guild_id: GuildId) -> MusicResult<f32> {
        let doc: Option<VolumeDocument> = self.docs.get(VOLUMES_COLLECTION, guild_id.get()).await?;
        Ok(doc
            .map(|d| clamp_volume(d.volume, self.default_volume))
            .unwrap_or(self.default_volume))
    }

    pub async fn put_restart_record(&self, channel_id: ChannelId) -> MusicResult<()> {
        let record = RestartRecord {
            channel_id: channel_id.get(),
            requested_at: Some(Utc::now()),
        };
        self.docs
            .upsert(RESTART_COLLECTION, channel_id.get(), &record)
            .await?;
        Ok(())
    }

    pub async fn restart_records(&self) -> MusicResult<Vec<RestartRecord>> {
        let mut records = Vec::new();
        for id in self.docs.ids(RESTART_COLLECTION).await? {
            let record = self
                .docs
                .get::<RestartRecord>(RESTART_COLLECTION, id)
                .await?
                .unwrap_or(RestartRecord {
                    channel_id: id,
                    requested_at: None,
                });
            records.push(record);
        }
        Ok(records)
    }

    pub async fn clear_restart_records(&self) -> MusicResult<usize> {
        Ok(self.docs.delete_all(RESTART_COLLECTION).await?)
    }
}

/// Limita el volumen a `[MIN_VOLUME, MAX_VOLUME]`; valores no finitos usan `fallback`
pub fn clamp_volume(volume: f32, fallback: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(MIN_VOLUME, MAX_VOLUME)
    } else {
        fallback.clamp(MIN_VOLUME, MAX_VOLUME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{retry::RetryPolicy, storage::MemoryStorage};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const GUILD: GuildId = GuildId::new(1);

    fn store() -> GuildQueueStore {
        let docs = Documents::new(Arc::new(MemoryStorage::new()), RetryPolicy::default());
        GuildQueueStore::new(docs, 0.5)
    }

    fn refs(queue: &GuildQueue) -> Vec<&str> {
        queue.entries.iter().map(|e| e.reference.as_str()).collect()
    }

    #[tokio::test]
    async fn append_and_pop_are_fifo() {
        let store = store();
        for r in ["a", "b", "c"] {
            store.append(GUILD, QueueEntry::new(r), false).await.unwrap();
        }

        let mut popped = Vec::new();
        while let Some(entry) = store.pop_front(GUILD).await.unwrap() {
            popped.push(entry.reference);
        }
        assert_eq!(popped, vec!["a", "b", "c"]);
        assert_eq!(store.pop_front(GUILD).await.unwrap(), None);
    }

    #[tokio::test]
    async fn tenants_do_not_interfere() {
        let store = store();
        let tasks: Vec<_> = (1..=4u64)
            .map(|g| {
                let store = store.clone();
                tokio::spawn(async move {
                    let guild = GuildId::new(g);
                    for i in 0..20 {
                        store
                            .append(guild, QueueEntry::new(format!("{}-{}", g, i)), false)
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        for g in 1..=4u64 {
            let queue = store.get(GuildId::new(g)).await.unwrap();
            let expected: Vec<String> = (0..20).map(|i| format!("{}-{}", g, i)).collect();
            assert_eq!(refs(&queue), expected.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn bulk_front_insert_keeps_batch_order() {
        let store = store();
        store.append(GUILD, QueueEntry::new("x"), false).await.unwrap();
        store
            .bulk_append(GUILD, vec![QueueEntry::new("a"), QueueEntry::new("b")], true)
            .await
            .unwrap();

        assert_eq!(refs(&store.get(GUILD).await.unwrap()), vec!["a", "b", "x"]);
    }

    #[tokio::test]
    async fn remove_at_is_one_based_and_bounded() {
        let store = store();
        for r in ["a", "b", "c"] {
            store.append(GUILD, QueueEntry::new(r), false).await.unwrap();
        }

        for index in [0, 4, 100] {
            let err = store.remove_at(GUILD, index).await.unwrap_err();
            assert!(matches!(err, MusicError::IndexError { len: 3, .. }));
        }
        assert_eq!(refs(&store.get(GUILD).await.unwrap()), vec!["a", "b", "c"]);

        let removed = store.remove_at(GUILD, 2).await.unwrap();
        assert_eq!(removed.reference, "b");
        assert_eq!(refs(&store.get(GUILD).await.unwrap()), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn looped_single_track_stays_single() {
        let store = store();
        store.set_loop(GUILD, true).await.unwrap();
        store.append(GUILD, QueueEntry::new("a"), false).await.unwrap();

        let playing = store.pop_front(GUILD).await.unwrap().unwrap();
        store.finish_current(GUILD, &playing.reference).await.unwrap();
        assert_eq!(refs(&store.get(GUILD).await.unwrap()), vec!["a"]);

        store.append(GUILD, QueueEntry::new("b"), false).await.unwrap();
        let playing = store.pop_front(GUILD).await.unwrap().unwrap();
        store.finish_current(GUILD, &playing.reference).await.unwrap();
        assert_eq!(refs(&store.get(GUILD).await.unwrap()), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn finishing_without_loop_keeps_queue() {
        let store = store();
        store.append(GUILD, QueueEntry::new("b"), false).await.unwrap();
        store.finish_current(GUILD, "a").await.unwrap();
        assert_eq!(refs(&store.get(GUILD).await.unwrap()), vec!["b"]);
    }

    #[tokio::test]
    async fn looped_track_is_appended_once_after_reorder() {
        let store = store();
        store.set_loop(GUILD, true).await.unwrap();
        for r in ["a", "b", "c"] {
            store.append(GUILD, QueueEntry::new(r), false).await.unwrap();
        }

        let playing = store.pop_front(GUILD).await.unwrap().unwrap();
        store.shuffle(GUILD).await.unwrap();
        store.finish_current(GUILD, &playing.reference).await.unwrap();

        let queue = store.get(GUILD).await.unwrap();
        assert_eq!(queue.entries.len(), 3);
        assert_eq!(refs(&queue).iter().filter(|r| **r == "a").count(), 1);
        assert_eq!(refs(&queue).last(), Some(&"a"));
    }

    #[tokio::test]
    async fn requeue_inserts_resume_point_at_front() {
        let store = store();
        store.append(GUILD, QueueEntry::new("b"), false).await.unwrap();

        store
            .requeue_front(GUILD, QueueEntry::resuming("a", 42))
            .await
            .unwrap();
        let queue = store.get(GUILD).await.unwrap();
        assert_eq!(
            queue.entries,
            vec![QueueEntry::resuming("a", 42), QueueEntry::new("b")]
        );
    }

    #[tokio::test]
    async fn persisted_document_shape() {
        let store = store();
        store.append(GUILD, QueueEntry::new("a"), false).await.unwrap();
        store
            .append(GUILD, QueueEntry::resuming("b", 30), false)
            .await
            .unwrap();
        store.set_loop(GUILD, true).await.unwrap();
        store.set_notify_channel(GUILD, ChannelId::new(99)).await.unwrap();

        let raw: serde_json::Value = store
            .documents()
            .get(SONGS_COLLECTION, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            raw,
            serde_json::json!({
                "id": 1,
                "queue": ["a", ["b", 30]],
                "loop": true,
                "text_channel_id": 99
            })
        );
    }

    #[tokio::test]
    async fn volume_is_clamped_and_defaulted() {
        let store = store();
        assert_eq!(store.volume(GUILD).await.unwrap(), 0.5);

        assert_eq!(store.set_volume(GUILD, 3.0).await.unwrap(), 1.0);
        assert_eq!(store.set_volume(GUILD, 0.0).await.unwrap(), MIN_VOLUME);
        assert_eq!(store.set_volume(GUILD, f32::NAN).await.unwrap(), 0.5);
        assert_eq!(store.set_volume(GUILD, 0.3).await.unwrap(), 0.3);
        assert_eq!(store.get(GUILD).await.unwrap().volume, 0.3);
    }

    #[tokio::test]
    async fn shuffle_is_a_permutation() {
        let store = store();
        let entries: Vec<_> = (0..30).map(|i| QueueEntry::new(i.to_string())).collect();
        store.bulk_append(GUILD, entries, false).await.unwrap();

        store.shuffle(GUILD).await.unwrap();
        let mut shuffled: Vec<String> = store
            .get(GUILD)
            .await
            .unwrap()
            .entries
            .into_iter()
            .map(|e| e.reference)
            .collect();
        shuffled.sort_by_key(|r| r.parse::<u32>().unwrap());
        assert_eq!(shuffled, (0..30).map(|i| i.to_string()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn restart_records_round_trip() {
        let store = store();
        store.put_restart_record(ChannelId::new(10)).await.unwrap();
        store.put_restart_record(ChannelId::new(20)).await.unwrap();
        store.put_restart_record(ChannelId::new(10)).await.unwrap();

        let ids: Vec<u64> = store
            .restart_records()
            .await
            .unwrap()
            .iter()
            .map(|r| r.channel_id)
            .collect();
        assert_eq!(ids, vec![10, 20]);

        assert_eq!(store.clear_restart_records().await.unwrap(), 2);
        assert!(store.restart_records().await.unwrap().is_empty());
    }

    #[test]
    fn pages_are_one_based() {
        let queue = GuildQueue {
            guild_id: GUILD,
            entries: (0..25).map(|i| QueueEntry::new(i.to_string())).collect(),
            loop_enabled: false,
            volume: 0.5,
            notify_channel_id: None,
        };

        let page = queue.page(3, 10);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.entries.first().map(|(i, _)| *i), Some(21));
        assert_eq!(page.entries.len(), 5);

        assert_eq!(queue.page(99, 10).current_page, 3);
        assert_eq!(queue.page(0, 10).current_page, 1);
    }
}

//! Dobles de prueba para el transporte de voz, las notificaciones y las fuentes.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    audio::{
        player::{PlaybackController, PlayerManager},
        queue::{GuildQueueStore, QueueEntry},
        transport::{
            CompletionCallback, Notice, NotificationSink, OutputConnection, OutputTransport,
            StreamHandle,
        },
    },
    cache::TrackInfoCache,
    retry::RetryPolicy,
    sources::{SearchCandidate, SortOrder, SourceError, StreamMetadata, StreamSource, TrackResolver},
    storage::{Documents, MemoryStorage},
};

/// Espera (cediendo el scheduler) hasta que la condición se cumpla
macro_rules! eventually {
    ($cond:expr) => {{
        let mut satisfied = false;
        for _ in 0..500 {
            if $cond {
                satisfied = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(satisfied, "condición no cumplida: {}", stringify!($cond));
    }};
}
pub(crate) use eventually;

/// Fuente en memoria: `name` se resuelve a `stream://name` con título `Title name`
pub struct FakeSource {
    known: Vec<String>,
}

impl FakeSource {
    pub fn new(known: &[&str]) -> Self {
        Self {
            known: known.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn lookup(&self, reference: &str) -> Result<&String, SourceError> {
        self.known
            .iter()
            .find(|k| k.as_str() == reference)
            .ok_or_else(|| SourceError::NotFound(reference.to_string()))
    }
}

#[async_trait]
impl StreamSource for FakeSource {
    async fn fetch(&self, reference: &str) -> Result<StreamMetadata, SourceError> {
        let name = self.lookup(reference)?;
        Ok(StreamMetadata {
            stream_url: format!("stream://{}", name),
            title: format!("Title {}", name),
            webpage_url: name.clone(),
            duration_ms: Some(180_000),
            thumbnail_url: None,
        })
    }

    async fn search(
        &self,
        _query: &str,
        _order: SortOrder,
        _limit: usize,
    ) -> Result<Vec<SearchCandidate>, SourceError> {
        Ok(Vec::new())
    }

    async fn expand_playlist(
        &self,
        _link: &str,
        _limit: usize,
    ) -> Result<Option<Vec<String>>, SourceError> {
        Ok(None)
    }

    async fn title(&self, reference: &str) -> Result<String, SourceError> {
        Ok(format!("Title {}", self.lookup(reference)?))
    }

}

/// Stream registrado por [`FakeConnection`]
pub struct FakeStream {
    pub url: String,
    pub offset_secs: u64,
    started_at_secs: u64,
    gain: Mutex<f32>,
    stopped: AtomicBool,
    paused: AtomicBool,
    on_end: Mutex<Option<CompletionCallback>>,
}

impl FakeStream {
    pub fn gain(&self) -> f32 {
        *self.gain.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Simula el fin natural del stream
    pub fn finish(&self) {
        let on_end = self.on_end.lock().take();
        if let Some(on_end) = on_end {
            on_end();
        }
    }
}

impl StreamHandle for FakeStream {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.finish();
    }

    fn set_gain(&self, gain: f32) {
        *self.gain.lock() = gain;
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn play(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn start_offset_secs(&self) -> u64 {
        self.started_at_secs
    }
}

pub struct FakeConnection {
    guild_id: GuildId,
    channel_id: ChannelId,
    live: AtomicBool,
    seekable: bool,
    streams: Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeConnection {
    pub fn started(&self) -> Vec<Arc<FakeStream>> {
        self.streams.lock().clone()
    }

    pub fn started_urls(&self) -> Vec<String> {
        self.streams.lock().iter().map(|s| s.url.clone()).collect()
    }

    pub fn latest(&self) -> Option<Arc<FakeStream>> {
        self.streams.lock().last().cloned()
    }

    pub fn finish_latest(&self) {
        if let Some(stream) = self.latest() {
            stream.finish();
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Simula una caída de la conexión
    pub fn drop_link(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutputConnection for FakeConnection {
    fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn is_connected(&self) -> bool {
        self.is_live()
    }

    async fn stream(
        &self,
        stream_url: &str,
        offset_secs: u64,
        gain: f32,
        on_end: CompletionCallback,
    ) -> Result<Arc<dyn StreamHandle>> {
        if !self.is_live() {
            anyhow::bail!("conexión cerrada");
        }

        let stream = Arc::new(FakeStream {
            url: stream_url.to_string(),
            offset_secs,
            started_at_secs: if self.seekable { offset_secs } else { 0 },
            gain: Mutex::new(gain),
            stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            on_end: Mutex::new(Some(on_end)),
        });
        self.streams.lock().push(stream.clone());
        Ok(stream)
    }

    async fn disconnect(&self) -> Result<()> {
        self.live.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Transporte que crea una conexión nueva por cada `connect`
#[derive(Default)]
pub struct FakeTransport {
    routes: DashMap<ChannelId, GuildId>,
    connections: DashMap<ChannelId, Arc<FakeConnection>>,
    rejects_seeks: AtomicBool,
    pub connects: AtomicUsize,
}

impl FakeTransport {
    pub fn route(&self, channel_id: ChannelId, guild_id: GuildId) {
        self.routes.insert(channel_id, guild_id);
    }

    pub fn connection(&self, channel_id: ChannelId) -> Option<Arc<FakeConnection>> {
        self.connections.get(&channel_id).map(|c| c.clone())
    }

    /// Las conexiones nuevas empiezan todos los streams desde 0
    pub fn reject_seeks(&self) {
        self.rejects_seeks.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutputTransport for FakeTransport {
    async fn connect(&self, channel_id: ChannelId) -> Result<Arc<dyn OutputConnection>> {
        let guild_id = self
            .routes
            .get(&channel_id)
            .map(|g| *g)
            .ok_or_else(|| anyhow::anyhow!("canal desconocido: {}", channel_id))?;

        self.connects.fetch_add(1, Ordering::SeqCst);
        let connection = Arc::new(FakeConnection {
            guild_id,
            channel_id,
            live: AtomicBool::new(true),
            seekable: !self.rejects_seeks.load(Ordering::SeqCst),
            streams: Mutex::new(Vec::new()),
        });
        self.connections.insert(channel_id, connection.clone());
        Ok(connection)
    }
}

/// Sink que guarda los mensajes por canal
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<HashMap<ChannelId, Vec<Notice>>>,
    edits: AtomicUsize,
}

impl RecordingSink {
    pub fn notices(&self, channel_id: ChannelId) -> Vec<Notice> {
        self.messages
            .lock()
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn edits(&self) -> usize {
        self.edits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, channel_id: ChannelId, notice: &Notice) -> Result<()> {
        self.messages
            .lock()
            .entry(channel_id)
            .or_default()
            .push(notice.clone());
        Ok(())
    }

    async fn edit_last_if_matching(
        &self,
        channel_id: ChannelId,
        predicate: &(dyn for<'n> Fn(&'n Notice) -> bool + Send + Sync),
        notice: &Notice,
    ) -> Result<bool> {
        let mut messages = self.messages.lock();
        match messages.get_mut(&channel_id).and_then(|m| m.last_mut()) {
            Some(last) if predicate(last) => {
                *last = notice.clone();
                self.edits.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Todo lo necesario para probar controladores sin red ni disco
pub struct Harness {
    pub store: GuildQueueStore,
    pub resolver: Arc<TrackResolver>,
    pub transport: Arc<FakeTransport>,
    pub sink: Arc<RecordingSink>,
    pub players: Arc<PlayerManager>,
}

impl Harness {
    pub fn new(known: &[&str]) -> Self {
        let docs = Documents::new(
            Arc::new(MemoryStorage::new()),
            RetryPolicy::fixed(3, Duration::ZERO),
        );
        Self::with_store(GuildQueueStore::new(docs, 0.5), known)
    }

    /// Simula un proceso nuevo sobre los mismos datos persistidos
    pub fn sharing_store(other: &Harness, known: &[&str]) -> Self {
        Self::with_store(other.store.clone(), known)
    }

    fn with_store(store: GuildQueueStore, known: &[&str]) -> Self {
        let resolver = Arc::new(TrackResolver::new(
            Arc::new(FakeSource::new(known)),
            None,
            Arc::new(TrackInfoCache::new()),
            RetryPolicy::fixed(3, Duration::ZERO),
            10,
            100,
        ));
        let sink = Arc::new(RecordingSink::default());
        let players = Arc::new(PlayerManager::new(
            store.clone(),
            resolver.clone(),
            sink.clone(),
        ));

        Self {
            store,
            resolver,
            transport: Arc::new(FakeTransport::default()),
            sink,
            players,
        }
    }

    pub async fn seed(&self, guild_id: GuildId, references: &[&str]) {
        let entries = references.iter().map(|r| QueueEntry::new(*r)).collect();
        self.store
            .bulk_append(guild_id, entries, false)
            .await
            .expect("seed");
    }

    /// Conecta el guild al canal y entrega la conexión al controlador
    pub async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Arc<PlaybackController> {
        self.transport.route(channel_id, guild_id);
        let connection = self.transport.connect(channel_id).await.expect("connect");
        self.players
            .on_connection_established(guild_id, connection)
            .await
            .expect("attach");
        self.players.controller(guild_id)
    }

    pub fn connection(&self, channel_id: ChannelId) -> Arc<FakeConnection> {
        self.transport
            .connection(channel_id)
            .expect("sin conexión para el canal")
    }
}

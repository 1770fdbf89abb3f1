use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        queue::{GuildQueueStore, QueueEntry},
        transport::{CompletionCallback, Notice, NotificationSink, OutputConnection, StreamHandle},
    },
    error::{MusicError, MusicResult},
    sources::{TrackDescriptor, TrackResolver},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// Canción que está sonando en la sesión
struct NowPlaying {
    /// Referencia tal como estaba en la cola.
    reference: String,
    track: Arc<TrackDescriptor>,
    handle: Arc<dyn StreamHandle>,
    offset_secs: u64,
    played: Duration,
    /// `None` mientras está en pausa in situ.
    resumed_at: Option<Instant>,
}

impl NowPlaying {
    fn position(&self) -> Duration {
        let running = self.resumed_at.map(|at| at.elapsed()).unwrap_or_default();
        Duration::from_secs(self.offset_secs) + self.played + running
    }

    fn freeze(&mut self) {
        if let Some(at) = self.resumed_at.take() {
            self.played += at.elapsed();
        }
    }
}

/// Sesión de reproducción de un guild. Dueña exclusiva de la conexión de voz.
struct Session {
    state: PlaybackState,
    connection: Option<Arc<dyn OutputConnection>>,
    current: Option<NowPlaying>,
    /// Se incrementa cada vez que un stream deja de ser el vigente.
    generation: u64,
}

/// Vista de sólo lectura de una sesión
#[derive(Debug, Clone)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub channel_id: Option<ChannelId>,
    pub track: Option<Arc<TrackDescriptor>>,
    pub position: Duration,
}

/// Controlador de reproducción de un guild.
///
/// Cada operación toma el lock de la sesión durante toda su ejecución, así que
/// las ediciones de cola, avanzar, saltar y pausar nunca se intercalan en un
/// mismo guild. El fin de cada stream llega por un callback marcado con la
/// generación que lo inició; si esa generación ya no es la vigente se ignora.
pub struct PlaybackController {
    guild_id: GuildId,
    me: Weak<PlaybackController>,
    session: Mutex<Session>,
    store: GuildQueueStore,
    resolver: Arc<TrackResolver>,
    notifier: Arc<dyn NotificationSink>,
}

impl PlaybackController {
    pub fn new(
        guild_id: GuildId,
        store: GuildQueueStore,
        resolver: Arc<TrackResolver>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            guild_id,
            me: me.clone(),
            session: Mutex::new(Session {
                state: PlaybackState::Idle,
                connection: None,
                current: None,
                generation: 0,
            }),
            store,
            resolver,
            notifier,
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub async fn state(&self) -> PlaybackState {
        self.session.lock().await.state
    }

    pub async fn channel_id(&self) -> Option<ChannelId> {
        self.session
            .lock()
            .await
            .connection
            .as_ref()
            .map(|c| c.channel_id())
    }

    pub async fn snapshot(&self) -> PlaybackSnapshot {
        let session = self.session.lock().await;
        PlaybackSnapshot {
            state: session.state,
            channel_id: session.connection.as_ref().map(|c| c.channel_id()),
            track: session.current.as_ref().map(|now| now.track.clone()),
            position: session
                .current
                .as_ref()
                .map(|now| now.position())
                .unwrap_or_default(),
        }
    }

    /// Toma la conexión recién establecida y empieza a reproducir
    pub async fn attach(&self, connection: Arc<dyn OutputConnection>) -> MusicResult<()> {
        let mut session = self.session.lock().await;
        if session.current.is_none() {
            info!(
                "🔊 Conectado a canal {} en guild {}",
                connection.channel_id(),
                self.guild_id
            );
        }
        session.connection = Some(connection);
        self.advance_locked(&mut session).await
    }

    /// Encola canciones; si no suena nada van al inicio de la cola
    pub async fn enqueue(&self, entries: Vec<QueueEntry>) -> MusicResult<usize> {
        let session = self.session.lock().await;
        let at_front = session.state == PlaybackState::Idle;
        self.store.bulk_append(self.guild_id, entries, at_front).await
    }

    pub async fn remove_at(&self, index: usize) -> MusicResult<QueueEntry> {
        let _session = self.session.lock().await;
        self.store.remove_at(self.guild_id, index).await
    }

    pub async fn clear(&self) -> MusicResult<usize> {
        let _session = self.session.lock().await;
        self.store.clear(self.guild_id).await
    }

    pub async fn shuffle(&self) -> MusicResult<usize> {
        let _session = self.session.lock().await;
        self.store.shuffle(self.guild_id).await
    }

    pub async fn toggle_loop(&self) -> MusicResult<bool> {
        let _session = self.session.lock().await;
        self.store.toggle_loop(self.guild_id).await
    }

    pub async fn set_notify_channel(&self, channel_id: ChannelId) -> MusicResult<()> {
        let _session = self.session.lock().await;
        self.store.set_notify_channel(self.guild_id, channel_id).await
    }

    /// Avanza a la siguiente canción si no suena nada
    pub async fn advance(&self) -> MusicResult<()> {
        let mut session = self.session.lock().await;
        self.advance_locked(&mut session).await
    }

    async fn advance_locked(&self, session: &mut Session) -> MusicResult<()> {
        let Some(connection) = session.connection.clone() else {
            debug!("Sin conexión de voz en guild {}, nada que avanzar", self.guild_id);
            return Ok(());
        };
        if session.current.is_some() {
            return Ok(());
        }

        loop {
            let queue = self.store.get(self.guild_id).await?;
            let Some(entry) = self.store.pop_front(self.guild_id).await? else {
                info!("📭 Cola vacía en guild {}", self.guild_id);
                session.state = PlaybackState::Idle;
                return Ok(());
            };

            let track = match self.resolver.resolve(&entry.reference).await {
                Ok(track) => track,
                Err(e) => {
                    warn!("⏭️ Saltando {}: {}", entry.reference, e);
                    continue;
                }
            };

            let requested_secs = entry.resume_offset_secs.unwrap_or(0);
            session.generation += 1;
            let on_end = self.completion_callback(session.generation);

            let handle = match connection
                .stream(&track.stream_url, requested_secs, queue.volume, on_end)
                .await
            {
                Ok(handle) => handle,
                Err(e) if !connection.is_connected().await => {
                    error!("❌ Conexión perdida al reproducir en guild {}: {}", self.guild_id, e);
                    self.store.requeue_front(self.guild_id, entry).await?;
                    session.connection = None;
                    session.state = PlaybackState::Idle;
                    return Err(MusicError::ConnectionLost(self.guild_id));
                }
                Err(e) => {
                    warn!("⏭️ No se pudo reproducir {}: {}", track.title, e);
                    continue;
                }
            };

            let offset_secs = handle.start_offset_secs();
            if offset_secs > 0 {
                info!("▶️ Reanudando: {} desde {}s", track.title, offset_secs);
            } else {
                info!("🎵 Reproduciendo: {}", track.title);
            }

            session.current = Some(NowPlaying {
                reference: entry.reference,
                track: track.clone(),
                handle,
                offset_secs,
                played: Duration::ZERO,
                resumed_at: Some(Instant::now()),
            });
            session.state = PlaybackState::Playing;

            if let Some(channel_id) = queue.notify_channel_id {
                self.announce(channel_id, &track).await;
            }
            return Ok(());
        }
    }

    fn completion_callback(&self, generation: u64) -> CompletionCallback {
        let me = self.me.clone();
        let runtime = tokio::runtime::Handle::current();
        Box::new(move || {
            if let Some(controller) = me.upgrade() {
                runtime.spawn(async move { controller.on_stream_end(generation).await });
            }
        })
    }

    /// Fin de un stream: cierra la canción y avanza
    pub async fn on_stream_end(&self, generation: u64) {
        let mut session = self.session.lock().await;
        if session.generation != generation || session.current.is_none() {
            debug!("Fin de stream obsoleto en guild {} (gen {})", self.guild_id, generation);
            return;
        }

        if let Some(now) = session.current.take() {
            debug!("Track terminado, reproduciendo siguiente...");
            if let Err(e) = self
                .store
                .finish_current(self.guild_id, &now.reference)
                .await
            {
                error!("Error al cerrar track en guild {}: {:?}", self.guild_id, e);
            }
        }

        if let Err(e) = self.advance_locked(&mut session).await {
            error!("Error al reproducir siguiente track: {:?}", e);
        }
    }

    /// Salta la canción actual, o descarta la primera de la cola si no suena nada.
    ///
    /// Devuelve el título saltado.
    pub async fn skip(&self) -> MusicResult<Option<String>> {
        let mut session = self.session.lock().await;

        if let Some(now) = session.current.as_ref() {
            self.store
                .finish_current(self.guild_id, &now.reference)
                .await?;

            let Some(now) = session.current.take() else {
                return Ok(None);
            };
            session.generation += 1;
            now.handle.stop();
            info!("⏭️ Saltado: {}", now.track.title);

            if let Err(e) = self.advance_locked(&mut session).await {
                warn!("No se pudo avanzar tras saltar en guild {}: {}", self.guild_id, e);
            }
            return Ok(Some(now.track.title.clone()));
        }

        match self.store.pop_front(self.guild_id).await? {
            Some(entry) => {
                let title = self.resolver.title(&entry.reference).await;
                info!("⏭️ Descartado de la cola: {}", title);
                Ok(Some(title))
            }
            None => Ok(None),
        }
    }

    /// Guarda el punto de reanudación al frente de la cola y suelta la conexión.
    ///
    /// Devuelve la posición guardada en segundos, si algo sonaba.
    pub async fn pause(&self) -> MusicResult<Option<u64>> {
        let mut session = self.session.lock().await;
        let offset = self.save_resume_point(&mut session).await?;

        if let Some(connection) = session.connection.take() {
            if let Err(e) = connection.disconnect().await {
                warn!("Error al desconectar en guild {}: {}", self.guild_id, e);
            }
        }
        session.state = PlaybackState::Idle;

        if let Some(offset) = offset {
            info!("⏸️ Pausado en guild {} a los {}s", self.guild_id, offset);
        }
        Ok(offset)
    }

    /// Reencola la canción actual con su posición y detiene el stream
    async fn save_resume_point(&self, session: &mut Session) -> MusicResult<Option<u64>> {
        let Some(now) = session.current.as_ref() else {
            return Ok(None);
        };

        let offset = now.position().as_secs();
        self.store
            .requeue_front(self.guild_id, QueueEntry::resuming(now.reference.clone(), offset))
            .await?;

        session.generation += 1;
        if let Some(now) = session.current.take() {
            now.handle.stop();
        }
        Ok(Some(offset))
    }

    /// Pausa in situ sin soltar la conexión
    pub async fn hold(&self) -> MusicResult<bool> {
        let mut session = self.session.lock().await;
        if session.state != PlaybackState::Playing {
            return Ok(false);
        }
        let Some(now) = session.current.as_mut() else {
            return Ok(false);
        };

        now.handle.pause();
        now.freeze();
        session.state = PlaybackState::Paused;
        info!("⏸️ Reproducción pausada");
        Ok(true)
    }

    /// Quita la pausa in situ o, si no hay, avanza la cola
    pub async fn resume(&self) -> MusicResult<PlaybackState> {
        let mut session = self.session.lock().await;

        if session.state == PlaybackState::Paused {
            if let Some(now) = session.current.as_mut() {
                now.handle.play();
                now.resumed_at = Some(Instant::now());
                session.state = PlaybackState::Playing;
                info!("▶️ Reproducción reanudada");
                return Ok(session.state);
            }
        }

        if session.connection.is_none() {
            return Err(MusicError::NotConnected(self.guild_id));
        }
        self.advance_locked(&mut session).await?;
        Ok(session.state)
    }

    /// Cambia el volumen en vivo y lo guarda como valor por defecto
    pub async fn set_volume(&self, volume: f32) -> MusicResult<f32> {
        let session = self.session.lock().await;
        let volume = self.store.set_volume(self.guild_id, volume).await?;

        if let Some(now) = session.current.as_ref() {
            now.handle.set_gain(volume);
        }
        info!("🔊 Volumen ajustado a {}%", (volume * 100.0).round() as u32);
        Ok(volume)
    }

    /// Detiene y desconecta sin guardar punto de reanudación
    pub async fn stop(&self) -> MusicResult<()> {
        let mut session = self.session.lock().await;
        session.generation += 1;

        if let Some(now) = session.current.take() {
            now.handle.stop();
        }
        if let Some(connection) = session.connection.take() {
            connection.disconnect().await?;
        }
        session.state = PlaybackState::Idle;
        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
        Ok(())
    }

    /// La plataforma avisa que la conexión se cayó: equivale a `pause()`
    pub async fn on_connection_lost(&self) {
        let mut session = self.session.lock().await;

        let Some(connection) = session.connection.clone() else {
            return;
        };
        if connection.is_connected().await {
            debug!("Aviso de desconexión obsoleto en guild {}", self.guild_id);
            return;
        }

        warn!("🔌 Conexión de voz perdida en guild {}", self.guild_id);
        if let Err(e) = self.save_resume_point(&mut session).await {
            error!("No se pudo guardar el punto de reanudación: {:?}", e);
            // Sin punto guardado el stream igual debe quedar invalidado
            session.generation += 1;
            if let Some(now) = session.current.take() {
                now.handle.stop();
            }
        }
        session.connection = None;
        session.state = PlaybackState::Idle;
    }

    async fn announce(&self, channel_id: ChannelId, track: &TrackDescriptor) {
        let notice = Notice::now_playing(track);
        let is_now_playing = |n: &Notice| n.is_now_playing();

        match self
            .notifier
            .edit_last_if_matching(channel_id, &is_now_playing, &notice)
            .await
        {
            Ok(true) => debug!("Mensaje anterior editado en canal {}", channel_id),
            Ok(false) => {
                if let Err(e) = self.notifier.send(channel_id, &notice).await {
                    warn!("No se pudo notificar en canal {}: {}", channel_id, e);
                }
            }
            Err(e) => {
                debug!("No se pudo editar el último mensaje: {}", e);
                if let Err(e) = self.notifier.send(channel_id, &notice).await {
                    warn!("No se pudo notificar en canal {}: {}", channel_id, e);
                }
            }
        }
    }
}

/// Controladores activos por guild
pub struct PlayerManager {
    controllers: DashMap<GuildId, Arc<PlaybackController>>,
    store: GuildQueueStore,
    resolver: Arc<TrackResolver>,
    notifier: Arc<dyn NotificationSink>,
}

impl PlayerManager {
    pub fn new(
        store: GuildQueueStore,
        resolver: Arc<TrackResolver>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            controllers: DashMap::new(),
            store,
            resolver,
            notifier,
        }
    }

    pub fn store(&self) -> &GuildQueueStore {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<TrackResolver> {
        &self.resolver
    }

    /// Obtiene o crea el controlador de un guild
    pub fn controller(&self, guild_id: GuildId) -> Arc<PlaybackController> {
        self.controllers
            .entry(guild_id)
            .or_insert_with(|| {
                PlaybackController::new(
                    guild_id,
                    self.store.clone(),
                    self.resolver.clone(),
                    self.notifier.clone(),
                )
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackController>> {
        self.controllers.get(&guild_id).map(|c| c.clone())
    }

    pub fn controllers(&self) -> Vec<Arc<PlaybackController>> {
        self.controllers.iter().map(|c| c.value().clone()).collect()
    }

    /// La plataforma entrega una conexión lista: empieza la reproducción
    pub async fn on_connection_established(
        &self,
        guild_id: GuildId,
        connection: Arc<dyn OutputConnection>,
    ) -> MusicResult<()> {
        self.controller(guild_id).attach(connection).await
    }

    pub async fn on_connection_lost(&self, guild_id: GuildId) {
        if let Some(controller) = self.get(guild_id) {
            controller.on_connection_lost().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        testing::{eventually, Harness},
        transport::NOW_PLAYING_TITLE,
    };
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(10);
    const VOICE: ChannelId = ChannelId::new(100);
    const TEXT: ChannelId = ChannelId::new(200);

    async fn queued(h: &Harness) -> Vec<QueueEntry> {
        h.store.get(GUILD).await.unwrap().entries
    }

    #[tokio::test]
    async fn plays_queue_in_order_then_goes_idle() {
        let h = Harness::new(&["a", "b"]);
        h.seed(GUILD, &["a", "b"]).await;
        h.store.set_notify_channel(GUILD, TEXT).await.unwrap();

        let controller = h.connect(GUILD, VOICE).await;
        assert_eq!(controller.state().await, PlaybackState::Playing);
        assert_eq!(h.connection(VOICE).started_urls(), vec!["stream://a"]);
        assert_eq!(queued(&h).await, vec![QueueEntry::new("b")]);

        h.connection(VOICE).finish_latest();
        eventually!(h.connection(VOICE).started_urls().len() == 2);
        assert!(queued(&h).await.is_empty());

        h.connection(VOICE).finish_latest();
        eventually!(controller.state().await == PlaybackState::Idle);
        assert_eq!(h.connection(VOICE).started_urls(), vec!["stream://a", "stream://b"]);

        let notices = h.sink.notices(TEXT);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, NOW_PLAYING_TITLE);
        assert!(notices[0].description.contains("Title b"));
        assert_eq!(h.sink.edits(), 1);
    }

    #[tokio::test]
    async fn broken_references_are_skipped() {
        let h = Harness::new(&["good"]);
        h.seed(GUILD, &["bad", "good"]).await;

        let controller = h.connect(GUILD, VOICE).await;
        assert_eq!(controller.state().await, PlaybackState::Playing);
        assert_eq!(h.connection(VOICE).started_urls(), vec!["stream://good"]);
        assert!(queued(&h).await.is_empty());
    }

    #[tokio::test]
    async fn looped_track_replays_without_duplication() {
        let h = Harness::new(&["a"]);
        h.seed(GUILD, &["a"]).await;
        h.store.set_loop(GUILD, true).await.unwrap();

        let controller = h.connect(GUILD, VOICE).await;
        assert!(queued(&h).await.is_empty());

        h.connection(VOICE).finish_latest();
        eventually!(h.connection(VOICE).started_urls().len() == 2);
        assert_eq!(h.connection(VOICE).started_urls(), vec!["stream://a", "stream://a"]);
        assert!(queued(&h).await.is_empty());

        controller.stop().await.unwrap();
        assert!(queued(&h).await.is_empty());
    }

    #[tokio::test]
    async fn looped_queue_rotates_and_drops_broken_entries() {
        let h = Harness::new(&["a", "b"]);
        h.seed(GUILD, &["a", "bad", "b"]).await;
        h.store.set_loop(GUILD, true).await.unwrap();

        h.connect(GUILD, VOICE).await;
        h.connection(VOICE).finish_latest();
        eventually!(h.connection(VOICE).started_urls().len() == 2);

        assert_eq!(h.connection(VOICE).started_urls(), vec!["stream://a", "stream://b"]);
        assert_eq!(queued(&h).await, vec![QueueEntry::new("a")]);

        h.connection(VOICE).finish_latest();
        eventually!(h.connection(VOICE).started_urls().len() == 3);
        assert_eq!(h.connection(VOICE).started_urls()[2], "stream://a");
        assert_eq!(queued(&h).await, vec![QueueEntry::new("b")]);
    }

    /// Referencias en cola más la que suena, ordenadas
    async fn looped_set(h: &Harness, controller: &PlaybackController) -> Vec<String> {
        let mut all: Vec<String> = queued(h).await.into_iter().map(|e| e.reference).collect();
        if let Some(track) = controller.snapshot().await.track {
            all.push(track.source_reference.clone());
        }
        all.sort();
        all
    }

    #[tokio::test]
    async fn shuffle_while_looping_never_duplicates() {
        let refs = ["a", "b", "c", "d", "e"];
        let h = Harness::new(&refs);
        h.seed(GUILD, &refs).await;
        h.store.set_loop(GUILD, true).await.unwrap();
        let controller = h.connect(GUILD, VOICE).await;

        for played in 1..=3 {
            controller.shuffle().await.unwrap();
            h.connection(VOICE).finish_latest();
            eventually!(h.connection(VOICE).started_urls().len() == played + 1);

            assert_eq!(queued(&h).await.len(), 4);
            assert_eq!(looped_set(&h, &controller).await, refs);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pause_after_shuffle_while_looping_keeps_one_copy() {
        let refs = ["a", "b", "c", "d", "e"];
        let h = Harness::new(&refs);
        h.seed(GUILD, &refs).await;
        h.store.set_loop(GUILD, true).await.unwrap();
        let controller = h.connect(GUILD, VOICE).await;

        controller.shuffle().await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(controller.pause().await.unwrap(), Some(20));

        let queue = queued(&h).await;
        assert_eq!(queue.len(), 5);
        assert_eq!(queue[0], QueueEntry::resuming("a", 20));
        assert_eq!(queue.iter().filter(|e| e.reference == "a").count(), 1);
    }

    #[tokio::test]
    async fn dequeue_while_looping_keeps_current_track() {
        let h = Harness::new(&["a", "b"]);
        h.seed(GUILD, &["a", "b"]).await;
        h.store.set_loop(GUILD, true).await.unwrap();
        let controller = h.connect(GUILD, VOICE).await;

        let removed = controller.remove_at(1).await.unwrap();
        assert_eq!(removed, QueueEntry::new("b"));
        assert!(queued(&h).await.is_empty());

        h.connection(VOICE).finish_latest();
        eventually!(h.connection(VOICE).started_urls().len() == 2);
        assert_eq!(h.connection(VOICE).started_urls(), vec!["stream://a", "stream://a"]);
        assert!(queued(&h).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_seek_saves_real_position() {
        let h = Harness::new(&["a"]);
        h.store
            .append(GUILD, QueueEntry::resuming("a", 30), false)
            .await
            .unwrap();
        h.transport.reject_seeks();
        let controller = h.connect(GUILD, VOICE).await;
        assert_eq!(h.connection(VOICE).latest().unwrap().offset_secs, 30);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(controller.snapshot().await.position.as_secs(), 5);
        assert_eq!(controller.pause().await.unwrap(), Some(5));
        assert_eq!(queued(&h).await, vec![QueueEntry::resuming("a", 5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_then_resume_keeps_position() {
        let h = Harness::new(&["a", "b"]);
        h.seed(GUILD, &["a", "b"]).await;
        let controller = h.connect(GUILD, VOICE).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        let offset = controller.pause().await.unwrap();

        assert_eq!(offset, Some(30));
        assert_eq!(controller.state().await, PlaybackState::Idle);
        assert!(!h.connection(VOICE).is_live());
        assert_eq!(
            queued(&h).await,
            vec![QueueEntry::resuming("a", 30), QueueEntry::new("b")]
        );

        // El callback del stream detenido llega tarde y se ignora
        tokio::task::yield_now().await;
        assert_eq!(h.connection(VOICE).started_urls().len(), 1);

        h.connect(GUILD, VOICE).await;
        let started = h.connection(VOICE).started();
        let last = started.last().unwrap();
        assert_eq!(last.url, "stream://a");
        assert!(last.offset_secs.abs_diff(30) <= 2);
        assert_eq!(queued(&h).await, vec![QueueEntry::new("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn hold_freezes_position() {
        let h = Harness::new(&["a"]);
        h.seed(GUILD, &["a"]).await;
        let controller = h.connect(GUILD, VOICE).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(controller.hold().await.unwrap());
        assert!(h.connection(VOICE).latest().unwrap().is_paused());
        assert_eq!(controller.state().await, PlaybackState::Paused);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(controller.resume().await.unwrap(), PlaybackState::Playing);
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(controller.snapshot().await.position.as_secs(), 15);
        assert_eq!(controller.pause().await.unwrap(), Some(15));
    }

    #[tokio::test]
    async fn skip_while_playing_advances_once() {
        let h = Harness::new(&["a", "b", "c"]);
        h.seed(GUILD, &["a", "b", "c"]).await;
        let controller = h.connect(GUILD, VOICE).await;

        let skipped = controller.skip().await.unwrap();
        assert_eq!(skipped.as_deref(), Some("Title a"));
        assert!(h.connection(VOICE).started()[0].is_stopped());

        // Detener el stream dispara su callback, que ya es obsoleto
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.connection(VOICE).started_urls(), vec!["stream://a", "stream://b"]);
        assert_eq!(queued(&h).await, vec![QueueEntry::new("c")]);
        assert_eq!(controller.state().await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn skip_while_idle_discards_front() {
        let h = Harness::new(&["a", "b"]);
        h.seed(GUILD, &["a", "b"]).await;
        let controller = h.players.controller(GUILD);

        let skipped = controller.skip().await.unwrap();
        assert_eq!(skipped.as_deref(), Some("Title a"));
        assert_eq!(queued(&h).await, vec![QueueEntry::new("b")]);
        assert_eq!(controller.state().await, PlaybackState::Idle);

        h.store.clear(GUILD).await.unwrap();
        assert_eq!(controller.skip().await.unwrap(), None);
    }

    #[tokio::test]
    async fn volume_changes_live_gain_and_persists() {
        let h = Harness::new(&["a"]);
        h.seed(GUILD, &["a"]).await;
        let controller = h.connect(GUILD, VOICE).await;
        assert_eq!(h.connection(VOICE).latest().unwrap().gain(), 0.5);

        assert_eq!(controller.set_volume(0.8).await.unwrap(), 0.8);
        assert_eq!(h.connection(VOICE).latest().unwrap().gain(), 0.8);
        assert_eq!(h.store.volume(GUILD).await.unwrap(), 0.8);
    }

    #[tokio::test]
    async fn enqueue_goes_to_front_only_when_idle() {
        let h = Harness::new(&["a", "b", "x", "y"]);
        h.seed(GUILD, &["a", "b"]).await;
        let controller = h.players.controller(GUILD);

        controller
            .enqueue(vec![QueueEntry::new("x"), QueueEntry::new("y")])
            .await
            .unwrap();
        assert_eq!(
            queued(&h).await,
            vec![
                QueueEntry::new("x"),
                QueueEntry::new("y"),
                QueueEntry::new("a"),
                QueueEntry::new("b")
            ]
        );

        h.connect(GUILD, VOICE).await;
        controller.enqueue(vec![QueueEntry::new("x")]).await.unwrap();
        assert_eq!(queued(&h).await.last(), Some(&QueueEntry::new("x")));
        assert_eq!(h.connection(VOICE).started_urls(), vec!["stream://x"]);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_behaves_like_pause() {
        let h = Harness::new(&["a"]);
        h.seed(GUILD, &["a"]).await;
        let controller = h.connect(GUILD, VOICE).await;

        tokio::time::advance(Duration::from_secs(12)).await;
        h.connection(VOICE).drop_link();
        h.players.on_connection_lost(GUILD).await;

        assert_eq!(controller.state().await, PlaybackState::Idle);
        assert_eq!(queued(&h).await, vec![QueueEntry::resuming("a", 12)]);
        assert_eq!(controller.channel_id().await, None);
    }

    #[tokio::test]
    async fn stale_disconnect_notice_is_ignored() {
        let h = Harness::new(&["a"]);
        h.seed(GUILD, &["a"]).await;
        let controller = h.connect(GUILD, VOICE).await;

        h.players.on_connection_lost(GUILD).await;
        assert_eq!(controller.state().await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn advance_without_connection_is_a_no_op() {
        let h = Harness::new(&["a"]);
        h.seed(GUILD, &["a"]).await;

        h.players.controller(GUILD).advance().await.unwrap();
        assert_eq!(queued(&h).await, vec![QueueEntry::new("a")]);
        assert!(matches!(
            h.players.controller(GUILD).resume().await,
            Err(MusicError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn stop_does_not_requeue() {
        let h = Harness::new(&["a", "b"]);
        h.seed(GUILD, &["a", "b"]).await;
        let controller = h.connect(GUILD, VOICE).await;

        controller.stop().await.unwrap();
        assert_eq!(controller.state().await, PlaybackState::Idle);
        assert_eq!(queued(&h).await, vec![QueueEntry::new("b")]);
        assert!(!h.connection(VOICE).is_live());
    }
}

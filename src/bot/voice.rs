//! Conexiones de voz sobre songbird.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::{
    http::Http,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    events::CoreEvent,
    input::HttpRequest,
    tracks::{Track, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use crate::audio::{
    player::PlayerManager,
    transport::{CompletionCallback, OutputConnection, OutputTransport, StreamHandle},
};

/// Transporte de voz: une canales con songbird y avisa las caídas al `PlayerManager`
pub struct SongbirdTransport {
    songbird: Arc<Songbird>,
    http: Arc<Http>,
    players: Arc<PlayerManager>,
    client: reqwest::Client,
}

impl SongbirdTransport {
    pub fn new(songbird: Arc<Songbird>, http: Arc<Http>, players: Arc<PlayerManager>) -> Self {
        Self {
            songbird,
            http,
            players,
            client: reqwest::Client::new(),
        }
    }

    async fn guild_of(&self, channel_id: ChannelId) -> Result<GuildId> {
        let channel = channel_id
            .to_channel(self.http.as_ref())
            .await
            .with_context(|| format!("No se pudo obtener el canal {}", channel_id))?;

        channel
            .guild()
            .map(|c| c.guild_id)
            .ok_or_else(|| anyhow::anyhow!("El canal {} no pertenece a un servidor", channel_id))
    }

    /// Conecta a un canal cuyo guild ya se conoce
    pub async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Arc<dyn OutputConnection>> {
        let call = self
            .songbird
            .join(guild_id, channel_id)
            .await
            .map_err(|e| {
                error!("Error al obtener handler de voz: {:?}", e);
                anyhow::anyhow!("Error al conectar al canal de voz")
            })?;

        {
            let mut handler = call.lock().await;
            handler.remove_all_global_events();
            handler.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DriverDisconnectHandler {
                    guild_id,
                    players: self.players.clone(),
                },
            );
        }

        info!("🔊 Conectado al canal de voz en guild {}", guild_id);
        Ok(Arc::new(SongbirdConnection {
            guild_id,
            channel_id,
            call,
            songbird: self.songbird.clone(),
            client: self.client.clone(),
        }))
    }
}

#[async_trait]
impl OutputTransport for SongbirdTransport {
    async fn connect(&self, channel_id: ChannelId) -> Result<Arc<dyn OutputConnection>> {
        let guild_id = self.guild_of(channel_id).await?;
        self.join(guild_id, channel_id).await
    }
}

/// Handler para caídas del driver de voz
struct DriverDisconnectHandler {
    guild_id: GuildId,
    players: Arc<PlayerManager>,
}

#[async_trait]
impl VoiceEventHandler for DriverDisconnectHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(data) = ctx {
            warn!(
                "🔌 Driver de voz desconectado en guild {}: {:?}",
                self.guild_id, data.reason
            );
        }
        self.players.on_connection_lost(self.guild_id).await;
        None
    }
}

pub struct SongbirdConnection {
    guild_id: GuildId,
    channel_id: ChannelId,
    call: Arc<tokio::sync::Mutex<Call>>,
    songbird: Arc<Songbird>,
    client: reqwest::Client,
}

#[async_trait]
impl OutputConnection for SongbirdConnection {
    fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_channel().is_some()
    }

    async fn stream(
        &self,
        stream_url: &str,
        offset_secs: u64,
        gain: f32,
        on_end: CompletionCallback,
    ) -> Result<Arc<dyn StreamHandle>> {
        let mut handler = self.call.lock().await;
        if handler.current_channel().is_none() {
            anyhow::bail!("Sin conexión de voz en guild {}", self.guild_id);
        }

        let input = HttpRequest::new(self.client.clone(), stream_url.to_string());
        let handle = handler.play_only(Track::new(input.into()).volume(gain));
        drop(handler);

        // Fin y error comparten el mismo callback, que sólo se ejecuta una vez
        let on_end = Arc::new(Mutex::new(Some(on_end)));
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackEndHandler {
                        guild_id: self.guild_id,
                        on_end: on_end.clone(),
                    },
                )
                .map_err(|e| anyhow::anyhow!("Error al agregar event handler: {}", e))?;
        }

        let started_at_secs = if offset_secs > 0 {
            match handle.seek_async(Duration::from_secs(offset_secs)).await {
                Ok(position) => position.as_secs(),
                Err(e) => {
                    warn!(
                        "⚠️ No se pudo saltar a {}s en guild {}, empezando desde 0: {}",
                        offset_secs, self.guild_id, e
                    );
                    0
                }
            }
        } else {
            0
        };

        Ok(Arc::new(SongbirdStream {
            handle,
            started_at_secs,
        }))
    }

    async fn disconnect(&self) -> Result<()> {
        self.songbird.remove(self.guild_id).await?;
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        Ok(())
    }
}

/// Handler para cuando termina una canción
struct TrackEndHandler {
    guild_id: GuildId,
    on_end: Arc<Mutex<Option<CompletionCallback>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                debug!("Track terminado en guild {}: {:?}", self.guild_id, state.playing);
            }
        }

        let on_end = self.on_end.lock().take();
        if let Some(on_end) = on_end {
            on_end();
        }
        None
    }
}

struct SongbirdStream {
    handle: TrackHandle,
    started_at_secs: u64,
}

impl StreamHandle for SongbirdStream {
    fn stop(&self) {
        let _ = self.handle.stop();
    }

    fn set_gain(&self, gain: f32) {
        let _ = self.handle.set_volume(gain);
    }

    fn pause(&self) {
        let _ = self.handle.pause();
    }

    fn play(&self) {
        let _ = self.handle.play();
    }

    fn start_offset_secs(&self) -> u64 {
        self.started_at_secs
    }
}

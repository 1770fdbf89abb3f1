//! Límites con la plataforma: conexión de voz y canal de notificaciones.

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};

use crate::sources::TrackDescriptor;

/// Se invoca exactamente una vez cuando un stream termina, por la causa que sea.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Stream de audio en curso
pub trait StreamHandle: Send + Sync {
    fn stop(&self);
    fn set_gain(&self, gain: f32);
    fn pause(&self);
    fn play(&self);

    /// Segundo desde el que suena realmente el stream.
    fn start_offset_secs(&self) -> u64;
}

/// Conexión de voz de un guild
#[async_trait]
pub trait OutputConnection: Send + Sync {
    fn guild_id(&self) -> GuildId;
    fn channel_id(&self) -> ChannelId;
    async fn is_connected(&self) -> bool;

    /// Empieza a reproducir `stream_url` desde `offset_secs` con volumen `gain`.
    async fn stream(
        &self,
        stream_url: &str,
        offset_secs: u64,
        gain: f32,
        on_end: CompletionCallback,
    ) -> Result<Arc<dyn StreamHandle>>;

    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
pub trait OutputTransport: Send + Sync {
    /// Conecta al canal de voz; el guild se deduce del canal.
    async fn connect(&self, channel_id: ChannelId) -> Result<Arc<dyn OutputConnection>>;
}

pub const NOW_PLAYING_TITLE: &str = "🎵 Reproduciendo ahora";

/// Mensaje independiente de la plataforma
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    pub footer: Option<String>,
}

impl Notice {
    pub fn now_playing(track: &TrackDescriptor) -> Self {
        let url = track
            .source_reference
            .starts_with("http")
            .then(|| track.source_reference.clone());

        Self {
            title: NOW_PLAYING_TITLE.to_string(),
            description: match &url {
                Some(url) => format!("**[{}]({})**", track.title, url),
                None => format!("**{}**", track.title),
            },
            url,
            thumbnail: track.thumbnail_url.clone(),
            footer: track
                .duration_ms
                .map(|ms| format!("⏱️ {}", humantime::format_duration(Duration::from_secs(ms / 1000)))),
        }
    }

    pub fn is_now_playing(&self) -> bool {
        self.title == NOW_PLAYING_TITLE
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, channel_id: ChannelId, notice: &Notice) -> Result<()>;

    /// Edita el último mensaje del canal si es nuestro y cumple `predicate`.
    /// Devuelve si hubo edición.
    async fn edit_last_if_matching(
        &self,
        channel_id: ChannelId,
        predicate: &(dyn for<'n> Fn(&'n Notice) -> bool + Send + Sync),
        notice: &Notice,
    ) -> Result<bool>;
}

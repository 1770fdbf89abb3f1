//! # Bot Module
//!
//! Discord front end for the playback engine.
//!
//! - Slash command registration and dispatch ([`commands`], [`handlers`])
//! - Voice connections through songbird ([`voice`])
//! - "Now playing" messages through the Discord HTTP API ([`notifier`])
//! - Startup resume and the hourly maintenance task
//!
//! [`GuildRadioBot`] implements Serenity's [`EventHandler`]; everything
//! stateful lives in the [`PlayerManager`] it shares with the voice layer.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod notifier;
pub mod voice;

use crate::{
    audio::{player::PlayerManager, restart::RestartCoordinator},
    config::Config,
    storage::Documents,
};
use voice::SongbirdTransport;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

pub struct GuildRadioBot {
    config: Arc<Config>,
    players: Arc<PlayerManager>,
    transport: Arc<SongbirdTransport>,
    coordinator: Arc<RestartCoordinator>,
    maintenance_started: AtomicBool,
}

impl GuildRadioBot {
    pub fn new(
        config: Arc<Config>,
        players: Arc<PlayerManager>,
        transport: Arc<SongbirdTransport>,
        coordinator: Arc<RestartCoordinator>,
    ) -> Self {
        Self {
            config,
            players,
            transport,
            coordinator,
            maintenance_started: AtomicBool::new(false),
        }
    }

    pub fn players(&self) -> &Arc<PlayerManager> {
        &self.players
    }

    pub fn transport(&self) -> &Arc<SongbirdTransport> {
        &self.transport
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands are registered per guild when `GUILD_ID` is set (instant
    /// propagation, useful for development) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!(
                        "No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild."
                    )
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!(
                        "No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'."
                    )
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for GuildRadioBot {
    /// Registra comandos, reanuda las sesiones guardadas y arranca el mantenimiento.
    ///
    /// `ready` puede repetirse tras una reconexión del gateway; la reanudación
    /// y la tarea de mantenimiento sólo se lanzan la primera vez.
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            match coordinator.on_startup().await {
                Ok(0) => {}
                Ok(resumed) => info!("🔄 {} sesiones reanudadas tras reinicio", resumed),
                Err(e) => error!("Error al reanudar sesiones: {:?}", e),
            }
        });

        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            let players = self.players.clone();
            tokio::spawn(async move {
                maintenance_tasks(players).await;
            });
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Detecta cuando el bot es sacado del canal de voz desde fuera
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.players.on_connection_lost(guild_id).await;
        }
    }
}

/// Runs periodic maintenance tasks in the background.
///
/// Every hour it logs the title/thumbnail cache metrics and the storage
/// statistics. Individual failures are logged as warnings and never stop the
/// cycle.
async fn maintenance_tasks(players: Arc<PlayerManager>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    // El primer tick es inmediato
    interval.tick().await;

    loop {
        interval.tick().await;
        log_maintenance_report(&players, players.store().documents()).await;
    }
}

async fn log_maintenance_report(players: &PlayerManager, docs: &Documents) {
    info!("📈 Caché: {}", players.resolver().cache().metrics());

    match docs.stats().await {
        Ok(stats) => info!("{}", stats),
        Err(e) => warn!("Error obteniendo estadísticas de storage: {:?}", e),
    }

    info!(
        "🧹 Tareas de mantenimiento completadas ({} guilds activos)",
        players.controllers().len()
    );
}

//! Reanudación tras reinicio.
//!
//! Al apagar, cada guild activo guarda su punto exacto de reanudación y marca su
//! canal de voz para reconectar; al arrancar de nuevo se vuelve a entrar a esos
//! canales y la reproducción sigue desde la posición guardada.

use futures::future::join_all;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    audio::{
        player::{PlaybackController, PlaybackState, PlayerManager},
        queue::GuildQueueStore,
        transport::OutputTransport,
    },
    error::MusicResult,
};

/// Resultado del apagado coordinado
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ShutdownReport {
    pub saved: Vec<GuildId>,
    pub failed: Vec<GuildId>,
    /// Algún guild no llegó a `Idle` dentro del tiempo límite.
    pub timed_out: bool,
}

pub struct RestartCoordinator {
    players: Arc<PlayerManager>,
    transport: Arc<dyn OutputTransport>,
    store: GuildQueueStore,
    timeout: Duration,
    poll_interval: Duration,
    resumed: AtomicBool,
}

impl RestartCoordinator {
    pub fn new(
        players: Arc<PlayerManager>,
        transport: Arc<dyn OutputTransport>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store: players.store().clone(),
            players,
            transport,
            timeout,
            poll_interval,
            resumed: AtomicBool::new(false),
        }
    }

    /// Pausa todos los guilds activos y marca sus canales para reconexión.
    ///
    /// Vuelve cuando todos los guilds guardaron su estado o se agota el plazo.
    pub async fn on_shutdown_requested(&self) -> ShutdownReport {
        info!("🛑 Apagado solicitado, guardando sesiones activas...");

        let mut active = Vec::new();
        for controller in self.players.controllers() {
            if controller.state().await != PlaybackState::Idle {
                active.push(controller);
            }
        }

        let results = join_all(active.iter().map(|controller| async move {
            let guild_id = controller.guild_id();
            let channel = controller.channel_id().await;
            (guild_id, self.save_session(controller, channel).await)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (guild_id, saved) in results {
            match saved {
                Ok(()) => report.saved.push(guild_id),
                Err(e) => {
                    error!("❌ No se pudo guardar la sesión de guild {}: {}", guild_id, e);
                    report.failed.push(guild_id);
                }
            }
        }

        report.timed_out = !self.wait_until_idle(&active).await;
        info!(
            "💾 {} sesiones guardadas, {} fallidas",
            report.saved.len(),
            report.failed.len()
        );
        report
    }

    async fn save_session(
        &self,
        controller: &PlaybackController,
        channel: Option<ChannelId>,
    ) -> MusicResult<()> {
        controller.pause().await?;
        if let Some(channel) = channel {
            self.store.put_restart_record(channel).await?;
        }
        Ok(())
    }

    async fn wait_until_idle(&self, controllers: &[Arc<PlaybackController>]) -> bool {
        let deadline = Instant::now() + self.timeout;
        loop {
            let mut all_idle = true;
            for controller in controllers {
                if controller.state().await != PlaybackState::Idle {
                    all_idle = false;
                    break;
                }
            }
            if all_idle {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("⏰ Tiempo de apagado agotado con sesiones aún activas");
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Reconecta los canales guardados y reanuda. Sólo actúa la primera vez.
    pub async fn on_startup(&self) -> MusicResult<usize> {
        if self.resumed.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }

        let records = self.store.restart_records().await?;
        if records.is_empty() {
            return Ok(0);
        }
        info!("🔄 Reanudando {} sesiones tras reinicio", records.len());

        let resumed = join_all(records.iter().map(|record| async move {
            let channel = ChannelId::new(record.channel_id);
            let connection = match self.transport.connect(channel).await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("No se pudo reconectar al canal {}: {:#}", channel, e);
                    return false;
                }
            };

            let guild_id = connection.guild_id();
            match self.players.on_connection_established(guild_id, connection).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("No se pudo reanudar guild {}: {}", guild_id, e);
                    false
                }
            }
        }))
        .await
        .into_iter()
        .filter(|ok| *ok)
        .count();

        self.store.clear_restart_records().await?;
        info!("✅ {} sesiones reanudadas", resumed);
        Ok(resumed)
    }
}

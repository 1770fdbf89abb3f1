use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod retry;
mod sources;
mod storage;
mod ui;

use crate::audio::{player::PlayerManager, queue::GuildQueueStore, restart::RestartCoordinator};
use crate::bot::{notifier::DiscordNotifier, voice::SongbirdTransport, GuildRadioBot};
use crate::cache::TrackInfoCache;
use crate::config::{Config, StorageBackendKind};
use crate::sources::{CrossServiceSource, SpotifyClient, TrackResolver, YouTubeClient};
use crate::storage::{DocumentBackend, Documents, JsonStorage, MemoryStorage};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_radio=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Radio v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);

    let youtube = Arc::new(YouTubeClient::new(
        config.ytdlp_path.clone(),
        config.resolve_timeout(),
    ));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&youtube).await;
    }

    info!("{}", config.summary());

    // Inicializar almacenamiento
    let backend: Arc<dyn DocumentBackend> = match config.storage_backend {
        StorageBackendKind::Json => Arc::new(JsonStorage::new(config.data_dir.clone()).await?),
        StorageBackendKind::Memory => {
            warn!("⚠️ Usando almacenamiento en memoria: las colas no sobreviven a un reinicio");
            Arc::new(MemoryStorage::new())
        }
    };
    let store = GuildQueueStore::new(
        Documents::new(backend, config.store_retry()),
        config.default_volume,
    );

    // Fuentes de audio
    let spotify = config.spotify_credentials().map(|(id, secret)| {
        info!("🟢 Enlaces de Spotify habilitados");
        Arc::new(SpotifyClient::new(id, secret, config.resolve_timeout())) as Arc<dyn CrossServiceSource>
    });
    let resolver = Arc::new(TrackResolver::new(
        youtube,
        spotify,
        Arc::new(TrackInfoCache::new()),
        config.resolve_retry(),
        config.search_limit,
        config.max_playlist_size,
    ));

    // Reproducción
    let http = Arc::new(Http::new(&config.discord_token));
    let notifier = Arc::new(DiscordNotifier::new(http.clone()));
    let players = Arc::new(PlayerManager::new(store, resolver, notifier));

    let songbird = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone(), http, players.clone()));
    let coordinator = Arc::new(RestartCoordinator::new(
        players.clone(),
        transport.clone(),
        config.shutdown_timeout(),
        config.shutdown_poll(),
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // Crear handler del bot
    let handler = GuildRadioBot::new(config.clone(), players, transport, coordinator.clone());

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error al registrar señales de apagado: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, guardando sesiones...");

        let report = coordinator.on_shutdown_requested().await;
        if report.timed_out {
            warn!("⏰ Algunas sesiones no terminaron a tiempo");
        }
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    info!("👋 Guild Radio detenido");
    Ok(())
}

/// Espera Ctrl+C o, en unix, SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

async fn health_check(youtube: &YouTubeClient) -> Result<()> {
    // Verificar dependencias críticas
    match youtube.check_ytdlp().await {
        Ok(version) => {
            println!("OK (yt-dlp {})", version);
            Ok(())
        }
        Err(e) => anyhow::bail!("Dependencias faltantes: {:#}", e),
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::retry::RetryPolicy;

/// Dónde se guardan los documentos de las colas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Json,
    Memory,
}

impl FromStr for StorageBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("STORAGE_BACKEND desconocido: {} (usa json o memory)", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Almacenamiento
    pub data_dir: PathBuf,
    pub storage_backend: StorageBackendKind,
    pub store_write_attempts: u32,
    pub store_retry_delay_ms: u64,

    // Audio
    pub default_volume: f32,

    // Resolución de canciones
    pub resolve_attempts: u32,
    pub resolve_retry_delay_ms: u64,
    pub resolve_timeout_secs: u64,
    pub search_limit: usize,
    pub max_playlist_size: usize,
    pub ytdlp_path: String,

    // Spotify (opcional)
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,

    // Apagado
    pub shutdown_timeout_secs: u64,
    pub shutdown_poll_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Crear el directorio de datos si no existe
        if config.storage_backend == StorageBackendKind::Json {
            std::fs::create_dir_all(&config.data_dir).with_context(|| {
                format!("No se pudo crear DATA_DIR {}", config.data_dir.display())
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
        where
            T: FromStr,
            T::Err: std::fmt::Display,
        {
            match value {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|e| anyhow::anyhow!("{} inválido ({}): {}", key, raw, e)),
                None => Ok(default),
            }
        }

        Ok(Self {
            // Discord
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            application_id: parse_or(
                Some(var("APPLICATION_ID").context("APPLICATION_ID no está definido")?),
                "APPLICATION_ID",
                0,
            )?,
            guild_id: var("GUILD_ID").and_then(|s| s.trim().parse().ok()),

            // Almacenamiento
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            storage_backend: parse_or(
                var("STORAGE_BACKEND"),
                "STORAGE_BACKEND",
                defaults.storage_backend,
            )?,
            store_write_attempts: parse_or(
                var("STORE_WRITE_ATTEMPTS"),
                "STORE_WRITE_ATTEMPTS",
                defaults.store_write_attempts,
            )?,
            store_retry_delay_ms: parse_or(
                var("STORE_RETRY_DELAY_MS"),
                "STORE_RETRY_DELAY_MS",
                defaults.store_retry_delay_ms,
            )?,

            default_volume: parse_or(var("DEFAULT_VOLUME"), "DEFAULT_VOLUME", defaults.default_volume)?,

            // Resolución
            resolve_attempts: parse_or(
                var("RESOLVE_ATTEMPTS"),
                "RESOLVE_ATTEMPTS",
                defaults.resolve_attempts,
            )?,
            resolve_retry_delay_ms: parse_or(
                var("RESOLVE_RETRY_DELAY_MS"),
                "RESOLVE_RETRY_DELAY_MS",
                defaults.resolve_retry_delay_ms,
            )?,
            resolve_timeout_secs: parse_or(
                var("RESOLVE_TIMEOUT_SECS"),
                "RESOLVE_TIMEOUT_SECS",
                defaults.resolve_timeout_secs,
            )?,
            search_limit: parse_or(var("SEARCH_LIMIT"), "SEARCH_LIMIT", defaults.search_limit)?,
            max_playlist_size: parse_or(
                var("MAX_PLAYLIST_SIZE"),
                "MAX_PLAYLIST_SIZE",
                defaults.max_playlist_size,
            )?,
            ytdlp_path: var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),

            spotify_client_id: var("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: var("SPOTIFY_CLIENT_SECRET"),

            // Apagado
            shutdown_timeout_secs: parse_or(
                var("SHUTDOWN_TIMEOUT_SECS"),
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout_secs,
            )?,
            shutdown_poll_ms: parse_or(
                var("SHUTDOWN_POLL_MS"),
                "SHUTDOWN_POLL_MS",
                defaults.shutdown_poll_ms,
            )?,
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Default volume must be finite and within `[0.01, 1.0]`
    /// - Resolution attempts must be between 1 and 10
    /// - Store write attempts, search limit and playlist size must be > 0
    /// - Shutdown poll interval must be shorter than the shutdown timeout
    pub fn validate(&self) -> Result<()> {
        if !self.default_volume.is_finite() || !(0.01..=1.0).contains(&self.default_volume) {
            anyhow::bail!(
                "DEFAULT_VOLUME debe estar entre 0.01 y 1.0, recibido: {}",
                self.default_volume
            );
        }

        if !(1..=10).contains(&self.resolve_attempts) {
            anyhow::bail!(
                "RESOLVE_ATTEMPTS debe estar entre 1 y 10, recibido: {}",
                self.resolve_attempts
            );
        }

        if self.store_write_attempts == 0 {
            anyhow::bail!("STORE_WRITE_ATTEMPTS debe ser mayor que 0");
        }

        if self.search_limit == 0 {
            anyhow::bail!("SEARCH_LIMIT debe ser mayor que 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("MAX_PLAYLIST_SIZE debe ser mayor que 0");
        }

        if self.resolve_timeout_secs == 0 {
            anyhow::bail!("RESOLVE_TIMEOUT_SECS debe ser mayor que 0");
        }

        if self.shutdown_poll_ms == 0 || self.shutdown_poll_ms >= self.shutdown_timeout_secs * 1000 {
            anyhow::bail!("SHUTDOWN_POLL_MS debe ser mayor que 0 y menor que SHUTDOWN_TIMEOUT_SECS");
        }

        if self.spotify_client_id.is_some() != self.spotify_client_secret.is_some() {
            anyhow::bail!("SPOTIFY_CLIENT_ID y SPOTIFY_CLIENT_SECRET deben definirse juntos");
        }

        Ok(())
    }

    /// Credenciales de Spotify si ambas están definidas
    pub fn spotify_credentials(&self) -> Option<(String, String)> {
        self.spotify_client_id
            .clone()
            .zip(self.spotify_client_secret.clone())
    }

    pub fn resolve_retry(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.resolve_attempts,
            Duration::from_millis(self.resolve_retry_delay_ms),
        )
    }

    pub fn store_retry(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.store_write_attempts,
            Duration::from_millis(self.store_retry_delay_ms),
        )
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn shutdown_poll(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_ms)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes tokens and secrets.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Storage: {:?} en {} ({} intentos)\n  \
            Audio: {}% vol\n  \
            Resolver: {} intentos, {}s timeout, {} resultados, {} máx. playlist\n  \
            Spotify: {}\n  \
            Apagado: {}s",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.storage_backend,
            self.data_dir.display(),
            self.store_write_attempts,
            (self.default_volume * 100.0).round() as u32,
            self.resolve_attempts,
            self.resolve_timeout_secs,
            self.search_limit,
            self.max_playlist_size,
            if self.spotify_credentials().is_some() { "activado" } else { "desactivado" },
            self.shutdown_timeout_secs
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin valores por defecto)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            data_dir: "./data".into(),
            storage_backend: StorageBackendKind::Json,
            store_write_attempts: 5,
            store_retry_delay_ms: 200,

            default_volume: 0.5,

            resolve_attempts: 10,
            resolve_retry_delay_ms: 500,
            resolve_timeout_secs: 10,
            search_limit: 10,
            max_playlist_size: 100,
            ytdlp_path: "yt-dlp".to_string(),

            spotify_client_id: None,
            spotify_client_secret: None,

            shutdown_timeout_secs: 30,
            shutdown_poll_ms: 250,
        }
    }
}

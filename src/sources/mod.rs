pub mod matching;
pub mod resolver;
pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use thiserror::Error;

pub use resolver::{ReferenceKind, TrackResolver};
pub use spotify::SpotifyClient;
pub use youtube::YouTubeClient;

/// Errores de los backends de resolución
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("tiempo de espera agotado: {0}")]
    Timeout(String),

    #[error("respuesta ilegible: {0}")]
    Decode(String),

    #[error("error de red: {0}")]
    Network(String),

    #[error("no encontrado: {0}")]
    NotFound(String),

    /// El backend no puede atender la petición (binario ausente, sin credenciales...).
    #[error("fuente no disponible: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// Timeouts, errores de decodificación y de red se reintentan.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Decode(_) | Self::Network(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Metadata de stream devuelta por el servicio de video
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadata {
    pub stream_url: String,
    pub title: String,
    /// Enlace canónico de la página del video.
    pub webpage_url: String,
    pub duration_ms: Option<u64>,
    pub thumbnail_url: Option<String>,
}

/// Resultado de búsqueda
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub link: String,
    pub title: String,
    pub duration_ms: Option<u64>,
    pub view_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Relevance,
    ViewCount,
}

/// Track de un servicio de streaming alternativo
#[derive(Debug, Clone, PartialEq)]
pub struct CrossServiceTrack {
    pub link: String,
    pub title: String,
    pub artists: Vec<String>,
    pub duration_ms: u64,
    pub artwork_url: Option<String>,
}

impl CrossServiceTrack {
    /// Texto usado para buscar el track en el servicio de video y para mostrarlo.
    pub fn search_query(&self) -> String {
        if self.artists.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artists.join(", "), self.title)
        }
    }
}

/// Track resuelto y listo para reproducir.
///
/// Inmutable una vez creado; lo comparten el controlador y las notificaciones.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDescriptor {
    pub source_reference: String,
    pub stream_url: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Backend del servicio de video principal
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Metadata de stream para un enlace (o frase de búsqueda), prefiriendo audio.
    async fn fetch(&self, reference: &str) -> Result<StreamMetadata, SourceError>;

    async fn search(
        &self,
        query: &str,
        order: SortOrder,
        limit: usize,
    ) -> Result<Vec<SearchCandidate>, SourceError>;

    /// `Ok(None)` cuando el enlace no es una playlist.
    async fn expand_playlist(
        &self,
        link: &str,
        limit: usize,
    ) -> Result<Option<Vec<String>>, SourceError>;

    /// Título para mostrar, sin resolver el stream cuando es posible.
    async fn title(&self, reference: &str) -> Result<String, SourceError>;
}

/// Backend de un servicio alternativo cuyos tracks se reproducen vía búsqueda
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CrossServiceSource: Send + Sync {
    fn handles(&self, reference: &str) -> bool;

    /// `Ok(None)` cuando el servicio responde que el track no existe.
    async fn lookup(&self, link: &str) -> Result<Option<CrossServiceTrack>, SourceError>;

    /// Todos los tracks de un enlace (track, álbum o playlist), hasta `limit`.
    async fn expand(
        &self,
        link: &str,
        limit: usize,
    ) -> Result<Option<Vec<CrossServiceTrack>>, SourceError>;
}

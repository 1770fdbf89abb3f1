use serenity::model::id::GuildId;
use thiserror::Error;

/// Errores del núcleo de reproducción visibles para quien invoca una operación.
#[derive(Debug, Error)]
pub enum MusicError {
    /// El resolver agotó sus reintentos o recibió un "no encontrado" explícito.
    #[error("no se pudo resolver '{0}'")]
    ResolutionFailure(String),

    /// Posición externa (base 1) fuera de `[1, len]`.
    #[error("la posición {index} no es válida (la cola tiene {len} canciones)")]
    IndexError { index: usize, len: usize },

    #[error("se perdió la conexión de voz en guild {0}")]
    ConnectionLost(GuildId),

    #[error("no hay conexión de voz activa en guild {0}")]
    NotConnected(GuildId),

    #[error("error de almacenamiento: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl MusicError {
    /// Indica si el error se debe a una entrada inválida del usuario.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::IndexError { .. } | Self::ResolutionFailure(_))
    }
}

pub type MusicResult<T> = std::result::Result<T, MusicError>;

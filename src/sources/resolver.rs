use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    matching, spotify, youtube, CrossServiceSource, SortOrder, SourceError, StreamMetadata,
    StreamSource, TrackDescriptor,
};
use crate::{
    cache::TrackInfoCache,
    error::{MusicError, MusicResult},
    retry::RetryPolicy,
};

/// Tipo de referencia de usuario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    CrossService,
    Playlist,
    Link,
    Search,
}

/// Convierte referencias de usuario en tracks reproducibles.
///
/// Las llamadas de red se reintentan ante fallos transitorios con la
/// [`RetryPolicy`] compartida; títulos y miniaturas quedan en caché mientras
/// viva el proceso.
pub struct TrackResolver {
    source: Arc<dyn StreamSource>,
    cross: Option<Arc<dyn CrossServiceSource>>,
    cache: Arc<TrackInfoCache>,
    retry: RetryPolicy,
    search_limit: usize,
    max_playlist: usize,
}

impl TrackResolver {
    pub fn new(
        source: Arc<dyn StreamSource>,
        cross: Option<Arc<dyn CrossServiceSource>>,
        cache: Arc<TrackInfoCache>,
        retry: RetryPolicy,
        search_limit: usize,
        max_playlist: usize,
    ) -> Self {
        Self {
            source,
            cross,
            cache,
            retry,
            search_limit,
            max_playlist,
        }
    }

    pub fn cache(&self) -> &Arc<TrackInfoCache> {
        &self.cache
    }

    pub fn classify(&self, reference: &str) -> ReferenceKind {
        let cross = match &self.cross {
            Some(cross) => cross.handles(reference),
            None => spotify::parse_link(reference).is_some(),
        };

        if cross {
            ReferenceKind::CrossService
        } else if youtube::is_playlist_link(reference) {
            ReferenceKind::Playlist
        } else if url::Url::parse(reference).is_ok_and(|u| matches!(u.scheme(), "http" | "https")) {
            ReferenceKind::Link
        } else {
            ReferenceKind::Search
        }
    }

    fn cross_source(&self, reference: &str) -> MusicResult<&Arc<dyn CrossServiceSource>> {
        self.cross.as_ref().ok_or_else(|| {
            warn!("🎧 Enlace de servicio alternativo sin credenciales configuradas: {}", reference);
            MusicError::ResolutionFailure(reference.to_string())
        })
    }

    fn failure(&self, reference: &str, cause: SourceError) -> MusicError {
        warn!("❌ No se pudo resolver {}: {}", reference, cause);
        MusicError::ResolutionFailure(reference.to_string())
    }

    async fn fetch(&self, reference: &str) -> Result<StreamMetadata, SourceError> {
        self.retry
            .run_if(
                "metadata de stream",
                |_| self.source.fetch(reference),
                SourceError::is_transient,
            )
            .await
    }

    /// Resuelve una referencia a un stream reproducible
    pub async fn resolve(&self, reference: &str) -> MusicResult<Arc<TrackDescriptor>> {
        let (metadata, cross_title, artwork) = match self.classify(reference) {
            ReferenceKind::CrossService => {
                let cross = self.cross_source(reference)?;
                let track = self
                    .retry
                    .run_if("lookup cross-service", |_| cross.lookup(reference), SourceError::is_transient)
                    .await
                    .map_err(|e| self.failure(reference, e))?
                    .ok_or_else(|| self.failure(reference, SourceError::NotFound(reference.into())))?;

                let candidate = self
                    .retry
                    .run_if(
                        "búsqueda por duración",
                        |_| matching::find_match(self.source.as_ref(), &track, self.search_limit),
                        SourceError::is_transient,
                    )
                    .await
                    .map_err(|e| self.failure(reference, e))?
                    .ok_or_else(|| self.failure(reference, SourceError::NotFound(track.search_query())))?;

                debug!("🎯 {} -> {}", track.search_query(), candidate.link);
                let metadata = self
                    .fetch(&candidate.link)
                    .await
                    .map_err(|e| self.failure(reference, e))?;
                (metadata, Some(track.search_query()), track.artwork_url)
            }
            _ => {
                let metadata = self
                    .fetch(reference)
                    .await
                    .map_err(|e| self.failure(reference, e))?;
                (metadata, None, None)
            }
        };

        let title = match self.cache.title(reference) {
            Some(title) => title,
            None => {
                let title = cross_title.unwrap_or_else(|| metadata.title.clone());
                self.cache.put_title(reference, title.clone());
                title
            }
        };

        let thumbnail_url = match self.cache.thumbnail(reference) {
            Some(thumbnail) => thumbnail,
            None => {
                let thumbnail = youtube::thumbnail_for(reference)
                    .or(artwork)
                    .or_else(|| metadata.thumbnail_url.clone());
                self.cache.put_thumbnail(reference, thumbnail.clone());
                thumbnail
            }
        };

        Ok(Arc::new(TrackDescriptor {
            source_reference: reference.to_string(),
            stream_url: metadata.stream_url,
            title,
            thumbnail_url,
            duration_ms: metadata.duration_ms,
        }))
    }

    /// Expande una playlist; `Ok(None)` si el enlace no es una playlist
    pub async fn expand_playlist(&self, reference: &str) -> MusicResult<Option<Vec<String>>> {
        self.retry
            .run_if(
                "expansión de playlist",
                |_| self.source.expand_playlist(reference, self.max_playlist),
                SourceError::is_transient,
            )
            .await
            .map_err(|e| self.failure(reference, e))
    }

    /// Convierte la petición de un usuario en las referencias que se encolan
    pub async fn expand(&self, reference: &str) -> MusicResult<Vec<String>> {
        let reference = reference.trim();

        let references = match self.classify(reference) {
            ReferenceKind::CrossService => {
                let cross = self.cross_source(reference)?;
                let tracks = self
                    .retry
                    .run_if(
                        "expansión cross-service",
                        |_| cross.expand(reference, self.max_playlist),
                        SourceError::is_transient,
                    )
                    .await
                    .map_err(|e| self.failure(reference, e))?
                    .unwrap_or_default();

                tracks
                    .into_iter()
                    .map(|track| {
                        self.cache.put_title(track.link.clone(), track.search_query());
                        if track.artwork_url.is_some() {
                            self.cache.put_thumbnail(track.link.clone(), track.artwork_url.clone());
                        }
                        track.link
                    })
                    .collect()
            }
            ReferenceKind::Playlist => match self.expand_playlist(reference).await? {
                Some(links) if !links.is_empty() => links,
                _ => vec![self.canonical_link(reference).await?],
            },
            ReferenceKind::Link => vec![self.canonical_link(reference).await?],
            ReferenceKind::Search => {
                let top = self
                    .retry
                    .run_if(
                        "búsqueda",
                        |_| self.source.search(reference, SortOrder::Relevance, 1),
                        SourceError::is_transient,
                    )
                    .await
                    .map_err(|e| self.failure(reference, e))?
                    .into_iter()
                    .next()
                    .ok_or_else(|| self.failure(reference, SourceError::NotFound(reference.into())))?;

                self.cache.put_title(top.link.clone(), top.title.clone());
                vec![top.link]
            }
        };

        if references.is_empty() {
            return Err(MusicError::ResolutionFailure(reference.to_string()));
        }

        info!("➕ '{}' expandido a {} referencias", reference, references.len());
        Ok(references)
    }

    async fn canonical_link(&self, reference: &str) -> MusicResult<String> {
        let metadata = self
            .fetch(reference)
            .await
            .map_err(|e| self.failure(reference, e))?;

        let link = metadata.webpage_url;
        self.cache.put_title(link.clone(), metadata.title);
        if youtube::thumbnail_for(&link).is_none() {
            self.cache.put_thumbnail(link.clone(), metadata.thumbnail_url);
        }
        Ok(link)
    }

    /// Título para mostrar. Devuelve la referencia tal cual si falla, sin cachear.
    pub async fn title(&self, reference: &str) -> String {
        if let Some(title) = self.cache.title(reference) {
            return title;
        }

        let looked_up = match self.classify(reference) {
            ReferenceKind::CrossService => match &self.cross {
                Some(cross) => self
                    .retry
                    .run_if("título cross-service", |_| cross.lookup(reference), SourceError::is_transient)
                    .await
                    .and_then(|track| {
                        track
                            .map(|t| t.search_query())
                            .ok_or_else(|| SourceError::NotFound(reference.into()))
                    }),
                None => Err(SourceError::Unavailable(reference.into())),
            },
            _ => {
                self.retry
                    .run_if("título", |_| self.source.title(reference), SourceError::is_transient)
                    .await
            }
        };

        match looked_up {
            Ok(title) => {
                self.cache.put_title(reference, title.clone());
                title
            }
            Err(e) => {
                debug!("Sin título para {}: {}", reference, e);
                reference.to_string()
            }
        }
    }

    /// Miniatura para mostrar; `None` si no hay ninguna disponible
    pub async fn thumbnail(&self, reference: &str) -> Option<String> {
        if let Some(thumbnail) = self.cache.thumbnail(reference) {
            return thumbnail;
        }

        if let Some(thumbnail) = youtube::thumbnail_for(reference) {
            self.cache.put_thumbnail(reference, Some(thumbnail.clone()));
            return Some(thumbnail);
        }

        let looked_up = match (self.classify(reference), &self.cross) {
            (ReferenceKind::CrossService, Some(cross)) => cross
                .lookup(reference)
                .await
                .map(|track| track.and_then(|t| t.artwork_url)),
            (ReferenceKind::CrossService, None) | (ReferenceKind::Search, _) => return None,
            _ => self.fetch(reference).await.map(|m| m.thumbnail_url),
        };

        match looked_up {
            Ok(thumbnail) => {
                self.cache.put_thumbnail(reference, thumbnail.clone());
                thumbnail
            }
            Err(e) => {
                debug!("Sin miniatura para {}: {}", reference, e);
                None
            }
        }
    }
}

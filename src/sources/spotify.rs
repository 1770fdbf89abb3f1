//! Cliente de la Web API de Spotify (client credentials).
//!
//! Sólo se usa para obtener título, artistas y duración; el audio siempre se
//! busca en el servicio de video.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

use super::{CrossServiceSource, CrossServiceTrack, SourceError};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_URL: &str = "https://api.spotify.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotifyKind {
    Track,
    Album,
    Playlist,
}

impl SpotifyKind {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "track" => Some(Self::Track),
            "album" => Some(Self::Album),
            "playlist" => Some(Self::Playlist),
            _ => None,
        }
    }
}

/// Reconoce `https://open.spotify.com/{kind}/{id}` (con prefijo `intl-xx`
/// opcional) y `spotify:{kind}:{id}`.
pub fn parse_link(reference: &str) -> Option<(SpotifyKind, String)> {
    if let Some(rest) = reference.strip_prefix("spotify:") {
        let (kind, id) = rest.split_once(':')?;
        return Some((SpotifyKind::from_segment(kind)?, id.to_string()));
    }

    let url = Url::parse(reference).ok()?;
    if url.host_str()? != "open.spotify.com" {
        return None;
    }

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let mut kind = segments.next()?;
    if kind.starts_with("intl-") {
        kind = segments.next()?;
    }
    let id = segments.next()?;
    Some((SpotifyKind::from_segment(kind)?, id.to_string()))
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Deserialize)]
struct ApiImage {
    url: String,
}

#[derive(Deserialize)]
struct ApiAlbum {
    #[serde(default)]
    images: Vec<ApiImage>,
}

#[derive(Deserialize)]
struct ApiExternalUrls {
    spotify: Option<String>,
}

#[derive(Deserialize)]
struct ApiTrack {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    duration_ms: u64,
    album: Option<ApiAlbum>,
    external_urls: Option<ApiExternalUrls>,
}

#[derive(Deserialize)]
struct Page<T> {
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct PlaylistItem {
    track: Option<ApiTrack>,
}

impl ApiTrack {
    fn into_track(self, album_artwork: Option<&str>) -> Option<CrossServiceTrack> {
        let link = self
            .external_urls
            .and_then(|urls| urls.spotify)
            .or_else(|| {
                self.id
                    .as_ref()
                    .map(|id| format!("https://open.spotify.com/track/{}", id))
            })?;

        let artwork_url = self
            .album
            .and_then(|album| album.images.into_iter().next())
            .map(|image| image.url)
            .or_else(|| album_artwork.map(str::to_string));

        Some(CrossServiceTrack {
            link,
            title: self.name,
            artists: self.artists.into_iter().map(|a| a.name).collect(),
            duration_ms: self.duration_ms,
            artwork_url,
        })
    }
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, SourceError> {
        let cached = self
            .token
            .lock()
            .as_ref()
            .filter(|token| token.expires_at > Instant::now())
            .map(|token| token.access_token.clone());
        if let Some(token) = cached {
            return Ok(token);
        }

        debug!("🔑 Solicitando token de Spotify");
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if response.status() == StatusCode::BAD_REQUEST || response.status() == StatusCode::UNAUTHORIZED {
            return Err(SourceError::Unavailable(
                "credenciales de Spotify rechazadas".into(),
            ));
        }
        let token: TokenResponse = response.error_for_status()?.json().await?;

        // Renovar un minuto antes de que expire
        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *self.token.lock() = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }

    /// GET autenticado. `Ok(None)` en 404.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, SourceError> {
        let token = self.access_token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Ok(None),
            StatusCode::UNAUTHORIZED => {
                // Token revocado: se pide uno nuevo en el siguiente intento
                *self.token.lock() = None;
                Err(SourceError::Network("token de Spotify expirado".into()))
            }
            status if status.is_success() => Ok(Some(response.json().await?)),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
                Err(SourceError::Network(format!("Spotify respondió {}", status)))
            }
            status => Err(SourceError::Unavailable(format!(
                "Spotify respondió {}",
                status
            ))),
        }
    }

    async fn collect_pages<T, F>(
        &self,
        first_url: String,
        limit: usize,
        mut convert: F,
    ) -> Result<Option<Vec<CrossServiceTrack>>, SourceError>
    where
        T: serde::de::DeserializeOwned,
        F: FnMut(T) -> Option<CrossServiceTrack>,
    {
        let mut tracks = Vec::new();
        let mut next = Some(first_url);
        let mut first = true;

        while let Some(url) = next.take() {
            let Some(page) = self.get_json::<Page<T>>(&url).await? else {
                return Ok(if first { None } else { Some(tracks) });
            };
            first = false;

            tracks.extend(page.items.into_iter().filter_map(&mut convert));
            if tracks.len() >= limit {
                tracks.truncate(limit);
                break;
            }
            next = page.next;
        }

        Ok(Some(tracks))
    }
}

#[async_trait]
impl CrossServiceSource for SpotifyClient {
    fn handles(&self, reference: &str) -> bool {
        parse_link(reference).is_some()
    }

    async fn lookup(&self, link: &str) -> Result<Option<CrossServiceTrack>, SourceError> {
        match parse_link(link) {
            Some((SpotifyKind::Track, id)) => {
                let track: Option<ApiTrack> =
                    self.get_json(&format!("{}/tracks/{}", API_URL, id)).await?;
                Ok(track.and_then(|t| t.into_track(None)))
            }
            Some(_) => Ok(self
                .expand(link, 1)
                .await?
                .and_then(|tracks| tracks.into_iter().next())),
            None => Ok(None),
        }
    }

    async fn expand(
        &self,
        link: &str,
        limit: usize,
    ) -> Result<Option<Vec<CrossServiceTrack>>, SourceError> {
        let Some((kind, id)) = parse_link(link) else {
            return Ok(None);
        };

        let tracks = match kind {
            SpotifyKind::Track => self.lookup(link).await?.map(|t| vec![t]),
            SpotifyKind::Album => {
                #[derive(Deserialize)]
                struct AlbumInfo {
                    #[serde(default)]
                    images: Vec<ApiImage>,
                }

                let Some(album) = self
                    .get_json::<AlbumInfo>(&format!("{}/albums/{}", API_URL, id))
                    .await?
                else {
                    return Ok(None);
                };
                let artwork = album.images.into_iter().next().map(|image| image.url);

                self.collect_pages(
                    format!("{}/albums/{}/tracks?limit=50", API_URL, id),
                    limit,
                    |track: ApiTrack| track.into_track(artwork.as_deref()),
                )
                .await?
            }
            SpotifyKind::Playlist => {
                self.collect_pages(
                    format!("{}/playlists/{}/tracks?limit=100", API_URL, id),
                    limit,
                    |item: PlaylistItem| item.track.and_then(|t| t.into_track(None)),
                )
                .await?
            }
        };

        if let Some(tracks) = &tracks {
            info!("🎧 Spotify: {} tracks en {}", tracks.len(), link);
        }
        Ok(tracks)
    }
}

use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{sync::LazyLock, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use super::{SearchCandidate, SortOrder, SourceError, StreamMetadata, StreamSource};

const OEMBED_URL: &str = "https://www.youtube.com/oembed";
const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// Extrae el id de video de cualquier forma de enlace conocida
static VIDEO_ID_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^.*((youtu\.be/)|(v/)|(/u/\w/)|(embed/)|(watch\?))\??v?=?([^#&?]*).*").ok()
});

/// Cliente para interactuar con YouTube/yt-dlp
pub struct YouTubeClient {
    ytdlp_path: String,
    http: reqwest::Client,
    timeout: Duration,
    // Limitar procesos yt-dlp concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: Option<String>,
    /// Stream elegido por `-f` (o enlace del video en modo `--flat-playlist`).
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    view_count: Option<u64>,
    formats: Option<Vec<Format>>,
    entries: Option<Vec<YtDlpInfo>>,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    abr: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: String,
}

impl YouTubeClient {
    pub fn new(ytdlp_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            timeout,
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Ejecuta yt-dlp con timeout y devuelve stdout
    async fn run_ytdlp(&self, args: &[&str]) -> Result<String, SourceError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| SourceError::Unavailable("limitador cerrado".into()))?;

        let mut command = Command::new(&self.ytdlp_path);
        command.args(args).arg("--no-warnings").kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| SourceError::Timeout(format!("yt-dlp tardó más de {:?}", self.timeout)))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SourceError::Unavailable(format!("no se encontró '{}'", self.ytdlp_path))
                } else {
                    SourceError::Network(e.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_ytdlp_error(stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn dump_json(&self, args: &[&str]) -> Result<YtDlpInfo, SourceError> {
        let stdout = self.run_ytdlp(args).await?;
        Ok(serde_json::from_str(stdout.trim())?)
    }

    async fn oembed_title(&self, link: &str) -> Result<String, SourceError> {
        let response = self
            .http
            .get(OEMBED_URL)
            .query(&[("format", "json"), ("url", link)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::NotFound(format!(
                "oEmbed respondió {} para {}",
                response.status(),
                link
            )));
        }

        Ok(response.json::<OEmbed>().await?.title)
    }

    /// Verifica que yt-dlp esté instalado y responda
    pub async fn check_ytdlp(&self) -> anyhow::Result<String> {
        let version = self.run_ytdlp(&["--version"]).await?;
        Ok(version.trim().to_string())
    }
}

#[async_trait]
impl StreamSource for YouTubeClient {
    async fn fetch(&self, reference: &str) -> Result<StreamMetadata, SourceError> {
        debug!("📊 Obteniendo info de: {}", reference);

        let info = self
            .dump_json(&[
                "--dump-single-json",
                "--no-playlist",
                "-f",
                "bestaudio/best",
                "--default-search",
                "auto",
                reference,
            ])
            .await?;

        info_to_metadata(info).ok_or_else(|| SourceError::NotFound(reference.to_string()))
    }

    async fn search(
        &self,
        query: &str,
        order: SortOrder,
        limit: usize,
    ) -> Result<Vec<SearchCandidate>, SourceError> {
        info!("🔍 Buscando en YouTube: {}", query);

        let search_query = format!("ytsearch{}:{}", limit.max(1), query);
        let info = self
            .dump_json(&["--dump-single-json", "--flat-playlist", &search_query])
            .await?;

        let mut results: Vec<SearchCandidate> = info
            .entries
            .unwrap_or_default()
            .into_iter()
            .filter_map(entry_to_candidate)
            .collect();

        if order == SortOrder::ViewCount {
            results.sort_by(|a, b| b.view_count.cmp(&a.view_count));
        }
        results.truncate(limit);

        Ok(results)
    }

    async fn expand_playlist(
        &self,
        link: &str,
        limit: usize,
    ) -> Result<Option<Vec<String>>, SourceError> {
        if !is_playlist_link(link) {
            return Ok(None);
        }

        info!("📋 Obteniendo playlist: {}", link);

        let end = limit.to_string();
        let info = self
            .dump_json(&[
                "--dump-single-json",
                "--flat-playlist",
                "--yes-playlist",
                "--playlist-end",
                &end,
                link,
            ])
            .await?;

        let links: Vec<String> = info
            .entries
            .unwrap_or_default()
            .into_iter()
            .filter_map(entry_to_candidate)
            .map(|candidate| candidate.link)
            .take(limit)
            .collect();

        Ok(Some(links))
    }

    async fn title(&self, reference: &str) -> Result<String, SourceError> {
        if is_video_link(reference) {
            match self.oembed_title(reference).await {
                Ok(title) => return Ok(title),
                Err(e) => debug!("oEmbed falló para {}: {} - usando yt-dlp", reference, e),
            }
        }

        Ok(self.fetch(reference).await?.title)
    }
}

/// Clasifica el stderr de yt-dlp: los errores definitivos no se reintentan
fn classify_ytdlp_error(stderr: &str) -> SourceError {
    const FATAL_MARKERS: [&str; 6] = [
        "Video unavailable",
        "Private video",
        "This video has been removed",
        "is not a valid URL",
        "Unsupported URL",
        "HTTP Error 404",
    ];

    if FATAL_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        SourceError::NotFound(stderr.to_string())
    } else {
        warn!("⚠️ yt-dlp error: {}", stderr);
        SourceError::Network(stderr.to_string())
    }
}

/// Convierte la salida de yt-dlp en metadata de stream.
///
/// Si la salida es una lista (búsqueda o playlist) se elige la entrada con más
/// reproducciones.
fn info_to_metadata(info: YtDlpInfo) -> Option<StreamMetadata> {
    let info = match info.entries {
        Some(entries) => entries
            .into_iter()
            .max_by_key(|entry| entry.view_count.unwrap_or(0))?,
        None => info,
    };

    let stream_url = select_audio_url(&info)?;
    let webpage_url = info
        .webpage_url
        .clone()
        .or_else(|| info.id.as_ref().map(|id| format!("{}{}", WATCH_URL, id)))?;

    Some(StreamMetadata {
        stream_url,
        title: info.title.unwrap_or_else(|| webpage_url.clone()),
        thumbnail_url: thumbnail_for(&webpage_url).or(info.thumbnail),
        duration_ms: info.duration.map(|secs| (secs * 1000.0) as u64),
        webpage_url,
    })
}

/// Prefiere el formato sólo-audio con mayor bitrate; nunca video sin audio
fn select_audio_url(info: &YtDlpInfo) -> Option<String> {
    let formats = info.formats.as_deref().unwrap_or_default();

    let audio_only = formats
        .iter()
        .filter(|f| f.url.is_some())
        .filter(|f| f.vcodec.as_deref() == Some("none"))
        .filter(|f| f.acodec.as_deref() != Some("none"))
        .max_by(|a, b| {
            a.abr
                .unwrap_or(0.0)
                .partial_cmp(&b.abr.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

    audio_only
        .and_then(|f| f.url.clone())
        .or_else(|| info.url.clone())
        .or_else(|| {
            formats
                .iter()
                .rev()
                .find(|f| f.url.is_some() && f.acodec.as_deref() != Some("none"))
                .and_then(|f| f.url.clone())
        })
}

fn entry_to_candidate(entry: YtDlpInfo) -> Option<SearchCandidate> {
    let link = match (&entry.url, &entry.id) {
        (Some(url), _) if url.starts_with("http") => url.clone(),
        (_, Some(id)) => format!("{}{}", WATCH_URL, id),
        _ => return None,
    };

    Some(SearchCandidate {
        title: entry.title.unwrap_or_else(|| link.clone()),
        duration_ms: entry.duration.map(|secs| (secs * 1000.0) as u64),
        view_count: entry.view_count.unwrap_or(0),
        link,
    })
}

/// Verifica si una URL es válida para YouTube
pub fn is_video_link(reference: &str) -> bool {
    Url::parse(reference)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| {
            matches!(
                host.as_str(),
                "youtube.com" | "www.youtube.com" | "m.youtube.com" | "music.youtube.com" | "youtu.be"
            )
        })
}

/// Enlace de playlist: tiene parámetro `list` o es la página `/playlist`
pub fn is_playlist_link(reference: &str) -> bool {
    if !is_video_link(reference) {
        return false;
    }
    Url::parse(reference).is_ok_and(|url| {
        url.path() == "/playlist" || url.query_pairs().any(|(key, _)| key == "list")
    })
}

pub fn video_id(reference: &str) -> Option<String> {
    let captures = VIDEO_ID_REGEX.as_ref()?.captures(reference)?;
    let id = captures.get(7)?.as_str();
    (id.len() == 11).then(|| id.to_string())
}

/// Miniatura derivada del id de video, sin llamadas de red
pub fn thumbnail_for(reference: &str) -> Option<String> {
    if !is_video_link(reference) {
        return None;
    }
    video_id(reference).map(|id| format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id))
}

//! Búsqueda del equivalente en video de un track de otro servicio.
//!
//! Los candidatos se filtran según cuánto se acerca su duración a la buscada,
//! probando ventanas cada vez más anchas; los de la primera ventana con
//! resultados se ordenan por parecido del título y popularidad.

use tracing::debug;

use super::{CrossServiceTrack, SearchCandidate, SortOrder, SourceError, StreamSource};

/// Ventanas de duración en ms, en orden de preferencia. La comparación es estricta.
pub const DURATION_WINDOWS_MS: [u64; 3] = [10_000, 20_000, 60_000];

/// Sesga la búsqueda hacia los uploads "Topic" generados automáticamente.
const AUTO_GENERATED_HINT: &str = " description:(\"Auto-generated by YouTube.\")";

const SIMILARITY_WEIGHT: f64 = 0.75;
const POPULARITY_WEIGHT: f64 = 0.25;

/// Elige el mejor candidato de la primera ventana que tenga alguno
pub fn select_candidate<'a>(
    candidates: &'a [SearchCandidate],
    title: &str,
    target_ms: u64,
) -> Option<&'a SearchCandidate> {
    DURATION_WINDOWS_MS.iter().find_map(|&window| {
        let in_window: Vec<&SearchCandidate> = candidates
            .iter()
            .filter(|c| c.duration_ms.is_some_and(|d| d.abs_diff(target_ms) < window))
            .collect();

        if in_window.is_empty() {
            None
        } else {
            debug!(
                "🎯 {} candidatos dentro de ±{}s para '{}'",
                in_window.len(),
                window / 1000,
                title
            );
            best_ranked(&in_window, title)
        }
    })
}

fn best_ranked<'a>(candidates: &[&'a SearchCandidate], title: &str) -> Option<&'a SearchCandidate> {
    let max_views = candidates.iter().map(|c| c.view_count).max().unwrap_or(0);
    let wanted = title.to_lowercase();

    candidates
        .iter()
        .map(|c| (score(c, &wanted, max_views), *c))
        .max_by(|(score_a, a), (score_b, b)| {
            score_a
                .partial_cmp(score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.view_count.cmp(&b.view_count))
        })
        .map(|(_, c)| c)
}

/// Similitud textual ponderada con reproducciones en escala logarítmica
fn score(candidate: &SearchCandidate, wanted_lower: &str, max_views: u64) -> f64 {
    let similarity = strsim::jaro_winkler(&candidate.title.to_lowercase(), wanted_lower);
    let popularity = if max_views == 0 {
        0.0
    } else {
        (1.0 + candidate.view_count as f64).ln() / (1.0 + max_views as f64).ln()
    };
    SIMILARITY_WEIGHT * similarity + POPULARITY_WEIGHT * popularity
}

/// Busca el video que corresponde a `track`.
///
/// Hace una búsqueda ordenada por vistas orientada a subidas automáticas y otra
/// por relevancia, aplica las ventanas de duración a ambas y, si ninguna
/// ventana coincide, usa el primer resultado por relevancia.
pub async fn find_match(
    source: &dyn StreamSource,
    track: &CrossServiceTrack,
    limit: usize,
) -> Result<Option<SearchCandidate>, SourceError> {
    let query = track.search_query();

    let mut candidates = source
        .search(&format!("{}{}", query, AUTO_GENERATED_HINT), SortOrder::ViewCount, limit)
        .await?;
    for candidate in source.search(&query, SortOrder::Relevance, limit).await? {
        if !candidates.iter().any(|c| c.link == candidate.link) {
            candidates.push(candidate);
        }
    }

    if let Some(best) = select_candidate(&candidates, &query, track.duration_ms) {
        return Ok(Some(best.clone()));
    }

    debug!("Ninguna ventana de duración coincide para '{}', usando relevancia", query);
    Ok(source
        .search(&query, SortOrder::Relevance, 1)
        .await?
        .into_iter()
        .next())
}

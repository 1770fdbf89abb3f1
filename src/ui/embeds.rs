use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{queue::QueuePage, transport::Notice};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Radio";

pub const QUEUE_PAGE_SIZE: usize = 10;

/// Convierte un aviso de la capa de audio en embed
pub fn create_notice_embed(notice: &Notice) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(&notice.title)
        .description(&notice.description)
        .color(colors::MUSIC_PURPLE);

    if let Some(url) = &notice.url {
        embed = embed.url(url);
    }
    if let Some(thumbnail) = &notice.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .footer(CreateEmbedFooter::new(
            notice.footer.as_deref().unwrap_or(STANDARD_FOOTER),
        ))
        .timestamp(Timestamp::now())
}

/// Crea un embed para mostrar la cola de reproducción.
///
/// `titles` va en el mismo orden que `page.entries`.
pub fn create_queue_embed(page: &QueuePage, titles: &[String], loop_enabled: bool) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if page.total_items == 0 {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    let mut description = String::new();
    for ((position, entry), title) in page.entries.iter().zip(titles) {
        let resume = entry
            .resume_offset_secs
            .map(|secs| format!(" `⏯️ {}`", format_duration(Duration::from_secs(secs))))
            .unwrap_or_default();
        description.push_str(&format!("**{}**. {}{}\n", position, title, resume));
    }

    let mut info = format!("**Total:** {} canciones", page.total_items);
    if loop_enabled {
        info.push_str(" • 🔁 **Repetición**");
    }

    let footer = if page.total_pages > 1 {
        format!(
            "Página {} de {} • Guild Radio",
            page.current_page, page.total_pages
        )
    } else {
        STANDARD_FOOTER.to_string()
    };

    embed
        .description(description)
        .field("Información", info, false)
        .footer(CreateEmbedFooter::new(footer))
        .timestamp(Timestamp::now())
}

/// Crea un embed para canciones agregadas a la cola
pub fn create_tracks_added_embed(count: usize, first_title: &str, playing_now: bool) -> CreateEmbed {
    let description = if count == 1 {
        format!("**{}** se ha agregado a la cola de reproducción", first_title)
    } else {
        format!(
            "Se agregaron **{} canciones** a la cola, empezando por **{}**",
            count, first_title
        )
    };

    let footer = if playing_now {
        "▶️ Empezando a reproducir"
    } else {
        "🎵 Se reproducirá cuando termine lo que suena"
    };

    CreateEmbed::default()
        .title(if count == 1 {
            "✅ Canción Agregada"
        } else {
            "📋 Canciones Agregadas"
        })
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .footer(CreateEmbedFooter::new(footer))
        .timestamp(Timestamp::now())
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de información
pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de volumen con indicador visual
pub fn create_volume_embed(volume: f32) -> CreateEmbed {
    let percent = (volume * 100.0).round() as u32;
    let emoji = if percent <= 50 { "🔉" } else { "🔊" };

    CreateEmbed::default()
        .title(format!("{} Volumen", emoji))
        .description(format!("**Volumen actual: {}%**", percent))
        .field("📊 Nivel", create_volume_bar(volume), false)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new("💡 Se guarda como volumen por defecto del servidor"))
        .timestamp(Timestamp::now())
}

/// Crea una barra visual de volumen
fn create_volume_bar(volume: f32) -> String {
    let segments = 20;
    let filled = ((volume.clamp(0.0, 1.0) * segments as f32).round() as usize).min(segments);
    let bar = "█".repeat(filled) + &"▒".repeat(segments - filled);
    format!("`[{}]`", bar)
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

use anyhow::Result;
use futures::future::join_all;
use serenity::{
    builder::{CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    audio::{
        player::{PlaybackController, PlaybackState},
        queue::QueueEntry,
    },
    bot::GuildRadioBot,
    error::MusicError,
    ui::embeds::{self, QUEUE_PAGE_SIZE},
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &GuildRadioBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Este comando sólo funciona dentro de un servidor")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // Defer la respuesta ya que resolver canciones puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let controller = bot.players().controller(guild_id);
    let reply = match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, &controller).await,
        "skip" => handle_skip(ctx, &command, &controller).await,
        "pause" => handle_pause(ctx, &command, &controller).await,
        "hold" => handle_hold(&controller).await,
        "resume" => handle_resume(ctx, &command, bot, &controller).await,
        "queue" => handle_queue(&command, bot, guild_id).await,
        "clearqueue" => handle_clear(&controller).await,
        "dequeue" => handle_dequeue(&command, bot, &controller).await,
        "shuffle" => handle_shuffle(&controller).await,
        "loop" => handle_loop(&controller).await,
        "volume" => handle_volume(&command, bot, &controller).await,
        "leave" => handle_leave(&controller).await,
        _ => Ok(embeds::create_error_embed(
            "Comando no reconocido",
            &format!("/{} no existe", command.data.name),
        )),
    };

    let embed = reply.unwrap_or_else(|e| error_reply(&command.data.name, &e));
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

/// Errores del usuario se muestran tal cual; los internos se registran
fn error_reply(command: &str, e: &anyhow::Error) -> CreateEmbed {
    let internal = e
        .downcast_ref::<MusicError>()
        .map(|e| !e.is_user_error() && !matches!(e, MusicError::NotConnected(_)))
        .unwrap_or(false);

    if internal {
        error!("❌ Error en /{}: {:#}", command, e);
        embeds::create_error_embed(
            "Error interno",
            "Ocurrió un problema, inténtalo de nuevo en unos segundos",
        )
    } else {
        embeds::create_error_embed("No se pudo completar", &e.to_string())
    }
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

// Handlers específicos para cada comando

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &GuildRadioBot,
    controller: &Arc<PlaybackController>,
) -> Result<CreateEmbed> {
    let query = string_option(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?;
    let voice_channel_id = require_voice(ctx, command, controller).await?;

    let references = bot.players().resolver().expand(query).await?;
    let Some(first) = references.first().cloned() else {
        anyhow::bail!("No se encontraron resultados para '{}'", query);
    };

    controller.set_notify_channel(command.channel_id).await?;
    let was_idle = controller.state().await == PlaybackState::Idle;
    let count = controller
        .enqueue(references.into_iter().map(QueueEntry::new).collect())
        .await?;
    info!("➕ {} canciones agregadas en guild {}", count, controller.guild_id());

    start_playback(bot, controller, voice_channel_id).await?;

    let first_title = bot.players().resolver().title(&first).await;
    Ok(embeds::create_tracks_added_embed(count, &first_title, was_idle))
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    controller: &Arc<PlaybackController>,
) -> Result<CreateEmbed> {
    require_voice(ctx, command, controller).await?;

    Ok(match controller.skip().await? {
        Some(title) => embeds::create_success_embed("Saltada", &format!("⏭️ **{}**", title)),
        None => embeds::create_info_embed("Nada que saltar", "La cola está vacía"),
    })
}

async fn handle_pause(
    ctx: &Context,
    command: &CommandInteraction,
    controller: &Arc<PlaybackController>,
) -> Result<CreateEmbed> {
    require_voice(ctx, command, controller).await?;

    Ok(match controller.pause().await? {
        Some(offset) => embeds::create_success_embed(
            "Pausado",
            &format!(
                "⏸️ Posición guardada en **{}**. Usa `/resume` para continuar",
                embeds::format_duration(std::time::Duration::from_secs(offset))
            ),
        ),
        None => embeds::create_info_embed("Nada sonando", "No hay ninguna canción reproduciéndose"),
    })
}

async fn handle_hold(controller: &Arc<PlaybackController>) -> Result<CreateEmbed> {
    Ok(if controller.hold().await? {
        embeds::create_success_embed("En espera", "⏸️ Reproducción pausada sin salir del canal")
    } else {
        embeds::create_info_embed("Nada sonando", "No hay ninguna canción reproduciéndose")
    })
}

async fn handle_resume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &GuildRadioBot,
    controller: &Arc<PlaybackController>,
) -> Result<CreateEmbed> {
    let voice_channel_id = require_voice(ctx, command, controller).await?;

    if controller.state().await == PlaybackState::Paused {
        controller.resume().await?;
    } else {
        start_playback(bot, controller, voice_channel_id).await?;
    }

    Ok(match controller.snapshot().await.track {
        Some(track) => embeds::create_success_embed("Reanudado", &format!("▶️ **{}**", track.title)),
        None => embeds::create_info_embed("Cola vacía", "💡 Usa `/play <canción>` para agregar música"),
    })
}

async fn handle_queue(command: &CommandInteraction, bot: &GuildRadioBot, guild_id: GuildId) -> Result<CreateEmbed> {
    let page = int_option(command, "page").unwrap_or(1).max(1) as usize;

    let queue = bot.players().store().get(guild_id).await?;
    let queue_page = queue.page(page, QUEUE_PAGE_SIZE);

    let resolver = bot.players().resolver();
    let titles = join_all(
        queue_page
            .entries
            .iter()
            .map(|(_, entry)| resolver.title(&entry.reference)),
    )
    .await;

    Ok(embeds::create_queue_embed(&queue_page, &titles, queue.loop_enabled))
}

async fn handle_clear(controller: &Arc<PlaybackController>) -> Result<CreateEmbed> {
    let removed = controller.clear().await?;
    Ok(embeds::create_success_embed(
        "Cola limpiada",
        &format!("🗑️ Se quitaron {} canciones", removed),
    ))
}

async fn handle_dequeue(
    command: &CommandInteraction,
    bot: &GuildRadioBot,
    controller: &Arc<PlaybackController>,
) -> Result<CreateEmbed> {
    let index = int_option(command, "index")
        .ok_or_else(|| anyhow::anyhow!("Posición no proporcionada"))?;

    let removed = controller.remove_at(index.max(0) as usize).await?;
    let title = bot.players().resolver().title(&removed.reference).await;
    Ok(embeds::create_success_embed(
        "Quitada de la cola",
        &format!("🗑️ **{}**", title),
    ))
}

async fn handle_shuffle(controller: &Arc<PlaybackController>) -> Result<CreateEmbed> {
    let count = controller.shuffle().await?;
    Ok(embeds::create_success_embed(
        "Cola mezclada",
        &format!("🔀 {} canciones mezcladas", count),
    ))
}

async fn handle_loop(controller: &Arc<PlaybackController>) -> Result<CreateEmbed> {
    Ok(if controller.toggle_loop().await? {
        embeds::create_success_embed("Repetición", "🔁 Repetir cola activado")
    } else {
        embeds::create_success_embed("Repetición", "➡️ Repetición desactivada")
    })
}

async fn handle_volume(
    command: &CommandInteraction,
    bot: &GuildRadioBot,
    controller: &Arc<PlaybackController>,
) -> Result<CreateEmbed> {
    let volume = match int_option(command, "percent") {
        Some(percent) => controller.set_volume(percent as f32 / 100.0).await?,
        None => bot.players().store().volume(controller.guild_id()).await?,
    };
    Ok(embeds::create_volume_embed(volume))
}

async fn handle_leave(controller: &Arc<PlaybackController>) -> Result<CreateEmbed> {
    controller.stop().await?;
    Ok(embeds::create_success_embed("Desconectado", "👋 Hasta la próxima"))
}

// Funciones auxiliares

/// Conecta si hace falta y arranca la cola
async fn start_playback(
    bot: &GuildRadioBot,
    controller: &Arc<PlaybackController>,
    voice_channel_id: ChannelId,
) -> Result<()> {
    if controller.channel_id().await.is_some() {
        controller.advance().await?;
        return Ok(());
    }

    let guild_id = controller.guild_id();
    let connection = bot.transport().join(guild_id, voice_channel_id).await?;
    bot.players()
        .on_connection_established(guild_id, connection)
        .await?;
    Ok(())
}

/// El usuario debe estar en voz y, si el bot ya está conectado, en su mismo canal
async fn require_voice(
    ctx: &Context,
    command: &CommandInteraction,
    controller: &PlaybackController,
) -> Result<ChannelId> {
    let user_channel = get_user_voice_channel(ctx, controller.guild_id(), command.user.id)?;

    if let Some(bot_channel) = controller.channel_id().await {
        if bot_channel != user_channel {
            anyhow::bail!("Debes estar en el mismo canal de voz que el bot (<#{}>)", bot_channel);
        }
    }
    Ok(user_channel)
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("Debes estar en un canal de voz"))?;

    Ok(channel_id)
}

use anyhow::Result;
use async_trait::async_trait;
use serenity::{
    builder::{CreateMessage, EditMessage, GetMessages},
    http::Http,
    model::{channel::Embed, id::ChannelId, id::UserId},
};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::{
    audio::transport::{Notice, NotificationSink},
    ui::embeds,
};

/// Publica los avisos de reproducción en canales de texto de Discord
pub struct DiscordNotifier {
    http: Arc<Http>,
    bot_user: OnceLock<UserId>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            bot_user: OnceLock::new(),
        }
    }

    async fn bot_user(&self) -> Result<UserId> {
        if let Some(id) = self.bot_user.get() {
            return Ok(*id);
        }
        let id = self.http.get_current_user().await?.id;
        Ok(*self.bot_user.get_or_init(|| id))
    }
}

/// Reconstruye el aviso que originó un embed ya publicado
pub fn notice_from_embed(embed: &Embed) -> Notice {
    Notice {
        title: embed.title.clone().unwrap_or_default(),
        description: embed.description.clone().unwrap_or_default(),
        url: embed.url.clone(),
        thumbnail: embed.thumbnail.as_ref().map(|t| t.url.clone()),
        footer: embed.footer.as_ref().map(|f| f.text.clone()),
    }
}

#[async_trait]
impl NotificationSink for DiscordNotifier {
    async fn send(&self, channel_id: ChannelId, notice: &Notice) -> Result<()> {
        channel_id
            .send_message(
                self.http.as_ref(),
                CreateMessage::new().embed(embeds::create_notice_embed(notice)),
            )
            .await?;
        Ok(())
    }

    async fn edit_last_if_matching(
        &self,
        channel_id: ChannelId,
        predicate: &(dyn for<'n> Fn(&'n Notice) -> bool + Send + Sync),
        notice: &Notice,
    ) -> Result<bool> {
        let me = self.bot_user().await?;
        let last = channel_id
            .messages(self.http.as_ref(), GetMessages::new().limit(1))
            .await?
            .into_iter()
            .next();

        let Some(mut last) = last else {
            return Ok(false);
        };
        if last.author.id != me {
            return Ok(false);
        }
        let matches = last
            .embeds
            .first()
            .map(|embed| predicate(&notice_from_embed(embed)))
            .unwrap_or(false);
        if !matches {
            return Ok(false);
        }

        last.edit(
            self.http.as_ref(),
            EditMessage::new().embed(embeds::create_notice_embed(notice)),
        )
        .await?;
        debug!("✏️ Mensaje {} editado en canal {}", last.id, channel_id);
        Ok(true)
    }
}

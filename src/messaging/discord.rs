//! Discord messaging adapter using serenity.

use crate::error::{MessagingError, Result};
use crate::messaging::traits::{MessageHandler, Messaging};
use crate::{Attachment, Button, ButtonStyle as CrateButtonStyle, InboundMessage, MessageContent};

use anyhow::Context as _;
use serenity::all::{
    ButtonStyle, ChannelId, Context, CreateActionRow, CreateAttachment, CreateButton,
    CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage, EditMessage,
    EventHandler, GatewayIntents, Message, MessageId, ReactionType, Ready, ShardManager, User,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Discord adapter. Holds no connection state until [`Messaging::start`] is
/// called; `http`/`bot_user_id`/`shard_manager` fill in once the gateway
/// handshake completes.
pub struct DiscordAdapter {
    token: String,
    http: Arc<RwLock<Option<Arc<serenity::http::Http>>>>,
    bot_user_id: Arc<RwLock<Option<serenity::all::UserId>>>,
    shard_manager: Arc<RwLock<Option<Arc<ShardManager>>>>,
    handler: Arc<RwLock<Option<MessageHandler>>>,
}

impl DiscordAdapter {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            http: Arc::new(RwLock::new(None)),
            bot_user_id: Arc::new(RwLock::new(None)),
            shard_manager: Arc::new(RwLock::new(None)),
            handler: Arc::new(RwLock::new(None)),
        }
    }

    async fn http(&self) -> Result<Arc<serenity::http::Http>> {
        self.http
            .read()
            .await
            .clone()
            .ok_or_else(|| MessagingError::NotConnected("discord".into()).into())
    }

    fn channel(channel_id: &str) -> Result<ChannelId> {
        channel_id
            .parse::<u64>()
            .map(ChannelId::new)
            .map_err(|_| MessagingError::UnknownChannel(channel_id.to_string()).into())
    }

    fn message(message_id: &str) -> Result<MessageId> {
        message_id
            .parse::<u64>()
            .map(MessageId::new)
            .map_err(|_| MessagingError::UnknownMessage(message_id.to_string()).into())
    }

    fn send_failed(reason: impl std::fmt::Display) -> crate::Error {
        MessagingError::SendFailed {
            platform: "discord".into(),
            reason: reason.to_string(),
        }
        .into()
    }
}

impl Messaging for DiscordAdapter {
    fn platform(&self) -> &str {
        "discord"
    }

    fn on_message(&self, handler: MessageHandler) {
        // `start` takes a read lock to clone the handler into the serenity
        // event loop; a blocking write here would only ever contend with
        // that one read at connect time.
        if let Ok(mut guard) = self.handler.try_write() {
            *guard = Some(handler);
        }
    }

    async fn start(&self) -> Result<()> {
        let handler = self.handler.read().await.clone();
        let event_handler = Handler {
            inbound_handler: handler,
            http_slot: self.http.clone(),
            bot_user_id_slot: self.bot_user_id.clone(),
        };

        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
            | GatewayIntents::GUILDS;

        let mut client = serenity::Client::builder(&self.token, intents)
            .event_handler(event_handler)
            .await
            .context("failed to build discord client")
            .map_err(Self::send_failed)?;

        *self.http.write().await = Some(client.http.clone());
        *self.shard_manager.write().await = Some(client.shard_manager.clone());

        tokio::spawn(async move {
            if let Err(error) = client.start().await {
                tracing::error!(%error, "discord gateway error");
            }
        });

        Ok(())
    }

    async fn send_to_channel(&self, channel_id: &str, text: &str) -> Result<()> {
        self.send_to_channel_with_id(channel_id, text).await.map(|_| ())
    }

    async fn send_to_channel_with_id(&self, channel_id: &str, text: &str) -> Result<String> {
        let http = self.http().await?;
        let channel = Self::channel(channel_id)?;
        let mut last_id = None;
        for chunk in split_message(text, 2000) {
            let message = channel
                .say(&*http, &chunk)
                .await
                .context("failed to send discord message")
                .map_err(Self::send_failed)?;
            last_id = Some(message.id);
        }
        last_id
            .map(|id| id.to_string())
            .ok_or_else(|| Self::send_failed("message was empty"))
    }

    async fn reply_in_thread(&self, channel_id: &str, thread_id: &str, text: &str) -> Result<String> {
        // Discord threads are channels in their own right; replying "in
        // thread" is just sending to the thread's channel id.
        let _ = channel_id;
        self.send_to_channel_with_id(thread_id, text).await
    }

    async fn update_message(&self, channel_id: &str, message_id: &str, text: &str) -> Result<()> {
        let http = self.http().await?;
        let channel = Self::channel(channel_id)?;
        let message = Self::message(message_id)?;
        let truncated: String = text.chars().take(2000).collect();
        channel
            .edit_message(&*http, message, EditMessage::new().content(truncated))
            .await
            .context("failed to edit discord message")
            .map_err(Self::send_failed)?;
        Ok(())
    }

    async fn send_to_channel_with_files(
        &self,
        channel_id: &str,
        text: &str,
        files: &[Attachment],
    ) -> Result<String> {
        let http = self.http().await?;
        let channel = Self::channel(channel_id)?;

        let mut builder = CreateMessage::new();
        if !text.is_empty() {
            builder = builder.content(text);
        }
        for file in files {
            let response = reqwest::get(&file.url)
                .await
                .map_err(|error| Self::send_failed(format!("failed to fetch {}: {error}", file.url)))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|error| Self::send_failed(format!("failed to read {}: {error}", file.url)))?;
            builder = builder.add_file(CreateAttachment::bytes(bytes.to_vec(), &file.filename));
        }

        let message = channel
            .send_message(&*http, builder)
            .await
            .context("failed to send discord message with files")
            .map_err(Self::send_failed)?;
        Ok(message.id.to_string())
    }

    async fn add_reaction_to_message(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let http = self.http().await?;
        let channel = Self::channel(channel_id)?;
        let message = Self::message(message_id)?;
        channel
            .create_reaction(&*http, message, ReactionType::Unicode(emoji.to_string()))
            .await
            .context("failed to add discord reaction")
            .map_err(Self::send_failed)?;
        Ok(())
    }

    async fn replace_own_reaction_on_message(
        &self,
        channel_id: &str,
        message_id: &str,
        from: &str,
        to: &str,
    ) -> Result<()> {
        let http = self.http().await?;
        let channel = Self::channel(channel_id)?;
        let message = Self::message(message_id)?;
        // `user_id: None` deletes the reaction belonging to the token's own
        // user, not every reactor's — leaves any other user's reaction on
        // the same message untouched.
        channel
            .delete_reaction(&*http, message, None, ReactionType::Unicode(from.to_string()))
            .await
            .ok();
        channel
            .create_reaction(&*http, message, ReactionType::Unicode(to.to_string()))
            .await
            .context("failed to swap discord reaction")
            .map_err(Self::send_failed)?;
        Ok(())
    }

    async fn send_question_with_buttons(
        &self,
        channel_id: &str,
        text: &str,
        buttons: &[Button],
    ) -> Result<String> {
        let http = self.http().await?;
        let channel = Self::channel(channel_id)?;

        let row = CreateActionRow::Buttons(buttons.iter().take(5).map(build_button).collect());
        let builder = CreateMessage::new().content(text).components(vec![row]);
        let message = channel
            .send_message(&*http, builder)
            .await
            .context("failed to send discord question")
            .map_err(Self::send_failed)?;
        Ok(message.id.to_string())
    }

    async fn health_check(&self) -> Result<()> {
        let http = self.http().await?;
        http.get_current_user()
            .await
            .context("discord health check failed")
            .map_err(Self::send_failed)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(shard_manager) = self.shard_manager.read().await.as_ref() {
            shard_manager.shutdown_all().await;
        }
        tracing::info!("discord adapter shut down");
        Ok(())
    }
}

fn build_button(button: &Button) -> CreateButton {
    if button.style == CrateButtonStyle::Link {
        let url = button.url.as_deref().unwrap_or("https://discord.com");
        return CreateButton::new_link(url).label(&button.label);
    }
    let style = match button.style {
        CrateButtonStyle::Primary => ButtonStyle::Primary,
        CrateButtonStyle::Secondary => ButtonStyle::Secondary,
        CrateButtonStyle::Success => ButtonStyle::Success,
        CrateButtonStyle::Danger => ButtonStyle::Danger,
        CrateButtonStyle::Link => unreachable!("handled above"),
    };
    let custom_id = button.custom_id.as_deref().unwrap_or("btn");
    let custom_id: String = custom_id.chars().take(100).collect();
    CreateButton::new(custom_id).label(&button.label).style(style)
}

/// Split a message into chunks that fit within Discord's 2000 char limit,
/// preferring newline boundaries over hard cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }
        let safe_max = remaining
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let split_at = remaining[..safe_max]
            .rfind('\n')
            .or_else(|| remaining[..safe_max].rfind(' '))
            .unwrap_or(safe_max);
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }
    chunks
}

fn build_conversation_id(message: &Message) -> String {
    match message.guild_id {
        Some(guild_id) => format!("discord:{}:{}", guild_id, message.channel_id),
        None => format!("discord:dm:{}", message.author.id),
    }
}

fn extract_content(message: &Message) -> MessageContent {
    let resolved_content = resolve_mentions(&message.content, &message.mentions);
    if message.attachments.is_empty() {
        MessageContent::Text(resolved_content)
    } else {
        let attachments = message
            .attachments
            .iter()
            .map(|attachment| Attachment {
                filename: attachment.filename.clone(),
                mime_type: attachment.content_type.clone().unwrap_or_default(),
                url: attachment.url.clone(),
                size_bytes: Some(attachment.size as u64),
            })
            .collect();
        MessageContent::Media {
            text: if resolved_content.is_empty() { None } else { Some(resolved_content) },
            attachments,
        }
    }
}

/// Replace raw Discord mention syntax (`<@ID>` and `<@!ID>`) with readable display names.
fn resolve_mentions(content: &str, mentions: &[User]) -> String {
    let mut resolved = content.to_string();
    for user in mentions {
        let display_name = user.global_name.as_deref().unwrap_or(&user.name);
        resolved = resolved.replace(&format!("<@{}>", user.id), &format!("@{display_name}"));
        resolved = resolved.replace(&format!("<@!{}>", user.id), &format!("@{display_name}"));
    }
    resolved
}

fn build_metadata(message: &Message) -> (HashMap<String, serde_json::Value>, String) {
    let mut metadata = HashMap::new();
    metadata.insert("discord_channel_id".into(), message.channel_id.get().into());
    metadata.insert("discord_message_id".into(), message.id.get().into());
    if let Some(guild_id) = message.guild_id {
        metadata.insert("discord_guild_id".into(), guild_id.get().into());
    }

    let display_name = message
        .author
        .global_name
        .clone()
        .unwrap_or_else(|| message.author.name.clone());
    let formatted_author = format!("{display_name} (<@{}>)", message.author.id);
    (metadata, formatted_author)
}

struct Handler {
    inbound_handler: Option<MessageHandler>,
    http_slot: Arc<RwLock<Option<Arc<serenity::http::Http>>>>,
    bot_user_id_slot: Arc<RwLock<Option<serenity::all::UserId>>>,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(bot_name = %ready.user.name, "discord connected");
        *self.http_slot.write().await = Some(ctx.http.clone());
        *self.bot_user_id_slot.write().await = Some(ready.user.id);
    }

    async fn message(&self, _ctx: Context, message: Message) {
        let bot_user_id = *self.bot_user_id_slot.read().await;
        if bot_user_id.is_some_and(|id| message.author.id == id) {
            return;
        }

        let Some(handler) = &self.inbound_handler else {
            return;
        };

        let conversation_id = build_conversation_id(&message);
        let content = extract_content(&message);
        let (metadata, formatted_author) = build_metadata(&message);

        let inbound = InboundMessage {
            id: message.id.to_string(),
            source: "discord".into(),
            conversation_id,
            sender_id: message.author.id.to_string(),
            instance_key: None,
            content,
            timestamp: *message.timestamp,
            metadata,
            formatted_author: Some(formatted_author),
        };

        handler(inbound).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: serenity::all::Interaction) {
        let Some(component) = (match interaction {
            serenity::all::Interaction::Component(c) => Some(c),
            _ => None,
        }) else {
            return;
        };

        if let Err(error) = component
            .create_response(&ctx.http, CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()))
            .await
        {
            tracing::warn!(%error, "failed to acknowledge discord interaction");
        }

        let Some(handler) = &self.inbound_handler else {
            return;
        };

        let conversation_id = match component.guild_id {
            Some(guild_id) => format!("discord:{}:{}", guild_id, component.channel_id),
            None => format!("discord:dm:{}", component.user.id),
        };

        let mut metadata = HashMap::new();
        metadata.insert("discord_channel_id".into(), component.channel_id.get().into());
        metadata.insert("discord_message_id".into(), component.message.id.get().into());

        let content = MessageContent::Interaction {
            action_id: component.data.custom_id.clone(),
            block_id: None,
            values: Vec::new(),
            label: None,
            message_ts: Some(component.message.id.get().to_string()),
        };

        let inbound = InboundMessage {
            id: component.id.to_string(),
            source: "discord".into(),
            conversation_id,
            sender_id: component.user.id.to_string(),
            instance_key: None,
            content,
            timestamp: chrono::Utc::now(),
            metadata,
            formatted_author: Some(format!("{} (<@{}>)", component.user.name, component.user.id)),
        };

        handler(inbound).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_message_respects_limit() {
        let text = "a".repeat(10);
        let chunks = split_message(&text, 4);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
    }

    #[test]
    fn split_message_short_text_is_single_chunk() {
        assert_eq!(split_message("short", 2000), vec!["short".to_string()]);
    }

    #[test]
    fn resolve_mentions_leaves_plain_text_untouched() {
        assert_eq!(resolve_mentions("hello world", &[]), "hello world");
    }

    #[test]
    fn build_button_maps_link_style_without_custom_id() {
        let button = Button {
            label: "Docs".into(),
            custom_id: None,
            style: CrateButtonStyle::Link,
            url: Some("https://example.com".into()),
        };
        // build_button should not panic for a Link-style button with no custom_id.
        let _ = build_button(&button);
    }
}

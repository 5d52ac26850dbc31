//! Slack messaging adapter using slack-morphism.
//!
//! Inbound delivery runs over Socket Mode (no public HTTP endpoint to
//! configure); outbound calls use the Web API directly through a shared
//! session built from the bot token.

use crate::error::{MessagingError, Result};
use crate::messaging::traits::{MessageHandler, Messaging};
use crate::{Attachment, Button, ButtonStyle as CrateButtonStyle, InboundMessage, MessageContent};

use anyhow::Context as _;
use slack_morphism::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// State shared with socket mode callbacks via `SlackClientEventsUserState`.
struct SlackAdapterState {
    handler: MessageHandler,
    bot_user_id: String,
}

pub struct SlackAdapter {
    bot_token: String,
    app_token: String,
    client: Arc<SlackHyperClient>,
    token: SlackApiToken,
    handler: RwLock<Option<MessageHandler>>,
    shutdown_tx: Arc<RwLock<Option<mpsc::Sender<()>>>>,
}

impl SlackAdapter {
    pub fn new(bot_token: impl Into<String>, app_token: impl Into<String>) -> anyhow::Result<Self> {
        let bot_token = bot_token.into();
        let client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new().context("failed to create slack HTTP connector")?,
        ));
        let token = SlackApiToken::new(SlackApiTokenValue(bot_token.clone()));
        Ok(Self {
            bot_token,
            app_token: app_token.into(),
            client,
            token,
            handler: RwLock::new(None),
            shutdown_tx: Arc::new(RwLock::new(None)),
        })
    }

    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.token)
    }

    fn send_failed(reason: impl std::fmt::Display) -> crate::Error {
        MessagingError::SendFailed {
            platform: "slack".into(),
            reason: reason.to_string(),
        }
        .into()
    }
}

impl Messaging for SlackAdapter {
    fn platform(&self) -> &str {
        "slack"
    }

    fn on_message(&self, handler: MessageHandler) {
        // Socket Mode needs the handler baked into the listener's user state
        // at connect time; stash it for `start` to pick up.
        if let Ok(mut guard) = self.handler.try_write() {
            *guard = Some(handler);
        }
    }

    async fn start(&self) -> Result<()> {
        let handler = self
            .handler
            .read()
            .await
            .clone()
            .ok_or_else(|| Self::send_failed("on_message was never called"))?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let auth_response = self
            .session()
            .auth_test()
            .await
            .context("failed to call auth.test for bot user id")
            .map_err(Self::send_failed)?;
        let bot_user_id = auth_response.user_id.0.clone();
        tracing::info!(bot_user_id = %bot_user_id, "slack bot user id resolved");

        let adapter_state = Arc::new(SlackAdapterState { handler, bot_user_id });

        let callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

        let listener_client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new()
                .context("failed to create slack socket mode connector")
                .map_err(Self::send_failed)?,
        ));

        let listener_environment = Arc::new(
            SlackClientEventsListenerEnvironment::new(listener_client)
                .with_error_handler(slack_error_handler)
                .with_user_state(adapter_state),
        );

        let listener = SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment,
            callbacks,
        );

        let app_token = SlackApiToken::new(SlackApiTokenValue(self.app_token.clone()));

        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                tracing::error!(%error, "failed to start slack socket mode listener");
                return;
            }
            tracing::info!("slack socket mode connected");
            tokio::select! {
                exit_code = listener.serve() => {
                    tracing::info!(exit_code, "slack socket mode listener stopped");
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("slack socket mode shutting down");
                    listener.shutdown().await;
                }
            }
        });

        Ok(())
    }

    async fn send_to_channel(&self, channel_id: &str, text: &str) -> Result<()> {
        self.send_to_channel_with_id(channel_id, text).await.map(|_| ())
    }

    async fn send_to_channel_with_id(&self, channel_id: &str, text: &str) -> Result<String> {
        let session = self.session();
        let mut last_ts = None;
        for chunk in split_message(text, 12_000) {
            let req = SlackApiChatPostMessageRequest::new(
                SlackChannelId(channel_id.to_string()),
                markdown_content(chunk),
            );
            let resp = session
                .chat_post_message(&req)
                .await
                .context("failed to post slack message")
                .map_err(Self::send_failed)?;
            last_ts = Some(resp.ts.0);
        }
        last_ts.ok_or_else(|| Self::send_failed("message was empty"))
    }

    async fn reply_in_thread(&self, channel_id: &str, thread_id: &str, text: &str) -> Result<String> {
        let session = self.session();
        let mut last_ts = None;
        for chunk in split_message(text, 12_000) {
            let req = SlackApiChatPostMessageRequest::new(
                SlackChannelId(channel_id.to_string()),
                markdown_content(chunk),
            )
            .opt_thread_ts(Some(SlackTs(thread_id.to_string())));
            let resp = session
                .chat_post_message(&req)
                .await
                .context("failed to post slack thread reply")
                .map_err(Self::send_failed)?;
            last_ts = Some(resp.ts.0);
        }
        last_ts.ok_or_else(|| Self::send_failed("message was empty"))
    }

    async fn update_message(&self, channel_id: &str, message_id: &str, text: &str) -> Result<()> {
        let session = self.session();
        let truncated: String = text.chars().take(11_997).collect();
        let req = SlackApiChatUpdateRequest::new(
            SlackChannelId(channel_id.to_string()),
            markdown_content(truncated),
            SlackTs(message_id.to_string()),
        );
        session
            .chat_update(&req)
            .await
            .context("failed to edit slack message")
            .map_err(Self::send_failed)?;
        Ok(())
    }

    async fn send_to_channel_with_files(
        &self,
        channel_id: &str,
        text: &str,
        files: &[Attachment],
    ) -> Result<String> {
        let session = self.session();
        let mut file_ids = Vec::new();

        for file in files {
            let bytes = reqwest::get(&file.url)
                .await
                .map_err(|error| Self::send_failed(format!("failed to fetch {}: {error}", file.url)))?
                .bytes()
                .await
                .map_err(|error| Self::send_failed(format!("failed to read {}: {error}", file.url)))?;

            let upload_url_response = session
                .get_upload_url_external(&SlackApiFilesGetUploadUrlExternalRequest::new(
                    file.filename.clone(),
                    bytes.len(),
                ))
                .await
                .context("failed to get slack upload url")
                .map_err(Self::send_failed)?;

            session
                .files_upload_via_url(&SlackApiFilesUploadViaUrlRequest::new(
                    upload_url_response.upload_url,
                    bytes.to_vec(),
                    file.mime_type.clone(),
                ))
                .await
                .context("failed to upload file to slack")
                .map_err(Self::send_failed)?;

            file_ids.push(upload_url_response.file_id);
        }

        let completes: Vec<_> = file_ids
            .into_iter()
            .map(|id| SlackApiFilesComplete::new(id))
            .collect();
        let mut complete_request = SlackApiFilesCompleteUploadExternalRequest::new(completes)
            .with_channel_id(SlackChannelId(channel_id.to_string()));
        if !text.is_empty() {
            complete_request = complete_request.opt_initial_comment(Some(text.to_string()));
        }
        let resp = session
            .files_complete_upload_external(&complete_request)
            .await
            .context("failed to complete slack file upload")
            .map_err(Self::send_failed)?;

        resp.files
            .first()
            .map(|f| f.id.clone())
            .ok_or_else(|| Self::send_failed("slack returned no uploaded file"))
    }

    async fn add_reaction_to_message(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let session = self.session();
        let req = SlackApiReactionsAddRequest::new(
            SlackChannelId(channel_id.to_string()),
            SlackReactionName(sanitize_reaction_name(emoji)),
            SlackTs(message_id.to_string()),
        );
        session
            .reactions_add(&req)
            .await
            .context("failed to add slack reaction")
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
        // reactions.remove is scoped to the calling token's own identity, so
        // this only ever touches the bot's own `from` reaction.
        let session = self.session();
        let remove_req = SlackApiReactionsRemoveRequest::new(SlackReactionName(sanitize_reaction_name(from)))
            .with_channel(SlackChannelId(channel_id.to_string()))
            .with_timestamp(SlackTs(message_id.to_string()));
        session.reactions_remove(&remove_req).await.ok();

        self.add_reaction_to_message(channel_id, message_id, to).await
    }

    async fn send_question_with_buttons(
        &self,
        channel_id: &str,
        text: &str,
        buttons: &[Button],
    ) -> Result<String> {
        let session = self.session();
        let block = SlackActionsBlock::new(buttons.iter().map(build_block_button).collect());
        let content = SlackMessageContent::new()
            .with_text(text.to_string())
            .with_blocks(vec![SlackBlock::Actions(block)]);
        let req = SlackApiChatPostMessageRequest::new(SlackChannelId(channel_id.to_string()), content);
        let resp = session
            .chat_post_message(&req)
            .await
            .context("failed to post slack question")
            .map_err(Self::send_failed)?;
        Ok(resp.ts.0)
    }

    async fn health_check(&self) -> Result<()> {
        self.session()
            .auth_test()
            .await
            .context("slack health check failed")
            .map_err(Self::send_failed)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(()).await;
        }
        tracing::info!("slack adapter shut down");
        Ok(())
    }
}

fn build_block_button(button: &Button) -> SlackActionBlockElement {
    let mut b = SlackBlockButtonElement::new(
        SlackActionId(button.custom_id.clone().unwrap_or_else(|| "btn".into())),
        SlackBlockPlainTextOnly::from(button.label.clone()),
    );
    if let Some(url) = &button.url {
        if button.style == CrateButtonStyle::Link {
            b = b.with_url(url.clone());
        }
    }
    SlackActionBlockElement::Button(b)
}

fn sanitize_reaction_name(emoji: &str) -> String {
    emoji.trim_matches(':').to_string()
}

/// Split `text` into chunks of at most `max_len` characters, preferring line
/// boundaries.
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

fn markdown_content(text: impl Into<String>) -> SlackMessageContent {
    SlackMessageContent::new().with_text(text.into())
}

async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> UserCallbackResult<()> {
    if let SlackEventCallbackBody::Message(msg) = event.event {
        handle_message_event(msg, &event.team_id, states).await?;
    }
    Ok(())
}

async fn handle_message_event(
    msg_event: SlackMessageEvent,
    team_id: &SlackTeamId,
    states: SlackClientEventsUserState,
) -> UserCallbackResult<()> {
    if msg_event.subtype.is_some() {
        return Ok(());
    }

    let state_guard = states.read().await;
    let adapter_state = state_guard
        .get_user_state::<Arc<SlackAdapterState>>()
        .expect("SlackAdapterState must be in user_state");

    let Some(user_id) = msg_event.sender.user.as_ref().map(|u| u.0.clone()) else {
        return Ok(());
    };
    if user_id == adapter_state.bot_user_id {
        return Ok(());
    }

    let team_id_str = team_id.0.clone();
    let channel_id = msg_event.origin.channel.as_ref().map(|c| c.0.clone()).unwrap_or_default();
    let ts = msg_event.origin.ts.0.clone();

    let conversation_id = match &msg_event.origin.thread_ts {
        Some(thread_ts) => format!("slack:{}:{}:{}", team_id_str, channel_id, thread_ts.0),
        None => format!("slack:{}:{}", team_id_str, channel_id),
    };

    let content = extract_message_content(&msg_event.content);

    let mut metadata = HashMap::new();
    metadata.insert("slack_workspace_id".into(), serde_json::Value::String(team_id_str));
    metadata.insert("slack_channel_id".into(), serde_json::Value::String(channel_id.clone()));
    metadata.insert("slack_message_ts".into(), serde_json::Value::String(ts.clone()));
    if let Some(thread_ts) = &msg_event.origin.thread_ts {
        metadata.insert("slack_thread_ts".into(), serde_json::Value::String(thread_ts.0.clone()));
    }

    let inbound = InboundMessage {
        id: ts.clone(),
        source: "slack".into(),
        conversation_id,
        sender_id: user_id.clone(),
        instance_key: None,
        content,
        timestamp: chrono::Utc::now(),
        metadata,
        formatted_author: Some(format!("<@{user_id}>")),
    };

    (adapter_state.handler)(inbound).await;
    Ok(())
}

fn slack_error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackHyperClient>,
    _states: SlackClientEventsUserState,
) -> HttpStatusCode {
    tracing::warn!(error = %err, "slack socket mode error");
    HttpStatusCode::OK
}

fn extract_message_content(content: &Option<SlackMessageContent>) -> MessageContent {
    MessageContent::Text(content.as_ref().and_then(|c| c.text.clone()).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_message_respects_limit() {
        let text = "a".repeat(30);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn split_message_short_text_is_single_chunk() {
        assert_eq!(split_message("short", 12_000), vec!["short".to_string()]);
    }

    #[test]
    fn sanitize_reaction_name_strips_colons() {
        assert_eq!(sanitize_reaction_name(":thumbsup:"), "thumbsup");
        assert_eq!(sanitize_reaction_name("thumbsup"), "thumbsup");
    }
}

//! Messaging trait and dynamic dispatch companion.
//!
//! Every platform adapter (Discord, Slack) implements [`Messaging`] directly
//! against a channel and message id rather than against a triggering
//! [`InboundMessage`] — handlers address whatever channel an event resolved
//! to, not necessarily the channel the last inbound message came from.

use crate::error::Result;
use crate::{Attachment, Button, InboundMessage};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Callback invoked for every inbound message an adapter receives, registered
/// once via [`Messaging::on_message`] before [`Messaging::start`] is called.
pub type MessageHandler =
    Arc<dyn Fn(InboundMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Static trait for messaging adapters. Use this for type-safe implementations.
pub trait Messaging: Send + Sync + 'static {
    /// Platform identifier used as the `source`/`platform` tag on inbound
    /// messages and bindings ("discord", "slack").
    fn platform(&self) -> &str;

    /// Register the callback the adapter invokes for every inbound message.
    /// Must be called before [`Messaging::start`].
    fn on_message(&self, handler: MessageHandler);

    /// Connect to the platform and begin delivering inbound messages to the
    /// registered handler. Resolves once the connection is established; the
    /// receive loop continues in the background until `shutdown`.
    fn start(&self) -> impl Future<Output = Result<()>> + Send;

    /// Post a new message to `channel_id`, not waiting for its id.
    fn send_to_channel(
        &self,
        channel_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Post a new message to `channel_id` and return its platform id, for
    /// later `update_message`/`add_reaction_to_message`/`reply_in_thread`.
    fn send_to_channel_with_id(
        &self,
        channel_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Reply within an existing thread (Slack thread_ts / Discord thread
    /// channel), returning the new message's id.
    fn reply_in_thread(
        &self,
        channel_id: &str,
        thread_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Edit a previously sent message in place.
    fn update_message(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Post a new message with one or more file attachments, returning its id.
    fn send_to_channel_with_files(
        &self,
        channel_id: &str,
        text: &str,
        files: &[Attachment],
    ) -> impl Future<Output = Result<String>> + Send;

    /// React to an existing message with `emoji` (a platform-native emoji
    /// name or unicode codepoint).
    fn add_reaction_to_message(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove the bot's own `from` reaction on a message and add `to` in its
    /// place — used to swap a progress indicator for a completion one
    /// without accumulating reactions across a long-running turn. Only the
    /// bot's own prior reaction is touched; other users' reactions on the
    /// same message are left alone.
    fn replace_own_reaction_on_message(
        &self,
        channel_id: &str,
        message_id: &str,
        from: &str,
        to: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Post a question with inline buttons attached, returning the message id
    /// so a later interaction can be matched back to it.
    fn send_question_with_buttons(
        &self,
        channel_id: &str,
        text: &str,
        buttons: &[Button],
    ) -> impl Future<Output = Result<String>> + Send;

    /// Liveness probe for the `/health` endpoint and status reporting.
    fn health_check(&self) -> impl Future<Output = Result<()>> + Send;

    /// Graceful shutdown, releasing any gateway connection.
    fn shutdown(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Dynamic trait for runtime polymorphism. Use this when storing adapters as
/// `Arc<dyn MessagingDyn>` behind a uniform manager.
pub trait MessagingDyn: Send + Sync + 'static {
    fn platform(&self) -> &str;

    fn on_message(&self, handler: MessageHandler);

    fn start<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn send_to_channel<'a>(
        &'a self,
        channel_id: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn send_to_channel_with_id<'a>(
        &'a self,
        channel_id: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    fn reply_in_thread<'a>(
        &'a self,
        channel_id: &'a str,
        thread_id: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    fn update_message<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn send_to_channel_with_files<'a>(
        &'a self,
        channel_id: &'a str,
        text: &'a str,
        files: &'a [Attachment],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    fn add_reaction_to_message<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
        emoji: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn replace_own_reaction_on_message<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn send_question_with_buttons<'a>(
        &'a self,
        channel_id: &'a str,
        text: &'a str,
        buttons: &'a [Button],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Blanket implementation: any type implementing `Messaging` automatically
/// implements `MessagingDyn`.
impl<T: Messaging> MessagingDyn for T {
    fn platform(&self) -> &str {
        Messaging::platform(self)
    }

    fn on_message(&self, handler: MessageHandler) {
        Messaging::on_message(self, handler)
    }

    fn start<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Messaging::start(self))
    }

    fn send_to_channel<'a>(
        &'a self,
        channel_id: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Messaging::send_to_channel(self, channel_id, text))
    }

    fn send_to_channel_with_id<'a>(
        &'a self,
        channel_id: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(Messaging::send_to_channel_with_id(self, channel_id, text))
    }

    fn reply_in_thread<'a>(
        &'a self,
        channel_id: &'a str,
        thread_id: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(Messaging::reply_in_thread(self, channel_id, thread_id, text))
    }

    fn update_message<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Messaging::update_message(self, channel_id, message_id, text))
    }

    fn send_to_channel_with_files<'a>(
        &'a self,
        channel_id: &'a str,
        text: &'a str,
        files: &'a [Attachment],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(Messaging::send_to_channel_with_files(
            self, channel_id, text, files,
        ))
    }

    fn add_reaction_to_message<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
        emoji: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Messaging::add_reaction_to_message(
            self, channel_id, message_id, emoji,
        ))
    }

    fn replace_own_reaction_on_message<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Messaging::replace_own_reaction_on_message(
            self, channel_id, message_id, from, to,
        ))
    }

    fn send_question_with_buttons<'a>(
        &'a self,
        channel_id: &'a str,
        text: &'a str,
        buttons: &'a [Button],
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(Messaging::send_question_with_buttons(
            self, channel_id, text, buttons,
        ))
    }

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Messaging::health_check(self))
    }

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Messaging::shutdown(self))
    }
}

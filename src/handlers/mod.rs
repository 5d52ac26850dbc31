//! Event handlers — the `§4.6` projection rules, one module per event family.
//!
//! [`dispatch`] is the pipeline's single entry point; every handler is an
//! `async fn(&Deps, &EventContext) -> Result<()>`, matching the "pure
//! function of (deps, EventContext)" shape the pipeline hands events to.

mod idle;
mod notification;
mod prompt;
mod session;
mod thinking;
mod tool;

use crate::event::{Event, EventContext};
use crate::pipeline::Deps;
use crate::Result;

pub async fn dispatch(deps: &Deps, ctx: EventContext) -> Result<()> {
    match &ctx.event {
        Event::SessionStart { .. } => session::handle_start(deps, &ctx).await,
        Event::SessionEnd { .. } => session::handle_end(deps, &ctx).await,
        Event::SessionError { .. } => session::handle_error(deps, &ctx).await,
        Event::SessionNotification { .. } => notification::handle(deps, &ctx).await,
        Event::SessionIdle { .. } => idle::handle(deps, &ctx).await,
        Event::ThinkingStart { .. } => thinking::handle_start(deps, &ctx).await,
        Event::ThinkingStop { .. } => thinking::handle_stop(deps, &ctx).await,
        Event::ToolActivity { .. } => tool::handle_activity(deps, &ctx).await,
        Event::ToolFailure { .. } => tool::handle_failure(deps, &ctx).await,
        Event::PromptSubmit { .. } => prompt::handle_submit(deps, &ctx).await,
        Event::TaskCompleted { .. } => prompt::handle_task_completed(deps, &ctx).await,
        Event::PermissionRequest { .. } => prompt::handle_permission_request(deps, &ctx).await,
        Event::TeammateIdle { .. } => prompt::handle_teammate_idle(deps, &ctx).await,
    }
}

/// Ensure a "📝 Prompt" anchor exists for the turn at `ctx.key`, creating it
/// on first use (§4.5 step 1). Skipped entirely for turns with neither a
/// triggering user message nor a prompt preview — there's nothing to anchor.
/// Idempotent: the network call happens at most once per turn regardless of
/// how many auto-pending events arrive for the same key.
pub(crate) async fn ensure_anchor(deps: &Deps, ctx: &EventContext) -> Option<String> {
    let entry = deps.tracker.get(&ctx.key)?;
    if let Some(id) = entry.start_message_id.clone() {
        return Some(id);
    }
    if entry.message_id.is_none() && entry.prompt_preview.is_none() {
        return None;
    }

    let adapter = deps.messaging.get(&ctx.platform)?;
    let text = anchor_text(entry.prompt_preview.as_deref(), ctx.event.agent_type());
    match adapter.send_to_channel_with_id(&ctx.channel_id, &text).await {
        Ok(message_id) => deps.tracker.ensure_start_message(&ctx.key, || message_id),
        Err(error) => {
            tracing::warn!(%error, key = %ctx.key, "failed to post anchor message");
            None
        }
    }
}

fn anchor_text(preview: Option<&str>, agent_type: &str) -> String {
    match preview {
        Some(preview) if !preview.is_empty() => format!("📝 Prompt: {preview}"),
        _ => format!("📝 Prompt ({agent_type})"),
    }
}

/// Post `text` to `ctx`'s channel, logging (never propagating) a send
/// failure — per §7, messaging errors are local and must not unwind a
/// handler's remaining steps.
pub(crate) async fn send(deps: &Deps, ctx: &EventContext, text: &str) {
    let Some(adapter) = deps.messaging.get(&ctx.platform) else {
        return;
    };
    if let Err(error) = adapter.send_to_channel(&ctx.channel_id, text).await {
        tracing::warn!(%error, channel = %ctx.channel_id, "failed to send channel message");
    }
}

/// Post `text` to `ctx`'s channel, splitting it across multiple messages if
/// it exceeds the platform's chunk size.
pub(crate) async fn send_chunked(deps: &Deps, ctx: &EventContext, text: &str) {
    for chunk in chunk_for_platform(text, &ctx.platform) {
        send(deps, ctx, &chunk).await;
    }
}

/// Schedule (or defer to an already-pending) debounced flush of the
/// streaming message backing `ctx.key` (§4.3). Bursts of appends within the
/// debounce window coalesce onto one edit; if the window elapses inside the
/// platform's rate-cap cooldown, the flush re-arms until it clears.
pub(crate) fn schedule_stream_flush(deps: &Deps, ctx: &EventContext) {
    if !deps.streaming.begin_flush(&ctx.key) {
        return;
    }
    let deps = deps.clone();
    let ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(deps.config.streaming.debounce).await;
        while !deps.streaming.can_stream(&ctx.key) {
            tokio::time::sleep(deps.streaming.cooldown_remaining(&ctx.key)).await;
        }
        flush_now(&deps, &ctx).await;
        deps.streaming.end_flush(&ctx.key);
    });
    deps.timers.set(ctx.key.clone(), "stream-flush", handle);
}

/// Push the streaming message's current rendered content immediately,
/// bypassing the debounce (but not the mutation it guards). Used by the
/// flush timer above and by the thinking ticker, which already paces itself
/// to one tick per second.
pub(crate) async fn flush_now(deps: &Deps, ctx: &EventContext) {
    let Some(rendered) = deps.streaming.render(&ctx.key) else {
        return;
    };
    let Some(message_id) = deps.streaming.message_id(&ctx.key) else {
        return;
    };
    let Some(adapter) = deps.messaging.get(&ctx.platform) else {
        return;
    };
    match adapter.update_message(&ctx.channel_id, &message_id, &rendered).await {
        Ok(()) => {
            deps.streaming.mark_sent(&ctx.key);
            #[cfg(feature = "metrics")]
            crate::telemetry::Metrics::global().streaming_edits_total.inc();
        }
        Err(error) => tracing::warn!(%error, "failed to update streaming message"),
    }
}

/// Discord's 2000-char message cap binds tighter than Slack's block-text
/// limit, so it's the only platform that needs real chunking in practice;
/// everything else gets a generous cap that only matters for pathological
/// walls of text.
fn chunk_for_platform(text: &str, platform: &str) -> Vec<String> {
    let limit = match platform {
        "discord" => 2000,
        _ => 12_000,
    };
    split_message(text, limit)
}

/// Split `text` into chunks of at most `limit` characters, preferring line
/// boundaries and falling back to a hard char-boundary split for any single
/// line longer than `limit`.
fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.split_inclusive('\n') {
        if !current.is_empty() && current.chars().count() + line.chars().count() > limit {
            chunks.push(std::mem::take(&mut current));
        }
        if line.chars().count() > limit {
            let mut rest = line;
            while rest.chars().count() > limit {
                let split_at = rest
                    .char_indices()
                    .nth(limit)
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                let (head, tail) = rest.split_at(split_at);
                chunks.push(head.to_string());
                rest = tail;
            }
            current.push_str(rest);
        } else {
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Truncate `text` to at most `max` characters, appending an ellipsis when
/// truncation actually happened.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut truncated: String = text.chars().take(max).collect();
        truncated.push('…');
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_text_prefers_preview() {
        assert_eq!(anchor_text(Some("fix the bug"), "claude"), "📝 Prompt: fix the bug");
        assert_eq!(anchor_text(None, "claude"), "📝 Prompt (claude)");
        assert_eq!(anchor_text(Some(""), "codex"), "📝 Prompt (codex)");
    }

    #[test]
    fn truncate_chars_only_adds_marker_when_over_limit() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello…");
    }

    #[test]
    fn split_message_respects_limit_and_keeps_order() {
        let text = "a".repeat(10);
        let chunks = split_message(&text, 4);
        assert_eq!(chunks, vec!["aaaa", "aaaa", "aa"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn split_message_short_text_is_single_chunk() {
        assert_eq!(split_message("short", 2000), vec!["short".to_string()]);
    }
}

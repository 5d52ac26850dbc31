//! `thinking.start` / `thinking.stop` handlers (§4.6) — the elapsed-time
//! ticker that keeps the streaming message's last line current while the
//! agent reasons.

use super::{flush_now, schedule_stream_flush};
use crate::event::EventContext;
use crate::pipeline::Deps;
use crate::Result;
use tokio::time::Duration;

const TICKER_NAME: &str = "thinking";
const MIN_SECONDS_TO_REPORT: u64 = 5;

pub async fn handle_start(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let entry = deps.tracker.get(&ctx.key);

    if let Some(message_id) = entry.as_ref().and_then(|entry| entry.message_id.clone()) {
        if let Some(adapter) = deps.messaging.get(&ctx.platform) {
            if let Err(error) = adapter.add_reaction_to_message(&ctx.channel_id, &message_id, "🧠").await {
                tracing::warn!(%error, "failed to add thinking reaction");
            } else {
                deps.tracker.set_reaction(&ctx.key, "🧠");
            }
        }
    }

    if !deps.streaming.has(&ctx.key) {
        if let Some(anchor) = entry.as_ref().and_then(|entry| entry.start_message_id.clone()) {
            deps.streaming.start(&ctx.key, anchor);
        }
    }

    if deps.streaming.has(&ctx.key) {
        deps.streaming.append_cumulative(&ctx.key, "🧠 Thinking...");
        schedule_stream_flush(deps, ctx);
    }

    deps.tracker.mark_thinking_start(&ctx.key);
    spawn_ticker(deps, ctx);
    Ok(())
}

pub async fn handle_stop(deps: &Deps, ctx: &EventContext) -> Result<()> {
    deps.timers.cancel(&ctx.key, TICKER_NAME);

    let elapsed = deps.tracker.thinking_elapsed(&ctx.key).unwrap_or_default();
    if elapsed.as_secs() >= MIN_SECONDS_TO_REPORT {
        deps.streaming
            .append_cumulative(&ctx.key, format!("💭 Thought for {}s", elapsed.as_secs()));
        schedule_stream_flush(deps, ctx);
    }

    if let Some(entry) = deps.tracker.get(&ctx.key) {
        if let Some(message_id) = entry.message_id {
            if let Some(adapter) = deps.messaging.get(&ctx.platform) {
                let from = entry.reaction.as_deref().unwrap_or("🧠");
                if let Err(error) = adapter
                    .replace_own_reaction_on_message(&ctx.channel_id, &message_id, from, "⏳")
                    .await
                {
                    tracing::warn!(%error, "failed to swap thinking reaction for ⏳");
                } else {
                    deps.tracker.set_reaction(&ctx.key, "⏳");
                }
            }
        }
    }
    Ok(())
}

fn spawn_ticker(deps: &Deps, ctx: &EventContext) {
    let deps = deps.clone();
    let ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            let Some(elapsed) = deps.tracker.thinking_elapsed(&ctx.key) else {
                return;
            };
            if deps.streaming.can_stream(&ctx.key) {
                deps.streaming
                    .update_last(&ctx.key, format!("🧠 Thinking for {}s...", elapsed.as_secs()));
                flush_now(&deps, &ctx).await;
            }
        }
    });
    deps.timers.set(ctx.key.clone(), TICKER_NAME, handle);
}

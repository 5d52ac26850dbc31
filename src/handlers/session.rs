//! `session.start` / `session.end` / `session.error` handlers (§4.6).

use super::send;
use crate::event::Event;
use crate::event::EventContext;
use crate::pipeline::Deps;
use crate::Result;

pub async fn handle_start(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let Event::SessionStart { source, model, .. } = &ctx.event else {
        unreachable!("dispatch routed the wrong variant to session::handle_start")
    };

    deps.timers.cancel(&ctx.key, "lifecycle");

    if source.as_deref() == Some("startup") {
        return Ok(());
    }

    let mut text = format!("🟢 Session started ({}", source.as_deref().unwrap_or("unknown"));
    if let Some(model) = model {
        text.push_str(", ");
        text.push_str(model);
    }
    text.push(')');
    send(deps, ctx, &text).await;
    Ok(())
}

pub async fn handle_end(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let Event::SessionEnd { reason, .. } = &ctx.event else {
        unreachable!("dispatch routed the wrong variant to session::handle_end")
    };

    let reason = reason.as_deref().unwrap_or("unknown");
    send(deps, ctx, &format!("⚪ Session ended ({reason})")).await;
    Ok(())
}

/// `session.error` — one of the two terminal event types. The pipeline
/// already cancelled every timer for this key before dispatch (§4.5 step 4).
pub async fn handle_error(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let Event::SessionError { text, .. } = &ctx.event else {
        unreachable!("dispatch routed the wrong variant to session::handle_error")
    };

    let text = text.as_deref().unwrap_or("unknown error");
    send(deps, ctx, &format!("⚠️ {text}")).await;

    // Accumulated streaming content is discarded, not finalized — the error
    // line subsumes it (§4.6).
    deps.streaming.discard(&ctx.key);
    mark_error_reaction(deps, ctx).await;
    Ok(())
}

/// Replace the turn's ⏳/🧠 indicator with ❌ on the triggering message, then
/// discard the tracker entry — an errored turn has nothing worth
/// remembering for duplicate-detection (§4.2).
async fn mark_error_reaction(deps: &Deps, ctx: &EventContext) {
    let Some(entry) = deps.tracker.mark_error(&ctx.key) else {
        return;
    };
    let Some(message_id) = entry.message_id else {
        return;
    };
    let Some(adapter) = deps.messaging.get(&ctx.platform) else {
        return;
    };
    let from = entry.reaction.as_deref().unwrap_or("⏳");
    if let Err(error) = adapter
        .replace_own_reaction_on_message(&ctx.channel_id, &message_id, from, "❌")
        .await
    {
        tracing::warn!(%error, "failed to swap error reaction");
    }
}

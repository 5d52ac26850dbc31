//! `tool.activity` / `tool.failure` handlers (§4.6).

use super::{schedule_stream_flush, send, truncate_chars};
use crate::event::{Event, EventContext};
use crate::pipeline::Deps;
use crate::Result;

pub async fn handle_activity(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let Event::ToolActivity { text, .. } = &ctx.event else {
        unreachable!("dispatch routed the wrong variant to tool::handle_activity")
    };

    deps.streaming.append_cumulative(&ctx.key, text.clone());
    schedule_stream_flush(deps, ctx);
    deps.timers.cancel(&ctx.key, "lifecycle");
    Ok(())
}

pub async fn handle_failure(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let Event::ToolFailure { tool_name, error, .. } = &ctx.event else {
        unreachable!("dispatch routed the wrong variant to tool::handle_failure")
    };

    let mut text = format!("⚠️ *{tool_name} failed*");
    if let Some(error) = error {
        text.push('\n');
        text.push_str(&truncate_chars(error, 150));
    }
    send(deps, ctx, &text).await;
    Ok(())
}

//! `session.notification` handler (§4.6).

use super::send;
use crate::event::{Event, EventContext};
use crate::pipeline::Deps;
use crate::Result;

pub async fn handle(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let Event::SessionNotification {
        notification_type,
        text,
        prompt_text,
        ..
    } = &ctx.event
    else {
        unreachable!("dispatch routed the wrong variant to notification::handle")
    };

    send(deps, ctx, &format!("{} {text}", notification_type.emoji())).await;

    if let Some(prompt_text) = prompt_text {
        send(deps, ctx, prompt_text).await;
    }
    Ok(())
}

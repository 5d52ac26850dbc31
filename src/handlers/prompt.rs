//! `prompt.submit` / `task.completed` / `permission.request` / `teammate.idle`
//! handlers (§4.6).

use super::{send, truncate_chars};
use crate::event::{Event, EventContext};
use crate::pipeline::Deps;
use crate::Result;

/// Only `claude` carries the `prompt.submit` hook in the agent capability
/// matrix (§6) — the other CLIs either don't emit it or don't have a prompt
/// step distinct from `session.idle`.
fn supports_prompt_submit(agent_type: &str) -> bool {
    agent_type == "claude"
}

pub async fn handle_submit(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let Event::PromptSubmit { text, agent_type, .. } = &ctx.event else {
        unreachable!("dispatch routed the wrong variant to prompt::handle_submit")
    };

    if supports_prompt_submit(agent_type) {
        send(deps, ctx, &format!("📝 {text}")).await;
    }
    deps.tracker.set_prompt_preview(&ctx.key, text.clone());
    Ok(())
}

pub async fn handle_task_completed(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let Event::TaskCompleted {
        task_subject,
        teammate,
        ..
    } = &ctx.event
    else {
        unreachable!("dispatch routed the wrong variant to prompt::handle_task_completed")
    };

    let mut text = format!("✅ Task complete: {task_subject}");
    if let Some(teammate) = teammate {
        text.push_str(&format!(" [{teammate}]"));
    }
    send(deps, ctx, &text).await;
    Ok(())
}

pub async fn handle_permission_request(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let Event::PermissionRequest { tool_name, input, .. } = &ctx.event else {
        unreachable!("dispatch routed the wrong variant to prompt::handle_permission_request")
    };

    let input = input.as_deref().unwrap_or("");
    let text = format!(
        "🔐 Permission requested for {tool_name}: {}",
        truncate_chars(input, 150)
    );
    send(deps, ctx, &text).await;
    Ok(())
}

pub async fn handle_teammate_idle(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let Event::TeammateIdle {
        teammate_name,
        team_name,
        ..
    } = &ctx.event
    else {
        unreachable!("dispatch routed the wrong variant to prompt::handle_teammate_idle")
    };

    let mut text = format!("💤 *[{teammate_name}]* idle");
    if let Some(team_name) = team_name {
        text.push_str(&format!(" ({team_name})"));
    }
    send(deps, ctx, &text).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_submit_capability_is_claude_only() {
        assert!(supports_prompt_submit("claude"));
        assert!(!supports_prompt_submit("codex"));
        assert!(!supports_prompt_submit("gemini"));
        assert!(!supports_prompt_submit("opencode"));
    }
}

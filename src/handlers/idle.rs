//! `session.idle` handler (§4.6) — the hardest handler. Finalizes the
//! streaming message, marks the turn completed, then projects the agent's
//! final turn across as many as six separate channel posts (intermediate
//! narration, reasoning trace, usage line, response text, response files,
//! prompt choices).

use super::{send, send_chunked};
use crate::event::{Event, EventContext, PromptQuestion, Usage};
use crate::pipeline::Deps;
use crate::{Attachment, Button, ButtonStyle, Result};
use std::path::{Path, PathBuf};

pub async fn handle(deps: &Deps, ctx: &EventContext) -> Result<()> {
    let Event::SessionIdle {
        text,
        intermediate_text,
        thinking,
        turn_text,
        usage,
        prompt_questions,
        prompt_text,
        plan_file_path,
        ..
    } = &ctx.event
    else {
        unreachable!("dispatch routed the wrong variant to idle::handle")
    };

    finalize_streaming_message(deps, ctx, usage).await;
    swap_completion_reaction(deps, ctx).await;

    if deps.config.projection.post_intermediate_text {
        if let Some(text) = intermediate_text {
            if !text.trim().is_empty() {
                send_chunked(deps, ctx, text).await;
            }
        }
    }

    if deps.config.projection.post_thinking {
        if let Some(thinking) = thinking {
            if !thinking.trim().is_empty() {
                post_thinking(deps, ctx, thinking).await;
            }
        }
    }

    if deps.config.projection.post_usage && !usage.is_zero() {
        send(
            deps,
            ctx,
            &format!(
                "📊 Usage: Input: {} · Output: {} · Cost: ${:.2}",
                usage.input_tokens, usage.output_tokens, usage.total_cost_usd
            ),
        )
        .await;
    }

    let scan_source = turn_text.as_deref().or(text.as_deref()).unwrap_or("");
    let tokens = extract_file_path_tokens(scan_source, &ctx.project_path);
    let files: Vec<PathBuf> = tokens.iter().map(|(_, real)| real.clone()).collect();
    let display_text = strip_tokens(text.as_deref().unwrap_or(""), &tokens);

    if !display_text.trim().is_empty() {
        send_chunked(deps, ctx, display_text.trim()).await;
    }

    if !files.is_empty() {
        post_response_files(deps, ctx, &files).await;
    }

    post_prompt_choices(deps, ctx, prompt_questions, prompt_text.as_deref(), plan_file_path.as_deref()).await;

    Ok(())
}

/// Step 2: finalize the streaming message (if one exists for this turn) with
/// a completion header built from `usage`.
async fn finalize_streaming_message(deps: &Deps, ctx: &EventContext, usage: &Usage) {
    let Some((message_id, rendered)) = deps.streaming.finalize(&ctx.key) else {
        return;
    };
    let header = usage_header(usage);
    let body = if rendered.is_empty() {
        header
    } else {
        format!("{rendered}\n\n{header}")
    };
    let Some(adapter) = deps.messaging.get(&ctx.platform) else {
        return;
    };
    if let Err(error) = adapter.update_message(&ctx.channel_id, &message_id, &body).await {
        tracing::warn!(%error, "failed to finalize streaming message");
    }
}

/// `"✅ Done · N tokens · $X.XX"`, omitting pieces that are zero.
fn usage_header(usage: &Usage) -> String {
    let mut parts = Vec::new();
    if usage.total_tokens() > 0 {
        parts.push(format!("{} tokens", usage.total_tokens()));
    }
    if usage.total_cost_usd > 0.0 {
        parts.push(format!("${:.2}", usage.total_cost_usd));
    }
    if parts.is_empty() {
        "✅ Done".to_string()
    } else {
        format!("✅ Done · {}", parts.join(" · "))
    }
}

/// Step 3: mark the turn completed and swap the ⏳ reaction on the
/// triggering user message (if any) for ✅.
async fn swap_completion_reaction(deps: &Deps, ctx: &EventContext) {
    let Some(entry) = deps.tracker.mark_completed(&ctx.key) else {
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
        .replace_own_reaction_on_message(&ctx.channel_id, &message_id, from, "✅")
        .await
    {
        tracing::warn!(%error, "failed to swap completion reaction");
    }
}

/// Step 5: truncate the reasoning trace, wrap it in a fenced block, and send.
async fn post_thinking(deps: &Deps, ctx: &EventContext, thinking: &str) {
    let max = deps.config.projection.thinking_truncate_chars;
    let char_count = thinking.chars().count();
    let body: String = thinking.chars().take(max).collect();
    let mut rendered = format!(":brain: *Reasoning*\n```\n{body}");
    if char_count > max {
        rendered.push_str("\n_(truncated)_");
    }
    rendered.push_str("\n```");
    send(deps, ctx, &rendered).await;
}

/// Step 8: send validated file paths as attachments with an empty caption.
async fn post_response_files(deps: &Deps, ctx: &EventContext, files: &[PathBuf]) {
    let Some(adapter) = deps.messaging.get(&ctx.platform) else {
        return;
    };
    let attachments: Vec<Attachment> = files
        .iter()
        .map(|path| Attachment {
            filename: path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("file")
                .to_string(),
            mime_type: crate::guess_mime_type(path),
            url: format!("file://{}", path.display()),
            size_bytes: std::fs::metadata(path).ok().map(|m| m.len()),
        })
        .collect();

    if let Err(error) = adapter
        .send_to_channel_with_files(&ctx.channel_id, "", &attachments)
        .await
    {
        tracing::warn!(%error, "failed to send response file attachments");
    }
}

/// Step 9: structured questions, a plan-file prompt, or a plain text prompt —
/// in that order of precedence.
async fn post_prompt_choices(
    deps: &Deps,
    ctx: &EventContext,
    prompt_questions: &[PromptQuestion],
    prompt_text: Option<&str>,
    plan_file_path: Option<&str>,
) {
    let Some(adapter) = deps.messaging.get(&ctx.platform) else {
        return;
    };

    if !prompt_questions.is_empty() {
        for question in prompt_questions {
            let mut text = match &question.header {
                Some(header) => format!("{header}\n{}", question.question),
                None => question.question.clone(),
            };
            if question.multi_select {
                text.push_str("\n_(select one or more)_");
            }
            let buttons = buttons_for_question(question);
            if let Err(error) = adapter
                .send_question_with_buttons(&ctx.channel_id, &text, &buttons)
                .await
            {
                tracing::warn!(%error, "failed to send prompt question");
            }
        }
        return;
    }

    let Some(prompt_text) = prompt_text else {
        return;
    };

    if let Some(plan_path) = plan_file_path.filter(|p| Path::new(p).exists()) {
        let plan_path = Path::new(plan_path);
        let attachment = Attachment {
            filename: plan_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("plan")
                .to_string(),
            mime_type: crate::guess_mime_type(plan_path),
            url: format!("file://{}", plan_path.display()),
            size_bytes: std::fs::metadata(plan_path).ok().map(|m| m.len()),
        };
        if let Err(error) = adapter
            .send_to_channel_with_files(&ctx.channel_id, prompt_text, std::slice::from_ref(&attachment))
            .await
        {
            tracing::warn!(%error, "failed to send plan-file prompt");
        }
    } else if let Err(error) = adapter.send_to_channel(&ctx.channel_id, prompt_text).await {
        tracing::warn!(%error, "failed to send prompt text");
    }
}

fn buttons_for_question(question: &PromptQuestion) -> Vec<Button> {
    question
        .options
        .iter()
        .enumerate()
        .map(|(i, option)| Button {
            label: option.label.clone(),
            custom_id: Some(format!("option_{i}")),
            style: ButtonStyle::Secondary,
            url: None,
        })
        .collect()
}

/// Scan whitespace-delimited tokens in `text` for ones that resolve
/// (relative to `project_path` when not absolute) to a file that exists on
/// disk and whose realpath falls within `project_path`. Returns each
/// matching literal token alongside its realpath, deduplicated by realpath
/// and in first-seen order.
fn extract_file_path_tokens(text: &str, project_path: &Path) -> Vec<(String, PathBuf)> {
    let project_real = std::fs::canonicalize(project_path).unwrap_or_else(|_| project_path.to_path_buf());
    let mut found: Vec<(String, PathBuf)> = Vec::new();

    for token in text.split_whitespace() {
        let trimmed = token.trim_matches(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-')));
        if trimmed.len() < 2 || !trimmed.contains('/') {
            continue;
        }
        let candidate = if Path::new(trimmed).is_absolute() {
            PathBuf::from(trimmed)
        } else {
            project_path.join(trimmed)
        };
        let Ok(real) = std::fs::canonicalize(&candidate) else {
            continue;
        };
        if real != project_real && !real.starts_with(&project_real) {
            continue;
        }
        if !found.iter().any(|(_, r)| r == &real) {
            found.push((trimmed.to_string(), real));
        }
    }

    found
}

/// Remove every literal occurrence of each matched token from `text`,
/// collapsing the resulting intra-line whitespace while keeping line breaks.
fn strip_tokens(text: &str, tokens: &[(String, PathBuf)]) -> String {
    let mut stripped = text.to_string();
    for (token, _) in tokens {
        stripped = stripped.replace(token.as_str(), "");
    }
    stripped
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{PromptOption, Usage};

    #[test]
    fn usage_header_omits_zero_pieces() {
        assert_eq!(usage_header(&Usage::default()), "✅ Done");
        assert_eq!(
            usage_header(&Usage {
                input_tokens: 120,
                output_tokens: 80,
                total_cost_usd: 0.01,
            }),
            "✅ Done · 200 tokens · $0.01"
        );
        assert_eq!(
            usage_header(&Usage {
                input_tokens: 10,
                output_tokens: 0,
                total_cost_usd: 0.0,
            }),
            "✅ Done · 10 tokens"
        );
    }

    #[test]
    fn extract_file_path_tokens_validates_existence_and_containment() {
        let dir = tempfile::tempdir().unwrap();
        let project_path = dir.path();
        std::fs::write(project_path.join("src_a.rs"), b"fn main() {}").unwrap();

        let text = "Edited src_a.rs and also /etc/passwd and missing.rs".to_string();
        let tokens = extract_file_path_tokens(&text, project_path);

        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].0, "src_a.rs");
        assert!(tokens[0].1.ends_with("src_a.rs"));

        let stripped = strip_tokens(&text, &tokens);
        assert!(!stripped.contains("src_a.rs"));
        assert!(stripped.contains("/etc/passwd"));
        assert!(stripped.contains("missing.rs"));
    }

    #[test]
    fn buttons_for_question_preserves_option_order() {
        let question = PromptQuestion {
            question: "Proceed?".to_string(),
            options: vec![
                PromptOption {
                    label: "Yes".to_string(),
                    description: None,
                },
                PromptOption {
                    label: "No".to_string(),
                    description: None,
                },
            ],
            header: None,
            multi_select: false,
        };
        let buttons = buttons_for_question(&question);
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0].label, "Yes");
        assert_eq!(buttons[1].label, "No");
    }
}

//! Inbound Message Router.
//!
//! Registered once as the `MessageHandler` callback across every adapter in
//! [`crate::messaging::MessagingManager`]. Resolves an inbound chat message
//! back to its bound project/instance, sanitizes the text, peels off the
//! `!shell` escape hatch, downloads supported attachments, marks the turn
//! pending, and delivers the text to whichever [`crate::runtime::Runtime`]
//! is wired for that instance.

use crate::event::EventContext;
use crate::pipeline::Deps;
use crate::state::ProjectState;
use crate::{fallback, is_supported_attachment_mime, Attachment, InboundMessage, InstanceKey, MessageContent};
use chrono::Utc;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;

static CONTROL_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    // C0 (excluding \t \n \r) and C1 control characters, plus the ANSI CSI
    // escape sequence shape used by terminal color codes.
    Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F-\x9F]|\x1B\[[0-9;]*[A-Za-z]").expect("valid regex")
});

/// Entry point wired as the `MessageHandler` on every adapter.
pub async fn handle_inbound(deps: &Deps, message: InboundMessage) {
    let snapshot = deps.state.snapshot();
    let Some((project, instance_id)) = snapshot.find_by_channel(&message.source, &message.conversation_id) else {
        tracing::debug!(channel = %message.conversation_id, platform = %message.source, "inbound message on unbound channel, ignored");
        return;
    };

    let key = InstanceKey::new(project.clone(), instance_id.clone());
    let Some(project_path) = snapshot.projects.get(&project).and_then(|p| p.path.clone()) else {
        tracing::warn!(project = %project, "bound project has no path, ignoring inbound message");
        return;
    };

    let _ = deps.state.touch(&project, &instance_id);

    let raw = match &message.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Media { text, .. } => text.clone().unwrap_or_default(),
        MessageContent::Interaction { .. } => {
            // Button/select actions re-enter as a normal message via the
            // adapter's own label resolution; nothing extra to route here.
            message.content.to_string()
        }
    };

    let Some(text) = sanitize(&raw) else {
        return;
    };

    #[cfg(feature = "metrics")]
    crate::telemetry::Metrics::global()
        .messages_routed_total
        .with_label_values(&[&message.source])
        .inc();

    if let Some(command) = shell_escape(&text) {
        run_shell_escape(deps, &message, &key, &project_path, command).await;
        return;
    }

    let attachments = match &message.content {
        MessageContent::Media { attachments, .. } => attachments.as_slice(),
        _ => &[],
    };
    let downloaded = download_attachments(deps, &project_path, attachments).await;

    let mut content = text;
    for path in &downloaded {
        content.push_str(&format!("\n[file:{}]", path.display()));
    }

    deps.tracker.mark_pending(&key, message.conversation_id.clone(), message.id.clone());
    deps.tracker.set_prompt_preview(&key, content.clone());
    mark_pending_reaction(deps, &key, &message).await;

    deliver(deps, &key, &content).await;

    fallback::arm(deps, key, message.conversation_id.clone(), message.source.clone());
}

/// Add the ⏳ reaction to the triggering message and record it as the turn's
/// swappable indicator (§4.2).
async fn mark_pending_reaction(deps: &Deps, key: &InstanceKey, message: &InboundMessage) {
    let Some(adapter) = deps.messaging.get(&message.source) else {
        return;
    };
    if let Err(error) = adapter
        .add_reaction_to_message(&message.conversation_id, &message.id, "⏳")
        .await
    {
        tracing::warn!(%error, key = %key, "failed to add pending reaction");
        return;
    }
    deps.tracker.set_reaction(key, "⏳");
}

/// Trim, reject empty/oversized, and strip control characters. Returns
/// `None` for input that should be silently dropped.
fn sanitize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().count() > 10_000 {
        return None;
    }
    let cleaned = CONTROL_CHARS.replace_all(trimmed, "").into_owned();
    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned)
}

/// `!<command>` escapes straight to a shell; bare `!` is a no-op. Returns
/// the command to run, if any.
fn shell_escape(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('!')?;
    let rest = rest.trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

async fn run_shell_escape(deps: &Deps, message: &InboundMessage, key: &InstanceKey, project_path: &Path, command: &str) {
    let router_config = &deps.config.router;
    let output = tokio::time::timeout(
        router_config.shell_timeout,
        run_command(command, project_path, router_config.shell_max_output_bytes),
    )
    .await;

    let text = match output {
        Ok(Ok((success, combined))) => {
            #[cfg(feature = "metrics")]
            crate::telemetry::Metrics::global()
                .shell_commands_total
                .with_label_values(&[if success { "ok" } else { "failed" }])
                .inc();
            if combined.trim().is_empty() {
                if success {
                    "✅ (no output)".to_string()
                } else {
                    "⚠️ Exit code (no output)".to_string()
                }
            } else {
                format!("```\n{combined}\n```")
            }
        }
        Ok(Err(error)) => {
            #[cfg(feature = "metrics")]
            crate::telemetry::Metrics::global()
                .shell_commands_total
                .with_label_values(&["failed"])
                .inc();
            format!("⚠️ {error}")
        }
        Err(_) => {
            #[cfg(feature = "metrics")]
            crate::telemetry::Metrics::global()
                .shell_commands_total
                .with_label_values(&["timeout"])
                .inc();
            format!("⚠️ command timed out after {:?}", router_config.shell_timeout)
        }
    };

    let Some(adapter) = deps.messaging.get(&message.source) else {
        return;
    };
    if let Err(error) = adapter.send_to_channel(&message.conversation_id, &text).await {
        tracing::warn!(%error, key = %key, "failed to post shell-escape result");
    }
}

async fn run_command(command: &str, cwd: &Path, max_bytes: usize) -> crate::Result<(bool, String)> {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };
    cmd.current_dir(cwd);

    let output = cmd.output().await?;
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    if combined.len() > max_bytes {
        combined.truncate(max_bytes);
        combined.push_str("\n…(truncated)");
    }
    Ok((output.status.success(), combined))
}

/// Download supported attachments into `<project_path>/.discode/files/`,
/// timestamp-prefixed, rotated to the most recent 100. Unsupported MIME
/// types and oversized attachments are skipped rather than aborting the
/// whole batch.
async fn download_attachments(deps: &Deps, project_path: &Path, attachments: &[Attachment]) -> Vec<PathBuf> {
    if attachments.is_empty() {
        return Vec::new();
    }

    let dir = project_path.join(".discode").join("files");
    if let Err(error) = tokio::fs::create_dir_all(&dir).await {
        tracing::warn!(%error, dir = %dir.display(), "failed to create attachment cache dir");
        return Vec::new();
    }

    let http = reqwest::Client::new();
    let mut saved = Vec::new();

    for attachment in attachments {
        if !is_supported_attachment_mime(&attachment.mime_type) {
            tracing::debug!(filename = %attachment.filename, mime = %attachment.mime_type, "skipping unsupported attachment");
            continue;
        }
        if attachment.size_bytes.is_some_and(|size| size > deps.config.router.attachment_max_bytes) {
            tracing::debug!(filename = %attachment.filename, "skipping oversized attachment");
            continue;
        }

        let response = match http.get(&attachment.url).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, filename = %attachment.filename, "attachment download failed");
                continue;
            }
        };
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(%error, filename = %attachment.filename, "failed to read attachment body");
                continue;
            }
        };
        if bytes.len() as u64 > deps.config.router.attachment_max_bytes {
            continue;
        }

        let sanitized = sanitize_filename(&attachment.filename);
        let dest = dir.join(format!("{}-{}", Utc::now().timestamp_millis(), sanitized));
        if let Err(error) = tokio::fs::write(&dest, &bytes).await {
            tracing::warn!(%error, dest = %dest.display(), "failed to write downloaded attachment");
            continue;
        }
        saved.push(dest);
    }

    if let Err(error) = rotate_attachment_cache(&dir, deps.config.router.attachment_cache_limit).await {
        tracing::warn!(%error, "failed to rotate attachment cache");
    }

    saved
}

fn sanitize_filename(name: &str) -> String {
    let name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment");
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Keep only the `limit` most recently modified files in `dir`.
async fn rotate_attachment_cache(dir: &Path, limit: usize) -> std::io::Result<()> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            entries.push((modified, entry.path()));
        }
    }
    if entries.len() <= limit {
        return Ok(());
    }
    entries.sort_by_key(|(modified, _)| *modified);
    let overflow = entries.len() - limit;
    for (_, path) in entries.into_iter().take(overflow) {
        tokio::fs::remove_file(&path).await?;
    }
    Ok(())
}

/// Deliver `text` to whichever runtime is wired for `key`: an SDK runner
/// takes `submit_message` directly; a tmux/PTY window has no direct submit
/// path, so falls back to typing the text then sending Enter after a short
/// debounce.
async fn deliver(deps: &Deps, key: &InstanceKey, text: &str) {
    match deps.runtime.submit_message(key, text).await {
        Ok(()) => return,
        Err(error) => tracing::debug!(%error, key = %key, "submit_message unavailable, falling back to tmux delivery"),
    }

    if let Err(error) = deps.runtime.type_keys_to_window(key, text).await {
        tracing::warn!(%error, key = %key, "failed to deliver message to any runtime");
        return;
    }

    let debounce = deps.config.router.type_keys_debounce.max(Duration::from_millis(50));
    tokio::time::sleep(debounce).await;

    if let Err(error) = deps.runtime.send_enter_to_window(key).await {
        tracing::warn!(%error, key = %key, "failed to submit typed message");
    }
}

/// Resolve a project/channel binding for an [`EventContext`] — used by
/// callers that already hold a resolved `(channel_id, platform)` pair and
/// just need the matching project path (kept here so router and pipeline
/// resolution logic share one lookup path).
pub fn project_path_for(state: &ProjectState, ctx: &EventContext) -> Option<PathBuf> {
    state.projects.get(&ctx.key.project).and_then(|p| p.path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_trims_rejects_empty_and_oversized() {
        assert_eq!(sanitize("  hi  "), Some("hi".to_string()));
        assert_eq!(sanitize("   "), None);
        assert_eq!(sanitize(&"a".repeat(10_001)), None);
    }

    #[test]
    fn sanitize_strips_control_chars_and_ansi_escapes() {
        let input = "hello\x1B[31mworld\x07\n";
        let cleaned = sanitize(input).unwrap();
        assert_eq!(cleaned, "helloworld");
    }

    #[test]
    fn sanitize_keeps_newlines_tabs_and_carriage_returns() {
        let cleaned = sanitize("line1\nline2\ttabbed").unwrap();
        assert_eq!(cleaned, "line1\nline2\ttabbed");
    }

    #[test]
    fn shell_escape_requires_content_after_bang() {
        assert_eq!(shell_escape("!ls -la"), Some("ls -la"));
        assert_eq!(shell_escape("!"), None);
        assert_eq!(shell_escape("!   "), None);
        assert_eq!(shell_escape("not a command"), None);
    }

    #[test]
    fn sanitize_filename_strips_path_components_and_odd_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("weird name!@#.png"), "weird_name___.png");
    }

    #[tokio::test]
    async fn run_command_captures_combined_output_and_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let (success, output) = run_command("echo hi", dir.path(), 1024).await.unwrap();
        assert!(success);
        assert_eq!(output.trim(), "hi");
    }

    #[tokio::test]
    async fn run_command_truncates_beyond_max_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (_, output) = run_command("echo aaaaaaaaaa", dir.path(), 4).await.unwrap();
        assert!(output.starts_with("aaaa"));
        assert!(output.contains("truncated"));
    }

    #[tokio::test]
    async fn rotate_attachment_cache_keeps_only_the_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            tokio::fs::write(dir.path().join(format!("f{i}.txt")), b"x").await.unwrap();
        }
        rotate_attachment_cache(dir.path(), 2).await.unwrap();
        let mut remaining = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = read_dir.next_entry().await.unwrap() {
            remaining.push(entry.file_name());
        }
        assert_eq!(remaining.len(), 2);
    }
}

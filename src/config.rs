//! Configuration loading and validation.
//!
//! A single [`Config`] value is built once at startup from environment
//! variables and passed down by reference. No module below this one reads
//! `std::env::var` itself — this is the REDESIGN FLAG from the original
//! spec's §9 ("global `process.env` reads scattered across modules")
//! resolved the way the teacher resolves configuration elsewhere: one
//! `Config`, built once, threaded through.

use crate::error::{ConfigError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default hook ingestion port (§4.4).
pub const DEFAULT_HOOK_PORT: u16 = 18470;

/// Top-level daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// `~/.discode` by default — home for the hook token, projects.json, and
    /// daemon runtime files (PID, socket, logs).
    pub home_dir: PathBuf,

    pub hook: HookConfig,
    pub streaming: StreamingConfig,
    pub fallback: FallbackConfig,
    pub router: RouterConfig,
    pub projection: ProjectionConfig,
    pub discord: Option<DiscordConfig>,
    pub slack: Option<SlackConfig>,
    pub telemetry: TelemetryConfig,
}

/// Hook ingestion server settings (§4.4).
#[derive(Debug, Clone)]
pub struct HookConfig {
    pub port: u16,
    pub hostname: String,
    pub max_body_bytes: usize,
    pub rate_limit_capacity: u32,
    pub rate_limit_refill_per_sec: u32,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HOOK_PORT,
            hostname: "127.0.0.1".into(),
            max_body_bytes: 256 * 1024,
            rate_limit_capacity: 60,
            rate_limit_refill_per_sec: 60,
        }
    }
}

/// Streaming activity updater settings (§4.3). `min_edit_interval` resolves
/// the `DISCODE_STREAM_MIN_EDIT_MS` Open Question from the original spec's
/// §9 — read once here, never re-read per event.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub min_edit_interval: Duration,
    pub debounce: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            min_edit_interval: Duration::from_millis(1000),
            debounce: Duration::from_millis(500),
        }
    }
}

/// Terminal-buffer fallback watchdog settings (§4.8). `max_checks` resolves
/// the "magic number vs. computed bound" Open Question — fixed at 3 by the
/// original spec, kept configurable here per its own suggestion.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub initial_wait: Duration,
    pub poll_interval: Duration,
    pub max_checks: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_millis(3000),
            poll_interval: Duration::from_millis(2000),
            max_checks: 3,
        }
    }
}

/// Inbound message router settings (§4.7).
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_message_chars: usize,
    pub shell_timeout: Duration,
    pub shell_max_output_bytes: usize,
    pub attachment_max_bytes: u64,
    pub attachment_cache_limit: usize,
    pub type_keys_debounce: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 10_000,
            shell_timeout: Duration::from_secs(30),
            shell_max_output_bytes: 1024 * 1024,
            attachment_max_bytes: 25 * 1024 * 1024,
            attachment_cache_limit: 100,
            type_keys_debounce: Duration::from_millis(0),
        }
    }
}

/// Opt-in switches for `session.idle` projection sub-steps (§4.6) — every
/// one of these can add noise to a busy channel, so they default to the
/// behavior the original spec's scenarios assume (on) but are toggleable.
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    pub post_intermediate_text: bool,
    pub post_thinking: bool,
    pub post_usage: bool,
    pub thinking_truncate_chars: usize,
    pub thinking_min_seconds_to_report: u64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            post_intermediate_text: true,
            post_thinking: true,
            post_usage: true,
            thinking_truncate_chars: 12_000,
            thinking_min_seconds_to_report: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    pub app_token: String,
}

/// Metrics endpoint (feature-gated). Separate bind address from the hook
/// port, mirroring the teacher's convention of keeping telemetry off the
/// primary API surface.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub metrics_port: Option<u16>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: std::env::var("DISCODE_METRICS_PORT")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

impl Config {
    /// Resolve the home directory without loading the rest of the config —
    /// used by daemon lifecycle commands (`stop`/`status`) that only need to
    /// find the PID file and socket, not validate messaging credentials.
    pub fn default_home_dir() -> Option<PathBuf> {
        env_var("DISCODE_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|d| d.join(".discode")))
    }

    /// Load configuration from environment variables, falling back to
    /// `AGENT_DISCORD_*` per the legacy-prefix rule in §6.
    pub fn load() -> Result<Self> {
        let home_dir = Self::default_home_dir()
            .ok_or_else(|| ConfigError::Invalid("could not resolve a home directory".into()))?;

        std::fs::create_dir_all(&home_dir).map_err(|source| ConfigError::Load {
            path: home_dir.display().to_string(),
            source,
        })?;

        let mut hook = HookConfig::default();
        if let Some(port) = env_var("DISCODE_PORT").and_then(|v| v.parse().ok()) {
            hook.port = port;
        }
        if let Some(hostname) = env_var("DISCODE_HOSTNAME") {
            hook.hostname = hostname;
        }

        let mut streaming = StreamingConfig::default();
        if let Some(ms) = env_var("DISCODE_STREAM_MIN_EDIT_MS").and_then(|v| v.parse().ok()) {
            streaming.min_edit_interval = Duration::from_millis(ms);
        }

        let discord = env_var("DISCORD_BOT_TOKEN").map(|bot_token| DiscordConfig { bot_token });

        let slack = match (env_var("SLACK_BOT_TOKEN"), env_var("SLACK_APP_TOKEN")) {
            (Some(bot_token), Some(app_token)) => Some(SlackConfig {
                bot_token,
                app_token,
            }),
            _ => None,
        };

        if discord.is_none() && slack.is_none() {
            tracing::warn!(
                "no messaging platform configured (DISCORD_BOT_TOKEN or SLACK_BOT_TOKEN/SLACK_APP_TOKEN) \
                 — the daemon will start with the hook server only"
            );
        }

        Ok(Self {
            home_dir,
            hook,
            streaming,
            fallback: FallbackConfig::default(),
            router: RouterConfig::default(),
            projection: ProjectionConfig::default(),
            discord,
            slack,
            telemetry: TelemetryConfig::default(),
        })
    }

    pub fn hook_token_path(&self) -> PathBuf {
        self.home_dir.join(".hook-token")
    }

    pub fn projects_state_path(&self) -> PathBuf {
        self.home_dir.join("projects.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home_dir.join("logs")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.home_dir.join("discode.pid")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.home_dir.join("discode.sock")
    }
}

/// Read `DISCODE_<name>`, falling back to the legacy `AGENT_DISCORD_<name>`
/// prefix per §6's "legacy fallback prefix... recognized with lower
/// precedence."
fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .or_else(|| {
            let legacy = name.replacen("DISCODE", "AGENT_DISCORD", 1);
            std::env::var(legacy).ok()
        })
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hook_config_matches_spec_port() {
        assert_eq!(HookConfig::default().port, DEFAULT_HOOK_PORT);
        assert_eq!(HookConfig::default().max_body_bytes, 256 * 1024);
    }

    #[test]
    fn default_fallback_config_matches_spec_timings() {
        let fallback = FallbackConfig::default();
        assert_eq!(fallback.initial_wait, Duration::from_millis(3000));
        assert_eq!(fallback.poll_interval, Duration::from_millis(2000));
        assert_eq!(fallback.max_checks, 3);
    }
}

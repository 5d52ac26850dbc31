//! Top-level error types for Discode.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Hook ingestion server errors (auth, rate limiting, body decoding).
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("missing or malformed bearer token")]
    Unauthorized,

    #[error("rate limit exceeded for source {source}")]
    RateLimited { source: String },

    #[error("failed to decode event payload: {0}")]
    InvalidPayload(String),

    #[error("unknown project: {0}")]
    UnknownProject(String),

    #[error("request body exceeds the {0} byte limit")]
    BodyTooLarge(usize),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Messaging adapter errors (Discord/Slack).
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("adapter {0} is not connected")]
    NotConnected(String),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("unknown message: {0}")]
    UnknownMessage(String),

    #[error("send failed on {platform}: {reason}")]
    SendFailed { platform: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Inbound message router errors.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no project bound to conversation {0}")]
    UnboundConversation(String),

    #[error("shell command rejected: {0}")]
    ShellRejected(String),

    #[error("attachment download failed: {0}")]
    AttachmentFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Runtime (agent process / tmux-window) interface errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("instance {0} has no active window")]
    NoWindow(String),

    #[error("runtime operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

//! Hook event types decoded directly from the hook HTTP body.

use crate::InstanceKey;
use serde::{Deserialize, Serialize};

/// Token/cost totals carried on `session.idle`, rendered into the streaming
/// updater's completion header and the `📊 Usage` line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens() == 0 && self.total_cost_usd == 0.0
    }
}

/// One option offered by `promptQuestions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptOption {
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One structured interactive question carried on `session.idle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptQuestion {
    pub question: String,
    pub options: Vec<PromptOption>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub multi_select: bool,
}

/// What kind of cue a `session.notification` carries — picks the emoji
/// prefix per §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PermissionPrompt,
    IdlePrompt,
    #[serde(other)]
    Other,
}

impl NotificationKind {
    pub fn emoji(self) -> &'static str {
        match self {
            NotificationKind::PermissionPrompt => "🔐",
            NotificationKind::IdlePrompt => "💤",
            NotificationKind::Other => "🔔",
        }
    }
}

/// A single lifecycle/activity event emitted by an agent CLI's hook scripts.
///
/// Tagged the same way the teacher's `ProcessEvent` is tagged: a `type` field
/// picks the variant, and every variant carries `project`/`instance_id` so a
/// single decode gives the router everything needed to resolve an
/// [`InstanceKey`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    #[serde(rename = "session.start")]
    SessionStart {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
        /// `"startup"` for the daemon-triggered warmup launch, which is
        /// suppressed entirely; anything else ("user", "resume", ...) posts
        /// the 🟢 notice.
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    #[serde(rename = "session.end")]
    SessionEnd {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "session.notification")]
    SessionNotification {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
        #[serde(default = "default_notification_kind", rename = "notificationType")]
        notification_type: NotificationKind,
        text: String,
        #[serde(default)]
        #[serde(rename = "promptText")]
        prompt_text: Option<String>,
    },
    /// The agent has gone idle — its turn is over. Carries everything
    /// `session.idle`'s eight-step sequence (§4.6) needs.
    #[serde(rename = "session.idle")]
    SessionIdle {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default, rename = "intermediateText")]
        intermediate_text: Option<String>,
        #[serde(default)]
        thinking: Option<String>,
        #[serde(default, rename = "turnText")]
        turn_text: Option<String>,
        #[serde(default)]
        usage: Usage,
        #[serde(default, rename = "promptQuestions")]
        prompt_questions: Vec<PromptQuestion>,
        #[serde(default, rename = "promptText")]
        prompt_text: Option<String>,
        #[serde(default, rename = "planFilePath")]
        plan_file_path: Option<String>,
    },
    #[serde(rename = "session.error")]
    SessionError {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(rename = "thinking.start")]
    ThinkingStart {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
    },
    #[serde(rename = "thinking.stop")]
    ThinkingStop {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
    },
    #[serde(rename = "tool.activity")]
    ToolActivity {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
        /// Already-formatted display text, e.g. `📖 Read(\`src/x.ts\`)`.
        text: String,
    },
    #[serde(rename = "tool.failure")]
    ToolFailure {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename = "prompt.submit")]
    PromptSubmit {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
        text: String,
    },
    #[serde(rename = "task.completed")]
    TaskCompleted {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
        #[serde(rename = "taskSubject")]
        task_subject: String,
        #[serde(default)]
        teammate: Option<String>,
    },
    #[serde(rename = "permission.request")]
    PermissionRequest {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        input: Option<String>,
    },
    #[serde(rename = "teammate.idle")]
    TeammateIdle {
        #[serde(rename = "projectName")]
        project: String,
        #[serde(default, rename = "instanceId")]
        instance_id: Option<String>,
        #[serde(rename = "agentType")]
        agent_type: String,
        #[serde(rename = "teammateName")]
        teammate_name: String,
        #[serde(default, rename = "teamName")]
        team_name: Option<String>,
    },
}

fn default_notification_kind() -> NotificationKind {
    NotificationKind::Other
}

impl Event {
    pub fn project(&self) -> &str {
        match self {
            Event::SessionStart { project, .. }
            | Event::SessionEnd { project, .. }
            | Event::SessionNotification { project, .. }
            | Event::SessionIdle { project, .. }
            | Event::SessionError { project, .. }
            | Event::ThinkingStart { project, .. }
            | Event::ThinkingStop { project, .. }
            | Event::ToolActivity { project, .. }
            | Event::ToolFailure { project, .. }
            | Event::PromptSubmit { project, .. }
            | Event::TaskCompleted { project, .. }
            | Event::PermissionRequest { project, .. }
            | Event::TeammateIdle { project, .. } => project,
        }
    }

    /// The raw `instanceId` field, if the hook payload carried one — `None`
    /// for a legal payload that omits it. Use [`Event::instance_key_part`]
    /// for the `instanceId || agentType` fallback the tracker key is built
    /// from.
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Event::SessionStart { instance_id, .. }
            | Event::SessionEnd { instance_id, .. }
            | Event::SessionNotification { instance_id, .. }
            | Event::SessionIdle { instance_id, .. }
            | Event::SessionError { instance_id, .. }
            | Event::ThinkingStart { instance_id, .. }
            | Event::ThinkingStop { instance_id, .. }
            | Event::ToolActivity { instance_id, .. }
            | Event::ToolFailure { instance_id, .. }
            | Event::PromptSubmit { instance_id, .. }
            | Event::TaskCompleted { instance_id, .. }
            | Event::PermissionRequest { instance_id, .. }
            | Event::TeammateIdle { instance_id, .. } => instance_id.as_deref(),
        }
    }

    /// `instanceId || agentType` — the value an [`InstanceKey`] is keyed by.
    pub fn instance_key_part(&self) -> &str {
        self.instance_id().unwrap_or_else(|| self.agent_type())
    }

    pub fn agent_type(&self) -> &str {
        match self {
            Event::SessionStart { agent_type, .. }
            | Event::SessionEnd { agent_type, .. }
            | Event::SessionNotification { agent_type, .. }
            | Event::SessionIdle { agent_type, .. }
            | Event::SessionError { agent_type, .. }
            | Event::ThinkingStart { agent_type, .. }
            | Event::ThinkingStop { agent_type, .. }
            | Event::ToolActivity { agent_type, .. }
            | Event::ToolFailure { agent_type, .. }
            | Event::PromptSubmit { agent_type, .. }
            | Event::TaskCompleted { agent_type, .. }
            | Event::PermissionRequest { agent_type, .. }
            | Event::TeammateIdle { agent_type, .. } => agent_type,
        }
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.project(), self.instance_key_part())
    }

    /// Short name used in log lines and metrics counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SessionStart { .. } => "session.start",
            Event::SessionEnd { .. } => "session.end",
            Event::SessionNotification { .. } => "session.notification",
            Event::SessionIdle { .. } => "session.idle",
            Event::SessionError { .. } => "session.error",
            Event::ThinkingStart { .. } => "thinking.start",
            Event::ThinkingStop { .. } => "thinking.stop",
            Event::ToolActivity { .. } => "tool.activity",
            Event::ToolFailure { .. } => "tool.failure",
            Event::PromptSubmit { .. } => "prompt.submit",
            Event::TaskCompleted { .. } => "task.completed",
            Event::PermissionRequest { .. } => "permission.request",
            Event::TeammateIdle { .. } => "teammate.idle",
        }
    }

    /// True for the "agent activity" event types the pipeline auto-creates a
    /// [`crate::tracker::Tracker`] entry for when none exists yet (§4.5 step 1).
    pub fn is_auto_pending(&self) -> bool {
        matches!(
            self,
            Event::ThinkingStart { .. } | Event::ToolActivity { .. } | Event::SessionIdle { .. } | Event::SessionStart { .. }
        )
    }

    /// True for the event types that end a turn, at which point the pipeline
    /// cancels every timer registered for the key (§4.5 step 4).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::SessionIdle { .. } | Event::SessionError { .. })
    }

    /// The event's primary display text, where it has one — used by the
    /// pipeline to populate `EventContext::text` without every handler
    /// re-matching on the variant.
    pub fn primary_text(&self) -> Option<&str> {
        match self {
            Event::SessionIdle { text, .. } => text.as_deref(),
            Event::SessionError { text, .. } => text.as_deref(),
            Event::SessionNotification { text, .. } => Some(text),
            Event::ToolActivity { text, .. } => Some(text),
            Event::PromptSubmit { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// A derived, per-event projection handed to handlers: the typed event plus
/// the channel it should be rendered into, resolved once by the pipeline so
/// handlers never re-touch [`crate::state::ProjectState`] for routing.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub event: Event,
    pub key: InstanceKey,
    pub channel_id: String,
    pub platform: String,
    pub project_path: std::path::PathBuf,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

impl EventContext {
    pub fn new(
        event: Event,
        channel_id: String,
        platform: String,
        project_path: std::path::PathBuf,
    ) -> Self {
        let key = event.key();
        Self {
            event,
            key,
            channel_id,
            platform,
            project_path,
            received_at: chrono::Utc::now(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.event.primary_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_kind_defaults_to_other_for_unknown_tag() {
        let json = serde_json::json!({
            "type": "session.notification",
            "projectName": "p",
            "instanceId": "main",
            "agentType": "claude",
            "notificationType": "something_else",
            "text": "hi"
        });
        let event: Event = serde_json::from_value(json).unwrap();
        match event {
            Event::SessionNotification {
                notification_type, ..
            } => assert_eq!(notification_type, NotificationKind::Other),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn auto_pending_matches_agent_activity_types() {
        let key = "p".to_string();
        let idle = Event::SessionIdle {
            project: key.clone(),
            instance_id: Some("main".into()),
            agent_type: "claude".into(),
            text: None,
            intermediate_text: None,
            thinking: None,
            turn_text: None,
            usage: Usage::default(),
            prompt_questions: vec![],
            prompt_text: None,
            plan_file_path: None,
        };
        assert!(idle.is_auto_pending());
        assert!(idle.is_terminal());

        let notif = Event::SessionNotification {
            project: key,
            instance_id: Some("main".into()),
            agent_type: "claude".into(),
            notification_type: NotificationKind::Other,
            text: "hi".into(),
            prompt_text: None,
        };
        assert!(!notif.is_auto_pending());
    }

    #[test]
    fn missing_instance_id_decodes_and_falls_back_to_agent_type() {
        let json = serde_json::json!({
            "type": "thinking.start",
            "projectName": "p",
            "agentType": "claude",
        });
        let event: Event = serde_json::from_value(json).unwrap();
        assert_eq!(event.instance_id(), None);
        assert_eq!(event.instance_key_part(), "claude");
        assert_eq!(event.key(), InstanceKey::new("p", "claude"));
    }
}

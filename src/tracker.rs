//! Pending-turn tracking.
//!
//! Each agent instance is, at any moment, either waiting on a turn it was
//! just given (`Active`), just finished one within the last 30 seconds
//! (`RecentlyCompleted`, used to recognize duplicate `session.idle` hooks and
//! to let the fallback watchdog stand down), or has no turn in flight at all
//! (absent from the map). State lives in memory only — a restart loses it,
//! which is fine since a restart also tears down whatever turn was pending.

use crate::InstanceKey;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

/// How long a completed turn is remembered before it ages out to nothing.
pub const RECENTLY_COMPLETED_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Active,
    RecentlyCompleted,
}

#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub state: PendingState,
    pub channel_id: String,
    /// Id of the user's triggering chat message, empty for tmux/SDK-initiated
    /// turns per the original spec's `PendingEntry.messageId?`.
    pub message_id: Option<String>,
    /// Id of the "📝 Prompt" anchor message, lazily created.
    pub start_message_id: Option<String>,
    /// Truncated prompt text shown in the anchor and in fallback posts.
    pub prompt_preview: Option<String>,
    pub started_at: Instant,
    completed_at: Option<Instant>,
    /// Whether a hook event is currently being processed for this instance,
    /// independent of `state` — the fallback watchdog checks this to avoid
    /// racing a hook that is mid-delivery.
    pub hook_active: bool,
    /// When the current `thinking.start`/`thinking.stop` span began, so the
    /// `thinking.stop` handler can report how long it lasted.
    pub thinking_started_at: Option<Instant>,
    /// The emoji the bot most recently applied to `message_id` as the turn's
    /// single swappable status indicator, so the next swap knows what to
    /// remove (§4.1's `replace_own_reaction_on_message(from, to)`).
    pub reaction: Option<String>,
}

impl PendingEntry {
    fn fresh(channel_id: String, message_id: Option<String>) -> Self {
        Self {
            state: PendingState::Active,
            channel_id,
            message_id,
            start_message_id: None,
            prompt_preview: None,
            started_at: Instant::now(),
            completed_at: None,
            hook_active: false,
            thinking_started_at: None,
            reaction: None,
        }
    }

    fn is_expired(&self) -> bool {
        match (self.state, self.completed_at) {
            (PendingState::RecentlyCompleted, Some(at)) => at.elapsed() >= RECENTLY_COMPLETED_TTL,
            _ => false,
        }
    }
}

/// Tracks pending turns for every known instance.
#[derive(Default)]
pub struct Tracker {
    entries: Mutex<HashMap<InstanceKey, PendingEntry>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a turn for `key`, discarding whatever was there —
    /// the user sent a new message. Clears any `RecentlyCompleted` entry for
    /// the same key first, per the invariant in §4.2.
    pub fn mark_pending(&self, key: &InstanceKey, channel_id: impl Into<String>, message_id: impl Into<String>) {
        let previous = self.entries.lock().expect("tracker lock poisoned").insert(
            key.clone(),
            PendingEntry::fresh(channel_id.into(), Some(message_id.into())),
        );
        #[cfg(feature = "metrics")]
        if previous.as_ref().map(|entry| entry.state) != Some(PendingState::Active) {
            crate::telemetry::Metrics::global().turns_active.inc();
        }
    }

    /// Like [`Tracker::mark_pending`] but a no-op if a turn is already active
    /// for `key` — used when a hook fires mid-turn (or an agent-initiated
    /// turn with no originating user message) and should not reset the start
    /// message or prompt preview. Returns `true` if a new entry was created.
    pub fn ensure_pending(&self, key: &InstanceKey, channel_id: impl Into<String>) -> bool {
        let mut guard = self.entries.lock().expect("tracker lock poisoned");
        match guard.get(key) {
            Some(entry) if entry.state == PendingState::Active && !entry.is_expired() => false,
            _ => {
                guard.insert(key.clone(), PendingEntry::fresh(channel_id.into(), None));
                #[cfg(feature = "metrics")]
                crate::telemetry::Metrics::global().turns_active.inc();
                true
            }
        }
    }

    /// Fetch or create the start-message id for `key`'s active turn,
    /// creating it via `create` if none exists yet. Idempotent: the closure
    /// runs at most once per turn, satisfying invariant 2 in §8.
    pub fn ensure_start_message(
        &self,
        key: &InstanceKey,
        create: impl FnOnce() -> String,
    ) -> Option<String> {
        let mut guard = self.entries.lock().expect("tracker lock poisoned");
        let entry = guard.get_mut(key)?;
        if let Some(id) = &entry.start_message_id {
            return Some(id.clone());
        }
        let id = create();
        entry.start_message_id = Some(id.clone());
        Some(id)
    }

    pub fn set_prompt_preview(&self, key: &InstanceKey, preview: impl Into<String>) {
        let mut guard = self.entries.lock().expect("tracker lock poisoned");
        if let Some(entry) = guard.get_mut(key) {
            entry.prompt_preview = Some(preview.into());
        }
    }

    pub fn set_hook_active(&self, key: &InstanceKey, active: bool) {
        let mut guard = self.entries.lock().expect("tracker lock poisoned");
        if let Some(entry) = guard.get_mut(key) {
            entry.hook_active = active;
        }
    }

    /// Record `emoji` as the bot's current swappable reaction on `key`'s
    /// turn, for a later [`Tracker::get`] to hand back as the `from` side of
    /// a swap.
    pub fn set_reaction(&self, key: &InstanceKey, emoji: impl Into<String>) {
        let mut guard = self.entries.lock().expect("tracker lock poisoned");
        if let Some(entry) = guard.get_mut(key) {
            entry.reaction = Some(emoji.into());
        }
    }

    pub fn is_hook_active(&self, key: &InstanceKey) -> bool {
        self.entries
            .lock()
            .expect("tracker lock poisoned")
            .get(key)
            .map(|entry| entry.hook_active)
            .unwrap_or(false)
    }

    /// Record that a `thinking` span started now, for `thinking.stop` to
    /// measure elapsed time against.
    pub fn mark_thinking_start(&self, key: &InstanceKey) {
        let mut guard = self.entries.lock().expect("tracker lock poisoned");
        if let Some(entry) = guard.get_mut(key) {
            entry.thinking_started_at = Some(Instant::now());
        }
    }

    /// Elapsed time since the current turn's `thinking.start`, if any.
    pub fn thinking_elapsed(&self, key: &InstanceKey) -> Option<Duration> {
        self.entries
            .lock()
            .expect("tracker lock poisoned")
            .get(key)
            .and_then(|entry| entry.thinking_started_at)
            .map(|started| started.elapsed())
    }

    /// Move `key`'s turn to `RecentlyCompleted`, returning the prior entry.
    /// Returns `None` if no turn was pending — the caller's signal for a
    /// duplicate `session.idle`.
    pub fn mark_completed(&self, key: &InstanceKey) -> Option<PendingEntry> {
        self.complete(key)
    }

    /// Same transition as [`Tracker::mark_completed`], but discards
    /// immediately instead of entering `RecentlyCompleted` — an errored turn
    /// has nothing worth remembering for duplicate-detection.
    pub fn mark_error(&self, key: &InstanceKey) -> Option<PendingEntry> {
        let removed = self
            .entries
            .lock()
            .expect("tracker lock poisoned")
            .remove(key)
            .filter(|entry| entry.state == PendingState::Active && !entry.is_expired());
        #[cfg(feature = "metrics")]
        if removed.is_some() {
            crate::telemetry::Metrics::global().turns_active.dec();
        }
        removed
    }

    fn complete(&self, key: &InstanceKey) -> Option<PendingEntry> {
        let mut guard = self.entries.lock().expect("tracker lock poisoned");
        let entry = guard.get_mut(key)?;
        if entry.state != PendingState::Active || entry.is_expired() {
            return None;
        }
        let snapshot = entry.clone();
        entry.state = PendingState::RecentlyCompleted;
        entry.completed_at = Some(Instant::now());
        #[cfg(feature = "metrics")]
        crate::telemetry::Metrics::global().turns_active.dec();
        Some(snapshot)
    }

    /// Current entry for `key`, or `None` if absent or its TTL has expired.
    /// Expired entries are pruned on access. This dual lookup (active or
    /// still-within-TTL) is what lets a late `session.idle` still find the
    /// anchor it needs to finalize (§4.2).
    pub fn get(&self, key: &InstanceKey) -> Option<PendingEntry> {
        let mut guard = self.entries.lock().expect("tracker lock poisoned");
        match guard.get(key) {
            Some(entry) if entry.is_expired() => {
                guard.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    pub fn is_active(&self, key: &InstanceKey) -> bool {
        matches!(
            self.get(key),
            Some(PendingEntry {
                state: PendingState::Active,
                ..
            })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> InstanceKey {
        InstanceKey::new("demo", "main")
    }

    #[test]
    fn mark_pending_then_complete_round_trips() {
        let tracker = Tracker::new();
        tracker.mark_pending(&key(), "ch-1", "u1");
        assert!(tracker.is_active(&key()));

        let completed = tracker.mark_completed(&key()).expect("was active");
        assert_eq!(completed.state, PendingState::Active);
        assert_eq!(completed.message_id.as_deref(), Some("u1"));
        assert!(!tracker.is_active(&key()));
        assert_eq!(
            tracker.get(&key()).unwrap().state,
            PendingState::RecentlyCompleted
        );
    }

    #[test]
    fn duplicate_completion_returns_none() {
        let tracker = Tracker::new();
        tracker.mark_pending(&key(), "ch-1", "u1");
        assert!(tracker.mark_completed(&key()).is_some());
        assert!(tracker.mark_completed(&key()).is_none());
    }

    #[test]
    fn ensure_pending_is_idempotent_while_active() {
        let tracker = Tracker::new();
        assert!(tracker.ensure_pending(&key(), "ch-1"));
        tracker.set_prompt_preview(&key(), "hello");
        assert!(!tracker.ensure_pending(&key(), "ch-1"));
        assert_eq!(
            tracker.get(&key()).unwrap().prompt_preview,
            Some("hello".to_string())
        );
    }

    #[test]
    fn ensure_start_message_creates_once() {
        let tracker = Tracker::new();
        tracker.ensure_pending(&key(), "ch-1");
        let mut calls = 0;
        let first = tracker.ensure_start_message(&key(), || {
            calls += 1;
            "msg-1".to_string()
        });
        let second = tracker.ensure_start_message(&key(), || {
            calls += 1;
            "msg-2".to_string()
        });
        assert_eq!(first, Some("msg-1".to_string()));
        assert_eq!(second, Some("msg-1".to_string()));
        assert_eq!(calls, 1);
    }

    #[test]
    fn mark_pending_clears_recently_completed() {
        let tracker = Tracker::new();
        tracker.mark_pending(&key(), "ch-1", "u1");
        tracker.mark_completed(&key());
        assert_eq!(
            tracker.get(&key()).unwrap().state,
            PendingState::RecentlyCompleted
        );

        tracker.mark_pending(&key(), "ch-1", "u2");
        let entry = tracker.get(&key()).unwrap();
        assert_eq!(entry.state, PendingState::Active);
        assert_eq!(entry.message_id.as_deref(), Some("u2"));
    }

    #[test]
    fn thinking_elapsed_is_none_until_marked() {
        let tracker = Tracker::new();
        tracker.ensure_pending(&key(), "ch-1");
        assert!(tracker.thinking_elapsed(&key()).is_none());
        tracker.mark_thinking_start(&key());
        assert!(tracker.thinking_elapsed(&key()).is_some());
    }

    #[test]
    fn hook_active_flag_round_trips() {
        let tracker = Tracker::new();
        tracker.ensure_pending(&key(), "ch-1");
        assert!(!tracker.is_hook_active(&key()));
        tracker.set_hook_active(&key(), true);
        assert!(tracker.is_hook_active(&key()));
    }

    #[test]
    fn reaction_tracks_the_last_applied_emoji() {
        let tracker = Tracker::new();
        tracker.mark_pending(&key(), "ch-1", "u1");
        assert_eq!(tracker.get(&key()).unwrap().reaction, None);
        tracker.set_reaction(&key(), "⏳");
        assert_eq!(tracker.get(&key()).unwrap().reaction.as_deref(), Some("⏳"));
        tracker.set_reaction(&key(), "🧠");
        assert_eq!(tracker.get(&key()).unwrap().reaction.as_deref(), Some("🧠"));
    }
}

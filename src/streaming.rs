//! Streaming activity updater.
//!
//! While an agent's turn is active, tool activity and thinking updates are
//! appended to a single chat message instead of spamming one message per
//! event. This module owns that message's growing buffer, the debounce that
//! keeps edits under the platform's rate limit, and the truncation that keeps
//! the rendered payload under the platform's size limit.

use crate::InstanceKey;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Default minimum gap between edits to the same streaming message, overridable
/// via `DISCODE_STREAM_MIN_EDIT_MS`.
pub const DEFAULT_MIN_EDIT_INTERVAL: Duration = Duration::from_millis(1000);

/// Rendered payload cap in characters. Comfortably under Discord's 4096-char
/// embed description limit; Slack's block text limit is far higher, so this
/// is the binding constraint across platforms.
const MAX_PAYLOAD_CHARS: usize = 3500;

pub struct StreamingEntry {
    pub message_id: String,
    lines: VecDeque<String>,
    rendered_len: usize,
    /// When the message was last actually edited on the platform — what the
    /// rate cap measures against.
    last_sent: Instant,
    /// Whether a debounced flush is already scheduled, so bursty appends
    /// coalesce onto one pending edit instead of each re-arming their own
    /// timer (§4.3 "coalesce edits within a ~500ms window").
    flush_scheduled: bool,
    truncated: bool,
}

impl StreamingEntry {
    fn new(message_id: String) -> Self {
        Self {
            message_id,
            lines: VecDeque::new(),
            rendered_len: 0,
            last_sent: Instant::now() - DEFAULT_MIN_EDIT_INTERVAL,
            flush_scheduled: false,
            truncated: false,
        }
    }

    fn push(&mut self, line: String) {
        self.rendered_len += line.len() + 1;
        self.lines.push_back(line);
        while self.rendered_len > MAX_PAYLOAD_CHARS && self.lines.len() > 1 {
            if let Some(dropped) = self.lines.pop_front() {
                self.rendered_len -= dropped.len() + 1;
                self.truncated = true;
            }
        }
    }

    /// Replace the most recently appended line in place, used by the
    /// `thinking.start` elapsed-time ticker so it doesn't grow the buffer
    /// once per second. Appends instead if the buffer is empty.
    fn replace_last(&mut self, line: String) {
        match self.lines.back_mut() {
            Some(last) => {
                let delta = line.len() as i64 - last.len() as i64;
                self.rendered_len = (self.rendered_len as i64 + delta).max(0) as usize;
                *last = line;
            }
            None => self.push(line),
        }
    }

    /// Render the current buffer, prefixing a truncation notice once lines
    /// have been dropped from the front.
    pub fn render(&self) -> String {
        if self.truncated {
            let mut out = String::from("_... earlier activity truncated ..._\n");
            out.push_str(
                &self
                    .lines
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
            out
        } else {
            self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
        }
    }
}

/// Tracks the in-flight streaming message for every instance with an active
/// turn. One entry per [`InstanceKey`]; created by `start`, consumed by
/// `finalize` or `discard`.
pub struct StreamingUpdater {
    entries: Mutex<HashMap<InstanceKey, StreamingEntry>>,
    min_edit_interval: Duration,
}

impl StreamingUpdater {
    pub fn new(min_edit_interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            min_edit_interval,
        }
    }

    pub fn has(&self, key: &InstanceKey) -> bool {
        self.entries.lock().expect("streaming lock poisoned").contains_key(key)
    }

    pub fn start(&self, key: &InstanceKey, message_id: impl Into<String>) {
        self.entries
            .lock()
            .expect("streaming lock poisoned")
            .insert(key.clone(), StreamingEntry::new(message_id.into()));
    }

    /// Whether enough time has passed since the last *actual* edit to push
    /// another one without exceeding the platform rate cap.
    pub fn can_stream(&self, key: &InstanceKey) -> bool {
        self.entries
            .lock()
            .expect("streaming lock poisoned")
            .get(key)
            .map(|entry| entry.last_sent.elapsed() >= self.min_edit_interval)
            .unwrap_or(false)
    }

    /// How much longer the caller must wait before [`StreamingUpdater::can_stream`]
    /// would return true, used to re-arm a debounce timer against the cooldown.
    pub fn cooldown_remaining(&self, key: &InstanceKey) -> Duration {
        self.entries
            .lock()
            .expect("streaming lock poisoned")
            .get(key)
            .map(|entry| self.min_edit_interval.saturating_sub(entry.last_sent.elapsed()))
            .unwrap_or_default()
    }

    /// Append `line` to the buffer. Content mutation only — does not count as
    /// an edit against the rate cap; the caller schedules the actual flush.
    pub fn append_cumulative(&self, key: &InstanceKey, line: impl Into<String>) {
        let mut guard = self.entries.lock().expect("streaming lock poisoned");
        if let Some(entry) = guard.get_mut(key) {
            entry.push(line.into());
        }
    }

    /// True if a debounced flush is not yet scheduled for `key`, in which
    /// case the caller should schedule one and mark it scheduled via
    /// [`StreamingUpdater::end_flush`] once it fires (or is abandoned).
    pub fn begin_flush(&self, key: &InstanceKey) -> bool {
        let mut guard = self.entries.lock().expect("streaming lock poisoned");
        match guard.get_mut(key) {
            Some(entry) if !entry.flush_scheduled => {
                entry.flush_scheduled = true;
                true
            }
            _ => false,
        }
    }

    /// Clear the scheduled-flush flag, allowing the next append to schedule
    /// a fresh debounce window.
    pub fn end_flush(&self, key: &InstanceKey) {
        if let Some(entry) = self.entries.lock().expect("streaming lock poisoned").get_mut(key) {
            entry.flush_scheduled = false;
        }
    }

    /// Current rendered payload for `key`, without mutating anything —
    /// what a debounce-timer flush actually sends.
    pub fn render(&self, key: &InstanceKey) -> Option<String> {
        self.entries
            .lock()
            .expect("streaming lock poisoned")
            .get(key)
            .map(StreamingEntry::render)
    }

    /// Record that `key`'s message was just edited on the platform, resetting
    /// the rate-cap clock.
    pub fn mark_sent(&self, key: &InstanceKey) {
        if let Some(entry) = self.entries.lock().expect("streaming lock poisoned").get_mut(key) {
            entry.last_sent = Instant::now();
        }
    }

    /// Id of the chat message backing `key`'s streaming entry, if any.
    pub fn message_id(&self, key: &InstanceKey) -> Option<String> {
        self.entries
            .lock()
            .expect("streaming lock poisoned")
            .get(key)
            .map(|entry| entry.message_id.clone())
    }

    /// Like [`StreamingUpdater::append_cumulative`] but replaces the last
    /// line instead of appending a new one. Content mutation only; the
    /// caller is responsible for the actual edit and for calling
    /// [`StreamingUpdater::mark_sent`] once it happens.
    pub fn update_last(&self, key: &InstanceKey, line: impl Into<String>) -> Option<String> {
        let mut guard = self.entries.lock().expect("streaming lock poisoned");
        let entry = guard.get_mut(key)?;
        entry.replace_last(line.into());
        Some(entry.render())
    }

    /// Remove and return the entry for `key`, e.g. so the caller can push a
    /// final edit with the completed turn's summary in place of the buffer.
    pub fn finalize(&self, key: &InstanceKey) -> Option<(String, String)> {
        let mut guard = self.entries.lock().expect("streaming lock poisoned");
        let entry = guard.remove(key)?;
        let rendered = entry.render();
        Some((entry.message_id, rendered))
    }

    /// Drop the entry without rendering — used when a turn ends before any
    /// streaming content was ever pushed.
    pub fn discard(&self, key: &InstanceKey) {
        self.entries.lock().expect("streaming lock poisoned").remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> InstanceKey {
        InstanceKey::new("demo", "main")
    }

    #[test]
    fn start_then_append_renders_lines_in_order() {
        let updater = StreamingUpdater::new(Duration::from_millis(0));
        updater.start(&key(), "msg-1");
        updater.append_cumulative(&key(), "first");
        updater.append_cumulative(&key(), "second");
        assert_eq!(updater.render(&key()).unwrap(), "first\nsecond");
    }

    #[test]
    fn append_without_start_is_a_no_op() {
        let updater = StreamingUpdater::new(Duration::from_millis(0));
        updater.append_cumulative(&key(), "line");
        assert!(updater.render(&key()).is_none());
    }

    #[test]
    fn payload_cap_truncates_oldest_lines() {
        let updater = StreamingUpdater::new(Duration::from_millis(0));
        updater.start(&key(), "msg-1");
        let long_line = "x".repeat(2000);
        updater.append_cumulative(&key(), long_line.clone());
        updater.append_cumulative(&key(), long_line);
        let rendered = updater.render(&key()).unwrap();
        assert!(rendered.starts_with("_... earlier activity truncated ..._"));
    }

    #[test]
    fn finalize_removes_entry() {
        let updater = StreamingUpdater::new(Duration::from_millis(0));
        updater.start(&key(), "msg-1");
        updater.append_cumulative(&key(), "line");
        let (message_id, rendered) = updater.finalize(&key()).unwrap();
        assert_eq!(message_id, "msg-1");
        assert_eq!(rendered, "line");
        assert!(!updater.has(&key()));
    }

    #[test]
    fn begin_flush_is_exclusive_until_ended() {
        let updater = StreamingUpdater::new(Duration::from_millis(0));
        updater.start(&key(), "msg-1");
        assert!(updater.begin_flush(&key()));
        assert!(!updater.begin_flush(&key()));
        updater.end_flush(&key());
        assert!(updater.begin_flush(&key()));
    }

    #[test]
    fn update_last_replaces_most_recent_line_only() {
        let updater = StreamingUpdater::new(Duration::from_millis(0));
        updater.start(&key(), "msg-1");
        updater.append_cumulative(&key(), "🧠 Thinking...");
        updater.update_last(&key(), "🧠 Thinking for 3s...");
        assert_eq!(updater.render(&key()).unwrap(), "🧠 Thinking for 3s...");
        assert_eq!(updater.message_id(&key()), Some("msg-1".to_string()));
    }

    #[test]
    fn can_stream_respects_debounce_interval() {
        let updater = StreamingUpdater::new(Duration::from_secs(60));
        updater.start(&key(), "msg-1");
        assert!(!updater.can_stream(&key()));
    }
}

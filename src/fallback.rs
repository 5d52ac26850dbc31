//! Terminal-buffer Fallback Watchdog (§4.8).
//!
//! Armed by the inbound router for every message delivered to a runtime with
//! a tmux/PTY window. If no `session.idle` hook follows within a few
//! seconds, polls the window buffer until it stabilizes and posts it as a
//! fenced code block — the daemon's answer of last resort for agent CLIs
//! with no hook wired at all. Registered in [`crate::pipeline::TimerRegistry`]
//! under the same key as the thinking ticker and lifecycle watchdog, so a
//! terminal hook event or a fresh inbound message cancels it automatically.

use crate::pipeline::Deps;
use crate::InstanceKey;

const TIMER_NAME: &str = "fallback";

/// Arm (or re-arm, replacing any outstanding watchdog for the same key) the
/// fallback for `key`, whose triggering inbound message landed in
/// `channel_id` on `platform`.
pub fn arm(deps: &Deps, key: InstanceKey, channel_id: String, platform: String) {
    let task_deps = deps.clone();
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
        run(&task_deps, &task_key, &channel_id, &platform).await;
    });
    deps.timers.set(key, TIMER_NAME, handle);
}

async fn run(deps: &Deps, key: &InstanceKey, channel_id: &str, platform: &str) {
    tokio::time::sleep(deps.config.fallback.initial_wait).await;

    if deps.tracker.is_hook_active(key) {
        return;
    }

    let Ok(Some(mut prev)) = deps.runtime.get_window_buffer(key).await else {
        return;
    };

    for _ in 0..deps.config.fallback.max_checks {
        tokio::time::sleep(deps.config.fallback.poll_interval).await;

        let Ok(Some(curr)) = deps.runtime.get_window_buffer(key).await else {
            return;
        };

        if curr == prev {
            if curr.trim().is_empty() {
                return;
            }
            post_and_complete(deps, key, channel_id, platform, &curr).await;
            return;
        }

        prev = curr;
    }
}

async fn post_and_complete(deps: &Deps, key: &InstanceKey, channel_id: &str, platform: &str, buffer: &str) {
    let Some(adapter) = deps.messaging.get(platform) else {
        return;
    };
    let text = format!("```\n{buffer}\n```");
    if let Err(error) = adapter.send_to_channel(channel_id, &text).await {
        tracing::warn!(%error, "failed to post fallback buffer");
    }
    #[cfg(feature = "metrics")]
    crate::telemetry::Metrics::global().fallback_triggers_total.inc();
    deps.tracker.mark_completed(key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::messaging::MessagingManager;
    use crate::pipeline::TimerRegistry;
    use crate::runtime::TestRuntime;
    use crate::state::StateStore;
    use crate::streaming::StreamingUpdater;
    use crate::tracker::Tracker;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_deps(runtime: Arc<TestRuntime>) -> Deps {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            home_dir: dir.path().to_path_buf(),
            hook: crate::config::HookConfig::default(),
            streaming: crate::config::StreamingConfig::default(),
            fallback: crate::config::FallbackConfig::default(),
            router: crate::config::RouterConfig::default(),
            projection: crate::config::ProjectionConfig::default(),
            discord: None,
            slack: None,
            telemetry: crate::config::TelemetryConfig::default(),
        };
        config.fallback.initial_wait = Duration::from_millis(5);
        config.fallback.poll_interval = Duration::from_millis(5);
        config.fallback.max_checks = 3;

        Deps {
            config: Arc::new(config),
            messaging: Arc::new(MessagingManager::new()),
            tracker: Arc::new(Tracker::new()),
            streaming: Arc::new(StreamingUpdater::new(Duration::from_millis(0))),
            timers: Arc::new(TimerRegistry::new()),
            state: Arc::new(StateStore::load(dir.path().join("projects.json")).unwrap()),
            runtime,
        }
    }

    #[tokio::test]
    async fn hook_active_cancels_before_any_capture() {
        let runtime = Arc::new(TestRuntime::new());
        runtime.set_buffer(&InstanceKey::new("demo", "main"), "a stable menu");
        let deps = test_deps(runtime);
        let key = InstanceKey::new("demo", "main");
        deps.tracker.ensure_pending(&key, "ch-1");
        deps.tracker.set_hook_active(&key, true);

        run(&deps, &key, "ch-1", "discord").await;

        // A buffer was available and stable the whole time, so without the
        // hook_active guard this would have posted it and completed the
        // turn. The guard must make `run` bail out before any of that.
        assert!(deps.tracker.is_active(&key));
    }

    #[tokio::test]
    async fn stable_buffer_is_posted_and_turn_marked_completed() {
        let runtime = Arc::new(TestRuntime::new());
        let key = InstanceKey::new("demo", "main");
        runtime.set_buffer(&key, "a stable menu");
        let deps = test_deps(runtime);
        deps.tracker.mark_pending(&key, "ch-1", "u1");

        run(&deps, &key, "ch-1", "discord").await;

        assert!(!deps.tracker.is_active(&key));
    }
}

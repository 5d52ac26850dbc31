//! Event pipeline: per-channel serialization, auto-pending, and dispatch to
//! handlers (§4.5).
//!
//! The "single timer registry... looked up by typed key" REDESIGN FLAG from
//! the original spec's §9 is [`TimerRegistry`] here: every ticker/watchdog a
//! handler starts is registered under `(InstanceKey, name)` so a terminal
//! event cancels all of them with one call instead of scattered
//! `Option<JoinHandle>` fields per handler.

use crate::config::Config;
use crate::event::{Event, EventContext};
use crate::handlers;
use crate::messaging::MessagingManager;
use crate::runtime::RuntimeDyn;
use crate::state::StateStore;
use crate::streaming::StreamingUpdater;
use crate::tracker::Tracker;
use crate::{InstanceKey, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shared handles every event handler needs. Cloned cheaply (everything
/// inside is an `Arc`) and passed by reference into each handler call.
#[derive(Clone)]
pub struct Deps {
    pub config: Arc<Config>,
    pub messaging: Arc<MessagingManager>,
    pub tracker: Arc<Tracker>,
    pub streaming: Arc<StreamingUpdater>,
    pub timers: Arc<TimerRegistry>,
    pub state: Arc<StateStore>,
    pub runtime: Arc<dyn RuntimeDyn>,
}

/// Named timers per instance key, so terminal events cancel everything in
/// one call (§4.5 step 4: "clear any pending timers for this key").
#[derive(Default)]
pub struct TimerRegistry {
    handles: Mutex<HashMap<(InstanceKey, &'static str), JoinHandle<()>>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `(key, name)`, aborting and replacing
    /// whatever was previously registered there.
    pub fn set(&self, key: InstanceKey, name: &'static str, handle: JoinHandle<()>) {
        let mut guard = self.handles.lock().expect("timer registry lock poisoned");
        if let Some(old) = guard.insert((key, name), handle) {
            old.abort();
        }
    }

    /// Cancel a single named timer for `key`, if any.
    pub fn cancel(&self, key: &InstanceKey, name: &'static str) {
        let mut guard = self.handles.lock().expect("timer registry lock poisoned");
        if let Some(handle) = guard.remove(&(key.clone(), name)) {
            handle.abort();
        }
    }

    /// Cancel every timer registered for `key` — called on `session.idle`
    /// and `session.error` (§4.5 step 4) and at shutdown.
    pub fn cancel_all_for(&self, key: &InstanceKey) {
        let mut guard = self.handles.lock().expect("timer registry lock poisoned");
        guard.retain(|(k, _), handle| {
            if k == key {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Cancel every timer in the registry — daemon shutdown.
    pub fn cancel_all(&self) {
        let mut guard = self.handles.lock().expect("timer registry lock poisoned");
        for (_, handle) in guard.drain() {
            handle.abort();
        }
    }
}

/// Per-channel work queues plus the timer registry and deps every handler
/// needs. Events for the same channel are processed strictly in arrival
/// order on a single worker task; different channels run concurrently.
pub struct Pipeline {
    deps: Deps,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<EventContext>>>,
}

impl Pipeline {
    pub fn new(deps: Deps) -> Arc<Self> {
        Arc::new(Self {
            deps,
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve, auto-pend, and enqueue an incoming hook event. Returns once
    /// the event has been queued — handler execution happens asynchronously,
    /// matching the "enqueue... respond 200" contract in §4.4.
    pub fn submit(self: &Arc<Self>, event: Event) -> Result<()> {
        let snapshot = self.deps.state.snapshot();
        let instance = snapshot
            .find_instance(event.project(), event.instance_key_part())
            .ok_or_else(|| crate::error::HookError::UnknownProject(event.project().to_string()))?;
        let project_path = snapshot
            .projects
            .get(event.project())
            .and_then(|p| p.path.clone())
            .unwrap_or_default();

        let channel_id = instance.channel_id.clone();
        let platform = instance.platform.clone();
        let key = event.key();

        // Step 1: auto-pending for agent-activity events with no turn yet.
        // The anchor message itself (`ensureStartMessage`) is a network call,
        // so it's deferred to the per-channel worker (see `run_worker`) —
        // running it there instead of here keeps it in the same strict
        // per-channel order as everything else without blocking the hook
        // response on a chat API round trip.
        if event.is_auto_pending() {
            self.deps.tracker.ensure_pending(&key, channel_id.clone());
        }

        let ctx = EventContext::new(event, channel_id.clone(), platform, project_path);

        // Step 4: terminal events clear every timer registered for this key.
        if ctx.event.is_terminal() {
            self.deps.timers.cancel_all_for(&key);
        }

        self.enqueue(channel_id, ctx);
        Ok(())
    }

    fn enqueue(self: &Arc<Self>, channel_id: String, ctx: EventContext) {
        let mut workers = self.workers.lock().expect("pipeline workers lock poisoned");
        let sender = workers.entry(channel_id.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let deps = self.deps.clone();
            tokio::spawn(Self::run_worker(deps, rx));
            tx
        });
        if sender.send(ctx).is_err() {
            // Worker task died; drop and let the next event spawn a fresh one.
            workers.remove(&channel_id);
        }
    }

    async fn run_worker(deps: Deps, mut rx: mpsc::UnboundedReceiver<EventContext>) {
        while let Some(ctx) = rx.recv().await {
            let kind = ctx.event.kind();
            // Any hook event reaching dispatch means the hook path is alive
            // for this turn — set unconditionally, not just by the session
            // handlers, so the fallback watchdog (§4.8 step 2) stands down
            // for turns whose only events are thinking/tool/idle.
            deps.tracker.set_hook_active(&ctx.key, true);
            if ctx.event.is_auto_pending() {
                handlers::ensure_anchor(&deps, &ctx).await;
            }
            if let Err(error) = handlers::dispatch(&deps, ctx).await {
                tracing::error!(%error, kind, "event handler failed — pipeline continues");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_registry_cancel_all_for_only_touches_matching_key() {
        let registry = TimerRegistry::new();
        let key_a = InstanceKey::new("p", "a");
        let key_b = InstanceKey::new("p", "b");
        registry.set(key_a.clone(), "thinking", tokio::spawn(async {}));
        registry.set(key_b.clone(), "thinking", tokio::spawn(async {}));
        registry.cancel_all_for(&key_a);
        let guard = registry.handles.lock().unwrap();
        assert!(!guard.contains_key(&(key_a, "thinking")));
        assert!(guard.contains_key(&(key_b, "thinking")));
    }
}

//! Runtime interface — the boundary to tmux/PTY/SDK process supervision.
//!
//! Per the original spec's framing ("out of scope ... only their interface
//! contracts appear here"), this module defines the contract the inbound
//! router and fallback watchdog need without implementing the process
//! supervision behind it. [`NullRuntime`] is a no-op used when no runtime is
//! wired; [`TestRuntime`] is an in-memory stand-in the test suite uses to
//! simulate tmux-window stabilization for the fallback watchdog (§4.8).

use crate::error::{Result, RuntimeError};
use crate::InstanceKey;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// The process-supervision boundary: delivering keystrokes to an agent and
/// reading back its terminal state.
pub trait Runtime: Send + Sync + 'static {
    /// Deliver `text` directly to an SDK-runtime instance's input channel.
    fn submit_message(&self, key: &InstanceKey, text: &str) -> impl Future<Output = Result<()>> + Send;

    /// Type `text` into a tmux/PTY window without submitting it.
    fn type_keys_to_window(&self, key: &InstanceKey, text: &str) -> impl Future<Output = Result<()>> + Send;

    /// Send the Enter keystroke to a tmux/PTY window, submitting whatever was
    /// typed via `type_keys_to_window`.
    fn send_enter_to_window(&self, key: &InstanceKey) -> impl Future<Output = Result<()>> + Send;

    /// Snapshot the current terminal screen for `key`, used by the
    /// buffer-fallback watchdog (§4.8). `None` means the runtime has no
    /// window for this key (e.g. an SDK-only instance); such runtimes must
    /// not be armed for fallback at all.
    fn get_window_buffer(&self, key: &InstanceKey) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Object-safe companion so the daemon can hold `Arc<dyn RuntimeDyn>` behind
/// a single field regardless of which concrete runtime is wired.
pub trait RuntimeDyn: Send + Sync + 'static {
    fn submit_message<'a>(
        &'a self,
        key: &'a InstanceKey,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn type_keys_to_window<'a>(
        &'a self,
        key: &'a InstanceKey,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn send_enter_to_window<'a>(
        &'a self,
        key: &'a InstanceKey,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn get_window_buffer<'a>(
        &'a self,
        key: &'a InstanceKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;
}

impl<T: Runtime> RuntimeDyn for T {
    fn submit_message<'a>(
        &'a self,
        key: &'a InstanceKey,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Runtime::submit_message(self, key, text))
    }

    fn type_keys_to_window<'a>(
        &'a self,
        key: &'a InstanceKey,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Runtime::type_keys_to_window(self, key, text))
    }

    fn send_enter_to_window<'a>(
        &'a self,
        key: &'a InstanceKey,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Runtime::send_enter_to_window(self, key))
    }

    fn get_window_buffer<'a>(
        &'a self,
        key: &'a InstanceKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(Runtime::get_window_buffer(self, key))
    }
}

/// No-op runtime used when no agent process supervisor is wired (e.g. the
/// hook server is being exercised on its own).
#[derive(Default)]
pub struct NullRuntime;

impl Runtime for NullRuntime {
    async fn submit_message(&self, key: &InstanceKey, _text: &str) -> Result<()> {
        Err(RuntimeError::NoWindow(key.to_string()).into())
    }

    async fn type_keys_to_window(&self, key: &InstanceKey, _text: &str) -> Result<()> {
        Err(RuntimeError::NoWindow(key.to_string()).into())
    }

    async fn send_enter_to_window(&self, key: &InstanceKey) -> Result<()> {
        Err(RuntimeError::NoWindow(key.to_string()).into())
    }

    async fn get_window_buffer(&self, _key: &InstanceKey) -> Result<Option<String>> {
        Ok(None)
    }
}

/// In-memory runtime used by tests to simulate a tmux window: text typed in
/// becomes the buffer, `advance_buffer` simulates the window's content
/// changing between fallback-watchdog polls.
#[derive(Default)]
pub struct TestRuntime {
    buffers: Mutex<HashMap<InstanceKey, String>>,
    submitted: Mutex<Vec<(InstanceKey, String)>>,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_buffer(&self, key: &InstanceKey, content: impl Into<String>) {
        self.buffers
            .lock()
            .expect("test runtime lock poisoned")
            .insert(key.clone(), content.into());
    }

    pub fn submitted(&self) -> Vec<(InstanceKey, String)> {
        self.submitted.lock().expect("test runtime lock poisoned").clone()
    }
}

impl Runtime for TestRuntime {
    async fn submit_message(&self, key: &InstanceKey, text: &str) -> Result<()> {
        self.submitted
            .lock()
            .expect("test runtime lock poisoned")
            .push((key.clone(), text.to_string()));
        Ok(())
    }

    async fn type_keys_to_window(&self, key: &InstanceKey, text: &str) -> Result<()> {
        self.buffers
            .lock()
            .expect("test runtime lock poisoned")
            .insert(key.clone(), text.to_string());
        Ok(())
    }

    async fn send_enter_to_window(&self, _key: &InstanceKey) -> Result<()> {
        Ok(())
    }

    async fn get_window_buffer(&self, key: &InstanceKey) -> Result<Option<String>> {
        Ok(self
            .buffers
            .lock()
            .expect("test runtime lock poisoned")
            .get(key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_runtime_reports_no_window() {
        let runtime = NullRuntime;
        let key = InstanceKey::new("demo", "main");
        assert!(runtime.submit_message(&key, "hi").await.is_err());
        assert_eq!(runtime.get_window_buffer(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_runtime_records_submissions_and_buffers() {
        let runtime = TestRuntime::new();
        let key = InstanceKey::new("demo", "main");
        runtime.type_keys_to_window(&key, "hello").await.unwrap();
        assert_eq!(
            runtime.get_window_buffer(&key).await.unwrap(),
            Some("hello".to_string())
        );
        runtime.submit_message(&key, "world").await.unwrap();
        assert_eq!(runtime.submitted(), vec![(key, "world".to_string())]);
    }
}

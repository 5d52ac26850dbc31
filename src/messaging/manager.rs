//! MessagingManager: registry and fan-out across all registered platform adapters.

use crate::error::{Error, Result};
use crate::messaging::traits::{MessageHandler, Messaging, MessagingDyn};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns every registered platform adapter, keyed by [`Messaging::platform`].
#[derive(Default)]
pub struct MessagingManager {
    adapters: HashMap<String, Arc<dyn MessagingDyn>>,
}

impl MessagingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own `platform()` name.
    pub fn register(&mut self, adapter: impl Messaging) {
        let platform = adapter.platform().to_string();
        self.adapters.insert(platform, Arc::new(adapter));
    }

    /// Look up a registered adapter by platform name ("discord", "slack").
    pub fn get(&self, platform: &str) -> Option<Arc<dyn MessagingDyn>> {
        self.adapters.get(platform).cloned()
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    /// Register `handler` as the inbound callback on every adapter. Must be
    /// called once, before [`MessagingManager::start_all`].
    pub fn on_message_all(&self, handler: MessageHandler) {
        for adapter in self.adapters.values() {
            adapter.on_message(handler.clone());
        }
    }

    /// Start every adapter concurrently. Returns the first error encountered,
    /// after every adapter has had a chance to start — a single misconfigured
    /// platform should not stop the others from coming up.
    pub async fn start_all(&self) -> Result<()> {
        let mut first_error = None;
        let starts = self
            .adapters
            .iter()
            .map(|(platform, adapter)| async move { (platform.clone(), adapter.start().await) });
        for (platform, result) in futures::future::join_all(starts).await {
            if let Err(error) = result {
                tracing::error!(platform = %platform, %error, "adapter failed to start");
                first_error.get_or_insert(error);
            } else {
                tracing::info!(platform = %platform, "adapter started");
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Health-check every adapter, returning per-platform results.
    pub async fn health_check_all(&self) -> HashMap<String, Result<()>> {
        let checks = self
            .adapters
            .iter()
            .map(|(platform, adapter)| async move { (platform.clone(), adapter.health_check().await) });
        futures::future::join_all(checks).await.into_iter().collect()
    }

    /// Shut down every adapter, collecting the first failure (if any) but
    /// still attempting every adapter's shutdown.
    pub async fn shutdown_all(&self) -> Result<()> {
        let shutdowns = self
            .adapters
            .values()
            .map(|adapter| adapter.shutdown());
        let results = futures::future::join_all(shutdowns).await;
        results
            .into_iter()
            .find(Result::is_err)
            .unwrap_or(Ok(()))
            .map_err(Error::from)
    }
}

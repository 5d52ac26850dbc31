//! Project/instance binding persistence.
//!
//! Discode resolves hook events and inbound chat messages to each other via a
//! small JSON file at `~/.discode/projects.json`. This module owns that file:
//! loading it at startup, reloading it on `POST /reload`, and recording the
//! one field the core is allowed to mutate (`last_active`).

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// A single bound agent instance: which chat channel it projects events into
/// and which platform owns that channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub platform: String,
    pub channel_id: String,
    /// Thread/anchor id for platforms that nest replies (Slack thread_ts).
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default = "chrono::Utc::now")]
    pub last_active: chrono::DateTime<chrono::Utc>,
}

/// All instances bound under a single project (a working directory / repo).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Project {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub instances: HashMap<String, Instance>,
}

/// The full persisted binding map, keyed by project name.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectState {
    #[serde(default)]
    pub projects: HashMap<String, Project>,
}

impl ProjectState {
    pub fn find_instance(&self, project: &str, instance_id: &str) -> Option<&Instance> {
        self.projects.get(project)?.instances.get(instance_id)
    }

    /// Resolve a chat conversation back to its `(project, instance_id)`, used
    /// by the inbound message router.
    pub fn find_by_channel(&self, platform: &str, channel_id: &str) -> Option<(String, String)> {
        for (project, state) in &self.projects {
            for (instance_id, instance) in &state.instances {
                if instance.platform == platform && instance.channel_id == channel_id {
                    return Some((project.clone(), instance_id.clone()));
                }
            }
        }
        None
    }
}

/// Thread-safe handle to the on-disk project state, reloadable without
/// restarting the daemon.
pub struct StateStore {
    path: PathBuf,
    state: RwLock<ProjectState>,
}

impl StateStore {
    /// Load from `path`, creating an empty file there if none exists yet.
    pub fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            read_state(&path)?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    ConfigError::Load {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
            }
            let empty = ProjectState::default();
            write_state(&path, &empty)?;
            empty
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Re-read the backing file from disk, replacing the in-memory snapshot.
    /// Called from the hook server's `POST /reload` handler.
    pub fn reload(&self) -> Result<()> {
        let fresh = read_state(&self.path)?;
        *self.state.write().expect("state lock poisoned") = fresh;
        Ok(())
    }

    pub fn snapshot(&self) -> ProjectState {
        self.state.read().expect("state lock poisoned").clone()
    }

    /// Bump `last_active` for an instance and persist it. The only write path
    /// the core takes against this file — bindings themselves are managed
    /// externally.
    pub fn touch(&self, project: &str, instance_id: &str) -> Result<()> {
        let mut guard = self.state.write().expect("state lock poisoned");
        if let Some(instance) = guard
            .projects
            .get_mut(project)
            .and_then(|p| p.instances.get_mut(instance_id))
        {
            instance.last_active = chrono::Utc::now();
        } else {
            return Ok(());
        }
        write_state(&self.path, &guard)
    }
}

fn read_state(path: &Path) -> Result<ProjectState> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw)
        .map_err(|error| ConfigError::Invalid(format!("malformed projects.json: {error}")).into())
}

fn write_state(path: &Path, state: &ProjectState) -> Result<()> {
    let raw = serde_json::to_string_pretty(state)
        .map_err(|error| ConfigError::Invalid(format!("failed to serialize state: {error}")))?;
    std::fs::write(path, raw).map_err(|source| {
        ConfigError::Load {
            path: path.display().to_string(),
            source,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_creates_empty_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        let store = StateStore::load(path.clone()).unwrap();
        assert!(path.exists());
        assert!(store.snapshot().projects.is_empty());
    }

    #[test]
    fn find_by_channel_resolves_binding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        let mut state = ProjectState::default();
        state.projects.insert(
            "demo".into(),
            Project {
                path: None,
                instances: HashMap::from([(
                    "main".into(),
                    Instance {
                        platform: "discord".into(),
                        channel_id: "123".into(),
                        thread_id: None,
                        last_active: chrono::Utc::now(),
                    },
                )]),
            },
        );
        write_state(&path, &state).unwrap();

        let store = StateStore::load(path).unwrap();
        let resolved = store.snapshot().find_by_channel("discord", "123");
        assert_eq!(resolved, Some(("demo".into(), "main".into())));
    }

    #[test]
    fn touch_updates_last_active_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        let mut state = ProjectState::default();
        state.projects.insert(
            "demo".into(),
            Project {
                path: None,
                instances: HashMap::from([(
                    "main".into(),
                    Instance {
                        platform: "discord".into(),
                        channel_id: "123".into(),
                        thread_id: None,
                        last_active: chrono::DateTime::from_timestamp(0, 0).unwrap(),
                    },
                )]),
            },
        );
        write_state(&path, &state).unwrap();

        let store = StateStore::load(path.clone()).unwrap();
        store.touch("demo", "main").unwrap();

        let reloaded = read_state(&path).unwrap();
        let instance = reloaded.find_instance("demo", "main").unwrap();
        assert!(instance.last_active > chrono::DateTime::from_timestamp(0, 0).unwrap());
    }
}

//! Device-local persistence: active child, auth token and the chat session
//! id per child. One JSON document, rewritten atomically on every change.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub active_child_id: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub chat_sessions: BTreeMap<String, String>,
}

pub struct LocalStore {
    path: Option<PathBuf>,
    state: Mutex<PersistedState>,
}

impl LocalStore {
    /// Opens `dir/state.json`. A missing or unreadable file starts empty.
    pub fn open(dir: impl AsRef<Path>) -> ClientResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| ClientError::Store(format!("create {}: {e}", dir.display())))?;
        let path = dir.join(STATE_FILE);
        let state = load(&path);
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(PersistedState::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }

    pub fn active_child_id(&self) -> Option<String> {
        self.state.lock().active_child_id.clone()
    }

    pub fn set_active_child_id(&self, child_id: Option<String>) -> ClientResult<()> {
        self.update(|s| s.active_child_id = child_id)
    }

    pub fn auth_token(&self) -> Option<String> {
        self.state.lock().auth_token.clone()
    }

    pub fn set_auth_token(&self, token: Option<String>) -> ClientResult<()> {
        self.update(|s| s.auth_token = token)
    }

    pub fn session_for(&self, child_id: &str) -> Option<String> {
        self.state.lock().chat_sessions.get(child_id).cloned()
    }

    /// `None` forgets the child's session so the next message starts fresh.
    pub fn set_session(&self, child_id: &str, session_id: Option<String>) -> ClientResult<()> {
        self.update(|s| match session_id {
            Some(id) => {
                s.chat_sessions.insert(child_id.to_string(), id);
            }
            None => {
                s.chat_sessions.remove(child_id);
            }
        })
    }

    fn update(&self, apply: impl FnOnce(&mut PersistedState)) -> ClientResult<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        apply(&mut next);
        if next == *state {
            return Ok(());
        }
        if let Some(path) = &self.path {
            write_atomic(path, &next)?;
        }
        *state = next;
        Ok(())
    }
}

fn load(path: &Path) -> PersistedState {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return PersistedState::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "state file unreadable, starting empty");
            return PersistedState::default();
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(state) => {
            debug!(path = %path.display(), "state loaded");
            state
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "state file corrupt, starting empty");
            PersistedState::default()
        }
    }
}

fn write_atomic(path: &Path, state: &PersistedState) -> ClientResult<()> {
    let json = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| ClientError::Store(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| ClientError::Store(format!("rename to {}: {e}", path.display())))
}

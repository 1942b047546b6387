//! User sessions and their claim keys

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A unit of work tied to a user (and optionally an experiment) that can
/// hold allocation claims on modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    /// Local user id
    pub user_id: u32,

    /// Experiment the session belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,

    /// Cross-deployment user id, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_user_id: Option<u32>,

    /// Display name, not part of the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl UserSession {
    pub fn new(user_id: u32) -> Self {
        Self {
            user_id,
            experiment_id: None,
            global_user_id: None,
            username: None,
        }
    }

    pub fn with_experiment(mut self, experiment_id: impl Into<String>) -> Self {
        self.experiment_id = Some(experiment_id.into());
        self
    }

    pub fn with_global_user(mut self, global_user_id: u32) -> Self {
        self.global_user_id = Some(global_user_id);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Deterministic claim key over (user id, experiment id, global id)
    pub fn key(&self) -> SessionKey {
        SessionKey::compute(self.user_id, self.experiment_id.as_deref(), self.global_user_id)
    }
}

impl std::fmt::Display for UserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[UserSession: user = {}", self.user_id)?;
        if let Some(ref name) = self.username {
            write!(f, " ({})", name)?;
        }
        if let Some(ref exp) = self.experiment_id {
            write!(f, ", experiment = {}", exp)?;
        }
        if let Some(global) = self.global_user_id {
            write!(f, ", global user = {}", global)?;
        }
        write!(f, "]")
    }
}

/// Claim key for a session.
///
/// Stable across processes, so two modules computing the key for the same
/// session always agree. The display name does not participate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(u64);

impl SessionKey {
    pub fn compute(user_id: u32, experiment_id: Option<&str>, global_user_id: Option<u32>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(user_id.to_be_bytes());

        // Presence tags keep `None` distinct from an empty experiment id
        match experiment_id {
            Some(exp) => {
                hasher.update([1u8]);
                hasher.update((exp.len() as u64).to_be_bytes());
                hasher.update(exp.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        match global_user_id {
            Some(global) => {
                hasher.update([1u8]);
                hasher.update(global.to_be_bytes());
            }
            None => hasher.update([0u8]),
        }

        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        SessionKey(u64::from_be_bytes(prefix))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0.to_be_bytes()))
    }
}

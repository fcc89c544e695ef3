//! Persisted session state.
//!
//! `{workingDirectory}/.doomcode/session.json` lets a later `--reuse` start
//! reconnect without re-pairing. The file is rewritten atomically on every
//! key state change and readable only by the owning user.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use doomcode_crypto::Keypair;

use crate::error::ControllerError;

/// Cached keypair halves, base64.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CachedKeypair {
    pub public_key: String,
    pub secret_key: String,
}

/// The cached session bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCache {
    pub session_id: String,
    pub ws_url: String,
    pub http_url: String,
    pub key_pair: CachedKeypair,
    /// Unix milliseconds of the last rewrite.
    pub updated_at: i64,
}

impl SessionCache {
    pub fn new(session_id: &str, ws_url: &str, http_url: &str, keypair: &Keypair) -> Self {
        Self {
            session_id: session_id.to_string(),
            ws_url: ws_url.to_string(),
            http_url: http_url.to_string(),
            key_pair: CachedKeypair {
                public_key: STANDARD.encode(keypair.public_bytes()),
                secret_key: STANDARD.encode(keypair.secret_bytes()),
            },
            updated_at: doomcode_core::unix_timestamp_ms(),
        }
    }

    fn cache_path(working_dir: &Path) -> PathBuf {
        working_dir.join(".doomcode").join("session.json")
    }

    /// Load the cache for a working directory, `None` when absent.
    pub fn load(working_dir: &Path) -> Result<Option<Self>, ControllerError> {
        let path = Self::cache_path(working_dir);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ControllerError::SessionCache(format!("read {}: {e}", path.display())))?;
        let cache: Self = serde_json::from_str(&text)
            .map_err(|e| ControllerError::SessionCache(format!("parse {}: {e}", path.display())))?;
        Ok(Some(cache))
    }

    /// Atomically rewrite the cache: write a sibling temp file, fix its
    /// mode, then rename over the target.
    pub fn save(&self, working_dir: &Path) -> Result<(), ControllerError> {
        let path = Self::cache_path(working_dir);
        let dir = path
            .parent()
            .ok_or_else(|| ControllerError::SessionCache("cache path has no parent".into()))?;
        std::fs::create_dir_all(dir)
            .map_err(|e| ControllerError::SessionCache(format!("mkdir {}: {e}", dir.display())))?;

        let tmp = dir.join(".session.json.tmp");
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, text)
            .map_err(|e| ControllerError::SessionCache(format!("write {}: {e}", tmp.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| ControllerError::SessionCache(format!("chmod: {e}")))?;
        }

        std::fs::rename(&tmp, &path)
            .map_err(|e| ControllerError::SessionCache(format!("rename: {e}")))?;
        Ok(())
    }

    /// Rebuild the keypair from the cached secret.
    pub fn keypair(&self) -> Result<Keypair, ControllerError> {
        let secret = STANDARD
            .decode(&self.key_pair.secret_key)
            .map_err(|e| ControllerError::SessionCache(format!("secret key base64: {e}")))?;
        Ok(Keypair::from_secret_bytes(&secret)?)
    }
}

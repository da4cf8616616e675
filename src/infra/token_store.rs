//! Usage: Refresh-token persistence boundary (JSON file under the app data dir, or memory).

use crate::infra::settings::write_file_atomic;
use crate::shared::error::{AuthError, AuthResult};
use crate::shared::mutex_ext::MutexExt;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const REFRESH_TOKEN_KEY: &str = "spotify.refreshtoken";

/// Where the refresh token survives process restarts. The access token is
/// never persisted.
pub trait RefreshTokenStore: Send + Sync {
    fn load(&self) -> AuthResult<Option<String>>;
    fn save(&self, refresh_token: &str) -> AuthResult<()>;
    fn clear(&self) -> AuthResult<()>;
}

/// Key/value JSON document; other keys in the same file are preserved.
#[derive(Debug, Clone)]
pub struct JsonFileTokenStore {
    path: PathBuf,
}

impl JsonFileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> AuthResult<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(AuthError::Storage(format!(
                "token store {} is not a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(AuthError::Storage(format!(
                "failed to parse token store {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> AuthResult<()> {
        let content = serde_json::to_vec_pretty(document)
            .map_err(|e| AuthError::Storage(format!("failed to serialize token store: {e}")))?;
        write_file_atomic(&self.path, &content)
    }
}

impl RefreshTokenStore for JsonFileTokenStore {
    fn load(&self) -> AuthResult<Option<String>> {
        let document = self.read_document()?;
        Ok(document
            .get(REFRESH_TOKEN_KEY)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string))
    }

    fn save(&self, refresh_token: &str) -> AuthResult<()> {
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(AuthError::EmptyRefreshToken);
        }
        let mut document = self.read_document()?;
        document.insert(
            REFRESH_TOKEN_KEY.to_string(),
            Value::String(refresh_token.to_string()),
        );
        self.write_document(&document)?;
        tracing::debug!(path = %self.path.display(), "refresh token persisted");
        Ok(())
    }

    fn clear(&self) -> AuthResult<()> {
        let mut document = self.read_document()?;
        if document.remove(REFRESH_TOKEN_KEY).is_none() {
            return Ok(());
        }
        self.write_document(&document)?;
        tracing::debug!(path = %self.path.display(), "refresh token removed");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    value: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn with_token(refresh_token: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(refresh_token.into())),
        }
    }
}

impl RefreshTokenStore for MemoryTokenStore {
    fn load(&self) -> AuthResult<Option<String>> {
        Ok(self.value.lock_or_recover().clone())
    }

    fn save(&self, refresh_token: &str) -> AuthResult<()> {
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(AuthError::EmptyRefreshToken);
        }
        *self.value.lock_or_recover() = Some(refresh_token.to_string());
        Ok(())
    }

    fn clear(&self) -> AuthResult<()> {
        *self.value.lock_or_recover() = None;
        Ok(())
    }
}

//! Usage: OAuth configuration file (`oauthconfig.json` schema + read/write helpers).

use crate::oauth::callback_server::DEFAULT_REDIRECT_TIMEOUT;
use crate::oauth::providers::{
    AuthorizationEndpoints, ClientSettings, DEFAULT_CALLBACK_PATH, DEFAULT_REDIRECT_PORT,
    SPOTIFY_AUTHORIZATION_ENDPOINT, SPOTIFY_TOKEN_ENDPOINT,
};
use crate::oauth::token_exchange::TokenExchangeClient;
use crate::oauth::token_manager::{ManagerOptions, DEFAULT_EXPIRY_MARGIN_SECS};
use crate::shared::error::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;
const MIN_REDIRECT_TIMEOUT_SECS: u64 = 1;
const MAX_REDIRECT_TIMEOUT_SECS: u64 = 60 * 60;
const MAX_EXPIRY_MARGIN_SECS: i64 = 60 * 60;
const MAX_HTTP_TIMEOUT_SECS: u64 = 10 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OAuthSettings {
    pub client_id: String,
    pub redirect_port: u16,
    pub callback_path: String,
    pub scopes: Vec<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub redirect_timeout_secs: u64,
    pub expiry_margin_secs: i64,
    pub http_connect_timeout_secs: u64,
    pub http_request_timeout_secs: u64,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            scopes: Vec::new(),
            authorization_endpoint: SPOTIFY_AUTHORIZATION_ENDPOINT.to_string(),
            token_endpoint: SPOTIFY_TOKEN_ENDPOINT.to_string(),
            redirect_timeout_secs: DEFAULT_REDIRECT_TIMEOUT.as_secs(),
            expiry_margin_secs: DEFAULT_EXPIRY_MARGIN_SECS,
            http_connect_timeout_secs: DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
            http_request_timeout_secs: DEFAULT_HTTP_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl OAuthSettings {
    /// Scopes joined with single spaces, blanks dropped.
    pub fn scope(&self) -> String {
        self.scopes
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Redirect URI is derived from `redirectPort` + `callbackPath`, so the two never disagree.
    pub fn client_settings(&self) -> AuthResult<ClientSettings> {
        let settings = ClientSettings::with_callback_path(
            self.client_id.trim(),
            self.scope(),
            self.redirect_port,
            &self.callback_path,
        );
        settings.validate()?;
        Ok(settings)
    }

    pub fn endpoints(&self) -> AuthorizationEndpoints {
        AuthorizationEndpoints::new(
            self.authorization_endpoint.trim(),
            self.token_endpoint.trim(),
        )
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            redirect_port: self.redirect_port,
            callback_path: self.callback_path.clone(),
            redirect_timeout: Duration::from_secs(self.redirect_timeout_secs),
            expiry_margin_secs: self.expiry_margin_secs,
        }
    }

    pub fn exchange_client(&self) -> AuthResult<TokenExchangeClient> {
        TokenExchangeClient::new(
            Duration::from_secs(self.http_connect_timeout_secs),
            Duration::from_secs(self.http_request_timeout_secs),
        )
    }
}

fn sanitize_redirect_timeout(settings: &mut OAuthSettings) -> bool {
    let clamped = settings
        .redirect_timeout_secs
        .clamp(MIN_REDIRECT_TIMEOUT_SECS, MAX_REDIRECT_TIMEOUT_SECS);
    let changed = clamped != settings.redirect_timeout_secs;
    settings.redirect_timeout_secs = clamped;
    changed
}

fn sanitize_expiry_margin(settings: &mut OAuthSettings) -> bool {
    let clamped = settings.expiry_margin_secs.clamp(0, MAX_EXPIRY_MARGIN_SECS);
    let changed = clamped != settings.expiry_margin_secs;
    settings.expiry_margin_secs = clamped;
    changed
}

fn sanitize_http_timeouts(settings: &mut OAuthSettings) -> bool {
    let mut changed = false;
    if settings.http_connect_timeout_secs == 0 {
        settings.http_connect_timeout_secs = DEFAULT_HTTP_CONNECT_TIMEOUT_SECS;
        changed = true;
    }
    if settings.http_request_timeout_secs == 0 {
        settings.http_request_timeout_secs = DEFAULT_HTTP_REQUEST_TIMEOUT_SECS;
        changed = true;
    }
    if settings.http_connect_timeout_secs > MAX_HTTP_TIMEOUT_SECS {
        settings.http_connect_timeout_secs = MAX_HTTP_TIMEOUT_SECS;
        changed = true;
    }
    if settings.http_request_timeout_secs > MAX_HTTP_TIMEOUT_SECS {
        settings.http_request_timeout_secs = MAX_HTTP_TIMEOUT_SECS;
        changed = true;
    }
    changed
}

fn sanitize_callback_path(settings: &mut OAuthSettings) -> bool {
    let trimmed = settings.callback_path.trim();
    let normalized = if trimmed.is_empty() {
        DEFAULT_CALLBACK_PATH.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    let changed = normalized != settings.callback_path;
    settings.callback_path = normalized;
    changed
}

fn sanitize(settings: &mut OAuthSettings) -> bool {
    let mut repaired = false;
    repaired |= sanitize_redirect_timeout(settings);
    repaired |= sanitize_expiry_margin(settings);
    repaired |= sanitize_http_timeouts(settings);
    repaired |= sanitize_callback_path(settings);
    repaired
}

fn parse_settings_json(content: &str) -> AuthResult<OAuthSettings> {
    serde_json::from_str(content)
        .map_err(|e| AuthError::Config(format!("failed to parse oauth settings: {e}")))
}

pub fn read(path: &Path) -> AuthResult<OAuthSettings> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AuthError::Config(format!("failed to read oauth settings {}: {e}", path.display()))
    })?;
    let mut settings = parse_settings_json(&content)?;
    if sanitize(&mut settings) {
        tracing::warn!(path = %path.display(), "oauth settings contained out-of-range values; using clamped values");
    }
    Ok(settings)
}

pub fn write(path: &Path, settings: &OAuthSettings) -> AuthResult<OAuthSettings> {
    let mut settings = settings.clone();
    sanitize(&mut settings);
    settings.client_settings()?;

    let content = serde_json::to_vec_pretty(&settings)
        .map_err(|e| AuthError::Config(format!("failed to serialize oauth settings: {e}")))?;
    write_file_atomic(path, &content)?;
    Ok(settings)
}

/// Writes via `<name>.tmp`, keeping `<name>.bak` until the rename succeeds.
pub(crate) fn write_file_atomic(path: &Path, content: &[u8]) -> AuthResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| AuthError::Storage(format!("invalid file path: {}", path.display())))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| AuthError::Storage(format!("failed to create {}: {e}", parent.display())))?;
    }

    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    let backup_path = path.with_file_name(format!("{file_name}.bak"));

    std::fs::write(&tmp_path, content)
        .map_err(|e| AuthError::Storage(format!("failed to write temp file: {e}")))?;

    if backup_path.exists() {
        let _ = std::fs::remove_file(&backup_path);
    }
    if path.exists() {
        std::fs::rename(path, &backup_path)
            .map_err(|e| AuthError::Storage(format!("failed to create backup: {e}")))?;
    }
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::rename(&backup_path, path);
        return Err(AuthError::Storage(format!("failed to finalize {file_name}: {e}")));
    }
    if backup_path.exists() {
        let _ = std::fs::remove_file(&backup_path);
    }
    Ok(())
}

//! Usage: Provider endpoint definitions and per-attempt client settings.

use crate::shared::error::{AuthError, AuthResult};
use reqwest::Url;

pub const SPOTIFY_AUTHORIZATION_ENDPOINT: &str = "https://accounts.spotify.com/authorize";
pub const SPOTIFY_TOKEN_ENDPOINT: &str = "https://accounts.spotify.com/api/token";

/// Port registered as part of the redirect URI in the Spotify developer dashboard.
pub const DEFAULT_REDIRECT_PORT: u16 = 1338;
pub const DEFAULT_CALLBACK_PATH: &str = "/callback";
pub(crate) const REDIRECT_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

impl AuthorizationEndpoints {
    pub fn new(authorization_endpoint: impl Into<String>, token_endpoint: impl Into<String>) -> Self {
        Self {
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
        }
    }

    pub fn spotify() -> Self {
        Self::new(SPOTIFY_AUTHORIZATION_ENDPOINT, SPOTIFY_TOKEN_ENDPOINT)
    }
}

impl Default for AuthorizationEndpoints {
    fn default() -> Self {
        Self::spotify()
    }
}

/// Client registration for one authorization attempt.
///
/// `redirect_uri` always embeds `redirect_port`; the constructors keep the two
/// in agreement and [`ClientSettings::from_parts`] rejects a mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    client_id: String,
    redirect_uri: String,
    scope: String,
    redirect_port: u16,
}

impl ClientSettings {
    /// Settings for the default loopback callback (`http://127.0.0.1:<port>/callback`).
    pub fn new(client_id: impl Into<String>, scope: impl Into<String>, redirect_port: u16) -> Self {
        Self::with_callback_path(client_id, scope, redirect_port, DEFAULT_CALLBACK_PATH)
    }

    pub fn with_callback_path(
        client_id: impl Into<String>,
        scope: impl Into<String>,
        redirect_port: u16,
        callback_path: &str,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: make_redirect_uri(redirect_port, callback_path),
            scope: scope.into(),
            redirect_port,
        }
    }

    pub fn from_parts(
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scope: impl Into<String>,
        redirect_port: u16,
    ) -> AuthResult<Self> {
        let settings = Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scope: scope.into(),
            redirect_port,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn redirect_port(&self) -> u16 {
        self.redirect_port
    }

    /// Path component of the redirect URI the listener has to serve.
    pub fn callback_path(&self) -> AuthResult<String> {
        Ok(self.parse_redirect_uri()?.path().to_string())
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Config("client_id must not be empty".to_string()));
        }
        if self.redirect_port == 0 {
            return Err(AuthError::Config(
                "redirect_port must be a fixed, registered port".to_string(),
            ));
        }

        let url = self.parse_redirect_uri()?;
        if url.scheme() != "http" {
            return Err(AuthError::Config(format!(
                "redirect_uri must use http on loopback, got scheme {}",
                url.scheme()
            )));
        }
        match url.host_str() {
            Some("127.0.0.1") | Some("localhost") => {}
            other => {
                return Err(AuthError::Config(format!(
                    "redirect_uri host must be loopback, got {}",
                    other.unwrap_or("<none>")
                )))
            }
        }
        let uri_port = url.port_or_known_default().unwrap_or_default();
        if uri_port != self.redirect_port {
            return Err(AuthError::Config(format!(
                "redirect_uri port {uri_port} does not match redirect_port {}",
                self.redirect_port
            )));
        }
        Ok(())
    }

    fn parse_redirect_uri(&self) -> AuthResult<Url> {
        Url::parse(self.redirect_uri.trim())
            .map_err(|e| AuthError::Config(format!("invalid redirect_uri: {e}")))
    }
}

pub fn make_redirect_uri(port: u16, callback_path: &str) -> String {
    let path = callback_path.trim();
    if path.starts_with('/') {
        format!("http://{REDIRECT_HOST}:{port}{path}")
    } else {
        format!("http://{REDIRECT_HOST}:{port}/{path}")
    }
}

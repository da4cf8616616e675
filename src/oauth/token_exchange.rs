//! Usage: Token endpoint client (authorization_code + refresh_token grants).

use crate::oauth::providers::AuthorizationEndpoints;
use crate::shared::error::{AuthError, AuthResult};
use crate::shared::security::mask_token;
use crate::shared::time::now_unix_seconds;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";
const GRANT_TYPE_REFRESH_TOKEN: &str = "refresh_token";
const ERROR_BODY_SNIPPET_CHARS: usize = 500;

/// Access/refresh token pair held for the account.
///
/// `refresh_token` is never empty once produced by a successful authorization.
/// `expires_at` is unix seconds; `None` means the provider stated no lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<i64>,
}

impl TokenData {
    /// `now < expires_at - margin`. A token without a stated lifetime stays valid
    /// until a caller invalidates it.
    pub fn is_access_token_valid(&self, now_unix: i64, margin_secs: i64) -> bool {
        if self.access_token.trim().is_empty() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => now_unix < expires_at.saturating_sub(margin_secs.max(0)),
            None => true,
        }
    }
}

/// Raw result of a token endpoint call; a refresh response may omit `refresh_token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

impl TokenGrant {
    /// Merge into a [`TokenData`], keeping `previous_refresh_token` when the
    /// provider did not rotate it.
    pub fn into_token_data(self, previous_refresh_token: &str) -> TokenData {
        TokenData {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .unwrap_or_else(|| previous_refresh_token.to_string()),
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    http: reqwest::Client,
}

impl TokenExchangeClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> AuthResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("spotify-auth/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| AuthError::Internal(format!("oauth http client init failed: {e}")))?;
        Ok(Self { http })
    }

    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Authorization-code grant with the PKCE verifier. The response must carry a refresh token.
    pub async fn exchange_code(
        &self,
        endpoints: &AuthorizationEndpoints,
        client_id: &str,
        redirect_uri: &str,
        code: &str,
        code_verifier: &str,
    ) -> AuthResult<TokenData> {
        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", GRANT_TYPE_AUTHORIZATION_CODE.to_string());
        form.insert("code", code.trim().to_string());
        form.insert("redirect_uri", redirect_uri.trim().to_string());
        form.insert("client_id", client_id.trim().to_string());
        form.insert("code_verifier", code_verifier.trim().to_string());

        let grant = self
            .post_form(endpoints, GRANT_TYPE_AUTHORIZATION_CODE, &form)
            .await?;
        let refresh_token = grant
            .refresh_token
            .clone()
            .ok_or(AuthError::MissingRefreshToken)?;
        Ok(grant.into_token_data(&refresh_token))
    }

    /// Refresh-token grant. Blank refresh tokens are rejected before anything is sent.
    pub async fn exchange_refresh_token(
        &self,
        endpoints: &AuthorizationEndpoints,
        client_id: &str,
        refresh_token: &str,
    ) -> AuthResult<TokenGrant> {
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(AuthError::EmptyRefreshToken);
        }

        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", GRANT_TYPE_REFRESH_TOKEN.to_string());
        form.insert("refresh_token", refresh_token.to_string());
        form.insert("client_id", client_id.trim().to_string());

        self.post_form(endpoints, GRANT_TYPE_REFRESH_TOKEN, &form).await
    }

    async fn post_form(
        &self,
        endpoints: &AuthorizationEndpoints,
        grant_type: &'static str,
        form: &HashMap<&str, String>,
    ) -> AuthResult<TokenGrant> {
        let started = Instant::now();
        let response = self
            .http
            .post(endpoints.token_endpoint.trim())
            .form(form)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(grant_type, "token endpoint request failed: {e}");
                AuthError::Network(format!("token endpoint request failed: {e}"))
            })?;

        let status = response.status();
        let result = parse_token_response(response).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(grant) => tracing::info!(
                grant_type,
                status = status.as_u16(),
                elapsed_ms,
                rotated_refresh_token = grant.refresh_token.is_some(),
                "token endpoint exchange succeeded"
            ),
            Err(err) => tracing::warn!(
                grant_type,
                status = status.as_u16(),
                elapsed_ms,
                code = err.code(),
                "token endpoint exchange failed: {err}"
            ),
        }
        result
    }
}

async fn parse_token_response(response: reqwest::Response) -> AuthResult<TokenGrant> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AuthError::Network(format!("token response read failed: {e}")))?;

    if !status.is_success() {
        let (error_code, error_message) = parse_oauth_error_details(&body);
        if let Some(code) = error_code.as_deref() {
            tracing::debug!(
                status = status.as_u16(),
                error_code = code,
                error_message = error_message.as_deref().unwrap_or_default(),
                "token endpoint returned oauth error"
            );
        }
        return Err(AuthError::TokenExchange {
            status: status.as_u16(),
            body: sanitize_oauth_error_body_snippet(&body),
        });
    }

    let value: Value = serde_json::from_str(&body).map_err(|e| AuthError::TokenExchange {
        status: status.as_u16(),
        body: format!("token response json invalid: {e}"),
    })?;

    let access_token = non_empty_str(&value, "access_token").ok_or_else(|| {
        AuthError::TokenExchange {
            status: status.as_u16(),
            body: "token response missing access_token".to_string(),
        }
    })?;

    let expires_in = value.get("expires_in").and_then(parse_i64_lossy);
    let now = now_unix_seconds();
    let expires_at = expires_in.and_then(|v| {
        if v <= 0 {
            None
        } else {
            Some(now.saturating_add(v))
        }
    });

    Ok(TokenGrant {
        access_token,
        refresh_token: non_empty_str(&value, "refresh_token"),
        expires_at,
        token_type: non_empty_str(&value, "token_type"),
        scope: non_empty_str(&value, "scope"),
    })
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token") || key_lc.contains("secret") || key_lc == "code_verifier"
}

fn redact_sensitive_json_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_json_fields(nested);
            }
        }
        Value::Array(items) => {
            for nested in items {
                redact_sensitive_json_fields(nested);
            }
        }
        _ => {}
    }
}

fn sanitize_oauth_error_body_snippet(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_json_fields(&mut value);
        if let Ok(encoded) = serde_json::to_string(&value) {
            return encoded.chars().take(ERROR_BODY_SNIPPET_CHARS).collect();
        }
    }
    body.chars().take(ERROR_BODY_SNIPPET_CHARS).collect()
}

/// Standard OAuth error fields (`error`, `error_description`); Spotify's Web API
/// style `{"error": {"status", "message"}}` is accepted as well.
fn parse_oauth_error_details(body: &str) -> (Option<String>, Option<String>) {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return (None, None),
    };

    let mut message = non_empty_str(&value, "error_description");
    let code = match value.get("error") {
        Some(Value::String(code)) => Some(code.trim().to_string()),
        Some(Value::Object(err_obj)) => {
            if message.is_none() {
                message = err_obj
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            err_obj.get("status").map(|s| s.to_string())
        }
        _ => None,
    };

    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_i64_lossy_supports_number_and_string() {
        assert_eq!(parse_i64_lossy(&Value::from(3600)), Some(3600));
        assert_eq!(parse_i64_lossy(&Value::from("3600")), Some(3600));
        assert_eq!(parse_i64_lossy(&Value::from("x")), None);
    }

    #[test]
    fn grant_without_refresh_token_keeps_previous_one() {
        let grant = TokenGrant {
            access_token: "new-access".to_string(),
            refresh_token: None,
            expires_at: Some(10),
            token_type: Some("Bearer".to_string()),
            scope: None,
        };
        let data = grant.into_token_data("old-refresh");
        assert_eq!(data.access_token, "new-access");
        assert_eq!(data.refresh_token, "old-refresh");
    }

    #[test]
    fn grant_with_rotated_refresh_token_replaces_previous_one() {
        let grant = TokenGrant {
            access_token: "new-access".to_string(),
            refresh_token: Some("new-refresh".to_string()),
            expires_at: None,
            token_type: None,
            scope: None,
        };
        assert_eq!(grant.into_token_data("old-refresh").refresh_token, "new-refresh");
    }

    #[test]
    fn access_token_validity_respects_margin() {
        let data = TokenData {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Some(2000),
        };
        assert!(data.is_access_token_valid(1000, 60));
        assert!(!data.is_access_token_valid(1950, 60));
        assert!(!data.is_access_token_valid(2000, 0));
        assert!(data.is_access_token_valid(1999, 0));
    }

    #[test]
    fn token_without_lifetime_is_valid_until_invalidated() {
        let data = TokenData {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: None,
        };
        assert!(data.is_access_token_valid(i64::MAX, 60));

        let blank = TokenData {
            access_token: " ".to_string(),
            ..data
        };
        assert!(!blank.is_access_token_valid(0, 0));
    }

    #[test]
    fn parse_oauth_error_details_supports_oauth_standard_fields() {
        let (code, message) = parse_oauth_error_details(
            r#"{"error": "invalid_grant", "error_description": "Refresh token revoked"}"#,
        );
        assert_eq!(code.as_deref(), Some("invalid_grant"));
        assert_eq!(message.as_deref(), Some("Refresh token revoked"));
    }

    #[test]
    fn parse_oauth_error_details_supports_web_api_error_object() {
        let (code, message) =
            parse_oauth_error_details(r#"{"error": {"status": 401, "message": "Invalid access token"}}"#);
        assert_eq!(code.as_deref(), Some("401"));
        assert_eq!(message.as_deref(), Some("Invalid access token"));
    }

    #[test]
    fn sanitize_oauth_error_body_snippet_masks_token_fields() {
        let raw = r#"{
          "error": "invalid_request",
          "refresh_token": "AQBx1234567890secret",
          "nested": {"access_token": "BQDaccesstokenvalue"}
        }"#;
        let snippet = sanitize_oauth_error_body_snippet(raw);
        assert!(snippet.contains("invalid_request"));
        assert!(snippet.contains(mask_token("AQBx1234567890secret").as_str()));
        assert!(!snippet.contains("AQBx1234567890secret"));
        assert!(!snippet.contains("BQDaccesstokenvalue"));
    }

    #[test]
    fn sanitize_truncates_non_json_bodies() {
        let raw = "x".repeat(2000);
        assert_eq!(sanitize_oauth_error_body_snippet(&raw).len(), ERROR_BODY_SNIPPET_CHARS);
    }

    #[tokio::test]
    async fn blank_refresh_token_is_rejected_without_network() {
        let client = TokenExchangeClient::with_http_client(reqwest::Client::new());
        let endpoints = AuthorizationEndpoints::new("http://127.0.0.1:9/authorize", "http://127.0.0.1:9/token");
        let err = client
            .exchange_refresh_token(&endpoints, "client", "   ")
            .await
            .expect_err("blank token");
        assert_eq!(err, AuthError::EmptyRefreshToken);
    }
}

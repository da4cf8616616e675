//! Usage: Authorization error taxonomy (maps every failure to a stable `CODE: message` string).

pub type AuthResult<T> = Result<T, AuthError>;

/// Every failure the authorization core and its glue can surface.
///
/// Variants carry only what their caller needs. The type is `Clone` so one
/// in-flight exchange result can be handed to all callers waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("redirect listener could not bind 127.0.0.1:{port}: {reason}")]
    ListenerBind { port: u16, reason: String },

    #[error("no authorization redirect received within {timeout_secs}s")]
    AuthorizationTimeout { timeout_secs: u64 },

    #[error("authorization redirect state does not match the request")]
    StateMismatch,

    #[error("provider denied authorization: {error_code}: {description}")]
    ProviderDenied {
        error_code: String,
        description: String,
    },

    #[error("token endpoint returned status={status} body={body}")]
    TokenExchange { status: u16, body: String },

    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("refresh token must not be empty")]
    EmptyRefreshToken,

    #[error("network request failed: {0}")]
    Network(String),

    #[error("an authorization attempt is already in progress")]
    AuthorizationAlreadyInProgress,

    #[error("invalid redirect: {0}")]
    InvalidRedirect(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("token storage failed: {0}")]
    Storage(String),

    #[error("failed to open browser: {0}")]
    Browser(String),

    #[error("{0}")]
    Internal(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ListenerBind { .. } => "LISTENER_BIND",
            Self::AuthorizationTimeout { .. } => "AUTH_TIMEOUT",
            Self::StateMismatch => "STATE_MISMATCH",
            Self::ProviderDenied { .. } => "PROVIDER_DENIED",
            Self::TokenExchange { .. } => "TOKEN_EXCHANGE",
            Self::MissingRefreshToken => "MISSING_REFRESH_TOKEN",
            Self::EmptyRefreshToken => "EMPTY_REFRESH_TOKEN",
            Self::Network(_) => "NETWORK_ERROR",
            Self::AuthorizationAlreadyInProgress => "AUTH_IN_PROGRESS",
            Self::InvalidRedirect(_) => "INVALID_REDIRECT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Browser(_) => "BROWSER_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the stored refresh token can no longer produce access tokens
    /// and the user has to go through the browser login again.
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            Self::MissingRefreshToken | Self::EmptyRefreshToken => true,
            Self::TokenExchange { status, body } => {
                (400..500).contains(status) && body.contains("invalid_grant")
            }
            _ => false,
        }
    }
}

impl From<AuthError> for String {
    fn from(value: AuthError) -> Self {
        format!("{}: {}", value.code(), value)
    }
}

impl From<std::io::Error> for AuthError {
    fn from(value: std::io::Error) -> Self {
        AuthError::Storage(value.to_string())
    }
}

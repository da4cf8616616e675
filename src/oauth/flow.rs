//! Usage: Authorization Code + PKCE flow for one attempt (URL build, browser, redirect, code exchange).
//!
//! Stages: `Idle -> RequestBuilt -> ListenerArmed -> AwaitingRedirect -> CodeReceived
//! -> ExchangingToken -> Authorized`; any stage can end in `Failed`.

use crate::oauth::browser::UrlOpener;
use crate::oauth::callback_server::{self, RedirectOutcome, DEFAULT_REDIRECT_TIMEOUT};
use crate::oauth::pkce::{self, CODE_CHALLENGE_METHOD};
use crate::oauth::providers::{AuthorizationEndpoints, ClientSettings};
use crate::oauth::token_exchange::{TokenData, TokenExchangeClient};
use crate::shared::error::{AuthError, AuthResult};
use crate::shared::security::{constant_time_eq, mask_token, random_urlsafe};
use reqwest::Url;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_ENTROPY_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Idle,
    RequestBuilt,
    ListenerArmed,
    AwaitingRedirect,
    CodeReceived,
    ExchangingToken,
    Authorized,
    Failed,
}

/// Per-attempt secrets. Lives only in memory until the attempt resolves.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
}

impl PendingRequest {
    pub fn generate() -> Self {
        let pair = pkce::generate_pkce_pair();
        Self {
            state: random_urlsafe(STATE_ENTROPY_BYTES),
            code_verifier: pair.code_verifier,
            code_challenge: pair.code_challenge,
        }
    }

    /// Anti-CSRF check: the redirect must echo the state this request generated.
    pub fn verify_state(&self, returned: Option<&str>) -> AuthResult<()> {
        let returned = returned.ok_or(AuthError::StateMismatch)?;
        if !constant_time_eq(returned.as_bytes(), self.state.as_bytes()) {
            return Err(AuthError::StateMismatch);
        }
        Ok(())
    }
}

pub fn build_authorize_url(
    endpoints: &AuthorizationEndpoints,
    settings: &ClientSettings,
    request: &PendingRequest,
) -> AuthResult<String> {
    let mut url = Url::parse(endpoints.authorization_endpoint.trim())
        .map_err(|e| AuthError::Config(format!("invalid authorization endpoint: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", settings.client_id());
        query.append_pair("redirect_uri", settings.redirect_uri());
        query.append_pair("scope", settings.scope());
        query.append_pair("code_challenge", &request.code_challenge);
        query.append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
        query.append_pair("state", &request.state);
    }
    Ok(url.to_string())
}

/// Drives one authorization attempt at a time.
///
/// A second `authorize()` while one is running is rejected with
/// [`AuthError::AuthorizationAlreadyInProgress`]; it would only fail to bind the
/// same fixed port anyway.
pub struct AuthorizationFlow {
    settings: ClientSettings,
    endpoints: AuthorizationEndpoints,
    exchange: TokenExchangeClient,
    opener: Arc<dyn UrlOpener>,
    redirect_timeout: Duration,
    active: AtomicBool,
}

impl AuthorizationFlow {
    pub fn new(
        settings: ClientSettings,
        endpoints: AuthorizationEndpoints,
        exchange: TokenExchangeClient,
        opener: Arc<dyn UrlOpener>,
    ) -> Self {
        Self {
            settings,
            endpoints,
            exchange,
            opener,
            redirect_timeout: DEFAULT_REDIRECT_TIMEOUT,
            active: AtomicBool::new(false),
        }
    }

    pub fn with_redirect_timeout(mut self, timeout: Duration) -> Self {
        self.redirect_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub async fn authorize(&self) -> AuthResult<TokenData> {
        let _attempt = ActiveAttempt::acquire(&self.active)?;
        let mut stage = FlowStage::Idle;

        let result = self.run(&mut stage).await;
        match &result {
            Ok(_) => tracing::info!(client_id = self.settings.client_id(), "authorization completed"),
            Err(err) => tracing::warn!(
                stage = ?stage,
                code = err.code(),
                "authorization failed: {err}"
            ),
        }
        result
    }

    async fn run(&self, stage: &mut FlowStage) -> AuthResult<TokenData> {
        self.settings.validate()?;

        let request = PendingRequest::generate();
        let auth_url = build_authorize_url(&self.endpoints, &self.settings, &request)?;
        advance(stage, FlowStage::RequestBuilt);

        // Bind before the browser starts so the redirect can never beat the listener.
        let listener = callback_server::bind_redirect_listener(
            self.settings.redirect_port(),
            &self.settings.callback_path()?,
        )
        .await?;
        advance(stage, FlowStage::ListenerArmed);

        self.opener.open(&auth_url)?;
        advance(stage, FlowStage::AwaitingRedirect);

        let outcome = listener.wait_for_redirect(self.redirect_timeout).await?;
        let code = match outcome {
            RedirectOutcome::Code { code, state } => {
                request.verify_state(state.as_deref())?;
                code
            }
            RedirectOutcome::Error {
                error_code,
                description,
                state,
            } => {
                // A denial only counts when it carries this attempt's state.
                request.verify_state(state.as_deref())?;
                return Err(AuthError::ProviderDenied {
                    error_code,
                    description,
                })
            }
        };
        advance(stage, FlowStage::CodeReceived);
        tracing::debug!(code = %mask_token(&code), "authorization code received");

        advance(stage, FlowStage::ExchangingToken);
        let tokens = self
            .exchange
            .exchange_code(
                &self.endpoints,
                self.settings.client_id(),
                self.settings.redirect_uri(),
                &code,
                &request.code_verifier,
            )
            .await?;
        advance(stage, FlowStage::Authorized);
        Ok(tokens)
    }
}

fn advance(stage: &mut FlowStage, next: FlowStage) {
    tracing::debug!(from = ?*stage, to = ?next, "authorization stage");
    *stage = next;
}

struct ActiveAttempt<'a>(&'a AtomicBool);

impl<'a> ActiveAttempt<'a> {
    fn acquire(flag: &'a AtomicBool) -> AuthResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AuthError::AuthorizationAlreadyInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for ActiveAttempt<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

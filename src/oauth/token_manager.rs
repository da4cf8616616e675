//! Usage: Account token lifecycle (authorize once, serve fresh access tokens, single-flight refresh).

use crate::oauth::browser::UrlOpener;
use crate::oauth::callback_server::DEFAULT_REDIRECT_TIMEOUT;
use crate::oauth::flow::AuthorizationFlow;
use crate::oauth::providers::{
    AuthorizationEndpoints, ClientSettings, DEFAULT_CALLBACK_PATH, DEFAULT_REDIRECT_PORT,
};
use crate::oauth::token_exchange::{TokenData, TokenExchangeClient};
use crate::shared::error::{AuthError, AuthResult};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::time::now_unix_seconds;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

pub const DEFAULT_EXPIRY_MARGIN_SECS: i64 = 60;

type SharedTokenFuture = Shared<BoxFuture<'static, AuthResult<TokenData>>>;

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub redirect_port: u16,
    pub callback_path: String,
    pub redirect_timeout: Duration,
    /// Access tokens count as expired this many seconds before `expires_at`.
    pub expiry_margin_secs: i64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            redirect_port: DEFAULT_REDIRECT_PORT,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            redirect_timeout: DEFAULT_REDIRECT_TIMEOUT,
            expiry_margin_secs: DEFAULT_EXPIRY_MARGIN_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountTokenState {
    pub config: ClientSettings,
    pub current: Option<TokenData>,
    pub seed_refresh_token: Option<String>,
}

impl AccountTokenState {
    fn new(config: ClientSettings) -> Self {
        Self {
            config,
            current: None,
            seed_refresh_token: None,
        }
    }

    /// Current pair's refresh token first, the persisted seed second.
    fn refresh_token(&self) -> Option<String> {
        self.current
            .as_ref()
            .map(|c| c.refresh_token.trim())
            .filter(|v| !v.is_empty())
            .or_else(|| {
                self.seed_refresh_token
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
            })
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Authorize,
    Refresh,
}

struct PendingOperation {
    id: u64,
    kind: OperationKind,
    generation: u64,
    future: SharedTokenFuture,
}

#[derive(Default)]
struct ManagerState {
    account: Option<AccountTokenState>,
    pending: Option<PendingOperation>,
    /// Bumped by `flush`/`reauthorize`; exchanges started under an older
    /// generation may finish but never write their result back.
    generation: u64,
    next_operation_id: u64,
}

impl ManagerState {
    /// Handle to the in-flight operation, its kind, and whether it was started
    /// before the last flush.
    fn joinable(&self) -> Option<(SharedTokenFuture, OperationKind, bool)> {
        self.pending.as_ref().map(|pending| {
            (
                pending.future.clone(),
                pending.kind,
                pending.generation != self.generation,
            )
        })
    }
}

/// Owns the token state of the single account in this process.
///
/// At most one authorization or refresh exchange is in flight at a time; late
/// callers attach to the pending handle instead of starting their own.
pub struct TokenLifecycleManager {
    endpoints: AuthorizationEndpoints,
    exchange: TokenExchangeClient,
    opener: Arc<dyn UrlOpener>,
    options: ManagerOptions,
    state: Arc<Mutex<ManagerState>>,
}

static INSTALLED: OnceLock<Arc<TokenLifecycleManager>> = OnceLock::new();

impl TokenLifecycleManager {
    pub fn new(
        endpoints: AuthorizationEndpoints,
        exchange: TokenExchangeClient,
        opener: Arc<dyn UrlOpener>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            endpoints,
            exchange,
            opener,
            options,
            state: Arc::new(Mutex::new(ManagerState::default())),
        }
    }

    /// Makes `manager` the process instance. Only the first install wins; later
    /// calls get the existing instance back and their manager is dropped.
    pub fn install(manager: TokenLifecycleManager) -> Arc<TokenLifecycleManager> {
        let candidate = Arc::new(manager);
        match INSTALLED.set(Arc::clone(&candidate)) {
            Ok(()) => candidate,
            Err(_) => {
                tracing::warn!("token manager already installed; keeping existing instance");
                INSTALLED.get().cloned().unwrap_or(candidate)
            }
        }
    }

    pub fn installed() -> Option<Arc<TokenLifecycleManager>> {
        INSTALLED.get().cloned()
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    fn client_settings(&self, client_id: &str, scope: &str) -> ClientSettings {
        ClientSettings::with_callback_path(
            client_id,
            scope,
            self.options.redirect_port,
            &self.options.callback_path,
        )
    }

    /// Runs the browser flow once per process. When a token pair is already
    /// held it is returned as-is; use [`Self::reauthorize`] to force a login.
    pub async fn authorize(&self, client_id: &str, scope: &str) -> AuthResult<TokenData> {
        loop {
            let (future, kind, stale) = {
                let mut state = self.state.lock_or_recover();
                if state.account.is_none() {
                    state.account = Some(AccountTokenState::new(
                        self.client_settings(client_id, scope),
                    ));
                }
                if let Some(current) = state.account.as_ref().and_then(|a| a.current.clone()) {
                    tracing::debug!("authorize skipped; account already holds tokens");
                    return Ok(current);
                }
                match state.joinable() {
                    Some(joined) => joined,
                    None => (
                        self.start_authorization(&mut state)?,
                        OperationKind::Authorize,
                        false,
                    ),
                }
            };

            let result = future.await;
            if kind == OperationKind::Authorize && !stale {
                return result;
            }
        }
    }

    /// Discards the held token pair and runs the browser flow again.
    pub async fn reauthorize(&self, client_id: &str, scope: &str) -> AuthResult<TokenData> {
        let future = loop {
            let waiting = {
                let mut state = self.state.lock_or_recover();
                match state.joinable() {
                    Some((future, _, _)) => future,
                    None => {
                        state.generation = state.generation.wrapping_add(1);
                        state.account = Some(AccountTokenState::new(
                            self.client_settings(client_id, scope),
                        ));
                        break self.start_authorization(&mut state)?;
                    }
                }
            };
            // The pending attempt may own the redirect port; let it finish first.
            let _ = waiting.await;
        };
        future.await
    }

    /// Seeds the account with a persisted refresh token. No network call; no-op
    /// when the account already exists.
    pub fn initialize_with_refresh_token(&self, client_id: &str, scope: &str, refresh_token: &str) {
        let mut state = self.state.lock_or_recover();
        if state.account.is_some() {
            tracing::debug!("initialize_with_refresh_token ignored; account already initialized");
            return;
        }
        let mut account = AccountTokenState::new(self.client_settings(client_id, scope));
        account.seed_refresh_token = Some(refresh_token.trim().to_string()).filter(|v| !v.is_empty());
        state.account = Some(account);
        tracing::info!("token manager seeded from persisted refresh token");
    }

    /// Returns an unexpired access token, refreshing through the token endpoint
    /// when needed. Concurrent callers share one exchange.
    pub async fn get_valid_access_token(&self) -> AuthResult<String> {
        loop {
            let (future, stale) = {
                let mut state = self.state.lock_or_recover();
                let now = now_unix_seconds();
                if let Some(current) = state.account.as_ref().and_then(|a| a.current.as_ref()) {
                    if current.is_access_token_valid(now, self.options.expiry_margin_secs) {
                        return Ok(current.access_token.clone());
                    }
                }

                if let Some((future, _, stale)) = state.joinable() {
                    (future, stale)
                } else {
                    let account = state.account.as_ref().ok_or(AuthError::MissingRefreshToken)?;
                    let refresh_token = account
                        .refresh_token()
                        .ok_or(AuthError::MissingRefreshToken)?;
                    let client_id = account.config.client_id().to_string();
                    (self.start_refresh(&mut state, client_id, refresh_token), false)
                }
            };

            let result = future.await;
            if !stale {
                return result.map(|tokens| tokens.access_token);
            }
        }
    }

    pub fn get_token_data(&self) -> Option<TokenData> {
        self.state
            .lock_or_recover()
            .account
            .as_ref()
            .and_then(|a| a.current.clone())
    }

    /// Marks the current access token expired (e.g. the API answered 401) so the
    /// next [`Self::get_valid_access_token`] refreshes. The refresh token is kept.
    pub fn invalidate_access_token(&self) {
        let mut state = self.state.lock_or_recover();
        if let Some(current) = state.account.as_mut().and_then(|a| a.current.as_mut()) {
            current.expires_at = Some(0);
            tracing::debug!("access token invalidated");
        }
    }

    /// Logout: forgets the token pair and the seed refresh token.
    pub fn flush(&self) {
        let mut state = self.state.lock_or_recover();
        state.generation = state.generation.wrapping_add(1);
        state.account = None;
        tracing::info!("token state flushed");
    }

    fn start_authorization(&self, state: &mut ManagerState) -> AuthResult<SharedTokenFuture> {
        let config = state
            .account
            .as_ref()
            .map(|a| a.config.clone())
            .ok_or_else(|| AuthError::Internal("account state missing".to_string()))?;
        let flow = AuthorizationFlow::new(
            config,
            self.endpoints.clone(),
            self.exchange.clone(),
            Arc::clone(&self.opener),
        )
        .with_redirect_timeout(self.options.redirect_timeout);

        Ok(self.start_operation(state, OperationKind::Authorize, async move {
            flow.authorize().await
        }))
    }

    fn start_refresh(
        &self,
        state: &mut ManagerState,
        client_id: String,
        refresh_token: String,
    ) -> SharedTokenFuture {
        let exchange = self.exchange.clone();
        let endpoints = self.endpoints.clone();
        self.start_operation(state, OperationKind::Refresh, async move {
            exchange
                .exchange_refresh_token(&endpoints, &client_id, &refresh_token)
                .await
                .map(|grant| grant.into_token_data(&refresh_token))
        })
    }

    /// Spawns `work` and parks its shared handle in the pending slot. The task
    /// runs to completion even if every waiter goes away, and commits its
    /// result only if no flush happened meanwhile.
    fn start_operation<F>(
        &self,
        state: &mut ManagerState,
        kind: OperationKind,
        work: F,
    ) -> SharedTokenFuture
    where
        F: Future<Output = AuthResult<TokenData>> + Send + 'static,
    {
        state.next_operation_id = state.next_operation_id.wrapping_add(1);
        let id = state.next_operation_id;
        let generation = state.generation;
        let shared_state = Arc::clone(&self.state);

        tracing::debug!(operation = ?kind, id, "token operation started");
        let task = tokio::spawn(async move {
            let result = work.await;
            let mut state = shared_state.lock_or_recover();
            if state.pending.as_ref().is_some_and(|p| p.id == id) {
                state.pending = None;
            }
            if state.generation != generation {
                tracing::info!(operation = ?kind, id, "token state flushed during exchange; result discarded");
            } else if let Ok(tokens) = &result {
                if let Some(account) = state.account.as_mut() {
                    account.current = Some(tokens.clone());
                }
            }
            result
        });

        let future = async move {
            task.await.unwrap_or_else(|e| {
                Err(AuthError::Internal(format!("token operation task failed: {e}")))
            })
        }
        .boxed()
        .shared();

        state.pending = Some(PendingOperation {
            id,
            kind,
            generation,
            future: future.clone(),
        });
        future
    }
}

//! Usage: UI-facing bridge over the token manager (persists the refresh token around it).

use crate::infra::token_store::RefreshTokenStore;
use crate::oauth::providers::ClientSettings;
use crate::oauth::token_exchange::TokenData;
use crate::oauth::token_manager::TokenLifecycleManager;
use crate::shared::error::AuthResult;
use crate::shared::mutex_ext::MutexExt;
use std::sync::{Arc, Mutex};

/// The only entry points the presentation layer uses. Failures are returned
/// unchanged; recovery (e.g. prompting a new login) is the caller's decision.
pub struct AuthSession {
    manager: Arc<TokenLifecycleManager>,
    store: Arc<dyn RefreshTokenStore>,
    client: ClientSettings,
    last_persisted: Mutex<Option<String>>,
}

impl AuthSession {
    pub fn new(
        manager: Arc<TokenLifecycleManager>,
        store: Arc<dyn RefreshTokenStore>,
        client: ClientSettings,
    ) -> Self {
        Self {
            manager,
            store,
            client,
            last_persisted: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &Arc<TokenLifecycleManager> {
        &self.manager
    }

    /// Seeds the manager from the persisted refresh token. Returns whether one was found.
    pub fn initialize(&self) -> AuthResult<bool> {
        let Some(refresh_token) = self.store.load()? else {
            tracing::debug!("no persisted refresh token");
            return Ok(false);
        };
        self.initialize_with_refresh_token(&refresh_token);
        *self.last_persisted.lock_or_recover() = Some(refresh_token);
        Ok(true)
    }

    pub fn initialize_with_refresh_token(&self, refresh_token: &str) {
        self.manager.initialize_with_refresh_token(
            self.client.client_id(),
            self.client.scope(),
            refresh_token,
        );
    }

    pub async fn execute_authorization(&self) -> AuthResult<TokenData> {
        let tokens = self
            .manager
            .authorize(self.client.client_id(), self.client.scope())
            .await?;
        self.persist_current()?;
        Ok(tokens)
    }

    /// Forced re-login, bypassing the once-per-process authorize.
    pub async fn reauthorize(&self) -> AuthResult<TokenData> {
        let tokens = self
            .manager
            .reauthorize(self.client.client_id(), self.client.scope())
            .await?;
        self.persist_current()?;
        Ok(tokens)
    }

    /// Fresh access token; persists the refresh token again if the provider rotated it.
    pub async fn perform_with_fresh_tokens(&self) -> AuthResult<String> {
        let access_token = self.manager.get_valid_access_token().await?;
        self.persist_current()?;
        Ok(access_token)
    }

    pub fn get_token_data(&self) -> Option<TokenData> {
        self.manager.get_token_data()
    }

    pub fn has_refresh_token(&self) -> AuthResult<bool> {
        Ok(self.get_refresh_token()?.is_some())
    }

    pub fn get_refresh_token(&self) -> AuthResult<Option<String>> {
        self.store.load()
    }

    /// Logout.
    pub fn clear_token(&self) -> AuthResult<()> {
        let mut last = self.last_persisted.lock_or_recover();
        self.manager.flush();
        *last = None;
        self.store.clear()
    }

    /// Saves the refresh token the manager holds right now. A login or refresh
    /// that finished after `clear_token` finds nothing held and saves nothing.
    fn persist_current(&self) -> AuthResult<()> {
        let mut last = self.last_persisted.lock_or_recover();
        let Some(tokens) = self.manager.get_token_data() else {
            tracing::debug!("token state cleared before persisting; refresh token not saved");
            return Ok(());
        };
        if last.as_deref() == Some(tokens.refresh_token.as_str()) {
            return Ok(());
        }
        self.store.save(&tokens.refresh_token)?;
        *last = Some(tokens.refresh_token);
        tracing::info!("refresh token saved");
        Ok(())
    }
}

pub mod app;
pub mod infra;
pub mod oauth;
pub mod shared;

pub use app::session::AuthSession;
pub use oauth::browser::{SystemBrowser, UrlOpener};
pub use oauth::providers::{AuthorizationEndpoints, ClientSettings};
pub use oauth::token_exchange::{TokenData, TokenExchangeClient};
pub use oauth::token_manager::{ManagerOptions, TokenLifecycleManager};
pub use shared::error::{AuthError, AuthResult};

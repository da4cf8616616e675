//! Usage: OAuth 2.0 Authorization Code + PKCE core (listener, exchange, flow, token lifecycle).

pub mod browser;
pub mod callback_server;
pub mod flow;
pub mod pkce;
pub mod providers;
pub mod token_exchange;
pub mod token_manager;

//! Usage: Infrastructure layer (configuration file, refresh-token persistence).

pub mod settings;
pub mod token_store;

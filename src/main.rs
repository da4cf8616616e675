//! Usage: Command-line host: `spotify-auth <config.json> [login|token|status|logout]`.

mod args;

use args::{Cli, Commands};
use clap::Parser;
use spotify_auth_lib::app::logging;
use spotify_auth_lib::infra::settings;
use spotify_auth_lib::infra::token_store::JsonFileTokenStore;
use spotify_auth_lib::shared::security::mask_token;
use spotify_auth_lib::{AuthResult, AuthSession, SystemBrowser, TokenLifecycleManager};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

const TOKEN_FILE_NAME: &str = "tokens.json";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let data_dir = cli.data_dir();
    let log_dir = data_dir.join("logs");
    let _log_guard = match logging::init(Some(log_dir.as_path())) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("{}", String::from(err));
            None
        }
    };

    match run(&cli.config, &data_dir, cli.subcommand()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if err.requires_reauthorization() {
                tracing::warn!("stored login is no longer usable; run `spotify-auth <config> login`");
            }
            eprintln!("{}", String::from(err));
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &Path, data_dir: &Path, command: Commands) -> AuthResult<()> {
    let settings = settings::read(config_path)?;
    let client = settings.client_settings()?;
    let manager = TokenLifecycleManager::install(TokenLifecycleManager::new(
        settings.endpoints(),
        settings.exchange_client()?,
        Arc::new(SystemBrowser),
        settings.manager_options(),
    ));
    let store = Arc::new(JsonFileTokenStore::new(data_dir.join(TOKEN_FILE_NAME)));
    let session = AuthSession::new(manager, store, client);
    let seeded = session.initialize()?;
    tracing::debug!(?command, seeded, "command starting");

    match command {
        Commands::Login => {
            let tokens = if seeded {
                session.reauthorize().await?
            } else {
                session.execute_authorization().await?
            };
            println!("logged in (access token {})", mask_token(&tokens.access_token));
        }
        Commands::Token => {
            let access_token = if seeded {
                session.perform_with_fresh_tokens().await?
            } else {
                session.execute_authorization().await?.access_token
            };
            println!("{access_token}");
        }
        Commands::Status => match session.get_refresh_token()? {
            Some(refresh_token) => println!("logged in (refresh token {})", mask_token(&refresh_token)),
            None => println!("not logged in"),
        },
        Commands::Logout => {
            session.clear_token()?;
            println!("logged out");
        }
    }
    Ok(())
}

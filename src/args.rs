//! Usage: CLI argument definitions (clap derive).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

const DATA_DIR_ENV: &str = "SPOTIFY_AUTH_DATA_DIR";
const DEFAULT_DATA_DIR_NAME: &str = ".spotify-auth";

#[derive(Debug, Parser)]
#[command(name = "spotify-auth")]
#[command(about = "Spotify login (Authorization Code + PKCE) and access-token helper")]
#[command(version)]
pub struct Cli {
    /// Path to the OAuth configuration file (oauthconfig.json)
    pub config: PathBuf,

    /// Directory holding tokens.json and logs/ (defaults to ~/.spotify-auth)
    #[arg(long, env = DATA_DIR_ENV)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Run the browser login, replacing any stored login
    Login,
    /// Print a fresh access token, logging in first if needed (default)
    Token,
    /// Show whether a refresh token is stored
    Status,
    /// Forget the stored login
    Logout,
}

impl Cli {
    pub fn subcommand(&self) -> Commands {
        self.command.unwrap_or(Commands::Token)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty())
            .or_else(|| dirs::home_dir().map(|home| home.join(DEFAULT_DATA_DIR_NAME)))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR_NAME))
    }
}

//! Usage: Hand the authorization URL to the host's default browser.

use crate::shared::error::{AuthError, AuthResult};
use std::io;
use std::process::{Command, ExitStatus};
use std::thread::JoinHandle;

/// Host capability that opens a URL for the user. The flow gets no callback
/// from it; completion is observed only through the loopback redirect.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> AuthResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &str) -> AuthResult<()> {
        spawn_reaped(browser_command(url)).map(|_| ())
    }
}

/// Spawns the launcher and waits on it off-thread so it does not linger as a zombie.
fn spawn_reaped(mut cmd: Command) -> AuthResult<Option<JoinHandle<io::Result<ExitStatus>>>> {
    let mut child = cmd.spawn().map_err(|e| AuthError::Browser(e.to_string()))?;
    let waiter = std::thread::Builder::new()
        .name("browser-launcher-wait".to_string())
        .spawn(move || child.wait());
    match waiter {
        Ok(handle) => Ok(Some(handle)),
        Err(err) => {
            tracing::warn!(error = %err, "failed to start browser launcher wait thread");
            Ok(None)
        }
    }
}

#[cfg(target_os = "windows")]
fn browser_command(url: &str) -> Command {
    let mut cmd = Command::new("rundll32.exe");
    // `explorer <url>` may open File Explorer for some URL shapes; the protocol handler does not.
    cmd.arg("url.dll,FileProtocolHandler").arg(url);
    cmd
}

#[cfg(target_os = "macos")]
fn browser_command(url: &str) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    cmd
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn browser_command(url: &str) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    cmd
}

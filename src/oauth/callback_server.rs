//! Usage: One-shot loopback listener that captures the OAuth authorization redirect.

use crate::shared::error::{AuthError, AuthResult};
use reqwest::Url;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const SUCCESS_HTML: &str =
    "<html><body><h1>Authentication successful</h1><p>You may close this window.</p></body></html>";
const ERROR_HTML: &str = "<html><body><h1>Authentication failed</h1><p>You may close this window and retry.</p></body></html>";
const NOT_FOUND_HTML: &str = "<html><body><h1>Not found</h1></body></html>";
const MAX_REQUEST_HEAD_BYTES: usize = 8192;
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_REDIRECT_TIMEOUT: Duration = Duration::from_secs(300);

/// What the provider sent back through the browser redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    Code {
        code: String,
        state: Option<String>,
    },
    Error {
        error_code: String,
        description: String,
        state: Option<String>,
    },
}

impl RedirectOutcome {
    pub fn state(&self) -> Option<&str> {
        match self {
            Self::Code { state, .. } | Self::Error { state, .. } => state.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct OAuthCallbackPayload {
    pub(crate) code: Option<String>,
    pub(crate) state: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) error_description: Option<String>,
}

impl OAuthCallbackPayload {
    fn into_outcome(self) -> AuthResult<RedirectOutcome> {
        if let Some(error_code) = self.error {
            return Ok(RedirectOutcome::Error {
                error_code,
                description: self
                    .error_description
                    .unwrap_or_else(|| "authorization was not granted".to_string()),
                state: self.state,
            });
        }
        match self.code {
            Some(code) if !code.trim().is_empty() => Ok(RedirectOutcome::Code {
                code,
                state: self.state,
            }),
            _ => Err(AuthError::InvalidRedirect(
                "redirect carried neither code nor error".to_string(),
            )),
        }
    }
}

/// A bound loopback socket owned by exactly one authorization attempt.
///
/// The socket is released when the listener is dropped, which happens on every
/// exit path of [`RedirectListener::wait_for_redirect`].
#[derive(Debug)]
pub struct RedirectListener {
    listener: TcpListener,
    port: u16,
    callback_path: String,
}

impl RedirectListener {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    /// Resolves with the first request on the callback path, then closes the socket.
    ///
    /// Requests on other paths (favicon requests and the like) get a 404 and do not
    /// count as the redirect.
    pub async fn wait_for_redirect(self, timeout: Duration) -> AuthResult<RedirectOutcome> {
        let port = self.port;
        let result = tokio::time::timeout(timeout, self.accept_until_callback())
            .await
            .map_err(|_| AuthError::AuthorizationTimeout {
                timeout_secs: whole_seconds_rounded_up(timeout),
            })
            .and_then(|inner| inner);

        match &result {
            Ok(_) => tracing::debug!(port, "redirect listener resolved; socket released"),
            Err(err) => tracing::warn!(port, code = err.code(), "redirect listener failed: {err}"),
        }
        result
    }

    async fn accept_until_callback(&self) -> AuthResult<RedirectOutcome> {
        loop {
            let (mut socket, peer) = self.listener.accept().await.map_err(|e| {
                AuthError::Internal(format!("redirect listener accept failed: {e}"))
            })?;

            let head = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_head(&mut socket))
                .await
                .unwrap_or_else(|_| {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "request head not received",
                    ))
                }) {
                Ok(head) => head,
                Err(err) => {
                    tracing::debug!(%peer, "ignoring unreadable redirect connection: {err}");
                    continue;
                }
            };

            let target = match extract_request_target(&head) {
                Ok(target) => target,
                Err(err) => {
                    tracing::debug!(%peer, "ignoring malformed redirect request: {err}");
                    write_response(&mut socket, "400 Bad Request", ERROR_HTML).await;
                    continue;
                }
            };

            let (path, payload) = match parse_callback_target(target) {
                Ok(parsed) => parsed,
                Err(err) => {
                    write_response(&mut socket, "400 Bad Request", ERROR_HTML).await;
                    return Err(err);
                }
            };
            if path != self.callback_path {
                tracing::debug!(%peer, path = %path, "request outside callback path");
                write_response(&mut socket, "404 Not Found", NOT_FOUND_HTML).await;
                continue;
            }

            let outcome = payload.into_outcome();
            match &outcome {
                Ok(RedirectOutcome::Code { .. }) => {
                    write_response(&mut socket, "200 OK", SUCCESS_HTML).await
                }
                _ => write_response(&mut socket, "400 Bad Request", ERROR_HTML).await,
            }
            return outcome;
        }
    }
}

/// Binds `127.0.0.1:<port>` for the callback. Must be called before the browser is opened.
///
/// A busy port is fatal: the port is part of the redirect URI registered with
/// the provider, so falling back to another port would break the redirect.
pub async fn bind_redirect_listener(port: u16, callback_path: &str) -> AuthResult<RedirectListener> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| AuthError::ListenerBind {
            port,
            reason: e.to_string(),
        })?;
    let bound_port = listener
        .local_addr()
        .map_err(|e| AuthError::ListenerBind {
            port,
            reason: format!("local_addr failed: {e}"),
        })?
        .port();

    tracing::debug!(port = bound_port, path = callback_path, "redirect listener bound");
    Ok(RedirectListener {
        listener,
        port: bound_port,
        callback_path: normalize_path(callback_path),
    })
}

/// Bind, wait for exactly one redirect, release the socket.
pub async fn listen_once(
    port: u16,
    callback_path: &str,
    timeout: Duration,
) -> AuthResult<RedirectOutcome> {
    bind_redirect_listener(port, callback_path)
        .await?
        .wait_for_redirect(timeout)
        .await
}

fn whole_seconds_rounded_up(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

async fn read_request_head(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let size = socket.read(&mut chunk).await?;
        if size == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..size]);
        if buffer.windows(2).any(|w| w == b"\r\n") || buffer.len() >= MAX_REQUEST_HEAD_BYTES {
            break;
        }
    }
    if buffer.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "empty request",
        ));
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn extract_request_target(request: &str) -> AuthResult<&str> {
    let first = request
        .lines()
        .next()
        .ok_or_else(|| AuthError::InvalidRedirect("malformed request".to_string()))?;
    let mut parts = first.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    if method != "GET" || target.is_empty() {
        return Err(AuthError::InvalidRedirect(
            "redirect request must be GET".to_string(),
        ));
    }
    Ok(target)
}

pub(crate) fn parse_callback_target(target: &str) -> AuthResult<(String, OAuthCallbackPayload)> {
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| AuthError::InvalidRedirect(format!("invalid redirect target: {e}")))?;

    let mut payload = OAuthCallbackPayload::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => payload.code = Some(value.to_string()),
            "state" => payload.state = Some(value.to_string()),
            "error" => payload.error = Some(value.to_string()),
            "error_description" => payload.error_description = Some(value.to_string()),
            _ => {}
        }
    }

    Ok((url.path().to_string(), payload))
}

async fn write_response(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Url;
use serde_json::Value;
use spotify_auth_lib::{
    AuthResult, AuthorizationEndpoints, ManagerOptions, TokenExchangeClient,
    TokenLifecycleManager, UrlOpener,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "test-client";
pub const SCOPE: &str = "user-read-private streaming";
pub const TOKEN_PATH: &str = "/api/token";

/// A port that was free a moment ago. Racy by nature but fine for loopback tests.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind(("127.0.0.1", 0))
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("reserve free port")
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("build http client")
}

pub fn exchange_client() -> TokenExchangeClient {
    TokenExchangeClient::with_http_client(http_client())
}

pub fn endpoints(server: &MockServer) -> AuthorizationEndpoints {
    AuthorizationEndpoints::new(
        format!("{}/authorize", server.uri()),
        format!("{}{TOKEN_PATH}", server.uri()),
    )
}

pub fn options(port: u16, redirect_timeout: Duration) -> ManagerOptions {
    ManagerOptions {
        redirect_port: port,
        redirect_timeout,
        ..ManagerOptions::default()
    }
}

pub fn manager(
    server: &MockServer,
    browser: Arc<FakeBrowser>,
    port: u16,
    redirect_timeout: Duration,
) -> TokenLifecycleManager {
    TokenLifecycleManager::new(
        endpoints(server),
        exchange_client(),
        browser,
        options(port, redirect_timeout),
    )
}

#[derive(Debug, Clone)]
pub enum BrowserBehavior {
    /// User approves; provider redirects with `code` and the original state.
    Approve { code: String },
    /// Redirect carries a state the client never generated.
    ForgeState { code: String },
    Deny { error: String, description: String },
    /// Error redirect carrying a state the client never generated.
    ForgeDenial { error: String },
    /// Browser never comes back.
    Ignore,
}

/// Stands in for the system browser: follows the authorization URL straight to
/// the loopback redirect the provider would issue.
pub struct FakeBrowser {
    behavior: BrowserBehavior,
    favicon_request: bool,
    opened: Mutex<Vec<String>>,
    redirects: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub fn new(behavior: BrowserBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            favicon_request: false,
            opened: Mutex::new(Vec::new()),
            redirects: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn approving(code: &str) -> Arc<Self> {
        Self::new(BrowserBehavior::Approve {
            code: code.to_string(),
        })
    }

    /// Requests `/favicon.ico` on the loopback port before the callback.
    pub fn approving_with_favicon_request(code: &str) -> Arc<Self> {
        Arc::new(Self {
            behavior: BrowserBehavior::Approve {
                code: code.to_string(),
            },
            favicon_request: true,
            opened: Mutex::new(Vec::new()),
            redirects: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opened.lock().expect("opened lock").clone()
    }

    pub fn redirect_count(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

pub fn query_param(url: &str, key: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

impl UrlOpener for FakeBrowser {
    fn open(&self, url: &str) -> AuthResult<()> {
        self.opened.lock().expect("opened lock").push(url.to_string());

        let redirect_uri = query_param(url, "redirect_uri").expect("redirect_uri in auth url");
        let state = query_param(url, "state").expect("state in auth url");
        let mut callback = Url::parse(&redirect_uri).expect("redirect uri");
        match &self.behavior {
            BrowserBehavior::Approve { code } => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", code)
                    .append_pair("state", &state);
            }
            BrowserBehavior::ForgeState { code } => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", code)
                    .append_pair("state", "forged-state");
            }
            BrowserBehavior::Deny { error, description } => {
                callback
                    .query_pairs_mut()
                    .append_pair("error", error)
                    .append_pair("error_description", description)
                    .append_pair("state", &state);
            }
            BrowserBehavior::ForgeDenial { error } => {
                callback
                    .query_pairs_mut()
                    .append_pair("error", error)
                    .append_pair("state", "forged-state");
            }
            BrowserBehavior::Ignore => return Ok(()),
        }

        let favicon = self.favicon_request.then(|| {
            let mut favicon = callback.clone();
            favicon.set_path("/favicon.ico");
            favicon.set_query(None);
            favicon
        });
        let redirects = Arc::clone(&self.redirects);
        tokio::spawn(async move {
            let client = http_client();
            if let Some(favicon) = favicon {
                let status = client.get(favicon).send().await.map(|r| r.status().as_u16());
                assert_eq!(status.ok(), Some(404));
            }
            if client.get(callback).send().await.is_ok() {
                redirects.fetch_add(1, Ordering::SeqCst);
            }
        });
        Ok(())
    }
}

pub fn token_json(access: &str, refresh: Option<&str>, expires_in: i64) -> Value {
    let mut body = serde_json::json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "scope": SCOPE,
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = Value::String(refresh.to_string());
    }
    body
}

pub fn code_grant_mock(response: ResponseTemplate) -> Mock {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(response)
}

pub fn refresh_grant_mock(response: ResponseTemplate) -> Mock {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(response)
}

/// Form fields of every token endpoint request received so far.
pub async fn token_requests(server: &MockServer) -> Vec<Vec<(String, String)>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == TOKEN_PATH)
        .map(|r| {
            let body = String::from_utf8_lossy(&r.body).to_string();
            reqwest::Url::parse(&format!("http://form/?{body}"))
                .map(|u| u.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect())
                .unwrap_or_default()
        })
        .collect()
}

pub fn form_value<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
    form.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

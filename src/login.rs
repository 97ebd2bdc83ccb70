//! Password-grant login, the unit of work of every load worker.

use std::fmt;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use tracing::trace;

use crate::accounts::Account;
use crate::error::Result;

pub const DEFAULT_CLIENT_ID: &str = "admin-cli";

/// Why a single login attempt did not yield a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LoginFailure {
    /// The token endpoint answered with a non-200 status.
    Http(u16),
    Timeout,
    /// The request never produced a response; carries the transport error kind.
    Transport(&'static str),
}

impl LoginFailure {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, LoginFailure::Http(401))
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            LoginFailure::Timeout
        } else if err.is_connect() {
            LoginFailure::Transport("ConnectError")
        } else if err.is_redirect() {
            LoginFailure::Transport("RedirectError")
        } else if err.is_body() || err.is_decode() {
            LoginFailure::Transport("BodyError")
        } else if err.is_builder() {
            LoginFailure::Transport("BuilderError")
        } else {
            LoginFailure::Transport("RequestError")
        }
    }
}

impl fmt::Display for LoginFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginFailure::Http(code) => write!(f, "HTTP {code}"),
            LoginFailure::Timeout => f.write_str("timeout"),
            LoginFailure::Transport(kind) => f.write_str(kind),
        }
    }
}

/// Outcome of exactly one login call.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginAttempt {
    pub success: bool,
    pub latency: Duration,
    pub error: Option<LoginFailure>,
}

impl LoginAttempt {
    pub fn succeeded(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
            error: None,
        }
    }

    pub fn failed(latency: Duration, failure: LoginFailure) -> Self {
        Self {
            success: false,
            latency,
            error: Some(failure),
        }
    }
}

/// Shared HTTP client for the load workers. One pool for the whole run,
/// sized so every worker can keep its connection warm.
pub fn build_client(max_idle_per_host: usize) -> Result<Client> {
    Ok(Client::builder()
        .pool_max_idle_per_host(max_idle_per_host)
        .tcp_nodelay(true)
        .build()?)
}

pub fn token_url(base_url: &str, realm: &str) -> String {
    format!(
        "{}/realms/{}/protocol/openid-connect/token",
        base_url.trim_end_matches('/'),
        realm
    )
}

/// The OpenID Connect token endpoint of one realm.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    client: Client,
    url: String,
    client_id: String,
    scope: Option<String>,
}

impl TokenEndpoint {
    pub fn new(client: Client, base_url: &str, realm: &str) -> Self {
        Self {
            client,
            url: token_url(base_url, realm),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            scope: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Performs one password-grant request. Never fails: every error mode
    /// is folded into the returned attempt, and latency covers the whole
    /// call including reading the body.
    pub async fn login(&self, account: &Account, timeout: Duration) -> LoginAttempt {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("username", account.username.as_str()),
            ("password", account.password.as_str()),
            ("grant_type", "password"),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let start = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .form(&form)
            .timeout(timeout)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let failure = LoginFailure::from_reqwest(&e);
                trace!("login for {} failed: {}", account.username, e);
                return LoginAttempt::failed(start.elapsed(), failure);
            }
        };

        let status = response.status();
        // Drain the body so the connection goes back to the pool.
        let body = response.bytes().await;
        let latency = start.elapsed();

        if let Err(e) = body {
            if status == StatusCode::OK {
                return LoginAttempt::failed(latency, LoginFailure::from_reqwest(&e));
            }
        }

        if status == StatusCode::OK {
            LoginAttempt::succeeded(latency)
        } else {
            LoginAttempt::failed(latency, LoginFailure::Http(status.as_u16()))
        }
    }
}

//! Thin client over the identity provider admin REST API.

mod model;
mod page;

use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sonic_rs::Value;
use tracing::debug;

use crate::accounts::Account;
use crate::error::{Error, Result};
use crate::login::{token_url, DEFAULT_CLIENT_ID};

pub use model::{
    ClientRepresentation, ClientSessionStat, EventRepresentation, NewUser, RealmRepresentation,
    RoleRepresentation, SessionStats, UserRepresentation, UserSessionRepresentation,
};
pub use page::Pager;

use model::{PasswordCredential, TokenResponse};

/// Realm the admin account authenticates against.
pub const ADMIN_REALM: &str = "master";
/// Page size for every paginated admin listing.
pub const PAGE_SIZE: usize = 500;

pub const READ_TIMEOUT: Duration = Duration::from_secs(15);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// An authenticated admin session. Cloning is cheap and shares the
/// connection pool.
#[derive(Clone)]
pub struct AdminClient {
    http: Client,
    base_url: String,
    token: String,
}

impl AdminClient {
    /// Obtains an admin token with a password grant on the master realm.
    pub async fn connect(
        http: Client,
        base_url: &str,
        credentials: &Account,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let token = fetch_admin_token(&http, &base_url, credentials, timeout).await?;
        debug!("admin token obtained for {}", credentials.username);
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    /// Replaces the token, for long operations that outlive its lifetime.
    pub async fn refresh(&mut self, credentials: &Account, timeout: Duration) -> Result<()> {
        self.token = fetch_admin_token(&self.http, &self.base_url, credentials, timeout).await?;
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ---- realms & users -------------------------------------------------

    pub async fn list_realms(&self) -> Result<Vec<RealmRepresentation>> {
        let url = format!("{}/admin/realms", self.base_url);
        self.get_json("realms", &url, &[], READ_TIMEOUT).await
    }

    pub async fn list_users_page(
        &self,
        realm: &str,
        first: usize,
        max: usize,
    ) -> Result<Vec<UserRepresentation>> {
        let url = self.realm_url(realm, "/users");
        let query = [("first", first.to_string()), ("max", max.to_string())];
        self.get_json("users", &url, &query, READ_TIMEOUT).await
    }

    /// Every user of the realm, fetched page by page.
    pub async fn list_users(&self, realm: &str) -> Result<Vec<UserRepresentation>> {
        let mut users = Vec::new();
        let mut pager = Pager::new(PAGE_SIZE);
        while let Some((first, max)) = pager.window() {
            let page = self.list_users_page(realm, first, max).await?;
            pager.advance(page.len());
            users.extend(page);
        }
        Ok(users)
    }

    pub async fn find_users_by_username(
        &self,
        realm: &str,
        username: &str,
    ) -> Result<Vec<UserRepresentation>> {
        let url = self.realm_url(realm, "/users");
        let query = [("username", username.to_string())];
        self.get_json("users", &url, &query, WRITE_TIMEOUT).await
    }

    pub async fn user(&self, realm: &str, user_id: &str) -> Result<UserRepresentation> {
        let url = self.realm_url(realm, &format!("/users/{}", user_id));
        self.get_json("user", &url, &[], LOOKUP_TIMEOUT).await
    }

    /// Creates a user and returns its id. A conflict surfaces as
    /// [`Error::Status`] with status 409.
    pub async fn create_user(&self, realm: &str, user: &NewUser) -> Result<String> {
        let url = self.realm_url(realm, "/users");
        let response = self
            .send_json(Method::POST, &url, user, "create user")
            .await?;

        if response.status() != StatusCode::CREATED {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status("create user", status, &body));
        }

        let from_location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| loc.trim_end_matches('/').rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        if let Some(id) = from_location {
            return Ok(id);
        }

        // Older servers omit Location; look the user up instead.
        self.find_users_by_username(realm, &user.username)
            .await?
            .into_iter()
            .find_map(|u| u.id)
            .ok_or_else(|| Error::status("create user", 404, "created user not found"))
    }

    pub async fn set_password(&self, realm: &str, user_id: &str, password: &str) -> Result<()> {
        let url = self.realm_url(realm, &format!("/users/{}/reset-password", user_id));
        let credential = PasswordCredential {
            kind: "password",
            temporary: false,
            value: password,
        };
        let response = self
            .send_json(Method::PUT, &url, &credential, "reset password")
            .await?;
        check("reset password", response).await.map(drop)
    }

    pub async fn delete_user(&self, realm: &str, user_id: &str) -> Result<()> {
        let url = self.realm_url(realm, &format!("/users/{}", user_id));
        let response = self
            .request(Method::DELETE, &url, WRITE_TIMEOUT)
            .send()
            .await?;
        check("delete user", response).await.map(drop)
    }

    pub async fn send_verify_email(&self, realm: &str, user_id: &str) -> Result<()> {
        let url = self.realm_url(realm, &format!("/users/{}/send-verify-email", user_id));
        let response = self.request(Method::PUT, &url, WRITE_TIMEOUT).send().await?;
        check("send verify email", response).await.map(drop)
    }

    // ---- clients & roles ------------------------------------------------

    pub async fn list_clients(
        &self,
        realm: &str,
        client_id: Option<&str>,
    ) -> Result<Vec<ClientRepresentation>> {
        let url = self.realm_url(realm, "/clients");
        let query: Vec<(&str, String)> = client_id
            .map(|id| vec![("clientId", id.to_string())])
            .unwrap_or_default();
        self.get_json("clients", &url, &query, READ_TIMEOUT).await
    }

    pub async fn client_roles(
        &self,
        realm: &str,
        client_uuid: &str,
    ) -> Result<Vec<RoleRepresentation>> {
        let url = self.realm_url(realm, &format!("/clients/{}/roles", client_uuid));
        self.get_json("client roles", &url, &[], READ_TIMEOUT).await
    }

    pub async fn assign_client_roles(
        &self,
        realm: &str,
        user_id: &str,
        client_uuid: &str,
        roles: &[RoleRepresentation],
    ) -> Result<()> {
        let url = self.realm_url(
            realm,
            &format!("/users/{}/role-mappings/clients/{}", user_id, client_uuid),
        );
        let response = self
            .send_json(Method::POST, &url, roles, "role mappings")
            .await?;
        check("role mappings", response).await.map(drop)
    }

    // ---- sessions & events ----------------------------------------------

    /// Per-client active session counts, normalized from whichever shape
    /// the server answers with.
    pub async fn client_session_stats(&self, realm: &str) -> Result<SessionStats> {
        let url = self.realm_url(realm, "/client-session-stats");
        let raw: Value = self
            .get_json("client session stats", &url, &[], READ_TIMEOUT)
            .await?;
        Ok(SessionStats::from_value(&raw))
    }

    pub async fn user_sessions_page(
        &self,
        realm: &str,
        client_uuid: &str,
        first: usize,
        max: usize,
    ) -> Result<Vec<UserSessionRepresentation>> {
        let url = self.realm_url(realm, &format!("/clients/{}/user-sessions", client_uuid));
        let query = [("first", first.to_string()), ("max", max.to_string())];
        self.get_json("user sessions", &url, &query, READ_TIMEOUT)
            .await
    }

    /// Most recent events of one type, newest first.
    pub async fn events(
        &self,
        realm: &str,
        event_type: &str,
        max: usize,
    ) -> Result<Vec<EventRepresentation>> {
        let url = self.realm_url(realm, "/events");
        let query = [
            ("type", event_type.to_string()),
            ("max", max.to_string()),
            ("orderBy", "time".to_string()),
            ("sortOrder", "desc".to_string()),
        ];
        self.get_json("events", &url, &query, READ_TIMEOUT).await
    }

    // ---- plumbing -------------------------------------------------------

    fn realm_url(&self, realm: &str, path: &str) -> String {
        format!("{}/admin/realms/{}{}", self.base_url, realm, path)
    }

    fn request(&self, method: Method, url: &str, timeout: Duration) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/json")
            .timeout(timeout)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .request(Method::GET, url, timeout)
            .query(query)
            .send()
            .await?;
        decode(endpoint, response).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: &T,
        endpoint: &'static str,
    ) -> Result<Response> {
        let body = sonic_rs::to_string(body).map_err(|source| Error::Json { endpoint, source })?;
        Ok(self
            .request(method, url, WRITE_TIMEOUT)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?)
    }
}

async fn fetch_admin_token(
    http: &Client,
    base_url: &str,
    credentials: &Account,
    timeout: Duration,
) -> Result<String> {
    let form = [
        ("client_id", DEFAULT_CLIENT_ID),
        ("username", credentials.username.as_str()),
        ("password", credentials.password.as_str()),
        ("grant_type", "password"),
    ];
    let response = http
        .post(token_url(base_url, ADMIN_REALM))
        .form(&form)
        .timeout(timeout)
        .send()
        .await?;
    let token: TokenResponse = decode("admin token", response).await?;
    Ok(token.access_token)
}

async fn check(endpoint: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::status(endpoint, status.as_u16(), &body))
}

async fn decode<T: DeserializeOwned>(endpoint: &'static str, response: Response) -> Result<T> {
    let body = check(endpoint, response).await?.text().await?;
    sonic_rs::from_str(&body).map_err(|source| Error::Json { endpoint, source })
}

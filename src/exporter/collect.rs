//! Gathers one scrape's worth of upstream state.

use std::collections::HashSet;
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::Client;
use tracing::{debug, warn};

use crate::accounts::Account;
use crate::admin::{AdminClient, Pager, SessionStats, PAGE_SIZE};
use crate::error::Result;

use super::labels::short_id;

/// Most session-duration series emitted per scrape.
pub const MAX_SESSION_SERIES: usize = 100;
/// Most recent LOGIN events turned into last-login series.
pub const MAX_LOGIN_EVENTS: usize = 25;
pub const ADMIN_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

const LOGIN_EVENT: &str = "LOGIN";

/// One active session retained for the duration series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: String,
    pub username: String,
    /// Epoch milliseconds.
    pub start_ms: i64,
}

/// Identity details attached to a login event when the lookup succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserIdentity {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginEvent {
    pub user_id: String,
    /// Epoch milliseconds.
    pub time_ms: i64,
    /// `None` when the user lookup failed.
    pub identity: Option<UserIdentity>,
}

/// Everything a render needs, already degraded where upstream failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExporterSnapshot {
    pub stats: SessionStats,
    pub distinct_users: usize,
    pub sessions: Vec<SessionRecord>,
    pub logins: Vec<LoginEvent>,
}

#[derive(Debug, Clone)]
pub struct Collector {
    http: Client,
    base_url: String,
    realm: String,
    credentials: Account,
    session_cap: usize,
    event_cap: usize,
}

impl Collector {
    pub fn new(http: Client, base_url: &str, realm: &str, credentials: Account) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            realm: realm.to_string(),
            credentials,
            session_cap: MAX_SESSION_SERIES,
            event_cap: MAX_LOGIN_EVENTS,
        }
    }

    pub fn session_cap(mut self, cap: usize) -> Self {
        self.session_cap = cap;
        self
    }

    pub fn event_cap(mut self, cap: usize) -> Self {
        self.event_cap = cap;
        self
    }

    /// Fails only when authentication or the session statistics fetch
    /// fails; every later step degrades its own output instead.
    pub async fn collect(&self) -> Result<ExporterSnapshot> {
        let admin = AdminClient::connect(
            self.http.clone(),
            &self.base_url,
            &self.credentials,
            ADMIN_TOKEN_TIMEOUT,
        )
        .await?;

        let mut stats = admin.client_session_stats(&self.realm).await?;

        match admin.list_clients(&self.realm, None).await {
            Ok(clients) => stats.resolve_internal_ids(&clients),
            Err(e) => warn!("Client listing failed, drill-down limited: {}", e),
        }

        let (users, sessions) = self.scan_sessions(&admin, &stats).await;
        let logins = self.recent_logins(&admin).await;

        // Session listings can run ahead of the counters; never report
        // more users than there are sessions.
        let distinct_users = users.len().min(stats.total_active() as usize);

        Ok(ExporterSnapshot {
            stats,
            distinct_users,
            sessions,
            logins,
        })
    }

    /// Pages through the sessions of every client with active sessions and
    /// a resolved internal id. Returns the distinct user ids and the first
    /// `session_cap` unique `(user, start)` sessions met.
    async fn scan_sessions(
        &self,
        admin: &AdminClient,
        stats: &SessionStats,
    ) -> (HashSet<String>, Vec<SessionRecord>) {
        let mut users = HashSet::new();
        let mut sessions = Vec::new();
        let mut seen = HashSet::new();

        for stat in stats.clients.iter().filter(|s| s.active_count > 0) {
            let Some(internal_id) = stat.internal_id.as_deref() else {
                debug!("No internal id for client {}, skipping sessions", stat.client_id);
                continue;
            };

            let mut pager = Pager::new(PAGE_SIZE);
            while let Some((first, max)) = pager.window() {
                let page = match admin
                    .user_sessions_page(&self.realm, internal_id, first, max)
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        warn!("Sessions of client {} unavailable: {}", stat.client_id, e);
                        pager.stop();
                        continue;
                    }
                };
                pager.advance(page.len());

                for session in page {
                    let Some(user_id) = session.user_id.filter(|id| !id.is_empty()) else {
                        continue;
                    };
                    users.insert(user_id.clone());

                    if sessions.len() >= self.session_cap {
                        continue;
                    }
                    let Some(start_ms) = session.start else {
                        continue;
                    };
                    if !seen.insert((user_id.clone(), start_ms)) {
                        continue;
                    }

                    let username = session
                        .username
                        .as_deref()
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| short_id(&user_id));
                    sessions.push(SessionRecord {
                        user_id,
                        username,
                        start_ms,
                    });
                }
            }
        }

        (users, sessions)
    }

    /// Latest LOGIN events, each enriched with a best-effort user lookup.
    async fn recent_logins(&self, admin: &AdminClient) -> Vec<LoginEvent> {
        let events = match admin.events(&self.realm, LOGIN_EVENT, self.event_cap).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Login events unavailable: {}", e);
                return Vec::new();
            }
        };

        let events: Vec<(String, i64)> = events
            .into_iter()
            .filter_map(|event| {
                let user_id = event.user_id.filter(|id| !id.is_empty())?;
                Some((user_id, event.time?))
            })
            .take(self.event_cap)
            .collect();

        let lookups = events.iter().map(|(user_id, _)| async move {
            match admin.user(&self.realm, user_id).await {
                Ok(user) => Some(UserIdentity {
                    username: user.username,
                    email: user.email,
                }),
                Err(e) => {
                    debug!("Lookup of user {} failed: {}", user_id, e);
                    None
                }
            }
        });
        let identities = join_all(lookups).await;

        events
            .into_iter()
            .zip(identities)
            .map(|((user_id, time_ms), identity)| LoginEvent {
                user_id,
                time_ms,
                identity,
            })
            .collect()
    }
}

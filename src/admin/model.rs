//! Admin REST representations, reduced to the fields this tool reads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sonic_rs::{JsonContainerTrait, JsonValueTrait, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct RealmRepresentation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub realm: Option<String>,
}

impl RealmRepresentation {
    pub fn name(&self) -> Option<&str> {
        self.realm.as_deref().or(self.id.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRepresentation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub enabled: bool,
    pub email_verified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordCredential<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub temporary: bool,
    pub value: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRepresentation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRepresentation {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default)]
    pub client_role: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSessionRepresentation {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// Session start, epoch milliseconds.
    #[serde(default)]
    pub start: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRepresentation {
    /// Event time, epoch milliseconds.
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
}

/// Active session count of one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSessionStat {
    pub client_id: String,
    pub active_count: u64,
    /// Internal client id; absent when it could not be resolved, in which
    /// case the client is left out of session drill-down.
    pub internal_id: Option<String>,
}

/// Per-client session counts in upstream order, one entry per client id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub clients: Vec<ClientSessionStat>,
}

impl SessionStats {
    /// Normalizes the two shapes `client-session-stats` comes in: an object
    /// `{clientId: count}` or an array of `{id, clientId, active}` records.
    /// Anything else yields no clients.
    pub fn from_value(value: &Value) -> Self {
        let mut stats = SessionStats::default();

        if let Some(object) = value.as_object() {
            for (client_id, count) in object.iter() {
                stats.upsert(client_id, count_of(count), None);
            }
        } else if let Some(records) = value.as_array() {
            for record in records.iter() {
                let Some(client_id) = record.get("clientId").and_then(|v| v.as_str()) else {
                    continue;
                };
                let active = record.get("active").map(count_of).unwrap_or(0);
                let internal_id = record
                    .get("id")
                    .and_then(|v| v.as_str())
                    .filter(|id| !id.is_empty())
                    .map(str::to_string);
                stats.upsert(client_id, active, internal_id);
            }
        }

        stats
    }

    /// Fills missing internal ids from a client listing, joined on client id.
    pub fn resolve_internal_ids(&mut self, clients: &[ClientRepresentation]) {
        let by_client_id: HashMap<&str, &str> = clients
            .iter()
            .filter_map(|c| {
                let client_id = c.client_id.as_deref()?;
                let id = c.id.as_deref().filter(|id| !id.is_empty())?;
                Some((client_id, id))
            })
            .collect();

        for stat in self.clients.iter_mut().filter(|s| s.internal_id.is_none()) {
            if let Some(id) = by_client_id.get(stat.client_id.as_str()) {
                stat.internal_id = Some((*id).to_string());
            }
        }
    }

    pub fn total_active(&self) -> u64 {
        self.clients.iter().map(|s| s.active_count).sum()
    }

    fn upsert(&mut self, client_id: &str, active_count: u64, internal_id: Option<String>) {
        if let Some(existing) = self.clients.iter_mut().find(|s| s.client_id == client_id) {
            existing.active_count = active_count;
            if internal_id.is_some() {
                existing.internal_id = internal_id;
            }
            return;
        }
        self.clients.push(ClientSessionStat {
            client_id: client_id.to_string(),
            active_count,
            internal_id,
        });
    }
}

/// Reads a session count that may be a number, a numeric string or null.
fn count_of(value: &Value) -> u64 {
    if let Some(n) = value.as_u64() {
        return n;
    }
    if let Some(n) = value.as_f64() {
        return if n > 0.0 { n as u64 } else { 0 };
    }
    value
        .as_str()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

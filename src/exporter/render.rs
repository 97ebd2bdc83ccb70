//! Exposition-format text for one snapshot.

use std::fmt::Write;

use super::collect::ExporterSnapshot;
use super::labels::{
    escape_label, sanitize_label, short_id, MAX_EMAIL_LEN, MAX_LABEL_LEN, MAX_USER_ID_LEN,
    UNKNOWN,
};

/// Served whenever a scrape cannot be completed.
pub const FALLBACK: &str = "keycloak_session_exporter_up 0\n\
keycloak_sessions_total{client_id=\"unknown\"} 0\n\
keycloak_distinct_users_connected 0\n";

fn label(value: &str, max_len: usize) -> String {
    escape_label(&sanitize_label(value, max_len))
}

/// Renders a successful collection. `now_ms` is the wall clock in epoch
/// milliseconds, used for session durations.
pub fn render(snapshot: &ExporterSnapshot, now_ms: i64) -> String {
    let mut out = String::with_capacity(256 + 128 * snapshot.sessions.len());
    out.push_str("keycloak_session_exporter_up 1\n");

    if snapshot.stats.clients.is_empty() {
        out.push_str("keycloak_sessions_total{client_id=\"none\"} 0\n");
    }
    for stat in &snapshot.stats.clients {
        let _ = writeln!(
            out,
            "keycloak_sessions_total{{client_id=\"{}\"}} {}",
            label(&stat.client_id, MAX_LABEL_LEN),
            stat.active_count
        );
    }

    let _ = writeln!(
        out,
        "keycloak_distinct_users_connected {}",
        snapshot.distinct_users
    );

    for session in &snapshot.sessions {
        let duration = now_ms.saturating_sub(session.start_ms).max(0) as f64 / 1000.0;
        let _ = writeln!(
            out,
            "keycloak_session_duration_seconds{{user_id=\"{}\",username=\"{}\"}} {:.1}",
            label(&session.user_id, MAX_USER_ID_LEN),
            label(&session.username, MAX_LABEL_LEN),
            duration
        );
    }

    for login in &snapshot.logins {
        let (username, email) = match &login.identity {
            Some(identity) => {
                let username = identity
                    .username
                    .clone()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| short_id(&login.user_id));
                let email = identity.email.as_deref().unwrap_or_default();
                (
                    label(&username, MAX_LABEL_LEN),
                    label(email, MAX_EMAIL_LEN),
                )
            }
            // Lookup failed: placeholder name, empty email.
            None => (UNKNOWN.to_string(), String::new()),
        };
        let _ = writeln!(
            out,
            "keycloak_last_login_timestamp_seconds{{user_id=\"{}\",username=\"{}\",email=\"{}\"}} {}",
            label(&login.user_id, MAX_USER_ID_LEN),
            username,
            email,
            login.time_ms as f64 / 1000.0
        );
    }

    out
}

//! Realm housekeeping: superadmin creation, user counts and test user
//! cleanup.

use tracing::{info, warn};

use crate::admin::{AdminClient, NewUser, RoleRepresentation};
use crate::error::{Error, Result};

/// Usernames created by the load and mail tests start with one of these.
pub const TEST_USERNAME_PREFIXES: [&str; 2] = ["loadtest_", "testuser_"];
/// Never deleted, whatever their name looks like.
pub const PROTECTED_USERNAMES: [&str; 4] =
    ["admin", "keycloak", "service-account-keycloak", "master-realm"];

const REALM_MANAGEMENT: &str = "realm-management";
const SUPERADMIN_ROLES: [&str; 8] = [
    "manage-realm",
    "manage-users",
    "view-realm",
    "view-users",
    "manage-clients",
    "view-clients",
    "manage-events",
    "view-events",
];

/// Creates `username` with a permanent password and the realm-management
/// roles needed to run the admin console. An existing user is an error.
/// Returns the new user id.
pub async fn create_superadmin(
    admin: &AdminClient,
    realm: &str,
    username: &str,
    password: &str,
) -> Result<String> {
    let user = NewUser {
        username: username.to_string(),
        email: None,
        enabled: true,
        email_verified: true,
    };
    let user_id = match admin.create_user(realm, &user).await {
        Ok(id) => id,
        Err(e) if e.http_status() == Some(409) => {
            return Err(Error::config(format!("user '{username}' already exists")));
        }
        Err(e) => return Err(e),
    };
    admin.set_password(realm, &user_id, password).await?;

    let client_uuid = admin
        .list_clients(realm, Some(REALM_MANAGEMENT))
        .await?
        .into_iter()
        .find(|c| c.client_id.as_deref() == Some(REALM_MANAGEMENT))
        .and_then(|c| c.id)
        .ok_or_else(|| Error::config(format!("client {REALM_MANAGEMENT} not found")))?;

    let roles: Vec<RoleRepresentation> = admin
        .client_roles(realm, &client_uuid)
        .await?
        .into_iter()
        .filter(|role| SUPERADMIN_ROLES.contains(&role.name.as_str()))
        .map(|role| RoleRepresentation {
            client_role: true,
            ..role
        })
        .collect();

    if !roles.is_empty() {
        // The user is usable without the roles; report and keep going.
        if let Err(e) = admin
            .assign_client_roles(realm, &user_id, &client_uuid, &roles)
            .await
        {
            warn!("Role assignment failed for {}: {}", username, e);
        }
    }

    info!(
        "Superadmin '{}' created in realm '{}' ({} {} roles)",
        username,
        realm,
        roles.len(),
        REALM_MANAGEMENT
    );
    Ok(user_id)
}

/// User count of one realm; `None` when listing it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmUserCount {
    pub realm: String,
    pub users: Option<usize>,
}

/// Counts the users of every realm, sorted by realm name. A realm that
/// cannot be listed is reported, not fatal.
pub async fn user_count_per_realm(admin: &AdminClient) -> Result<Vec<RealmUserCount>> {
    let realms = admin.list_realms().await?;
    let mut counts = Vec::with_capacity(realms.len());

    for realm in &realms {
        let Some(name) = realm.name() else { continue };
        let users = match admin.list_users(name).await {
            Ok(users) => Some(users.len()),
            Err(e) => {
                warn!("{}: {}", name, e);
                None
            }
        };
        counts.push(RealmUserCount {
            realm: name.to_string(),
            users,
        });
    }

    counts.sort_by(|a, b| a.realm.cmp(&b.realm));
    Ok(counts)
}

/// Whether `username` belongs to a test run and may be deleted.
pub fn is_disposable(username: &str) -> bool {
    let username = username.trim();
    !username.is_empty()
        && !PROTECTED_USERNAMES.contains(&username)
        && TEST_USERNAME_PREFIXES
            .iter()
            .any(|prefix| username.starts_with(prefix))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Deleted, or that would be deleted in a dry run.
    pub deleted: usize,
    /// Protected, not a test user, or failed to delete.
    pub skipped: usize,
}

pub async fn delete_test_users(
    admin: &AdminClient,
    realm: &str,
    dry_run: bool,
) -> Result<CleanupOutcome> {
    let users = admin.list_users(realm).await?;
    let mut outcome = CleanupOutcome::default();

    for user in users {
        let username = user.username.as_deref().unwrap_or_default().trim();
        if !is_disposable(username) {
            outcome.skipped += 1;
            continue;
        }
        let Some(user_id) = user.id.as_deref() else {
            continue;
        };

        if dry_run {
            info!("  [dry-run] would delete {} ({})", username, user_id);
            outcome.deleted += 1;
            continue;
        }
        match admin.delete_user(realm, user_id).await {
            Ok(()) => {
                info!("  Deleted {}", username);
                outcome.deleted += 1;
            }
            Err(e) => {
                warn!("  Failed to delete {}: {}", username, e);
                outcome.skipped += 1;
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_test_users_are_disposable() {
        assert!(is_disposable("loadtest_0_abc"));
        assert!(is_disposable("testuser_12_run"));
        assert!(is_disposable("  loadtest_padded "));
        assert!(!is_disposable("admin"));
        assert!(!is_disposable("alice"));
        assert!(!is_disposable("my_loadtest_user"));
        assert!(!is_disposable(""));
    }

    #[test]
    fn protected_names_never_match_prefixes() {
        for name in PROTECTED_USERNAMES {
            assert!(!is_disposable(name));
        }
    }
}

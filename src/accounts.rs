use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::admin::{AdminClient, NewUser};
use crate::error::{Error, Result};

#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub password: String,
}

impl Account {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Credentials the workers log in with. Built once before the run and
/// shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct AccountPool {
    accounts: Arc<Vec<Account>>,
}

impl AccountPool {
    pub fn new(accounts: Vec<Account>) -> Result<Self> {
        if accounts.is_empty() {
            return Err(Error::config("account pool is empty"));
        }
        Ok(Self {
            accounts: Arc::new(accounts),
        })
    }

    pub fn single(account: Account) -> Self {
        Self {
            accounts: Arc::new(vec![account]),
        }
    }

    /// Reads `username:password` lines. Blank lines and `#` comments are
    /// skipped; the password is everything after the first colon.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let accounts = parse_accounts(&content);
        if accounts.is_empty() {
            return Err(Error::config(format!(
                "no account in {} (expected one username:password per line)",
                path.display()
            )));
        }

        info!("Loaded {} accounts from {:?}", accounts.len(), path);
        Self::new(accounts)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn get(&self, index: usize) -> &Account {
        &self.accounts[index % self.accounts.len()]
    }

    /// Round-robin cursor starting at `offset`, so workers spread over the pool.
    pub fn cursor(&self, offset: usize) -> AccountCursor {
        AccountCursor {
            pool: self.clone(),
            next: offset,
        }
    }
}

pub struct AccountCursor {
    pool: AccountPool,
    next: usize,
}

impl AccountCursor {
    pub fn next_account(&mut self) -> &Account {
        let index = self.next;
        self.next = self.next.wrapping_add(1);
        self.pool.get(index)
    }
}

fn parse_accounts(content: &str) -> Vec<Account> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(user, pass)| Account::new(user.trim(), pass.trim()))
        .collect()
}

/// Accounts created in the realm for one run, with the ids needed to
/// delete them afterwards.
#[derive(Debug)]
pub struct ProvisionedAccounts {
    pub pool: AccountPool,
    pub user_ids: Vec<String>,
}

/// Creates `count` users named `loadtest_<i>_<run_id>` sharing `password`.
/// Users whose creation or password reset fails are skipped.
pub async fn provision(
    admin: &AdminClient,
    realm: &str,
    count: usize,
    password: &str,
    run_id: &str,
) -> Result<ProvisionedAccounts> {
    info!("Creating {} test users (run_id={})", count, run_id);

    let mut accounts = Vec::with_capacity(count);
    let mut user_ids = Vec::with_capacity(count);

    for i in 0..count {
        let username = format!("loadtest_{}_{}", i, run_id);
        let user = NewUser {
            username: username.clone(),
            email: Some(format!("{}@test.local", username)),
            enabled: true,
            email_verified: false,
        };

        let id = match admin.create_user(realm, &user).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to create user {}: {}", username, e);
                continue;
            }
        };

        match admin.set_password(realm, &id, password).await {
            Ok(()) => {
                accounts.push(Account::new(username, password));
                user_ids.push(id);
            }
            Err(e) => {
                warn!("Failed to set password for {}: {}", username, e);
                // Don't leave a half-provisioned user behind.
                if let Err(e) = admin.delete_user(realm, &id).await {
                    warn!("Failed to delete user {}: {}", username, e);
                }
            }
        }
    }

    if accounts.len() < count {
        warn!("Only {}/{} test users created", accounts.len(), count);
    }
    if accounts.is_empty() {
        return Err(Error::config("no test user could be created"));
    }

    info!("{} test users created", accounts.len());
    Ok(ProvisionedAccounts {
        pool: AccountPool::new(accounts)?,
        user_ids,
    })
}

/// Deletes previously provisioned users; failures are logged and skipped.
pub async fn cleanup(admin: &AdminClient, realm: &str, user_ids: &[String]) -> usize {
    let mut deleted = 0;
    for id in user_ids {
        match admin.delete_user(realm, id).await {
            Ok(()) => deleted += 1,
            Err(e) => warn!("Failed to delete user {}: {}", id, e),
        }
    }
    info!("{} test users deleted", deleted);
    deleted
}

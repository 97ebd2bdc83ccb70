use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use url::Url;

use crate::accounts::Account;
use crate::error::{Error, Result};
use crate::login::DEFAULT_CLIENT_ID;
use crate::mail::{SendStrategy, DEFAULT_WORKERS};
use crate::schedule::{seconds, LoadProfile, RampSchedule};

// =============================================================================
// Command Line
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "keycloak-bench")]
#[command(about = "Keycloak login load generator and session metrics exporter", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub server: ServerArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Where the identity provider lives and how to administer it.
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Base URL of the identity provider
    #[arg(long, global = true, env = "KEYCLOAK_URL", default_value = "http://localhost:8080")]
    pub url: String,

    /// Realm to test or observe
    #[arg(long, global = true, env = "KEYCLOAK_REALM", default_value = "master")]
    pub realm: String,

    /// Admin username (master realm)
    #[arg(long, global = true, env = "KEYCLOAK_ADMIN_USER", default_value = "admin")]
    pub admin_user: String,

    /// Admin password
    #[arg(
        long,
        global = true,
        env = "KEYCLOAK_ADMIN_PASSWORD",
        default_value = "admin",
        hide_env_values = true
    )]
    pub admin_password: String,
}

impl ServerArgs {
    /// Validated base URL without a trailing slash.
    pub fn base_url(&self) -> Result<String> {
        let parsed = Url::parse(self.url.trim())?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }
        Ok(self.url.trim().trim_end_matches('/').to_string())
    }

    pub fn admin_account(&self) -> Account {
        Account::new(&self.admin_user, &self.admin_password)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Hammer the token endpoint under a constant or ramped profile
    Load(LoadArgs),
    /// Serve session metrics for scraping
    Exporter(ExporterArgs),
    /// Realm user management
    #[command(subcommand)]
    Admin(AdminCommand),
    /// Bulk verification-mail test
    Mail(MailArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Constant,
    Ramp,
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    #[arg(long, value_enum, default_value = "constant")]
    pub mode: Mode,

    /// Workers in constant mode
    #[arg(long, default_value = "10")]
    pub concurrent: usize,

    /// Run length in constant mode (seconds)
    #[arg(long, default_value = "30")]
    pub duration: f64,

    /// Per-request timeout (seconds)
    #[arg(long, default_value = "10")]
    pub timeout: f64,

    /// Sequential logins before the run, excluded from results
    #[arg(long, default_value = "3")]
    pub warmup: usize,

    /// Simulated users in ramp mode
    #[arg(long, default_value = "30")]
    pub users: usize,

    /// Ramp-up length (seconds)
    #[arg(long, default_value = "60")]
    pub ramp_up: f64,

    /// Plateau length (seconds)
    #[arg(long, default_value = "30")]
    pub hold: f64,

    /// Ramp-down length (seconds)
    #[arg(long, default_value = "60")]
    pub ramp_down: f64,

    /// Login username (defaults to the admin user)
    #[arg(long)]
    pub user: Option<String>,

    /// Login password (defaults to the admin password)
    #[arg(long)]
    pub password: Option<String>,

    /// File of `username:password` lines to rotate through
    #[arg(long, conflicts_with = "create_users")]
    pub accounts_file: Option<PathBuf>,

    /// Create N throwaway users for the run
    #[arg(long)]
    pub create_users: Option<usize>,

    /// Password of created users
    #[arg(long, env = "LOAD_TEST_USER_PASSWORD", default_value = "testpass", hide_env_values = true)]
    pub user_password: String,

    /// Keep created users after the run
    #[arg(long)]
    pub no_cleanup: bool,

    /// Client used for the password grant
    #[arg(long, env = "KEYCLOAK_CLIENT_ID", default_value = DEFAULT_CLIENT_ID)]
    pub client_id: String,

    /// Optional scope, e.g. `openid`
    #[arg(long)]
    pub scope: Option<String>,

    /// Minimum pause between two logins of a worker (ms)
    #[arg(long, default_value = "0")]
    pub think_time_min_ms: u64,

    /// Maximum pause between two logins of a worker (ms)
    #[arg(long, default_value = "0")]
    pub think_time_max_ms: u64,
}

impl LoadArgs {
    pub fn profile(&self) -> Result<LoadProfile> {
        let profile = match self.mode {
            Mode::Constant => LoadProfile::Constant {
                concurrency: self.concurrent,
                duration: seconds("--duration", self.duration)?,
            },
            Mode::Ramp => LoadProfile::Ramp(RampSchedule {
                users: self.users,
                ramp_up: seconds("--ramp-up", self.ramp_up)?,
                hold: seconds("--hold", self.hold)?,
                ramp_down: seconds("--ramp-down", self.ramp_down)?,
            }),
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        let timeout = seconds("--timeout", self.timeout)?;
        if timeout.is_zero() {
            return Err(Error::config("--timeout must be greater than 0"));
        }
        Ok(timeout)
    }

    /// Number of throwaway users to create, if any. Zero is rejected here,
    /// before the admin API is contacted.
    pub fn created_users(&self) -> Result<Option<usize>> {
        match self.create_users {
            Some(0) => Err(Error::config("--create-users must be at least 1")),
            count => Ok(count),
        }
    }

    /// Single login account: explicit `--user/--password`, else the admin.
    pub fn login_account(&self, server: &ServerArgs) -> Account {
        Account::new(
            self.user.as_deref().unwrap_or(&server.admin_user),
            self.password.as_deref().unwrap_or(&server.admin_password),
        )
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExporterArgs {
    /// Listening port
    #[arg(long, env = "EXPORTER_PORT", default_value = "9091")]
    pub port: u16,

    /// Listening address
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AdminCommand {
    /// Create a user with the realm-management admin roles
    CreateSuperadmin {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Show the user count of every realm
    ListUsers,
    /// Delete users created by the test tools (loadtest_*, testuser_*)
    DeleteTestUsers {
        /// Only list what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Full,
    BatchPause,
    Rate,
}

#[derive(Args, Debug, Clone)]
pub struct MailArgs {
    /// Number of users (and mails)
    #[arg(long, default_value = "10000")]
    pub nb: usize,

    /// Requests in flight
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    #[arg(long, value_enum, default_value = "full")]
    pub strategy: StrategyKind,

    /// batch-pause: mails per batch
    #[arg(long, default_value = "5000")]
    pub send_batch_size: usize,

    /// batch-pause: pause between batches (seconds)
    #[arg(long, default_value = "0")]
    pub pause: f64,

    /// rate: target mails per second
    #[arg(long)]
    pub rate: Option<f64>,

    /// rate: micro-batch size
    #[arg(long, default_value = "100")]
    pub rate_batch: usize,

    /// Keep created users
    #[arg(long)]
    pub skip_cleanup: bool,
}

impl MailArgs {
    pub fn strategy(&self) -> Result<SendStrategy> {
        let strategy = match self.strategy {
            StrategyKind::Full => SendStrategy::Full,
            StrategyKind::BatchPause => SendStrategy::BatchPause {
                batch_size: self.send_batch_size,
                pause: seconds("--pause", self.pause)?,
            },
            StrategyKind::Rate => SendStrategy::Rate {
                per_second: self.rate.unwrap_or(0.0),
                batch: self.rate_batch,
            },
        };
        strategy.validate()?;
        Ok(strategy)
    }
}

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use keycloak_bench::accounts::{self, AccountPool};
use keycloak_bench::admin::{AdminClient, ADMIN_REALM};
use keycloak_bench::config::{
    AdminCommand, Cli, Command, ExporterArgs, LoadArgs, MailArgs, ServerArgs,
};
use keycloak_bench::exporter::{self, Collector, Exporter};
use keycloak_bench::login::{build_client, TokenEndpoint};
use keycloak_bench::mail::{MailTest, CLI_TOKEN_TIMEOUT};
use keycloak_bench::maintenance;
use keycloak_bench::runner::{LoadTest, ThinkTime};
use keycloak_bench::schedule::LoadProfile;

/// Idle connections kept per host by the shared HTTP client.
const POOL_IDLE_PER_HOST: usize = 256;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let Cli { server, command } = cli;
    match command {
        Command::Load(args) => run_load(&server, &args).await,
        Command::Exporter(args) => run_exporter(&server, &args).await.map(|_| 0),
        Command::Admin(command) => run_admin(&server, command).await.map(|_| 0),
        Command::Mail(args) => run_mail(&server, &args).await.map(|_| 0),
    }
}

fn run_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        .to_string()
}

async fn connect_admin(server: &ServerArgs, base_url: &str) -> Result<AdminClient> {
    let http = build_client(16)?;
    AdminClient::connect(http, base_url, &server.admin_account(), CLI_TOKEN_TIMEOUT)
        .await
        .with_context(|| format!("admin authentication on {} failed", base_url))
}

// =============================================================================
// Load
// =============================================================================

async fn run_load(server: &ServerArgs, args: &LoadArgs) -> Result<i32> {
    // Everything that can be rejected is checked before any traffic.
    let base_url = server.base_url()?;
    let profile = args.profile()?;
    let request_timeout = args.request_timeout()?;
    let think_time = ThinkTime::from_millis(args.think_time_min_ms, args.think_time_max_ms)?;
    let create_users = args.created_users()?;

    let mut admin = None;
    let mut created_ids = Vec::new();
    let pool = if let Some(path) = &args.accounts_file {
        AccountPool::load_from_file(path)
            .with_context(|| format!("cannot load accounts from {}", path.display()))?
    } else if let Some(count) = create_users {
        let client = connect_admin(server, &base_url).await?;
        let provisioned = accounts::provision(
            &client,
            &server.realm,
            count,
            &args.user_password,
            &run_id(),
        )
        .await?;
        created_ids = provisioned.user_ids;
        admin = Some(client);
        provisioned.pool
    } else {
        AccountPool::single(args.login_account(server))
    };

    let http = build_client(profile.workers().max(POOL_IDLE_PER_HOST))?;
    let endpoint = TokenEndpoint::new(http, &base_url, &server.realm)
        .with_client_id(args.client_id.clone())
        .with_scope(args.scope.clone());

    info!("════════════════════════════════════════════════════════════");
    info!("           KEYCLOAK LOGIN LOAD TEST");
    info!("════════════════════════════════════════════════════════════");
    info!("Endpoint: {}", endpoint.url());
    info!("Client: {}", args.client_id);
    info!("Accounts: {}", pool.len());
    match profile {
        LoadProfile::Constant {
            concurrency,
            duration,
        } => {
            info!("Mode: constant");
            info!("Concurrency: {}", concurrency);
            info!("Duration: {:.1}s", duration.as_secs_f64());
        }
        LoadProfile::Ramp(schedule) => {
            info!("Mode: ramp");
            info!("Users: {}", schedule.users);
            info!(
                "Ramp up / hold / ramp down: {:.1}s / {:.1}s / {:.1}s",
                schedule.ramp_up.as_secs_f64(),
                schedule.hold.as_secs_f64(),
                schedule.ramp_down.as_secs_f64()
            );
        }
    }
    info!("Timeout: {:.1}s", request_timeout.as_secs_f64());
    info!("════════════════════════════════════════════════════════════");

    let outcome = LoadTest::new(endpoint, pool)
        .request_timeout(request_timeout)
        .warmup(args.warmup)
        .think_time(think_time)
        .run(profile)
        .await;

    if let Some(admin) = &admin {
        if args.no_cleanup {
            info!("Keeping {} created users", created_ids.len());
        } else {
            accounts::cleanup(admin, &server.realm, &created_ids).await;
        }
    }

    let report = outcome?;
    report.summary.log_report();
    info!("Peak active workers: {}", report.peak_active);
    if report.abandoned > 0 {
        warn!("{} workers abandoned after the grace period", report.abandoned);
    }

    let verdict = report.summary.verdict();
    if verdict.is_pass() {
        info!("Result: PASS");
    } else {
        error!("Result: FAIL ({:?})", verdict);
    }
    Ok(verdict.exit_code())
}

// =============================================================================
// Exporter
// =============================================================================

async fn run_exporter(server: &ServerArgs, args: &ExporterArgs) -> Result<()> {
    let base_url = server.base_url()?;
    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.bind, args.port))?;

    let collector = Collector::new(
        build_client(16)?,
        &base_url,
        &server.realm,
        server.admin_account(),
    );
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {}", addr))?;

    info!(
        "Observing realm '{}' on {} (admin realm {})",
        server.realm, base_url, ADMIN_REALM
    );
    exporter::serve(listener, Exporter::new(collector), shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

// =============================================================================
// Admin
// =============================================================================

async fn run_admin(server: &ServerArgs, command: AdminCommand) -> Result<()> {
    let base_url = server.base_url()?;
    let admin = connect_admin(server, &base_url).await?;

    match command {
        AdminCommand::CreateSuperadmin { username, password } => {
            maintenance::create_superadmin(&admin, &server.realm, &username, &password)
                .await
                .with_context(|| format!("cannot create superadmin '{}'", username))?;
        }
        AdminCommand::ListUsers => {
            info!("Users per realm:");
            for count in maintenance::user_count_per_realm(&admin).await? {
                match count.users {
                    Some(n) => info!("  {}: {}", count.realm, n),
                    None => info!("  {}: error", count.realm),
                }
            }
        }
        AdminCommand::DeleteTestUsers { dry_run } => {
            if dry_run {
                info!("Dry run on realm '{}', nothing will be deleted", server.realm);
            } else {
                info!(
                    "Deleting users starting with {:?} in realm '{}'",
                    maintenance::TEST_USERNAME_PREFIXES,
                    server.realm
                );
            }
            let outcome = maintenance::delete_test_users(&admin, &server.realm, dry_run).await?;
            info!(
                "{} users {}, {} skipped or protected",
                outcome.deleted,
                if dry_run { "to delete" } else { "deleted" },
                outcome.skipped
            );
        }
    }
    Ok(())
}

// =============================================================================
// Mail
// =============================================================================

async fn run_mail(server: &ServerArgs, args: &MailArgs) -> Result<()> {
    let base_url = server.base_url()?;
    let strategy = args.strategy()?;
    let admin = connect_admin(server, &base_url).await?;

    info!("════════════════════════════════════════════════════════════");
    info!("           VERIFICATION MAIL TEST");
    info!("════════════════════════════════════════════════════════════");
    info!("URL: {}", base_url);
    info!("Realm: {}", server.realm);
    info!("Mails: {}", args.nb);
    info!("Strategy: {}", strategy.describe());
    info!("Workers: {}", args.workers);
    info!("════════════════════════════════════════════════════════════");

    let mut test = MailTest::new(admin, server.admin_account(), &server.realm, args.workers);
    let user_ids = test.create_users(args.nb, &run_id()).await?;
    let outcome = test.send(&user_ids, strategy).await;

    if args.skip_cleanup {
        info!("Keeping {} users", user_ids.len());
    } else {
        test.cleanup(&user_ids).await?;
    }

    outcome?.log_report();
    Ok(())
}

//! Bulk verification-mail test: create throwaway users, ask the server to
//! mail each of them, then delete them.

use std::time::Duration;

use futures_util::{stream, StreamExt};
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::accounts::Account;
use crate::admin::{AdminClient, NewUser};
use crate::error::{Error, Result};

/// Admin operations between two token refreshes.
pub const TOKEN_REFRESH_EVERY: usize = 500;
pub const DEFAULT_WORKERS: usize = 20;
pub const CLI_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);
/// Slowest accepted `rate` strategy, in mails per second.
pub const MIN_RATE: f64 = 0.01;

/// How verification mails are paced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SendStrategy {
    /// Everything as fast as the worker pool allows.
    Full,
    /// Chunks of `batch_size`, with `pause` between chunks.
    BatchPause { batch_size: usize, pause: Duration },
    /// Micro-batches of `batch`, sleeping so that `n` mails take at least
    /// `n / per_second` seconds.
    Rate { per_second: f64, batch: usize },
}

impl SendStrategy {
    pub fn validate(&self) -> Result<()> {
        match *self {
            SendStrategy::Full => Ok(()),
            SendStrategy::BatchPause { batch_size, .. } if batch_size == 0 => {
                Err(Error::config("--send-batch-size must be at least 1"))
            }
            SendStrategy::Rate { per_second, .. }
                if !per_second.is_finite() || per_second < MIN_RATE =>
            {
                Err(Error::config(format!(
                    "--strategy rate requires --rate >= {}",
                    MIN_RATE
                )))
            }
            SendStrategy::Rate { batch, .. } if batch == 0 => {
                Err(Error::config("--rate-batch must be at least 1"))
            }
            _ => Ok(()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SendStrategy::Full => "full (no pause)".to_string(),
            SendStrategy::BatchPause { batch_size, pause } => format!(
                "batch-pause (batch={}, pause={:.1}s)",
                batch_size,
                pause.as_secs_f64()
            ),
            SendStrategy::Rate { per_second, .. } => format!("rate ({:.0} mails/s)", per_second),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MailReport {
    pub sent: usize,
    pub errors: usize,
    pub elapsed: Duration,
}

impl MailReport {
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.sent + self.errors) as f64 / secs
        } else {
            0.0
        }
    }

    pub fn log_report(&self) {
        info!("═══════════════════════════════════════════════════════════");
        info!("  Mails sent:   {}", self.sent);
        info!("  Errors:       {}", self.errors);
        info!("  Duration:     {:.1}s", self.elapsed.as_secs_f64());
        info!("  Mean rate:    {:.1} mails/s", self.rate());
        info!("═══════════════════════════════════════════════════════════");
    }
}

/// Drives the three phases against one realm, refreshing the admin token
/// every [`TOKEN_REFRESH_EVERY`] operations.
pub struct MailTest {
    admin: AdminClient,
    credentials: Account,
    realm: String,
    workers: usize,
    since_refresh: usize,
}

impl MailTest {
    pub fn new(admin: AdminClient, credentials: Account, realm: &str, workers: usize) -> Self {
        Self {
            admin,
            credentials,
            realm: realm.to_string(),
            workers: workers.max(1),
            since_refresh: 0,
        }
    }

    async fn count_operations(&mut self, done: usize) -> Result<()> {
        self.since_refresh += done;
        if self.since_refresh >= TOKEN_REFRESH_EVERY {
            self.admin
                .refresh(&self.credentials, CLI_TOKEN_TIMEOUT)
                .await?;
            self.since_refresh = 0;
        }
        Ok(())
    }

    /// Creates `testuser_<i>_<run_id>` users, returning the ids of those
    /// that were created.
    pub async fn create_users(&mut self, count: usize, run_id: &str) -> Result<Vec<String>> {
        info!("Creating {} users (run_id={})", count, run_id);
        let started = Instant::now();
        let mut user_ids = Vec::with_capacity(count);

        for i in 0..count {
            let username = format!("testuser_{}_{}", i, run_id);
            let user = NewUser {
                email: Some(format!("{}@test.local", username)),
                username,
                enabled: true,
                email_verified: false,
            };
            match self.admin.create_user(&self.realm, &user).await {
                Ok(id) => user_ids.push(id),
                Err(e) => warn!("Failed to create {}: {}", user.username, e),
            }

            self.count_operations(1).await?;
            if (i + 1) % TOKEN_REFRESH_EVERY == 0 {
                let rate = user_ids.len() as f64 / started.elapsed().as_secs_f64().max(1e-3);
                info!("  {}/{} created ({:.0} users/s)", user_ids.len(), count, rate);
            }
        }

        info!(
            "{} users created in {:.1}s",
            user_ids.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(user_ids)
    }

    /// Sends one verification mail per user under `strategy`.
    pub async fn send(&mut self, user_ids: &[String], strategy: SendStrategy) -> Result<MailReport> {
        strategy.validate()?;
        info!(
            "Sending {} mails, strategy {}, {} workers",
            user_ids.len(),
            strategy.describe(),
            self.workers
        );
        if let SendStrategy::Rate { per_second, .. } = strategy {
            info!("  Estimated duration: {:.0}s", user_ids.len() as f64 / per_second);
        }

        let started = Instant::now();
        let mut report = MailReport::default();

        let chunk_size = match strategy {
            SendStrategy::Full => TOKEN_REFRESH_EVERY,
            SendStrategy::BatchPause { batch_size, .. } => batch_size,
            SendStrategy::Rate { batch, .. } => batch,
        };

        let mut completed = 0;
        for chunk in user_ids.chunks(chunk_size) {
            let (sent, errors) = self.send_chunk(chunk).await?;
            report.sent += sent;
            report.errors += errors;
            completed += chunk.len();

            match strategy {
                SendStrategy::Full => {}
                SendStrategy::BatchPause { pause, .. } => {
                    info!("  {}/{} processed", completed, user_ids.len());
                    if completed < user_ids.len() && !pause.is_zero() {
                        sleep(pause).await;
                    }
                }
                SendStrategy::Rate { per_second, batch } => {
                    let target = Duration::try_from_secs_f64(completed as f64 / per_second)
                        .map_err(|e| Error::config(format!("rate pacing out of range: {}", e)))?;
                    let elapsed = started.elapsed();
                    if target > elapsed {
                        sleep(target - elapsed).await;
                    }
                    if completed % (batch * 10) == 0 || completed == user_ids.len() {
                        info!("  {}/{} processed", completed, user_ids.len());
                    }
                }
            }
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Sends a chunk with at most `workers` requests in flight, refreshing
    /// the token as the chunk crosses refresh boundaries.
    async fn send_chunk(&mut self, user_ids: &[String]) -> Result<(usize, usize)> {
        let mut sent = 0;
        let mut errors = 0;

        let room = TOKEN_REFRESH_EVERY.saturating_sub(self.since_refresh).max(1);
        let (head, tail) = user_ids.split_at(room.min(user_ids.len()));

        for part in std::iter::once(head).chain(tail.chunks(TOKEN_REFRESH_EVERY)) {
            if part.is_empty() {
                continue;
            }
            let admin = &self.admin;
            let realm = self.realm.as_str();
            let outcomes: Vec<Result<()>> = stream::iter(part)
                .map(|id| admin.send_verify_email(realm, id))
                .buffer_unordered(self.workers)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        warn!("Verify mail failed: {}", e);
                        errors += 1;
                    }
                }
            }
            self.count_operations(part.len()).await?;
        }

        Ok((sent, errors))
    }

    /// Deletes the given users with bounded concurrency; returns how many
    /// were deleted.
    pub async fn cleanup(&mut self, user_ids: &[String]) -> Result<usize> {
        info!("Deleting {} users", user_ids.len());
        let mut deleted = 0;

        for part in user_ids.chunks(TOKEN_REFRESH_EVERY) {
            let admin = &self.admin;
            let realm = self.realm.as_str();
            deleted += stream::iter(part)
                .map(|id| admin.delete_user(realm, id))
                .buffer_unordered(self.workers)
                .filter(|outcome| std::future::ready(outcome.is_ok()))
                .count()
                .await;
            self.count_operations(part.len()).await?;
        }

        info!("{} users deleted", deleted);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_strategy_needs_positive_rate() {
        let rate = |per_second| SendStrategy::Rate {
            per_second,
            batch: 100,
        };
        assert!(rate(0.0).validate().is_err());
        assert!(rate(-3.0).validate().is_err());
        assert!(rate(f64::NAN).validate().is_err());
        assert!(rate(1e-320).validate().is_err());
        assert!(rate(MIN_RATE).validate().is_ok());
        assert!(rate(50.0).validate().is_ok());
    }

    #[test]
    fn batch_sizes_must_be_positive() {
        let batch = SendStrategy::BatchPause {
            batch_size: 0,
            pause: Duration::from_secs(1),
        };
        assert!(batch.validate().is_err());
        let rate = SendStrategy::Rate {
            per_second: 10.0,
            batch: 0,
        };
        assert!(rate.validate().is_err());
        assert!(SendStrategy::Full.validate().is_ok());
    }

    #[test]
    fn describes_strategies() {
        assert_eq!(SendStrategy::Full.describe(), "full (no pause)");
        let batch = SendStrategy::BatchPause {
            batch_size: 5000,
            pause: Duration::from_secs(30),
        };
        assert_eq!(batch.describe(), "batch-pause (batch=5000, pause=30.0s)");
    }

    #[test]
    fn report_rate_counts_errors() {
        let report = MailReport {
            sent: 8,
            errors: 2,
            elapsed: Duration::from_secs(5),
        };
        assert_eq!(report.rate(), 2.0);
        assert_eq!(MailReport::default().rate(), 0.0);
    }
}

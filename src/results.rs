//! Shared result collection and the post-run summary.

use std::collections::BTreeMap;
use std::time::Duration;

use hdrhistogram::Histogram;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::login::{LoginAttempt, LoginFailure};

// =============================================================================
// Result Collector
// =============================================================================

/// Append-only record of every login attempt of a run, shared by the workers.
pub struct ResultSet {
    inner: Mutex<Recorded>,
}

struct Recorded {
    attempts: Vec<LoginAttempt>,
    failures: u64,
    /// Successful latencies in microseconds, for cheap progress estimates.
    latency_us: Histogram<u64>,
}

/// Point-in-time view used for progress lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub total: u64,
    pub failures: u64,
    pub approx_p95: Option<Duration>,
}

impl ResultSet {
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(Recorded {
                attempts: Vec::new(),
                failures: 0,
                latency_us: Histogram::new(3)?,
            }),
        })
    }

    pub async fn append(&self, attempt: LoginAttempt) {
        let mut inner = self.inner.lock().await;
        if attempt.success {
            let us = attempt.latency.as_micros().max(1) as u64;
            inner.latency_us.record(us).ok();
        } else {
            inner.failures += 1;
        }
        inner.attempts.push(attempt);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.attempts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn progress(&self) -> Progress {
        let inner = self.inner.lock().await;
        let approx_p95 = if inner.latency_us.len() > 0 {
            Some(Duration::from_micros(
                inner.latency_us.value_at_quantile(0.95),
            ))
        } else {
            None
        };
        Progress {
            total: inner.attempts.len() as u64,
            failures: inner.failures,
            approx_p95,
        }
    }

    /// Copy of everything appended so far. Attempts appended later by
    /// abandoned workers are not part of it.
    pub async fn snapshot(&self) -> Vec<LoginAttempt> {
        self.inner.lock().await.attempts.clone()
    }
}

// =============================================================================
// Summary
// =============================================================================

/// Linear interpolation between order statistics of an ascending slice:
/// `rank = (n - 1) * p / 100`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (sorted.len() - 1) as f64 * p / 100.0;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    sorted[lower] + (rank - lower as f64) * (sorted[upper] - sorted[lower])
}

/// Latency distribution of successful attempts, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyStats {
    pub min: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl LatencyStats {
    fn from_seconds(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some(Self {
            min: values[0],
            mean,
            p50: percentile(&values, 50.0),
            p95: percentile(&values, 95.0),
            p99: percentile(&values, 99.0),
            max: values[values.len() - 1],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// Not a single request completed.
    NoRequests,
    /// Every attempt was rejected with HTTP 401.
    AllUnauthorized,
}

impl Verdict {
    pub fn is_pass(self) -> bool {
        self == Verdict::Pass
    }

    pub fn exit_code(self) -> i32 {
        if self.is_pass() {
            0
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub unauthorized: usize,
    pub elapsed: Duration,
    pub latency: Option<LatencyStats>,
    /// Failure label → occurrences.
    pub errors: BTreeMap<String, usize>,
}

impl Summary {
    pub fn compute(attempts: &[LoginAttempt], elapsed: Duration) -> Self {
        let mut errors = BTreeMap::new();
        let mut successes = 0;
        let mut unauthorized = 0;
        let mut latencies = Vec::new();

        for attempt in attempts {
            if attempt.success {
                successes += 1;
                latencies.push(attempt.latency.as_secs_f64());
                continue;
            }
            if let Some(failure) = &attempt.error {
                if failure.is_unauthorized() {
                    unauthorized += 1;
                }
                *errors.entry(failure.to_string()).or_insert(0) += 1;
            }
        }

        Self {
            total: attempts.len(),
            successes,
            failures: attempts.len() - successes,
            unauthorized,
            elapsed,
            latency: LatencyStats::from_seconds(latencies),
            errors,
        }
    }

    /// Percentage of successful attempts, 0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.successes as f64 / self.total as f64
        }
    }

    /// Completed attempts per wall-clock second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total as f64 / secs
        } else {
            0.0
        }
    }

    /// Failing runs are the ones where the service was never reached or
    /// rejected every single credential; any other mix passes.
    pub fn verdict(&self) -> Verdict {
        if self.total == 0 {
            Verdict::NoRequests
        } else if self.unauthorized == self.total {
            Verdict::AllUnauthorized
        } else {
            Verdict::Pass
        }
    }

    pub fn log_report(&self) {
        info!("╔════════════════════════════════════════════════════════════╗");
        info!("║                      LOAD TEST SUMMARY                     ║");
        info!("╚════════════════════════════════════════════════════════════╝");
        info!("");
        info!("  Total requests:   {}", self.total);
        if self.total > 0 {
            info!(
                "  Successful:       {} ({:.1}%)",
                self.successes,
                self.success_rate()
            );
        } else {
            info!("  (no request completed)");
        }
        info!("  Wall clock:       {:.1}s", self.elapsed.as_secs_f64());
        if self.total > 0 {
            info!("  Throughput:       {:.1} req/s", self.throughput());
        }

        info!("");
        info!("Latency of successful logins (s):");
        match &self.latency {
            Some(l) => {
                info!("  Min:    {:.3}", l.min);
                info!("  Mean:   {:.3}", l.mean);
                info!("  p50:    {:.3}", l.p50);
                info!("  p95:    {:.3}", l.p95);
                info!("  p99:    {:.3}", l.p99);
                info!("  Max:    {:.3}", l.max);
            }
            None => info!("  No data"),
        }

        if !self.errors.is_empty() {
            info!("");
            info!("Errors:");
            for (label, count) in &self.errors {
                info!("  {:<16} {}", label, count);
            }
            if self.errors.contains_key(&LoginFailure::Http(403).to_string()) {
                info!("");
                info!("HTTP 403: enable \"Direct access grants\" on the login client");
                info!("and check the realm brute force detection settings.");
            }
        }

        info!("");
        info!("═══════════════════════════════════════════════════════════");
    }
}

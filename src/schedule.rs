use std::time::Duration;

use crate::error::{Error, Result};

/// Linear ramp: workers start evenly over `ramp_up`, all run for `hold`,
/// then stop evenly over `ramp_down`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampSchedule {
    pub users: usize,
    pub ramp_up: Duration,
    pub hold: Duration,
    pub ramp_down: Duration,
}

impl RampSchedule {
    /// Start of worker `index`, relative to the run start: `i / N * ramp_up`.
    pub fn start_offset(&self, index: usize) -> Duration {
        self.ramp_up.mul_f64(self.fraction(index))
    }

    /// Stop of worker `index`, relative to the end of the hold: `i / N * ramp_down`.
    pub fn stop_offset(&self, index: usize) -> Duration {
        self.ramp_down.mul_f64(self.fraction(index))
    }

    /// Nominal length of the whole profile.
    pub fn total(&self) -> Duration {
        self.ramp_up + self.hold + self.ramp_down
    }

    fn fraction(&self, index: usize) -> f64 {
        let users = self.users.max(1);
        index.min(users) as f64 / users as f64
    }
}

/// How many workers run, and for how long.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadProfile {
    /// `concurrency` workers, all running until `duration` has elapsed.
    Constant {
        concurrency: usize,
        duration: Duration,
    },
    Ramp(RampSchedule),
}

impl LoadProfile {
    pub fn validate(&self) -> Result<()> {
        match self {
            LoadProfile::Constant { concurrency, .. } if *concurrency == 0 => {
                Err(Error::config("concurrency must be at least 1"))
            }
            LoadProfile::Ramp(schedule) if schedule.users == 0 => {
                Err(Error::config("ramp mode needs at least 1 user"))
            }
            _ => Ok(()),
        }
    }

    /// Number of worker units the profile spawns.
    pub fn workers(&self) -> usize {
        match self {
            LoadProfile::Constant { concurrency, .. } => *concurrency,
            LoadProfile::Ramp(schedule) => schedule.users,
        }
    }
}

/// Converts a CLI seconds value, rejecting negative or non-finite input.
pub fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::config(format!("{name} must be a non-negative number of seconds")))
}

//! Virtual time source.
//!
//! Everything time dependent in the protocol reads time from a [`Clock`]
//! rather than the wall clock. A paused clock only moves when told to, which
//! is what makes simulated runs reproducible.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A point in virtual time, measured from the start of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", from = "f64")]
pub struct VirtualTime(Duration);

impl VirtualTime {
    /// Start of the run.
    pub const ZERO: Self = Self(Duration::ZERO);

    /// Build from seconds. Negative or non-finite input maps to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self(Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO))
    }

    /// Seconds since the start of the run.
    pub fn as_secs_f64(self) -> f64 {
        self.0.as_secs_f64()
    }

    /// Offset from the start of the run.
    pub const fn since_start(self) -> Duration {
        self.0
    }
}

impl Add<Duration> for VirtualTime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub for VirtualTime {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl From<VirtualTime> for f64 {
    fn from(t: VirtualTime) -> Self {
        t.as_secs_f64()
    }
}

impl From<f64> for VirtualTime {
    fn from(secs: f64) -> Self {
        Self::from_secs_f64(secs)
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// Controllable clock. Starts paused at [`VirtualTime::ZERO`].
#[derive(Debug, Clone)]
pub struct Clock {
    base: VirtualTime,
    /// Wall-clock anchor while free running; `None` while paused.
    resumed_at: Option<Instant>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Paused clock at time zero.
    pub const fn new() -> Self {
        Self {
            base: VirtualTime::ZERO,
            resumed_at: None,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> VirtualTime {
        match self.resumed_at {
            Some(anchor) => self.base + anchor.elapsed(),
            None => self.base,
        }
    }

    /// True when time only moves through [`Clock::advance_by`].
    pub const fn is_paused(&self) -> bool {
        self.resumed_at.is_none()
    }

    /// Stop advancing automatically. Idempotent.
    pub fn pause(&mut self) {
        if self.resumed_at.is_some() {
            self.base = self.now();
            self.resumed_at = None;
        }
    }

    /// Return to free-running time, continuing from the current instant.
    pub fn resume(&mut self) {
        if self.resumed_at.is_none() {
            self.resumed_at = Some(Instant::now());
        }
    }

    /// Move a paused clock forward. No-op while free running.
    pub fn advance_by(&mut self, by: Duration) {
        if self.is_paused() {
            self.base = self.base + by;
        }
    }

    /// Move a paused clock to `to` if that is later than now.
    pub fn advance_to(&mut self, to: VirtualTime) {
        if self.is_paused() && to > self.base {
            self.base = to;
        }
    }
}

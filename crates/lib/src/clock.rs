//! Physical time for the hybrid logical clock.
//!
//! A [`Clock`] yields [`WallTime`] readings: milliseconds since the Unix
//! epoch, already confined to the 48 bits a [`Timestamp`](crate::Timestamp)
//! reserves for them. Replicas read [`SystemClock`]; tests and simulations
//! share a [`ManualClock`] so that time only moves when they say so.
//!
//! ```
//! use arbor::{Clock, ManualClock};
//!
//! let clock = ManualClock::new(1_000);
//! assert_eq!(clock.wall_time().as_millis(), 1_000);
//! assert_eq!(clock.wall_time().as_millis(), 1_001);
//!
//! let _frozen = clock.freeze();
//! assert_eq!(clock.wall_time(), clock.wall_time());
//! ```

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::DateTime;

/// Physical part of an HLC timestamp, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct WallTime(u64);

impl WallTime {
    /// Width of the physical field.
    pub const BITS: u32 = 48;

    /// Latest representable instant, in the year 10889.
    pub const MAX: WallTime = WallTime((1 << Self::BITS) - 1);

    /// Readings beyond [`WallTime::MAX`] saturate rather than wrap, so a
    /// broken system clock can stall the physical field but never rewind it.
    pub fn from_millis(millis: u64) -> Self {
        Self(millis.min(Self::MAX.0))
    }

    /// `None` if `millis` does not fit in 48 bits.
    pub fn try_from_millis(millis: u64) -> Option<Self> {
        (millis <= Self::MAX.0).then_some(Self(millis))
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// RFC 3339 rendering for heartbeats and logs.
    pub fn to_rfc3339(self) -> String {
        DateTime::from_timestamp_millis(self.0 as i64)
            .unwrap_or_default()
            .to_rfc3339()
    }
}

/// Source of physical time for a replica.
pub trait Clock: Send + Sync + Debug {
    fn wall_time(&self) -> WallTime;
}

/// The operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_time(&self) -> WallTime {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        WallTime::from_millis(millis)
    }
}

/// Manually driven clock.
///
/// Every reading returns the current instant and then moves it forward by
/// the step, one millisecond unless configured otherwise. While a
/// [`Frozen`] guard is alive readings repeat, which forces successive HLC
/// ticks into one millisecond and onto the logical counter. [`set`] may move
/// time backwards to model wall-clock skew between replicas or restarts.
///
/// One instance is typically shared by every replica of a simulation, so a
/// seeded run replays identically.
///
/// [`set`]: ManualClock::set
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
    step: u64,
    freezes: AtomicUsize,
}

/// Keeps a [`ManualClock`] from advancing until dropped. Guards nest.
#[must_use = "the clock thaws as soon as the guard is dropped"]
pub struct Frozen<'a>(&'a ManualClock);

impl Drop for Frozen<'_> {
    fn drop(&mut self) {
        self.0.freezes.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ManualClock {
    /// 2024-01-01T00:00:00Z
    pub const DEFAULT_START: u64 = 1_704_067_200_000;

    pub fn new(start_millis: u64) -> Self {
        Self::with_step(start_millis, 1)
    }

    /// A clock that advances `step` milliseconds per reading.
    pub fn with_step(start_millis: u64, step: u64) -> Self {
        Self {
            now: AtomicU64::new(WallTime::from_millis(start_millis).as_millis()),
            step,
            freezes: AtomicUsize::new(0),
        }
    }

    pub fn freeze(&self) -> Frozen<'_> {
        self.freezes.fetch_add(1, Ordering::SeqCst);
        Frozen(self)
    }

    pub fn is_frozen(&self) -> bool {
        self.freezes.load(Ordering::SeqCst) > 0
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    /// Current instant, without consuming a reading.
    pub fn peek(&self) -> WallTime {
        WallTime::from_millis(self.now.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Self::DEFAULT_START)
    }
}

impl Clock for ManualClock {
    fn wall_time(&self) -> WallTime {
        let millis = if self.is_frozen() {
            self.now.load(Ordering::SeqCst)
        } else {
            self.now.fetch_add(self.step, Ordering::SeqCst)
        };
        WallTime::from_millis(millis)
    }
}

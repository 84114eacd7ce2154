//! Hybrid logical clock.
//!
//! A [`Timestamp`] packs a 48-bit physical time (milliseconds since the Unix
//! epoch) with a 16-bit logical counter into a single `u64`, so timestamps
//! compare with plain integer ordering. [`HybridLogicalClock`] owns the
//! latest value for one replica and advances it under a mutex.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, WallTime};

const COUNTER_BITS: u32 = 64 - WallTime::BITS;
const MAX_COUNTER: u64 = (1 << COUNTER_BITS) - 1;

/// A totally ordered HLC timestamp.
///
/// Serialised as a bare integer, which is also its wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The smallest timestamp. Used as the sync cursor for unseen replicas.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Largest counter value before the physical field is bumped.
    pub const MAX_COUNTER: u16 = MAX_COUNTER as u16;

    /// Pack a physical time and counter. The physical part saturates at
    /// [`WallTime::MAX`].
    pub fn new(physical: u64, counter: u16) -> Self {
        Self::from_parts(WallTime::from_millis(physical), counter)
    }

    pub fn from_parts(physical: WallTime, counter: u16) -> Self {
        Self((physical.as_millis() << COUNTER_BITS) | counter as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Milliseconds since the Unix epoch.
    pub fn physical(self) -> u64 {
        self.0 >> COUNTER_BITS
    }

    pub fn counter(self) -> u16 {
        (self.0 & MAX_COUNTER) as u16
    }

    /// Next local timestamp given the current wall time.
    ///
    /// The result is strictly greater than `self`.
    pub fn tick(self, wall: WallTime) -> Self {
        let physical = self.physical();
        if wall.as_millis() > physical {
            return Self::from_parts(wall, 0);
        }
        Self::bumped(physical, self.counter() as u64 + 1)
    }

    /// Merge a remote timestamp into `self` given the current wall time.
    ///
    /// The result is strictly greater than both `self` and `remote`.
    pub fn receive(self, remote: Timestamp, wall: WallTime) -> Self {
        let wall = wall.as_millis();
        let local_physical = self.physical();
        let remote_physical = remote.physical();
        let physical = local_physical.max(remote_physical).max(wall);

        let counter = if physical == local_physical && physical == remote_physical {
            self.counter().max(remote.counter()) as u64 + 1
        } else if physical == local_physical {
            self.counter() as u64 + 1
        } else if physical == remote_physical {
            remote.counter() as u64 + 1
        } else {
            0
        };

        Self::bumped(physical, counter)
    }

    /// Counter overflow advances physical time by one millisecond.
    fn bumped(physical: u64, counter: u64) -> Self {
        if counter > MAX_COUNTER {
            Self::new(physical + 1, 0)
        } else {
            Self::new(physical, counter as u16)
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.physical(), self.counter())
    }
}

impl From<u64> for Timestamp {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

/// Per-replica hybrid logical clock.
///
/// Both [`tick`](Self::tick) and [`receive`](Self::receive) read the wall
/// clock and update the stored value inside one critical section, so
/// concurrent callers always observe a strictly increasing sequence.
#[derive(Debug)]
pub struct HybridLogicalClock {
    wall: Arc<dyn Clock>,
    latest: Mutex<Timestamp>,
}

impl HybridLogicalClock {
    /// Create a clock starting at the current wall time with counter 0.
    pub fn new(wall: Arc<dyn Clock>) -> Self {
        let start = Timestamp::from_parts(wall.wall_time(), 0);
        Self {
            wall,
            latest: Mutex::new(start),
        }
    }

    /// Produce a timestamp for a local event.
    pub fn tick(&self) -> Timestamp {
        let mut latest = self.latest.lock().expect("hlc mutex poisoned");
        let next = latest.tick(self.wall.wall_time());
        *latest = next;
        next
    }

    /// Fold a remote timestamp into the clock so later local events are
    /// causally after it.
    pub fn receive(&self, remote: Timestamp) -> Timestamp {
        let mut latest = self.latest.lock().expect("hlc mutex poisoned");
        let next = latest.receive(remote, self.wall.wall_time());
        *latest = next;
        next
    }

    /// The most recent value produced or received.
    pub fn latest(&self) -> Timestamp {
        *self.latest.lock().expect("hlc mutex poisoned")
    }

    /// The wall-time source backing this clock.
    pub fn wall(&self) -> &Arc<dyn Clock> {
        &self.wall
    }
}

//! Wall-clock source and the timestamp formats derived from it.

use std::cell::Cell;
use std::rc::Rc;

use chrono::{Local, NaiveDateTime, TimeDelta};

/// Snapshot directory names; sorts lexicographically in time order.
pub const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
/// Suffix of debug comparison dumps.
pub const DEBUG_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Human-readable form used in reports.
pub const DISPLAY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Source of local wall-clock time.
pub trait Clock {
    /// Current local time.
    fn now(&self) -> NaiveDateTime;
}

/// The system's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Manually driven clock for replays and tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<NaiveDateTime>,
}

impl ManualClock {
    /// Starts the clock at `start`.
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: TimeDelta) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> NaiveDateTime {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    fn now(&self) -> NaiveDateTime {
        (**self).now()
    }
}

/// Filesystem-safe, lexicographically sortable snapshot name.
pub fn snapshot_timestamp(at: NaiveDateTime) -> String {
    at.format(SNAPSHOT_TIMESTAMP_FORMAT).to_string()
}

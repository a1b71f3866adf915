//! Wall-clock abstraction.
//!
//! Every timestamp in the system is a `f64` of seconds since the Unix
//! epoch — that is the wire format, and it is what TTL arithmetic runs
//! on. Production code uses the system clock; tests build a manual clock
//! and advance it deterministically to drive expiry and route aging.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// A cloneable clock handle. Clones of a manual clock share the same
/// underlying instant, so advancing one advances them all.
#[derive(Debug, Clone)]
pub struct Clock(Source);

#[derive(Debug, Clone)]
enum Source {
    System,
    Manual(Arc<Mutex<f64>>),
}

impl Clock {
    /// The real system clock.
    pub fn system() -> Self {
        Clock(Source::System)
    }

    /// A manual clock starting at `start` seconds. Only moves when
    /// [`Clock::advance`] is called.
    pub fn manual(start: f64) -> Self {
        Clock(Source::Manual(Arc::new(Mutex::new(start))))
    }

    /// Current time in seconds since the Unix epoch.
    pub fn now(&self) -> f64 {
        match &self.0 {
            Source::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            Source::Manual(t) => *t.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Advance a manual clock by `secs`. No-op on the system clock.
    pub fn advance(&self, secs: f64) {
        if let Source::Manual(t) = &self.0 {
            *t.lock().unwrap_or_else(|e| e.into_inner()) += secs;
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::system()
    }
}

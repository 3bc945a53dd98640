use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of timestamps for beat timing and tempo throttling.
///
/// The analysis thread asks the clock once per frame. Implementations must be
/// `Send + Sync` so a single clock can be shared between the session and the
/// capture callback.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Horloge pilotée à la main, pour les tests et le rejeu déterministe.
///
/// Starts at the instant it was created and only moves when told to.
/// All state is atomic: zero-lock, `Send + Sync`.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use bw_core::clock::{Clock, ManualClock};
/// let clock = ManualClock::new();
/// let t0 = clock.now();
/// clock.advance(Duration::from_millis(500));
/// assert_eq!(clock.now() - t0, Duration::from_millis(500));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    /// Offset from `origin` in nanoseconds.
    offset_ns: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ns: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `delta`.
    #[inline]
    pub fn advance(&self, delta: Duration) {
        let ns = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        self.offset_ns.fetch_add(ns, Ordering::Relaxed);
    }

    /// Sets the elapsed time since the clock origin.
    #[inline]
    pub fn set_elapsed(&self, elapsed: Duration) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.offset_ns.store(ns, Ordering::Relaxed);
    }

    /// Instant the clock was created at.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Time elapsed since the clock origin.
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Relaxed))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

use embassy_time::{Duration, Instant};

/// Time source of the driver.
///
/// The driver is polled from a single thread of control and only ever needs the
/// current instant and a way to block for short periods while waiting for the
/// modem.
pub trait Clock {
    fn now(&self) -> Instant;

    fn delay(&self, duration: Duration);
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> Instant {
        T::now(self)
    }

    fn delay(&self, duration: Duration) {
        T::delay(self, duration)
    }
}

/// [`Clock`] backed by the global `embassy-time` driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn delay(&self, duration: Duration) {
        embassy_time::block_for(duration)
    }
}

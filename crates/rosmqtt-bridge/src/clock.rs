//! Time source for send stamps and latency measurement.

use parking_lot::Mutex;
use rosmqtt_types::Stamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Stamp;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Stamp {
        Stamp::now()
    }
}

/// A clock that only moves when told to.  Used for replay and in tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Stamp>,
}

impl ManualClock {
    pub fn new(start: Stamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, stamp: Stamp) {
        *self.now.lock() = stamp;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Stamp {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_reports_what_it_was_set_to() {
        let clock = ManualClock::new(Stamp::new(5, 0));
        assert_eq!(clock.now(), Stamp::new(5, 0));
        clock.set(Stamp::new(6, 1));
        assert_eq!(clock.now(), Stamp::new(6, 1));
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now().sec > 1_577_836_800);
    }
}

//! Bus timing for the LCD drivers.
//!
//! The HD44780 contract is expressed as a handful of fixed intervals plus a
//! per-node monotonic deadline. After a transfer the controller is busy for
//! a command-dependent recovery interval; the deadline marks the earliest
//! instant the next transfer may safely start.

use std::thread;
use std::time::{Duration, Instant};

/// Enable-line hold time around each strobe edge, in nanoseconds.
pub const ENABLE_PULSE_NS: u64 = 300;

/// Settle time after driving the RS/RW control lines, in nanoseconds.
pub const STATUS_SETUP_NS: u64 = 50;

/// Remaining wait above which the busy-poll path blind-sleeps to the
/// deadline instead of spinning through poll cycles. Only the reset-class
/// instructions leave a wait this long.
pub const POLL_SLEEP_THRESHOLD: Duration = Duration::from_micros(100);

/// Recovery interval selected for one completed transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DelayClass {
    /// Ordinary control instruction.
    Standard,
    /// CGRAM/DDRAM write; allows the address counter to index.
    Extended,
    /// Clear/home, the two reset-type instructions.
    Reset,
}

impl DelayClass {
    pub const fn recovery(self) -> Duration {
        match self {
            DelayClass::Standard => Duration::from_micros(37),
            // 37 us + 4 us for the address counter
            DelayClass::Extended => Duration::from_micros(41),
            DelayClass::Reset => Duration::from_micros(1520),
        }
    }

    /// Picks the recovery interval for a transferred byte.
    pub fn classify(rs: bool, byte: u8) -> DelayClass {
        if rs {
            DelayClass::Extended
        } else if byte & 0x3F <= 0x03 {
            DelayClass::Reset
        } else {
            DelayClass::Standard
        }
    }
}

/// Earliest monotonic instant the controller is assumed ready again.
///
/// Freshly created nodes are not busy; every completed write advances the
/// deadline, so it never moves backwards.
#[derive(Copy, Clone, Debug, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that is already in the past ("not busy").
    pub fn idle() -> Self {
        Deadline(None)
    }

    /// Stores `now + recovery` for the given class.
    pub fn record(&mut self, class: DelayClass) {
        self.0 = Some(Instant::now() + class.recovery());
    }

    /// Time left until the deadline, zero if it has passed.
    pub fn remaining(&self) -> Duration {
        match self.0 {
            Some(end) => end.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Sleeps until the deadline has truly passed.
    ///
    /// `thread::sleep` may wake early (a signal, say); the loop re-checks
    /// against the absolute instant and goes back to sleep until it is
    /// actually reached.
    pub fn sleep_until(&self) {
        let Some(end) = self.0 else {
            return;
        };
        loop {
            let now = Instant::now();
            if now >= end {
                return;
            }
            thread::sleep(end - now);
        }
    }
}

/// Sub-microsecond delay. Spin-waits, since a timed sleep of a few hundred
/// nanoseconds oversleeps by orders of magnitude.
pub fn delay_nanos(ns: u64) {
    let end = Instant::now() + Duration::from_nanos(ns);
    while Instant::now() < end {
        std::hint::spin_loop();
    }
}

/// Microsecond-scale delay.
pub fn delay_micros(us: u64) {
    thread::sleep(Duration::from_micros(us));
}

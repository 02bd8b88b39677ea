//! Shared collaborators threaded through every component constructor.

use alloc::sync::Arc;
use core::cell::Cell;

use critical_section::Mutex;

use crate::network_monitor::NetworkMonitor;
use crate::power::PowerSource;

/// Millisecond time source
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;

    /// Microsecond reading for timing short operations
    fn now_us(&self) -> u64 {
        self.now_ms().saturating_mul(1000)
    }
}

/// Clock backed by the embassy time driver
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        embassy_time::Instant::now().as_millis()
    }

    fn now_us(&self) -> u64 {
        embassy_time::Instant::now().as_micros()
    }
}

/// Clock that only moves when told to.
///
/// Used for simulation and host tests; 64-bit atomics are not available on
/// Xtensa so the counter sits behind a critical section.
pub struct ManualClock {
    now: Mutex<Cell<u64>>,
}

impl ManualClock {
    pub const fn new(start_ms: u64) -> Self {
        Self {
            now: Mutex::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        critical_section::with(|cs| self.now.borrow(cs).set(ms));
    }

    pub fn advance(&self, ms: u64) {
        critical_section::with(|cs| {
            let now = self.now.borrow(cs);
            now.set(now.get().saturating_add(ms));
        });
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        critical_section::with(|cs| self.now.borrow(cs).get())
    }
}

/// Application context, built once at startup
#[derive(Clone)]
pub struct BoardContext {
    pub network: Arc<dyn NetworkMonitor>,
    pub power: Arc<dyn PowerSource>,
    pub clock: Arc<dyn Clock>,
}

impl BoardContext {
    pub fn new(
        network: Arc<dyn NetworkMonitor>,
        power: Arc<dyn PowerSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            network,
            power,
            clock,
        }
    }

    /// Current time from the injected clock
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_ms(), 100);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
        assert_eq!(clock.now_us(), 10_000);
    }
}

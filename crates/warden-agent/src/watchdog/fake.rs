//! Fake watchdog device for tests and hardware-free runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use warden_common::{Result, WardenError};

use super::device::WatchdogDevice;

/// Timeout reported by the fake device
pub const FAKE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Counters {
    starts: AtomicU64,
    feeds: AtomicU64,
    disarms: AtomicU64,
    failing_feeds: AtomicBool,
}

/// Device that never reboots anything; counts calls instead
pub struct FakeWatchdog {
    start_ok: bool,
    timeout: Duration,
    open: bool,
    counters: Arc<Counters>,
}

/// Observer/controller for a boxed [`FakeWatchdog`]
#[derive(Debug, Clone)]
pub struct FakeWatchdogHandle {
    counters: Arc<Counters>,
}

impl FakeWatchdog {
    /// `start_ok = false` makes every start attempt fail
    pub fn new(start_ok: bool) -> Self {
        Self {
            start_ok,
            timeout: FAKE_TIMEOUT,
            open: false,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Report `timeout` from start instead of [`FAKE_TIMEOUT`]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn handle(&self) -> FakeWatchdogHandle {
        FakeWatchdogHandle {
            counters: self.counters.clone(),
        }
    }
}

impl FakeWatchdogHandle {
    pub fn starts(&self) -> u64 {
        self.counters.starts.load(Ordering::SeqCst)
    }

    /// Device-level feed writes, including failed ones
    pub fn feeds(&self) -> u64 {
        self.counters.feeds.load(Ordering::SeqCst)
    }

    pub fn disarms(&self) -> u64 {
        self.counters.disarms.load(Ordering::SeqCst)
    }

    pub fn set_feed_failing(&self, failing: bool) {
        self.counters.failing_feeds.store(failing, Ordering::SeqCst);
    }
}

impl WatchdogDevice for FakeWatchdog {
    fn start(&mut self) -> Result<Duration> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        if !self.start_ok {
            return Err(WardenError::Watchdog("fake watchdog crash on start".to_string()));
        }
        self.open = true;
        Ok(self.timeout)
    }

    fn feed(&mut self) -> Result<()> {
        self.counters.feeds.fetch_add(1, Ordering::SeqCst);
        if !self.open {
            return Err(WardenError::WatchdogNotArmed);
        }
        if self.counters.failing_feeds.load(Ordering::SeqCst) {
            return Err(WardenError::Watchdog("fake feed failure".to_string()));
        }
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        self.counters.disarms.fetch_add(1, Ordering::SeqCst);
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

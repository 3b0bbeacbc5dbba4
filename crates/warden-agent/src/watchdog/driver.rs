//! Watchdog lifecycle and keep-alive loop.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use warden_common::{Result, WardenError, WatchdogState};

use super::device::WatchdogDevice;

/// Feed three times per timeout window
const FEEDS_PER_TIMEOUT: u32 = 3;

struct DriverInner {
    device: Box<dyn WatchdogDevice>,
    state: WatchdogState,
    timeout: Duration,
    last_feed: Option<Instant>,
    feed_count: u64,
    stop: Option<broadcast::Sender<()>>,
}

impl DriverInner {
    fn stop_feeding(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    fn feed_if_armed(&mut self) {
        if self.state != WatchdogState::Armed {
            return;
        }
        match self.device.feed() {
            Ok(()) => {
                self.last_feed = Some(Instant::now());
                self.feed_count += 1;
            }
            Err(e) => error!(error = %e, "Failed to feed watchdog"),
        }
    }

    /// A device that can't report a timeout is released rather than left
    /// counting with nobody feeding it.
    fn reject_zero_timeout(&mut self) -> WardenError {
        if let Err(e) = self.device.disarm() {
            error!(error = %e, "Failed to release watchdog with zero timeout");
        }
        self.state = WatchdogState::Malfunctioning;
        error!("Watchdog device reported a zero timeout");
        WardenError::Watchdog("device reported a zero timeout".to_string())
    }
}

/// Owns the hardware timer and keeps it fed while armed.
///
/// All transitions happen under one lock, so a `disarm` or `reset` never
/// interleaves with a feed in progress; it takes effect on the next cycle.
/// Dropping an armed driver stops feeding and lets the timer expire.
#[derive(Clone)]
pub struct WatchdogDriver {
    inner: Arc<Mutex<DriverInner>>,
}

impl WatchdogDriver {
    pub fn new(device: Box<dyn WatchdogDevice>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DriverInner {
                device,
                state: WatchdogState::Disarmed,
                timeout: Duration::ZERO,
                last_feed: None,
                feed_count: 0,
                stop: None,
            })),
        }
    }

    /// Arm the device and begin feeding it. Returns the device timeout.
    ///
    /// Calling this on an armed driver returns the current timeout and
    /// does not start a second keep-alive loop.
    pub fn start(&self) -> Result<Duration> {
        let mut inner = self.inner.lock();
        if inner.state == WatchdogState::Armed {
            warn!("Watchdog already armed, ignoring start");
            return Ok(inner.timeout);
        }

        let handle = current_runtime()?;
        match inner.device.start() {
            Ok(timeout) if timeout.is_zero() => Err(inner.reject_zero_timeout()),
            Ok(timeout) => {
                inner.timeout = timeout;
                inner.state = WatchdogState::Armed;
                self.spawn_keep_alive(&mut inner, &handle);
                info!(timeout_secs = timeout.as_secs_f64(), "Watchdog armed");
                Ok(timeout)
            }
            Err(e) => {
                inner.state = WatchdogState::Malfunctioning;
                error!(error = %e, "Failed to start watchdog");
                Err(e)
            }
        }
    }

    /// Stop feeding and disarm the device. A no-op unless armed.
    pub fn disarm(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.stop_feeding();
        if inner.state != WatchdogState::Armed {
            return Ok(());
        }

        match inner.device.disarm() {
            Ok(()) => {
                inner.state = WatchdogState::Disarmed;
                info!("Watchdog disarmed");
                Ok(())
            }
            Err(e) => {
                // The timer is still counting and nobody feeds it anymore.
                inner.state = WatchdogState::Malfunctioning;
                error!(error = %e, "Failed to disarm watchdog");
                Err(e)
            }
        }
    }

    /// Re-arm after a disarm. A no-op if already armed.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == WatchdogState::Armed {
            debug!("Watchdog already armed, ignoring reset");
            return Ok(());
        }

        let handle = current_runtime()?;
        inner.stop_feeding();
        if !inner.device.is_open() {
            match inner.device.start() {
                Ok(timeout) if !timeout.is_zero() => inner.timeout = timeout,
                Ok(_) => return Err(inner.reject_zero_timeout()),
                Err(e) => {
                    inner.state = WatchdogState::Malfunctioning;
                    error!(error = %e, "Failed to re-arm watchdog");
                    return Err(e);
                }
            }
        }

        inner.state = WatchdogState::Armed;
        self.spawn_keep_alive(&mut inner, &handle);
        info!(timeout_secs = inner.timeout.as_secs_f64(), "Watchdog re-armed");
        Ok(())
    }

    /// Feed the device once. The keep-alive loop does this on its own;
    /// this exists for callers that need an immediate kick.
    pub fn feed(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != WatchdogState::Armed {
            return Err(WardenError::WatchdogNotArmed);
        }
        inner.device.feed()?;
        inner.last_feed = Some(Instant::now());
        inner.feed_count += 1;
        Ok(())
    }

    pub fn status(&self) -> WatchdogState {
        self.inner.lock().state
    }

    /// Zero until the device has been started
    pub fn timeout(&self) -> Duration {
        self.inner.lock().timeout
    }

    pub fn last_feed_time(&self) -> Option<Instant> {
        self.inner.lock().last_feed
    }

    /// Successful feeds since construction
    pub fn feed_count(&self) -> u64 {
        self.inner.lock().feed_count
    }

    fn spawn_keep_alive(&self, inner: &mut DriverInner, handle: &Handle) {
        let (stop_tx, mut stop_rx) = broadcast::channel::<()>(1);
        inner.stop = Some(stop_tx);

        let period = keep_alive_period(inner.timeout);
        let weak: Weak<Mutex<DriverInner>> = Arc::downgrade(&self.inner);

        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.lock().feed_if_armed();
                    }
                }
            }
            debug!("Watchdog keep-alive loop stopped");
        });
    }
}

fn keep_alive_period(timeout: Duration) -> Duration {
    (timeout / FEEDS_PER_TIMEOUT).max(Duration::from_millis(1))
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|e| WardenError::NoRuntime(e.to_string()))
}

//! Watchdog devices.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use warden_common::{Result, WardenError};

/// Low-level reboot timer. Calls are serialized by the driver's lock.
pub trait WatchdogDevice: Send + 'static {
    /// Open and arm the timer, returning the timeout it runs with
    fn start(&mut self) -> Result<Duration>;

    /// One keep-alive write
    fn feed(&mut self) -> Result<()>;

    /// Stop the timer and release it
    fn disarm(&mut self) -> Result<()>;

    /// Whether the timer is currently held open
    fn is_open(&self) -> bool;
}

/// Linux `/dev/watchdog` style device.
///
/// Opening the device arms it; any write feeds it; writing the magic
/// character `V` before closing disarms it (unless the driver was built
/// with `nowayout`). The timeout is read from sysfs.
pub struct LinuxWatchdog {
    path: PathBuf,
    file: Option<File>,
}

impl LinuxWatchdog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WatchdogDevice for LinuxWatchdog {
    fn start(&mut self) -> Result<Duration> {
        if self.file.is_some() {
            return Err(WardenError::Watchdog(format!(
                "{} is already open",
                self.path.display()
            )));
        }

        // Read the timeout before opening: opening starts the countdown.
        let sysfs = sysfs_timeout_path(&self.path);
        let raw = std::fs::read_to_string(&sysfs).map_err(|e| {
            WardenError::Watchdog(format!("failed to read {}: {e}", sysfs.display()))
        })?;
        let timeout = parse_timeout(&raw)?;

        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                WardenError::Watchdog(format!("failed to open {}: {e}", self.path.display()))
            })?;
        self.file = Some(file);

        Ok(timeout)
    }

    fn feed(&mut self) -> Result<()> {
        let file = self.file.as_mut().ok_or(WardenError::WatchdogNotArmed)?;
        file.write_all(b"1")
            .and_then(|()| file.flush())
            .map_err(|e| WardenError::Watchdog(format!("feed failed: {e}")))
    }

    fn disarm(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.write_all(b"V")
            .and_then(|()| file.flush())
            .map_err(|e| WardenError::Watchdog(format!("magic close failed: {e}")))
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

/// `/dev/watchdog` is an alias of `watchdog0`
fn sysfs_timeout_path(device: &Path) -> PathBuf {
    let name = device
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("watchdog");
    let name = if name == "watchdog" { "watchdog0" } else { name };
    PathBuf::from("/sys/class/watchdog").join(name).join("timeout")
}

fn parse_timeout(raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|e| WardenError::Watchdog(format!("invalid timeout {raw:?}: {e}")))?;
    if secs == 0 {
        return Err(WardenError::Watchdog("device reports a zero timeout".to_string()));
    }
    Ok(Duration::from_secs(secs))
}

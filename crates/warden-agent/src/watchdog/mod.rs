//! Hardware watchdog handling.
//!
//! While armed, the driver feeds the device every third of its timeout.
//! If the process stops feeding (hang, crash, or deliberate withholding),
//! the device reboots the node.

mod device;
mod driver;
mod fake;

pub use device::{LinuxWatchdog, WatchdogDevice};
pub use driver::WatchdogDriver;
pub use fake::{FAKE_TIMEOUT, FakeWatchdog, FakeWatchdogHandle};

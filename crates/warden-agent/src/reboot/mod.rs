//! Safe reboot time: how long the cluster waits before assuming a
//! suspect node has been rebooted by its watchdog.

mod calculator;

pub use calculator::{
    BatchRatchet, SafeTimeCalculator, SafetyConfiguration, batches_for_workers,
    floor_to_secs, min_time_to_assume_rebooted, should_overwrite_floor,
};

//! Scheduler configuration parameters.
//!
//! All tunable parameters for the control loop.  The embedding application
//! builds one of these at startup and hands it to
//! [`Scheduler::new`](crate::scheduler::Scheduler::new); the values are fixed
//! for the scheduler's lifetime (command periods are converted to whole ticks
//! at registration time).

use serde::{Deserialize, Serialize};

/// Core scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    // --- Timing ---
    /// Control loop tick period (milliseconds).  The external driver must
    /// call [`Scheduler::tick`](crate::scheduler::Scheduler::tick) once per
    /// this period; the scheduler performs no timing of its own.
    pub tick_period_ms: u32,

    // --- Dispatch ---
    /// Whether subsystems with an empty command stack automatically start
    /// their default command each tick.  Disabled in the bench/test
    /// operating mode, where commands are only ever started explicitly.
    pub dispatch_default_commands: bool,
    /// Initial state of the global trigger-polling switch.
    pub triggers_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 20, // 50 Hz
            dispatch_default_commands: true,
            triggers_enabled: true,
        }
    }
}

//! Command lifecycle: the base unit of periodic work.
//!
//! A command is a user-authored lifecycle object plus registration metadata
//! (period, timeout, interrupt policy, required subsystem).  While in flight
//! it is driven by an explicit run state machine advanced once per scheduler
//! tick:
//!
//! ```text
//!              start()
//!   Idle ───────────────▶ Owning ──────▶ Completed / Cancelled
//!                          │   ▲          ▲
//!               displaced  │   │ top      │ cancel / fault /
//!               (Suspend)  ▼   │ again    │ timeout / finished
//!                         Suspended ──────┘
//! ```
//!
//! Each due iteration: inspect the owning subsystem's stack top, run
//! `execute()` if owning (or subsystem-less), otherwise apply the interrupt
//! policy.  Cancellation is checked every tick, as is a suspended command's
//! poll for regained ownership; the work body and the displacement check
//! run on the command's own period.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::subsystem::SubsystemId;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Handle to a registered command.  Serializable so the reporting bridge can
/// round-trip it (read an active-set snapshot, post a cancel list back).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(pub(crate) u32);

impl CommandId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Lifecycle hooks
// ---------------------------------------------------------------------------

/// User-authored command behaviour.
///
/// Every hook except [`is_finished`](Command::is_finished) is fallible: an
/// `Err` is caught at the command-loop boundary, logged with the command's
/// name, and treated as an ordinary termination — it never propagates out of
/// the control loop or affects other commands.
pub trait Command {
    /// Called once when the command starts running.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// The work body.  Runs once per command period while the command owns
    /// its subsystem (or has none).
    fn execute(&mut self) -> Result<()> {
        Ok(())
    }

    /// Returns true when the command is ready to terminate.  Checked after
    /// each completed iteration.
    fn is_finished(&mut self) -> bool;

    /// Called exactly once per start, on every exit path.
    fn end(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when another command acquires this command's subsystem, to
    /// allow pre-transition cleanup.  Only reached under
    /// [`InterruptPolicy::Suspend`].
    fn interrupted(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when a suspended command regains its subsystem and is brought
    /// back to the foreground.
    fn resumed(&mut self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Policies and statuses
// ---------------------------------------------------------------------------

/// What a command does when another command takes over its subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptPolicy {
    /// Cancel immediately on displacement.
    #[default]
    Terminate,
    /// Run `interrupted()`, wait for the displacing command to finish, then
    /// `resumed()` and continue.
    Suspend,
}

/// Externally visible execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    /// Registered but never started (or reset).
    Idle,
    /// In flight and owning its subsystem (or subsystem-less).
    Running,
    /// In flight but displaced; waiting to regain its subsystem.
    Suspended,
    /// Exited via `is_finished()`, timeout, or a hook fault.
    Completed,
    /// Exited via cancellation (external, policy-driven, or forced).
    Cancelled,
}

impl CommandStatus {
    /// True while the command is in flight (counts toward the active set).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Suspended)
    }
}

// ---------------------------------------------------------------------------
// Registration spec / builder
// ---------------------------------------------------------------------------

/// Default command period when none is given (one nominal control tick).
pub const DEFAULT_PERIOD_MS: u32 = 20;

/// Everything needed to register a command.  Built fluently:
///
/// ```
/// use cmdloop::command::{CommandSpec, InterruptPolicy};
///
/// let spec = CommandSpec::wait_for("arm-settled", || true)
///     .period_ms(50)
///     .policy(InterruptPolicy::Suspend);
/// ```
pub struct CommandSpec {
    pub(crate) name: &'static str,
    pub(crate) hooks: Box<dyn Command>,
    pub(crate) period_ms: u32,
    pub(crate) timeout_ms: u32,
    pub(crate) policy: InterruptPolicy,
    pub(crate) subsystem: Option<SubsystemId>,
}

impl CommandSpec {
    /// Wrap a hand-authored [`Command`] implementation.
    pub fn new(name: &'static str, hooks: impl Command + 'static) -> Self {
        Self {
            name,
            hooks: Box::new(hooks),
            period_ms: DEFAULT_PERIOD_MS,
            timeout_ms: 0,
            policy: InterruptPolicy::default(),
            subsystem: None,
        }
    }

    /// Set the iteration period.  Rounded up to whole ticks at registration,
    /// minimum one tick.
    pub fn period_ms(mut self, ms: u32) -> Self {
        self.period_ms = ms;
        self
    }

    /// Set a timeout measured from start.  `0` disables (the default).
    /// Timeouts are incompatible with [`InterruptPolicy::Suspend`] and are
    /// ignored for such commands.
    pub fn timeout_ms(mut self, ms: u32) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Set the interrupt policy (default [`InterruptPolicy::Terminate`]).
    pub fn policy(mut self, policy: InterruptPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Associate the command with a subsystem.  Commands require at most one
    /// subsystem; a later call replaces the earlier one.
    pub fn require(mut self, subsystem: SubsystemId) -> Self {
        self.subsystem = Some(subsystem);
        self
    }

    // ── Factories ─────────────────────────────────────────────

    /// A command that runs `f` once and finishes.
    pub fn instant(name: &'static str, f: impl FnMut() + 'static) -> Self {
        Self::new(name, InstantCommand { f })
    }

    /// [`instant`](Self::instant) with a required subsystem.
    pub fn instant_on(
        name: &'static str,
        subsystem: SubsystemId,
        f: impl FnMut() + 'static,
    ) -> Self {
        Self::instant(name, f).require(subsystem)
    }

    /// A command with no work body that finishes once `predicate` is true.
    pub fn wait_for(name: &'static str, predicate: impl FnMut() -> bool + 'static) -> Self {
        Self::new(name, WaitForCommand { predicate })
    }

    /// A command that does nothing for `ms` milliseconds, then ends via its
    /// timeout.  Useful as a spacer in sequenced routines.
    pub fn delay(name: &'static str, ms: u32) -> Self {
        Self::new(name, NeverFinished).timeout_ms(ms)
    }

    /// A command that does nothing and finishes immediately.
    pub fn noop(name: &'static str) -> Self {
        Self::instant(name, || {})
    }
}

struct InstantCommand<F: FnMut()> {
    f: F,
}

impl<F: FnMut()> Command for InstantCommand<F> {
    fn execute(&mut self) -> Result<()> {
        (self.f)();
        Ok(())
    }

    fn is_finished(&mut self) -> bool {
        true
    }
}

struct WaitForCommand<P: FnMut() -> bool> {
    predicate: P,
}

impl<P: FnMut() -> bool> Command for WaitForCommand<P> {
    fn is_finished(&mut self) -> bool {
        (self.predicate)()
    }
}

struct NeverFinished;

impl Command for NeverFinished {
    fn is_finished(&mut self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Internal slot and run record
// ---------------------------------------------------------------------------

/// Phase of an in-flight run.  Termination is not a phase: the run record is
/// dropped and the terminal state lands in [`CommandSlot::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunPhase {
    /// Nominal: owning the subsystem (or subsystem-less), iterating.
    Owning,
    /// Displaced under the Suspend policy; polling for ownership each tick.
    Suspended,
}

/// Bookkeeping for one in-flight run.  Present iff the command is running.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunRecord {
    pub(crate) phase: RunPhase,
    pub(crate) started_tick: u64,
    /// Next tick on which the work iteration is due.
    pub(crate) next_due_tick: u64,
    /// Whether at least one iteration has run (the first runs
    /// unconditionally; exit conditions are only checked afterwards).
    pub(crate) ran_once: bool,
    /// Cooperative cancel request, observed at the next tick.
    pub(crate) cancel_requested: bool,
}

/// A registered command: hooks plus tick-converted metadata.
pub(crate) struct CommandSlot {
    pub(crate) name: &'static str,
    pub(crate) hooks: Box<dyn Command>,
    pub(crate) period_ticks: u64,
    /// 0 = no timeout.
    pub(crate) timeout_ticks: u64,
    pub(crate) policy: InterruptPolicy,
    pub(crate) subsystem: Option<SubsystemId>,
    pub(crate) status: CommandStatus,
    pub(crate) run: Option<RunRecord>,
}

/// Convert a period in milliseconds to whole ticks, rounding up, minimum 1.
pub(crate) fn period_ticks(period_ms: u32, tick_ms: u32) -> u64 {
    u64::from(period_ms.div_ceil(tick_ms.max(1)).max(1))
}

/// Convert a timeout in milliseconds to whole ticks.  0 stays 0 (disabled).
pub(crate) fn timeout_ticks(timeout_ms: u32, tick_ms: u32) -> u64 {
    if timeout_ms == 0 {
        0
    } else {
        period_ticks(timeout_ms, tick_ms)
    }
}

//! Subsystems: logical owners of contended resources.
//!
//! A subsystem arbitrates which command may act on it through a LIFO stack
//! of command handles — the top of the stack is the current owner, and only
//! the owner's `execute()` runs in a given tick.  Mutual exclusion is
//! structural (push on start, remove on termination), not lock-based.
//!
//! The optional default command is (re)started by the scheduler's per-tick
//! pump step whenever the stack is empty, so an idle drivetrain can fall
//! back to, say, a joystick-following command.

use serde::{Deserialize, Serialize};

use crate::command::CommandId;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Handle to a registered subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubsystemId(pub(crate) u32);

impl SubsystemId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Periodic hook
// ---------------------------------------------------------------------------

/// User-authored subsystem behaviour.
pub trait Subsystem {
    /// Runs once per scheduler tick, unconditionally and independently of
    /// command activity.  Intended for sensor refresh and bookkeeping.
    fn periodic(&mut self) {}
}

// ---------------------------------------------------------------------------
// Internal slot
// ---------------------------------------------------------------------------

/// A registered subsystem: hooks plus the command arbitration stack.
pub(crate) struct SubsystemSlot {
    pub(crate) name: &'static str,
    pub(crate) hooks: Box<dyn Subsystem>,
    /// LIFO contention stack; last element is the current owner.
    pub(crate) stack: Vec<CommandId>,
    pub(crate) default_command: Option<CommandId>,
}

impl SubsystemSlot {
    pub(crate) fn new(name: &'static str, hooks: Box<dyn Subsystem>) -> Self {
        Self {
            name,
            hooks,
            stack: Vec::new(),
            default_command: None,
        }
    }

    /// The command currently owning this subsystem, if any.
    pub(crate) fn owner(&self) -> Option<CommandId> {
        self.stack.last().copied()
    }

    /// Remove `id` wherever it sits in the stack (a suspended command
    /// terminates from below the top).
    pub(crate) fn detach(&mut self, id: CommandId) {
        self.stack.retain(|c| *c != id);
    }
}

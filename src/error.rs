//! Unified error types for the scheduler API surface.
//!
//! A single `Error` enum that every registry operation funnels into, keeping
//! the embedding application's error handling uniform.  All variants are
//! `Copy` so they can be cheaply returned from hot-path operations without
//! allocation.  Hook-level faults are a separate category: user lifecycle
//! hooks return `anyhow::Result` and are caught (never propagated) at the
//! command-loop boundary.

use core::fmt;

use crate::command::CommandId;
use crate::subsystem::SubsystemId;
use crate::trigger::TriggerId;

// ---------------------------------------------------------------------------
// Top-level scheduler error
// ---------------------------------------------------------------------------

/// Every fallible registry/lifecycle operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The command id does not name a registered command.
    UnknownCommand(CommandId),
    /// The subsystem id does not name a registered subsystem.
    UnknownSubsystem(SubsystemId),
    /// The trigger id does not name a registered trigger.
    UnknownTrigger(TriggerId),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand(id) => write!(f, "unknown command id {}", id.0),
            Self::UnknownSubsystem(id) => write!(f, "unknown subsystem id {}", id.0),
            Self::UnknownTrigger(id) => write!(f, "unknown trigger id {}", id.0),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias for registry operations.
pub type Result<T> = core::result::Result<T, Error>;

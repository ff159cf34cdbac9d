//! Cooperative command scheduler for fixed-period control loops.
//!
//! One `Scheduler` owns every registered command, subsystem, and trigger
//! and advances all of them from a single `tick()` call driven by the
//! host's periodic loop. Commands cooperate through subsystem ownership
//! stacks rather than preemption, so all hook code runs on the caller's
//! thread with no locking.

#![deny(unused_must_use)]

pub mod command;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod subsystem;
pub mod trigger;

//! Triggers: edge detection over boolean conditions.
//!
//! A trigger polls a boolean predicate once per scheduler tick and drives
//! its bound commands from the level transition:
//!
//! ```text
//!  (prev, cur)
//!  low → high   start on-press · flip toggle · cancel cancel-on-press
//!               · engage while-held
//!  high → high  restart while-held if it stopped (self-healing)
//!  high → low   cancel while-held · start on-release
//!  low → low    nothing
//! ```
//!
//! The decision logic is a pure function over (edge state, current level,
//! hold-command activity) so it can be tested without a scheduler; the
//! scheduler maps the resulting [`EdgeActions`] onto start/cancel calls for
//! the bound command ids.  Poll order equals registration order, and a
//! single global switch on the scheduler freezes all polling without
//! destroying per-trigger state.

use serde::{Deserialize, Serialize};

use crate::command::CommandId;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Handle to a registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerId(pub(crate) u32);

impl TriggerId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// The up-to-five commands a trigger can drive.  Built fluently:
///
/// ```
/// use cmdloop::trigger::TriggerBindings;
/// # use cmdloop::command::CommandId;
/// # fn demo(shoot: CommandId, spool: CommandId) {
/// let bindings = TriggerBindings::new().on_press(shoot).while_held(spool);
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerBindings {
    pub on_press: Option<CommandId>,
    pub on_release: Option<CommandId>,
    pub while_held: Option<CommandId>,
    pub cancel_on_press: Option<CommandId>,
    pub toggle_on_press: Option<CommandId>,
}

impl TriggerBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start this command on a rising edge.
    pub fn on_press(mut self, id: CommandId) -> Self {
        self.on_press = Some(id);
        self
    }

    /// Start this command on a falling edge.
    pub fn on_release(mut self, id: CommandId) -> Self {
        self.on_release = Some(id);
        self
    }

    /// Run this command while the level is high; cancelled on release.
    pub fn while_held(mut self, id: CommandId) -> Self {
        self.while_held = Some(id);
        self
    }

    /// Cancel this command on a rising edge.
    pub fn cancel_on_press(mut self, id: CommandId) -> Self {
        self.cancel_on_press = Some(id);
        self
    }

    /// Alternate starting and cancelling this command on successive rising
    /// edges.
    pub fn toggle_on_press(mut self, id: CommandId) -> Self {
        self.toggle_on_press = Some(id);
        self
    }

    pub(crate) fn iter_bound(&self) -> impl Iterator<Item = CommandId> {
        [
            self.on_press,
            self.on_release,
            self.while_held,
            self.cancel_on_press,
            self.toggle_on_press,
        ]
        .into_iter()
        .flatten()
    }
}

// ---------------------------------------------------------------------------
// Edge-detection state machine
// ---------------------------------------------------------------------------

/// Per-trigger state.  Edge decisions depend only on (previous level,
/// current level) plus these two flags; triggers are otherwise independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EdgeState {
    pub(crate) prev: bool,
    pub(crate) hold_started: bool,
    pub(crate) toggle_on: bool,
}

/// What one poll decided.  The scheduler applies these to the bindings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EdgeActions {
    pub(crate) start_press: bool,
    pub(crate) start_release: bool,
    pub(crate) start_hold: bool,
    pub(crate) cancel_hold: bool,
    pub(crate) start_toggle: bool,
    pub(crate) cancel_toggle: bool,
    pub(crate) cancel_on_press: bool,
}

/// Advance the edge machine by one poll.
///
/// `hold_running` reports whether the bound while-held command is currently
/// active; on a sustained high level the machine re-requests a start only
/// when it is not (self-healing re-trigger, never a duplicate start).
pub(crate) fn edge_step(state: &mut EdgeState, level: bool, hold_running: bool) -> EdgeActions {
    let mut out = EdgeActions::default();

    match (state.prev, level) {
        // Rising edge.
        (false, true) => {
            out.start_press = true;
            if state.toggle_on {
                out.cancel_toggle = true;
            } else {
                out.start_toggle = true;
            }
            state.toggle_on = !state.toggle_on;
            out.cancel_on_press = true;
            state.hold_started = true;
            out.start_hold = true;
        }
        // Held.
        (true, true) => {
            if !state.hold_started {
                state.hold_started = true;
                out.start_hold = true;
            } else if !hold_running {
                out.start_hold = true;
            }
        }
        // Falling edge.
        (true, false) => {
            state.hold_started = false;
            out.cancel_hold = true;
            out.start_release = true;
        }
        // Idle.
        (false, false) => {}
    }

    state.prev = level;
    out
}

// ---------------------------------------------------------------------------
// Internal slot
// ---------------------------------------------------------------------------

/// A registered trigger: predicate, edge state, and bindings.
pub(crate) struct TriggerSlot {
    pub(crate) predicate: Box<dyn FnMut() -> bool>,
    pub(crate) state: EdgeState,
    pub(crate) bindings: TriggerBindings,
}

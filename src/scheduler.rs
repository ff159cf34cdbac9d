//! Scheduler engine: registries, the tick pump, and reaping.
//!
//! The scheduler is the single explicit context object of the crate.  It
//! owns every registry (subsystems, commands, triggers) and the active
//! command set, and is driven once per fixed control period by an external
//! runtime:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      tick() — once per period                │
//! │                                                              │
//! │  (a) subsystems, registration order:                         │
//! │        pump default command if stack empty → periodic()      │
//! │  (b) triggers, registration order (global enable switch)     │
//! │  (c) advance each active command due this tick               │
//! │  (d) reap: drop terminal/absent handles from the active set  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on the one control thread; there are no internally
//! managed timers or locks.  Mutual exclusion between commands is carried
//! entirely by the subsystem stacks' push/pop discipline.
//!
//! The active-set dirty flag and [`active_snapshot`](Scheduler::active_snapshot)
//! serve an external reporting bridge (a dashboard), which reads the flag,
//! takes a snapshot, clears the flag, and may post a cancel list back via
//! [`cancel_many`](Scheduler::cancel_many).

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::command::{
    CommandId, CommandSlot, CommandSpec, CommandStatus, InterruptPolicy, RunPhase, RunRecord,
    period_ticks, timeout_ticks,
};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::subsystem::{Subsystem, SubsystemId, SubsystemSlot};
use crate::trigger::{EdgeActions, EdgeState, TriggerBindings, TriggerId, TriggerSlot, edge_step};

// ═══════════════════════════════════════════════════════════════
//  Reporting snapshot
// ═══════════════════════════════════════════════════════════════

/// One row of the active-set snapshot consumed by the reporting bridge.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveCommandInfo {
    pub id: CommandId,
    pub name: &'static str,
    pub status: CommandStatus,
}

/// Names used when logging hook faults.
#[derive(Debug, Clone, Copy)]
enum HookKind {
    Initialize,
    Execute,
    Interrupted,
    Resumed,
}

impl HookKind {
    fn name(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Execute => "execute",
            Self::Interrupted => "interrupted",
            Self::Resumed => "resumed",
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

/// The scheduler engine.  Construct once, register everything during
/// application setup, then call [`tick`](Self::tick) once per control period.
pub struct Scheduler {
    config: SchedulerConfig,
    /// Registration order doubles as pump order.
    subsystems: Vec<Option<SubsystemSlot>>,
    commands: Vec<Option<CommandSlot>>,
    /// Registration order doubles as poll order.
    triggers: Vec<Option<TriggerSlot>>,
    /// Commands currently considered running, in start order.
    active: Vec<CommandId>,
    /// Set on any active-set membership change; cleared only by the
    /// reporting consumer.  Starts true so the first snapshot is taken.
    commands_changed: bool,
    triggers_enabled: bool,
    dispatch_defaults: bool,
    /// Ticks seen so far; all periods and timeouts are measured in these.
    tick_count: u64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let triggers_enabled = config.triggers_enabled;
        let dispatch_defaults = config.dispatch_default_commands;
        Self {
            config,
            subsystems: Vec::new(),
            commands: Vec::new(),
            triggers: Vec::new(),
            active: Vec::new(),
            commands_changed: true,
            triggers_enabled,
            dispatch_defaults,
            tick_count: 0,
        }
    }

    // ── Registration ──────────────────────────────────────────

    /// Register a subsystem.  Pump/periodic order equals registration order.
    pub fn register_subsystem(
        &mut self,
        name: &'static str,
        hooks: impl Subsystem + 'static,
    ) -> SubsystemId {
        let id = SubsystemId(self.subsystems.len() as u32);
        self.subsystems
            .push(Some(SubsystemSlot::new(name, Box::new(hooks))));
        info!("registered subsystem '{name}'");
        id
    }

    /// Deregister a subsystem, cancelling every command on its stack first.
    /// Commands still requiring the id are cancelled when next advanced.
    pub fn remove_subsystem(&mut self, id: SubsystemId) -> Result<()> {
        let name = self
            .subsystem_ref(id)
            .ok_or(Error::UnknownSubsystem(id))?
            .name;
        self.reset_queue(id);
        if let Some(slot) = self.subsystems.get_mut(id.index()) {
            *slot = None;
        }
        info!("removed subsystem '{name}'");
        Ok(())
    }

    /// Register a command from its spec.  The period and timeout are
    /// converted to whole ticks here and fixed for the registration's
    /// lifetime.
    pub fn register_command(&mut self, spec: CommandSpec) -> Result<CommandId> {
        let CommandSpec {
            name,
            hooks,
            period_ms,
            timeout_ms,
            policy,
            subsystem,
        } = spec;

        if let Some(sid) = subsystem {
            if self.subsystem_ref(sid).is_none() {
                return Err(Error::UnknownSubsystem(sid));
            }
        }

        let tick_ms = self.config.tick_period_ms;
        let id = CommandId(self.commands.len() as u32);
        self.commands.push(Some(CommandSlot {
            name,
            hooks,
            period_ticks: period_ticks(period_ms, tick_ms),
            timeout_ticks: timeout_ticks(timeout_ms, tick_ms),
            policy,
            subsystem,
            status: CommandStatus::Idle,
            run: None,
        }));
        info!("registered command '{name}'");
        Ok(id)
    }

    /// Deregister a command, cancelling it if running.  Default-command
    /// references to it are cleared.
    pub fn remove_command(&mut self, id: CommandId) -> Result<()> {
        let name = self.command_ref(id).ok_or(Error::UnknownCommand(id))?.name;
        self.finish(id, CommandStatus::Cancelled);
        for sub in self.subsystems.iter_mut().flatten() {
            if sub.default_command == Some(id) {
                sub.default_command = None;
            }
        }
        self.active.retain(|c| *c != id);
        if let Some(slot) = self.commands.get_mut(id.index()) {
            *slot = None;
        }
        info!("removed command '{name}'");
        Ok(())
    }

    /// Register a trigger over `predicate`.  Every bound command id must
    /// already be registered.  Poll order equals registration order.
    pub fn register_trigger(
        &mut self,
        predicate: impl FnMut() -> bool + 'static,
        bindings: TriggerBindings,
    ) -> Result<TriggerId> {
        for cid in bindings.iter_bound() {
            if self.command_ref(cid).is_none() {
                return Err(Error::UnknownCommand(cid));
            }
        }
        let id = TriggerId(self.triggers.len() as u32);
        self.triggers.push(Some(TriggerSlot {
            predicate: Box::new(predicate),
            state: EdgeState::default(),
            bindings,
        }));
        Ok(id)
    }

    /// Deregister a trigger.  Its bound commands are left as they are.
    pub fn remove_trigger(&mut self, id: TriggerId) -> Result<()> {
        match self.triggers.get_mut(id.index()) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(Error::UnknownTrigger(id)),
        }
    }

    /// Set the command the pump step starts whenever `sid`'s stack is empty.
    /// The default should itself require `sid`, otherwise it never claims
    /// the stack and the pump would restart it forever.
    pub fn set_default_command(&mut self, sid: SubsystemId, cid: CommandId) -> Result<()> {
        let owner = self.command_ref(cid).ok_or(Error::UnknownCommand(cid))?.subsystem;
        if owner != Some(sid) {
            warn!("default command for subsystem {sid:?} does not require it");
        }
        let sub = self
            .subsystem_mut(sid)
            .ok_or(Error::UnknownSubsystem(sid))?;
        sub.default_command = Some(cid);
        Ok(())
    }

    // ── Command lifecycle ─────────────────────────────────────

    /// Begin execution.  A no-op if the command is already running.
    ///
    /// Pushes the command onto its subsystem's stack (making it the new
    /// owner), adds it to the active set, and runs `initialize()`.  The
    /// first work iteration happens during the current/next tick's advance
    /// phase.
    pub fn start(&mut self, id: CommandId) -> Result<()> {
        let slot = self.command_ref(id).ok_or(Error::UnknownCommand(id))?;
        if slot.run.is_some() {
            return Ok(());
        }
        let name = slot.name;
        let subsystem = slot.subsystem;

        if let Some(sid) = subsystem {
            let sub = self
                .subsystem_mut(sid)
                .ok_or(Error::UnknownSubsystem(sid))?;
            sub.stack.push(id);
        }

        let now = self.tick_count;
        if let Some(slot) = self.command_mut(id) {
            slot.status = CommandStatus::Running;
            slot.run = Some(RunRecord {
                phase: RunPhase::Owning,
                started_tick: now,
                next_due_tick: now,
                ran_once: false,
                cancel_requested: false,
            });
        }
        self.active.push(id);
        self.commands_changed = true;
        info!("command '{name}' started");

        // A fault here terminates the run before its first iteration.
        let _ = self.run_hook(id, HookKind::Initialize);
        Ok(())
    }

    /// Request cooperative cancellation.  Always succeeds, whether or not
    /// the command is running; observed at the command's next tick.
    pub fn cancel(&mut self, id: CommandId) {
        if let Some(slot) = self.command_mut(id) {
            let name = slot.name;
            if let Some(run) = slot.run.as_mut() {
                if !run.cancel_requested {
                    run.cancel_requested = true;
                    debug!("command '{name}' cancel requested");
                }
            }
        }
    }

    /// True while the command is in flight (including suspended).
    pub fn is_running(&self, id: CommandId) -> bool {
        self.command_ref(id).is_some_and(|s| s.run.is_some())
    }

    /// Current execution status, or `None` for an unknown id.
    pub fn status(&self, id: CommandId) -> Option<CommandStatus> {
        self.command_ref(id).map(|s| s.status)
    }

    // ── Tick ──────────────────────────────────────────────────

    /// Run one control period.  The external driver must call this once per
    /// [`SchedulerConfig::tick_period_ms`] from a single, consistent thread.
    pub fn tick(&mut self) {
        self.tick_count += 1;

        // (a) Subsystems: pump default commands, then periodic hooks.
        for idx in 0..self.subsystems.len() {
            let pump = if self.dispatch_defaults {
                match &self.subsystems[idx] {
                    Some(sub) if sub.stack.is_empty() => sub.default_command,
                    _ => None,
                }
            } else {
                None
            };
            if let Some(default) = pump {
                if let Err(err) = self.start(default) {
                    warn!("default command dispatch failed: {err}");
                }
            }
            if let Some(sub) = self.subsystems.get_mut(idx).and_then(Option::as_mut) {
                sub.hooks.periodic();
            }
        }

        // (b) Triggers.
        if self.triggers_enabled {
            self.poll_triggers();
        }

        // (c) Advance commands in start order.
        let active = self.active.clone();
        for id in active {
            self.advance_command(id);
        }

        // (d) Reap.
        self.reap();
    }

    /// Ticks seen so far.
    pub fn ticks(&self) -> u64 {
        self.tick_count
    }

    // ── Global operations ─────────────────────────────────────

    /// Force-cancel every active command.  The active set is empty on
    /// return; every subsystem stack is empty.
    pub fn kill_all_commands(&mut self) {
        info!("killing all commands");
        for idx in 0..self.subsystems.len() {
            self.reset_queue(SubsystemId(idx as u32));
        }
        // Subsystem-less commands are not on any stack; sweep the active
        // set directly.
        for id in self.active.clone() {
            self.finish(id, CommandStatus::Cancelled);
        }
        self.reap();
    }

    /// Cancel every command on the subsystem's stack and empty it.
    pub fn reset_command_queue(&mut self, id: SubsystemId) -> Result<()> {
        if self.subsystem_ref(id).is_none() {
            return Err(Error::UnknownSubsystem(id));
        }
        self.reset_queue(id);
        Ok(())
    }

    /// Cancel everything and clear all registries back to empty.  Ids
    /// handed out before the reset are invalid afterwards.
    pub fn reset(&mut self) {
        self.kill_all_commands();
        self.subsystems.clear();
        self.commands.clear();
        self.triggers.clear();
        self.active.clear();
        self.tick_count = 0;
        self.triggers_enabled = self.config.triggers_enabled;
        self.dispatch_defaults = self.config.dispatch_default_commands;
        self.commands_changed = true;
        info!("scheduler reset");
    }

    /// Freeze or resume all trigger polling.  Per-trigger edge state is
    /// preserved; resuming continues from each trigger's last recorded
    /// level.
    pub fn set_triggers_enabled(&mut self, enabled: bool) {
        self.triggers_enabled = enabled;
    }

    /// Enable or disable the default-command pump step (bench/test mode).
    pub fn set_default_dispatch(&mut self, enabled: bool) {
        self.dispatch_defaults = enabled;
    }

    // ── Reporting bridge ──────────────────────────────────────

    /// Whether the active set's membership changed since the flag was last
    /// cleared.
    pub fn commands_changed(&self) -> bool {
        self.commands_changed
    }

    /// Cleared by the reporting consumer after it takes a snapshot.
    pub fn clear_commands_changed(&mut self) {
        self.commands_changed = false;
    }

    /// Snapshot of the active set, in start order.
    pub fn active_snapshot(&self) -> Vec<ActiveCommandInfo> {
        self.active
            .iter()
            .filter_map(|id| {
                self.command_ref(*id).map(|slot| ActiveCommandInfo {
                    id: *id,
                    name: slot.name,
                    status: slot.status,
                })
            })
            .collect()
    }

    /// Cancel exactly those active commands whose ids appear in `ids`.
    /// Unknown or inactive ids are ignored.
    pub fn cancel_many(&mut self, ids: &[CommandId]) {
        for &id in ids {
            self.cancel(id);
        }
    }

    /// The subsystem's contention stack, bottom to top.
    pub fn command_queue(&self, id: SubsystemId) -> Result<Vec<CommandId>> {
        self.subsystem_ref(id)
            .map(|sub| sub.stack.clone())
            .ok_or(Error::UnknownSubsystem(id))
    }

    // ═══════════════════════════════════════════════════════════
    //  Internal
    // ═══════════════════════════════════════════════════════════

    fn command_ref(&self, id: CommandId) -> Option<&CommandSlot> {
        self.commands.get(id.index()).and_then(Option::as_ref)
    }

    fn command_mut(&mut self, id: CommandId) -> Option<&mut CommandSlot> {
        self.commands.get_mut(id.index()).and_then(Option::as_mut)
    }

    fn subsystem_ref(&self, id: SubsystemId) -> Option<&SubsystemSlot> {
        self.subsystems.get(id.index()).and_then(Option::as_ref)
    }

    fn subsystem_mut(&mut self, id: SubsystemId) -> Option<&mut SubsystemSlot> {
        self.subsystems.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Advance one command's run state machine by one tick.
    ///
    /// Cancellation and the Suspended-phase ownership poll happen every
    /// tick; everything else in the Owning phase, including the
    /// displacement check, only on ticks where the command's own period
    /// has elapsed.
    fn advance_command(&mut self, id: CommandId) {
        let now = self.tick_count;

        let Some(slot) = self.command_ref(id) else {
            return;
        };
        let Some(run) = slot.run else { return };
        let policy = slot.policy;
        let period = slot.period_ticks;
        let timeout = slot.timeout_ticks;
        let subsystem = slot.subsystem;

        if run.cancel_requested {
            self.finish(id, CommandStatus::Cancelled);
            return;
        }

        match run.phase {
            RunPhase::Owning => {
                if now < run.next_due_tick {
                    return;
                }

                // Exit conditions are only evaluated once the first
                // iteration has run.
                if run.ran_once {
                    let finished = match self.command_mut(id) {
                        Some(s) => s.hooks.is_finished(),
                        None => return,
                    };
                    if finished {
                        self.finish(id, CommandStatus::Completed);
                        return;
                    }
                    // Timeouts are incompatible with the Suspend policy and
                    // ignored for such commands.
                    if timeout > 0
                        && policy == InterruptPolicy::Terminate
                        && now.saturating_sub(run.started_tick) >= timeout
                    {
                        self.finish(id, CommandStatus::Completed);
                        return;
                    }
                }

                let displaced = match subsystem {
                    None => false,
                    Some(sid) => match self.subsystem_ref(sid) {
                        Some(sub) => sub.owner() != Some(id),
                        None => {
                            warn!("command '{}' lost its subsystem", self.command_name(id));
                            self.finish(id, CommandStatus::Cancelled);
                            return;
                        }
                    },
                };

                if displaced {
                    match policy {
                        InterruptPolicy::Terminate => {
                            self.finish(id, CommandStatus::Cancelled);
                        }
                        InterruptPolicy::Suspend => {
                            if !self.run_hook(id, HookKind::Interrupted) {
                                return;
                            }
                            if let Some(slot) = self.command_mut(id) {
                                slot.status = CommandStatus::Suspended;
                                if let Some(run) = slot.run.as_mut() {
                                    run.phase = RunPhase::Suspended;
                                }
                            }
                            debug!("command '{}' suspended", self.command_name(id));
                        }
                    }
                    return;
                }

                if !self.run_hook(id, HookKind::Execute) {
                    return;
                }
                if let Some(slot) = self.command_mut(id) {
                    if let Some(run) = slot.run.as_mut() {
                        run.ran_once = true;
                        run.next_due_tick = now + period;
                    }
                }
            }

            RunPhase::Suspended => {
                // Checked every tick: the wait for ownership is unbounded
                // and ends the moment the displacing command finishes.
                let owning = match subsystem {
                    None => true,
                    Some(sid) => match self.subsystem_ref(sid) {
                        Some(sub) => sub.owner() == Some(id),
                        None => {
                            warn!("command '{}' lost its subsystem", self.command_name(id));
                            self.finish(id, CommandStatus::Cancelled);
                            return;
                        }
                    },
                };
                if !owning {
                    return;
                }
                if !self.run_hook(id, HookKind::Resumed) {
                    return;
                }
                if !self.run_hook(id, HookKind::Execute) {
                    return;
                }
                if let Some(slot) = self.command_mut(id) {
                    slot.status = CommandStatus::Running;
                    if let Some(run) = slot.run.as_mut() {
                        run.phase = RunPhase::Owning;
                        run.ran_once = true;
                        run.next_due_tick = now + period;
                    }
                }
                debug!("command '{}' resumed", self.command_name(id));
            }
        }
    }

    /// Single termination funnel: runs `end()` exactly once, detaches the
    /// command from its subsystem's stack, and records the terminal status.
    /// A no-op if the command is not in flight.
    fn finish(&mut self, id: CommandId, status: CommandStatus) {
        let Some(slot) = self.command_mut(id) else {
            return;
        };
        if slot.run.is_none() {
            return;
        }
        let name = slot.name;
        let subsystem = slot.subsystem;
        slot.run = None;
        slot.status = status;
        if let Err(err) = slot.hooks.end() {
            error!("command '{name}' end hook faulted: {err:#}");
        }

        if let Some(sid) = subsystem {
            if let Some(sub) = self.subsystem_mut(sid) {
                sub.detach(id);
            }
        }
        self.commands_changed = true;
        info!("command '{name}' finished: {status:?}");
    }

    /// Run one fallible hook.  On a fault: log with context, terminate the
    /// run, and return false.  Cancellation never flows through here and is
    /// never logged as an error.
    fn run_hook(&mut self, id: CommandId, hook: HookKind) -> bool {
        let result = match self.command_mut(id) {
            Some(slot) => match hook {
                HookKind::Initialize => slot.hooks.initialize(),
                HookKind::Execute => slot.hooks.execute(),
                HookKind::Interrupted => slot.hooks.interrupted(),
                HookKind::Resumed => slot.hooks.resumed(),
            },
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                error!(
                    "command '{}' {} hook faulted: {err:#}",
                    self.command_name(id),
                    hook.name()
                );
                self.finish(id, CommandStatus::Completed);
                false
            }
        }
    }

    fn command_name(&self, id: CommandId) -> &'static str {
        self.command_ref(id).map_or("<unknown>", |s| s.name)
    }

    /// Poll every trigger in registration order and apply the resulting
    /// edge actions to its bindings.
    fn poll_triggers(&mut self) {
        for idx in 0..self.triggers.len() {
            let (level, hold) = match self.triggers.get_mut(idx).and_then(Option::as_mut) {
                Some(t) => ((t.predicate)(), t.bindings.while_held),
                None => continue,
            };
            let hold_running = hold.is_some_and(|h| self.is_running(h));
            let (actions, bindings) = match self.triggers.get_mut(idx).and_then(Option::as_mut) {
                Some(t) => (edge_step(&mut t.state, level, hold_running), t.bindings),
                None => continue,
            };
            self.apply_edge_actions(actions, bindings);
        }
    }

    fn apply_edge_actions(&mut self, actions: EdgeActions, bindings: TriggerBindings) {
        if actions.start_press {
            self.start_bound(bindings.on_press);
        }
        if actions.start_toggle {
            self.start_bound(bindings.toggle_on_press);
        }
        if actions.cancel_toggle {
            if let Some(id) = bindings.toggle_on_press {
                self.cancel(id);
            }
        }
        if actions.cancel_on_press {
            if let Some(id) = bindings.cancel_on_press {
                self.cancel(id);
            }
        }
        if actions.start_hold {
            self.start_bound(bindings.while_held);
        }
        if actions.cancel_hold {
            if let Some(id) = bindings.while_held {
                self.cancel(id);
            }
        }
        if actions.start_release {
            self.start_bound(bindings.on_release);
        }
    }

    fn start_bound(&mut self, id: Option<CommandId>) {
        if let Some(id) = id {
            if let Err(err) = self.start(id) {
                warn!("trigger-bound start failed: {err}");
            }
        }
    }

    /// Force-cancel everything on the subsystem's stack, top first.
    fn reset_queue(&mut self, id: SubsystemId) {
        let stacked: Vec<CommandId> = match self.subsystem_ref(id) {
            Some(sub) => sub.stack.iter().rev().copied().collect(),
            None => return,
        };
        for cid in stacked {
            self.finish(cid, CommandStatus::Cancelled);
        }
        // Leftovers can only be handles whose command slot was removed.
        if let Some(sub) = self.subsystem_mut(id) {
            sub.stack.clear();
        }
    }

    /// Drop from the active set every command whose slot is absent or whose
    /// run has ended, detaching stale handles from subsystem stacks.
    /// Idempotent: with no state change the active set is a fixpoint.
    fn reap(&mut self) {
        let mut idx = 0;
        while idx < self.active.len() {
            let id = self.active[idx];
            let live = self.command_ref(id).is_some_and(|s| s.run.is_some());
            if live {
                idx += 1;
                continue;
            }
            match self.command_ref(id).and_then(|s| s.subsystem) {
                Some(sid) => {
                    if let Some(sub) = self.subsystem_mut(sid) {
                        sub.detach(id);
                    }
                }
                // Slot removed outright: the handle could sit in any stack.
                None => {
                    for sub in self.subsystems.iter_mut().flatten() {
                        sub.detach(id);
                    }
                }
            }
            self.active.remove(idx);
            self.commands_changed = true;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

//! Property and fuzz-style tests for scheduler robustness.
//!
//! Drives the public API with arbitrary input sequences and checks the
//! invariants that must hold after any of them.

use std::cell::Cell;
use std::rc::Rc;

use cmdloop::command::{Command, CommandSpec, InterruptPolicy};
use cmdloop::config::SchedulerConfig;
use cmdloop::scheduler::Scheduler;
use cmdloop::subsystem::Subsystem;
use cmdloop::trigger::TriggerBindings;
use proptest::prelude::*;

struct NeverDone;
impl Command for NeverDone {
    fn is_finished(&mut self) -> bool {
        false
    }
}

/// Counts initialize and end calls so balance can be asserted later.
struct Counted {
    inits: Rc<Cell<u32>>,
    ends: Rc<Cell<u32>>,
}
impl Command for Counted {
    fn initialize(&mut self) -> anyhow::Result<()> {
        self.inits.set(self.inits.get() + 1);
        Ok(())
    }
    fn is_finished(&mut self) -> bool {
        false
    }
    fn end(&mut self) -> anyhow::Result<()> {
        self.ends.set(self.ends.get() + 1);
        Ok(())
    }
}

struct NullSubsystem;
impl Subsystem for NullSubsystem {}

// ── Trigger edge machine ──────────────────────────────────────

proptest! {
    /// For any button level sequence, a while-held binding on a
    /// never-finishing command tracks the level exactly: after each tick the
    /// command is running iff the level sampled on that tick was high.
    #[test]
    fn while_held_tracks_level(
        levels in proptest::collection::vec(any::<bool>(), 1..=64),
    ) {
        let button = Rc::new(Cell::new(false));
        let probe = Rc::clone(&button);

        let mut sched = Scheduler::new(SchedulerConfig::default());
        let hold = sched
            .register_command(CommandSpec::new("hold", NeverDone))
            .unwrap();
        sched
            .register_trigger(move || probe.get(), TriggerBindings::new().while_held(hold))
            .unwrap();

        for &level in &levels {
            button.set(level);
            sched.tick();
            prop_assert_eq!(
                sched.is_running(hold), level,
                "while-held must mirror the sampled level"
            );
        }
    }

    /// A toggle binding's running state equals the parity of rising edges
    /// seen so far, for any level sequence.
    #[test]
    fn toggle_parity_matches_rising_edges(
        levels in proptest::collection::vec(any::<bool>(), 1..=64),
    ) {
        let button = Rc::new(Cell::new(false));
        let probe = Rc::clone(&button);

        let mut sched = Scheduler::new(SchedulerConfig::default());
        let toggled = sched
            .register_command(CommandSpec::new("toggled", NeverDone))
            .unwrap();
        sched
            .register_trigger(
                move || probe.get(),
                TriggerBindings::new().toggle_on_press(toggled),
            )
            .unwrap();

        let mut prev = false;
        let mut rising = 0u32;
        for &level in &levels {
            if level && !prev {
                rising += 1;
            }
            prev = level;

            button.set(level);
            sched.tick();
            prop_assert_eq!(
                sched.is_running(toggled),
                rising % 2 == 1,
                "toggle state must equal rising-edge parity"
            );
        }
    }
}

// ── Lifecycle balance under arbitrary op sequences ────────────

#[derive(Debug, Clone)]
enum SchedOp {
    Start(usize),  // command index
    Cancel(usize), // command index
    Tick,
}

fn arb_sched_op(commands: usize) -> impl Strategy<Value = SchedOp> {
    prop_oneof![
        (0..commands).prop_map(SchedOp::Start),
        (0..commands).prop_map(SchedOp::Cancel),
        Just(SchedOp::Tick),
    ]
}

proptest! {
    /// Arbitrary start/cancel/tick interleavings must never leave the
    /// scheduler in a stuck state: after kill_all_commands the active set
    /// and every stack are empty, and every initialize was balanced by
    /// exactly one end.
    #[test]
    fn kill_all_always_drains(
        ops in proptest::collection::vec(arb_sched_op(4), 1..=40),
    ) {
        let inits = Rc::new(Cell::new(0));
        let ends = Rc::new(Cell::new(0));

        let mut sched = Scheduler::new(SchedulerConfig::default());
        let sub = sched.register_subsystem("sub", NullSubsystem);

        // Four contenders on one subsystem, both policies represented.
        let mut ids = Vec::new();
        for (name, policy) in [
            ("a", InterruptPolicy::Terminate),
            ("b", InterruptPolicy::Suspend),
            ("c", InterruptPolicy::Terminate),
            ("d", InterruptPolicy::Suspend),
        ] {
            let id = sched
                .register_command(
                    CommandSpec::new(name, Counted {
                        inits: Rc::clone(&inits),
                        ends: Rc::clone(&ends),
                    })
                    .require(sub)
                    .policy(policy),
                )
                .unwrap();
            ids.push(id);
        }

        for op in &ops {
            match op {
                SchedOp::Start(i) => sched.start(ids[*i]).unwrap(),
                SchedOp::Cancel(i) => sched.cancel(ids[*i]),
                SchedOp::Tick => sched.tick(),
            }
        }

        sched.kill_all_commands();

        prop_assert!(sched.active_snapshot().is_empty());
        prop_assert!(sched.command_queue(sub).unwrap().is_empty());
        for id in &ids {
            prop_assert!(!sched.is_running(*id));
        }
        prop_assert_eq!(
            inits.get(), ends.get(),
            "every initialize must be balanced by exactly one end"
        );
    }

    /// Ticking a scheduler with nothing started is a no-op that never
    /// panics, at any tick period.
    #[test]
    fn idle_ticks_are_harmless(
        tick_period_ms in 1u32..=1000,
        ticks in 1usize..=50,
    ) {
        let config = SchedulerConfig {
            tick_period_ms,
            ..SchedulerConfig::default()
        };
        let mut sched = Scheduler::new(config);
        sched.register_subsystem("sub", NullSubsystem);

        for _ in 0..ticks {
            sched.tick();
        }
        prop_assert!(sched.active_snapshot().is_empty());
        prop_assert_eq!(sched.ticks(), ticks as u64);
    }
}

//! Integration tests: scheduler → subsystems → commands, end to end.
//!
//! Exercises the full tick pipeline the way a host control loop would:
//! default-command dispatch, trigger-driven takeover with suspend/resume,
//! timeouts, global kill, and the reporting snapshot.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cmdloop::command::{Command, CommandSpec, CommandStatus, InterruptPolicy};
use cmdloop::config::SchedulerConfig;
use cmdloop::scheduler::Scheduler;
use cmdloop::subsystem::Subsystem;
use cmdloop::trigger::TriggerBindings;

// ── Recording mocks ───────────────────────────────────────────

type Journal = Rc<RefCell<Vec<String>>>;

fn journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

fn entries(j: &Journal) -> Vec<String> {
    j.borrow().clone()
}

/// Command that appends `"<tag>:<hook>"` to a shared journal from every
/// lifecycle hook.
struct Recorder {
    tag: &'static str,
    journal: Journal,
    done: bool,
}

impl Recorder {
    fn new(tag: &'static str, journal: &Journal) -> Self {
        Self {
            tag,
            journal: Rc::clone(journal),
            done: false,
        }
    }

    fn log(&self, hook: &str) {
        self.journal.borrow_mut().push(format!("{}:{hook}", self.tag));
    }
}

impl Command for Recorder {
    fn initialize(&mut self) -> anyhow::Result<()> {
        self.log("init");
        Ok(())
    }
    fn execute(&mut self) -> anyhow::Result<()> {
        self.log("exec");
        Ok(())
    }
    fn is_finished(&mut self) -> bool {
        self.done
    }
    fn end(&mut self) -> anyhow::Result<()> {
        self.log("end");
        Ok(())
    }
    fn interrupted(&mut self) -> anyhow::Result<()> {
        self.log("pause");
        Ok(())
    }
    fn resumed(&mut self) -> anyhow::Result<()> {
        self.log("resume");
        Ok(())
    }
}

/// Subsystem that counts its periodic callbacks.
struct Drivetrain {
    periodic_calls: Rc<Cell<u32>>,
}

impl Subsystem for Drivetrain {
    fn periodic(&mut self) {
        self.periodic_calls.set(self.periodic_calls.get() + 1);
    }
}

fn sched() -> Scheduler {
    Scheduler::new(SchedulerConfig::default())
}

// ── Scenarios ─────────────────────────────────────────────────

/// A held button displaces the default command, which suspends, waits,
/// and resumes with its state intact once the takeover releases.
#[test]
fn trigger_takeover_suspends_and_resumes_default() {
    let j = journal();
    let periodic_calls = Rc::new(Cell::new(0));
    let button = Rc::new(Cell::new(false));

    let mut sched = sched();
    let drive = sched.register_subsystem(
        "drive",
        Drivetrain {
            periodic_calls: Rc::clone(&periodic_calls),
        },
    );

    let cruise = sched
        .register_command(
            CommandSpec::new("cruise", Recorder::new("cruise", &j))
                .require(drive)
                .policy(InterruptPolicy::Suspend),
        )
        .unwrap();
    let turbo = sched
        .register_command(CommandSpec::new("turbo", Recorder::new("turbo", &j)).require(drive))
        .unwrap();

    sched.set_default_command(drive, cruise).unwrap();
    let probe = Rc::clone(&button);
    sched
        .register_trigger(move || probe.get(), TriggerBindings::new().while_held(turbo))
        .unwrap();

    // Two quiet ticks: the pump starts cruise, which then just runs.
    sched.tick();
    sched.tick();
    assert_eq!(entries(&j), ["cruise:init", "cruise:exec", "cruise:exec"]);

    // Press: turbo takes the stack, cruise pauses the same tick.
    button.set(true);
    sched.tick();
    assert_eq!(sched.status(cruise), Some(CommandStatus::Suspended));
    assert_eq!(sched.status(turbo), Some(CommandStatus::Running));
    sched.tick();

    // Release: turbo is cancelled; cruise still waits this tick because it
    // is advanced before turbo leaves the stack.
    button.set(false);
    sched.tick();
    assert!(!sched.is_running(turbo));
    assert_eq!(sched.status(cruise), Some(CommandStatus::Suspended));

    // Next tick cruise regains the stack and resumes.
    sched.tick();
    assert_eq!(sched.status(cruise), Some(CommandStatus::Running));

    assert_eq!(
        entries(&j),
        [
            "cruise:init",
            "cruise:exec",
            "cruise:exec",
            "turbo:init",
            "cruise:pause",
            "turbo:exec",
            "turbo:exec",
            "turbo:end",
            "cruise:resume",
            "cruise:exec",
        ]
    );

    // Periodic ran on every tick regardless of stack traffic.
    assert_eq!(periodic_calls.get(), 6);

    // The pump never restarted cruise: one init total.
    let inits = entries(&j).iter().filter(|e| *e == "cruise:init").count();
    assert_eq!(inits, 1);
}

/// The delay factory holds for its whole duration at the configured tick
/// period, then completes and is reaped.
#[test]
fn delay_command_spans_exact_tick_count() {
    let mut sched = sched();
    // 100 ms at the default 20 ms tick is 5 iterations.
    let settle = sched
        .register_command(CommandSpec::delay("settle", 100))
        .unwrap();
    sched.start(settle).unwrap();

    for tick in 1..=4 {
        sched.tick();
        assert!(sched.is_running(settle), "still running at tick {tick}");
    }
    sched.tick();
    assert!(!sched.is_running(settle));
    assert_eq!(sched.status(settle), Some(CommandStatus::Completed));
    assert!(sched.active_snapshot().is_empty());
}

/// `wait_for` completes on the first tick after its predicate flips.
#[test]
fn wait_for_completes_on_predicate() {
    let ready = Rc::new(Cell::new(false));
    let probe = Rc::clone(&ready);

    let mut sched = sched();
    let gate = sched
        .register_command(CommandSpec::wait_for("gate", move || probe.get()))
        .unwrap();
    sched.start(gate).unwrap();

    sched.tick();
    sched.tick();
    assert!(sched.is_running(gate));

    ready.set(true);
    sched.tick();
    assert_eq!(sched.status(gate), Some(CommandStatus::Completed));
}

/// kill_all_commands empties the active set and every stack, and runs the
/// end hook of everything in flight exactly once.
#[test]
fn kill_all_drains_everything() {
    let j = journal();
    let mut sched = sched();
    let arm = sched.register_subsystem(
        "arm",
        Drivetrain {
            periodic_calls: Rc::new(Cell::new(0)),
        },
    );

    let hold = sched
        .register_command(
            CommandSpec::new("hold", Recorder::new("hold", &j))
                .require(arm)
                .policy(InterruptPolicy::Suspend),
        )
        .unwrap();
    let sweep = sched
        .register_command(CommandSpec::new("sweep", Recorder::new("sweep", &j)).require(arm))
        .unwrap();
    let free = sched
        .register_command(CommandSpec::new("free", Recorder::new("free", &j)))
        .unwrap();

    sched.start(hold).unwrap();
    sched.tick();
    sched.start(sweep).unwrap();
    sched.start(free).unwrap();
    sched.tick();

    sched.kill_all_commands();

    assert!(sched.active_snapshot().is_empty());
    assert!(sched.command_queue(arm).unwrap().is_empty());
    for id in [hold, sweep, free] {
        assert_eq!(sched.status(id), Some(CommandStatus::Cancelled));
        assert!(!sched.is_running(id));
    }

    let ends: Vec<_> = entries(&j)
        .into_iter()
        .filter(|e| e.ends_with(":end"))
        .collect();
    assert_eq!(ends.len(), 3);
}

/// The reporting bridge: the changed flag tracks active-set membership and
/// the snapshot serialises for external consumers.
#[test]
fn snapshot_and_changed_flag_track_membership() {
    let j = journal();
    let mut sched = sched();
    let lift = sched
        .register_command(CommandSpec::new("lift", Recorder::new("lift", &j)))
        .unwrap();

    assert!(sched.commands_changed());
    sched.clear_commands_changed();

    sched.start(lift).unwrap();
    assert!(sched.commands_changed());
    sched.clear_commands_changed();

    // Steady state: membership unchanged across ticks.
    sched.tick();
    sched.tick();
    assert!(!sched.commands_changed());

    let snapshot = sched.active_snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].name, "lift");
    assert_eq!(snapshot[0].status, CommandStatus::Running);

    let json = serde_json::to_string(&snapshot).unwrap();
    assert!(json.contains("\"lift\""));
    assert!(json.contains("\"Running\""));

    // Completion flips the flag again.
    sched.cancel(lift);
    sched.tick();
    assert!(sched.commands_changed());
    assert!(sched.active_snapshot().is_empty());
}

/// Toggle binding: press starts, the next press cancels, round and round.
#[test]
fn toggle_binding_round_trips() {
    let button = Rc::new(Cell::new(false));
    let probe = Rc::clone(&button);

    let j = journal();
    let mut sched = sched();
    let lights = sched
        .register_command(CommandSpec::new("lights", Recorder::new("lights", &j)))
        .unwrap();
    sched
        .register_trigger(
            move || probe.get(),
            TriggerBindings::new().toggle_on_press(lights),
        )
        .unwrap();

    // Press / release / press / release.
    for (level, expect_running) in [(true, true), (false, true), (true, false), (false, false)] {
        button.set(level);
        sched.tick();
        assert_eq!(sched.is_running(lights), expect_running, "level {level}");
    }
}

//! Utilities to debug simulation.
//!
//! The key type here is [`Monitor`], the debugger that [`Simulator::run`] hands control to.
//! A monitor is refreshed periodically while the machine runs
//! (every `recycle` memory cycles, see [`Simulator::set_recycle`])
//! and is asked what to do next whenever the machine stops.
//!
//! Besides the monitor, the simulator has a single breakpoint address
//! (the `breakpoint` field of [`Simulator`]). The machine stops whenever the PC reaches it,
//! and also whenever the PC becomes zero.
//!
//! [`Simulator`]: super::Simulator
//! [`Simulator::run`]: super::Simulator::run
//! [`Simulator::set_recycle`]: super::Simulator::set_recycle
use super::Simulator;

/// Reason for why execution paused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PauseCondition {
    /// The machine was just powered on.
    Start,
    /// A single step finished.
    Step,
    /// The PC reached the breakpoint.
    Breakpoint,
    /// The PC became zero.
    PcZero,
    /// The host asked the machine to stop (Ctrl-C).
    Interrupted,
    /// A tripwire condition (see [`Simulator::run_while`]) returned false.
    ///
    /// [`Simulator::run_while`]: super::Simulator::run_while
    Tripwire,
}
impl std::fmt::Display for PauseCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseCondition::Start       => f.write_str("powered on"),
            PauseCondition::Step        => f.write_str("stepped"),
            PauseCondition::Breakpoint  => f.write_str("hit breakpoint"),
            PauseCondition::PcZero      => f.write_str("reached address zero"),
            PauseCondition::Interrupted => f.write_str("interrupted"),
            PauseCondition::Tripwire    => f.write_str("stopped"),
        }
    }
}

/// What a [`Monitor`] wants the stopped machine to do.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Resume {
    /// Run until the breakpoint, address zero, or an interrupt from the host.
    Run,
    /// Execute one instruction (or take one interrupt).
    Step,
    /// Leave the simulation.
    Quit,
}

/// A debugger driving the simulator.
///
/// While stopped, the monitor has full access to the machine.
/// To run to an address, set `breakpoint` and return [`Resume::Run`].
pub trait Monitor {
    /// Called every `recycle` cycles while running,
    /// after devices have been polled for host input.
    fn refresh(&mut self, _sim: &Simulator) {}

    /// Called when the machine stops. Returns how to continue.
    fn halted(&mut self, sim: &mut Simulator, cond: PauseCondition) -> Resume;
}

//! An emulator for the Hawk 32-bit architecture.
//!
//! This is meant to run SMAL32 object files without Hawk hardware,
//! under a small terminal debugger.
//!
//! # Usage
//!
//! Object files are loaded into the simulator's memory with a [`load::Loader`]:
//! ```
//! use hawk_emu::load::Loader;
//! use hawk_emu::sim::{Simulator, SimFlags};
//!
//! let mut sim = Simulator::new(SimFlags::default()).unwrap();
//! let mut loader = Loader::new();
//!
//! // LIS R1, 5; LIS R2, 7; ADD R3, R1, R2
//! let obj = b"H#05D1\nH#07D2\nH#1233\nS#00000006\n";
//! loader.load(&mut sim.bus.mem, obj).unwrap();
//! sim.breakpoint = loader.start().unwrap_or(0);
//! ```
//!
//! Once memory is loaded, the machine can be run:
//! ```
//! # use hawk_emu::load::Loader;
//! # use hawk_emu::sim::{Simulator, SimFlags};
//! # let mut sim = Simulator::new(SimFlags::default()).unwrap();
//! # let mut loader = Loader::new();
//! # loader.load(&mut sim.bus.mem, b"H#05D1\nH#07D2\nH#1233\nS#00000006\n").unwrap();
//! # sim.breakpoint = loader.start().unwrap_or(0);
//! use hawk_emu::sim::debug::PauseCondition;
//! use hawk_emu::sim::instr::Reg;
//!
//! let cond = sim.run_while(|_| true);
//! assert_eq!(cond, PauseCondition::Breakpoint);
//! assert_eq!(sim.reg_file[Reg::new(3)], 12);
//! ```
//!
//! For interactive use, [`sim::Simulator::run`] hands control to a
//! [`sim::debug::Monitor`] such as the terminal [`console::Console`].
//! See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod sim;
pub mod load;
pub mod console;
pub mod err;

//! Simulating and execution for Hawk machine code.
//!
//! This module is focused on executing machine code that has already been placed
//! into memory (usually by [`crate::load`]).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates the processor.
//! - [`mem`]: Physical memory and the register file.
//! - [`bus`]: Routing of memory references, cycle accounting, and the load-link token.
//! - [`device`]: Memory-mapped devices (the display and the keyboard) and their interrupts.
//! - [`instr`]: Instruction decoding.
//! - [`alu`]: The carry-tracking arithmetic/logic unit.
//! - [`psw`]: The processor status word and branch conditions.
//! - [`trap`]: Faults, trap vectors, and interrupt selection.
//! - [`coproc`]: The coprocessor interface and the floating point coprocessor.
//! - [`debug`]: The monitor interface used to drive the simulator interactively.
//!
//! # Usage
//!
//! ```
//! use hawk_emu::sim::{Simulator, SimFlags};
//! use hawk_emu::sim::instr::Reg;
//!
//! let mut sim = Simulator::new(SimFlags::default()).unwrap();
//!
//! // LIS R1, 5
//! sim.bus.mem.write_byte(0, 0xD1);
//! sim.bus.mem.write_byte(1, 0x05);
//!
//! sim.step();
//! assert_eq!(sim.reg_file[Reg::new(1)], 5);
//! assert_eq!(sim.pc(), 2);
//! ```
//!
//! ## Flags
//!
//! The simulator can be configured through [`SimFlags`]:
//!
//! ```
//! # use hawk_emu::sim::{Simulator, SimFlags};
//! use hawk_emu::sim::mem::MemInit;
//!
//! let flags = SimFlags { mem_size: 0x40000, mem_init: MemInit::Seeded { seed: 2110 }, ..Default::default() };
//! let sim = Simulator::new(flags).unwrap();
//! assert_eq!(sim.bus.mem.len(), 0x40000);
//! ```
//!
//! ## Execution
//!
//! Beyond [`Simulator::step`] (which runs a single instruction or takes a single interrupt),
//! there are also:
//! - [`Simulator::run`]: hands control to a [`debug::Monitor`] which decides when to run and stop
//! - [`Simulator::run_while`], [`Simulator::run_with_limit`]: programmatic execution
//!
//! All three stop when the PC reaches the `breakpoint` field or becomes zero,
//! or when the pause flag (see [`Simulator::pause_flag`]) is raised.
//!
//! ## Faults
//!
//! Guest faults (see [`trap::Fault`]) never surface to the host.
//! They vector to the guest's trap handlers exactly as the hardware would.
pub mod mem;
pub mod debug;
pub mod device;
pub mod bus;
pub mod alu;
pub mod instr;
pub mod psw;
pub mod trap;
pub mod coproc;

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alu::AluOut;
use bus::{Bus, CycleCounter, IO_BASE};
use coproc::Coprocessors;
use debug::{Monitor, PauseCondition, Resume};
use device::{DeviceHandler, Display, KeySource, Keyboard};
use instr::{instr_size, sext16, sext8, Instr, Reg};
use mem::{Mem, MemInit, RegFile};
use psw::{Psw, C, CC, V, Z};
use trap::{mask_for_priority, Fault};

/// The default number of memory cycles between monitor refreshes.
pub const DEFAULT_RECYCLE: u32 = 20;
/// The largest allowed number of memory cycles between monitor refreshes.
pub const MAX_RECYCLE: u32 = 0x20000;

const PAGE: u32 = 0x10000;

/// Errors in the configuration of a [`Simulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigErr {
    /// The memory size is zero, not a multiple of 64 KiB, or reaches into the I/O region.
    #[error("invalid memory size {0:#X}")]
    BadMemSize(u32),
    /// The ROM size is not a multiple of 64 KiB or exceeds the memory size.
    #[error("invalid ROM size {0:#X}")]
    BadRomSize(u32),
    /// The cycle interval between monitor refreshes is out of range.
    #[error("invalid cycle interval {0}")]
    BadRecycle(u32),
    /// A device range is empty or not entirely inside the I/O region.
    #[error("device range {base:#010X} (+{len:#X}) is outside the I/O region")]
    DeviceOutsideIo {
        /// First address of the range.
        base: u32,
        /// Length of the range in bytes.
        len: u32
    },
    /// The display has more cells than its address range can hold.
    #[error("invalid display size {lines}x{cols}")]
    BadDisplaySize {
        /// Number of lines.
        lines: u32,
        /// Number of columns.
        cols: u32
    },
    /// A device range overlaps another device's.
    #[error("device range {base:#010X} (+{len:#X}) overlaps another device")]
    DeviceOverlap {
        /// First address of the range.
        base: u32,
        /// Length of the range in bytes.
        len: u32
    },
}
impl crate::err::Error for ConfigErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            ConfigErr::BadMemSize(_)          => Some(format!("memory must be a nonzero multiple of {PAGE:#X} bytes, at most {IO_BASE:#X}").into()),
            ConfigErr::BadRomSize(_)          => Some(format!("ROM must be a multiple of {PAGE:#X} bytes, no larger than memory").into()),
            ConfigErr::BadRecycle(_)          => Some(format!("the interval must be between 1 and {MAX_RECYCLE}").into()),
            ConfigErr::BadDisplaySize { .. }  => Some(format!("the display can have at most {} cells", Display::MAX_CELLS).into()),
            ConfigErr::DeviceOutsideIo { .. } => Some(format!("devices must be placed at or above {IO_BASE:#010X}").into()),
            ConfigErr::DeviceOverlap { .. }   => Some("try moving one of the devices".into()),
        }
    }
}

fn check_recycle(recycle: u32) -> Result<(), ConfigErr> {
    match (1..=MAX_RECYCLE).contains(&recycle) {
        true  => Ok(()),
        false => Err(ConfigErr::BadRecycle(recycle)),
    }
}

fn check_display(lines: u32, cols: u32) -> Result<(), ConfigErr> {
    match lines.checked_mul(cols) {
        Some(cells) if cells <= Display::MAX_CELLS => Ok(()),
        _ => Err(ConfigErr::BadDisplaySize { lines, cols }),
    }
}

/// Configuration flags for [`Simulator`].
///
/// These are checked by [`Simulator::new`] (see [`SimFlags::validate`]).
/// Memory sizes only take effect on creation;
/// the rest are read whenever they are needed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// The size of memory in bytes.
    ///
    /// By default, this is 1 MiB.
    pub mem_size: u32,

    /// The size of the read-only prefix of memory in bytes.
    ///
    /// By default, this is 64 KiB.
    pub rom_size: u32,

    /// How memory is filled on creation.
    ///
    /// By default, memory is zeroed.
    pub mem_init: MemInit,

    /// The initial number of memory cycles between monitor refreshes while running.
    ///
    /// By default, this is [`DEFAULT_RECYCLE`].
    pub recycle: u32,

    /// How long a keyboard status read that finds nothing ready sleeps.
    ///
    /// By default, this is 50 ms.
    pub kbd_delay: Duration,

    /// The number of lines of the display (see [`Simulator::attach_display`]).
    pub display_lines: u32,

    /// The number of columns of the display.
    pub display_cols: u32,
}
impl Default for SimFlags {
    fn default() -> Self {
        Self {
            mem_size: 0x0010_0000,
            rom_size: 0x0001_0000,
            mem_init: MemInit::default(),
            recycle: DEFAULT_RECYCLE,
            kbd_delay: Duration::from_millis(50),
            display_lines: 16,
            display_cols: 80,
        }
    }
}
impl SimFlags {
    /// Checks that these flags describe a machine that can be built.
    pub fn validate(&self) -> Result<(), ConfigErr> {
        if self.mem_size == 0 || self.mem_size % PAGE != 0 || self.mem_size > IO_BASE {
            return Err(ConfigErr::BadMemSize(self.mem_size));
        }
        if self.rom_size % PAGE != 0 || self.rom_size > self.mem_size {
            return Err(ConfigErr::BadRomSize(self.rom_size));
        }
        check_recycle(self.recycle)?;
        check_display(self.display_lines, self.display_cols)
    }
}

/// What an executed instruction asks the processor to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Fall through to the next instruction.
    Continue,
    /// Transfer control to an address.
    Branch(u32),
}

/// The value of the load condition codes: N and Z from the value,
/// plus C if any byte of it is zero.
fn loaded(value: u32) -> AluOut {
    let mut out = AluOut::logical(value);
    if alu::has_null_byte(value) {
        out.cc |= C;
    }
    out
}

/// Executes Hawk machine code.
#[derive(Debug)]
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Simulator::reset`] resets these values (except memory).

    /// Memory, devices, and cycle accounting.
    pub bus: Bus,

    /// The general registers.
    pub reg_file: RegFile,

    /// The program counter. Always even.
    pc: u32,

    /// The processor status word (without its carry field).
    psw: Psw,

    /// The carry into each bit of the last addition.
    ///
    /// This is rendered into the PSW's carry field when software reads the PSW.
    carries: u32,

    /// The trap PC: where the last trap came from.
    pub tpc: u32,
    /// The trap memory address: the address that caused the last bus trap.
    pub tma: u32,
    /// The trap save register, free for trap handlers.
    pub tsv: u32,

    /// The coprocessors.
    pub coproc: Coprocessors,

    /// The interrupt lines enabled at the current priority.
    imask: u8,

    /// The prefetched instruction word, if it is valid.
    irb: Option<u32>,

    /// The PC at the start of the current instruction.
    lastpc: u32,

    /// The number of instructions executed since this `Simulator` was created.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    /// Raised by the host to stop a running machine at the next instruction boundary.
    pause: Arc<AtomicBool>,

    /// The number of memory cycles between monitor refreshes while running.
    recycle: u32,

    /// Configuration settings for the simulator.
    pub flags: SimFlags,

    /// The breakpoint. The machine stops whenever the PC reaches this address.
    pub breakpoint: u32,
}
impl Simulator where Simulator: Send + Sync {}

impl Simulator {
    fn build(flags: SimFlags) -> Self {
        let mem = Mem::new(flags.mem_size, flags.rom_size, flags.mem_init);
        Self {
            bus: Bus::new(mem, DeviceHandler::new()),
            reg_file: RegFile::new(),
            pc: 0,
            psw: Psw::new(),
            carries: 0,
            tpc: 0,
            tma: 0,
            tsv: 0,
            coproc: Coprocessors::new(),
            imask: 0,
            irb: None,
            lastpc: 0,
            instructions_run: 0,

            pause: Arc::default(),
            recycle: flags.recycle,
            flags,
            breakpoint: 0,
        }
    }

    /// Creates a powered-on machine with no devices attached.
    ///
    /// # Errors
    ///
    /// Fails if the flags are invalid (see [`SimFlags::validate`]).
    pub fn new(flags: SimFlags) -> Result<Self, ConfigErr> {
        flags.validate()?;
        Ok(Self::build(flags))
    }

    /// Attaches a keyboard at its standard address, reading from the given host source.
    pub fn attach_keyboard(&mut self, source: KeySource) -> Result<(), ConfigErr> {
        let kb = Keyboard::new(source, self.flags.kbd_delay);
        self.bus.devices.add_keyboard(kb).map(|_| ())
    }

    /// Attaches a display at its standard address.
    ///
    /// The returned handle shares the display's character grid.
    pub fn attach_display(&mut self) -> Result<Display, ConfigErr> {
        check_display(self.flags.display_lines, self.flags.display_cols)?;
        let disp = Display::new(self.flags.display_lines, self.flags.display_cols);
        self.bus.devices.add_display(disp.clone())?;
        Ok(disp)
    }

    /// Resets the processor to its power-on state.
    ///
    /// Note that this function preserves:
    /// - Memory
    /// - Flags and the cycle interval
    /// - The breakpoint
    /// - Attached devices (which are reset)
    /// - The pause flag (i.e., anything holding it can still pause the machine)
    pub fn reset(&mut self) {
        self.reg_file = RegFile::new();
        self.pc = 0;
        self.psw = Psw::new();
        self.carries = 0;
        self.tpc = 0;
        self.tma = 0;
        self.tsv = 0;
        self.coproc = Coprocessors::new();
        self.imask = 0;
        self.irb = None;
        self.lastpc = 0;
        self.instructions_run = 0;

        self.bus.cycles = CycleCounter::new();
        self.bus.unlink();
        self.bus.devices.io_reset();
    }

    /// The program counter.
    pub fn pc(&self) -> u32 {
        self.pc
    }
    /// Moves the program counter.
    ///
    /// The next instruction is fetched from the new address.
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc & !1;
        self.irb = None;
    }

    /// The processor status word.
    pub fn psw(&self) -> &Psw {
        &self.psw
    }
    /// The carry vector of the last addition.
    pub fn carries(&self) -> u32 {
        self.carries
    }
    /// The PSW as software reads it (with the carry field filled in).
    pub fn psw_word(&self) -> u32 {
        self.psw.to_word(self.carries)
    }
    /// Writes the PSW as software would.
    ///
    /// The carry field replaces the carry vector,
    /// and the interrupt mask follows the new level.
    pub fn set_psw_word(&mut self, word: u32) {
        self.psw = Psw::from_word(word);
        self.carries = psw::unpack_carries(word);
        self.imask = mask_for_priority(self.psw.priority());
    }
    /// The interrupt lines currently enabled.
    pub fn imask(&self) -> u8 {
        self.imask
    }

    /// The number of memory cycles between monitor refreshes.
    pub fn recycle(&self) -> u32 {
        self.recycle
    }
    /// Sets the number of memory cycles between monitor refreshes.
    ///
    /// # Errors
    ///
    /// Fails if `recycle` is not between 1 and [`MAX_RECYCLE`].
    pub fn set_recycle(&mut self, recycle: u32) -> Result<(), ConfigErr> {
        check_recycle(recycle)?;
        self.recycle = recycle;
        Ok(())
    }

    /// A reference to the pause flag.
    ///
    /// Raising it stops a running machine at the next instruction boundary.
    pub fn pause_flag(&self) -> &Arc<AtomicBool> {
        &self.pause
    }

    /// Reads the instruction halfword at `addr` without touching the bus.
    pub fn halfword_at(&self, addr: u32) -> Option<u16> {
        let word = self.bus.mem.get(addr)?;
        match addr & 2 != 0 {
            true  => Some((word >> 16) as u16),
            false => Some(word as u16),
        }
    }
    /// The address of the instruction after the one at the PC.
    pub fn next_instr_addr(&self) -> u32 {
        let size = self.halfword_at(self.pc).map_or(2, instr_size);
        self.pc.wrapping_add(size)
    }

    fn reg_or_pc(&self, reg: Reg) -> u32 {
        self.reg_file.get_or(reg, self.pc)
    }

    fn commit(&mut self, dst: Reg, out: AluOut) {
        self.reg_file.set(dst, out.value);
        self.psw.set_cc(out.cc);
        self.carries = out.carries;
    }

    /// Writes `value` into `dst`, or jumps to it if `dst` is `R0`.
    fn set_or_jump(&mut self, dst: Reg, value: u32) -> Outcome {
        match dst.is_zero() {
            true  => Outcome::Branch(value),
            false => {
                self.reg_file.set(dst, value);
                Outcome::Continue
            }
        }
    }

    fn check_privilege(&self) -> Result<(), Fault> {
        match self.psw.user_mode() {
            true  => Err(Fault::PrivilegeViolation),
            false => Ok(()),
        }
    }

    /// Fetches the halfword at the PC and advances it.
    ///
    /// Leaving the second halfword of a word prefetches the next word.
    /// A prefetch that fails is only reported when that word is needed.
    fn fetch_half(&mut self) -> Result<u16, Fault> {
        let word = match self.irb {
            Some(word) => word,
            None => {
                let word = self.bus.fetch(self.pc)?;
                self.irb = Some(word);
                word
            }
        };

        let odd = self.pc & 2 != 0;
        self.pc = self.pc.wrapping_add(2);
        match odd {
            true  => {
                self.irb = self.bus.fetch(self.pc).ok();
                Ok((word >> 16) as u16)
            },
            false => Ok(word as u16),
        }
    }

    /// Fetches a displacement and adds it to `x` (where `R0` is the PC after the displacement).
    fn long_address(&mut self, x: Reg) -> Result<u32, Fault> {
        let disp = sext16(self.fetch_half()?);
        Ok(disp.wrapping_add(self.reg_or_pc(x)))
    }

    fn add_with_carry(&mut self, dst: Reg, y: u32) {
        let was_nonzero = !self.psw.is_set(Z);
        let out = alu::add(self.reg_file[dst], y, self.psw.is_set(C));
        self.commit(dst, out);
        if was_nonzero {
            self.psw.lower(Z);
        }
    }

    fn execute(&mut self, instr: Instr) -> Result<Outcome, Fault> {
        match instr {
            Instr::Move(d, x) => {
                let value = self.reg_or_pc(x);
                self.reg_file.set(d, value);
            },
            Instr::MoveCc(d, x) => {
                let value = self.reg_or_pc(x);
                self.commit(d, alu::add(0, value, false));
            },
            Instr::LoadS(d, x) => {
                let value = self.bus.load(self.reg_or_pc(x) & !3)?;
                return Ok(self.set_or_jump(d, value));
            },
            Instr::LoadSCc(d, x) => {
                let value = self.bus.load(self.reg_or_pc(x) & !3)?;
                self.commit(d, loaded(value));
            },
            Instr::JsrS(d, x) => {
                let target = self.reg_or_pc(x);
                self.reg_file.set(d, self.pc);
                return Ok(Outcome::Branch(target));
            },
            Instr::StoreS(d, x) => {
                let ea = self.reg_file[x] & !3;
                self.bus.store(ea, self.reg_file[d])?;
            },
            Instr::LoadL(d, x) => {
                let ea = self.reg_file[x] & !3;
                self.bus.link(ea);
                let value = self.bus.load(ea)?;
                self.commit(d, loaded(value));
            },
            Instr::StoreC(d, x) => {
                let ea = self.reg_file[x] & !3;
                self.psw.lower(CC);
                if !self.bus.store_conditional(ea, self.reg_file[d])? {
                    self.psw.raise(V);
                }
            },

            Instr::Lea(d, x) => {
                let ea = self.long_address(x)?;
                self.reg_file.set(d, ea);
            },
            Instr::LeaCc(d, x) => {
                let disp = sext16(self.fetch_half()?);
                let base = self.reg_or_pc(x);
                self.commit(d, alu::add(disp, base, false));
            },
            Instr::Load(d, x) => {
                let ea = self.long_address(x)? & !3;
                let value = self.bus.load(ea)?;
                return Ok(self.set_or_jump(d, value));
            },
            Instr::LoadCc(d, x) => {
                let ea = self.long_address(x)? & !3;
                let value = self.bus.load(ea)?;
                self.commit(d, loaded(value));
            },
            Instr::Jsr(d, x) => {
                let target = self.long_address(x)?;
                self.reg_file.set(d, self.pc);
                return Ok(Outcome::Branch(target));
            },
            Instr::Store(d, x) => {
                let ea = self.long_address(x)? & !3;
                self.bus.store(ea, self.reg_file[d])?;
            },

            Instr::Lil(d, c) => {
                let high = sext16(self.fetch_half()?) << 8;
                return Ok(self.set_or_jump(d, high | u32::from(c)));
            },
            Instr::Lis(d, c) => self.reg_file.set(d, sext8(c)),
            Instr::Oris(d, c) => {
                let value = (self.reg_file[d] << 8) | u32::from(c);
                self.reg_file.set(d, value);
            },

            Instr::MoveSl(d, s1, n) => {
                let out = alu::shift_left(self.reg_file[s1], n);
                self.commit(d, out);
            },
            Instr::AddSl(d, s1, n) => {
                let out = alu::shift_left_add(self.reg_file[d], self.reg_file[s1], n);
                self.commit(d, out);
            },
            Instr::AddSr(d, s1, n) => {
                let out = alu::add_shift_right(self.reg_file[d], self.reg_file[s1], n, true);
                self.commit(d, out);
            },
            Instr::AddSrU(d, s1, n) => {
                let out = alu::add_shift_right(self.reg_file[d], self.reg_file[s1], n, false);
                self.commit(d, out);
            },
            Instr::StuffB(d, s1, s2) => {
                let shift = (self.reg_file[s2] & 3) * 8;
                let value = (self.reg_file[d] & !(0xFF << shift)) | ((self.reg_file[s1] & 0xFF) << shift);
                self.reg_file.set(d, value);
            },
            Instr::StuffH(d, s1, s2) => {
                let shift = (self.reg_file[s2] & 2) * 8;
                let value = (self.reg_file[d] & !(0xFFFF << shift)) | ((self.reg_file[s1] & 0xFFFF) << shift);
                self.reg_file.set(d, value);
            },
            Instr::ExtB(d, s1, s2) => {
                let shift = (self.reg_file[s2] & 3) * 8;
                self.commit(d, AluOut::logical((self.reg_file[s1] >> shift) & 0xFF));
            },
            Instr::ExtH(d, s1, s2) => {
                let shift = (self.reg_file[s2] & 2) * 8;
                self.commit(d, AluOut::logical((self.reg_file[s1] >> shift) & 0xFFFF));
            },
            Instr::Add(d, s1, s2) => {
                let out = alu::add(self.reg_file[s1], self.reg_file[s2], false);
                self.commit(d, out);
            },
            Instr::Sub(d, s1, s2) => {
                let out = alu::add(self.reg_file[s1], !self.reg_file[s2], true);
                self.commit(d, out);
            },

            Instr::Trunc(d, n) => {
                let out = alu::truncate(self.reg_file[d], n);
                self.commit(d, out);
            },
            Instr::Sxt(d, n) => {
                let out = alu::sign_extend(self.reg_file[d], n);
                self.commit(d, out);
            },
            Instr::BTrunc(d, n) => {
                let bits = (u32::from(n).wrapping_sub(1) & 0xF) + 1;
                let index = self.reg_file[d] & !(u32::MAX << bits);
                return Ok(Outcome::Branch(self.pc.wrapping_add(index << 1)));
            },
            Instr::AddSi(d, n) => {
                let imm = match n {
                    0 => 8,
                    n if n & 0x8 != 0 => u32::from(n) | 0xFFFF_FFF0,
                    n => u32::from(n),
                };
                let out = alu::add(self.reg_file[d], imm, false);
                self.commit(d, out);
            },
            Instr::And(d, s) => self.commit(d, AluOut::logical(self.reg_file[d] & self.reg_file[s])),
            Instr::Or(d, s)  => self.commit(d, AluOut::logical(self.reg_file[d] | self.reg_file[s])),
            Instr::Equ(d, s) => self.commit(d, AluOut::logical(!(self.reg_file[d] ^ self.reg_file[s]))),
            Instr::AddC(d, s) => self.add_with_carry(d, self.reg_file[s]),
            Instr::SubB(d, s) => self.add_with_carry(d, !self.reg_file[s]),
            Instr::Adjust(d, n) => {
                let correction = alu::adjustment(n, self.carries, self.psw.cc());
                let value = self.reg_file[d].wrapping_add(correction);
                self.reg_file.set(d, value);
            },
            Instr::Plus(d, s) => {
                let value = self.reg_file[d].wrapping_add(self.reg_or_pc(s));
                self.reg_file.set(d, value);
            },

            Instr::CoGet(d, n) => {
                self.psw.lower(CC);
                match n {
                    0 => {
                        let costat = self.coproc.costat();
                        if costat == 0 {
                            self.psw.raise(Z);
                        }
                        self.reg_file.set(d, costat);
                    },
                    n => {
                        let read = self.coproc.get(n)?;
                        self.reg_file.set(d, read.value);
                        self.psw.raise(read.cc);
                    }
                }
            },
            Instr::CoSet(d, n) => {
                let value = self.reg_file[d];
                match n {
                    0 => {
                        self.check_privilege()?;
                        self.coproc.set_costat(value);
                    },
                    n => self.coproc.set(n, value)?,
                }
            },
            Instr::CpuGet(d, n) => {
                self.check_privilege()?;
                let value = match n {
                    0 => self.psw_word(),
                    1 => self.tpc,
                    2 => self.tma,
                    3 => self.tsv,
                    8 => self.bus.cycles.total(),
                    _ => return Err(Fault::IllegalInstruction),
                };

                // CPUGET into R0 is the return from trap
                if d.is_zero() {
                    self.psw.pop_level();
                    self.imask = mask_for_priority(self.psw.priority());
                    return Ok(Outcome::Branch(value));
                }
                self.reg_file.set(d, value);
            },
            Instr::CpuSet(d, n) => {
                self.check_privilege()?;
                let value = self.reg_file[d];
                match n {
                    0 => self.set_psw_word(value),
                    1 => self.tpc = value,
                    2 => self.tma = value,
                    3 => self.tsv = value,
                    8 => self.bus.cycles.set_total(value),
                    _ => return Err(Fault::IllegalInstruction),
                }
            },

            Instr::Branch(cond, disp) => {
                if psw::condition_holds(self.psw.cc(), cond) {
                    let offset = (i32::from(disp) * 2) as u32;
                    return Ok(Outcome::Branch(self.pc.wrapping_add(offset)));
                }
            },
        }

        Ok(Outcome::Continue)
    }

    fn fetch_and_execute(&mut self) -> Result<Outcome, Fault> {
        let ir = self.fetch_half()?;
        let instr = Instr::decode(ir)?;
        log::trace!("{:#010X}: {ir:04X} {instr:?}", self.lastpc);
        self.execute(instr)
    }

    /// Transfers control to a trap vector, entering the most privileged level.
    fn trap(&mut self, vector: u32) {
        self.tpc = self.lastpc;
        self.psw.push_level();
        self.imask = mask_for_priority(self.psw.priority());
        self.pc = vector;
        self.irb = self.bus.fetch(vector).ok();
    }

    fn take_fault(&mut self, fault: Fault) {
        if let Some(addr) = fault.trap_address() {
            self.tma = addr;
        }
        log::debug!("{fault} at {:#010X}, trapping to {:#06X}", self.lastpc, fault.vector());
        self.trap(fault.vector());
    }

    fn jump(&mut self, target: u32) {
        self.pc = target & !1;
        if self.pc == 0 {
            self.bus.cycles.fold();
        }
        match self.bus.fetch(self.pc) {
            Ok(word) => self.irb = Some(word),
            Err(fault) => {
                self.irb = None;
                self.take_fault(fault);
            }
        }
    }

    /// Simulates one instruction boundary.
    ///
    /// If an enabled interrupt is pending, this takes it.
    /// Otherwise, it fetches and executes one instruction
    /// (which may end in a trap instead).
    pub fn step(&mut self) {
        self.lastpc = self.pc;

        if let Some(line) = trap::select_interrupt(self.bus.irq(), self.imask) {
            log::debug!("interrupt {line} taken at {:#010X}", self.pc);
            self.trap(trap::interrupt_vector(line));
            return;
        }

        self.instructions_run = self.instructions_run.wrapping_add(1);
        match self.fetch_and_execute() {
            Ok(Outcome::Continue) => {},
            Ok(Outcome::Branch(target)) => self.jump(target),
            Err(fault) => self.take_fault(fault),
        }
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// At least one step is always executed. The typical break conditions are:
    /// - the pause flag is raised
    /// - the PC reaches the breakpoint
    /// - the PC becomes zero
    ///
    /// Devices are polled for host input every `recycle` memory cycles.
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Simulator) -> bool) -> PauseCondition {
        self.run_inner(|_| {}, &mut tripwire)
    }

    /// Runs with a limit on how many steps to execute.
    pub fn run_with_limit(&mut self, max_steps: u64) -> PauseCondition {
        let mut steps = 0;
        self.run_while(|_| {
            steps += 1;
            steps < max_steps
        })
    }

    fn run_inner(
        &mut self,
        mut refresh: impl FnMut(&Simulator),
        tripwire: &mut impl FnMut(&mut Simulator) -> bool
    ) -> PauseCondition {
        loop {
            self.step();

            if self.pause.swap(false, Ordering::Relaxed) {
                self.bus.cycles.fold();
                return PauseCondition::Interrupted;
            }
            if self.pc == self.breakpoint {
                return PauseCondition::Breakpoint;
            }
            if self.pc == 0 {
                return PauseCondition::PcZero;
            }
            if self.bus.cycles.due() {
                self.bus.cycles.extend(self.recycle);
                self.bus.poll_devices();
                refresh(self);
            }
            if !tripwire(self) {
                return PauseCondition::Tripwire;
            }
        }
    }

    /// Runs the machine under a monitor.
    ///
    /// The machine starts stopped: the monitor is first asked what to do with
    /// [`PauseCondition::Start`]. While running, the monitor is refreshed every
    /// `recycle` memory cycles. This returns when the monitor asks to quit.
    pub fn run(&mut self, monitor: &mut impl Monitor) {
        let mut cond = PauseCondition::Start;
        loop {
            match monitor.halted(self, cond) {
                Resume::Quit => return,
                Resume::Step => {
                    self.bus.cycles.refill(0);
                    self.step();
                    cond = PauseCondition::Step;
                },
                Resume::Run => {
                    self.pause.store(false, Ordering::Relaxed);
                    self.bus.cycles.refill(self.recycle);
                    cond = self.run_inner(|sim| monitor.refresh(sim), &mut |_: &mut Simulator| true);
                    log::debug!("machine {cond} at {:#010X}", self.pc);
                }
            }
        }
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::build(SimFlags::default())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::RwLock;

    use super::*;
    use super::device::{ExternalDevice, IoCtx, KEYBOARD_BASE};
    use super::psw::N;
    use super::trap::{BUS_TRAP, CO_TRAP, INSTRUCTION_TRAP, PRIV_TRAP};

    /// Builds an instruction halfword from its four fields.
    fn enc(op1: u16, src: u16, op: u16, dst: u16) -> u16 {
        (op1 << 12) | (src << 8) | (op << 4) | dst
    }
    fn r(n: u8) -> Reg {
        Reg::new(n)
    }

    fn sim_with(addr: u32, program: &[u16]) -> Simulator {
        let mut sim = Simulator::default();
        for (i, half) in program.iter().enumerate() {
            let a = addr + 2 * i as u32;
            let [lo, hi] = half.to_le_bytes();
            sim.bus.mem.write_byte(a, lo);
            sim.bus.mem.write_byte(a + 1, hi);
        }
        sim
    }
    fn steps(sim: &mut Simulator, n: usize) {
        (0..n).for_each(|_| sim.step());
    }

    #[test]
    fn test_arith() {
        let mut sim = sim_with(0, &[
            0x05D1,           // LIS R1, 5
            0xFDD2,           // LIS R2, -3
            enc(1, 2, 3, 3),  // ADD R3, R1, R2
            enc(1, 1, 2, 0),  // CMP R1, R1
        ]);
        steps(&mut sim, 3);
        assert_eq!(sim.reg_file[r(2)], 0xFFFF_FFFD);
        assert_eq!(sim.reg_file[r(3)], 2);
        assert_eq!(sim.psw().cc(), C);

        steps(&mut sim, 1);
        assert_eq!(sim.psw().cc(), Z | C);
        assert_eq!(sim.pc(), 8);
    }

    #[test]
    fn test_r0_discard() {
        let mut sim = sim_with(0, &[
            0x05D1,           // LIS R1, 5
            0xFDD2,           // LIS R2, -3
            enc(1, 2, 3, 0),  // ADD R0, R1, R2
            enc(9, 0, 1, 5),  // EQU R5, R0
        ]);
        steps(&mut sim, 4);
        assert_eq!(sim.reg_file[Reg::R0], 0);
        assert_eq!(sim.reg_file[r(5)], 0xFFFF_FFFF);
        assert_eq!(sim.psw().cc(), N);
    }

    #[test]
    fn test_rom_fault() {
        let mut sim = sim_with(0, &[
            0x40D1,              // LIS R1, 0x40
            0x01D2,              // LIS R2, 1
            enc(0xA, 1, 0xF, 2), // STORES R2, R1
        ]);
        steps(&mut sim, 3);
        assert_eq!(sim.pc(), BUS_TRAP);
        assert_eq!(sim.tpc, 4);
        assert_eq!(sim.tma, 0x40);
        assert_eq!(sim.bus.mem.get_raw(0x40), 0);
    }

    #[test]
    fn test_load_link() {
        let mut sim = sim_with(0, &[
            0x00E1, 0x0100,      // LIL R1, 0x10000
            0x07D2,              // LIS R2, 7
            enc(9, 1, 0xF, 3),   // LOADL R3, R1
            enc(8, 1, 0xF, 2),   // STOREC R2, R1
            enc(8, 1, 0xF, 2),   // STOREC R2, R1
            enc(9, 1, 0xF, 3),   // LOADL R3, R1
            enc(0xA, 1, 0xF, 3), // STORES R3, R1
            enc(8, 1, 0xF, 2),   // STOREC R2, R1
        ]);
        steps(&mut sim, 3);
        assert_eq!(sim.reg_file[r(1)], 0x10000);
        assert_eq!(sim.psw().cc(), Z | C);
        assert_eq!(sim.bus.token(), Some(0x10000));

        steps(&mut sim, 1);
        assert_eq!(sim.bus.mem.get_raw(0x10000), 7);
        assert_eq!(sim.psw().cc(), 0);

        // the token was consumed
        steps(&mut sim, 1);
        assert_eq!(sim.psw().cc(), V);

        // an ordinary store of the same value breaks the link
        sim.bus.mem.set_raw(0x10000, 1);
        sim.reg_file.set(r(2), 9);
        steps(&mut sim, 3);
        assert_eq!(sim.psw().cc(), V);
        assert_eq!(sim.bus.mem.get_raw(0x10000), 1);
    }

    #[test]
    fn test_addc_keeps_z_clear() {
        let mut sim = sim_with(0, &[
            0xFFD1,           // LIS R1, -1
            enc(1, 1, 3, 3),  // ADD R3, R1, R1
            enc(7, 0, 1, 1),  // ADDC R1, R0
        ]);
        steps(&mut sim, 2);
        assert_eq!(sim.psw().cc(), N | C);

        steps(&mut sim, 1);
        assert_eq!(sim.reg_file[r(1)], 0);
        assert_eq!(sim.psw().cc(), C);
    }

    #[test]
    fn test_branch_and_jsr() {
        let mut sim = sim_with(0, &[
            0x0200,              // BR +2
            0xFFFF, 0xFFFF,
            enc(3, 0, 0xF, 1),   // JSR R1, 0x10(R0)
            0x0010,
        ]);
        steps(&mut sim, 1);
        assert_eq!(sim.pc(), 6);
        steps(&mut sim, 1);
        assert_eq!(sim.reg_file[r(1)], 10);
        assert_eq!(sim.pc(), 0x1A);
    }

    #[test]
    fn test_illegal_instruction() {
        let mut sim = sim_with(0, &[0x0108]);
        sim.tma = 0x1234;
        steps(&mut sim, 1);
        assert_eq!(sim.pc(), INSTRUCTION_TRAP);
        assert_eq!(sim.tma, 0);
        assert_eq!(sim.tpc, 0);
    }

    #[test]
    fn test_privilege() {
        let mut sim = sim_with(0, &[enc(1, 0, 1, 1)]); // CPUGET R1, PSW
        sim.set_psw_word(0xF000_0000);
        assert!(sim.psw().user_mode());

        steps(&mut sim, 1);
        assert_eq!(sim.pc(), PRIV_TRAP);
        assert_eq!(sim.reg_file[r(1)], 0);
        assert_eq!(sim.psw().level(), 0);
        assert_eq!(sim.psw().old_level(), 0xF);
    }

    #[test]
    fn test_return_from_trap() {
        let mut sim = sim_with(0, &[
            0x00E1, 0x0001,      // LIL R1, 0x100
            enc(0, 1, 1, 1),     // CPUSET R1, TPC
            enc(1, 1, 1, 0),     // CPUGET R0, TPC
        ]);
        sim.set_psw_word(0x0F00_0000);
        steps(&mut sim, 3);
        assert_eq!(sim.pc(), 0x100);
        assert!(sim.psw().user_mode());
        assert_eq!(sim.psw().old_level(), 0);
        assert_eq!(sim.imask(), 0xFF);
    }

    #[test]
    fn test_cycle_read() {
        let mut sim = sim_with(0, &[
            0x01D1,              // LIS R1, 1
            enc(1, 8, 1, 2),     // CPUGET R2, CYC
        ]);
        steps(&mut sim, 2);
        assert_eq!(sim.reg_file[r(2)], 2);
    }

    #[test]
    fn test_psw_word() {
        let mut sim = Simulator::default();
        sim.set_psw_word(0x7000_FF0F);
        assert_eq!(sim.psw_word(), 0x7000_FF0F);
        assert_eq!(sim.carries(), 0x1111_1110);
        assert_eq!(sim.imask(), 0xFF);

        // bit 15 is C, not part of the carry vector
        sim.set_psw_word(0x0000_8000);
        assert_eq!(sim.carries(), 0);
        assert_eq!(sim.psw_word(), 0);
    }

    #[test]
    fn test_coprocessor() {
        // disabled
        let mut sim = sim_with(0, &[enc(3, 1, 1, 1)]); // COGET R1, 1
        steps(&mut sim, 1);
        assert_eq!(sim.pc(), CO_TRAP);

        let mut sim = sim_with(0, &[
            0x02E1, 0x0001,      // LIL R1, 0x102
            enc(2, 0, 1, 1),     // COSET R1, COSTAT
            0x03D2,              // LIS R2, 3
            enc(2, 5, 1, 2),     // COSET R2, FPINT + 1
            enc(3, 3, 1, 3),     // COGET R3, FPA1
            enc(3, 0, 1, 4),     // COGET R4, COSTAT
        ]);
        steps(&mut sim, 6);
        assert_eq!(sim.reg_file[r(3)], 3.0f32.to_bits());
        assert_eq!(sim.reg_file[r(4)], 0x102);
        assert_eq!(sim.psw().cc(), 0);
        assert_eq!(sim.pc(), 14);
    }

    struct Lines(u8);
    impl ExternalDevice for Lines {
        fn io_read(&mut self, _offset: u32, _ctx: &mut IoCtx) -> u32 { 0 }
        fn io_write(&mut self, _offset: u32, _data: u32, _ctx: &mut IoCtx) {}
        fn io_reset(&mut self) {}
        fn interrupt_lines(&self) -> u8 { self.0 }
    }

    #[test]
    fn test_interrupt_priority() {
        let mut sim = sim_with(0, &[0x01D1]); // LIS R1, 1
        sim.bus.devices.add_device(Lines(0b110), 0xFF20_0000, 0x10).unwrap();

        // interrupts are masked at power on
        steps(&mut sim, 1);
        assert_eq!(sim.pc(), 2);

        sim.set_psw_word(0x7000_0000);
        steps(&mut sim, 1);
        assert_eq!(sim.pc(), 0x90);
        assert_eq!(sim.tpc, 2);
        assert_eq!(sim.psw().old_level(), 7);
        assert_eq!(sim.imask(), 0b1);
    }

    #[test]
    fn test_keyboard_polling() {
        let buf = Arc::new(RwLock::new(VecDeque::from(vec![b'A'])));
        let mut sim = sim_with(0, &[
            0x00E1, 0xFF10,      // LIL R1, 0xFF1000
            0x00C1,              // ORIS R1, 0
            enc(5, 1, 0xF, 2),   // LOAD R2, 4(R1)
            0x0004,
            enc(5, 1, 0xF, 3),   // LOAD R3, 0(R1)
            0x0000,
        ]);
        sim.bus.devices.add_keyboard(Keyboard::buffered(buf)).unwrap();
        sim.bus.poll_devices();
        sim.bus.cycles.refill(100);

        steps(&mut sim, 2);
        assert_eq!(sim.reg_file[r(1)], KEYBOARD_BASE);
        steps(&mut sim, 1);
        assert_eq!(sim.reg_file[r(2)], 1);
        // reading the status hands control to the monitor
        assert!(sim.bus.cycles.due());
        steps(&mut sim, 1);
        assert_eq!(sim.reg_file[r(3)], u32::from(b'A'));
    }

    #[test]
    fn test_run_stops() {
        // BR . at address 0 jumps to zero
        let mut sim = sim_with(0, &[0xFF00]);
        sim.breakpoint = 0x100;
        assert_eq!(sim.run_while(|_| true), PauseCondition::PcZero);

        let mut sim = sim_with(0, &[0x01D1, 0x02D2, 0x03D3]);
        sim.breakpoint = 4;
        assert_eq!(sim.run_while(|_| true), PauseCondition::Breakpoint);
        assert_eq!(sim.reg_file[r(2)], 2);
        assert_eq!(sim.reg_file[r(3)], 0);

        let mut sim = sim_with(0, &[0x01D1, 0xFF00]);
        sim.breakpoint = 0x100;
        sim.pause_flag().store(true, Ordering::Relaxed);
        assert_eq!(sim.run_while(|_| true), PauseCondition::Interrupted);
        assert!(!sim.pause_flag().load(Ordering::Relaxed));

        sim.reset();
        assert_eq!(sim.run_with_limit(5), PauseCondition::Tripwire);
        assert_eq!(sim.instructions_run, 5);
        assert_eq!(sim.pc(), 2);
    }

    struct Script {
        replies: VecDeque<Resume>,
        seen: Vec<PauseCondition>,
    }
    impl Monitor for Script {
        fn halted(&mut self, _sim: &mut Simulator, cond: PauseCondition) -> Resume {
            self.seen.push(cond);
            self.replies.pop_front().unwrap_or(Resume::Quit)
        }
    }

    #[test]
    fn test_monitor() {
        let mut sim = sim_with(0, &[
            0x01D1,    // LIS R1, 1
            0x02D2,    // LIS R2, 2
            0xFF00,    // BR .
        ]);
        sim.breakpoint = 4;
        let mut script = Script { replies: VecDeque::from(vec![Resume::Step, Resume::Run]), seen: vec![] };
        sim.run(&mut script);

        assert_eq!(script.seen, [PauseCondition::Start, PauseCondition::Step, PauseCondition::Breakpoint]);
        assert_eq!(sim.reg_file[r(2)], 2);
        assert_eq!(sim.pc(), 4);
    }

    #[test]
    fn test_config() {
        assert!(Simulator::new(SimFlags::default()).is_ok());

        let bad = |flags| Simulator::new(flags).err();
        assert_eq!(bad(SimFlags { recycle: 0, ..Default::default() }), Some(ConfigErr::BadRecycle(0)));
        assert_eq!(bad(SimFlags { mem_size: 0x12345, ..Default::default() }), Some(ConfigErr::BadMemSize(0x12345)));
        assert_eq!(bad(SimFlags { rom_size: 0x20_0000, ..Default::default() }), Some(ConfigErr::BadRomSize(0x20_0000)));

        // the grid has to fit in the display's address range
        let display = |display_lines, display_cols| SimFlags { display_lines, display_cols, ..Default::default() };
        assert!(Simulator::new(display(0x0F_FF00, 1)).is_ok());
        assert_eq!(bad(display(0x0F_FF01, 1)), Some(ConfigErr::BadDisplaySize { lines: 0x0F_FF01, cols: 1 }));
        assert_eq!(bad(display(0x1_0000, 0x1_0000)), Some(ConfigErr::BadDisplaySize { lines: 0x1_0000, cols: 0x1_0000 }));

        // flags changed after creation are checked again
        let mut sim = Simulator::default();
        sim.flags.display_cols = u32::MAX;
        assert_eq!(sim.attach_display().err(), Some(ConfigErr::BadDisplaySize { lines: 16, cols: u32::MAX }));
        sim.flags.display_cols = 80;
        assert!(sim.attach_display().is_ok());

        let mut sim = Simulator::default();
        assert_eq!(sim.set_recycle(MAX_RECYCLE + 1), Err(ConfigErr::BadRecycle(MAX_RECYCLE + 1)));
        assert_eq!(sim.set_recycle(MAX_RECYCLE), Ok(()));
        assert_eq!(sim.recycle(), MAX_RECYCLE);
    }
}

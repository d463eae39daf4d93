//! The terminal monitor.
//!
//! [`Console`] is a [`Monitor`] that draws the machine state on an ANSI terminal
//! and takes single-key commands while the machine is stopped:
//!
//! | key | command |
//! |-----|---------|
//! | `0`-`9`, `A`-`F` | shift a hex digit into the number |
//! | `r` | run |
//! | `s` | step one instruction |
//! | `p` | run until the PC reaches the number |
//! | `i` | run until the PC returns to where it is now |
//! | `n` | run until the next instruction |
//! | `>`, `<` | move the breakpoint by one halfword |
//! | `z` | set the refresh interval to the number |
//! | `m` | show memory at the number |
//! | `t` | toggle the memory view between code and data |
//! | `+`, `-` | move the memory view |
//! | `?` | show the next help line |
//! | `q` | quit |
//!
//! Keys come from a channel (see [`spawn_input`]) that it may share with the keyboard device.
//! The console only reads keys while the machine is stopped,
//! and the keyboard only takes them while it runs.
use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::sync::atomic::AtomicBool;
#[cfg(unix)]
use std::sync::atomic::Ordering;
use std::sync::Arc;
#[cfg(unix)]
use std::sync::OnceLock;

use crossbeam_channel::{Receiver, Sender};

use crate::sim::coproc::{COSTAT_ENABLES, FPU_ENABLE};
use crate::sim::debug::{Monitor, PauseCondition, Resume};
use crate::sim::device::Display;
use crate::sim::instr::{instr_size, Instr};
use crate::sim::psw::{C, N, V, Z};
use crate::sim::Simulator;

const TITLE: &str = "The Hawk Emulator";
const CPU_COLS: usize = 44;

const HELP: [&str; 6] = [
    "r(run) s(step) q(quit) ?(help)",
    "0-9/A-F(enter n) m(show m[n]) +-(move view) ?(help)",
    "t(toggle memory view) ?(help)",
    "0-9/A-F(enter n) p(run until pc=n) <>(move breakpoint) ?(help)",
    "n(next) i(iterate) ?(help)",
    "0-9/A-F(enter n) z(set refresh interval=n) ?(help)",
];

/// How the memory view shows memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    /// One instruction per line.
    Code,
    /// One word per line, in hex and as characters.
    Data,
}

/// A terminal monitor for the simulator.
#[derive(Debug)]
pub struct Console<W> {
    keys: Receiver<u8>,
    out: W,
    display: Option<Display>,

    number: u32,
    dump_addr: u32,
    dump_mode: DumpMode,
    help: usize,
    running: bool,
    last_stop: Option<PauseCondition>,
}

impl<W: Write> Console<W> {
    /// Creates a console reading keys from `keys` and drawing on `out`.
    ///
    /// If a display is given, its contents are drawn below the machine state.
    pub fn new(keys: Receiver<u8>, out: W, display: Option<Display>) -> Self {
        Self {
            keys,
            out,
            display,
            number: 0,
            dump_addr: 0,
            dump_mode: DumpMode::Code,
            help: 0,
            running: false,
            last_stop: None,
        }
    }

    /// The number being entered.
    pub fn number(&self) -> u32 {
        self.number
    }
    /// The first address of the memory view.
    pub fn dump_addr(&self) -> u32 {
        self.dump_addr
    }
    /// Consumes the console, returning its output.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Keeps the PC inside the code view.
    fn follow_pc(&mut self, pc: u32) {
        if self.dump_mode != DumpMode::Code {
            return;
        }
        if self.dump_addr > pc.wrapping_add(16) || self.dump_addr.wrapping_add(16) <= pc {
            self.dump_addr = pc.wrapping_sub(4);
        } else if self.dump_addr > pc {
            self.dump_addr = pc;
        }
    }

    /// The marker for a line of the memory view showing `addr`.
    fn marker(addr: u32, pc: u32, breakpoint: u32) -> &'static str {
        match (addr == pc, addr == breakpoint) {
            (true, true)   => "-*",
            (true, false)  => "->",
            (false, true)  => " *",
            (false, false) => "  ",
        }
    }

    fn dump_lines(&self, sim: &Simulator) -> Vec<String> {
        let mut lines = Vec::with_capacity(8);
        match self.dump_mode {
            DumpMode::Code => {
                let mut addr = self.dump_addr & !1;
                for _ in 0..8 {
                    let mut line = format!("{}{:06X}: ", Self::marker(addr, sim.pc(), sim.breakpoint), addr & 0xFF_FFFF);
                    match sim.halfword_at(addr) {
                        Some(ir) => {
                            let _ = write!(line, "{ir:04X} ");
                            let _ = match Instr::decode(ir) {
                                Ok(instr) if instr.is_long() => {
                                    let disp = sim.halfword_at(addr.wrapping_add(2)).unwrap_or(0);
                                    write!(line, "{instr:?} {disp:04X}")
                                },
                                Ok(instr) => write!(line, "{instr:?}"),
                                Err(_) => write!(line, "???"),
                            };
                            addr = addr.wrapping_add(instr_size(ir));
                        },
                        None => {
                            line.push_str("--");
                            addr = addr.wrapping_add(2);
                        }
                    }
                    lines.push(line);
                }
            },
            DumpMode::Data => {
                let base = self.dump_addr & !3;
                for i in 0..8 {
                    let addr = base.wrapping_add(4 * i);
                    let word_marker = Self::marker(addr, sim.pc() & !3, sim.breakpoint & !3);
                    let line = match sim.bus.mem.get(addr) {
                        Some(word) => {
                            let chars: String = word.to_le_bytes().iter()
                                .map(|&b| match b & 0x7F {
                                    c if c < b' ' => ' ',
                                    c => char::from(c),
                                })
                                .collect();
                            format!("{word_marker}{:06X}: {word:08X} {chars}", addr & 0xFF_FFFF)
                        },
                        None => format!("{word_marker}{:06X}: --------", addr & 0xFF_FFFF),
                    };
                    lines.push(line);
                }
            },
        }
        lines
    }

    fn cpu_lines(sim: &Simulator) -> Vec<String> {
        let flag = |bit| if sim.psw().is_set(bit) { '1' } else { '0' };
        let costat = sim.coproc.costat();

        let mut left = vec![
            format!("PC:  {:08X}", sim.pc()),
            format!("PSW: {:08X}", sim.psw_word()),
            format!("NZVC: {} {} {} {}", flag(N), flag(Z), flag(V), flag(C)),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ];
        if costat & COSTAT_ENABLES != 0 {
            left[4] = format!("COSTAT: {costat:04X}");
        }
        if costat & FPU_ENABLE != 0 {
            left[5] = "/----FPU----\\".to_string();
            left[6] = format!("A0: {:9.3e}", sim.coproc.fpu.accumulator(0));
            left[7] = format!("A1: {:9.3e}", sim.coproc.fpu.accumulator(1));
        }

        let regs = sim.reg_file.as_slice();
        left.into_iter()
            .enumerate()
            .map(|(i, l)| {
                let mid = match i {
                    0 => String::new(),
                    i => format!("R{:X}: {:08X}", i, regs[i]),
                };
                format!("{l:<15}{mid:<14}R{:X}: {:08X}", i + 8, regs[i + 8])
            })
            .collect()
    }

    /// Renders the whole screen.
    fn render(&self, sim: &Simulator) -> String {
        let mut screen = String::from("\x1b[H");
        let number = match self.number {
            0 => String::new(),
            n => format!("{n:08X}"),
        };
        let _ = write!(screen, "\x1b[36m {TITLE:<34}\x1b[0m {number}\x1b[K\r\n\x1b[K\r\n");
        let _ = write!(screen, "   /{:-^39}\\   /{:-^14}\\\x1b[K\r\n", "CPU", "MEMORY");

        for (cpu, mem) in Self::cpu_lines(sim).iter().zip(self.dump_lines(sim)) {
            let _ = write!(screen, "   {cpu:<width$}{mem}\x1b[K\r\n", width = CPU_COLS);
        }

        let menu = match self.running {
            true  => "  RUNNING   control c - halt".to_string(),
            false => {
                let stop = self.last_stop.map(|c| format!(" ({c})")).unwrap_or_default();
                format!("**HALTED**{stop}  {}", HELP[self.help])
            },
        };
        let _ = write!(screen, "\x1b[K\r\n {menu}\x1b[K\r\n\x1b[K\r\n");

        if let Some(disp) = &self.display {
            let grid = match disp.grid().read() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            let cols = disp.cols() as usize;
            if cols > 0 {
                for row in grid.chunks(cols) {
                    screen.push_str(&String::from_utf8_lossy(row));
                    screen.push_str("\x1b[K\r\n");
                }
            }
        }
        screen.push_str("\x1b[J");
        screen
    }

    fn draw(&mut self, sim: &Simulator) {
        let screen = self.render(sim);
        let result = self.out.write_all(screen.as_bytes()).and_then(|()| self.out.flush());
        if let Err(e) = result {
            log::warn!("could not draw console: {e}");
        }
    }

    /// Handles one key while stopped. Returns how to continue, if the key resumes the machine.
    fn command(&mut self, sim: &mut Simulator, key: u8) -> Option<Resume> {
        if let Some(digit) = char::from(key).to_digit(16) {
            self.number = (self.number << 4) | digit;
            return None;
        }

        match key {
            b'r' => return Some(Resume::Run),
            b's' => return Some(Resume::Step),
            b'p' => {
                sim.breakpoint = self.number & !1;
                self.number = 0;
                return Some(Resume::Run);
            },
            b'i' => {
                sim.breakpoint = sim.pc();
                return Some(Resume::Run);
            },
            b'n' => {
                sim.breakpoint = sim.next_instr_addr();
                return Some(Resume::Run);
            },
            b'q' => return Some(Resume::Quit),
            b'>' => sim.breakpoint = sim.breakpoint.wrapping_add(2),
            b'<' => sim.breakpoint = sim.breakpoint.wrapping_sub(2),
            b'z' => if sim.set_recycle(self.number).is_ok() {
                self.number = 0;
            },
            b'm' => {
                self.dump_addr = self.number;
                self.number = 0;
            },
            b't' => self.dump_mode = match self.dump_mode {
                DumpMode::Code => DumpMode::Data,
                DumpMode::Data => DumpMode::Code,
            },
            b'+' | b'-' => {
                let step = match self.dump_mode {
                    DumpMode::Code => 8,
                    DumpMode::Data => 16,
                };
                self.dump_addr = match key {
                    b'+' => self.dump_addr.wrapping_add(step),
                    _    => self.dump_addr.wrapping_sub(step),
                };
            },
            b'?' => self.help = (self.help + 1) % HELP.len(),
            _ => {}
        }
        None
    }
}

impl<W: Write> Monitor for Console<W> {
    fn refresh(&mut self, sim: &Simulator) {
        self.running = true;
        self.follow_pc(sim.pc());
        self.draw(sim);
    }

    fn halted(&mut self, sim: &mut Simulator, cond: PauseCondition) -> Resume {
        self.running = false;
        if cond != PauseCondition::Step {
            self.help = 0;
        }
        self.last_stop = Some(cond);
        self.follow_pc(sim.pc());
        self.draw(sim);

        loop {
            // a closed key channel means the host input is gone
            let Ok(key) = self.keys.recv() else { return Resume::Quit };
            if let Some(resume) = self.command(sim, key) {
                if resume == Resume::Run {
                    self.running = true;
                    self.draw(sim);
                }
                return resume;
            }
            self.draw(sim);
        }
    }
}

/// Starts a thread that forwards host standard input to a channel, byte by byte.
///
/// The channel closes when standard input does.
pub fn spawn_input() -> io::Result<Receiver<u8>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || forward_input(io::stdin(), &tx))?;
    Ok(rx)
}

fn forward_input(mut input: impl Read, tx: &Sender<u8>) {
    let mut buf = [0; 1];
    loop {
        match input.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => if tx.send(buf[0]).is_err() { break },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => {
                log::warn!("stopped reading input: {e}");
                break;
            }
        }
    }
}

/// Puts the terminal into unbuffered, unechoed input mode until dropped.
///
/// Signals (Ctrl-C) still work in this mode.
#[cfg(unix)]
pub struct RawModeGuard {
    original: libc::termios,
}

#[cfg(unix)]
impl RawModeGuard {
    /// Switches standard input to raw mode.
    ///
    /// # Errors
    ///
    /// Fails if standard input is not a terminal.
    pub fn new() -> io::Result<Self> {
        use std::mem::MaybeUninit;
        use std::os::unix::io::AsRawFd;

        let fd = io::stdin().as_raw_fd();
        let mut original = MaybeUninit::<libc::termios>::uninit();

        // SAFETY: tcgetattr fills `original` when it succeeds, and it is only read after that.
        let original = unsafe {
            if libc::tcgetattr(fd, original.as_mut_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            original.assume_init()
        };

        let mut raw = original;
        raw.c_lflag &= !(libc::ICANON | libc::ECHO);
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;

        // SAFETY: `raw` is a valid termios derived from the current settings.
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            return Err(io::Error::last_os_error());
        }
        print!("\x1b[2J\x1b[?25l");
        Ok(Self { original })
    }
}

#[cfg(unix)]
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;

        let fd = io::stdin().as_raw_fd();
        // SAFETY: `original` came from tcgetattr.
        unsafe {
            libc::tcsetattr(fd, libc::TCSANOW, &self.original);
        }
        print!("\x1b[?25h\r\n");
        let _ = io::stdout().flush();
    }
}

/// Puts the terminal into raw mode (a no-op on this platform).
#[cfg(not(unix))]
pub struct RawModeGuard;

#[cfg(not(unix))]
impl RawModeGuard {
    /// Does nothing on this platform.
    pub fn new() -> io::Result<Self> {
        Ok(Self)
    }
}

#[cfg(unix)]
static PAUSE: OnceLock<Arc<AtomicBool>> = OnceLock::new();

#[cfg(unix)]
extern "C" fn on_interrupt(_: libc::c_int) {
    if let Some(flag) = PAUSE.get() {
        flag.store(true, Ordering::Relaxed);
    }
}

/// Makes Ctrl-C raise `flag` instead of ending the process.
///
/// Only one flag can be installed per process.
///
/// # Errors
///
/// Fails if a flag was already installed or the handler could not be registered.
#[cfg(unix)]
pub fn install_pause_handler(flag: Arc<AtomicBool>) -> io::Result<()> {
    PAUSE.set(flag)
        .map_err(|_| io::Error::new(io::ErrorKind::AlreadyExists, "pause handler already installed"))?;

    let handler = on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only does an atomic load and store.
    let prev = unsafe { libc::signal(libc::SIGINT, handler) };
    match prev == libc::SIG_ERR {
        true  => Err(io::Error::last_os_error()),
        false => Ok(()),
    }
}

/// Makes Ctrl-C raise `flag` (a no-op on this platform).
#[cfg(not(unix))]
pub fn install_pause_handler(_flag: Arc<AtomicBool>) -> io::Result<()> {
    Ok(())
}

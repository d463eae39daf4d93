//! The memory bus.
//!
//! [`Bus`] routes every processor memory reference: RAM (with its read-only prefix),
//! memory-mapped devices in the I/O region, and the open bus in between.
//! It also keeps the [`CycleCounter`] (one cycle per successful word access)
//! and the single load-link token used by `LOADL` and `STOREC`.

use super::device::{DeviceHandler, IoCtx};
use super::mem::Mem;
use super::trap::Fault;

/// The first address of the I/O region.
pub const IO_BASE: u32 = 0xFF00_0000;
/// The value read from an I/O address no device answers.
pub const OPEN_BUS: u32 = 0xAAAA_AAAA;

/// Memory cycle accounting.
///
/// The total cycle count (what `CPUGET CYC` reads) is `banked + used`.
/// `used` counts bus accesses since the last refill, and the monitor is due
/// to take control once `used` reaches `interval`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleCounter {
    banked: u32,
    used: u32,
    interval: u32,
}
impl CycleCounter {
    /// Creates a counter at zero, with the monitor immediately due.
    pub fn new() -> Self {
        Default::default()
    }
    /// Counts one bus access.
    pub fn tick(&mut self) {
        self.used = self.used.wrapping_add(1);
    }
    /// The total number of cycles.
    pub fn total(&self) -> u32 {
        self.banked.wrapping_add(self.used)
    }
    /// Whether the monitor should be handed control.
    pub fn due(&self) -> bool {
        self.used >= self.interval
    }
    /// Moves the used cycles into the total and makes the monitor due.
    pub fn fold(&mut self) {
        self.refill(0);
    }
    /// Moves the used cycles into the total and grants a new interval.
    pub fn refill(&mut self, interval: u32) {
        self.banked = self.total();
        self.used = 0;
        self.interval = interval;
    }
    /// Grants another interval, keeping any overshoot of the current one.
    ///
    /// This keeps the monitor's refresh cadence at exactly one refresh per `interval` cycles
    /// while running.
    pub fn extend(&mut self, interval: u32) {
        let over = self.used.saturating_sub(self.interval);
        self.banked = self.banked.wrapping_add(self.used - over);
        self.used = over;
        self.interval = interval;
    }
    /// Replaces the total and makes the monitor due.
    pub fn set_total(&mut self, total: u32) {
        self.banked = total;
        self.used = 0;
        self.interval = 0;
    }
}

/// What lives at an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Read-only memory.
    Rom,
    /// Read/write memory.
    Ram,
    /// Between the end of memory and the I/O region. Every access faults.
    Hole,
    /// The I/O region (devices or open bus).
    Io,
}

/// The processor's view of memory and devices.
#[derive(Debug)]
pub struct Bus {
    /// Physical memory.
    pub mem: Mem,
    /// Devices mapped into the I/O region.
    pub devices: DeviceHandler,
    /// Cycle accounting.
    pub cycles: CycleCounter,
    /// The address watched by the last `LOADL`, if still valid.
    token: Option<u32>,
}
impl Bus {
    /// Creates a bus over the given memory and devices.
    pub fn new(mem: Mem, devices: DeviceHandler) -> Self {
        Self { mem, devices, cycles: CycleCounter::new(), token: None }
    }

    /// Classifies an address.
    pub fn classify(&self, addr: u32) -> Region {
        match addr {
            a if self.mem.is_rom(a) => Region::Rom,
            a if self.mem.contains(a) => Region::Ram,
            a if a < IO_BASE => Region::Hole,
            _ => Region::Io,
        }
    }

    /// Fetches the instruction word containing `pc`.
    ///
    /// Instructions can only come from memory; fetching from outside it is a bus fault.
    pub fn fetch(&mut self, pc: u32) -> Result<u32, Fault> {
        let word = self.mem.get(pc).ok_or(Fault::Bus { addr: pc })?;
        self.cycles.tick();
        Ok(word)
    }

    /// Loads the word at `addr` (which must be word aligned).
    pub fn load(&mut self, addr: u32) -> Result<u32, Fault> {
        let value = match self.classify(addr) {
            Region::Rom | Region::Ram => self.mem.get_raw(addr),
            Region::Hole => return Err(Fault::Bus { addr }),
            Region::Io => {
                let mut ctx = IoCtx::new();
                let value = self.devices.io_read(addr, &mut ctx);
                self.finish_io(ctx);
                value
            }
        };
        self.cycles.tick();
        Ok(value)
    }

    /// Stores a word at `addr` (which must be word aligned).
    ///
    /// Any store aimed at the load-link token invalidates it,
    /// even one that then faults.
    pub fn store(&mut self, addr: u32, value: u32) -> Result<(), Fault> {
        if self.token == Some(addr) {
            self.token = None;
        }

        match self.classify(addr) {
            Region::Rom | Region::Hole => return Err(Fault::Bus { addr }),
            Region::Ram => self.mem.set_raw(addr, value),
            Region::Io => {
                let mut ctx = IoCtx::new();
                self.devices.io_write(addr, value, &mut ctx);
                self.finish_io(ctx);
            }
        }
        self.cycles.tick();
        Ok(())
    }

    fn finish_io(&mut self, ctx: IoCtx) {
        if ctx.handoff_requested() {
            self.cycles.fold();
        }
    }

    /// Sets the load-link token.
    pub fn link(&mut self, addr: u32) {
        self.token = Some(addr);
    }
    /// Invalidates the load-link token.
    pub fn unlink(&mut self) {
        self.token = None;
    }
    /// The current load-link token.
    pub fn token(&self) -> Option<u32> {
        self.token
    }
    /// Stores a word only if `addr` still holds the load-link token.
    ///
    /// This returns whether the store happened. A successful store consumes the token.
    pub fn store_conditional(&mut self, addr: u32, value: u32) -> Result<bool, Fault> {
        match self.token == Some(addr) {
            true => self.store(addr, value).map(|()| true),
            false => Ok(false),
        }
    }

    /// Asks every device to check for host input.
    pub fn poll_devices(&mut self) {
        self.devices.poll();
    }
    /// The interrupt request lines currently asserted by devices.
    pub fn irq(&self) -> u8 {
        self.devices.irq()
    }
}

//! Memory handling for the Hawk simulator.
//!
//! This module consists of:
//! - [`Mem`]: The RAM (and ROM) array.
//! - [`RegFile`]: The register file.
//! - [`MemInit`]: How RAM is filled at power-on.

use rand::rngs::StdRng;
use rand::Rng;

use super::instr::Reg;

/// A source of power-on values for memory words.
pub trait WordFiller {
    /// Generate the data.
    fn generate(&mut self) -> u32;
}
impl WordFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u32 {
        rand::random()
    }
}
impl WordFiller for u32 {
    /// Sets each word to the given value.
    fn generate(&mut self) -> u32 {
        *self
    }
}
impl WordFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u32 {
        self.gen()
    }
}

/// Strategy used to fill the `mem` of the [`Simulator`] at power-on.
///
/// Real memory comes up holding garbage; filling it randomly
/// helps expose programs that read locations they never wrote.
///
/// [`Simulator`]: super::Simulator
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum MemInit {
    /// Every word starts as zero.
    #[default]
    Zeroed,

    /// Initializes each word randomly and non-deterministically.
    Unseeded,

    /// Initializes each word randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each word to a known value.
    Known {
        /// The value to initialize each value to.
        value: u32
    }
}
impl MemInit {
    pub(super) fn generator(&self) -> impl WordFiller {
        use rand::SeedableRng;

        match self {
            MemInit::Zeroed => InitGenerator::Known(0),
            MemInit::Unseeded => InitGenerator::Unseeded,
            MemInit::Seeded { seed } => InitGenerator::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MemInit::Known { value } => InitGenerator::Known(*value),
        }
    }
}

enum InitGenerator {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u32)
}
impl WordFiller for InitGenerator {
    fn generate(&mut self) -> u32 {
        match self {
            InitGenerator::Unseeded  => ().generate(),
            InitGenerator::Seeded(r) => r.generate(),
            InitGenerator::Known(k)  => k.generate(),
        }
    }
}

/// Physical memory.
///
/// Memory is a contiguous array of words starting at address 0.
/// The first `rom_size` bytes are read-only to the processor
/// (but not to [`Mem::set_raw`] or [`Mem::write_byte`], which the loader uses).
///
/// Words are little-endian: byte `a` of memory is bits `8 * (a & 3)` and up
/// of the word at `a & !3`.
///
/// Note that this struct only stores data. Bounds checking against the I/O region,
/// cycle counting, and the load-link token belong to [`Bus`].
///
/// ```
/// use hawk_emu::sim::mem::{Mem, MemInit};
///
/// let mut mem = Mem::new(0x20000, 0x10000, MemInit::Zeroed);
/// mem.write_byte(0x10001, 0xAB);
/// assert_eq!(mem.get_raw(0x10000), 0x0000_AB00);
/// assert!(mem.is_rom(0x0FFFC));
/// ```
///
/// [`Bus`]: super::bus::Bus
#[derive(Clone)]
pub struct Mem {
    data: Box<[u32]>,
    rom_size: u32
}
impl Mem {
    /// Creates a memory of `mem_size` bytes, of which the first `rom_size` are read-only.
    ///
    /// The sizes are assumed to be validated (see [`super::SimFlags::validate`]).
    pub fn new(mem_size: u32, rom_size: u32, init: MemInit) -> Self {
        let mut filler = init.generator();
        Self {
            data: std::iter::repeat_with(|| filler.generate())
                .take((mem_size / 4) as usize)
                .collect(),
            rom_size
        }
    }

    /// The size of memory in bytes.
    pub fn len(&self) -> u32 {
        (self.data.len() * 4) as u32
    }
    /// Whether memory has no words.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    /// The size of the read-only region in bytes.
    pub fn rom_size(&self) -> u32 {
        self.rom_size
    }
    /// Whether the address is backed by memory.
    pub fn contains(&self, addr: u32) -> bool {
        addr < self.len()
    }
    /// Whether the address is in the read-only region.
    pub fn is_rom(&self, addr: u32) -> bool {
        addr < self.rom_size
    }

    /// Gets the word containing the given address.
    ///
    /// This is **only** meant to be used to query the state of the memory
    /// (no cycle is counted, no bounds are enforced beyond panicking).
    /// To simulate a read, use [`Bus::load`].
    ///
    /// [`Bus::load`]: super::bus::Bus::load
    pub fn get_raw(&self, addr: u32) -> u32 {
        self.data[(addr >> 2) as usize]
    }
    /// Sets the word containing the given address, ignoring ROM protection.
    ///
    /// To simulate a write, use [`Bus::store`].
    ///
    /// [`Bus::store`]: super::bus::Bus::store
    pub fn set_raw(&mut self, addr: u32, data: u32) {
        self.data[(addr >> 2) as usize] = data;
    }
    /// Reads the word containing the given address, if it is in memory.
    pub fn get(&self, addr: u32) -> Option<u32> {
        self.data.get((addr >> 2) as usize).copied()
    }

    /// Stores one byte, ignoring ROM protection.
    pub fn write_byte(&mut self, addr: u32, byte: u8) {
        let shift = (addr & 3) * 8;
        let word = &mut self.data[(addr >> 2) as usize];
        *word = (*word & !(0xFF << shift)) | (u32::from(byte) << shift);
    }
    /// Reads one byte.
    pub fn read_byte(&self, addr: u32) -> u8 {
        (self.get_raw(addr) >> ((addr & 3) * 8)) as u8
    }
}
impl std::fmt::Debug for Mem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mem")
            .field("len", &self.len())
            .field("rom_size", &self.rom_size)
            .finish_non_exhaustive()
    }
}

/// The register file.
///
/// This struct can be indexed with a [`Reg`].
/// `R0` always reads as zero; writes to it are discarded.
///
/// # Example
///
/// ```
/// use hawk_emu::sim::mem::RegFile;
/// use hawk_emu::sim::instr::Reg;
///
/// let mut reg = RegFile::new();
/// reg.set(Reg::new(3), 11);
/// reg.set(Reg::R0, 11);
/// assert_eq!(reg[Reg::new(3)], 11);
/// assert_eq!(reg[Reg::R0], 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegFile([u32; 16]);
impl RegFile {
    /// Creates a register file with every register cleared.
    pub fn new() -> Self {
        Self([0; 16])
    }
    /// Writes a register. Writes to `R0` are discarded.
    pub fn set(&mut self, reg: Reg, value: u32) {
        if !reg.is_zero() {
            self.0[usize::from(reg)] = value;
        }
    }
    /// Reads a register, substituting `r0` for `R0`.
    ///
    /// This is how the address-forming operand slots see the PC through `R0`.
    pub fn get_or(&self, reg: Reg, r0: u32) -> u32 {
        match reg.is_zero() {
            true  => r0,
            false => self[reg],
        }
    }
    /// All sixteen registers, with `R0` first.
    pub fn as_slice(&self) -> &[u32; 16] {
        &self.0
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u32;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}

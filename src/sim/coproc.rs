//! Coprocessors.
//!
//! The processor talks to coprocessors through `COGET` and `COSET`.
//! Register 0 of the coprocessor space is COSTAT, which selects a coprocessor
//! and holds one enable bit per coprocessor:
//!
//! ```text
//!  15  12 11 10  8 7       1 0
//! +------+--+----+---------+-+
//! | COOP |  |SEL | enables | |
//! +------+--+----+---------+-+
//! ```
//!
//! Only coprocessor 1, the [`FloatUnit`], exists.

use super::psw::{C, N, Z};
use super::trap::Fault;

/// The writable bits of COSTAT.
pub const COSTAT_MASK: u32 = 0xF700 | COSTAT_ENABLES;
/// The enable bits of all coprocessors.
pub const COSTAT_ENABLES: u32 = 0x00FE;
/// Enable bit of the floating point coprocessor.
pub const FPU_ENABLE: u32 = 0x0002;
/// Long (64-bit) operand mode of the floating point coprocessor.
pub const FPU_LONG: u32 = 0x1000;
/// The coprocessor number of the floating point unit.
pub const FPU_SELECT: u8 = 1;

/// The result of a coprocessor read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoRead {
    /// The value read.
    pub value: u32,
    /// Condition codes (N, Z, C) reported with the value.
    pub cc: u32,
}
impl CoRead {
    fn plain(value: u32) -> Self {
        CoRead { value, cc: 0 }
    }
}

/// The floating point coprocessor.
///
/// There are two accumulators, always held at double precision.
/// Coprocessor register numbers select an accumulator with bit 0
/// and an operation with the rest:
///
/// | `reg >> 1` | write | read |
/// |---|---|---|
/// | 0 | stage the low word | the staged low word |
/// | 1 | load accumulator | the accumulator |
/// | 2 | convert integer into accumulator | 0 |
/// | 3 | square root into accumulator | 0 |
/// | 4-7 | add, subtract, multiply, divide into accumulator | 0 |
///
/// In long mode, operands are 64 bits: the high word is the value written,
/// and the low word is whatever was staged first.
/// Reading an accumulator in long mode returns the high word and stages the low one.
/// In short mode, operands are single precision and widened on arrival.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FloatUnit {
    acc: [f64; 2],
    low: u32
}
impl FloatUnit {
    /// Creates a float unit with both accumulators zero.
    pub fn new() -> Self {
        Default::default()
    }
    /// Gets accumulator `i` (0 or 1).
    pub fn accumulator(&self, i: usize) -> f64 {
        self.acc[i & 1]
    }
    /// The staged low word.
    pub fn low_word(&self) -> u32 {
        self.low
    }

    /// Performs a coprocessor write.
    pub fn set(&mut self, reg: u8, value: u32, long: bool) {
        let a = usize::from(reg & 1);
        let op = reg >> 1;

        if op == 0 {
            self.low = value;
            return;
        }

        let wide = (i64::from(value) << 32) | i64::from(self.low);
        let operand = match long {
            true  => f64::from_bits(wide as u64),
            false => f64::from(f32::from_bits(value)),
        };

        let acc = &mut self.acc[a];
        match op {
            1 => *acc = operand,
            2 => *acc = match long {
                true  => wide as f64,
                false => f64::from(value as i32),
            },
            3 => *acc = operand.sqrt(),
            4 => *acc += operand,
            5 => *acc -= operand,
            6 => *acc *= operand,
            _ => *acc /= operand,
        }
    }

    /// Performs a coprocessor read.
    pub fn get(&mut self, reg: u8, long: bool) -> CoRead {
        let a = usize::from(reg & 1);
        match reg >> 1 {
            0 => CoRead::plain(self.low),
            1 if long => {
                let acc = self.acc[a];
                let bits = acc.to_bits() as i64;
                self.low = bits as u32;

                let mut cc = 0;
                if bits < 0 { cc |= N; }
                if bits == 0 { cc |= Z; }
                if !acc.is_finite() { cc |= C; }
                CoRead { value: (bits >> 32) as u32, cc }
            },
            1 => {
                let short = self.acc[a] as f32;

                let mut cc = 0;
                if short < 0.0 { cc |= N; }
                if short == 0.0 { cc |= Z; }
                if !short.is_finite() { cc |= C; }
                CoRead { value: short.to_bits(), cc }
            },
            _ => CoRead::plain(0),
        }
    }
}

/// The coprocessor interface: COSTAT plus the attached coprocessors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Coprocessors {
    costat: u32,
    /// The floating point coprocessor.
    pub fpu: FloatUnit
}
impl Coprocessors {
    /// Creates the interface with every coprocessor disabled.
    pub fn new() -> Self {
        Default::default()
    }

    /// Gets COSTAT.
    pub fn costat(&self) -> u32 {
        self.costat
    }
    /// Sets COSTAT (bits outside [`COSTAT_MASK`] are dropped).
    pub fn set_costat(&mut self, value: u32) {
        self.costat = value & COSTAT_MASK;
    }
    /// The coprocessor selected by COSTAT.
    pub fn selected(&self) -> u8 {
        ((self.costat >> 8) & 0b111) as u8
    }

    fn fpu(&mut self) -> Result<(&mut FloatUnit, bool), Fault> {
        match self.selected() == FPU_SELECT && self.costat & FPU_ENABLE != 0 {
            true  => Ok((&mut self.fpu, self.costat & FPU_LONG != 0)),
            false => Err(Fault::MissingCoprocessor),
        }
    }

    /// Reads coprocessor register `reg` (1-15) of the selected coprocessor.
    ///
    /// # Errors
    ///
    /// Fails with [`Fault::MissingCoprocessor`] if the selected coprocessor
    /// does not exist or is disabled.
    pub fn get(&mut self, reg: u8) -> Result<CoRead, Fault> {
        let (fpu, long) = self.fpu()?;
        Ok(fpu.get(reg, long))
    }

    /// Writes coprocessor register `reg` (1-15) of the selected coprocessor.
    ///
    /// # Errors
    ///
    /// See [`Coprocessors::get`].
    pub fn set(&mut self, reg: u8, value: u32) -> Result<(), Fault> {
        let (fpu, long) = self.fpu()?;
        fpu.set(reg, value, long);
        Ok(())
    }
}

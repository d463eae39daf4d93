//! The processor status word.
//!
//! The key type here is [`Psw`], which holds the condition codes and privilege levels.
//! The carry-per-nibble field of the architectural PSW is not stored in [`Psw`];
//! it is derived from the adder's carry vector with [`pack_carries`] whenever
//! software reads the PSW, and restored with [`unpack_carries`] when software writes it.

/// Negative condition code.
pub const N: u32 = 0x8;
/// Zero condition code.
pub const Z: u32 = 0x4;
/// Overflow condition code.
pub const V: u32 = 0x2;
/// Carry condition code.
pub const C: u32 = 0x1;
/// All condition codes.
pub const CC: u32 = N | Z | V | C;
/// The carry-per-nibble field.
pub const CBITS: u32 = 0x0000_FF00;
/// The current privilege level field.
pub const LEVEL: u32 = 0xF000_0000;
/// The previous privilege level field.
pub const OLEVEL: u32 = 0x0F00_0000;

/// Renders the carry vector (and the C flag) into the PSW's carry field.
///
/// Bit `8 + i` of the result samples carry-vector bit `4 + 4i` (for `i` in `0..7`),
/// which is the carry out of nibble `i`.
/// Bit 15 mirrors the C flag.
pub fn pack_carries(carries: u32, carry_flag: bool) -> u32 {
    let field = (0..7)
        .filter(|i| carries & (0x10 << (4 * i)) != 0)
        .fold(0, |acc, i| acc | (0x100 << i));

    match carry_flag {
        true  => field | 0x8000,
        false => field,
    }
}

/// Expands the PSW's carry field back into a carry vector.
///
/// This is the inverse of [`pack_carries`] for bits 8 through 14.
/// Bit 15 is not part of the carry vector (it is the C flag).
pub fn unpack_carries(psw: u32) -> u32 {
    (0..7)
        .filter(|i| psw & (0x100 << i) != 0)
        .fold(0, |acc, i| acc | (0x10 << (4 * i)))
}

/// A wrapper over `u32` in order to faciliate the PSW.
///
/// ```text
///  level
///  |  previous level
///  |  |                  carry field (not stored, see [`pack_carries`])
///  |  |                  |    condition codes
///  V  V                  V    V
///  LLLL OOOO .... .... CCCC CCCC .... NZVC
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Psw(u32);

impl Psw {
    /// Creates the power-on PSW (everything zero, full privilege).
    pub fn new() -> Self {
        Psw(0)
    }
    /// Creates a PSW from a word written by software.
    ///
    /// The carry field is discarded; it must be handled through [`unpack_carries`].
    pub fn from_word(word: u32) -> Self {
        Psw(word & !CBITS)
    }
    /// Gets the bit representation of this PSW, excluding the carry field.
    pub fn get(&self) -> u32 {
        self.0
    }
    /// Gets the bit representation of the PSW as software reads it.
    pub fn to_word(&self, carries: u32) -> u32 {
        self.0 | pack_carries(carries, self.is_set(C))
    }

    /// The condition codes (`NZVC`).
    pub fn cc(&self) -> u32 {
        self.0 & CC
    }
    /// Checks whether the given condition code bits are all set.
    pub fn is_set(&self, flags: u32) -> bool {
        self.0 & flags == flags
    }
    /// Replaces all four condition codes.
    pub fn set_cc(&mut self, cc: u32) {
        self.0 = (self.0 & !CC) | (cc & CC);
    }
    /// Sets the given condition code bits.
    pub fn raise(&mut self, flags: u32) {
        self.0 |= flags & CC;
    }
    /// Clears the given condition code bits.
    pub fn lower(&mut self, flags: u32) {
        self.0 &= !(flags & CC);
    }

    /// The current privilege level (0-15).
    pub fn level(&self) -> u8 {
        (self.0 >> 28) as u8
    }
    /// The previous privilege level (0-15).
    pub fn old_level(&self) -> u8 {
        ((self.0 >> 24) & 0xF) as u8
    }
    /// Whether the processor is in the unprivileged state (level is all ones).
    pub fn user_mode(&self) -> bool {
        self.0 & LEVEL == LEVEL
    }
    /// The interrupt priority (the low three bits of the level).
    pub fn priority(&self) -> u8 {
        self.level() & 0b111
    }

    /// Shifts the level into the previous level and clears the level.
    ///
    /// This is the privilege half of trap entry.
    pub fn push_level(&mut self) {
        let level = self.0 & LEVEL;
        self.0 = (self.0 & !(LEVEL | OLEVEL)) | (level >> 4);
    }
    /// Restores the previous level into the level and clears the previous level.
    ///
    /// This is the privilege half of a return from trap.
    pub fn pop_level(&mut self) {
        let old = self.0 & OLEVEL;
        self.0 = (self.0 & !(LEVEL | OLEVEL)) | (old << 4);
    }
}
impl std::fmt::Debug for Psw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;
        struct Cc(u32);

        impl std::fmt::Debug for Cc {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                for (bit, c) in [(N, 'N'), (Z, 'Z'), (V, 'V'), (C, 'C')] {
                    f.write_char(if self.0 & bit != 0 { c } else { '.' })?;
                }
                Ok(())
            }
        }

        f.debug_struct("Psw")
            .field("level", &self.level())
            .field("old_level", &self.old_level())
            .field("cc", &Cc(self.cc()))
            .finish()
    }
}

// Branch condition predicates.
const T:   u16 = 0x0001;
const NS:  u16 = 0x0002;
const ZS:  u16 = 0x0004;
const VS:  u16 = 0x0008;
const CS:  u16 = 0x0010;
const LT:  u16 = 0x0020;
const LE:  u16 = 0x0040;
const LEU: u16 = 0x0080;
const NR:  u16 = 0x0200;
const ZR:  u16 = 0x0400;
const VR:  u16 = 0x0800;
const CR:  u16 = 0x1000;
const GE:  u16 = 0x2000;
const GT:  u16 = 0x4000;
const GTU: u16 = 0x8000;

/// For each `NZVC` combination, the set of branch conditions that hold.
///
/// Condition 8 (`0x0100`) is unassigned and never holds.
const COND_TABLE: [u16; 16] = [
    /* .... */ T | NR | ZR | VR | CR | GE | GT | LEU,
    /* ...C */ T | NR | ZR | VR | CS | GE | GT | GTU,
    /* ..V. */ T | NR | ZR | VS | CR | LT | LE | LEU,
    /* ..VC */ T | NR | ZR | VS | CS | LT | LE | GTU,
    /* .Z.. */ T | NR | ZS | VR | CR | GE | LE | LEU,
    /* .Z.C */ T | NR | ZS | VR | CS | GE | LE | LEU,
    /* .ZV. */ T | NR | ZS | VS | CR | LT | LE | LEU,
    /* .ZVC */ T | NR | ZS | VS | CS | LT | LE | LEU,
    /* N... */ T | NS | ZR | VR | CR | LT | LE | LEU,
    /* N..C */ T | NS | ZR | VR | CS | LT | LE | GTU,
    /* N.V. */ T | NS | ZR | VS | CR | GE | GT | LEU,
    /* N.VC */ T | NS | ZR | VS | CS | GE | GT | GTU,
    /* NZ.. */ T | NS | ZS | VR | CR | LT | LE | LEU,
    /* NZ.C */ T | NS | ZS | VR | CS | LT | LE | LEU,
    /* NZV. */ T | NS | ZS | VS | CR | GE | LE | LEU,
    /* NZVC */ T | NS | ZS | VS | CS | GE | LE | LEU,
];

/// Tests branch condition `cond` (0-15) against the condition codes.
pub fn condition_holds(cc: u32, cond: u8) -> bool {
    COND_TABLE[(cc & CC) as usize] & (1 << (cond & 0xF)) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_nibble_stride() {
        // carry out of nibble 0 is carry-vector bit 4
        assert_eq!(pack_carries(0x0000_0010, false), 0x0100);
        assert_eq!(pack_carries(0x0000_0100, false), 0x0200);
        assert_eq!(pack_carries(0x1000_0000, false), 0x4000);
        // bits that are not nibble boundaries are not sampled
        assert_eq!(pack_carries(0xEEEE_EEEF, false), 0);
        assert_eq!(pack_carries(0x8000_0000, false), 0);
        // C lands in bit 15
        assert_eq!(pack_carries(0, true), 0x8000);
        assert_eq!(pack_carries(0x1111_1110, true), 0xFF00);
    }

    #[test]
    fn test_unpack_inverse() {
        assert_eq!(unpack_carries(0x0100), 0x0000_0010);
        assert_eq!(unpack_carries(0x4000), 0x1000_0000);
        assert_eq!(unpack_carries(0xFF00), 0x1111_1110);
        assert_eq!(unpack_carries(0x8000), 0);
        assert_eq!(unpack_carries(0xFFFF_00FF), 0);

        for field in 0..0x80u32 {
            let carries = unpack_carries(field << 8);
            assert_eq!(pack_carries(carries, false), field << 8);
        }
    }

    #[test]
    fn test_psw_word() {
        let mut psw = Psw::from_word(0xF000_FF0F);
        assert_eq!(psw.get(), 0xF000_000F);
        assert!(psw.user_mode());
        assert_eq!(psw.priority(), 7);
        assert_eq!(psw.to_word(0), 0xF000_800F);

        psw.set_cc(0);
        assert_eq!(psw.to_word(0x10), 0xF000_0100);
    }

    #[test]
    fn test_level_stacking() {
        let mut psw = Psw::from_word(0xF300_0004);
        psw.push_level();
        assert_eq!(psw.get(), 0x0F00_0004);
        assert_eq!(psw.level(), 0);
        assert_eq!(psw.old_level(), 0xF);

        psw.pop_level();
        assert_eq!(psw.get(), 0xF000_0004);
        assert!(psw.user_mode());
    }

    #[test]
    fn test_conditions() {
        // always
        for cc in 0..16 {
            assert!(condition_holds(cc, 0));
            assert!(!condition_holds(cc, 8));
        }
        // BZS / BZR
        assert!(condition_holds(Z, 2));
        assert!(!condition_holds(0, 2));
        assert!(condition_holds(0, 10));
        // signed less than: N xor V
        assert!(condition_holds(N, 5));
        assert!(condition_holds(V, 5));
        assert!(!condition_holds(N | V, 5));
        assert!(condition_holds(N | V, 13));
        // unsigned greater than: C and not Z
        assert!(condition_holds(C, 15));
        assert!(!condition_holds(C | Z, 15));
        assert!(condition_holds(C | Z, 7));
    }
}

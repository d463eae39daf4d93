//! The carry-tracking arithmetic/logic unit.
//!
//! Every function here is pure: it takes operand values (and whatever condition codes it needs)
//! and returns an [`AluOut`] describing the result, the new condition codes, and the carry vector.
//! The [`Simulator`] is responsible for committing these to its registers and PSW.
//!
//! [`Simulator`]: super::Simulator

use super::psw::{C, N, V, Z};

/// The result of an ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluOut {
    /// The computed value.
    pub value: u32,
    /// The new condition codes (`NZVC`).
    pub cc: u32,
    /// The carry into each bit position of the adder.
    ///
    /// This is zero for operations that do not go through the adder.
    pub carries: u32,
}
impl AluOut {
    /// Wraps a value which did not go through the adder,
    /// setting N and Z from it and clearing V, C, and the carry vector.
    pub fn logical(value: u32) -> Self {
        AluOut { value, cc: nz(value), carries: 0 }
    }
    fn with(mut self, flag: u32, cond: bool) -> Self {
        if cond { self.cc |= flag; }
        self
    }
}

fn nz(value: u32) -> u32 {
    let mut cc = 0;
    if value & 0x8000_0000 != 0 { cc |= N; }
    if value == 0 { cc |= Z; }
    cc
}

/// The addition primitive.
///
/// This computes `x + y + cin` and records the carry into every bit position.
/// V is set when both operands have the same sign and the result's sign differs;
/// C is the carry out of the sign bit.
pub fn add(x: u32, y: u32, cin: bool) -> AluOut {
    let s = x ^ y;
    let sum = x.wrapping_add(y).wrapping_add(u32::from(cin));
    let carries = s ^ sum;
    let v = !s & (sum ^ y);
    let c = v ^ carries;

    AluOut { value: sum, cc: nz(sum), carries }
        .with(V, v & 0x8000_0000 != 0)
        .with(C, c & 0x8000_0000 != 0)
}

/// Whether any byte of the value is zero.
///
/// Loads that set condition codes report this in C, for string scanning.
pub fn has_null_byte(value: u32) -> bool {
    value.to_le_bytes().contains(&0)
}

fn left_masks(count: u32) -> (u32, u32) {
    let shift = count.wrapping_sub(1) & 0xF;
    (0x7FFF_FFFF >> shift, 0x7FFF_FFFF >> (shift + 1))
}
fn left_flags(out: AluOut, d: u32, count: u32) -> AluOut {
    let (cmask, vm) = left_masks(count);
    let c = d & !cmask;
    let mut v = d & !vm;
    if v != 0 {
        v = v.wrapping_add(vm).wrapping_add(1) & vm;
    }
    out.with(C, c != 0).with(V, v != 0)
}

/// `MOVESL`: shift `d` left by `((count - 1) & 0xF) + 1`.
pub fn shift_left(d: u32, count: u8) -> AluOut {
    let count = u32::from(count);
    let shift = (count.wrapping_sub(1) & 0xF) + 1;
    left_flags(AluOut::logical(d << shift), d, count)
}

/// `ADDSL`: shift `d` left by `((count - 1) & 0xF) + 1` and add `addend`.
pub fn shift_left_add(d: u32, addend: u32, count: u8) -> AluOut {
    let count = u32::from(count);
    let shift = (count.wrapping_sub(1) & 0xF) + 1;
    left_flags(add(d << shift, addend, false), d, count)
}

/// `ADDSR` and `ADDSRU`: add `addend` to `d`, then shift right by `((count - 1) & 0xF) + 1`.
///
/// In signed mode, the vacated bits take the true sign of the sum (N xor V).
/// In unsigned mode, the carry out of the sum is shifted in.
pub fn add_shift_right(d: u32, addend: u32, count: u8, signed: bool) -> AluOut {
    let shift = (u32::from(count).wrapping_sub(1) & 0xF) + 1;
    let m = 0x7FFF_FFFF >> (shift - 1);

    let sum = add(d, addend, false);
    let v = sum.value & !(0xFFFF_FFFF << shift);
    let c = sum.value & (1 << (shift - 1));
    let mut value = sum.value >> shift;

    if signed {
        let negative = sum.cc & N != 0;
        let overflow = sum.cc & V != 0;
        match negative != overflow {
            true  => value |= !m,
            false => value &= m,
        }
    } else {
        value &= m;
        if sum.cc & C != 0 {
            value = value.wrapping_add(m + 1);
        }
    }

    AluOut::logical(value)
        .with(V, v != 0)
        .with(C, c != 0)
}

fn trunc_masks(count: u8) -> u32 {
    let s = u32::from(count).wrapping_sub(1) & 0xF;
    0xFFFF_FFFF << s
}
fn trunc_flags(out: AluOut, d: u32, m: u32) -> AluOut {
    let c = d & (m << 1);
    let mut g = d & m;
    if g != 0 {
        g = !g & m;
    }
    out.with(C, c != 0).with(V, g != 0)
}

/// `TRUNC`: keep the low `((count - 1) & 0xF) + 1` bits of `d`.
pub fn truncate(d: u32, count: u8) -> AluOut {
    let m = trunc_masks(count);
    trunc_flags(AluOut::logical(d & !(m << 1)), d, m)
}

/// `SXT`: sign extend `d` from bit `(count - 1) & 0xF`.
pub fn sign_extend(d: u32, count: u8) -> AluOut {
    let m = trunc_masks(count);
    let value = match d & (!m).wrapping_add(1) != 0 {
        true  => d | m,
        false => d & !m,
    };
    trunc_flags(AluOut::logical(value), d, m)
}

/// The `ADJUST` correction for a given source field,
/// computed from the carry vector and condition codes of a previous addition.
///
/// Unassigned sources produce no correction.
pub fn adjustment(src: u8, carries: u32, cc: u32) -> u32 {
    let digit_carries = || {
        let mut d = (carries >> 1) & 0x0888_8888;
        if cc & C != 0 { d |= 0x8000_0000; }
        d
    };

    match src {
        // BCD: subtract 6 from every digit that did not carry
        0x2 => {
            let d = digit_carries() ^ 0x8888_8888;
            ((d >> 1) | (d >> 2)).wrapping_neg()
        },
        // EX3: add or subtract 3 to restore excess-3 digits
        0x3 => {
            let mut d = digit_carries();
            d |= d >> 2;
            d |= (d << 1) | 1;
            d ^ 0xCCCC_CCCC
        },
        // CMSB
        0x4 if cc & C != 0 => 0x8000_0000,
        // SSQ
        0x5 if cc & N != 0 && cc & V != 0 => 1,
        // PLUS1 through PLUS128
        0x8..=0xF => 1 << (src - 8),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_add_flags() {
        let out = add(0x7FFF_FFFF, 1, false);
        assert_eq!(out.value, 0x8000_0000);
        assert_eq!(out.cc, N | V);

        let out = add(0xFFFF_FFFF, 1, false);
        assert_eq!(out.value, 0);
        assert_eq!(out.cc, Z | C);
        assert_eq!(out.carries, 0xFFFF_FFFE);

        let out = add(0x8000_0000, 0x8000_0000, false);
        assert_eq!(out.cc, Z | V | C);

        // subtraction through the adder: 5 - 3
        let out = add(5, !3, true);
        assert_eq!(out.value, 2);
        assert_eq!(out.cc, C);
    }

    #[test]
    fn test_carry_vector() {
        // 0x0F + 0x01 carries out of bits 0-3 (into bits 1-4)
        let out = add(0x0F, 0x01, false);
        assert_eq!(out.carries, 0x1E);

        let out = add(0x0000_0009, 0x0000_0009, false);
        assert_eq!(out.carries & 0x10, 0x10);
    }

    #[test]
    fn test_null_bytes() {
        assert!(has_null_byte(0x4142_0043));
        assert!(has_null_byte(0));
        assert!(!has_null_byte(0x0101_0101));
    }

    #[test]
    fn test_shift_left() {
        let out = shift_left(0x4000_0001, 1);
        assert_eq!(out.value, 0x8000_0002);
        assert_eq!(out.cc, N);

        let out = shift_left(0xC000_0000, 1);
        assert_eq!(out.value, 0x8000_0000);
        assert_eq!(out.cc & C, C);

        // a count of 0 means 16
        let out = shift_left(0x0000_1234, 0);
        assert_eq!(out.value, 0x1234_0000);
        assert_eq!(out.cc, 0);
    }

    #[test]
    fn test_shift_left_add() {
        // r * 5 == (r << 2) + r
        let out = shift_left_add(7, 7, 2);
        assert_eq!(out.value, 35);
        assert_eq!(out.cc, 0);
        assert_ne!(out.carries, 0);
    }

    #[test]
    fn test_add_shift_right() {
        // signed: (-8 + 0) >> 1 == -4
        let out = add_shift_right(-8i32 as u32, 0, 1, true);
        assert_eq!(out.value, -4i32 as u32);
        assert_eq!(out.cc, N);

        // bits shifted out are reported in V, last bit out in C
        let out = add_shift_right(0b111, 0, 2, true);
        assert_eq!(out.value, 1);
        assert_eq!(out.cc, V | C);

        // signed overflow keeps the true sign
        let out = add_shift_right(0x7FFF_FFFF, 1, 1, true);
        assert_eq!(out.value, 0x4000_0000);

        // unsigned: carry out is shifted back in
        let out = add_shift_right(0xFFFF_FFFF, 1, 1, false);
        assert_eq!(out.value, 0x8000_0000);
        let out = add_shift_right(0xFFFF_FFFE, 0, 1, false);
        assert_eq!(out.value, 0x7FFF_FFFF);
    }

    #[test]
    fn test_truncate_sign_extend() {
        let out = truncate(0x1234_56FF, 8);
        assert_eq!(out.value, 0xFF);
        assert_eq!(out.cc & C, C);

        let out = truncate(0x7F, 8);
        assert_eq!(out.value, 0x7F);
        assert_eq!(out.cc & C, 0);

        let out = sign_extend(0x0000_0080, 8);
        assert_eq!(out.value, 0xFFFF_FF80);
        assert_eq!(out.cc & N, N);

        let out = sign_extend(0xFFFF_FF7F, 8);
        assert_eq!(out.value, 0x7F);
        assert_eq!(out.cc & N, 0);
    }

    #[test]
    fn test_decimal_adjust() {
        // BCD 19 + 28, with one operand biased by 0x66666666
        let sum = add(0x19 + 0x6666_6666, 0x28, false);
        assert_eq!(sum.carries, 0xF0);
        let adj = adjustment(0x2, sum.carries, sum.cc);
        assert_eq!(adj, 0x9999_99A0);
        assert_eq!(sum.value.wrapping_add(adj), 0x47);

        // 55 + 45 = 100
        let sum = add(0x55 + 0x6666_6666, 0x45, false);
        let adj = adjustment(0x2, sum.carries, sum.cc);
        assert_eq!(sum.value.wrapping_add(adj), 0x100);

        // carry out of the top digit comes from C
        assert_eq!(adjustment(0x2, 0, C), 0xF999_999A);
        assert_eq!(adjustment(0x2, 0, 0), 0x9999_999A);

        assert_eq!(adjustment(0x3, 0, 0), 0xCCCC_CCCD);
        assert_eq!(adjustment(0x3, 0x1111_1110, C), 0x3333_3333);
    }

    #[test]
    fn test_adjust_misc() {
        assert_eq!(adjustment(0x4, 0, C), 0x8000_0000);
        assert_eq!(adjustment(0x4, 0, 0), 0);
        assert_eq!(adjustment(0x5, 0, N | V), 1);
        assert_eq!(adjustment(0x5, 0, N), 0);
        assert_eq!(adjustment(0x8, 0, 0), 1);
        assert_eq!(adjustment(0xF, 0, 0), 128);
        for src in [0x0, 0x1, 0x6, 0x7] {
            assert_eq!(adjustment(src, 0xFFFF_FFFF, N | Z | V | C), 0);
        }
    }

    proptest! {
        #[test]
        fn prop_add_overflow_matches_signs(x: u32, y: u32) {
            let out = add(x, y, false);
            let same_sign = (x ^ y) & 0x8000_0000 == 0;
            let differs = (out.value ^ x) & 0x8000_0000 != 0;
            prop_assert_eq!(out.cc & V != 0, same_sign && differs);
        }

        #[test]
        fn prop_add_carry_is_bit_32(x: u32, y: u32, cin: bool) {
            let out = add(x, y, cin);
            let wide = u64::from(x) + u64::from(y) + u64::from(cin);
            prop_assert_eq!(out.value, wide as u32);
            prop_assert_eq!(out.cc & C != 0, wide >> 32 != 0);
            prop_assert_eq!(out.cc & Z != 0, wide as u32 == 0);
        }

        #[test]
        fn prop_carry_vector_bits(x: u32, y: u32) {
            // bit i+1 of the vector is the carry out of bit i
            let out = add(x, y, false);
            for i in 0..31 {
                let mask = (1u64 << (i + 1)) - 1;
                let carry_out = ((u64::from(x) & mask) + (u64::from(y) & mask)) >> (i + 1) != 0;
                prop_assert_eq!(out.carries >> (i + 1) & 1 != 0, carry_out);
            }
        }
    }
}

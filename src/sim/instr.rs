//! Instruction decoding.
//!
//! Every instruction is a 16-bit halfword, optionally followed by a 16-bit
//! displacement halfword (the long memory reference forms and `LIL`).
//! [`Instr::decode`] turns the first halfword into an [`Instr`],
//! rejecting the encodings that the architecture leaves unassigned.
//!
//! The fields of a halfword are:
//! ```text
//!  15    12 11     8 7      4 3      0
//! +--------+--------+--------+--------+
//! | S1/OP1 | S2/SRC |   OP   |  DST   |
//! +--------+--------+--------+--------+
//!           \____ CONST ____/
//! ```
//! (`CONST` is bits 8 through 15.)

use super::trap::Fault;

/// A general-purpose register (`R0` through `R15`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub(crate) u8);
impl Reg {
    /// The zero register.
    ///
    /// In most operand positions, this reads as zero.
    /// In a few address-forming positions, it reads as the PC.
    pub const R0: Reg = Reg(0);

    /// Creates a register from the low four bits of `n`.
    pub fn new(n: u8) -> Self {
        Reg(n & 0xF)
    }
    /// Gets the register number of this [`Reg`]. This is always between 0 and 15.
    pub fn reg_no(self) -> u8 {
        self.0
    }
    /// Whether this is `R0`.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}
impl std::fmt::Debug for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
impl From<Reg> for usize {
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}

/// A decoded instruction.
///
/// Register operand order is always destination first.
/// The `u8` operands of the shift, truncate, and special forms are the raw
/// four-bit field; their interpretation (such as "0 means 16") happens at execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    // Short memory reference forms (OP = F, OP1 = 8..F)
    /// `MOVE dst, x`: copy without touching the condition codes.
    Move(Reg, Reg),
    /// `MOVECC dst, x`: copy and set condition codes.
    MoveCc(Reg, Reg),
    /// `LOADS dst, x`: load word; with `dst = R0`, jump to the loaded word.
    LoadS(Reg, Reg),
    /// `LOADSCC dst, x`: load word and set condition codes.
    LoadSCc(Reg, Reg),
    /// `JSRS dst, x`: jump to `x`, saving the return address in `dst`.
    JsrS(Reg, Reg),
    /// `STORES src, x`: store word.
    StoreS(Reg, Reg),
    /// `LOADL dst, x`: load word and set the link token.
    LoadL(Reg, Reg),
    /// `STOREC src, x`: store word if the link token still holds.
    StoreC(Reg, Reg),

    // Long memory reference forms (OP = F, OP1 = 2..7), followed by a displacement
    /// `LEA dst, disp(x)`: compute an address.
    Lea(Reg, Reg),
    /// `LEACC dst, disp(x)`: compute an address and set condition codes.
    LeaCc(Reg, Reg),
    /// `LOAD dst, disp(x)`: load word; with `dst = R0`, jump to the loaded word.
    Load(Reg, Reg),
    /// `LOADCC dst, disp(x)`: load word and set condition codes.
    LoadCc(Reg, Reg),
    /// `JSR dst, disp(x)`: jump, saving the return address in `dst`.
    Jsr(Reg, Reg),
    /// `STORE src, disp(x)`: store word.
    Store(Reg, Reg),

    /// `LIL dst, const24`: load a 24-bit signed immediate; followed by the upper 16 bits.
    Lil(Reg, u8),
    /// `LIS dst, const8`: load an 8-bit signed immediate.
    Lis(Reg, u8),
    /// `ORIS dst, const8`: shift left by 8 and merge in an 8-bit immediate.
    Oris(Reg, u8),

    /// `MOVESL dst, s1, count`
    MoveSl(Reg, Reg, u8),
    /// `ADDSL dst, s1, count`
    AddSl(Reg, Reg, u8),
    /// `ADDSR dst, s1, count`
    AddSr(Reg, Reg, u8),
    /// `ADDSRU dst, s1, count`
    AddSrU(Reg, Reg, u8),
    /// `STUFFB dst, s1, s2`
    StuffB(Reg, Reg, Reg),
    /// `STUFFH dst, s1, s2`
    StuffH(Reg, Reg, Reg),
    /// `EXTB dst, s1, s2`
    ExtB(Reg, Reg, Reg),
    /// `EXTH dst, s1, s2`
    ExtH(Reg, Reg, Reg),
    /// `ADD dst, s1, s2`
    Add(Reg, Reg, Reg),
    /// `SUB dst, s1, s2`
    Sub(Reg, Reg, Reg),

    // Two register forms (OP = 1)
    /// `TRUNC dst, count`
    Trunc(Reg, u8),
    /// `SXT dst, count`
    Sxt(Reg, u8),
    /// `BTRUNC dst, count`: computed branch into a table of halfwords.
    BTrunc(Reg, u8),
    /// `ADDSI dst, const4`
    AddSi(Reg, u8),
    /// `AND dst, src`
    And(Reg, Reg),
    /// `OR dst, src`
    Or(Reg, Reg),
    /// `EQU dst, src`
    Equ(Reg, Reg),
    /// `ADDC dst, src`
    AddC(Reg, Reg),
    /// `SUBB dst, src`
    SubB(Reg, Reg),
    /// `ADJUST dst, kind`
    Adjust(Reg, u8),
    /// `PLUS dst, src`
    Plus(Reg, Reg),
    /// `COGET dst, coreg`
    CoGet(Reg, u8),
    /// `COSET src, coreg`
    CoSet(Reg, u8),
    /// `CPUGET dst, cpureg`
    CpuGet(Reg, u8),
    /// `CPUSET src, cpureg`
    CpuSet(Reg, u8),

    /// `Bcc disp8`: conditional branch, with the condition and the halfword displacement.
    Branch(u8, i8),
}

/// The primary opcode field.
pub fn op(ir: u16) -> u8 {
    ((ir >> 4) & 0xF) as u8
}
/// The destination field.
pub fn dst(ir: u16) -> u8 {
    (ir & 0xF) as u8
}
/// The `S1`/`OP1` field.
pub fn op1(ir: u16) -> u8 {
    ((ir >> 12) & 0xF) as u8
}
/// The `S2`/`SRC`/`X` field.
pub fn src(ir: u16) -> u8 {
    ((ir >> 8) & 0xF) as u8
}
/// The 8-bit constant field.
pub fn konst(ir: u16) -> u8 {
    (ir >> 8) as u8
}

/// The size in bytes (2 or 4) of the instruction starting with halfword `ir`.
///
/// This only looks at the opcode fields, so it is meaningful even for illegal encodings.
pub fn instr_size(ir: u16) -> u32 {
    match (op(ir), op1(ir)) {
        (0xE, _) | (0xF, 0x2..=0x7) => 4,
        _ => 2,
    }
}

impl Instr {
    /// Decodes the first halfword of an instruction.
    ///
    /// Unassigned encodings produce [`Fault::IllegalInstruction`].
    pub fn decode(ir: u16) -> Result<Self, Fault> {
        let d = Reg::new(dst(ir));
        let s1 = Reg::new(op1(ir));
        let s2 = Reg::new(src(ir));
        let n = src(ir);

        let instr = match op(ir) {
            0xF => match op1(ir) {
                0xF if !d.is_zero() => Instr::Move(d, s2),
                0xE => Instr::MoveCc(d, s2),
                0xD => Instr::LoadS(d, s2),
                0xC => Instr::LoadSCc(d, s2),
                0xB => Instr::JsrS(d, s2),
                0xA if !s2.is_zero() => Instr::StoreS(d, s2),
                0x9 if !s2.is_zero() => Instr::LoadL(d, s2),
                0x8 if !s2.is_zero() => Instr::StoreC(d, s2),
                0x7 if !d.is_zero() => Instr::Lea(d, s2),
                0x6 => Instr::LeaCc(d, s2),
                0x5 => Instr::Load(d, s2),
                0x4 => Instr::LoadCc(d, s2),
                0x3 => Instr::Jsr(d, s2),
                0x2 => Instr::Store(d, s2),
                _ => return Err(Fault::IllegalInstruction),
            },
            0xE => Instr::Lil(d, konst(ir)),
            0xD if !d.is_zero() => Instr::Lis(d, konst(ir)),
            0xC if !d.is_zero() => Instr::Oris(d, konst(ir)),
            0xB if !s1.is_zero() => Instr::MoveSl(d, s1, n),
            0xA if !d.is_zero() => Instr::AddSl(d, s1, n),
            0x9 => Instr::AddSr(d, s1, n),
            0x8 => Instr::AddSrU(d, s1, n),
            0x7 if !d.is_zero() => Instr::StuffB(d, s1, s2),
            0x6 if !d.is_zero() => Instr::StuffH(d, s1, s2),
            0x5 if !s1.is_zero() => Instr::ExtB(d, s1, s2),
            0x4 if !s1.is_zero() => Instr::ExtH(d, s1, s2),
            0x3 if !s1.is_zero() && !s2.is_zero() => Instr::Add(d, s1, s2),
            0x2 if !s2.is_zero() => Instr::Sub(d, s1, s2),
            0x1 => match op1(ir) {
                0xF if !d.is_zero() => Instr::Trunc(d, n),
                0xE if !d.is_zero() => Instr::Sxt(d, n),
                0xD if !d.is_zero() => Instr::BTrunc(d, n),
                0xC if !d.is_zero() => Instr::AddSi(d, n),
                0xB if !d.is_zero() && !s2.is_zero() => Instr::And(d, s2),
                0xA if !d.is_zero() && !s2.is_zero() => Instr::Or(d, s2),
                0x9 if !d.is_zero() => Instr::Equ(d, s2),
                0x7 => Instr::AddC(d, s2),
                0x6 => Instr::SubB(d, s2),
                0x5 if !d.is_zero() => Instr::Adjust(d, n),
                0x4 if !d.is_zero() => Instr::Plus(d, s2),
                0x3 => Instr::CoGet(d, n),
                0x2 => Instr::CoSet(d, n),
                0x1 => Instr::CpuGet(d, n),
                0x0 => Instr::CpuSet(d, n),
                _ => return Err(Fault::IllegalInstruction),
            },
            0x0 if dst(ir) != 0x8 => Instr::Branch(dst(ir), konst(ir) as i8),
            _ => return Err(Fault::IllegalInstruction),
        };

        Ok(instr)
    }

    /// Whether this instruction is followed by a displacement halfword.
    pub fn is_long(&self) -> bool {
        matches!(self,
            | Instr::Lea(..) | Instr::LeaCc(..)
            | Instr::Load(..) | Instr::LoadCc(..)
            | Instr::Jsr(..) | Instr::Store(..)
            | Instr::Lil(..)
        )
    }
}

/// Sign extends the low 16 bits of a value.
pub fn sext16(half: u16) -> u32 {
    half as i16 as i32 as u32
}
/// Sign extends the low 8 bits of a value.
pub fn sext8(byte: u8) -> u32 {
    byte as i8 as i32 as u32
}

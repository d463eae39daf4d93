//! Traps and interrupts.
//!
//! A [`Fault`] is raised by the execution of an instruction and is always
//! delivered as a trap to a fixed vector. Interrupts come from the seven request lines
//! of the devices and are selected with [`select_interrupt`] at instruction boundaries.

/// The restart vector (where the processor powers on).
pub const RESTART_TRAP: u32 = 0x00;
/// Vector for illegal memory accesses.
pub const BUS_TRAP: u32 = 0x10;
/// Vector for unassigned instruction encodings.
pub const INSTRUCTION_TRAP: u32 = 0x20;
/// Vector for privileged instructions executed at the unprivileged level.
pub const PRIV_TRAP: u32 = 0x30;
/// Vector for memory management faults.
///
/// No memory management unit is modeled, so nothing is ever delivered here.
pub const MMU_TRAP: u32 = 0x40;
/// Vector for operations on a disabled or missing coprocessor.
pub const CO_TRAP: u32 = 0x50;
/// Vector of interrupt line 0. Each following line is [`TRAP_VECTOR_STEP`] bytes later.
pub const INTERRUPT_TRAP: u32 = 0x80;
/// Distance between consecutive trap vectors.
pub const TRAP_VECTOR_STEP: u32 = 0x10;

/// A synchronous fault raised while executing an instruction.
///
/// These are never host errors: each one transfers control to the guest's
/// handler at [`Fault::vector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// Access to an address no memory or device answers,
    /// a store into ROM, or an instruction fetch outside memory.
    #[error("bus fault at address {addr:#010X}")]
    Bus {
        /// The offending address (saved into TMA).
        addr: u32
    },
    /// Execution of an unassigned instruction encoding.
    #[error("illegal instruction")]
    IllegalInstruction,
    /// A privileged instruction was executed at the unprivileged level.
    #[error("privilege violation")]
    PrivilegeViolation,
    /// A coprocessor operation addressed a disabled or nonexistent coprocessor.
    #[error("missing coprocessor")]
    MissingCoprocessor,
}
impl Fault {
    /// The trap vector this fault is delivered to.
    pub fn vector(&self) -> u32 {
        match self {
            Fault::Bus { .. } => BUS_TRAP,
            Fault::IllegalInstruction => INSTRUCTION_TRAP,
            Fault::PrivilegeViolation => PRIV_TRAP,
            Fault::MissingCoprocessor => CO_TRAP,
        }
    }

    /// The new value of TMA, if this fault changes it.
    pub fn trap_address(&self) -> Option<u32> {
        match *self {
            Fault::Bus { addr } => Some(addr),
            Fault::IllegalInstruction => Some(0),
            Fault::PrivilegeViolation | Fault::MissingCoprocessor => None,
        }
    }
}

/// The set of interrupt lines enabled at a given priority (0-7).
///
/// Priority `p` enables lines `0..=p`.
pub fn mask_for_priority(priority: u8) -> u8 {
    0xFF >> (7 - (priority & 0b111))
}

/// Picks the interrupt to take, if any.
///
/// The lowest numbered pending and enabled line wins.
pub fn select_interrupt(irq: u8, imask: u8) -> Option<u8> {
    match irq & imask {
        0 => None,
        pending => Some(pending.trailing_zeros() as u8),
    }
}

/// The vector for interrupt line `line`.
pub fn interrupt_vector(line: u8) -> u32 {
    INTERRUPT_TRAP + u32::from(line) * TRAP_VECTOR_STEP
}

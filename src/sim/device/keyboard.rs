use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockWriteGuard, TryLockError};
use std::time::Duration;

use crossbeam_channel::Receiver;

use super::{ExternalDevice, IoCtx};

const KBD_DATA: u32 = 0x0;
const KBD_STAT: u32 = 0x4;

/// Interrupt enable.
const KBD_IE: u8 = 0x80;
/// Overrun error.
const KBD_ERR: u8 = 0x40;
/// A byte is waiting in the data register.
const KBD_RDY: u8 = 0x01;
/// The keyboard interrupts on line 7.
const KBD_IRQ: u8 = 1 << 7;

/// Where a [`Keyboard`] gets host bytes from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// A shared in-memory buffer (useful for scripted input).
    Buffer(Arc<RwLock<VecDeque<u8>>>),
    /// A channel fed by a host input thread.
    Channel(Receiver<u8>),
}
impl KeySource {
    fn try_input(buffer: &RwLock<VecDeque<u8>>) -> Option<RwLockWriteGuard<'_, VecDeque<u8>>> {
        match buffer.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Takes the next byte, if one is waiting.
    fn take(&self) -> Option<u8> {
        match self {
            KeySource::Buffer(buf) => Self::try_input(buf)?.pop_front(),
            KeySource::Channel(rx) => rx.try_recv().ok(),
        }
    }
    fn clear(&self) {
        match self {
            KeySource::Buffer(buf) => if let Some(mut b) = Self::try_input(buf) { b.clear() },
            KeySource::Channel(rx) => rx.try_iter().for_each(drop),
        }
    }
}

/// The memory-mapped keyboard.
///
/// | offset | register | read | write |
/// |--------|----------|------|-------|
/// | 0 | DATA | last byte received; clears READY and the interrupt request | ignored |
/// | 4 | STATUS | `IE ERR . . . . . READY` | replaces IE and ERR |
///
/// Host bytes are only taken when the device is polled
/// (see [`ExternalDevice::poll`]), one byte per poll.
/// Reading STATUS is "polite": if nothing is ready, the read sleeps briefly,
/// and in every case it asks the bus to hand control to the monitor,
/// so that a guest spinning on STATUS lets the host deliver input.
#[derive(Debug, Clone)]
pub struct Keyboard {
    source: KeySource,
    data: u8,
    status: u8,
    request: bool,
    delay: Duration
}
impl Keyboard {
    /// Creates a new keyboard over a host byte source,
    /// with the given delay for STATUS reads that find nothing ready.
    pub fn new(source: KeySource, delay: Duration) -> Self {
        Self { source, data: 0, status: 0, request: false, delay }
    }
    /// Creates a keyboard reading from a shared buffer, with no polling delay.
    pub fn buffered(buffer: Arc<RwLock<VecDeque<u8>>>) -> Self {
        Self::new(KeySource::Buffer(buffer), Duration::ZERO)
    }

    /// Gets the status register.
    pub fn status(&self) -> u8 {
        self.status
    }
}
impl ExternalDevice for Keyboard {
    fn io_read(&mut self, offset: u32, ctx: &mut IoCtx) -> u32 {
        match offset {
            KBD_DATA => {
                self.status &= !KBD_RDY;
                self.request = false;
                u32::from(self.data)
            },
            KBD_STAT => {
                let status = self.status;
                if status & KBD_RDY == 0 && !self.delay.is_zero() {
                    std::thread::sleep(self.delay);
                }
                ctx.request_handoff();
                u32::from(status)
            },
            _ => 0
        }
    }

    fn io_write(&mut self, offset: u32, data: u32, _ctx: &mut IoCtx) {
        if offset == KBD_STAT {
            let mask = KBD_IE | KBD_ERR;
            self.status = (self.status & !mask) | (data as u8 & mask);
        }
        if self.status & KBD_IE == 0 {
            self.request = false;
        }
    }

    fn io_reset(&mut self) {
        self.source.clear();
        self.data = 0;
        self.status = 0;
        self.request = false;
    }

    fn poll(&mut self) {
        let Some(byte) = self.source.take() else { return };
        self.data = byte;
        match self.status & KBD_RDY == 0 {
            true  => self.status |= KBD_RDY,
            false => self.status |= KBD_ERR,
        }
        if self.status & KBD_IE != 0 {
            log::trace!("keyboard requests interrupt");
            self.request = true;
        }
    }

    fn interrupt_lines(&self) -> u8 {
        match self.request {
            true  => KBD_IRQ,
            false => 0,
        }
    }
}

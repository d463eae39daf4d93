//! Handlers for external devices connected to the Simulator.
//!
//! Devices live in the I/O region (at and above [`IO_BASE`]) and are reached
//! by word loads and stores. A device may also assert interrupt request lines.
//!
//! The core types here are:
//! - [`ExternalDevice`]: A device which can be connected to the Simulator.
//! - [`DeviceHandler`]: The registry that routes I/O addresses to devices.
//!
//! This module also provides the two standard devices:
//! - [`Keyboard`]: Keyboard device that reads off of a buffer or a channel of host bytes.
//! - [`Display`]: Memory-mapped character grid.

mod keyboard;
mod display;

pub use keyboard::{Keyboard, KeySource};
pub use display::Display;

use super::bus::{IO_BASE, OPEN_BUS};
use super::ConfigErr;

/// Base address of the display.
pub const DISPLAY_BASE: u32 = 0xFF00_0000;
/// Size of the display's address range.
pub const DISPLAY_LEN: u32 = 0x0010_0000;
/// Base address of the keyboard.
pub const KEYBOARD_BASE: u32 = 0xFF10_0000;
/// Size of the keyboard's address range.
pub const KEYBOARD_LEN: u32 = 0x10;

/// Side channel from a device access back to the bus.
#[derive(Debug, Default)]
pub struct IoCtx {
    handoff: bool
}
impl IoCtx {
    /// Creates a context with nothing requested.
    pub fn new() -> Self {
        Default::default()
    }
    /// Asks that the monitor be handed control at the next instruction boundary.
    ///
    /// The cycles used so far are folded into the total.
    pub fn request_handoff(&mut self) {
        self.handoff = true;
    }
    /// Whether a handoff was requested.
    pub fn handoff_requested(&self) -> bool {
        self.handoff
    }
}

/// An external device, which can be accessed via memory-mapped IO or via interrupts.
pub trait ExternalDevice: Send + Sync + 'static {
    /// Reads the word at the given offset into the device's range.
    fn io_read(&mut self, offset: u32, ctx: &mut IoCtx) -> u32;

    /// Writes the word at the given offset into the device's range.
    fn io_write(&mut self, offset: u32, data: u32, ctx: &mut IoCtx);

    /// Resets device.
    fn io_reset(&mut self);

    /// Checks the host side for new input.
    ///
    /// This is called each time the monitor refreshes while the machine runs.
    fn poll(&mut self) {}

    /// The interrupt request lines (bit `i` for line `i`) this device asserts.
    fn interrupt_lines(&self) -> u8 {
        0
    }
}

struct Mapping {
    base: u32,
    len: u32,
    dev: Box<dyn ExternalDevice>
}
impl Mapping {
    fn contains(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.base) < self.len
    }
    fn overlaps(&self, base: u32, len: u32) -> bool {
        let end = u64::from(base) + u64::from(len);
        let self_end = u64::from(self.base) + u64::from(self.len);
        u64::from(base) < self_end && u64::from(self.base) < end
    }
}

/// The central hub for all external devices for the Simulator.
///
/// Each device owns a contiguous address range in the I/O region.
/// Addresses in the I/O region that no device owns behave as an open bus:
/// reads return [`OPEN_BUS`] and writes are discarded.
#[derive(Default)]
pub struct DeviceHandler {
    devices: Vec<Mapping>
}
impl DeviceHandler {
    /// Creates a handler with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new device.
    ///
    /// This accepts an external device and the range of addresses the device should act on.
    /// If successful, the ID of the device is returned.
    ///
    /// # Errors
    ///
    /// The cases where the device cannot be added include:
    /// - The range is empty or not entirely inside the I/O region.
    /// - The range overlaps with another device's.
    pub fn add_device(&mut self, dev: impl ExternalDevice, base: u32, len: u32) -> Result<usize, ConfigErr> {
        let in_io = base >= IO_BASE && len != 0 && base.checked_add(len - 1).is_some();
        if !in_io { return Err(ConfigErr::DeviceOutsideIo { base, len }) };
        if self.devices.iter().any(|m| m.overlaps(base, len)) {
            return Err(ConfigErr::DeviceOverlap { base, len });
        }

        log::debug!("device attached at {base:#010X}..={:#010X}", base + (len - 1));
        self.devices.push(Mapping { base, len, dev: Box::new(dev) });
        Ok(self.devices.len() - 1)
    }
    /// Attaches a keyboard at its standard address.
    pub fn add_keyboard(&mut self, kb: impl ExternalDevice) -> Result<usize, ConfigErr> {
        self.add_device(kb, KEYBOARD_BASE, KEYBOARD_LEN)
    }
    /// Attaches a display at its standard address.
    pub fn add_display(&mut self, ds: impl ExternalDevice) -> Result<usize, ConfigErr> {
        self.add_device(ds, DISPLAY_BASE, DISPLAY_LEN)
    }
    /// The number of attached devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }
    /// Whether no devices are attached.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn find(&mut self, addr: u32) -> Option<&mut Mapping> {
        self.devices.iter_mut().find(|m| m.contains(addr))
    }

    /// Reads from the device owning `addr`, or the open bus.
    pub fn io_read(&mut self, addr: u32, ctx: &mut IoCtx) -> u32 {
        match self.find(addr) {
            Some(m) => m.dev.io_read(addr - m.base, ctx),
            None => OPEN_BUS,
        }
    }
    /// Writes to the device owning `addr`, if any.
    pub fn io_write(&mut self, addr: u32, data: u32, ctx: &mut IoCtx) {
        if let Some(m) = self.find(addr) {
            m.dev.io_write(addr - m.base, data, ctx);
        }
    }
    /// Resets all the devices connected to this handler.
    pub fn io_reset(&mut self) {
        self.devices.iter_mut().for_each(|m| m.dev.io_reset());
    }
    /// Polls all devices for host input.
    pub fn poll(&mut self) {
        self.devices.iter_mut().for_each(|m| m.dev.poll());
    }
    /// The union of the interrupt lines asserted by all devices.
    pub fn irq(&self) -> u8 {
        self.devices.iter().fold(0, |acc, m| acc | m.dev.interrupt_lines())
    }
}
impl std::fmt::Debug for DeviceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.devices.iter().map(|m| m.base..=m.base + (m.len - 1)))
            .finish()
    }
}

fn resolve_lock<G>(e: std::sync::TryLockResult<G>) -> Option<G> {
    use std::sync::TryLockError;

    match e {
        Ok(guard) => Some(guard),
        Err(TryLockError::WouldBlock) => None,
        Err(TryLockError::Poisoned(e)) => Some(e.into_inner())
    }
}
impl<D: ExternalDevice> ExternalDevice for std::sync::Arc<std::sync::RwLock<D>> {
    fn io_read(&mut self, offset: u32, ctx: &mut IoCtx) -> u32 {
        resolve_lock(self.try_write())
            .map_or(OPEN_BUS, |mut g| g.io_read(offset, ctx))
    }

    fn io_write(&mut self, offset: u32, data: u32, ctx: &mut IoCtx) {
        if let Some(mut guard) = resolve_lock(self.try_write()) {
            guard.io_write(offset, data, ctx);
        }
    }

    fn io_reset(&mut self) {
        if let Some(mut guard) = resolve_lock(self.try_write()) {
            guard.io_reset();
        }
    }

    fn poll(&mut self) {
        if let Some(mut guard) = resolve_lock(self.try_write()) {
            guard.poll();
        }
    }

    fn interrupt_lines(&self) -> u8 {
        resolve_lock(self.try_read())
            .map_or(0, |g| g.interrupt_lines())
    }
}
impl<D: ExternalDevice> ExternalDevice for std::sync::Arc<std::sync::Mutex<D>> {
    fn io_read(&mut self, offset: u32, ctx: &mut IoCtx) -> u32 {
        resolve_lock(self.try_lock())
            .map_or(OPEN_BUS, |mut g| g.io_read(offset, ctx))
    }

    fn io_write(&mut self, offset: u32, data: u32, ctx: &mut IoCtx) {
        if let Some(mut guard) = resolve_lock(self.try_lock()) {
            guard.io_write(offset, data, ctx);
        }
    }

    fn io_reset(&mut self) {
        if let Some(mut guard) = resolve_lock(self.try_lock()) {
            guard.io_reset();
        }
    }

    fn poll(&mut self) {
        if let Some(mut guard) = resolve_lock(self.try_lock()) {
            guard.poll();
        }
    }

    fn interrupt_lines(&self) -> u8 {
        resolve_lock(self.try_lock())
            .map_or(0, |g| g.interrupt_lines())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, RwLock};

    use super::*;

    /// Records the last write and echoes it back.
    #[derive(Default)]
    struct Latch {
        last: u32,
        lines: u8
    }
    impl ExternalDevice for Latch {
        fn io_read(&mut self, offset: u32, _ctx: &mut IoCtx) -> u32 {
            self.last.wrapping_add(offset)
        }
        fn io_write(&mut self, _offset: u32, data: u32, ctx: &mut IoCtx) {
            self.last = data;
            ctx.request_handoff();
        }
        fn io_reset(&mut self) {
            self.last = 0;
        }
        fn interrupt_lines(&self) -> u8 {
            self.lines
        }
    }

    #[test]
    fn test_routing() {
        let mut handler = DeviceHandler::new();
        handler.add_device(Latch::default(), 0xFF20_0000, 0x10).unwrap();

        let mut ctx = IoCtx::new();
        handler.io_write(0xFF20_0004, 40, &mut ctx);
        assert!(ctx.handoff_requested());
        assert_eq!(handler.io_read(0xFF20_0008, &mut ctx), 48);

        // open bus just past the device
        assert_eq!(handler.io_read(0xFF20_0010, &mut ctx), OPEN_BUS);

        handler.io_reset();
        assert_eq!(handler.io_read(0xFF20_0000, &mut ctx), 0);
    }

    #[test]
    fn test_bad_ranges() {
        let mut handler = DeviceHandler::new();
        handler.add_device(Latch::default(), 0xFF20_0000, 0x10).unwrap();

        assert_eq!(
            handler.add_device(Latch::default(), 0xFF20_000C, 0x10),
            Err(ConfigErr::DeviceOverlap { base: 0xFF20_000C, len: 0x10 })
        );
        assert_eq!(
            handler.add_device(Latch::default(), 0x0010_0000, 0x10),
            Err(ConfigErr::DeviceOutsideIo { base: 0x0010_0000, len: 0x10 })
        );
        assert_eq!(
            handler.add_device(Latch::default(), 0xFFFF_FFF8, 0x10),
            Err(ConfigErr::DeviceOutsideIo { base: 0xFFFF_FFF8, len: 0x10 })
        );
        // touching ranges are fine
        assert!(handler.add_device(Latch::default(), 0xFF20_0010, 0x10).is_ok());
        assert_eq!(handler.len(), 2);
    }

    #[test]
    fn test_irq_union() {
        let mut handler = DeviceHandler::new();
        handler.add_device(Latch { last: 0, lines: 0x80 }, 0xFF20_0000, 4).unwrap();
        handler.add_device(Latch { last: 0, lines: 0x02 }, 0xFF30_0000, 4).unwrap();
        assert_eq!(handler.irq(), 0x82);
    }

    #[test]
    fn test_shared_devices() {
        let shared = Arc::new(RwLock::new(Latch::default()));
        let mutexed = Arc::new(Mutex::new(Latch { last: 0, lines: 1 }));

        let mut handler = DeviceHandler::new();
        handler.add_device(Arc::clone(&shared), 0xFF20_0000, 4).unwrap();
        handler.add_device(Arc::clone(&mutexed), 0xFF30_0000, 4).unwrap();

        let mut ctx = IoCtx::new();
        handler.io_write(0xFF20_0000, 7, &mut ctx);
        assert_eq!(shared.read().unwrap().last, 7);
        assert_eq!(handler.irq(), 1);

        // a device held by the host reads as open bus
        let _guard = mutexed.lock().unwrap();
        assert_eq!(handler.io_read(0xFF30_0000, &mut ctx), OPEN_BUS);
    }
}

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use super::{ExternalDevice, IoCtx, DISPLAY_LEN};

const DISP_LINES: u32 = 0x0;
const DISP_COLS: u32 = 0x4;
const DISP_START: u32 = 0x100;

/// The value read from display offsets that hold nothing.
const DISP_NONE: u32 = 0xFFFF_FFFF;

/// A memory-mapped character grid.
///
/// | offset | read | write |
/// |--------|------|-------|
/// | 0 | number of lines | ignored |
/// | 4 | number of columns | ignored |
/// | `0x100..0x100 + lines * cols` | four characters | four characters |
///
/// Characters are stored row-major, one byte per cell.
/// Written bytes are masked to 7 bits, and control characters are
/// made printable (`^A` is stored as `A`).
#[derive(Debug, Clone)]
pub struct Display {
    grid: Arc<RwLock<Vec<u8>>>,
    lines: u32,
    cols: u32
}
impl Display {
    /// The most cells a display can have and still fit in its address range.
    pub const MAX_CELLS: u32 = DISPLAY_LEN - DISP_START;

    /// Creates a display of the given dimensions, filled with spaces.
    ///
    /// The dimensions are not checked here; [`crate::sim::Simulator::attach_display`]
    /// only builds displays of at most [`Display::MAX_CELLS`] cells.
    pub fn new(lines: u32, cols: u32) -> Self {
        let cells = lines as usize * cols as usize;
        Self { grid: Arc::new(RwLock::new(vec![b' '; cells])), lines, cols }
    }

    /// Gets a handle to the character grid.
    pub fn grid(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.grid
    }
    /// The number of lines.
    pub fn lines(&self) -> u32 {
        self.lines
    }
    /// The number of columns.
    pub fn cols(&self) -> u32 {
        self.cols
    }

    fn area_end(&self) -> u32 {
        self.lines.saturating_mul(self.cols).saturating_add(DISP_START)
    }

    fn try_grid(&self) -> Option<RwLockReadGuard<'_, Vec<u8>>> {
        match self.grid.try_read() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
    fn try_grid_mut(&self) -> Option<RwLockWriteGuard<'_, Vec<u8>>> {
        match self.grid.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

fn printable(byte: u8) -> u8 {
    match byte & 0x7F {
        c if c < b' ' => c | b'@',
        c => c,
    }
}

impl ExternalDevice for Display {
    fn io_read(&mut self, offset: u32, _ctx: &mut IoCtx) -> u32 {
        match offset {
            DISP_LINES => self.lines,
            DISP_COLS => self.cols,
            o if (DISP_START..self.area_end()).contains(&o) => {
                let Some(grid) = self.try_grid() else { return DISP_NONE };
                let cell = (o - DISP_START) as usize;
                let mut bytes = [0; 4];
                for (b, c) in bytes.iter_mut().zip(grid.iter().skip(cell)) {
                    *b = *c;
                }
                u32::from_le_bytes(bytes)
            },
            _ => DISP_NONE
        }
    }

    fn io_write(&mut self, offset: u32, data: u32, _ctx: &mut IoCtx) {
        if !(DISP_START..self.area_end()).contains(&offset) { return };
        let Some(mut grid) = self.try_grid_mut() else { return };

        let cell = (offset - DISP_START) as usize;
        for (c, b) in grid.iter_mut().skip(cell).zip(data.to_le_bytes()) {
            *c = printable(b);
        }
    }

    fn io_reset(&mut self) {
        if let Some(mut grid) = self.try_grid_mut() {
            grid.fill(b' ');
        }
    }
}

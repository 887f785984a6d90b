use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

/// Well-known variable indices (32-bit slots).
pub mod slots {
    pub const KEY: usize = 0;
    pub const SOUND_PLAYING: usize = 1;
    pub const MOUSE_X: usize = 2;
    pub const MOUSE_Y: usize = 3;
    pub const MOUSE_BUTTONS: usize = 4;
    pub const YEAR: usize = 5;
    pub const MONTH: usize = 6;
    pub const DAY: usize = 8;
    pub const HOUR: usize = 9;
    pub const MINUTE: usize = 10;
    pub const SECOND: usize = 11;
    pub const ELAPSED: usize = 12;
    pub const USE_MOUSE: usize = 13;
    pub const SOUND_FLAGS: usize = 14;
    pub const VIDEO_MODE: usize = 15;
    pub const LANGUAGE: usize = 16;
    pub const MULT_FRAME: usize = 57;
    pub const MULT_NO_DRAW: usize = 58;
}

static NEXT_TABLE: AtomicU64 = AtomicU64::new(1);

/// A program's variable table: a flat little-endian byte area addressed by
/// byte offset. Slot `n` is the 32-bit value at offset `n * 4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variables {
    table_id: u64,
    bytes: Vec<u8>,
}

pub type SharedVariables = Rc<RefCell<Variables>>;

impl Variables {
    /// `count` 32-bit slots.
    pub fn new(count: usize) -> Self {
        Variables {
            table_id: NEXT_TABLE.fetch_add(1, Ordering::Relaxed),
            bytes: vec![0; count * 4],
        }
    }

    pub fn shared(count: usize) -> SharedVariables {
        Rc::new(RefCell::new(Variables::new(count)))
    }

    /// Unique per allocation; survives clones, so a restored table can be
    /// told apart from a fresh one with equal contents.
    pub fn table_id(&self) -> u64 {
        self.table_id
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.bytes.get(offset..offset.checked_add(len)?)
    }

    fn slice_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let end = offset.checked_add(len)?;
        let size = self.bytes.len();
        match self.bytes.get_mut(offset..end) {
            Some(slice) => Some(slice),
            None => {
                warn!("variable write at {offset:#x}+{len} outside table of {size} bytes");
                None
            }
        }
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        self.slice(offset, 1).map(|b| b[0]).unwrap_or(0)
    }

    pub fn read_i16(&self, offset: usize) -> i16 {
        self.slice(offset, 2).map(LittleEndian::read_i16).unwrap_or(0)
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        self.slice(offset, 4).map(LittleEndian::read_u32).unwrap_or(0)
    }

    pub fn read_i32(&self, offset: usize) -> i32 {
        self.read_u32(offset) as i32
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        if let Some(slot) = self.slice_mut(offset, 1) {
            slot[0] = value;
        }
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) {
        if let Some(slot) = self.slice_mut(offset, 2) {
            LittleEndian::write_u16(slot, value);
        }
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        if let Some(slot) = self.slice_mut(offset, 4) {
            LittleEndian::write_u32(slot, value);
        }
    }

    pub fn var(&self, index: usize) -> i32 {
        self.read_i32(index * 4)
    }

    pub fn set_var(&mut self, index: usize, value: i32) {
        self.write_u32(index * 4, value as u32);
    }

    /// NUL-terminated string starting at `offset` (without the NUL).
    pub fn read_str(&self, offset: usize) -> Vec<u8> {
        match self.bytes.get(offset..) {
            Some(tail) => tail.iter().take_while(|&&b| b != 0).copied().collect(),
            None => Vec::new(),
        }
    }

    /// Stores `value` plus a terminating NUL, truncated to the table end.
    pub fn write_str(&mut self, offset: usize, value: &[u8]) {
        if offset >= self.bytes.len() {
            warn!("string write at {offset:#x} outside table of {} bytes", self.bytes.len());
            return;
        }
        let room = self.bytes.len() - offset - 1;
        let len = value.len().min(room);
        self.bytes[offset..offset + len].copy_from_slice(&value[..len]);
        self.bytes[offset + len] = 0;
    }
}

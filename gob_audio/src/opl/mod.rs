//! OPL2 register interface. The AdLib sequencer only ever talks to the chip
//! through register writes, so tests can swap the emulator for a recorder.

mod emu;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

pub use emu::OplEmulator;

pub trait Opl: Send {
    fn reset(&mut self);

    fn write_reg(&mut self, reg: u8, value: u8);

    /// Renders mono samples at the chip's configured output rate.
    fn generate(&mut self, out: &mut [i16]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OplEvent {
    Reset,
    Write { reg: u8, value: u8 },
    Generate { samples: usize },
}

/// Records every call instead of synthesising audio.
#[derive(Clone, Default)]
pub struct RecordingOpl {
    events: Arc<Mutex<Vec<OplEvent>>>,
}

impl RecordingOpl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OplEvent> {
        self.events.lock().clone()
    }

    /// Register writes only, in order.
    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match *event {
                OplEvent::Write { reg, value } => Some((reg, value)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Opl for RecordingOpl {
    fn reset(&mut self) {
        self.events.lock().push(OplEvent::Reset);
    }

    fn write_reg(&mut self, reg: u8, value: u8) {
        self.events.lock().push(OplEvent::Write { reg, value });
    }

    fn generate(&mut self, out: &mut [i16]) {
        out.fill(0);
        self.events.lock().push(OplEvent::Generate { samples: out.len() });
    }
}

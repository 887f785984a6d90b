use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

pub const PERCUSSION_CHANNEL: u8 = 9;

/// Output device for the sequencer. Channels are handed out by the driver;
/// the sequencer gives them back when a part loses its slot.
pub trait MidiDriver: Send {
    fn send(&mut self, status: u8, data1: u8, data2: u8);

    fn sysex(&mut self, _data: &[u8]) {}

    /// A free melodic channel, or `None` when every channel is taken.
    fn allocate_channel(&mut self) -> Option<u8>;

    fn release_channel(&mut self, channel: u8);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriverEvent {
    Send { status: u8, data1: u8, data2: u8 },
    SysEx { data: Vec<u8> },
    Allocate { channel: u8 },
    Release { channel: u8 },
}

/// Records everything the sequencer sends, for tests and event dumps.
#[derive(Clone)]
pub struct RecordingMidiDriver {
    events: Arc<Mutex<Vec<DriverEvent>>>,
    free: Vec<u8>,
}

impl RecordingMidiDriver {
    /// `channels` melodic channels, numbered from 0 and skipping percussion.
    pub fn new(channels: usize) -> Self {
        let free: Vec<u8> = (0u8..16)
            .filter(|&channel| channel != PERCUSSION_CHANNEL)
            .take(channels)
            .collect();
        RecordingMidiDriver {
            events: Arc::new(Mutex::new(Vec::new())),
            free: free.into_iter().rev().collect(),
        }
    }

    pub fn events(&self) -> Vec<DriverEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// `(status, data1, data2)` triples of the channel messages only.
    pub fn messages(&self) -> Vec<(u8, u8, u8)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DriverEvent::Send {
                    status,
                    data1,
                    data2,
                } => Some((*status, *data1, *data2)),
                _ => None,
            })
            .collect()
    }
}

impl MidiDriver for RecordingMidiDriver {
    fn send(&mut self, status: u8, data1: u8, data2: u8) {
        self.events.lock().push(DriverEvent::Send {
            status,
            data1,
            data2,
        });
    }

    fn sysex(&mut self, data: &[u8]) {
        self.events.lock().push(DriverEvent::SysEx {
            data: data.to_vec(),
        });
    }

    fn allocate_channel(&mut self) -> Option<u8> {
        let channel = self.free.pop()?;
        self.events.lock().push(DriverEvent::Allocate { channel });
        Some(channel)
    }

    fn release_channel(&mut self, channel: u8) {
        if channel != PERCUSSION_CHANNEL && !self.free.contains(&channel) {
            self.free.push(channel);
            self.events.lock().push(DriverEvent::Release { channel });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_channels_skipping_percussion() {
        let mut driver = RecordingMidiDriver::new(10);
        let channels: Vec<u8> = std::iter::from_fn(|| driver.allocate_channel()).collect();
        assert_eq!(channels, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 10]);
        driver.release_channel(4);
        assert_eq!(driver.allocate_channel(), Some(4));
        assert_eq!(
            driver.events().last(),
            Some(&DriverEvent::Allocate { channel: 4 })
        );
    }
}

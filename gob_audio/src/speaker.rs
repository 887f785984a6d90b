use crate::stream::AudioStream;

const AMPLITUDE: i16 = 8000;

/// PC speaker: a square wave at the last requested frequency.
pub struct Speaker {
    rate: u32,
    frequency: Option<u32>,
    phase: u64,
}

impl Speaker {
    pub fn new(rate: u32) -> Self {
        Speaker {
            rate: rate.max(1),
            frequency: None,
            phase: 0,
        }
    }

    pub fn start(&mut self, frequency: u32) {
        if frequency == 0 {
            self.stop();
            return;
        }
        self.frequency = Some(frequency);
        self.phase = 0;
    }

    pub fn stop(&mut self) {
        self.frequency = None;
    }

    pub fn frequency(&self) -> Option<u32> {
        self.frequency
    }
}

impl AudioStream for Speaker {
    fn read_buffer(&mut self, buffer: &mut [i16]) -> usize {
        let Some(frequency) = self.frequency else {
            buffer.fill(0);
            return buffer.len();
        };
        // Phase in 1/65536 of a cycle.
        let step = ((frequency as u64) << 16) / self.rate as u64;
        for slot in buffer.iter_mut() {
            *slot = if self.phase & 0x8000 == 0 {
                AMPLITUDE
            } else {
                -AMPLITUDE
            };
            self.phase = (self.phase + step) & 0xFFFF;
        }
        buffer.len()
    }

    fn is_stereo(&self) -> bool {
        false
    }

    fn rate(&self) -> u32 {
        self.rate
    }
}

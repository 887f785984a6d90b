use std::sync::Arc;

use crate::stream::AudioStream;

/// Repeat count convention shared by the sequencers: `-1` loops forever,
/// `0` plays once, `N` plays `N` extra times.
pub const REPEAT_FOREVER: i32 = -1;

/// Plays a signed 8-bit sample at its own frequency, resampled to the
/// output rate with 16.16 fixed-point stepping.
pub struct SampleStream {
    data: Arc<[i8]>,
    output_rate: u32,
    step: u64,
    position: u64,
    repeat: i32,
    fade: Option<Fade>,
    finished: bool,
}

#[derive(Debug, Clone, Copy)]
struct Fade {
    total: u32,
    remaining: u32,
}

impl SampleStream {
    pub fn new(data: Arc<[i8]>, frequency: u32, output_rate: u32, repeat: i32) -> Self {
        let mut stream = SampleStream {
            finished: data.is_empty(),
            data,
            output_rate: output_rate.max(1),
            step: 0,
            position: 0,
            repeat,
            fade: None,
        };
        stream.set_frequency(frequency);
        stream
    }

    pub fn set_frequency(&mut self, frequency: u32) {
        self.step = ((frequency.max(1) as u64) << 16) / self.output_rate as u64;
    }

    /// Ramps the volume down to silence over `samples` output samples, then
    /// ends the stream. Zero stops immediately.
    pub fn fade_out(&mut self, samples: u32) {
        if samples == 0 {
            self.finished = true;
        } else {
            self.fade = Some(Fade {
                total: samples,
                remaining: samples,
            });
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn next_sample(&mut self) -> Option<i16> {
        if self.finished {
            return None;
        }
        let len = self.data.len() as u64;
        let mut index = self.position >> 16;
        if index >= len {
            if self.repeat == 0 {
                self.finished = true;
                return None;
            }
            if self.repeat > 0 {
                self.repeat -= 1;
            }
            self.position -= len << 16;
            index = self.position >> 16;
        }

        let mut value = (self.data[index as usize] as i32) << 8;
        if let Some(fade) = self.fade.as_mut() {
            value = value * fade.remaining as i32 / fade.total as i32;
            fade.remaining -= 1;
            if fade.remaining == 0 {
                self.finished = true;
            }
        }
        self.position += self.step;
        Some(value as i16)
    }
}

impl AudioStream for SampleStream {
    fn read_buffer(&mut self, buffer: &mut [i16]) -> usize {
        for (written, slot) in buffer.iter_mut().enumerate() {
            match self.next_sample() {
                Some(value) => *slot = value,
                None => return written,
            }
        }
        buffer.len()
    }

    fn is_stereo(&self) -> bool {
        false
    }

    fn rate(&self) -> u32 {
        self.output_rate
    }

    fn end_of_data(&self) -> bool {
        self.finished
    }
}

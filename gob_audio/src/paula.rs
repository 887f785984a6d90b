//! Four-voice Amiga DMA sample player.
//!
//! Voices 0 and 3 sit on the left channel, 1 and 2 on the right. Each voice
//! steps through its current sample window with a 16.16 fixed-point offset
//! derived from the Paula clock and the voice period; running off the end
//! switches to the repeat window (when it is longer than two bytes) without
//! losing the fractional part.

use std::sync::Arc;

use log::trace;

use crate::stream::AudioStream;

pub const NUM_VOICES: usize = 4;
pub const PAL_SYSTEM_CLOCK: u32 = 7_093_790;
pub const PAL_PAULA_CLOCK: u32 = PAL_SYSTEM_CLOCK / 2;
pub const PAL_CIA_CLOCK: u32 = PAL_SYSTEM_CLOCK / 10;
pub const MAX_VOLUME: u8 = 0x3F;
/// Interrupts tick at the output rate divided by this until a driver
/// picks its own frequency.
const DEFAULT_INTERRUPT_DIVISOR: u32 = 80;
const FRAC_BITS: u32 = 16;

/// Which output channel each voice is wired to.
const VOICE_IS_LEFT: [bool; NUM_VOICES] = [true, false, false, true];

#[derive(Debug, Clone, Default)]
pub struct Voice {
    sample: Option<Arc<[i8]>>,
    start: usize,
    length: usize,
    repeat_start: usize,
    repeat_length: usize,
    period: u16,
    volume: u8,
    offset: u64,
}

impl Voice {
    pub fn is_active(&self) -> bool {
        self.sample.is_some() && self.period > 0
    }

    pub fn period(&self) -> u16 {
        self.period
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Source position within the current window, 16.16 fixed point.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Start and length of the window currently being played.
    pub fn window(&self) -> (usize, usize) {
        (self.start, self.length)
    }
}

/// Driver hook run once per interrupt tick; trackers decide note and
/// envelope changes here.
pub trait PaulaInterrupt: Send {
    fn interrupt(&mut self, paula: &mut Paula);

    fn finished(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct Paula {
    voices: [Voice; NUM_VOICES],
    rate: u32,
    interrupt_samples: u32,
    playing: bool,
}

impl Paula {
    pub fn new(rate: u32) -> Self {
        let rate = rate.max(1);
        Paula {
            voices: Default::default(),
            rate,
            interrupt_samples: (rate / (rate / DEFAULT_INTERRUPT_DIVISOR).max(1)).max(1),
            playing: false,
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn voice(&self, index: usize) -> &Voice {
        &self.voices[index % NUM_VOICES]
    }

    pub fn start_playing(&mut self) {
        self.playing = true;
    }

    pub fn stop_playing(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn clear_voice(&mut self, index: usize) {
        self.voices[index % NUM_VOICES] = Voice::default();
    }

    pub fn clear_voices(&mut self) {
        for voice in 0..NUM_VOICES {
            self.clear_voice(voice);
        }
    }

    /// Points a voice at `sample[start..start + length]`, looping over
    /// `sample[repeat_start..repeat_start + repeat_length]` afterwards.
    /// `offset` is the starting byte within the first window.
    #[allow(clippy::too_many_arguments)]
    pub fn set_channel_data(
        &mut self,
        index: usize,
        sample: Arc<[i8]>,
        start: usize,
        length: usize,
        repeat_start: usize,
        repeat_length: usize,
        offset: usize,
    ) {
        let total = sample.len();
        let voice = &mut self.voices[index % NUM_VOICES];
        voice.start = start.min(total);
        voice.length = length.min(total - voice.start);
        voice.repeat_start = repeat_start.min(total);
        voice.repeat_length = repeat_length.min(total - voice.repeat_start);
        voice.offset = (offset as u64) << FRAC_BITS;
        voice.sample = Some(sample);
    }

    pub fn set_channel_period(&mut self, index: usize, period: u16) {
        self.voices[index % NUM_VOICES].period = period;
    }

    pub fn set_channel_volume(&mut self, index: usize, volume: u8) {
        self.voices[index % NUM_VOICES].volume = volume & MAX_VOLUME;
    }

    pub fn set_interrupt_freq(&mut self, hz: u32) {
        self.interrupt_samples = (self.rate / hz.max(1)).max(1);
    }

    /// Interrupt period from a CIA timer value.
    pub fn set_interrupt_freq_unscaled(&mut self, timer: u32) {
        let samples = self.rate as u64 * timer as u64 / PAL_CIA_CLOCK as u64;
        self.interrupt_samples = (samples as u32).max(1);
    }

    pub fn interrupt_samples(&self) -> u32 {
        self.interrupt_samples
    }

    /// Source advance per output sample for `period`, 16.16 fixed point.
    pub fn step_for_period(&self, period: u16) -> u64 {
        ((PAL_PAULA_CLOCK as u64) << FRAC_BITS) / (period.max(1) as u64 * self.rate as u64)
    }

    /// Adds `frames` stereo frames of every active voice into `out`.
    pub fn mix(&mut self, out: &mut [i16]) {
        let frames = out.len() / 2;
        for (index, voice) in self.voices.iter_mut().enumerate() {
            if !voice.is_active() {
                continue;
            }
            let side = if VOICE_IS_LEFT[index] { 0 } else { 1 };
            let step = ((PAL_PAULA_CLOCK as u64) << FRAC_BITS)
                / (voice.period as u64 * self.rate as u64);
            let volume = voice.volume as i32;

            if !Self::wrap_window(index, voice) {
                continue;
            }
            for frame in 0..frames {
                let Some(sample) = voice.sample.as_ref() else {
                    break;
                };
                let position = voice.start + (voice.offset >> FRAC_BITS) as usize;
                let value = sample[position] as i32 * volume * 2;
                let slot = &mut out[frame * 2 + side];
                *slot = (*slot as i32 + value).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                voice.offset += step;
                if !Self::wrap_window(index, voice) {
                    break;
                }
            }
        }
    }

    /// Moves a voice that ran past its window onto the repeat window.
    /// Returns false once the voice has nothing left to play.
    fn wrap_window(index: usize, voice: &mut Voice) -> bool {
        if (voice.offset >> FRAC_BITS) < voice.length as u64 {
            return true;
        }
        if voice.repeat_length <= 2 {
            trace!("paula: voice {index} ran out of data");
            voice.sample = None;
            return false;
        }
        voice.offset -= (voice.length as u64) << FRAC_BITS;
        voice.start = voice.repeat_start;
        voice.length = voice.repeat_length;
        // A repeat window shorter than the overshoot wraps again.
        voice.offset %= (voice.length as u64) << FRAC_BITS;
        true
    }
}

/// Drives a `Paula` from the mixer, calling the driver every interrupt
/// period.
pub struct PaulaStream<D> {
    paula: Paula,
    driver: D,
    until_interrupt: u32,
}

impl<D: PaulaInterrupt> PaulaStream<D> {
    pub fn new(paula: Paula, driver: D) -> Self {
        PaulaStream {
            paula,
            driver,
            until_interrupt: 0,
        }
    }

    pub fn paula(&self) -> &Paula {
        &self.paula
    }

    pub fn paula_mut(&mut self) -> &mut Paula {
        &mut self.paula
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: PaulaInterrupt> AudioStream for PaulaStream<D> {
    fn read_buffer(&mut self, buffer: &mut [i16]) -> usize {
        buffer.fill(0);
        if !self.paula.is_playing() {
            return buffer.len();
        }

        let frames = buffer.len() / 2;
        let mut done = 0;
        while done < frames {
            if self.until_interrupt == 0 {
                self.driver.interrupt(&mut self.paula);
                self.until_interrupt = self.paula.interrupt_samples();
                if !self.paula.is_playing() {
                    break;
                }
            }
            let chunk = (frames - done).min(self.until_interrupt as usize);
            self.paula.mix(&mut buffer[done * 2..(done + chunk) * 2]);
            done += chunk;
            self.until_interrupt -= chunk as u32;
        }
        buffer.len()
    }

    fn is_stereo(&self) -> bool {
        true
    }

    fn rate(&self) -> u32 {
        self.paula.rate()
    }

    fn end_of_data(&self) -> bool {
        !self.paula.is_playing() || self.driver.finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn period_step_matches_paula_clock() {
        let paula = Paula::new(22050);
        let step = paula.step_for_period(428) as f64 / 65536.0;
        assert_relative_eq!(step, PAL_PAULA_CLOCK as f64 / (428.0 * 22050.0), max_relative = 1e-4);
    }

    fn sample(len: usize) -> Arc<[i8]> {
        (0..len).map(|i| (i % 100) as i8).collect::<Vec<_>>().into()
    }

    #[test]
    fn looped_voice_keeps_exact_fractional_position() {
        let mut paula = Paula::new(22050);
        let data = sample(64);
        paula.set_channel_data(0, data, 0, 64, 0, 64, 0);
        paula.set_channel_period(0, 300);
        paula.set_channel_volume(0, 0x7F);
        assert_eq!(paula.voice(0).volume(), MAX_VOLUME);

        let step = paula.step_for_period(300);
        let window = 64u64 << FRAC_BITS;
        let mut rendered = 0u64;
        let mut buffer = vec![0i16; 2 * 1000];
        for _ in 0..50 {
            buffer.fill(0);
            paula.mix(&mut buffer);
            rendered += 1000;
            assert_eq!(paula.voice(0).offset(), (rendered * step) % window);
        }
        assert!(paula.voice(0).is_active());
    }

    #[test]
    fn switches_to_repeat_window_after_first_pass() {
        let mut paula = Paula::new(PAL_PAULA_CLOCK / 100);
        // One source byte per output sample.
        paula.set_channel_data(1, sample(16), 0, 10, 10, 6, 0);
        paula.set_channel_period(1, 100);
        paula.set_channel_volume(1, 1);

        let mut buffer = vec![0i16; 2 * 12];
        paula.mix(&mut buffer);
        let right: Vec<i16> = buffer.iter().skip(1).step_by(2).copied().collect();
        assert_eq!(&right[..10], &[0, 2, 4, 6, 8, 10, 12, 14, 16, 18]);
        assert_eq!(&right[10..], &[20, 22]);
        assert_eq!(paula.voice(1).window(), (10, 6));
        assert!(buffer.iter().step_by(2).all(|&left| left == 0));
    }

    #[test]
    fn short_repeat_window_silences_voice() {
        let mut paula = Paula::new(PAL_PAULA_CLOCK / 100);
        paula.set_channel_data(3, sample(8), 0, 8, 0, 2, 0);
        paula.set_channel_period(3, 100);
        paula.set_channel_volume(3, 10);
        let mut buffer = vec![0i16; 2 * 16];
        paula.mix(&mut buffer);
        assert!(!paula.voice(3).is_active());
        assert_eq!(buffer[2 * 15], 0);
    }

    struct CountingDriver {
        ticks: u32,
    }

    impl PaulaInterrupt for CountingDriver {
        fn interrupt(&mut self, _paula: &mut Paula) {
            self.ticks += 1;
        }
    }

    #[test]
    fn stream_calls_driver_once_per_interrupt_period() {
        let mut paula = Paula::new(5000);
        paula.start_playing();
        assert_eq!(paula.interrupt_samples(), 80);
        let mut stream = PaulaStream::new(paula, CountingDriver { ticks: 0 });
        let mut buffer = vec![0i16; 2 * 250];
        stream.read_buffer(&mut buffer);
        assert_eq!(stream.driver().ticks, 4);
        stream.read_buffer(&mut buffer);
        assert_eq!(stream.driver().ticks, 7);
    }

    #[test]
    fn volume_keeps_only_its_low_six_bits() {
        let mut paula = Paula::new(PAL_PAULA_CLOCK / 100);
        paula.set_channel_data(0, sample(8), 0, 8, 0, 0, 0);
        paula.set_channel_period(0, 100);
        paula.set_channel_volume(0, 0x40);
        assert_eq!(paula.voice(0).volume(), 0);
        paula.set_channel_volume(0, 0x45);
        assert_eq!(paula.voice(0).volume(), 5);

        let mut buffer = vec![0i16; 2 * 4];
        paula.mix(&mut buffer);
        let left: Vec<i16> = buffer.iter().step_by(2).copied().collect();
        assert_eq!(left, vec![0, 10, 20, 30]);
    }

    #[test]
    fn default_interrupt_rate_is_an_eightieth_of_the_output_rate() {
        assert_eq!(Paula::new(22050).interrupt_samples(), 80);
        assert_eq!(Paula::new(44100).interrupt_samples(), 80);
        let mut paula = Paula::new(44100);
        paula.set_interrupt_freq(50);
        assert_eq!(paula.interrupt_samples(), 882);
    }
}

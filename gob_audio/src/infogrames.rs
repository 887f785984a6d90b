//! Infogrames tracker: four command streams driving Paula voices, with
//! volume and period envelopes taken from the song's slide tables.

use std::sync::Arc;

use bitflags::bitflags;
use log::{debug, warn};

use gob_formats::infogrames::{CHANNELS, SLIDE_RECORD_SIZE, SlideKind};
use gob_formats::{InfogramesInstruments, InfogramesSong};

use crate::error::Result;
use crate::paula::{Paula, PaulaInterrupt, PaulaStream};
use crate::sample::REPEAT_FOREVER;

const FULL_VOLUME: i16 = 64;
const MIN_PERIOD: i32 = 113;
const MAX_PERIOD: i32 = 0x7FFF;
const SLIDE_STEPS: usize = 4;
/// Octave-0 periods; higher octaves halve them.
const BASE_PERIODS: [u16; 12] = [
    1712, 1616, 1525, 1440, 1357, 1281, 1209, 1141, 1077, 1017, 961, 907,
];

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelFlags: u8 {
        const NOTE = 0x01;
        const ENDED = 0x02;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct SlideFlags: u8 {
        const LOOP = 0x01;
        const HOLD = 0x02;
    }
}

pub fn note_period(note: u8) -> u16 {
    let period = BASE_PERIODS[(note % 12) as usize] >> (note / 12).min(15);
    (period as i32).max(MIN_PERIOD) as u16
}

/// Envelope state for one slide recipe: up to four `{delta, delay, repeat}`
/// steps applied to an accumulator.
#[derive(Debug, Clone, Copy)]
pub struct Slide {
    recipe: [u8; SLIDE_RECORD_SIZE],
    step: usize,
    delay_left: u8,
    repeat_left: u8,
    value: i16,
    done: bool,
}

impl Slide {
    pub fn new(record: &[u8]) -> Self {
        let mut recipe = [0u8; SLIDE_RECORD_SIZE];
        let len = record.len().min(SLIDE_RECORD_SIZE);
        recipe[..len].copy_from_slice(&record[..len]);
        let mut slide = Slide {
            recipe,
            step: 0,
            delay_left: 0,
            repeat_left: 0,
            value: 0,
            done: false,
        };
        slide.done = !slide.load_step(0);
        slide
    }

    pub fn value(&self) -> i16 {
        self.value
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn fields(&self, step: usize) -> (i8, u8, u8) {
        let base = 1 + step * 3;
        (
            self.recipe[base] as i8,
            self.recipe[base + 1],
            self.recipe[base + 2],
        )
    }

    fn load_step(&mut self, step: usize) -> bool {
        if step >= SLIDE_STEPS {
            return false;
        }
        let (_, delay, repeat) = self.fields(step);
        if delay == 0 {
            return false;
        }
        self.step = step;
        self.delay_left = delay;
        self.repeat_left = repeat;
        true
    }

    /// Advances one interrupt tick and returns the current offset.
    pub fn tune(&mut self) -> i16 {
        if self.done {
            return self.value;
        }
        if self.delay_left > 1 {
            self.delay_left -= 1;
            return self.value;
        }

        let (delta, delay, _) = self.fields(self.step);
        self.value = self.value.saturating_add(delta as i16);
        if self.repeat_left > 0 {
            self.repeat_left -= 1;
            self.delay_left = delay;
        } else if !self.load_step(self.step + 1) {
            self.end_cycle();
        }
        self.value
    }

    fn end_cycle(&mut self) {
        let flags = SlideFlags::from_bits_truncate(self.recipe[0]);
        if flags.contains(SlideFlags::LOOP) {
            self.done = !self.load_step(0);
        } else {
            self.done = true;
            if !flags.contains(SlideFlags::HOLD) {
                self.value = 0;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Instrument {
    data: Arc<[i8]>,
    repeat_offset: usize,
    repeat_len: usize,
}

#[derive(Debug, Clone, Default)]
struct ChannelState {
    flags: ChannelFlags,
    block: usize,
    pos: usize,
    ticks_left: u16,
    instrument: usize,
    period: u16,
    volume_recipe: Option<usize>,
    period_recipe: Option<usize>,
    volume_slide: Option<Slide>,
    period_slide: Option<Slide>,
}

pub struct InfogramesPlayer {
    instruments: Vec<Instrument>,
    song: InfogramesSong,
    blocks: [Vec<usize>; CHANNELS],
    channels: [ChannelState; CHANNELS],
    speed: u16,
    tick: u16,
    repeat: i32,
    finished: bool,
}

impl InfogramesPlayer {
    pub fn new(bank: &InfogramesInstruments, song: InfogramesSong) -> Result<Self> {
        let instruments = bank
            .samples
            .iter()
            .map(|sample| Instrument {
                data: Arc::from(sample.data.clone()),
                repeat_offset: sample.repeat_offset,
                repeat_len: sample.repeat_len,
            })
            .collect();
        let mut blocks: [Vec<usize>; CHANNELS] = Default::default();
        for (channel, list) in blocks.iter_mut().enumerate() {
            *list = song.command_list(channel)?;
        }
        let mut player = InfogramesPlayer {
            instruments,
            speed: song.speed.max(1),
            song,
            blocks,
            channels: Default::default(),
            tick: 0,
            repeat: 0,
            finished: false,
        };
        player.restart();
        Ok(player)
    }

    /// Wraps the player in a Paula stream ready for the mixer.
    pub fn into_stream(self, rate: u32) -> PaulaStream<Self> {
        let mut paula = Paula::new(rate);
        paula.start_playing();
        PaulaStream::new(paula, self)
    }

    pub fn set_repeating(&mut self, repeat: i32) {
        self.repeat = repeat;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn speed(&self) -> u16 {
        self.speed
    }

    pub fn channel_flags(&self, channel: usize) -> ChannelFlags {
        self.channels[channel % CHANNELS].flags
    }

    fn restart(&mut self) {
        self.channels = Default::default();
        self.speed = self.song.speed.max(1);
        // The first interrupt reads the opening row.
        self.tick = self.speed - 1;
        self.finished = false;
    }

    fn end_channel(channel: &mut ChannelState, voice: usize, paula: &mut Paula) {
        channel.flags.remove(ChannelFlags::NOTE);
        channel.flags.insert(ChannelFlags::ENDED);
        paula.set_channel_volume(voice, 0);
    }

    fn read_commands(&mut self, voice: usize, paula: &mut Paula) {
        let data = self.song.data();
        let channel = &mut self.channels[voice];
        loop {
            let Some(&block) = self.blocks[voice].get(channel.block) else {
                debug!("infogrames: channel {voice} reached the end of its list");
                return Self::end_channel(channel, voice, paula);
            };
            let at = block + channel.pos;
            let Some(&command) = data.get(at) else {
                warn!("infogrames: channel {voice} runs off the song at {at}");
                return Self::end_channel(channel, voice, paula);
            };
            let operand = data.get(at + 1).copied();
            channel.pos += 1;

            match command {
                0x00..=0x7F => {
                    channel.pos += 1;
                    channel.ticks_left = operand.unwrap_or(1).max(1) as u16;
                    let Some(instrument) = self.instruments.get(channel.instrument) else {
                        warn!(
                            "infogrames: channel {voice} uses missing instrument {}",
                            channel.instrument
                        );
                        channel.flags.remove(ChannelFlags::NOTE);
                        paula.set_channel_volume(voice, 0);
                        return;
                    };
                    channel.period = note_period(command);
                    channel.volume_slide = channel
                        .volume_recipe
                        .and_then(|index| self.song.slide(SlideKind::Volume, index))
                        .map(Slide::new);
                    channel.period_slide = channel
                        .period_recipe
                        .and_then(|index| self.song.slide(SlideKind::Period, index))
                        .map(Slide::new);
                    channel.flags.insert(ChannelFlags::NOTE);
                    paula.set_channel_data(
                        voice,
                        instrument.data.clone(),
                        0,
                        instrument.data.len(),
                        instrument.repeat_offset,
                        instrument.repeat_len,
                        0,
                    );
                    paula.set_channel_period(voice, channel.period);
                    paula.set_channel_volume(voice, FULL_VOLUME as u8);
                    return;
                }
                0x80..=0x9F => channel.instrument = (command & 0x1F) as usize,
                0xA0..=0xBF => channel.volume_recipe = Some((command & 0x1F) as usize),
                0xC0..=0xDF => channel.period_recipe = Some((command & 0x1F) as usize),
                0xE0 => {
                    channel.pos += 1;
                    channel.ticks_left = operand.unwrap_or(1).max(1) as u16;
                    channel.flags.remove(ChannelFlags::NOTE);
                    paula.set_channel_volume(voice, 0);
                    return;
                }
                0xE1 => {
                    channel.pos += 1;
                    self.speed = operand.unwrap_or(1).max(1) as u16;
                }
                0xFF => {
                    channel.block += 1;
                    channel.pos = 0;
                }
                other => {
                    warn!("infogrames: channel {voice} hit unknown command {other:#04x}");
                    return Self::end_channel(channel, voice, paula);
                }
            }
        }
    }

    fn song_end(&mut self, paula: &mut Paula) {
        if self.repeat == REPEAT_FOREVER || self.repeat > 0 {
            if self.repeat > 0 {
                self.repeat -= 1;
            }
            debug!("infogrames: looping song");
            self.restart();
        } else {
            debug!("infogrames: song finished");
            self.finished = true;
            paula.clear_voices();
            paula.stop_playing();
        }
    }
}

impl PaulaInterrupt for InfogramesPlayer {
    fn interrupt(&mut self, paula: &mut Paula) {
        if self.finished {
            paula.stop_playing();
            return;
        }

        self.tick += 1;
        if self.tick >= self.speed {
            self.tick = 0;
            for voice in 0..CHANNELS {
                let channel = &mut self.channels[voice];
                if channel.flags.contains(ChannelFlags::ENDED) {
                    continue;
                }
                if channel.ticks_left > 1 {
                    channel.ticks_left -= 1;
                    continue;
                }
                self.read_commands(voice, paula);
            }
            if self
                .channels
                .iter()
                .all(|channel| channel.flags.contains(ChannelFlags::ENDED))
            {
                return self.song_end(paula);
            }
        }

        for (voice, channel) in self.channels.iter_mut().enumerate() {
            if !channel.flags.contains(ChannelFlags::NOTE) {
                continue;
            }
            let volume = channel.volume_slide.as_mut().map_or(0, Slide::tune);
            let period = channel.period_slide.as_mut().map_or(0, Slide::tune);
            paula.set_channel_volume(voice, (FULL_VOLUME + volume).clamp(0, FULL_VOLUME) as u8);
            paula.set_channel_period(
                voice,
                (channel.period as i32 + period as i32).clamp(MIN_PERIOD, MAX_PERIOD) as u16,
            );
        }
    }

    fn finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::AudioStream;
    use gob_formats::infogrames::{InstrumentSample, SongBuilder};

    fn bank() -> InfogramesInstruments {
        InfogramesInstruments {
            samples: vec![InstrumentSample {
                data: vec![10, 20, -10, -20, 10, 20, -10, -20],
                repeat_offset: 0,
                repeat_len: 0,
            }],
        }
    }

    fn song(block: Vec<u8>, volume_slides: Vec<[u8; SLIDE_RECORD_SIZE]>) -> InfogramesSong {
        let mut builder = SongBuilder {
            speed: 1,
            volume_slides,
            blocks: vec![block],
            ..Default::default()
        };
        builder.channels[0] = vec![0];
        InfogramesSong::parse(&builder.build(), 0).unwrap()
    }

    fn recipe(flags: u8, steps: &[(i8, u8, u8)]) -> [u8; SLIDE_RECORD_SIZE] {
        let mut record = [0u8; SLIDE_RECORD_SIZE];
        record[0] = flags;
        for (i, &(delta, delay, repeat)) in steps.iter().enumerate() {
            record[1 + i * 3] = delta as u8;
            record[2 + i * 3] = delay;
            record[3 + i * 3] = repeat;
        }
        record
    }

    #[test]
    fn slide_steps_through_recipe_and_resets() {
        let mut slide = Slide::new(&recipe(0, &[(2, 1, 1), (-1, 2, 0)]));
        let values: Vec<i16> = (0..5).map(|_| slide.tune()).collect();
        assert_eq!(values, vec![2, 4, 4, 0, 0]);
        assert!(slide.is_done());
    }

    #[test]
    fn held_slide_keeps_its_value_and_looped_slide_continues() {
        let mut held = Slide::new(&recipe(0x02, &[(2, 1, 1), (-1, 2, 0)]));
        let values: Vec<i16> = (0..5).map(|_| held.tune()).collect();
        assert_eq!(values, vec![2, 4, 4, 3, 3]);

        let mut looped = Slide::new(&recipe(0x01, &[(1, 1, 0)]));
        let values: Vec<i16> = (0..3).map(|_| looped.tune()).collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert!(!looped.is_done());
    }

    #[test]
    fn plays_a_note_then_finishes_the_song() {
        let mut player = InfogramesPlayer::new(&bank(), song(vec![0x80, 24, 2, 0xFF], vec![])).unwrap();
        let mut paula = Paula::new(5000);
        paula.start_playing();

        player.interrupt(&mut paula);
        assert_eq!(paula.voice(0).period(), 428);
        assert_eq!(paula.voice(0).volume(), 0x3F);
        assert!(player.channel_flags(0).contains(ChannelFlags::NOTE));
        assert!(player.channel_flags(1).contains(ChannelFlags::ENDED));

        player.interrupt(&mut paula);
        assert!(!player.is_finished());
        player.interrupt(&mut paula);
        assert!(player.is_finished());
        assert!(!paula.is_playing());
    }

    #[test]
    fn volume_slide_shapes_the_note() {
        let slides = vec![recipe(0x02, &[(-8, 1, 0)])];
        let mut player =
            InfogramesPlayer::new(&bank(), song(vec![0x80, 0xA0, 24, 4, 0xFF], slides)).unwrap();
        let mut paula = Paula::new(5000);
        paula.start_playing();
        player.interrupt(&mut paula);
        assert_eq!(paula.voice(0).volume(), 56);
    }

    #[test]
    fn repeat_restarts_the_song() {
        let mut player = InfogramesPlayer::new(&bank(), song(vec![24, 1, 0xFF], vec![])).unwrap();
        player.set_repeating(REPEAT_FOREVER);
        let mut stream = player.into_stream(5000);
        let mut buffer = vec![0i16; 2 * 1000];
        stream.read_buffer(&mut buffer);
        assert!(!stream.driver().is_finished());
        assert!(stream.paula().is_playing());
    }
}

//! AdLib track sequencer. Reads the byte-coded track of an `AdlFile`
//! between chip renders and turns it into OPL register writes.

use log::{debug, warn};

use gob_formats::AdlFile;

use crate::error::{AudioError, Result};
use crate::opl::Opl;
use crate::sample::REPEAT_FOREVER;
use crate::stream::AudioStream;

pub const VOICES: usize = 9;
pub const NOTE_LINES: usize = 25;
pub const NOTE_COLUMNS: usize = 12;
const NOTE_SLOTS: usize = 11;
const POLL_CHANNELS: usize = 16;
const MAX_NOTE: u8 = 0x5F;

const OPERATORS: [u8; VOICES] = [0, 1, 2, 8, 9, 10, 16, 17, 18];
const VOLUME_REGISTERS: [u8; VOICES] = [3, 4, 5, 11, 12, 13, 19, 20, 21];

pub type NoteTable = [[u16; NOTE_COLUMNS]; NOTE_LINES];

/// The fine-tuned frequency table: 25 pitch lines of 12 semitones. Each line
/// starts from a slightly higher base and every column scales the previous
/// one by 1.06.
pub fn note_table() -> NoteTable {
    let mut table = [[0u16; NOTE_COLUMNS]; NOTE_LINES];
    for (line, row) in table.iter_mut().enumerate() {
        let mut value: i64 = (((0x2710 + line as i64 * 0x18) * 0xCB78 / 0x3D090) << 14) * 9 / 0x1B503;
        for slot in row.iter_mut() {
            *slot = ((value + 4) >> 3) as u16;
            value = value * 0x6A / 0x64;
        }
    }
    table
}

/// Splits the argument of an `0xAX` event into a semitone offset and a
/// pitch line of the note table.
pub fn pitch_slot(value: u8) -> (i16, usize) {
    let raw = ((value as i32) << 7).wrapping_add(0xE000) as u16 as i16;
    let scaled = (raw as i32 * 25 / 0x2000) as i16;
    if scaled < 0 {
        let column = -((24 - scaled) / 25);
        let mut line = -scaled % 25;
        if line != 0 {
            line = 25 - line;
        }
        (column, line as usize)
    } else {
        (scaled / 25, (scaled % 25) as usize)
    }
}

pub struct AdLibPlayer<O> {
    opl: O,
    rate: u32,
    file: Option<AdlFile>,
    play_pos: usize,
    first: bool,
    ended: bool,
    playing: bool,
    repeat: i32,
    samples_till_poll: u32,
    freqs: NoteTable,
    notes: [u8; NOTE_SLOTS],
    note_column: [i16; NOTE_SLOTS],
    note_line: [usize; NOTE_SLOTS],
    note_on: [bool; NOTE_SLOTS],
    poll_notes: [u8; POLL_CHANNELS],
}

impl<O: Opl> AdLibPlayer<O> {
    pub fn new(opl: O, rate: u32) -> Self {
        let mut player = AdLibPlayer {
            opl,
            rate: rate.max(1),
            file: None,
            play_pos: 0,
            first: true,
            ended: false,
            playing: false,
            repeat: 0,
            samples_till_poll: 0,
            freqs: [[0; NOTE_COLUMNS]; NOTE_LINES],
            notes: [0; NOTE_SLOTS],
            note_column: [0; NOTE_SLOTS],
            note_line: [0; NOTE_SLOTS],
            note_on: [false; NOTE_SLOTS],
            poll_notes: [0; POLL_CHANNELS],
        };
        player.set_freqs();
        player
    }

    pub fn opl(&self) -> &O {
        &self.opl
    }

    pub fn freqs(&self) -> &NoteTable {
        &self.freqs
    }

    /// Rejects anything but a version-0 file.
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        if let Some(&version) = data.first() {
            if version != 0 {
                warn!("adlib: refusing track with version byte {version}");
                return Err(AudioError::UnsupportedVersion {
                    what: "AdLib track",
                    version,
                });
            }
        }
        let file = AdlFile::parse(data)?;
        self.unload();
        debug!(
            "adlib: loaded {} instruments, {} track bytes",
            file.instruments.len(),
            file.track.len()
        );
        self.file = Some(file);
        Ok(())
    }

    pub fn unload(&mut self) {
        self.stop_play();
        self.file = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_repeating(&mut self, repeat: i32) {
        self.repeat = repeat;
    }

    pub fn repeating(&self) -> i32 {
        self.repeat
    }

    pub fn start_play(&mut self) {
        if self.file.is_none() {
            return;
        }
        self.playing = true;
        self.ended = false;
        self.play_pos = 0;
        self.reset();
        self.set_voices();
    }

    pub fn stop_play(&mut self) {
        for voice in 0..VOICES as u8 {
            self.opl.write_reg(0xB0 | voice, 0);
        }
        self.playing = false;
    }

    fn set_freqs(&mut self) {
        for slot in 0..NOTE_SLOTS {
            self.notes[slot] = 0;
            self.note_column[slot] = 0;
            self.note_line[slot] = 0;
            self.note_on[slot] = false;
        }
        self.freqs = note_table();
    }

    fn reset(&mut self) {
        self.first = true;
        self.opl.reset();
        self.samples_till_poll = 0;
        self.set_freqs();

        for (voice, &op) in OPERATORS.iter().enumerate() {
            let voice = voice as u8;
            self.opl.write_reg(0xA0 | voice, 0);
            self.opl.write_reg(0xB0 | voice, 0);
            self.opl.write_reg(0xE0 | op, 0);
            self.opl.write_reg(0xE0 | (op + 3), 0);
        }
        // Enable waveform selection.
        self.opl.write_reg(0x01, 0x20);
    }

    fn set_voices(&mut self) {
        let count = self.file.as_ref().map_or(0, |file| file.instruments.len());
        for voice in 0..VOICES.min(count) {
            if let Err(err) = self.set_voice(voice, voice, true) {
                warn!("adlib: {err}");
            }
        }
    }

    /// Programs both operators of `voice` from instrument `instrument`.
    /// With `mute_carrier` the carrier level is forced to full volume.
    pub fn set_voice(&mut self, voice: usize, instrument: usize, mute_carrier: bool) -> Result<()> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        let Some(&def) = file.instruments.get(instrument) else {
            return Err(AudioError::InstrumentOutOfRange {
                index: instrument,
                count: file.instruments.len(),
            });
        };
        if voice >= VOICES {
            warn!("adlib: no voice {voice}");
            return Ok(());
        }

        for op in 0..2 {
            let p = def.operator(op);
            let channel = OPERATORS[voice] + op as u8 * 3;
            self.opl.write_reg(0xBD, 0x00);
            self.opl.write_reg(0x08, 0x00);
            self.opl
                .write_reg(0x40 | channel, (((p[0] & 3) << 6) | (p[8] & 0x3F)) as u8);
            if op == 0 {
                let connection = 1 - (p[12] & 1);
                self.opl
                    .write_reg(0xC0 | voice as u8, (((p[2] & 7) << 1) | connection) as u8);
            }
            self.opl
                .write_reg(0x60 | channel, (((p[3] & 0xF) << 4) | (p[6] & 0xF)) as u8);
            self.opl
                .write_reg(0x80 | channel, (((p[4] & 0xF) << 4) | (p[7] & 0xF)) as u8);
            let flags = ((p[9] & 1) << 7)
                | ((p[10] & 1) << 6)
                | ((p[5] & 1) << 5)
                | ((p[11] & 1) << 4)
                | (p[1] & 0xF);
            self.opl.write_reg(0x20 | channel, flags as u8);
            let waveform = if op == 0 { p[26] } else { p[14] };
            self.opl.write_reg(0xE0 | channel, (waveform & 3) as u8);
            if op == 1 && mute_carrier {
                self.opl.write_reg(0x40 | channel, 0);
            }
        }
        Ok(())
    }

    /// `retune` selects the `0xAX` path: the argument picks a pitch line and
    /// column offset and the last note is replayed with it.
    pub fn set_key(&mut self, voice: usize, note: u8, on: bool, retune: bool) {
        if voice >= VOICES {
            warn!("adlib: note on missing voice {voice}");
            return;
        }
        let base = if retune {
            let (column, line) = pitch_slot(note);
            self.note_column[voice] = column;
            self.note_line[voice] = line;
            self.notes[voice]
        } else {
            self.note_on[voice] = on;
            note.wrapping_sub(12)
        };
        self.notes[voice] = base;

        // Byte arithmetic: notes below the first octave wrap to the top.
        let note = base.wrapping_add(self.note_column[voice] as u8).min(MAX_NOTE);
        let octave = note / 12;
        let freq = self.freqs[self.note_line[voice]][(note % 12) as usize];

        self.opl.write_reg(0xA0 + voice as u8, (freq & 0xFF) as u8);
        let key = if on { 0x20 } else { 0 };
        self.opl
            .write_reg(0xB0 + voice as u8, (freq >> 8) as u8 | (octave << 2) as u8 | key);
        if freq == 0 {
            warn!("adlib: voice {voice}, note {note:#04x} unknown");
        }
    }

    pub fn set_volume(&mut self, voice: usize, volume: u8) {
        if voice >= VOICES {
            warn!("adlib: volume on missing voice {voice}");
            return;
        }
        let level = 0x3F - (volume as u16 * 0x7E + 0x7F) / 0xFE;
        self.opl.write_reg(0x40 + VOLUME_REGISTERS[voice], level as u8);
    }

    fn next_byte(&mut self) -> Option<u8> {
        let byte = self.file.as_ref()?.track.get(self.play_pos).copied();
        if byte.is_some() {
            self.play_pos += 1;
        }
        byte
    }

    fn truncated(&mut self) {
        warn!("adlib: track ends mid-event at {}", self.play_pos);
        self.ended = true;
    }

    fn read_tempo(&mut self, first: u8) -> Option<u16> {
        if first & 0x80 != 0 {
            let low = self.next_byte()?;
            Some((((first & 3) as u16) << 8) | low as u16)
        } else {
            Some(first as u16)
        }
    }

    fn poll_music(&mut self) {
        if self.first {
            // The leading delay is skipped.
            let Some(tempo) = self.next_byte() else {
                return self.truncated();
            };
            if self.read_tempo(tempo).is_none() {
                return self.truncated();
            }
            self.first = false;
        }

        let Some(event) = self.next_byte() else {
            return self.truncated();
        };
        let channel = (event & 0x0F) as usize;

        match event & 0xF0 {
            0x00 => {
                let (Some(note), Some(volume)) = (self.next_byte(), self.next_byte()) else {
                    return self.truncated();
                };
                self.poll_notes[channel] = note;
                self.set_volume(channel, volume);
                self.set_key(channel, note, true, false);
            }
            0x90 => {
                let Some(note) = self.next_byte() else {
                    return self.truncated();
                };
                self.poll_notes[channel] = note;
                self.set_key(channel, note, true, false);
            }
            0x80 => {
                let note = self.poll_notes[channel];
                self.set_key(channel, note, false, false);
            }
            0xA0 => {
                let Some(value) = self.next_byte() else {
                    return self.truncated();
                };
                let on = channel < NOTE_SLOTS && self.note_on[channel];
                self.set_key(channel, value, on, true);
            }
            0xB0 => {
                let Some(volume) = self.next_byte() else {
                    return self.truncated();
                };
                self.set_volume(channel, volume);
            }
            0xC0 => {
                let Some(instrument) = self.next_byte() else {
                    return self.truncated();
                };
                if let Err(err) = self.set_voice(channel, instrument as usize, false) {
                    warn!("adlib: program change ignored: {err}");
                }
            }
            _ => {
                if event != 0xFF {
                    warn!("adlib: unknown event {event:#04x}, stopping playback");
                    self.repeat = 0;
                }
                self.ended = true;
                self.samples_till_poll = 0;
                return;
            }
        }

        let Some(tempo) = self.next_byte() else {
            return self.truncated();
        };
        if tempo == 0xFF {
            self.ended = true;
            return;
        }
        let Some(tempo) = self.read_tempo(tempo) else {
            return self.truncated();
        };
        self.samples_till_poll = tempo.max(1) as u32 * (self.rate / 1000).max(1);
    }

    fn rewind(&mut self) {
        self.first = true;
        self.ended = false;
        self.play_pos = 0;
        self.samples_till_poll = 0;
        if self.repeat == REPEAT_FOREVER || self.repeat > 0 {
            if self.repeat > 0 {
                self.repeat -= 1;
            }
            self.reset();
            self.set_voices();
        } else {
            self.playing = false;
        }
    }
}

impl<O: Opl> AudioStream for AdLibPlayer<O> {
    fn read_buffer(&mut self, buffer: &mut [i16]) -> usize {
        if !self.playing {
            buffer.fill(0);
            return buffer.len();
        }

        let mut pos = 0;
        while pos < buffer.len() && self.playing {
            if self.samples_till_poll > 0 {
                let render = (buffer.len() - pos).min(self.samples_till_poll as usize);
                self.opl.generate(&mut buffer[pos..pos + render]);
                pos += render;
                self.samples_till_poll -= render as u32;
            } else {
                self.poll_music();
                if self.ended {
                    buffer[pos..].fill(0);
                    pos = buffer.len();
                }
            }
        }

        if self.ended {
            self.rewind();
        }
        buffer.len()
    }

    fn is_stereo(&self) -> bool {
        false
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn end_of_data(&self) -> bool {
        !self.playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opl::{OplEvent, RecordingOpl};
    use gob_formats::adl::{INSTRUMENT_WORDS, build_adl};
    use gob_formats::AdlInstrument;

    const TRACK: [u8; 7] = [0x00, 0x00, 0x3C, 0x7F, 0x0A, 0x80, 0xFF];

    fn player(track: &[u8]) -> (AdLibPlayer<RecordingOpl>, RecordingOpl) {
        let opl = RecordingOpl::new();
        let mut player = AdLibPlayer::new(opl.clone(), 1000);
        let instrument = AdlInstrument {
            words: [0; INSTRUMENT_WORDS],
        };
        player.load(&build_adl(&[instrument], track).unwrap()).unwrap();
        (player, opl)
    }

    #[test]
    fn note_table_is_a_pure_function_of_constants() {
        let first = note_table();
        assert_eq!(first, note_table());
        assert_eq!(first[0][0], 0x157);
        assert_eq!(first[0][1], 364);
        assert_eq!(first[24][0], 0x16B);

        let opl = RecordingOpl::new();
        let mut player = AdLibPlayer::new(opl, 22050);
        player.set_freqs();
        assert_eq!(player.freqs(), &first);
    }

    #[test]
    fn pitch_slot_matches_known_values() {
        assert_eq!(pitch_slot(0x7F), (0, 24));
        assert_eq!(pitch_slot(0x3A), (-1, 23));
        assert_eq!(pitch_slot(0x40), (0, 0));
    }

    #[test]
    fn plays_note_then_releases_and_stops() {
        let (mut player, opl) = player(&TRACK);
        player.start_play();
        assert!(player.is_playing());

        let mut out = vec![1i16; 100];
        assert_eq!(player.read_buffer(&mut out), 100);
        assert!(out.iter().all(|&s| s == 0));
        assert!(!player.is_playing());
        assert!(player.end_of_data());

        let writes = opl.writes();
        assert!(writes.ends_with(&[
            (0x43, 0x00),
            (0xA0, 0x57),
            (0xB0, 0x31),
            (0xA0, 0x57),
            (0xB0, 0x11),
        ]));
        assert!(opl.events().contains(&OplEvent::Generate { samples: 10 }));
    }

    #[test]
    fn repeat_count_replays_the_track() {
        let (mut player, opl) = player(&TRACK);
        player.set_repeating(1);
        player.start_play();

        let mut out = vec![0i16; 100];
        player.read_buffer(&mut out);
        assert!(player.is_playing());
        assert_eq!(player.repeating(), 0);
        player.read_buffer(&mut out);
        assert!(!player.is_playing());

        let resets = opl
            .events()
            .iter()
            .filter(|event| **event == OplEvent::Reset)
            .count();
        assert_eq!(resets, 2);
    }

    #[test]
    fn unknown_event_stops_even_when_repeating() {
        let (mut player, _opl) = player(&[0x00, 0x70, 0x01]);
        player.set_repeating(REPEAT_FOREVER);
        player.start_play();
        let mut out = vec![0i16; 16];
        player.read_buffer(&mut out);
        assert!(!player.is_playing());
    }

    #[test]
    fn rejects_unknown_versions() {
        let opl = RecordingOpl::new();
        let mut player = AdLibPlayer::new(opl, 1000);
        let err = player.load(&[1, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, AudioError::UnsupportedVersion { version: 1, .. }));
        assert!(!player.is_loaded());
    }

    #[test]
    fn set_voice_programs_both_operators() {
        let (mut player, opl) = player(&TRACK);
        opl.clear();
        assert!(player.set_voice(1, 3, false).is_err());
        player.set_voice(1, 0, true).unwrap();
        let regs: Vec<u8> = opl.writes().iter().map(|(reg, _)| *reg).collect();
        assert!(regs.contains(&0xC1));
        assert!(regs.contains(&0x41));
        assert!(regs.contains(&0x44));
        assert_eq!(opl.writes().last(), Some(&(0x44, 0)));
    }

    fn key_writes(opl: &RecordingOpl, voice: u8) -> Vec<(u8, u8)> {
        opl.writes()
            .into_iter()
            .filter(|(reg, _)| *reg == 0xA0 + voice || *reg == 0xB0 + voice)
            .collect()
    }

    #[test]
    fn every_voice_starts_on_the_same_pitch_line() {
        let opl = RecordingOpl::new();
        let mut player = AdLibPlayer::new(opl.clone(), 1000);
        player.set_key(0, 0x3C, true, false);
        player.set_key(3, 0x3C, true, false);
        player.set_key(8, 0x3C, true, false);

        let first = key_writes(&opl, 0);
        assert_eq!(first, vec![(0xA0, 0x57), (0xB0, 0x31)]);
        for voice in [3u8, 8] {
            let writes = key_writes(&opl, voice);
            assert_eq!(writes[0].1, first[0].1);
            assert_eq!(writes[1].1, first[1].1);
        }
    }

    #[test]
    fn notes_below_the_first_octave_wrap_to_the_top() {
        let opl = RecordingOpl::new();
        let mut player = AdLibPlayer::new(opl.clone(), 1000);
        player.set_key(0, 5, true, false);
        let top = note_table()[0][(0x5F % 12) as usize];
        let octave = 0x5F / 12;
        assert_eq!(
            key_writes(&opl, 0),
            vec![
                (0xA0, (top & 0xFF) as u8),
                (0xB0, (top >> 8) as u8 | (octave << 2) | 0x20)
            ]
        );
    }
}

use super::driver::{MidiDriver, PERCUSSION_CHANNEL};

const CC_MODULATION: u8 = 1;
const CC_VOLUME: u8 = 7;
const CC_PAN: u8 = 10;
const CC_SUSTAIN: u8 = 64;
const CC_REVERB: u8 = 91;
const CC_CHORUS: u8 = 93;
const CC_ALL_NOTES_OFF: u8 = 123;

/// A player's contribution to the effective values of each of its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Levels {
    pub volume: u8,
    pub pan: i8,
    pub transpose: i8,
    pub detune: i8,
    pub priority: u8,
}

/// One sequence channel of one player. Melodic parts compete for driver
/// channels; a part that is on but holds none stays silent until
/// reallocation hands it one.
#[derive(Debug, Clone)]
pub struct Part {
    pub(crate) player: Option<usize>,
    pub(crate) channel: u8,
    pub(crate) hardware: Option<u8>,
    pub(crate) on: bool,
    volume: u8,
    pan: i8,
    transpose: i8,
    detune: i8,
    priority: i8,
    program: Option<u8>,
    bend: i16,
    modulation: u8,
    reverb: u8,
    chorus: u8,
    sustain: bool,
    vol_eff: u8,
    pri_eff: u8,
    pan_eff: i8,
    transpose_eff: i8,
    detune_eff: i8,
}

impl Part {
    pub fn empty() -> Self {
        Part {
            player: None,
            channel: 0,
            hardware: None,
            on: false,
            volume: 127,
            pan: 0,
            transpose: 0,
            detune: 0,
            priority: 0,
            program: None,
            bend: 0,
            modulation: 0,
            reverb: 64,
            chorus: 0,
            sustain: false,
            vol_eff: 0,
            pri_eff: 0,
            pan_eff: 0,
            transpose_eff: 0,
            detune_eff: 0,
        }
    }

    pub fn assign(&mut self, player: usize, channel: u8, levels: &Levels) {
        *self = Part::empty();
        self.player = Some(player);
        self.channel = channel;
        self.on = true;
        self.apply_levels(levels);
    }

    pub fn is_free(&self) -> bool {
        self.player.is_none()
    }

    pub fn is_percussion(&self) -> bool {
        self.channel == PERCUSSION_CHANNEL
    }

    pub fn priority_eff(&self) -> u8 {
        self.pri_eff
    }

    pub fn volume_eff(&self) -> u8 {
        self.vol_eff
    }

    pub fn program(&self) -> Option<u8> {
        self.program
    }

    /// Melodic parts need a driver channel; percussion always plays on 9.
    pub fn needs_channel(&self) -> bool {
        self.player.is_some() && self.on && !self.is_percussion() && self.hardware.is_none()
    }

    fn output(&self) -> Option<u8> {
        if !self.on || self.player.is_none() {
            None
        } else if self.is_percussion() {
            Some(PERCUSSION_CHANNEL)
        } else {
            self.hardware
        }
    }

    pub fn apply_levels(&mut self, levels: &Levels) {
        self.pri_eff = (levels.priority as i32 + self.priority as i32).clamp(0, 255) as u8;
        self.vol_eff = (((self.volume as u32 + 1) * levels.volume as u32) >> 7) as u8;
        self.pan_eff = (self.pan as i32 + levels.pan as i32).clamp(-64, 63) as i8;
        self.transpose_eff = (self.transpose as i32 + levels.transpose as i32).clamp(-24, 24) as i8;
        self.detune_eff = (self.detune as i32 + levels.detune as i32).clamp(-128, 127) as i8;
    }

    /// Volume, pan and pitch bend.
    pub fn send_levels(&self, driver: &mut dyn MidiDriver) {
        let Some(out) = self.output() else {
            return;
        };
        let bend = (self.bend as i32 + self.detune_eff as i32 * 64).clamp(-8192, 8191) + 8192;
        driver.send(0xE0 | out, (bend & 0x7F) as u8, (bend >> 7) as u8);
        driver.send(0xB0 | out, CC_VOLUME, self.vol_eff);
        driver.send(0xB0 | out, CC_PAN, (self.pan_eff as i32 + 64) as u8);
    }

    /// Full controller state, sent when the part lands on a new channel.
    pub fn send_all(&self, driver: &mut dyn MidiDriver) {
        let Some(out) = self.output() else {
            return;
        };
        self.send_levels(driver);
        driver.send(0xB0 | out, CC_MODULATION, self.modulation);
        driver.send(0xB0 | out, CC_REVERB, self.reverb);
        driver.send(0xB0 | out, CC_CHORUS, self.chorus);
        driver.send(0xB0 | out, CC_SUSTAIN, if self.sustain { 127 } else { 0 });
        if let Some(program) = self.program {
            driver.send(0xC0 | out, program, 0);
        }
    }

    fn note(&self, note: u8) -> u8 {
        if self.is_percussion() {
            note
        } else {
            (note as i32 + self.transpose_eff as i32).clamp(0, 127) as u8
        }
    }

    pub fn note_on(&self, driver: &mut dyn MidiDriver, note: u8, velocity: u8) {
        if let Some(out) = self.output() {
            driver.send(0x90 | out, self.note(note), velocity);
        }
    }

    pub fn note_off(&self, driver: &mut dyn MidiDriver, note: u8) {
        if let Some(out) = self.output() {
            driver.send(0x80 | out, self.note(note), 0);
        }
    }

    pub fn set_volume(&mut self, driver: &mut dyn MidiDriver, volume: u8, levels: &Levels) {
        self.volume = volume.min(127);
        self.apply_levels(levels);
        if let Some(out) = self.output() {
            driver.send(0xB0 | out, CC_VOLUME, self.vol_eff);
        }
    }

    pub fn set_pan(&mut self, driver: &mut dyn MidiDriver, pan: i8, levels: &Levels) {
        self.pan = pan.clamp(-64, 63);
        self.apply_levels(levels);
        if let Some(out) = self.output() {
            driver.send(0xB0 | out, CC_PAN, (self.pan_eff as i32 + 64) as u8);
        }
    }

    pub fn set_transpose(&mut self, transpose: i8, levels: &Levels) {
        self.transpose = transpose.clamp(-24, 24);
        self.apply_levels(levels);
    }

    pub fn set_detune(&mut self, driver: &mut dyn MidiDriver, detune: i8, levels: &Levels) {
        self.detune = detune;
        self.apply_levels(levels);
        self.send_levels(driver);
    }

    /// Reallocation is left to the caller.
    pub fn set_priority(&mut self, priority: i8, levels: &Levels) {
        self.priority = priority;
        self.apply_levels(levels);
    }

    pub fn set_program(&mut self, driver: &mut dyn MidiDriver, program: u8) {
        self.program = Some(program & 0x7F);
        if let Some(out) = self.output() {
            driver.send(0xC0 | out, program & 0x7F, 0);
        }
    }

    pub fn set_pitch_bend(&mut self, driver: &mut dyn MidiDriver, bend: i16) {
        self.bend = bend.clamp(-8192, 8191);
        self.send_levels(driver);
    }

    pub fn control_change(&mut self, driver: &mut dyn MidiDriver, control: u8, value: u8, levels: &Levels) {
        match control {
            CC_VOLUME => return self.set_volume(driver, value, levels),
            CC_PAN => return self.set_pan(driver, value as i8 - 64, levels),
            CC_MODULATION => self.modulation = value,
            CC_REVERB => self.reverb = value,
            CC_CHORUS => self.chorus = value,
            CC_SUSTAIN => self.sustain = value >= 64,
            _ => {}
        }
        if let Some(out) = self.output() {
            driver.send(0xB0 | out, control, value);
        }
    }

    /// Forwards messages the part keeps no state for.
    pub fn raw(&self, driver: &mut dyn MidiDriver, status: u8, data1: u8, data2: u8) {
        if let Some(out) = self.output() {
            driver.send((status & 0xF0) | out, data1, data2);
        }
    }

    pub fn all_notes_off(&self, driver: &mut dyn MidiDriver) {
        if let Some(out) = self.output() {
            driver.send(0xB0 | out, CC_SUSTAIN, 0);
            driver.send(0xB0 | out, CC_ALL_NOTES_OFF, 0);
        }
    }

    /// Gives the driver channel back; the part keeps its state.
    pub fn off(&mut self, driver: &mut dyn MidiDriver) {
        if let Some(channel) = self.hardware.take() {
            driver.send(0xB0 | channel, CC_SUSTAIN, 0);
            driver.send(0xB0 | channel, CC_ALL_NOTES_OFF, 0);
            driver.release_channel(channel);
        }
    }

    pub fn set_on(&mut self, driver: &mut dyn MidiDriver, on: bool) {
        if !on {
            self.all_notes_off(driver);
            self.off(driver);
        }
        self.on = on;
    }

    pub fn uninit(&mut self, driver: &mut dyn MidiDriver) {
        self.all_notes_off(driver);
        self.off(driver);
        *self = Part::empty();
    }
}

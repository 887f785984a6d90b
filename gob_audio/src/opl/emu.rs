//! Register-level OPL2 approximation: nine two-operator FM channels with
//! ADSR envelopes, four waveforms and modulator feedback. Rhythm mode,
//! tremolo and vibrato are not modelled.

use std::f64::consts::TAU;

use log::trace;

use super::Opl;

const CHIP_RATE: f64 = 3_579_545.0 / 72.0;
const NUM_CHANNELS: usize = 9;
const NUM_OPERATORS: usize = NUM_CHANNELS * 2;
const SILENCE_DB: f32 = 96.0;
const OUTPUT_SCALE: f32 = 6000.0;
/// Phase shift, in cycles, that a full-scale modulator applies to its carrier.
const MODULATION_DEPTH: f64 = 1.0;

const MULTIPLIERS: [f64; 16] = [
    0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 10.0, 12.0, 12.0, 15.0, 15.0,
];
/// Feedback strength in cycles, indexed by the 3-bit field of 0xC0.
const FEEDBACK: [f64; 8] = [
    0.0,
    1.0 / 32.0,
    1.0 / 16.0,
    1.0 / 8.0,
    1.0 / 4.0,
    1.0 / 2.0,
    1.0,
    2.0,
];
/// Milliseconds for a full 96 dB sweep at rate value 1.
const ATTACK_MS_RATE1: f32 = 2826.0;
const DECAY_MS_RATE1: f32 = 39280.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Stage {
    #[default]
    Off,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Copy)]
struct Operator {
    sustained: bool,
    key_scale_rate: bool,
    multiplier: u8,
    total_level: u8,
    attack: u8,
    decay: u8,
    sustain_level: u8,
    release: u8,
    waveform: u8,
    phase: f64,
    stage: Stage,
    attenuation: f32,
}

impl Default for Operator {
    fn default() -> Self {
        Operator {
            sustained: false,
            key_scale_rate: false,
            multiplier: 0,
            total_level: 0,
            attack: 0,
            decay: 0,
            sustain_level: 0,
            release: 0,
            waveform: 0,
            phase: 0.0,
            stage: Stage::Off,
            attenuation: SILENCE_DB,
        }
    }
}

impl Operator {
    fn key_on(&mut self) {
        self.phase = 0.0;
        self.stage = Stage::Attack;
    }

    fn key_off(&mut self) {
        if self.stage != Stage::Off {
            self.stage = Stage::Release;
        }
    }

    /// Per-sample dB change for a 4-bit rate, or `None` when the rate is 0.
    fn slope(&self, rate: u8, key_scale: u8, full_sweep_ms: f32, output_rate: u32) -> Option<f32> {
        if rate == 0 {
            return None;
        }
        let offset = if self.key_scale_rate {
            key_scale
        } else {
            key_scale >> 2
        };
        let effective = (rate as u32 * 4 + offset as u32).min(63);
        let ms = full_sweep_ms / 2f32.powf((effective as f32 - 4.0) / 4.0);
        let samples = (ms * output_rate as f32 / 1000.0).max(1.0);
        Some(SILENCE_DB / samples)
    }

    fn step_envelope(&mut self, key_scale: u8, output_rate: u32) {
        match self.stage {
            Stage::Off => self.attenuation = SILENCE_DB,
            Stage::Attack => {
                if self.attack >= 15 {
                    self.attenuation = 0.0;
                } else if let Some(slope) =
                    self.slope(self.attack, key_scale, ATTACK_MS_RATE1, output_rate)
                {
                    self.attenuation -= slope;
                }
                if self.attenuation <= 0.0 {
                    self.attenuation = 0.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                let floor = self.sustain_level as f32 * 3.0;
                if let Some(slope) = self.slope(self.decay, key_scale, DECAY_MS_RATE1, output_rate) {
                    self.attenuation += slope;
                }
                if self.attenuation >= floor {
                    self.attenuation = floor;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => {
                if !self.sustained {
                    self.stage = Stage::Release;
                }
            }
            Stage::Release => {
                if let Some(slope) =
                    self.slope(self.release, key_scale, DECAY_MS_RATE1, output_rate)
                {
                    self.attenuation += slope;
                }
                if self.attenuation >= SILENCE_DB {
                    self.attenuation = SILENCE_DB;
                    self.stage = Stage::Off;
                }
            }
        }
    }

    fn amplitude(&self) -> f64 {
        let db = self.attenuation + self.total_level as f32 * 0.75;
        if db >= SILENCE_DB {
            0.0
        } else {
            10f64.powf(-(db as f64) / 20.0)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    fnum: u16,
    block: u8,
    key_on: bool,
    feedback: u8,
    additive: bool,
    history: [f64; 2],
}

impl Channel {
    fn key_scale(&self) -> u8 {
        self.block * 2 + ((self.fnum >> 9) & 1) as u8
    }

    fn frequency(&self) -> f64 {
        self.fnum as f64 * CHIP_RATE / (1u32 << (20 - self.block as u32)) as f64
    }
}

pub struct OplEmulator {
    rate: u32,
    waveform_select: bool,
    channels: [Channel; NUM_CHANNELS],
    operators: [Operator; NUM_OPERATORS],
}

impl OplEmulator {
    pub fn new(rate: u32) -> Self {
        OplEmulator {
            rate: rate.max(1),
            waveform_select: false,
            channels: [Channel::default(); NUM_CHANNELS],
            operators: [Operator::default(); NUM_OPERATORS],
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Maps a register slot offset (0x00..0x15) to an operator index.
    fn operator_index(slot: u8) -> Option<usize> {
        let group = (slot / 8) as usize;
        let within = (slot % 8) as usize;
        if group > 2 || within > 5 {
            return None;
        }
        let channel = group * 3 + within % 3;
        Some(channel * 2 + within / 3)
    }

    fn waveform(&self, op: &Operator, phase: f64) -> f64 {
        let phase = phase.rem_euclid(1.0);
        let sine = (phase * TAU).sin();
        if !self.waveform_select {
            return sine;
        }
        match op.waveform & 3 {
            0 => sine,
            1 => sine.max(0.0),
            2 => sine.abs(),
            _ => {
                if phase % 0.5 < 0.25 {
                    sine.abs()
                } else {
                    0.0
                }
            }
        }
    }

    fn render_channel(&mut self, index: usize) -> f64 {
        let channel = self.channels[index];
        let (mod_index, car_index) = (index * 2, index * 2 + 1);
        if self.operators[mod_index].stage == Stage::Off
            && self.operators[car_index].stage == Stage::Off
        {
            return 0.0;
        }

        let key_scale = channel.key_scale();
        let frequency = channel.frequency();
        for op in [mod_index, car_index] {
            self.operators[op].step_envelope(key_scale, self.rate);
        }

        let modulator = self.operators[mod_index];
        let carrier = self.operators[car_index];

        let feedback = if channel.feedback > 0 {
            (channel.history[0] + channel.history[1]) * 0.5 * FEEDBACK[channel.feedback as usize]
        } else {
            0.0
        };
        let mod_out = self.waveform(&modulator, modulator.phase + feedback) * modulator.amplitude();
        let out = if channel.additive {
            mod_out + self.waveform(&carrier, carrier.phase) * carrier.amplitude()
        } else {
            self.waveform(&carrier, carrier.phase + mod_out * MODULATION_DEPTH)
                * carrier.amplitude()
        };

        let state = &mut self.channels[index];
        state.history = [state.history[1], mod_out];
        for op in [mod_index, car_index] {
            let operator = &mut self.operators[op];
            let increment =
                frequency * MULTIPLIERS[operator.multiplier as usize & 0xF] / self.rate as f64;
            operator.phase = (operator.phase + increment).fract();
        }
        out
    }

    fn write_key(&mut self, index: usize, value: u8) {
        let channel = &mut self.channels[index];
        channel.fnum = (channel.fnum & 0xFF) | (((value & 3) as u16) << 8);
        channel.block = (value >> 2) & 7;
        let on = value & 0x20 != 0;
        let was_on = channel.key_on;
        channel.key_on = on;
        for op in [index * 2, index * 2 + 1] {
            match (was_on, on) {
                (false, true) => self.operators[op].key_on(),
                (true, false) => self.operators[op].key_off(),
                _ => {}
            }
        }
    }
}

impl Opl for OplEmulator {
    fn reset(&mut self) {
        *self = OplEmulator::new(self.rate);
    }

    fn write_reg(&mut self, reg: u8, value: u8) {
        match reg {
            0x01 => self.waveform_select = value & 0x20 != 0,
            0x20..=0x35 | 0x40..=0x55 | 0x60..=0x75 | 0x80..=0x95 | 0xE0..=0xF5 => {
                let Some(index) = Self::operator_index(reg & 0x1F) else {
                    trace!("opl: write to unused slot {reg:#04x}");
                    return;
                };
                let op = &mut self.operators[index];
                match reg & 0xE0 {
                    0x20 => {
                        op.sustained = value & 0x20 != 0;
                        op.key_scale_rate = value & 0x10 != 0;
                        op.multiplier = value & 0x0F;
                    }
                    0x40 => op.total_level = value & 0x3F,
                    0x60 => {
                        op.attack = value >> 4;
                        op.decay = value & 0x0F;
                    }
                    0x80 => {
                        op.sustain_level = value >> 4;
                        op.release = value & 0x0F;
                    }
                    _ => op.waveform = value & 3,
                }
            }
            0xA0..=0xA8 => {
                let channel = &mut self.channels[(reg - 0xA0) as usize];
                channel.fnum = (channel.fnum & 0x300) | value as u16;
            }
            0xB0..=0xB8 => self.write_key((reg - 0xB0) as usize, value),
            0xC0..=0xC8 => {
                let channel = &mut self.channels[(reg - 0xC0) as usize];
                channel.feedback = (value >> 1) & 7;
                channel.additive = value & 1 != 0;
            }
            _ => trace!("opl: ignoring register {reg:#04x} = {value:#04x}"),
        }
    }

    fn generate(&mut self, out: &mut [i16]) {
        for slot in out.iter_mut() {
            let mut mixed = 0.0;
            for channel in 0..NUM_CHANNELS {
                mixed += self.render_channel(channel);
            }
            let value = (mixed as f32 * OUTPUT_SCALE).round();
            *slot = value.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_sine(chip: &mut OplEmulator) {
        // Channel 0: modulator muted, carrier with instant attack and
        // fastest release, held while the key is down.
        chip.write_reg(0x20, 0x21);
        chip.write_reg(0x23, 0x21);
        chip.write_reg(0x40, 0x3F);
        chip.write_reg(0x43, 0x00);
        chip.write_reg(0x60, 0xF0);
        chip.write_reg(0x63, 0xF0);
        chip.write_reg(0x80, 0x0F);
        chip.write_reg(0x83, 0x0F);
        chip.write_reg(0xC0, 0x00);
        chip.write_reg(0xA0, 0x57);
    }

    #[test]
    fn silent_until_a_key_is_pressed() {
        let mut chip = OplEmulator::new(22050);
        program_sine(&mut chip);
        let mut out = vec![1i16; 256];
        chip.generate(&mut out);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn key_on_sounds_and_key_off_releases() {
        let mut chip = OplEmulator::new(22050);
        program_sine(&mut chip);
        chip.write_reg(0xB0, 0x20 | (4 << 2) | 0x01);

        let mut out = vec![0i16; 1024];
        chip.generate(&mut out);
        let peak = out.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        assert!(peak > 1000, "peak was {peak}");

        chip.write_reg(0xB0, (4 << 2) | 0x01);
        let mut tail = vec![0i16; 2048];
        chip.generate(&mut tail);
        assert!(tail[1024..].iter().all(|&s| s == 0));
    }

    #[test]
    fn maps_register_slots_to_operators() {
        assert_eq!(OplEmulator::operator_index(0x00), Some(0));
        assert_eq!(OplEmulator::operator_index(0x03), Some(1));
        assert_eq!(OplEmulator::operator_index(0x08), Some(6));
        assert_eq!(OplEmulator::operator_index(0x15), Some(17));
        assert_eq!(OplEmulator::operator_index(0x06), None);
    }
}

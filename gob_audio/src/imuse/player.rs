use std::sync::Arc;

use super::part::Levels;
use super::sequence::{DEFAULT_TEMPO, MidiEvent, MidiSequence};

pub const NORMAL_SPEED: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRegion {
    pub count: u16,
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hooks {
    pub jump: u8,
    pub part_onoff: [u8; 16],
}

#[derive(Debug, Clone, Copy)]
pub struct Fade {
    from: i32,
    to: i32,
    elapsed_us: u64,
    duration_us: u64,
}

impl Fade {
    pub fn new(from: u8, to: u8, duration_us: u64) -> Self {
        Fade {
            from: from as i32,
            to: to as i32,
            elapsed_us: 0,
            duration_us: duration_us.max(1),
        }
    }

    /// Advances the fade and returns the volume to apply now.
    pub fn step(&mut self, micros: u64) -> u8 {
        self.elapsed_us = (self.elapsed_us + micros).min(self.duration_us);
        let delta = (self.to - self.from) as i64 * self.elapsed_us as i64 / self.duration_us as i64;
        (self.from as i64 + delta) as u8
    }

    pub fn is_done(&self) -> bool {
        self.elapsed_us >= self.duration_us
    }

    pub fn target(&self) -> u8 {
        self.to as u8
    }
}

pub enum Step {
    Event(MidiEvent),
    Looped,
    Idle,
}

/// One playing sound: its position in the sequence and the parameters
/// scripts can change while it plays.
#[derive(Debug, Clone)]
pub struct Player {
    pub(crate) active: bool,
    pub(crate) sound: u16,
    pub(crate) priority: u8,
    pub(crate) volume: u8,
    pub(crate) pan: i8,
    pub(crate) transpose: i8,
    pub(crate) detune: i8,
    pub(crate) speed: u8,
    pub(crate) loop_region: Option<LoopRegion>,
    pub(crate) hooks: Hooks,
    pub(crate) fade: Option<Fade>,
    sequence: Option<Arc<MidiSequence>>,
    position: usize,
    tick: u32,
    tick_acc: u64,
    tempo: u32,
}

impl Player {
    pub fn idle() -> Self {
        Player {
            active: false,
            sound: 0,
            priority: 0,
            volume: 127,
            pan: 0,
            transpose: 0,
            detune: 0,
            speed: NORMAL_SPEED,
            loop_region: None,
            hooks: Hooks::default(),
            fade: None,
            sequence: None,
            position: 0,
            tick: 0,
            tick_acc: 0,
            tempo: DEFAULT_TEMPO,
        }
    }

    pub fn start(&mut self, sound: u16, sequence: Arc<MidiSequence>) {
        *self = Player::idle();
        self.active = true;
        self.sound = sound;
        self.priority = sequence.priority;
        self.sequence = Some(sequence);
    }

    pub fn clear(&mut self) {
        *self = Player::idle();
    }

    /// `master` is the global music volume (0-255).
    pub fn levels(&self, master: u8) -> Levels {
        Levels {
            volume: (((self.volume as u32 + 1) * master as u32) >> 8) as u8,
            pan: self.pan,
            transpose: self.transpose,
            detune: self.detune,
            priority: self.priority,
        }
    }

    fn ppqn(&self) -> u32 {
        self.sequence.as_ref().map_or(1, |sequence| sequence.ppqn as u32)
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// 1-based beat and the tick inside it.
    pub fn beat(&self) -> (u32, u32) {
        let ppqn = self.ppqn();
        (self.tick / ppqn + 1, self.tick % ppqn)
    }

    pub fn beat_to_tick(&self, beat: u32, tick: u32) -> u32 {
        beat.saturating_sub(1) * self.ppqn() + tick
    }

    pub fn set_tempo(&mut self, tempo: u32) {
        self.tempo = tempo.max(1);
    }

    /// Moves the clock forward by wall time scaled by the speed setting.
    pub fn advance_clock(&mut self, micros: u64) {
        let unit = self.tempo as u64 * NORMAL_SPEED as u64;
        self.tick_acc += micros * self.speed as u64 * self.ppqn() as u64;
        let ticks = self.tick_acc / unit;
        self.tick_acc %= unit;
        self.tick = self.tick.saturating_add(ticks as u32);
    }

    pub fn jump(&mut self, tick: u32) {
        self.tick = tick;
        self.position = self
            .sequence
            .as_ref()
            .map_or(0, |sequence| sequence.position_of(tick));
    }

    /// The next event that is due, honouring the loop region.
    pub fn next_step(&mut self) -> Step {
        let Some(sequence) = self.sequence.as_ref() else {
            return Step::Idle;
        };
        let Some(next) = sequence.events.get(self.position) else {
            return Step::Idle;
        };
        if let Some(region) = self.loop_region {
            if self.tick >= region.end && next.tick >= region.end {
                let overshoot = self.tick - region.end;
                self.jump(region.start + overshoot);
                if region.count <= 1 {
                    self.loop_region = None;
                } else {
                    self.loop_region = Some(LoopRegion {
                        count: region.count - 1,
                        ..region
                    });
                }
                return Step::Looped;
            }
        }
        if next.tick > self.tick {
            return Step::Idle;
        }
        let event = next.event.clone();
        self.position += 1;
        Step::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imuse::sequence::build_smf;

    fn player() -> Player {
        let data = build_smf(
            4,
            Some(10),
            &[(0, vec![0x90, 60, 100]), (8, vec![0x80, 60, 0])],
        );
        let mut player = Player::idle();
        player.start(7, Arc::new(MidiSequence::parse(&data).unwrap()));
        player
    }

    #[test]
    fn clock_follows_tempo_and_speed() {
        let mut player = player();
        assert_eq!(player.priority, 10);
        // 4 ticks per 500 ms quarter note.
        player.advance_clock(250_000);
        assert_eq!(player.tick(), 2);
        player.speed = 255;
        player.advance_clock(125_000);
        assert_eq!(player.tick(), 3);
        assert_eq!(player.beat(), (1, 3));
    }

    #[test]
    fn loop_region_rewinds_then_expires() {
        let mut player = player();
        player.loop_region = Some(LoopRegion {
            count: 1,
            start: 0,
            end: 4,
        });
        assert!(matches!(player.next_step(), Step::Event(_)));
        player.advance_clock(500_000);
        assert!(matches!(player.next_step(), Step::Looped));
        assert_eq!(player.tick(), 0);
        assert!(player.loop_region.is_none());
        assert!(matches!(player.next_step(), Step::Event(_)));
    }

    #[test]
    fn fade_interpolates_to_target() {
        let mut fade = Fade::new(100, 0, 1000);
        assert_eq!(fade.step(250), 75);
        assert_eq!(fade.step(10_000), 0);
        assert!(fade.is_done());
    }
}

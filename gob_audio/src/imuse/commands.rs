//! `do_command` dispatch. The first argument packs the command in its low
//! byte and the target class in the next; the remaining arguments depend
//! on the command. Every failure answers -1.

use log::debug;

use super::IMuseInner;
use super::player::{LoopRegion, NORMAL_SPEED};
use super::{Deferred, Trigger};

const VERSION: i32 = 0x0300;
const MAX_TRIGGERS: usize = 16;
const MAX_DEFERRED: usize = 16;
const FAIL: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandClass {
    Global = 0,
    Player = 1,
    Part = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GlobalCommand {
    Version = 0,
    SetMusicVolume = 1,
    GetMusicVolume = 2,
    StartSound = 3,
    StopSound = 4,
    StopAllSounds = 5,
    GetSoundStatus = 6,
    ClearQueue = 7,
    SetRecycle = 8,
    SetTrigger = 9,
    ClearTrigger = 10,
    Defer = 11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayerCommand {
    SetPriority = 0,
    SetVolume = 1,
    SetPan = 2,
    SetTranspose = 3,
    SetDetune = 4,
    SetSpeed = 5,
    Jump = 6,
    SetLoop = 7,
    ClearLoop = 8,
    SetHook = 9,
    FadeVolume = 10,
    GetParam = 11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PartCommand {
    SetOnOff = 0,
    SetVolume = 1,
    SetPan = 2,
    SetTranspose = 3,
    SetPriority = 4,
    SetProgram = 5,
}

pub fn command_word(class: CommandClass, command: u8) -> i32 {
    (class as i32) << 8 | command as i32
}

fn in_range(value: i32, low: i32, high: i32) -> Option<i32> {
    (low..=high).contains(&value).then_some(value)
}

/// Fetches an argument, failing the command when it is missing.
macro_rules! arg {
    ($args:expr, $index:expr) => {
        match $args.get($index) {
            Some(&value) => value,
            None => return FAIL,
        }
    };
}

macro_rules! ranged {
    ($args:expr, $index:expr, $low:expr, $high:expr) => {
        match in_range(arg!($args, $index), $low, $high) {
            Some(value) => value,
            None => return FAIL,
        }
    };
}

impl IMuseInner {
    pub(crate) fn do_command(&mut self, args: &[i32]) -> i32 {
        let word = arg!(args, 0);
        let command = (word & 0xFF) as u8;
        match (word >> 8) & 0xFF {
            0 => self.global_command(command, args),
            1 => self.player_command(command, args),
            2 => self.part_command(command, args),
            class => {
                debug!("imuse: unknown command class {class}");
                FAIL
            }
        }
    }

    fn global_command(&mut self, command: u8, args: &[i32]) -> i32 {
        const VERSION_CMD: u8 = GlobalCommand::Version as u8;
        const SET_VOLUME: u8 = GlobalCommand::SetMusicVolume as u8;
        const GET_VOLUME: u8 = GlobalCommand::GetMusicVolume as u8;
        const START: u8 = GlobalCommand::StartSound as u8;
        const STOP: u8 = GlobalCommand::StopSound as u8;
        const STOP_ALL: u8 = GlobalCommand::StopAllSounds as u8;
        const STATUS: u8 = GlobalCommand::GetSoundStatus as u8;
        const CLEAR_QUEUE: u8 = GlobalCommand::ClearQueue as u8;
        const RECYCLE: u8 = GlobalCommand::SetRecycle as u8;
        const SET_TRIGGER: u8 = GlobalCommand::SetTrigger as u8;
        const CLEAR_TRIGGER: u8 = GlobalCommand::ClearTrigger as u8;
        const DEFER: u8 = GlobalCommand::Defer as u8;

        match command {
            VERSION_CMD => VERSION,
            SET_VOLUME => {
                let volume = ranged!(args, 1, 0, 255);
                self.set_music_volume(volume as u8);
                0
            }
            GET_VOLUME => self.music_volume as i32,
            START => {
                let sound = ranged!(args, 1, 0, u16::MAX as i32);
                if self.start_sound(sound as u16) { 0 } else { FAIL }
            }
            STOP => {
                let sound = ranged!(args, 1, 0, u16::MAX as i32);
                if self.stop_sound(sound as u16) { 0 } else { FAIL }
            }
            STOP_ALL => {
                self.stop_all_sounds();
                0
            }
            STATUS => {
                let sound = ranged!(args, 1, 0, u16::MAX as i32);
                self.find_player(sound as u16).is_some() as i32
            }
            CLEAR_QUEUE => {
                self.clear_queue();
                0
            }
            RECYCLE => {
                self.recycle_players = arg!(args, 1) != 0;
                0
            }
            SET_TRIGGER => {
                let sound = ranged!(args, 1, 0, u16::MAX as i32) as u16;
                let marker = ranged!(args, 2, 0, 255) as u8;
                let command = &args[3.min(args.len())..];
                if command.is_empty() || self.triggers.len() >= MAX_TRIGGERS {
                    return FAIL;
                }
                self.triggers.push(Trigger {
                    sound,
                    marker,
                    command: command.to_vec(),
                });
                0
            }
            CLEAR_TRIGGER => {
                let sound = ranged!(args, 1, 0, u16::MAX as i32) as u16;
                let marker = args.get(2).copied().unwrap_or(-1);
                self.triggers.retain(|trigger| {
                    trigger.sound != sound || (marker >= 0 && trigger.marker as i32 != marker)
                });
                0
            }
            DEFER => {
                let units = ranged!(args, 1, 0, i32::MAX);
                let command = &args[2.min(args.len())..];
                if command.is_empty() || self.deferred.len() >= MAX_DEFERRED {
                    return FAIL;
                }
                self.deferred.push(Deferred {
                    remaining_us: units as u64 * 10_000,
                    command: command.to_vec(),
                });
                0
            }
            _ => {
                debug!("imuse: unknown global command {command}");
                FAIL
            }
        }
    }

    fn player_command(&mut self, command: u8, args: &[i32]) -> i32 {
        const PRIORITY: u8 = PlayerCommand::SetPriority as u8;
        const VOLUME: u8 = PlayerCommand::SetVolume as u8;
        const PAN: u8 = PlayerCommand::SetPan as u8;
        const TRANSPOSE: u8 = PlayerCommand::SetTranspose as u8;
        const DETUNE: u8 = PlayerCommand::SetDetune as u8;
        const SPEED: u8 = PlayerCommand::SetSpeed as u8;
        const JUMP: u8 = PlayerCommand::Jump as u8;
        const SET_LOOP: u8 = PlayerCommand::SetLoop as u8;
        const CLEAR_LOOP: u8 = PlayerCommand::ClearLoop as u8;
        const HOOK: u8 = PlayerCommand::SetHook as u8;
        const FADE: u8 = PlayerCommand::FadeVolume as u8;
        const GET_PARAM: u8 = PlayerCommand::GetParam as u8;

        let sound = ranged!(args, 1, 0, u16::MAX as i32) as u16;
        let Some(index) = self.find_player(sound) else {
            return FAIL;
        };

        match command {
            PRIORITY => {
                self.players[index].priority = ranged!(args, 2, 0, 255) as u8;
                self.refresh_player(index);
            }
            VOLUME => {
                self.players[index].volume = ranged!(args, 2, 0, 127) as u8;
                self.refresh_player(index);
            }
            PAN => {
                self.players[index].pan = ranged!(args, 2, -64, 63) as i8;
                self.refresh_player(index);
            }
            TRANSPOSE => {
                self.players[index].transpose = ranged!(args, 2, -24, 24) as i8;
                self.refresh_player(index);
            }
            DETUNE => {
                self.players[index].detune = ranged!(args, 2, -128, 127) as i8;
                self.refresh_player(index);
            }
            SPEED => {
                self.players[index].speed = ranged!(args, 2, 1, 255) as u8;
            }
            JUMP => {
                let beat = ranged!(args, 2, 1, i32::MAX) as u32;
                let tick = ranged!(args, 3, 0, i32::MAX) as u32;
                let target = self.players[index].beat_to_tick(beat, tick);
                self.silence_player(index);
                self.players[index].jump(target);
            }
            SET_LOOP => {
                let count = ranged!(args, 2, 1, u16::MAX as i32) as u16;
                let player = &self.players[index];
                let start = player.beat_to_tick(
                    ranged!(args, 3, 1, i32::MAX) as u32,
                    ranged!(args, 4, 0, i32::MAX) as u32,
                );
                let end = player.beat_to_tick(
                    ranged!(args, 5, 1, i32::MAX) as u32,
                    ranged!(args, 6, 0, i32::MAX) as u32,
                );
                if end <= start {
                    return FAIL;
                }
                self.players[index].loop_region = Some(LoopRegion { count, start, end });
            }
            CLEAR_LOOP => self.players[index].loop_region = None,
            HOOK => {
                let value = ranged!(args, 3, 0, 255) as u8;
                match arg!(args, 2) {
                    0 => self.players[index].hooks.jump = value,
                    1 => {
                        let channel = ranged!(args, 4, 0, 15) as usize;
                        self.players[index].hooks.part_onoff[channel] = value;
                    }
                    _ => return FAIL,
                }
            }
            FADE => {
                let target = ranged!(args, 2, 0, 127) as u8;
                let units = ranged!(args, 3, 0, i32::MAX) as u64;
                self.start_fade(index, target, units * 10_000);
            }
            GET_PARAM => {
                let player = &self.players[index];
                return match arg!(args, 2) {
                    0 => player.priority as i32,
                    1 => player.volume as i32,
                    2 => player.pan as i32,
                    3 => player.transpose as i32,
                    4 => player.detune as i32,
                    5 => player.speed as i32,
                    6 => player.beat().0 as i32,
                    7 => player.beat().1 as i32,
                    8 => player.loop_region.map_or(0, |region| region.count as i32),
                    _ => FAIL,
                };
            }
            _ => {
                debug!("imuse: unknown player command {command}");
                return FAIL;
            }
        }
        0
    }

    fn part_command(&mut self, command: u8, args: &[i32]) -> i32 {
        const ON_OFF: u8 = PartCommand::SetOnOff as u8;
        const VOLUME: u8 = PartCommand::SetVolume as u8;
        const PAN: u8 = PartCommand::SetPan as u8;
        const TRANSPOSE: u8 = PartCommand::SetTranspose as u8;
        const PRIORITY: u8 = PartCommand::SetPriority as u8;
        const PROGRAM: u8 = PartCommand::SetProgram as u8;

        let sound = ranged!(args, 1, 0, u16::MAX as i32) as u16;
        let channel = ranged!(args, 2, 0, 15) as u8;
        let value = arg!(args, 3);
        let Some(player) = self.find_player(sound) else {
            return FAIL;
        };
        let Some(index) = self.get_part(player, channel) else {
            return FAIL;
        };
        let levels = self.players[player].levels(self.music_volume);
        let driver = self.driver.as_mut();
        let part = &mut self.parts[index];

        match command {
            ON_OFF => {
                part.set_on(driver, value != 0);
                self.reallocate_midi_channels();
            }
            VOLUME => {
                let Some(volume) = in_range(value, 0, 127) else {
                    return FAIL;
                };
                part.set_volume(driver, volume as u8, &levels);
            }
            PAN => {
                let Some(pan) = in_range(value, -64, 63) else {
                    return FAIL;
                };
                part.set_pan(driver, pan as i8, &levels);
            }
            TRANSPOSE => {
                let Some(transpose) = in_range(value, -24, 24) else {
                    return FAIL;
                };
                part.all_notes_off(driver);
                part.set_transpose(transpose as i8, &levels);
            }
            PRIORITY => {
                let Some(priority) = in_range(value, -128, 127) else {
                    return FAIL;
                };
                part.set_priority(priority as i8, &levels);
                self.reallocate_midi_channels();
            }
            PROGRAM => {
                let Some(program) = in_range(value, 0, 127) else {
                    return FAIL;
                };
                part.set_program(driver, program as u8);
            }
            _ => {
                debug!("imuse: unknown part command {command}");
                return FAIL;
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imuse::sequence::build_smf;
    use crate::imuse::{IMuse, IMuseConfig, RecordingMidiDriver};

    fn started() -> IMuse {
        let imuse = IMuse::new(Box::new(RecordingMidiDriver::new(4)), IMuseConfig::default());
        let data = build_smf(4, Some(60), &[(0, vec![0x90, 60, 100]), (64, vec![0x80, 60, 0])]);
        imuse.register_sound(3, &data).unwrap();
        assert!(imuse.start_sound(3));
        imuse
    }

    fn player(command: PlayerCommand) -> i32 {
        command_word(CommandClass::Player, command as u8)
    }

    #[test]
    fn player_parameters_round_trip_through_get_param() {
        let imuse = started();
        assert_eq!(imuse.do_command(&[player(PlayerCommand::SetVolume), 3, 90]), 0);
        assert_eq!(imuse.do_command(&[player(PlayerCommand::SetVolume), 3, 300]), -1);
        assert_eq!(imuse.do_command(&[player(PlayerCommand::GetParam), 3, 1]), 90);
        assert_eq!(imuse.do_command(&[player(PlayerCommand::GetParam), 3, 0]), 60);
        assert_eq!(imuse.do_command(&[player(PlayerCommand::GetParam), 4, 0]), -1);
        assert_eq!(
            imuse.do_command(&[player(PlayerCommand::SetLoop), 3, 2, 2, 0, 1, 0]),
            -1
        );
        assert_eq!(
            imuse.do_command(&[player(PlayerCommand::SetLoop), 3, 2, 1, 0, 3, 0]),
            0
        );
        assert_eq!(imuse.do_command(&[player(PlayerCommand::GetParam), 3, 8]), 2);
    }

    #[test]
    fn fade_to_zero_stops_the_sound() {
        let imuse = started();
        assert_eq!(imuse.do_command(&[player(PlayerCommand::FadeVolume), 3, 0, 5]), 0);
        imuse.on_timer(20_000);
        assert!(imuse.get_sound_status(3));
        imuse.on_timer(40_000);
        assert!(!imuse.get_sound_status(3));
    }

    #[test]
    fn deferred_command_fires_after_its_delay() {
        let imuse = started();
        let stop = command_word(CommandClass::Global, GlobalCommand::StopSound as u8);
        let defer = command_word(CommandClass::Global, GlobalCommand::Defer as u8);
        assert_eq!(imuse.do_command(&[defer, 3, stop, 3]), 0);
        imuse.on_timer(20_000);
        assert!(imuse.get_sound_status(3));
        imuse.on_timer(10_000);
        assert!(!imuse.get_sound_status(3));
    }

    #[test]
    fn global_volume_and_unknown_classes() {
        let imuse = started();
        let set = command_word(CommandClass::Global, GlobalCommand::SetMusicVolume as u8);
        let get = command_word(CommandClass::Global, GlobalCommand::GetMusicVolume as u8);
        assert_eq!(imuse.do_command(&[set, 100]), 0);
        assert_eq!(imuse.do_command(&[get]), 100);
        assert_eq!(imuse.do_command(&[0x0700]), -1);
        assert_eq!(imuse.do_command(&[]), -1);
    }
}

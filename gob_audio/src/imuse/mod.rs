//! Priority-driven MIDI sequencer. Sounds are Standard MIDI Files held in a
//! bank; each started sound takes a player from a fixed pool, and each of
//! its channels takes a part. Melodic parts compete for the driver's
//! channels by effective priority.

mod commands;
pub mod driver;
pub mod part;
pub mod player;
pub mod sequence;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::Result;
pub use commands::{CommandClass, GlobalCommand, PartCommand, PlayerCommand, command_word};
pub use driver::{DriverEvent, MidiDriver, RecordingMidiDriver};
use part::Part;
use player::{Fade, Player, Step};
pub use sequence::{MidiEvent, MidiSequence};

/// Manufacturer byte of the sequencer's own sysex messages.
const SYSEX_ID: u8 = 0x7D;
const SYSEX_JUMP_HOOK: u8 = 0x30;
const SYSEX_PART_HOOK: u8 = 0x32;
const SYSEX_MARKER: u8 = 0x40;
/// Guards against triggers that keep re-queueing each other.
const MAX_QUEUED_PER_TICK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IMuseConfig {
    pub players: usize,
    pub parts: usize,
    pub music_volume: u8,
}

impl Default for IMuseConfig {
    fn default() -> Self {
        IMuseConfig {
            players: 8,
            parts: 32,
            music_volume: 255,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Trigger {
    sound: u16,
    marker: u8,
    command: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Deferred {
    remaining_us: u64,
    command: Vec<i32>,
}

/// Handle shared by the game thread and the timer. Every entry point takes
/// the one lock for its whole duration.
#[derive(Clone)]
pub struct IMuse {
    inner: Arc<Mutex<IMuseInner>>,
}

impl IMuse {
    pub fn new(driver: Box<dyn MidiDriver>, config: IMuseConfig) -> Self {
        IMuse {
            inner: Arc::new(Mutex::new(IMuseInner::new(driver, config))),
        }
    }

    pub fn register_sound(&self, sound: u16, data: &[u8]) -> Result<()> {
        let sequence = MidiSequence::parse(data)?;
        self.inner.lock().bank.insert(sound, Arc::new(sequence));
        Ok(())
    }

    /// False when the sound is unknown, already playing, or no player
    /// could be had at its priority.
    pub fn start_sound(&self, sound: u16) -> bool {
        self.inner.lock().start_sound(sound)
    }

    pub fn stop_sound(&self, sound: u16) -> bool {
        self.inner.lock().stop_sound(sound)
    }

    pub fn stop_all_sounds(&self) {
        self.inner.lock().stop_all_sounds();
    }

    pub fn get_sound_status(&self, sound: u16) -> bool {
        self.inner.lock().find_player(sound).is_some()
    }

    pub fn do_command(&self, args: &[i32]) -> i32 {
        self.inner.lock().do_command(args)
    }

    pub fn set_music_volume(&self, volume: u8) {
        self.inner.lock().set_music_volume(volume);
    }

    pub fn music_volume(&self) -> u8 {
        self.inner.lock().music_volume
    }

    pub fn clear_queue(&self) {
        self.inner.lock().clear_queue();
    }

    /// Sounds with an active player, in player-slot order.
    pub fn playing_sounds(&self) -> Vec<u16> {
        self.inner
            .lock()
            .players
            .iter()
            .filter(|player| player.active)
            .map(|player| player.sound)
            .collect()
    }

    pub fn on_timer(&self, micros: u64) {
        self.inner.lock().on_timer(micros);
    }
}

pub(crate) struct IMuseInner {
    driver: Box<dyn MidiDriver>,
    bank: HashMap<u16, Arc<MidiSequence>>,
    players: Vec<Player>,
    parts: Vec<Part>,
    music_volume: u8,
    recycle_players: bool,
    triggers: Vec<Trigger>,
    queue: VecDeque<Vec<i32>>,
    deferred: Vec<Deferred>,
}

impl IMuseInner {
    fn new(driver: Box<dyn MidiDriver>, config: IMuseConfig) -> Self {
        IMuseInner {
            driver,
            bank: HashMap::new(),
            players: vec![Player::idle(); config.players.max(1)],
            parts: vec![Part::empty(); config.parts.max(1)],
            music_volume: config.music_volume,
            recycle_players: false,
            triggers: Vec::new(),
            queue: VecDeque::new(),
            deferred: Vec::new(),
        }
    }

    fn find_player(&self, sound: u16) -> Option<usize> {
        self.players
            .iter()
            .position(|player| player.active && player.sound == sound)
    }

    /// A free player, or the lowest-priority one if the requester outranks
    /// it (or recycling is on). Ties go to the lowest slot.
    fn allocate_player(&mut self, priority: u8) -> Option<usize> {
        if let Some(free) = self.players.iter().position(|player| !player.active) {
            return Some(free);
        }
        let (victim, lowest) = self
            .players
            .iter()
            .enumerate()
            .min_by_key(|(index, player)| (player.priority, *index))
            .map(|(index, player)| (index, player.priority))?;
        if lowest < priority || self.recycle_players {
            debug!(
                "imuse: evicting sound {} (priority {lowest}) for priority {priority}",
                self.players[victim].sound
            );
            self.stop_player(victim);
            Some(victim)
        } else {
            None
        }
    }

    fn start_sound(&mut self, sound: u16) -> bool {
        let Some(sequence) = self.bank.get(&sound).cloned() else {
            warn!("imuse: sound {sound} is not registered");
            return false;
        };
        if self.find_player(sound).is_some() {
            return false;
        }
        let Some(index) = self.allocate_player(sequence.priority) else {
            debug!(
                "imuse: no player for sound {sound} at priority {}",
                sequence.priority
            );
            return false;
        };
        self.players[index].start(sound, sequence);
        true
    }

    fn stop_player(&mut self, index: usize) {
        for part in self.parts.iter_mut() {
            if part.player == Some(index) {
                part.uninit(self.driver.as_mut());
            }
        }
        let sound = self.players[index].sound;
        self.players[index].clear();
        self.triggers.retain(|trigger| trigger.sound != sound);
        self.reallocate_midi_channels();
    }

    fn stop_sound(&mut self, sound: u16) -> bool {
        match self.find_player(sound) {
            Some(index) => {
                self.stop_player(index);
                true
            }
            None => false,
        }
    }

    fn stop_all_sounds(&mut self) {
        for index in 0..self.players.len() {
            if self.players[index].active {
                self.stop_player(index);
            }
        }
    }

    fn clear_queue(&mut self) {
        self.queue.clear();
        self.deferred.clear();
        self.triggers.clear();
    }

    fn set_music_volume(&mut self, volume: u8) {
        self.music_volume = volume;
        for index in 0..self.players.len() {
            if self.players[index].active {
                self.refresh_player(index);
            }
        }
    }

    /// Recomputes every part of the player and resends what changed.
    fn refresh_player(&mut self, index: usize) {
        let levels = self.players[index].levels(self.music_volume);
        for part in self.parts.iter_mut() {
            if part.player == Some(index) {
                part.apply_levels(&levels);
                part.send_levels(self.driver.as_mut());
            }
        }
        self.reallocate_midi_channels();
    }

    fn find_part(&self, player: usize, channel: u8) -> Option<usize> {
        self.parts
            .iter()
            .position(|part| part.player == Some(player) && part.channel == channel)
    }

    /// The player's part for `channel`, allocating one if needed.
    fn get_part(&mut self, player: usize, channel: u8) -> Option<usize> {
        if let Some(index) = self.find_part(player, channel) {
            return Some(index);
        }
        let levels = self.players[player].levels(self.music_volume);
        let index = self.allocate_part(levels.priority)?;
        self.parts[index].assign(player, channel, &levels);
        self.reallocate_midi_channels();
        Some(index)
    }

    fn allocate_part(&mut self, priority: u8) -> Option<usize> {
        if let Some(free) = self.parts.iter().position(Part::is_free) {
            return Some(free);
        }
        let (victim, lowest) = self
            .parts
            .iter()
            .enumerate()
            .min_by_key(|(index, part)| (part.priority_eff(), *index))
            .map(|(index, part)| (index, part.priority_eff()))?;
        if lowest < priority {
            self.parts[victim].uninit(self.driver.as_mut());
            Some(victim)
        } else {
            None
        }
    }

    /// Hands driver channels to waiting parts, highest effective priority
    /// first, taking a channel from a strictly lower-priority part when the
    /// driver has none left.
    fn reallocate_midi_channels(&mut self) {
        loop {
            let Some(best) = self
                .parts
                .iter()
                .enumerate()
                .filter(|(_, part)| part.needs_channel())
                .max_by_key(|(index, part)| (part.priority_eff(), std::cmp::Reverse(*index)))
                .map(|(index, _)| index)
            else {
                return;
            };

            let channel = match self.driver.allocate_channel() {
                Some(channel) => channel,
                None => {
                    let wanted = self.parts[best].priority_eff();
                    let Some(victim) = self
                        .parts
                        .iter()
                        .enumerate()
                        .filter(|(_, part)| part.hardware.is_some())
                        .min_by_key(|(index, part)| (part.priority_eff(), *index))
                        .map(|(index, _)| index)
                    else {
                        return;
                    };
                    if self.parts[victim].priority_eff() >= wanted {
                        return;
                    }
                    self.parts[victim].off(self.driver.as_mut());
                    match self.driver.allocate_channel() {
                        Some(channel) => channel,
                        None => return,
                    }
                }
            };
            self.parts[best].hardware = Some(channel);
            self.parts[best].send_all(self.driver.as_mut());
        }
    }

    fn on_timer(&mut self, micros: u64) {
        let mut due = Vec::new();
        self.deferred.retain_mut(|deferred| {
            if deferred.remaining_us <= micros {
                due.push(std::mem::take(&mut deferred.command));
                false
            } else {
                deferred.remaining_us -= micros;
                true
            }
        });
        self.queue.extend(due);

        for index in 0..self.players.len() {
            if self.players[index].active {
                self.run_fade(index, micros);
            }
            if self.players[index].active {
                self.run_player(index, micros);
            }
        }
        self.run_queue();
    }

    fn run_fade(&mut self, index: usize, micros: u64) {
        let Some(mut fade) = self.players[index].fade else {
            return;
        };
        let volume = fade.step(micros);
        self.players[index].fade = if fade.is_done() { None } else { Some(fade) };
        self.players[index].volume = volume;
        if fade.is_done() && fade.target() == 0 {
            self.stop_player(index);
        } else {
            self.refresh_player(index);
        }
    }

    pub(crate) fn start_fade(&mut self, index: usize, target: u8, duration_us: u64) {
        let player = &mut self.players[index];
        if duration_us == 0 {
            player.fade = None;
            player.volume = target;
            if target == 0 {
                self.stop_player(index);
            } else {
                self.refresh_player(index);
            }
        } else {
            player.fade = Some(Fade::new(player.volume, target, duration_us));
        }
    }

    fn run_player(&mut self, index: usize, micros: u64) {
        self.players[index].advance_clock(micros);
        loop {
            if !self.players[index].active {
                return;
            }
            match self.players[index].next_step() {
                Step::Idle => return,
                Step::Looped => self.silence_player(index),
                Step::Event(MidiEvent::EndOfTrack) => {
                    debug!("imuse: sound {} finished", self.players[index].sound);
                    self.stop_player(index);
                    return;
                }
                Step::Event(event) => self.handle_event(index, event),
            }
        }
    }

    fn silence_player(&mut self, index: usize) {
        for part in self.parts.iter() {
            if part.player == Some(index) {
                part.all_notes_off(self.driver.as_mut());
            }
        }
    }

    fn handle_event(&mut self, player: usize, event: MidiEvent) {
        match event {
            MidiEvent::Channel {
                status,
                data1,
                data2,
            } => self.handle_channel(player, status, data1, data2),
            MidiEvent::SysEx(data) => self.handle_sysex(player, &data),
            MidiEvent::Tempo(tempo) => self.players[player].set_tempo(tempo),
            MidiEvent::Marker(text) => {
                if let Some(&id) = text.first() {
                    self.fire_marker(player, id);
                }
            }
            MidiEvent::EndOfTrack => {}
        }
    }

    fn handle_channel(&mut self, player: usize, status: u8, data1: u8, data2: u8) {
        let channel = status & 0x0F;
        let kind = status & 0xF0;
        let index = if kind == 0x80 || (kind == 0x90 && data2 == 0) {
            // Note-offs never allocate a part.
            match self.find_part(player, channel) {
                Some(index) => index,
                None => return,
            }
        } else {
            match self.get_part(player, channel) {
                Some(index) => index,
                None => return,
            }
        };
        let levels = self.players[player].levels(self.music_volume);
        let driver = self.driver.as_mut();
        let part = &mut self.parts[index];
        match kind {
            0x80 => part.note_off(driver, data1),
            0x90 if data2 == 0 => part.note_off(driver, data1),
            0x90 => part.note_on(driver, data1, data2),
            0xB0 => part.control_change(driver, data1, data2, &levels),
            0xC0 => part.set_program(driver, data1),
            0xE0 => {
                let bend = ((data2 as i16) << 7 | data1 as i16) - 8192;
                part.set_pitch_bend(driver, bend);
            }
            _ => part.raw(driver, status, data1, data2),
        }
    }

    fn handle_sysex(&mut self, player: usize, data: &[u8]) {
        let [SYSEX_ID, code, rest @ ..] = data else {
            self.driver.sysex(data);
            return;
        };
        match (*code, rest) {
            (SYSEX_JUMP_HOOK, [hook, beat, tick, ..]) => {
                let current = self.players[player].hooks.jump;
                if current != 0 && current == *hook {
                    self.players[player].hooks.jump = 0;
                    let target = self.players[player].beat_to_tick(*beat as u32, *tick as u32);
                    self.silence_player(player);
                    self.players[player].jump(target);
                }
            }
            (SYSEX_PART_HOOK, [channel, hook, on, ..]) => {
                let channel = (*channel & 0x0F) as usize;
                let current = self.players[player].hooks.part_onoff[channel];
                if current != 0 && current == *hook {
                    self.players[player].hooks.part_onoff[channel] = 0;
                    if let Some(index) = self.find_part(player, channel as u8) {
                        self.parts[index].set_on(self.driver.as_mut(), *on != 0);
                        self.reallocate_midi_channels();
                    }
                }
            }
            (SYSEX_MARKER, [id, ..]) => self.fire_marker(player, *id),
            _ => warn!("imuse: unknown sysex code {code:#04x}"),
        }
    }

    fn fire_marker(&mut self, player: usize, marker: u8) {
        let sound = self.players[player].sound;
        let mut fired = Vec::new();
        self.triggers.retain(|trigger| {
            if trigger.sound == sound && trigger.marker == marker {
                fired.push(trigger.command.clone());
                false
            } else {
                true
            }
        });
        self.queue.extend(fired);
    }

    fn run_queue(&mut self) {
        let mut budget = MAX_QUEUED_PER_TICK;
        while let Some(command) = self.queue.pop_front() {
            if budget == 0 {
                warn!("imuse: dropping {} queued commands", self.queue.len() + 1);
                self.queue.clear();
                return;
            }
            budget -= 1;
            self.do_command(&command);
        }
    }
}

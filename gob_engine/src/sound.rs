use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Context, Result};
use gob_audio::mixer::MAX_VOLUME;
use gob_audio::{
    AdLibPlayer, AudioStream, Mixer, OplEmulator, REPEAT_FOREVER, SampleStream, SharedStream,
    SoundHandle, SoundKind, Speaker,
};
use gob_formats::sample::split_sample;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;

/// Compositions hold at most this many slot indices.
pub const COMPOSITION_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundSource {
    Program,
    External,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Sample,
    Adlib,
}

#[derive(Debug, Clone)]
pub struct SoundSlot {
    pub kind: SlotKind,
    pub source: SoundSource,
    pub frequency: u16,
    pub size: usize,
    pcm: Arc<[i8]>,
    raw: Arc<[u8]>,
}

impl SoundSlot {
    pub fn pcm(&self) -> &[i8] {
        &self.pcm
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioEvent {
    Load {
        slot: usize,
        source: SoundSource,
        sound: SlotKind,
        size: usize,
        frequency: u16,
    },
    Free {
        slot: usize,
    },
    Play {
        slot: usize,
        repeat: i32,
        frequency: u16,
    },
    Stop {
        fade_ms: u32,
    },
    Composition {
        slots: Vec<usize>,
    },
    SpeakerOn {
        frequency: u32,
    },
    SpeakerOff,
    AdlibPlay {
        slot: usize,
        repeat: i32,
    },
    AdlibStop,
}

type SharedAdLib = Arc<Mutex<AdLibPlayer<OplEmulator>>>;

/// Sound slots and the channels the script drives: one sample ("blaster")
/// voice, one AdLib track and the PC speaker, all mixed through one mixer.
pub struct SoundSystem {
    slots: Vec<Option<SoundSlot>>,
    mixer: Mixer,
    blaster: Option<(SoundHandle, Arc<Mutex<SampleStream>>)>,
    adlib: Option<(SoundHandle, SharedAdLib)>,
    speaker: Option<Arc<Mutex<Speaker>>>,
    composition: VecDeque<usize>,
    composition_freq: i16,
    events: Vec<AudioEvent>,
    scratch: Vec<i16>,
    pending_ms: u32,
}

impl SoundSystem {
    pub fn new(slot_count: usize, output_rate: u32) -> Self {
        SoundSystem {
            slots: vec![None; slot_count],
            mixer: Mixer::new(output_rate),
            blaster: None,
            adlib: None,
            speaker: None,
            composition: VecDeque::new(),
            composition_freq: 0,
            events: Vec::new(),
            scratch: Vec::new(),
            pending_ms: 0,
        }
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&SoundSlot> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn events(&self) -> &[AudioEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<AudioEvent> {
        std::mem::take(&mut self.events)
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Option<SoundSlot>> {
        let count = self.slots.len();
        self.slots
            .get_mut(index)
            .with_context(|| format!("sound slot {index} out of range ({count} slots)"))
    }

    /// Stores a 6-byte-header PCM sample in `index`.
    pub fn load_sample(&mut self, index: usize, data: &[u8], source: SoundSource) -> Result<()> {
        let (header, pcm) = split_sample(data).with_context(|| format!("sound for slot {index}"))?;
        let pcm: Arc<[i8]> = pcm.iter().map(|&b| b as i8).collect();
        let slot = SoundSlot {
            kind: SlotKind::Sample,
            source,
            frequency: header.frequency,
            size: pcm.len(),
            pcm,
            raw: Arc::from(Vec::new()),
        };
        self.install(index, slot)
    }

    /// Stores an AdLib track in `index`; it is parsed when played.
    pub fn load_adlib(&mut self, index: usize, data: &[u8], source: SoundSource) -> Result<()> {
        let slot = SoundSlot {
            kind: SlotKind::Adlib,
            source,
            frequency: 0,
            size: data.len(),
            pcm: Arc::from(Vec::new()),
            raw: Arc::from(data.to_vec()),
        };
        self.install(index, slot)
    }

    fn install(&mut self, index: usize, slot: SoundSlot) -> Result<()> {
        let event = AudioEvent::Load {
            slot: index,
            source: slot.source,
            sound: slot.kind,
            size: slot.size,
            frequency: slot.frequency,
        };
        *self.slot_mut(index)? = Some(slot);
        debug!("sound slot {index} loaded");
        self.events.push(event);
        Ok(())
    }

    pub fn free(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.take().is_some() {
                self.events.push(AudioEvent::Free { slot: index });
            }
        }
    }

    /// Stops everything and empties every slot.
    pub fn free_all(&mut self) {
        self.stop(0);
        self.adlib_stop();
        self.speaker_off();
        for index in 0..self.slots.len() {
            self.free(index);
        }
    }

    fn frames_for_ms(&self, ms: u32) -> usize {
        (self.mixer.output_rate() as u64 * ms as u64 / 1000) as usize
    }

    /// Plays a sample slot. `rep_count` counts total plays; zero or less
    /// loops. `frequency <= 0` keeps the slot's own rate.
    pub fn play(&mut self, index: usize, rep_count: i16, frequency: i16) -> bool {
        let Some(slot) = self.slot(index).cloned() else {
            warn!("playSound: slot {index} is empty");
            return false;
        };
        if slot.kind != SlotKind::Sample {
            warn!("playSound: slot {index} does not hold a sample");
            return false;
        }
        self.stop(0);
        let repeat = if rep_count <= 0 {
            REPEAT_FOREVER
        } else {
            rep_count as i32 - 1
        };
        let rate = if frequency > 0 {
            frequency as u16
        } else {
            slot.frequency
        };
        let stream = Arc::new(Mutex::new(SampleStream::new(
            Arc::clone(&slot.pcm),
            rate as u32,
            self.mixer.output_rate(),
            repeat,
        )));
        match self.mixer.play_stream(
            SoundKind::Sfx,
            Box::new(SharedStream::new(Arc::clone(&stream))),
            MAX_VOLUME,
        ) {
            Ok(handle) => {
                self.blaster = Some((handle, stream));
                self.events.push(AudioEvent::Play {
                    slot: index,
                    repeat,
                    frequency: rate,
                });
                true
            }
            Err(err) => {
                warn!("playSound: {err}");
                false
            }
        }
    }

    /// Ends the sample voice, fading over `fade_ms` when nonzero.
    pub fn stop(&mut self, fade_ms: u32) {
        self.composition.clear();
        let Some((handle, stream)) = self.blaster.take() else {
            return;
        };
        if fade_ms == 0 {
            self.mixer.stop_handle(handle);
        } else {
            let samples = self.frames_for_ms(fade_ms) as u32;
            stream.lock().fade_out(samples);
        }
        self.events.push(AudioEvent::Stop { fade_ms });
    }

    pub fn is_playing(&self) -> bool {
        self.blaster
            .as_ref()
            .is_some_and(|(handle, _)| self.mixer.is_playing(*handle))
            || !self.composition.is_empty()
    }

    /// Queues `slots` (up to the first negative entry) to play back to back.
    pub fn play_composition(&mut self, slots: &[i16], frequency: i16) {
        self.stop(0);
        let queue: Vec<usize> = slots
            .iter()
            .take(COMPOSITION_LEN)
            .take_while(|&&slot| slot >= 0)
            .map(|&slot| slot as usize)
            .collect();
        self.events.push(AudioEvent::Composition {
            slots: queue.clone(),
        });
        self.composition = queue.into();
        self.composition_freq = frequency;
        self.next_in_composition();
    }

    fn next_in_composition(&mut self) {
        while let Some(index) = self.composition.pop_front() {
            let rest = std::mem::take(&mut self.composition);
            let started = self.play(index, 1, self.composition_freq);
            self.composition = rest;
            if started {
                return;
            }
        }
    }

    pub fn speaker_on(&mut self, frequency: u32) {
        let speaker = match &self.speaker {
            Some(speaker) => Arc::clone(speaker),
            None => {
                let speaker = Arc::new(Mutex::new(Speaker::new(self.mixer.output_rate())));
                if let Err(err) = self.mixer.play_stream(
                    SoundKind::Sfx,
                    Box::new(SharedStream::new(Arc::clone(&speaker))),
                    MAX_VOLUME,
                ) {
                    warn!("speaker: {err}");
                    return;
                }
                self.speaker = Some(Arc::clone(&speaker));
                speaker
            }
        };
        speaker.lock().start(frequency);
        self.events.push(AudioEvent::SpeakerOn { frequency });
    }

    pub fn speaker_off(&mut self) {
        if let Some(speaker) = &self.speaker {
            if speaker.lock().frequency().is_some() {
                speaker.lock().stop();
                self.events.push(AudioEvent::SpeakerOff);
            }
        }
    }

    pub fn speaker_frequency(&self) -> Option<u32> {
        self.speaker.as_ref().and_then(|speaker| speaker.lock().frequency())
    }

    /// Starts the AdLib track in slot `index`. `repeat` follows the
    /// sequencer convention (-1 forever, N extra passes).
    pub fn adlib_play(&mut self, index: usize, repeat: i32) -> bool {
        let Some(slot) = self.slot(index).cloned() else {
            warn!("playAdlib: slot {index} is empty");
            return false;
        };
        if slot.kind != SlotKind::Adlib {
            warn!("playAdlib: slot {index} does not hold an AdLib track");
            return false;
        }
        self.adlib_stop();
        let rate = self.mixer.output_rate();
        let mut player = AdLibPlayer::new(OplEmulator::new(rate), rate);
        if let Err(err) = player.load(&slot.raw) {
            warn!("playAdlib: slot {index}: {err}");
            return false;
        }
        player.set_repeating(repeat);
        player.start_play();
        let player = Arc::new(Mutex::new(player));
        match self.mixer.play_stream(
            SoundKind::Music,
            Box::new(SharedStream::new(Arc::clone(&player))),
            MAX_VOLUME,
        ) {
            Ok(handle) => {
                self.adlib = Some((handle, player));
                self.events.push(AudioEvent::AdlibPlay { slot: index, repeat });
                true
            }
            Err(err) => {
                warn!("playAdlib: {err}");
                false
            }
        }
    }

    pub fn adlib_stop(&mut self) {
        if let Some((handle, player)) = self.adlib.take() {
            player.lock().stop_play();
            self.mixer.stop_handle(handle);
            self.events.push(AudioEvent::AdlibStop);
        }
    }

    pub fn adlib_playing(&self) -> bool {
        self.adlib
            .as_ref()
            .is_some_and(|(handle, player)| self.mixer.is_playing(*handle) && !player.lock().end_of_data())
    }

    /// Advances the mix by `ms` of virtual time and moves compositions on
    /// to their next entry.
    pub fn pump(&mut self, ms: u32) {
        self.pending_ms += ms;
        let frames = self.frames_for_ms(self.pending_ms);
        if frames == 0 {
            return;
        }
        self.pending_ms = 0;
        self.scratch.resize(frames * 2, 0);
        self.mixer.mix(&mut self.scratch);

        let blaster_done = self
            .blaster
            .as_ref()
            .is_some_and(|(handle, _)| !self.mixer.is_playing(*handle));
        if blaster_done {
            self.blaster = None;
            self.next_in_composition();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(frequency: u16, pcm: &[u8]) -> Vec<u8> {
        let size = pcm.len() as u32;
        let mut data = vec![0, (size >> 16) as u8, (size >> 8) as u8, size as u8];
        data.extend_from_slice(&frequency.to_be_bytes());
        data.extend_from_slice(pcm);
        data
    }

    #[test]
    fn samples_play_to_completion_in_virtual_time() {
        let mut sound = SoundSystem::new(4, 8000);
        sound
            .load_sample(1, &sample(8000, &[10; 80]), SoundSource::File)
            .unwrap();
        assert_eq!(sound.slot(1).map(|s| (s.size, s.frequency)), Some((80, 8000)));

        assert!(sound.play(1, 1, 0));
        assert!(sound.is_playing());
        sound.pump(5);
        assert!(sound.is_playing());
        sound.pump(20);
        assert!(!sound.is_playing());
    }

    #[test]
    fn compositions_advance_slot_by_slot() {
        let mut sound = SoundSystem::new(4, 8000);
        sound.load_sample(0, &sample(8000, &[1; 40]), SoundSource::File).unwrap();
        sound.load_sample(2, &sample(8000, &[2; 40]), SoundSource::File).unwrap();
        sound.play_composition(&[0, 3, 2, -1, 0], 0);
        sound.pump(6);
        sound.pump(6);
        sound.pump(6);
        let played: Vec<usize> = sound
            .events()
            .iter()
            .filter_map(|e| match e {
                AudioEvent::Play { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(played, vec![0, 2]);
        assert!(!sound.is_playing());
    }

    #[test]
    fn missing_slots_are_not_fatal() {
        let mut sound = SoundSystem::new(2, 8000);
        assert!(!sound.play(1, 1, 0));
        assert!(sound.load_sample(7, &sample(8000, &[0; 4]), SoundSource::File).is_err());
        sound.speaker_on(440);
        assert_eq!(sound.speaker_frequency(), Some(440));
        sound.speaker_off();
        assert_eq!(sound.speaker_frequency(), None);
    }
}

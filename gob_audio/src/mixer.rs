use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{AudioError, Result};
use crate::stream::AudioStream;

pub const MAX_VOLUME: u8 = 255;
const UNITY: i32 = MAX_VOLUME as i32 * MAX_VOLUME as i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundKind {
    Music,
    Sfx,
    Speech,
}

impl SoundKind {
    fn index(self) -> usize {
        match self {
            SoundKind::Music => 0,
            SoundKind::Sfx => 1,
            SoundKind::Speech => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SoundHandle(u32);

struct Channel {
    handle: SoundHandle,
    kind: SoundKind,
    volume: u8,
    stream: Box<dyn AudioStream>,
}

struct MixerState {
    channels: Vec<Channel>,
    next_handle: u32,
    kind_volume: [u8; 3],
    scratch: Vec<i16>,
    accum: Vec<i32>,
}

/// Sums every playing stream into one interleaved stereo buffer.
///
/// Cloning yields another handle onto the same channel table, so the game
/// thread can start and stop sounds while the audio callback mixes.
#[derive(Clone)]
pub struct Mixer {
    state: Arc<Mutex<MixerState>>,
    output_rate: u32,
}

impl Mixer {
    pub fn new(output_rate: u32) -> Self {
        Mixer {
            state: Arc::new(Mutex::new(MixerState {
                channels: Vec::new(),
                next_handle: 1,
                kind_volume: [MAX_VOLUME; 3],
                scratch: Vec::new(),
                accum: Vec::new(),
            })),
            output_rate,
        }
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn play_stream(
        &self,
        kind: SoundKind,
        stream: Box<dyn AudioStream>,
        volume: u8,
    ) -> Result<SoundHandle> {
        if stream.rate() != self.output_rate {
            return Err(AudioError::RateMismatch {
                stream: stream.rate(),
                output: self.output_rate,
            });
        }
        let mut state = self.state.lock();
        let handle = SoundHandle(state.next_handle);
        state.next_handle = state.next_handle.wrapping_add(1).max(1);
        debug!("mixer: start {:?} as {:?}", kind, handle);
        state.channels.push(Channel {
            handle,
            kind,
            volume,
            stream,
        });
        Ok(handle)
    }

    pub fn stop_handle(&self, handle: SoundHandle) {
        self.state.lock().channels.retain(|ch| ch.handle != handle);
    }

    pub fn stop_all(&self) {
        self.state.lock().channels.clear();
    }

    pub fn is_playing(&self, handle: SoundHandle) -> bool {
        self.state.lock().channels.iter().any(|ch| ch.handle == handle)
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    pub fn set_channel_volume(&self, handle: SoundHandle, volume: u8) {
        let mut state = self.state.lock();
        if let Some(ch) = state.channels.iter_mut().find(|ch| ch.handle == handle) {
            ch.volume = volume;
        }
    }

    pub fn set_volume_for_kind(&self, kind: SoundKind, volume: u8) {
        self.state.lock().kind_volume[kind.index()] = volume;
    }

    /// Mixes `out.len() / 2` stereo frames. Channels whose stream reports
    /// end of data are dropped afterwards.
    pub fn mix(&self, out: &mut [i16]) -> usize {
        let frames = out.len() / 2;
        let mut guard = self.state.lock();
        let MixerState {
            channels,
            kind_volume,
            scratch,
            accum,
            ..
        } = &mut *guard;

        accum.clear();
        accum.resize(frames * 2, 0);

        channels.retain_mut(|ch| {
            let stereo = ch.stream.is_stereo();
            let needed = if stereo { frames * 2 } else { frames };
            scratch.clear();
            scratch.resize(needed, 0);
            ch.stream.read_buffer(&mut scratch[..needed]);

            let gain = ch.volume as i32 * kind_volume[ch.kind.index()] as i32;
            for frame in 0..frames {
                let (left, right) = if stereo {
                    (scratch[frame * 2], scratch[frame * 2 + 1])
                } else {
                    (scratch[frame], scratch[frame])
                };
                accum[frame * 2] += left as i32 * gain / UNITY;
                accum[frame * 2 + 1] += right as i32 * gain / UNITY;
            }

            let finished = ch.stream.end_of_data();
            if finished {
                debug!("mixer: {:?} finished", ch.handle);
            }
            !finished
        });

        for (dst, &src) in out.iter_mut().zip(accum.iter()) {
            *dst = src.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant {
        value: i16,
        remaining: usize,
    }

    impl AudioStream for Constant {
        fn read_buffer(&mut self, buffer: &mut [i16]) -> usize {
            let count = buffer.len().min(self.remaining);
            buffer[..count].fill(self.value);
            self.remaining -= count;
            count
        }

        fn is_stereo(&self) -> bool {
            false
        }

        fn rate(&self) -> u32 {
            8000
        }

        fn end_of_data(&self) -> bool {
            self.remaining == 0
        }
    }

    #[test]
    fn sums_channels_and_drops_finished_streams() {
        let mixer = Mixer::new(8000);
        let long = mixer
            .play_stream(
                SoundKind::Sfx,
                Box::new(Constant {
                    value: 1000,
                    remaining: 100,
                }),
                MAX_VOLUME,
            )
            .unwrap();
        let short = mixer
            .play_stream(
                SoundKind::Music,
                Box::new(Constant {
                    value: 500,
                    remaining: 2,
                }),
                MAX_VOLUME,
            )
            .unwrap();

        let mut out = [0i16; 8];
        assert_eq!(mixer.mix(&mut out), 4);
        assert_eq!(&out[..4], &[1500, 1500, 1500, 1500]);
        assert_eq!(&out[4..], &[1000, 1000, 1000, 1000]);
        assert!(mixer.is_playing(long));
        assert!(!mixer.is_playing(short));
    }

    #[test]
    fn kind_volume_scales_output() {
        let mixer = Mixer::new(8000);
        mixer
            .play_stream(
                SoundKind::Music,
                Box::new(Constant {
                    value: 1000,
                    remaining: 10,
                }),
                MAX_VOLUME,
            )
            .unwrap();
        mixer.set_volume_for_kind(SoundKind::Music, 0);
        let mut out = [7i16; 4];
        mixer.mix(&mut out);
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn rejects_streams_at_another_rate() {
        let mixer = Mixer::new(22050);
        let err = mixer
            .play_stream(
                SoundKind::Sfx,
                Box::new(Constant {
                    value: 0,
                    remaining: 1,
                }),
                MAX_VOLUME,
            )
            .unwrap_err();
        assert!(matches!(err, AudioError::RateMismatch { .. }));
    }
}

//! Mult timeline blobs: the key arrays driving the animation sequencer.

use anyhow::{Context, Result, ensure};

use crate::reader::ByteReader;

pub const ANIM_TRACKS: usize = 4;
pub const FADE_PALETTES: usize = 5;
pub const FADE_PALETTE_COLORS: usize = 16;
pub const PAL_CHANNELS: usize = 4;
pub const PAL_CHASE_LEN: usize = 16;
const INDEX_NAME_LEN: usize = 14;
const SND_KEY_RESERVED: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticKey {
    pub frame: i16,
    pub layer: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimKey {
    pub frame: i16,
    /// `-1` hides the object.
    pub layer: i16,
    pub pos_x: i16,
    pub pos_y: i16,
    pub order: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PalFadeKey {
    pub frame: i16,
    pub fade: i16,
    pub pal_index: i16,
    pub flag: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PalKey {
    pub frame: i16,
    pub cmd: i16,
    pub rates: [i16; PAL_CHANNELS],
    pub unknown: [i16; 2],
    /// Chase pattern, `subst[step][channel]`; entries are 1-based palette
    /// indices and `0` ends a channel's chase.
    pub subst: [[u8; PAL_CHANNELS]; PAL_CHASE_LEN],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextCommand {
    Show,
    Clear,
    /// Stops playback, keeping object buffers alive for a later resume.
    StopKeep,
    Other(i16),
}

impl From<i16> for TextCommand {
    fn from(value: i16) -> Self {
        match value {
            1 => TextCommand::Show,
            2 => TextCommand::Clear,
            3 => TextCommand::StopKeep,
            other => TextCommand::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextKey {
    pub frame: i16,
    pub cmd: TextCommand,
    pub params: [i16; 9],
    pub index: i16,
    pub extra: [i16; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SndCommand {
    Start,
    Loop,
    Stop,
    Other(i16),
}

impl SndCommand {
    /// Whether the key needs a sample slot.
    pub fn loads_sample(self) -> bool {
        matches!(self, SndCommand::Start | SndCommand::Loop)
    }
}

impl From<i16> for SndCommand {
    fn from(value: i16) -> Self {
        match value {
            1 => SndCommand::Start,
            4 => SndCommand::Loop,
            -1 => SndCommand::Stop,
            other => SndCommand::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SndKey {
    pub frame: i16,
    pub cmd: SndCommand,
    pub freq: i16,
    pub fade_length: i16,
    pub rep_count: i16,
    pub channel: i16,
}

/// Auxiliary per-frame record carried through to the sequencer's event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxKey {
    pub frame: i16,
    pub values: [i16; 7],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultData {
    pub static_resources: Vec<i16>,
    pub anim_resources: Vec<i16>,
    pub frame_rate: i16,
    pub static_keys: Vec<StaticKey>,
    pub anim_keys: [Vec<AnimKey>; ANIM_TRACKS],
    pub fade_palettes: [[Rgb; FADE_PALETTE_COLORS]; FADE_PALETTES],
    pub pal_fade_keys: Vec<PalFadeKey>,
    pub pal_keys: Vec<PalKey>,
    pub text_keys: Vec<TextKey>,
    pub snd_keys: Vec<SndKey>,
    pub aux_keys: Vec<AuxKey>,
}

fn count(reader: &mut ByteReader<'_>, what: &str) -> Result<usize> {
    let value = reader
        .i16_le()
        .with_context(|| format!("reading {what} count"))?;
    ensure!(value >= 0, "negative {what} count {value}");
    Ok(value as usize)
}

fn ensure_sorted(frames: impl Iterator<Item = i16>, what: &str) -> Result<()> {
    let mut last = i16::MIN;
    for frame in frames {
        ensure!(frame >= last, "{what} keys are not sorted by frame");
        last = frame;
    }
    Ok(())
}

impl MultData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);

        let static_count = reader.i8().context("reading static count")? as i32 + 1;
        let anim_count = reader.i8().context("reading anim count")? as i32 + 1;
        ensure!(
            static_count >= 0 && anim_count >= 0,
            "negative sub-resource counts"
        );

        let mut index_table = |count: i32| -> Result<Vec<i16>> {
            let mut ids = Vec::with_capacity(count as usize);
            for _ in 0..count {
                ids.push(reader.i16_le()?);
                reader.skip(INDEX_NAME_LEN)?;
            }
            Ok(ids)
        };
        let static_resources = index_table(static_count).context("reading static index table")?;
        let anim_resources = index_table(anim_count).context("reading anim index table")?;

        let frame_rate = reader.i16_le().context("reading frame rate")?;

        let static_keys = (0..count(&mut reader, "static key")?)
            .map(|_| -> Result<StaticKey> {
                Ok(StaticKey {
                    frame: reader.i16_le()?,
                    layer: reader.i16_le()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut anim_keys: [Vec<AnimKey>; ANIM_TRACKS] = Default::default();
        for (track, keys) in anim_keys.iter_mut().enumerate() {
            let n = count(&mut reader, "anim key")?;
            for _ in 0..n {
                keys.push(AnimKey {
                    frame: reader.i16_le()?,
                    layer: reader.i16_le()?,
                    pos_x: reader.i16_le()?,
                    pos_y: reader.i16_le()?,
                    order: reader.i16_le()?,
                });
            }
            ensure_sorted(keys.iter().map(|k| k.frame), &format!("anim track {track}"))?;
        }

        let mut fade_palettes = [[Rgb::default(); FADE_PALETTE_COLORS]; FADE_PALETTES];
        for palette in fade_palettes.iter_mut() {
            for color in palette.iter_mut() {
                *color = Rgb {
                    red: reader.u8()?,
                    green: reader.u8()?,
                    blue: reader.u8()?,
                };
            }
        }

        let pal_fade_keys = (0..count(&mut reader, "palette fade key")?)
            .map(|_| -> Result<PalFadeKey> {
                Ok(PalFadeKey {
                    frame: reader.i16_le()?,
                    fade: reader.i16_le()?,
                    pal_index: reader.i16_le()?,
                    flag: reader.i8()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut pal_keys = Vec::new();
        for _ in 0..count(&mut reader, "palette key")? {
            let frame = reader.i16_le()?;
            let cmd = reader.i16_le()?;
            let mut rates = [0i16; PAL_CHANNELS];
            for rate in rates.iter_mut() {
                *rate = reader.i16_le()?;
            }
            let unknown = [reader.i16_le()?, reader.i16_le()?];
            let mut subst = [[0u8; PAL_CHANNELS]; PAL_CHASE_LEN];
            for step in subst.iter_mut() {
                step.copy_from_slice(reader.bytes(PAL_CHANNELS)?);
            }
            pal_keys.push(PalKey {
                frame,
                cmd,
                rates,
                unknown,
                subst,
            });
        }

        let mut text_keys = Vec::new();
        for _ in 0..count(&mut reader, "text key")? {
            let frame = reader.i16_le()?;
            let cmd = TextCommand::from(reader.i16_le()?);
            let mut params = [0i16; 9];
            for param in params.iter_mut() {
                *param = reader.i16_le()?;
            }
            let index = reader.i16_le()?;
            let extra = [reader.i16_le()?, reader.i16_le()?];
            text_keys.push(TextKey {
                frame,
                cmd,
                params,
                index,
                extra,
            });
        }

        let mut snd_keys = Vec::new();
        for _ in 0..count(&mut reader, "sound key")? {
            let frame = reader.i16_le()?;
            let cmd = SndCommand::from(reader.i16_le()?);
            let freq = reader.i16_le()?;
            let fade_length = reader.i16_le()?;
            let rep_count = reader.i16_le()?;
            let channel = reader.i16_le()?;
            reader.skip(SND_KEY_RESERVED)?;
            snd_keys.push(SndKey {
                frame,
                cmd,
                freq,
                fade_length,
                rep_count,
                channel,
            });
        }

        let mut aux_keys = Vec::new();
        if reader.remaining() >= 2 {
            for _ in 0..count(&mut reader, "aux key")? {
                let frame = reader.i16_le()?;
                let mut values = [0i16; 7];
                for value in values.iter_mut() {
                    *value = reader.i16_le()?;
                }
                aux_keys.push(AuxKey { frame, values });
            }
        }

        ensure_sorted(static_keys.iter().map(|k| k.frame), "static")?;
        ensure_sorted(pal_fade_keys.iter().map(|k| k.frame), "palette fade")?;
        ensure_sorted(pal_keys.iter().map(|k| k.frame), "palette")?;
        ensure_sorted(text_keys.iter().map(|k| k.frame), "text")?;
        ensure_sorted(snd_keys.iter().map(|k| k.frame), "sound")?;
        ensure_sorted(aux_keys.iter().map(|k| k.frame), "aux")?;

        Ok(MultData {
            static_resources,
            anim_resources,
            frame_rate,
            static_keys,
            anim_keys,
            fade_palettes,
            pal_fade_keys,
            pal_keys,
            text_keys,
            snd_keys,
            aux_keys,
        })
    }

    /// Last frame any key refers to.
    pub fn last_frame(&self) -> i16 {
        let anim = self.anim_keys.iter().flatten().map(|k| k.frame);
        self.static_keys
            .iter()
            .map(|k| k.frame)
            .chain(anim)
            .chain(self.pal_fade_keys.iter().map(|k| k.frame))
            .chain(self.pal_keys.iter().map(|k| k.frame))
            .chain(self.text_keys.iter().map(|k| k.frame))
            .chain(self.snd_keys.iter().map(|k| k.frame))
            .chain(self.aux_keys.iter().map(|k| k.frame))
            .max()
            .unwrap_or(0)
    }
}

/// Little-endian writer producing blobs `MultData::parse` accepts.
#[derive(Debug, Default)]
pub struct MultBuilder {
    pub statics: Vec<i16>,
    pub anims: Vec<i16>,
    pub frame_rate: i16,
    pub static_keys: Vec<StaticKey>,
    pub anim_keys: [Vec<AnimKey>; ANIM_TRACKS],
    pub fade_palettes: Vec<[Rgb; FADE_PALETTE_COLORS]>,
    pub pal_fade_keys: Vec<PalFadeKey>,
    pub pal_keys: Vec<PalKey>,
    pub text_keys: Vec<(i16, i16, i16)>,
    pub snd_keys: Vec<SndKey>,
    pub aux_keys: Vec<AuxKey>,
}

impl MultBuilder {
    pub fn build(&self) -> Vec<u8> {
        fn push(out: &mut Vec<u8>, value: i16) {
            out.extend_from_slice(&value.to_le_bytes());
        }

        let mut out = Vec::new();
        out.push((self.statics.len() as i32 - 1) as i8 as u8);
        out.push((self.anims.len() as i32 - 1) as i8 as u8);
        for id in self.statics.iter().chain(&self.anims) {
            push(&mut out, *id);
            out.extend_from_slice(&[0u8; INDEX_NAME_LEN]);
        }
        push(&mut out, self.frame_rate);

        push(&mut out, self.static_keys.len() as i16);
        for key in &self.static_keys {
            push(&mut out, key.frame);
            push(&mut out, key.layer);
        }
        for track in &self.anim_keys {
            push(&mut out, track.len() as i16);
            for key in track {
                for value in [key.frame, key.layer, key.pos_x, key.pos_y, key.order] {
                    push(&mut out, value);
                }
            }
        }
        for index in 0..FADE_PALETTES {
            let palette = self
                .fade_palettes
                .get(index)
                .copied()
                .unwrap_or([Rgb::default(); FADE_PALETTE_COLORS]);
            for color in palette {
                out.extend_from_slice(&[color.red, color.green, color.blue]);
            }
        }
        push(&mut out, self.pal_fade_keys.len() as i16);
        for key in &self.pal_fade_keys {
            push(&mut out, key.frame);
            push(&mut out, key.fade);
            push(&mut out, key.pal_index);
            out.push(key.flag as u8);
        }
        push(&mut out, self.pal_keys.len() as i16);
        for key in &self.pal_keys {
            push(&mut out, key.frame);
            push(&mut out, key.cmd);
            for value in key.rates.iter().chain(&key.unknown) {
                push(&mut out, *value);
            }
            for step in &key.subst {
                out.extend_from_slice(step);
            }
        }
        push(&mut out, self.text_keys.len() as i16);
        for &(frame, cmd, index) in &self.text_keys {
            push(&mut out, frame);
            push(&mut out, cmd);
            for _ in 0..9 {
                push(&mut out, 0);
            }
            push(&mut out, index);
            push(&mut out, 0);
            push(&mut out, 0);
        }
        push(&mut out, self.snd_keys.len() as i16);
        for key in &self.snd_keys {
            let cmd = match key.cmd {
                SndCommand::Start => 1,
                SndCommand::Loop => 4,
                SndCommand::Stop => -1,
                SndCommand::Other(value) => value,
            };
            for value in [key.frame, cmd, key.freq, key.fade_length, key.rep_count, key.channel] {
                push(&mut out, value);
            }
            out.extend_from_slice(&[0u8; SND_KEY_RESERVED]);
        }
        if !self.aux_keys.is_empty() {
            push(&mut out, self.aux_keys.len() as i16);
            for key in &self.aux_keys {
                push(&mut out, key.frame);
                for value in key.values {
                    push(&mut out, value);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> MultBuilder {
        let mut builder = MultBuilder {
            statics: vec![3],
            anims: vec![4, 5],
            frame_rate: 5,
            static_keys: vec![StaticKey { frame: 0, layer: 1 }],
            text_keys: vec![(0, 1, 0), (10, 3, 1)],
            snd_keys: vec![SndKey {
                frame: 2,
                cmd: SndCommand::Start,
                freq: 11025,
                fade_length: 0,
                rep_count: 1,
                channel: 0,
            }],
            ..Default::default()
        };
        builder.anim_keys[1] = vec![
            AnimKey {
                frame: 1,
                layer: 0,
                pos_x: 10,
                pos_y: 20,
                order: 2,
            },
            AnimKey {
                frame: 12,
                layer: -1,
                pos_x: 0,
                pos_y: 0,
                order: 0,
            },
        ];
        builder
    }

    #[test]
    fn parses_every_key_array() {
        let data = MultData::parse(&builder().build()).unwrap();
        assert_eq!(data.static_resources, vec![3]);
        assert_eq!(data.anim_resources, vec![4, 5]);
        assert_eq!(data.frame_rate, 5);
        assert_eq!(data.static_keys.len(), 1);
        assert!(data.anim_keys[0].is_empty());
        assert_eq!(data.anim_keys[1][0].pos_y, 20);
        assert_eq!(data.text_keys[1].cmd, TextCommand::StopKeep);
        assert_eq!(data.snd_keys[0].cmd, SndCommand::Start);
        assert!(data.aux_keys.is_empty());
        assert_eq!(data.last_frame(), 12);
    }

    #[test]
    fn optional_aux_tail() {
        let mut source = builder();
        source.aux_keys.push(AuxKey {
            frame: 4,
            values: [1, 2, 3, 4, 5, 6, 7],
        });
        let data = MultData::parse(&source.build()).unwrap();
        assert_eq!(data.aux_keys.len(), 1);
        assert_eq!(data.aux_keys[0].values[6], 7);
    }

    #[test]
    fn truncated_or_unsorted_blobs_fail() {
        let bytes = builder().build();
        assert!(MultData::parse(&bytes[..bytes.len() - 3]).is_err());

        let mut source = builder();
        source.anim_keys[1].reverse();
        assert!(MultData::parse(&source.build()).is_err());
    }
}

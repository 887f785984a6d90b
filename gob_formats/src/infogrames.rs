//! Infogrames tracker files: an instrument bank (`.ins`) and songs (`.dum`).
//! Everything here is big-endian.

use anyhow::{Context, Result, bail, ensure};

use crate::reader::ByteReader;

pub const MAX_INSTRUMENTS: usize = 32;
pub const SLIDE_RECORD_SIZE: usize = 13;
pub const CHANNELS: usize = 4;
const END_OF_LIST: u16 = 0xFFFF;
const MIN_SONG_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentSample {
    pub data: Vec<i8>,
    pub repeat_offset: usize,
    pub repeat_len: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfogramesInstruments {
    pub samples: Vec<InstrumentSample>,
}

impl InfogramesInstruments {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let count = reader.u16_be().context("reading instrument count")? as usize;
        if count > MAX_INSTRUMENTS {
            bail!("instrument bank declares {count} samples (max {MAX_INSTRUMENTS})");
        }

        let mut samples = Vec::with_capacity(count);
        for index in 0..count {
            let offset = reader.u32_be()? as usize;
            let len = reader.u16_be()? as usize * 2;
            let repeat_offset = reader.u16_be()? as usize;
            let repeat_len = reader.u16_be()? as usize * 2;

            let bytes = data
                .get(offset..offset + len)
                .with_context(|| format!("instrument {index} data ({offset}+{len}) out of range"))?;
            ensure!(
                repeat_len == 0 || repeat_offset + repeat_len <= len,
                "instrument {index} loop region exceeds its sample"
            );
            samples.push(InstrumentSample {
                data: bytes.iter().map(|&b| b as i8).collect(),
                repeat_offset,
                repeat_len,
            });
        }
        Ok(InfogramesInstruments { samples })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let header_len = 2 + self.samples.len() * 10;
        let mut out = Vec::new();
        out.extend_from_slice(&(self.samples.len() as u16).to_be_bytes());
        let mut offset = header_len;
        for sample in &self.samples {
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            out.extend_from_slice(&((sample.data.len() / 2) as u16).to_be_bytes());
            out.extend_from_slice(&(sample.repeat_offset as u16).to_be_bytes());
            out.extend_from_slice(&((sample.repeat_len / 2) as u16).to_be_bytes());
            offset += sample.data.len() / 2 * 2;
        }
        for sample in &self.samples {
            let even = sample.data.len() / 2 * 2;
            out.extend(sample.data[..even].iter().map(|&b| b as u8));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideKind {
    Volume,
    Period,
}

/// One sub-song of a `.dum` file, with every offset made absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfogramesSong {
    data: Vec<u8>,
    base: usize,
    pub speed: u16,
    volume_slides: usize,
    period_slides: usize,
    channels: [usize; CHANNELS],
}

impl InfogramesSong {
    pub fn parse(data: &[u8], sub_song: usize) -> Result<Self> {
        ensure!(
            data.len() >= MIN_SONG_SIZE,
            "song of {} bytes is too small",
            data.len()
        );
        let mut reader = ByteReader::at(data, sub_song * 2);
        let base = reader
            .u16_be()
            .with_context(|| format!("reading sub-song {sub_song} offset"))? as usize;
        ensure!(base < data.len(), "sub-song {sub_song} starts beyond the file");

        reader.seek(base);
        let speed = reader.u16_be()?;
        ensure!(speed > 0, "sub-song {sub_song} has a zero speed");
        let mut absolute = || -> Result<usize> {
            let offset = base + reader.u16_be()? as usize;
            ensure!(offset < data.len(), "song offset {offset} beyond the file");
            Ok(offset)
        };
        let volume_slides = absolute().context("volume slide table")?;
        let period_slides = absolute().context("period slide table")?;
        let mut channels = [0usize; CHANNELS];
        for (index, channel) in channels.iter_mut().enumerate() {
            *channel = absolute().with_context(|| format!("channel {index} command list"))?;
        }

        Ok(InfogramesSong {
            data: data.to_vec(),
            base,
            speed,
            volume_slides,
            period_slides,
            channels,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Absolute offsets of the command blocks a channel plays, in order.
    pub fn command_list(&self, channel: usize) -> Result<Vec<usize>> {
        let start = *self
            .channels
            .get(channel)
            .with_context(|| format!("no channel {channel}"))?;
        let mut reader = ByteReader::at(&self.data, start);
        let mut blocks = Vec::new();
        loop {
            let value = reader
                .u16_be()
                .with_context(|| format!("channel {channel} command list is unterminated"))?;
            if value == END_OF_LIST {
                break;
            }
            let offset = self.base + value as usize;
            ensure!(offset < self.data.len(), "command block {offset} beyond the file");
            blocks.push(offset);
        }
        Ok(blocks)
    }

    pub fn slide(&self, kind: SlideKind, index: usize) -> Option<&[u8]> {
        let table = match kind {
            SlideKind::Volume => self.volume_slides,
            SlideKind::Period => self.period_slides,
        };
        let start = table + index * SLIDE_RECORD_SIZE;
        self.data.get(start..start + SLIDE_RECORD_SIZE)
    }
}

/// Assembles a single sub-song file; used by fixtures and tooling.
#[derive(Debug, Clone, Default)]
pub struct SongBuilder {
    pub speed: u16,
    pub volume_slides: Vec<[u8; SLIDE_RECORD_SIZE]>,
    pub period_slides: Vec<[u8; SLIDE_RECORD_SIZE]>,
    /// Command blocks; channels refer to them by index.
    pub blocks: Vec<Vec<u8>>,
    pub channels: [Vec<usize>; CHANNELS],
}

impl SongBuilder {
    pub fn build(&self) -> Vec<u8> {
        let base = 2usize;
        let header_len = 2 + 2 * (2 + CHANNELS);

        let mut body = Vec::new();
        let volume_at = header_len + body.len();
        for record in &self.volume_slides {
            body.extend_from_slice(record);
        }
        let period_at = header_len + body.len();
        for record in &self.period_slides {
            body.extend_from_slice(record);
        }
        let mut block_at = Vec::new();
        for block in &self.blocks {
            block_at.push(header_len + body.len());
            body.extend_from_slice(block);
        }
        let mut list_at = [0usize; CHANNELS];
        for (channel, list) in self.channels.iter().enumerate() {
            list_at[channel] = header_len + body.len();
            for &block in list {
                body.extend_from_slice(&(block_at[block] as u16).to_be_bytes());
            }
            body.extend_from_slice(&END_OF_LIST.to_be_bytes());
        }

        let mut out = Vec::new();
        out.extend_from_slice(&(base as u16).to_be_bytes());
        out.extend_from_slice(&self.speed.to_be_bytes());
        out.extend_from_slice(&(volume_at as u16).to_be_bytes());
        out.extend_from_slice(&(period_at as u16).to_be_bytes());
        for at in list_at {
            out.extend_from_slice(&(at as u16).to_be_bytes());
        }
        out.extend_from_slice(&body);
        while out.len() < MIN_SONG_SIZE {
            out.push(0);
        }
        out
    }
}

//! AdLib music files: a three byte header, a bank of 0x38 byte instruments
//! and a byte-coded track.

use anyhow::{Result, bail, ensure};

use crate::reader::ByteReader;

pub const INSTRUMENT_SIZE: usize = 0x38;
pub const INSTRUMENT_WORDS: usize = INSTRUMENT_SIZE / 2;
const HEADER_SIZE: usize = 3;
const SUPPORTED_VERSION: u8 = 0;

/// 28 little-endian parameter words. Operator 0 reads words 0..27,
/// operator 1 reads words 13..28 (the blocks overlap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdlInstrument {
    pub words: [u16; INSTRUMENT_WORDS],
}

impl AdlInstrument {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= INSTRUMENT_SIZE,
            "instrument record needs {INSTRUMENT_SIZE} bytes, got {}",
            bytes.len()
        );
        let mut reader = ByteReader::new(bytes);
        let mut words = [0u16; INSTRUMENT_WORDS];
        for word in words.iter_mut() {
            *word = reader.u16_le()?;
        }
        Ok(AdlInstrument { words })
    }

    /// Parameter block for operator `op` (0 = modulator, 1 = carrier).
    pub fn operator(&self, op: usize) -> [u16; 27] {
        let mut block = [0u16; 27];
        let start = op * 13;
        for (j, slot) in block.iter_mut().enumerate() {
            *slot = self.words.get(start + j).copied().unwrap_or(0);
        }
        block
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdlFile {
    pub instruments: Vec<AdlInstrument>,
    pub track: Vec<u8>,
}

impl AdlFile {
    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure!(data.len() > HEADER_SIZE, "AdLib file too short ({} bytes)", data.len());
        if data[0] != SUPPORTED_VERSION {
            bail!("unsupported AdLib file version {}", data[0]);
        }

        let count = data[1] as usize + 1;
        let track_start = HEADER_SIZE + count * INSTRUMENT_SIZE;
        ensure!(
            track_start < data.len(),
            "AdLib file declares {count} instruments but holds {} bytes",
            data.len()
        );

        let instruments = (0..count)
            .map(|i| {
                let start = HEADER_SIZE + i * INSTRUMENT_SIZE;
                AdlInstrument::parse(&data[start..start + INSTRUMENT_SIZE])
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(AdlFile {
            instruments,
            track: data[track_start..].to_vec(),
        })
    }
}

/// Serialises an instrument bank and track; used by fixtures and tooling.
pub fn build_adl(instruments: &[AdlInstrument], track: &[u8]) -> Result<Vec<u8>> {
    ensure!(
        !instruments.is_empty() && instruments.len() <= 256,
        "an AdLib file holds 1..=256 instruments"
    );
    let mut out = vec![SUPPORTED_VERSION, (instruments.len() - 1) as u8, 0];
    for instrument in instruments {
        for word in instrument.words {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
    out.extend_from_slice(track);
    Ok(out)
}

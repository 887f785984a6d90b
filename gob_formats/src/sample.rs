use anyhow::{Result, ensure};

use crate::reader::ByteReader;

pub const SAMPLE_HEADER_SIZE: usize = 6;

/// Six byte header in front of raw signed 8-bit PCM: flags, 24-bit
/// big-endian sample count, big-endian frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleHeader {
    pub flags: u8,
    pub declared_size: u32,
    pub frequency: u16,
}

impl SampleHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() >= SAMPLE_HEADER_SIZE,
            "sound resource of {} bytes is shorter than its header",
            data.len()
        );
        let mut reader = ByteReader::new(data);
        Ok(SampleHeader {
            flags: reader.u8()?,
            declared_size: reader.u24_be()?,
            frequency: reader.u16_be()?,
        })
    }

    /// Declared size clamped to the bytes actually present.
    pub fn effective_size(&self, resource_len: usize) -> usize {
        (self.declared_size as usize).min(resource_len.saturating_sub(SAMPLE_HEADER_SIZE))
    }
}

/// Header plus a borrowed view of the PCM bytes it describes.
pub fn split_sample(data: &[u8]) -> Result<(SampleHeader, &[u8])> {
    let header = SampleHeader::parse(data)?;
    let size = header.effective_size(data.len());
    Ok((
        header,
        &data[SAMPLE_HEADER_SIZE..SAMPLE_HEADER_SIZE + size],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_declared_size_to_payload() {
        let data = [0x00, 0x00, 0x01, 0x00, 0x2B, 0x11, 1, 2, 3, 4, 5, 6];
        let (header, pcm) = split_sample(&data).unwrap();
        assert_eq!(header.declared_size, 256);
        assert_eq!(header.frequency, 0x2B11);
        assert_eq!(pcm, &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn keeps_shorter_declared_size() {
        let data = [0x80, 0, 0, 2, 0x1F, 0x40, 9, 8, 7];
        let (header, pcm) = split_sample(&data).unwrap();
        assert_eq!(header.flags, 0x80);
        assert_eq!(header.frequency, 8000);
        assert_eq!(pcm, &[9, 8]);
        assert!(SampleHeader::parse(&data[..5]).is_err());
    }
}

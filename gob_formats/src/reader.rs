//! Bounds-checked little/big-endian cursor used by every parser in this crate.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("read of {len} bytes at offset {offset} exceeds buffer of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("unterminated string at offset {offset}")]
    Unterminated { offset: usize },
}

fn slice_at(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ReadError> {
    let end = offset.checked_add(len).ok_or(ReadError::OutOfBounds {
        offset,
        len,
        size: data.len(),
    })?;
    data.get(offset..end).ok_or(ReadError::OutOfBounds {
        offset,
        len,
        size: data.len(),
    })
}

pub fn read_u8_at(data: &[u8], offset: usize) -> Result<u8, ReadError> {
    Ok(slice_at(data, offset, 1)?[0])
}

pub fn read_u16_le_at(data: &[u8], offset: usize) -> Result<u16, ReadError> {
    Ok(LittleEndian::read_u16(slice_at(data, offset, 2)?))
}

pub fn read_i16_le_at(data: &[u8], offset: usize) -> Result<i16, ReadError> {
    Ok(LittleEndian::read_i16(slice_at(data, offset, 2)?))
}

pub fn read_u32_le_at(data: &[u8], offset: usize) -> Result<u32, ReadError> {
    Ok(LittleEndian::read_u32(slice_at(data, offset, 4)?))
}

pub fn read_u16_be_at(data: &[u8], offset: usize) -> Result<u16, ReadError> {
    Ok(BigEndian::read_u16(slice_at(data, offset, 2)?))
}

/// Sequential reader over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        ByteReader { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn skip(&mut self, count: usize) -> Result<(), ReadError> {
        slice_at(self.data, self.pos, count)?;
        self.pos += count;
        Ok(())
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        let out = slice_at(self.data, self.pos, len)?;
        self.pos += len;
        Ok(out)
    }

    pub fn peek_u8(&self) -> Result<u8, ReadError> {
        read_u8_at(self.data, self.pos)
    }

    pub fn u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8, ReadError> {
        Ok(self.u8()? as i8)
    }

    pub fn u16_le(&mut self) -> Result<u16, ReadError> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn i16_le(&mut self) -> Result<i16, ReadError> {
        Ok(LittleEndian::read_i16(self.bytes(2)?))
    }

    pub fn u32_le(&mut self) -> Result<u32, ReadError> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn i32_le(&mut self) -> Result<i32, ReadError> {
        Ok(LittleEndian::read_i32(self.bytes(4)?))
    }

    pub fn u16_be(&mut self) -> Result<u16, ReadError> {
        Ok(BigEndian::read_u16(self.bytes(2)?))
    }

    pub fn u32_be(&mut self) -> Result<u32, ReadError> {
        Ok(BigEndian::read_u32(self.bytes(4)?))
    }

    pub fn u24_be(&mut self) -> Result<u32, ReadError> {
        Ok(BigEndian::read_u24(self.bytes(3)?))
    }

    /// Reads a NUL-terminated string and consumes the terminator.
    pub fn cstr(&mut self) -> Result<&'a [u8], ReadError> {
        let start = self.pos;
        let rest = self.data.get(start..).unwrap_or(&[]);
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ReadError::Unterminated { offset: start })?;
        self.pos = start + len + 1;
        Ok(&rest[..len])
    }
}

/// Trims a fixed-size, NUL-padded name field.
pub fn fixed_name(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_mixed_endianness() {
        let data = [0x34, 0x12, 0x12, 0x34, 0x01, 0x02, 0x03, 0xFF];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.u16_le().unwrap(), 0x1234);
        assert_eq!(reader.u16_be().unwrap(), 0x1234);
        assert_eq!(reader.u24_be().unwrap(), 0x010203);
        assert_eq!(reader.i8().unwrap(), -1);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn reports_out_of_bounds_without_advancing() {
        let data = [1u8, 2, 3];
        let mut reader = ByteReader::new(&data);
        reader.u8().unwrap();
        let err = reader.u32_le().unwrap_err();
        assert_eq!(
            err,
            ReadError::OutOfBounds {
                offset: 1,
                len: 4,
                size: 3
            }
        );
        assert_eq!(reader.position(), 1);
        assert!(read_u32_le_at(&data, usize::MAX - 1).is_err());
    }

    #[test]
    fn reads_c_strings() {
        let data = b"abc\0de\0f";
        let mut reader = ByteReader::new(data);
        assert_eq!(reader.cstr().unwrap(), b"abc");
        assert_eq!(reader.cstr().unwrap(), b"de");
        assert!(matches!(
            reader.cstr(),
            Err(ReadError::Unterminated { offset: 7 })
        ));
        assert_eq!(fixed_name(b"INTRO.TOT\0\0\0\0"), "INTRO.TOT");
    }
}

//! LZSS-style codec used for packed archive entries, external data and
//! video frame payloads.
//!
//! Layout: a little-endian `u32` holding the unpacked size, followed by a
//! stream of control bytes. Each control byte yields eight flags (LSB first):
//! a set flag copies one literal byte, a clear flag reads a two byte
//! back-reference into a 4096 byte ring buffer pre-filled with spaces.

use anyhow::{Context, Result, bail, ensure};
use byteorder::{ByteOrder, LittleEndian};

pub const WINDOW_SIZE: usize = 4096;
const WINDOW_MASK: usize = WINDOW_SIZE - 1;
const WINDOW_START: usize = 4078;
const WINDOW_FILL: u8 = 0x20;

const MIN_MATCH: usize = 3;
const SHORT_MAX_MATCH: usize = MIN_MATCH + 14;
const LONG_BASE: usize = 18;
const MAX_MATCH: usize = LONG_BASE + 0xFF;

/// Upper bound on the declared size we are willing to allocate for.
pub const MAX_UNPACKED_SIZE: usize = 16 * 1024 * 1024;

/// Returns the unpacked size announced by a packed payload.
pub fn unpacked_size(src: &[u8]) -> Result<usize> {
    ensure!(src.len() >= 4, "packed payload shorter than its size prefix");
    Ok(LittleEndian::read_u32(&src[..4]) as usize)
}

/// Expands a packed payload. Never produces more than the declared size,
/// whatever the back-references say.
pub fn unpack(src: &[u8]) -> Result<Vec<u8>> {
    let real_size = unpacked_size(src)?;
    ensure!(
        real_size <= MAX_UNPACKED_SIZE,
        "packed payload declares {real_size} bytes, above the {MAX_UNPACKED_SIZE} byte limit"
    );

    let mut window = [WINDOW_FILL; WINDOW_SIZE];
    let mut write = WINDOW_START;
    let mut out = Vec::with_capacity(real_size);
    let mut pos = 4usize;
    let mut flags: u16 = 0;

    let next = |pos: &mut usize| -> Result<u8> {
        let byte = *src
            .get(*pos)
            .with_context(|| format!("packed stream truncated at byte {}", *pos))?;
        *pos += 1;
        Ok(byte)
    };

    while out.len() < real_size {
        flags >>= 1;
        if flags & 0x100 == 0 {
            flags = u16::from(next(&mut pos)?) | 0xFF00;
        }

        if flags & 1 != 0 {
            let byte = next(&mut pos)?;
            out.push(byte);
            window[write] = byte;
            write = (write + 1) & WINDOW_MASK;
            continue;
        }

        let lo = next(&mut pos)? as usize;
        let hi = next(&mut pos)? as usize;
        let offset = lo | ((hi & 0xF0) << 4);
        let len = if hi & 0x0F == 0x0F {
            next(&mut pos)? as usize + LONG_BASE
        } else {
            (hi & 0x0F) + MIN_MATCH
        };

        for i in 0..len {
            if out.len() == real_size {
                break;
            }
            let byte = window[(offset + i) & WINDOW_MASK];
            out.push(byte);
            window[write] = byte;
            write = (write + 1) & WINDOW_MASK;
        }
    }

    Ok(out)
}

/// Unpacks when `packed` is set, otherwise copies.
pub fn maybe_unpack(data: &[u8], packed: bool) -> Result<Vec<u8>> {
    if packed {
        unpack(data)
    } else {
        Ok(data.to_vec())
    }
}

/// Greedy encoder producing streams `unpack` accepts. Meant for tooling and
/// fixtures, not for speed.
pub fn pack(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > MAX_UNPACKED_SIZE || u32::try_from(data.len()).is_err() {
        bail!("input of {} bytes is too large to pack", data.len());
    }

    let mut out = Vec::with_capacity(data.len() + data.len() / 8 + 8);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());

    let mut window = [WINDOW_FILL; WINDOW_SIZE];
    let mut write = WINDOW_START;
    let mut pos = 0usize;

    let mut control_index = 0usize;
    let mut control_bit = 8u32;

    while pos < data.len() {
        if control_bit == 8 {
            control_index = out.len();
            out.push(0);
            control_bit = 0;
        }

        let (offset, len) = longest_match(&window, write, &data[pos..]);
        if len >= MIN_MATCH {
            if len > SHORT_MAX_MATCH {
                out.push((offset & 0xFF) as u8);
                out.push((((offset >> 4) & 0xF0) | 0x0F) as u8);
                out.push((len - LONG_BASE) as u8);
            } else {
                out.push((offset & 0xFF) as u8);
                out.push((((offset >> 4) & 0xF0) | (len - MIN_MATCH)) as u8);
            }
            for &byte in &data[pos..pos + len] {
                window[write] = byte;
                write = (write + 1) & WINDOW_MASK;
            }
            pos += len;
        } else {
            out[control_index] |= 1 << control_bit;
            out.push(data[pos]);
            window[write] = data[pos];
            write = (write + 1) & WINDOW_MASK;
            pos += 1;
        }
        control_bit += 1;
    }

    Ok(out)
}

fn longest_match(window: &[u8; WINDOW_SIZE], write: usize, input: &[u8]) -> (usize, usize) {
    let limit = input.len().min(MAX_MATCH);
    if limit < MIN_MATCH {
        return (0, 0);
    }

    let mut best = (0usize, 0usize);
    for offset in 0..WINDOW_SIZE {
        let mut len = 0usize;
        while len < limit {
            let src = (offset + len) & WINDOW_MASK;
            // Positions written during this very copy hold the input bytes.
            let distance = src.wrapping_sub(write) & WINDOW_MASK;
            let byte = if distance < len {
                input[distance]
            } else {
                window[src]
            };
            if byte != input[len] {
                break;
            }
            len += 1;
        }
        if len > best.1 {
            best = (offset, len);
            if len == limit {
                break;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpacks_literals_and_back_references() {
        // "abcabcabc": three literals then a 6 byte reference to the ring
        // position where "abc" landed (4078).
        let offset = WINDOW_START;
        let mut src = Vec::new();
        src.extend_from_slice(&9u32.to_le_bytes());
        src.push(0b0000_0111);
        src.extend_from_slice(b"abc");
        src.push((offset & 0xFF) as u8);
        src.push((((offset >> 4) & 0xF0) | (6 - MIN_MATCH)) as u8);

        assert_eq!(unpack(&src).unwrap(), b"abcabcabc");
    }

    #[test]
    fn initial_window_reads_as_spaces() {
        let mut src = Vec::new();
        src.extend_from_slice(&4u32.to_le_bytes());
        src.push(0);
        src.push(0x00);
        src.push(0x01);
        assert_eq!(unpack(&src).unwrap(), b"    ");
    }

    #[test]
    fn long_match_uses_escape_byte() {
        let data = vec![b'x'; 300];
        let packed = pack(&data).unwrap();
        assert!(packed.len() < 16, "packed to {} bytes", packed.len());
        assert_eq!(unpack(&packed).unwrap(), data);
    }

    #[test]
    fn never_writes_past_declared_size() {
        let mut src = Vec::new();
        src.extend_from_slice(&5u32.to_le_bytes());
        src.push(0);
        // Reference of maximal length starting far away in the ring.
        src.push(0xFF);
        src.push(0xFF);
        src.push(0xFF);
        let out = unpack(&src).unwrap();
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut src = Vec::new();
        src.extend_from_slice(&10u32.to_le_bytes());
        src.push(0xFF);
        src.extend_from_slice(b"abc");
        assert!(unpack(&src).is_err());
        assert!(unpack(&[1, 0]).is_err());
    }

    #[test]
    fn packs_mixed_content_back_to_source() {
        let mut data = Vec::new();
        for round in 0..40u8 {
            data.extend_from_slice(b"GOB script text ");
            data.push(round);
            data.extend(std::iter::repeat(round.wrapping_mul(7)).take(round as usize));
        }
        let packed = pack(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(unpack(&packed).unwrap(), data);
    }
}

//! Run-length decoders for sprite data and frame deltas.

use anyhow::{Context, Result, ensure};

/// Decodes a sprite stream into exactly `out_len` bytes.
///
/// A control byte with the high bit set repeats the following byte
/// `(c & 0x7F) + 1` times; otherwise `c + 1` literal bytes follow.
pub fn decode_sprite(src: &[u8], out_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(out_len);
    let mut pos = 0usize;

    while out.len() < out_len {
        let control = *src
            .get(pos)
            .with_context(|| format!("sprite RLE truncated at byte {pos}"))?;
        pos += 1;
        let count = ((control & 0x7F) as usize + 1).min(out_len - out.len());

        if control & 0x80 != 0 {
            let value = *src
                .get(pos)
                .with_context(|| format!("sprite RLE run value missing at byte {pos}"))?;
            pos += 1;
            out.resize(out.len() + count, value);
        } else {
            let literals = src
                .get(pos..pos + count)
                .with_context(|| format!("sprite RLE literals truncated at byte {pos}"))?;
            out.extend_from_slice(literals);
            pos += (control as usize) + 1;
        }
    }

    Ok(out)
}

/// Encoder matching `decode_sprite`, used by fixtures and tooling.
pub fn encode_sprite(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let run = data[pos..]
            .iter()
            .take(128)
            .take_while(|&&b| b == data[pos])
            .count();
        if run >= 3 {
            out.push(0x80 | (run - 1) as u8);
            out.push(data[pos]);
            pos += run;
            continue;
        }

        let start = pos;
        while pos < data.len() && pos - start < 128 {
            let ahead = data[pos..].iter().take(3).take_while(|&&b| b == data[pos]).count();
            if ahead == 3 {
                break;
            }
            pos += 1;
        }
        out.push((pos - start - 1) as u8);
        out.extend_from_slice(&data[start..pos]);
    }

    out
}

/// Applies a frame delta onto an existing `width * height` image.
///
/// Each line is a series of `(skip, count)` pairs followed by `count`
/// literal pixels; the pair `(0, 0)` moves to the next line. Pixels falling
/// outside the line are dropped.
pub fn apply_frame_delta(src: &[u8], dest: &mut [u8], width: usize, height: usize) -> Result<()> {
    ensure!(
        dest.len() >= width * height,
        "frame buffer of {} bytes cannot hold {width}x{height}",
        dest.len()
    );

    let mut pos = 0usize;
    let mut line = 0usize;
    let mut x = 0usize;

    while line < height {
        let pair = src
            .get(pos..pos + 2)
            .with_context(|| format!("frame delta truncated at byte {pos} (line {line})"))?;
        let (skip, count) = (pair[0] as usize, pair[1] as usize);
        pos += 2;

        if skip == 0 && count == 0 {
            line += 1;
            x = 0;
            continue;
        }

        x += skip;
        let pixels = src
            .get(pos..pos + count)
            .with_context(|| format!("frame delta pixels truncated at byte {pos}"))?;
        pos += count;

        let row = line * width;
        for (i, &pixel) in pixels.iter().enumerate() {
            let column = x + i;
            if column < width {
                dest[row + column] = pixel;
            }
        }
        x += count;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_runs_and_literals() {
        let src = [0x83, 7, 0x01, 1, 2];
        assert_eq!(decode_sprite(&src, 6).unwrap(), vec![7, 7, 7, 7, 1, 2]);
    }

    #[test]
    fn clamps_to_requested_length() {
        let src = [0xFF, 9];
        assert_eq!(decode_sprite(&src, 5).unwrap(), vec![9; 5]);
        assert!(decode_sprite(&[0x05, 1], 6).is_err());
    }

    #[test]
    fn encoder_output_decodes() {
        let mut data = vec![0u8; 200];
        data.extend([1, 2, 3, 4, 4, 5]);
        data.extend(vec![6u8; 3]);
        let encoded = encode_sprite(&data);
        assert_eq!(decode_sprite(&encoded, data.len()).unwrap(), data);
    }

    #[test]
    fn frame_delta_updates_only_listed_pixels() {
        let mut image = vec![0u8; 4 * 2];
        let delta = [1, 2, 9, 9, 0, 0, 3, 3, 5, 6, 7, 0, 0];
        apply_frame_delta(&delta, &mut image, 4, 2).unwrap();
        assert_eq!(image, vec![0, 9, 9, 0, 0, 0, 0, 5]);
    }
}

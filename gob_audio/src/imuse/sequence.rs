//! Standard MIDI File loading. All tracks are merged into one tick-sorted
//! event list; an optional `MDpr` chunk carries the sound's priority.

use crate::error::{AudioError, Result};

pub const DEFAULT_PRIORITY: u8 = 128;
pub const DEFAULT_TEMPO: u32 = 500_000;
const PRIORITY_CHUNK: &[u8; 4] = b"MDpr";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiEvent {
    Channel { status: u8, data1: u8, data2: u8 },
    SysEx(Vec<u8>),
    Tempo(u32),
    Marker(Vec<u8>),
    EndOfTrack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEvent {
    pub tick: u32,
    pub event: MidiEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiSequence {
    pub ppqn: u16,
    pub priority: u8,
    pub events: Vec<TimedEvent>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn fail<T>(&self, reason: impl Into<String>) -> Result<T> {
        Err(AudioError::Midi {
            offset: self.pos,
            reason: reason.into(),
        })
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        match self.data.get(self.pos..self.pos + len) {
            Some(bytes) => {
                self.pos += len;
                Ok(bytes)
            }
            None => self.fail(format!("need {len} bytes")),
        }
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16_be(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32_be(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn var_len(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..4 {
            let byte = self.u8()?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        self.fail("variable-length quantity longer than four bytes")
    }
}

impl MidiSequence {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { data, pos: 0 };
        if cursor.bytes(4)? != b"MThd" {
            return cursor.fail("missing MThd header");
        }
        let header_len = cursor.u32_be()? as usize;
        if header_len < 6 {
            return cursor.fail("MThd chunk too short");
        }
        let header_end = cursor.pos + header_len;
        let _format = cursor.u16_be()?;
        let _tracks = cursor.u16_be()?;
        let division = cursor.u16_be()?;
        if division & 0x8000 != 0 {
            return cursor.fail("SMPTE time division is not supported");
        }
        cursor.pos = header_end;

        let mut priority = DEFAULT_PRIORITY;
        let mut events = Vec::new();
        let mut last_tick = 0;
        while cursor.pos < data.len() {
            let id = cursor.bytes(4)?;
            let len = cursor.u32_be()? as usize;
            let body = cursor.bytes(len)?;
            match id {
                b"MTrk" => {
                    let start = cursor.pos - len;
                    let end = parse_track(body, start, &mut events)?;
                    last_tick = last_tick.max(end);
                }
                id if id == PRIORITY_CHUNK => {
                    if let Some(&value) = body.first() {
                        priority = value;
                    }
                }
                _ => {}
            }
        }

        // Stable: events on the same tick keep their track order.
        events.sort_by_key(|event: &TimedEvent| event.tick);
        events.push(TimedEvent {
            tick: last_tick,
            event: MidiEvent::EndOfTrack,
        });

        Ok(MidiSequence {
            ppqn: division.max(1),
            priority,
            events,
        })
    }

    pub fn length_ticks(&self) -> u32 {
        self.events.last().map_or(0, |event| event.tick)
    }

    /// Index of the first event at or after `tick`.
    pub fn position_of(&self, tick: u32) -> usize {
        self.events.partition_point(|event| event.tick < tick)
    }
}

/// Appends the track's events and returns the tick of its end.
fn parse_track(body: &[u8], base: usize, events: &mut Vec<TimedEvent>) -> Result<u32> {
    let mut cursor = Cursor { data: body, pos: 0 };
    let mut tick = 0u32;
    let mut running = None;
    while cursor.pos < body.len() {
        tick = tick.saturating_add(cursor.var_len()?);
        let mut status = cursor.u8()?;
        let mut first_data = None;
        if status < 0x80 {
            match running {
                Some(previous) => {
                    first_data = Some(status);
                    status = previous;
                }
                None => {
                    return Err(AudioError::Midi {
                        offset: base + cursor.pos,
                        reason: "data byte without running status".into(),
                    });
                }
            }
        }

        match status {
            0x80..=0xEF => {
                running = Some(status);
                let data1 = match first_data {
                    Some(value) => value,
                    None => cursor.u8()?,
                };
                let data2 = if matches!(status & 0xF0, 0xC0 | 0xD0) {
                    0
                } else {
                    cursor.u8()?
                };
                events.push(TimedEvent {
                    tick,
                    event: MidiEvent::Channel {
                        status,
                        data1,
                        data2,
                    },
                });
            }
            0xF0 => {
                let len = cursor.var_len()? as usize;
                let mut payload = cursor.bytes(len)?.to_vec();
                if payload.last() == Some(&0xF7) {
                    payload.pop();
                }
                events.push(TimedEvent {
                    tick,
                    event: MidiEvent::SysEx(payload),
                });
            }
            0xF7 => {
                let len = cursor.var_len()? as usize;
                cursor.bytes(len)?;
            }
            0xFF => {
                let kind = cursor.u8()?;
                let len = cursor.var_len()? as usize;
                let payload = cursor.bytes(len)?;
                match kind {
                    0x2F => return Ok(tick),
                    0x51 if len == 3 => events.push(TimedEvent {
                        tick,
                        event: MidiEvent::Tempo(
                            (payload[0] as u32) << 16 | (payload[1] as u32) << 8 | payload[2] as u32,
                        ),
                    }),
                    0x06 => events.push(TimedEvent {
                        tick,
                        event: MidiEvent::Marker(payload.to_vec()),
                    }),
                    _ => {}
                }
            }
            other => {
                return Err(AudioError::Midi {
                    offset: base + cursor.pos,
                    reason: format!("unexpected status byte {other:#04x}"),
                });
            }
        }
    }
    Ok(tick)
}

/// Writes a format-0 file from `(delta, raw event bytes)` pairs; used by
/// fixtures and tooling.
pub fn build_smf(ppqn: u16, priority: Option<u8>, events: &[(u32, Vec<u8>)]) -> Vec<u8> {
    fn var_len(mut value: u32, out: &mut Vec<u8>) {
        let mut stack = vec![(value & 0x7F) as u8];
        value >>= 7;
        while value > 0 {
            stack.push((value & 0x7F) as u8 | 0x80);
            value >>= 7;
        }
        out.extend(stack.iter().rev());
    }

    let mut track = Vec::new();
    for (delta, bytes) in events {
        var_len(*delta, &mut track);
        track.extend_from_slice(bytes);
    }
    track.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);

    let mut out = Vec::new();
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&ppqn.to_be_bytes());
    if let Some(priority) = priority {
        out.extend_from_slice(PRIORITY_CHUNK);
        out.extend_from_slice(&1u32.to_be_bytes());
        out.push(priority);
    }
    out.extend_from_slice(b"MTrk");
    out.extend_from_slice(&(track.len() as u32).to_be_bytes());
    out.extend_from_slice(&track);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_running_status_meta_and_sysex() {
        let data = build_smf(
            96,
            Some(40),
            &[
                (0, vec![0x90, 60, 100]),
                (48, vec![62, 90]),
                (0, vec![0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]),
                (48, vec![0xF0, 0x03, 0x7D, 0x40, 0xF7]),
                (0, vec![0xC1, 5]),
            ],
        );
        let sequence = MidiSequence::parse(&data).unwrap();
        assert_eq!(sequence.ppqn, 96);
        assert_eq!(sequence.priority, 40);
        assert_eq!(
            sequence.events[1],
            TimedEvent {
                tick: 48,
                event: MidiEvent::Channel {
                    status: 0x90,
                    data1: 62,
                    data2: 90
                }
            }
        );
        assert_eq!(sequence.events[2].event, MidiEvent::Tempo(500_000));
        assert_eq!(sequence.events[3].event, MidiEvent::SysEx(vec![0x7D, 0x40]));
        assert_eq!(
            sequence.events[4].event,
            MidiEvent::Channel {
                status: 0xC1,
                data1: 5,
                data2: 0
            }
        );
        assert_eq!(sequence.events.last().unwrap().event, MidiEvent::EndOfTrack);
        assert_eq!(sequence.length_ticks(), 96);
        assert_eq!(sequence.position_of(48), 1);
    }

    #[test]
    fn defaults_priority_and_rejects_garbage() {
        let sequence = MidiSequence::parse(&build_smf(24, None, &[])).unwrap();
        assert_eq!(sequence.priority, DEFAULT_PRIORITY);
        assert!(MidiSequence::parse(b"RIFF....").is_err());
        assert!(MidiSequence::parse(&build_smf(24, None, &[(0, vec![60, 1])])).is_err());
    }
}

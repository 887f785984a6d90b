//! External-data (`.ext`) tables: large payloads kept beside a program.

use anyhow::{Context, Result, ensure};

use crate::lz;
use crate::reader::ByteReader;

const ITEM_SIZE: usize = 10;
const PACKED_FLAG: u16 = 0x8000;
const LARGE_FLAG: u16 = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtItem {
    pub offset: i32,
    pub size: u32,
    pub width: u16,
    pub height: u16,
    pub packed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtTable {
    data_start: usize,
    items: Vec<ExtItem>,
}

impl ExtTable {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let count = reader.i16_le().context("reading ext table count")?;
        ensure!(count >= 0, "negative ext item count {count}");
        reader.u8()?;

        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = reader.i32_le()?;
            let size = reader.u16_le()?;
            let raw_width = reader.u16_le()?;
            let height = reader.u16_le()?;

            let mut size = u32::from(size);
            if raw_width & LARGE_FLAG != 0 {
                size += 0x10000;
            }
            items.push(ExtItem {
                offset,
                size,
                width: raw_width & !(PACKED_FLAG | LARGE_FLAG),
                height,
                packed: raw_width & PACKED_FLAG != 0,
            });
        }

        Ok(ExtTable {
            data_start: 3 + items.len() * ITEM_SIZE,
            items,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, id: usize) -> Option<&ExtItem> {
        self.items.get(id)
    }

    /// Payload of item `id`, unpacked when flagged.
    pub fn load(&self, data: &[u8], id: usize) -> Result<Vec<u8>> {
        let item = self
            .items
            .get(id)
            .with_context(|| format!("ext item {id} out of range ({} items)", self.items.len()))?;
        ensure!(item.offset >= 0, "ext item {id} has negative offset {}", item.offset);

        let start = self.data_start + item.offset as usize;
        if item.packed {
            let packed = data
                .get(start..)
                .with_context(|| format!("ext item {id} starts beyond the file"))?;
            return lz::unpack(packed).with_context(|| format!("unpacking ext item {id}"));
        }

        let end = start + item.size as usize;
        let bytes = data
            .get(start..end)
            .with_context(|| format!("ext item {id} ({start}..{end}) extends beyond the file"))?;
        Ok(bytes.to_vec())
    }
}

/// Builds `.ext` bytes from payloads; used by fixtures.
pub fn build_ext(payloads: &[(&[u8], bool)]) -> Result<Vec<u8>> {
    let count = i16::try_from(payloads.len()).context("too many ext items")?;
    let mut table = Vec::new();
    table.extend_from_slice(&count.to_le_bytes());
    table.push(0);

    let mut blob = Vec::new();
    for (data, pack) in payloads {
        let stored = if *pack { lz::pack(data)? } else { data.to_vec() };
        let size = data.len();
        ensure!(size < 0x20000, "ext payload of {size} bytes is too large");
        let mut width = 0u16;
        if *pack {
            width |= PACKED_FLAG;
        }
        if size >= 0x10000 {
            width |= LARGE_FLAG;
        }
        table.extend_from_slice(&(blob.len() as i32).to_le_bytes());
        table.extend_from_slice(&((size & 0xFFFF) as u16).to_le_bytes());
        table.extend_from_slice(&width.to_le_bytes());
        table.extend_from_slice(&0u16.to_le_bytes());
        blob.extend_from_slice(&stored);
    }
    table.extend_from_slice(&blob);
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_plain_and_packed_items() {
        let packed_source = vec![7u8; 100];
        let data = build_ext(&[(&b"plain"[..], false), (&packed_source[..], true)]).unwrap();
        let table = ExtTable::parse(&data).unwrap();
        assert_eq!(table.len(), 2);
        assert!(!table.item(0).unwrap().packed);
        assert!(table.item(1).unwrap().packed);
        assert_eq!(table.load(&data, 0).unwrap(), b"plain");
        assert_eq!(table.load(&data, 1).unwrap(), packed_source);
        assert!(table.load(&data, 2).is_err());
    }

    #[test]
    fn large_flag_extends_size() {
        let mut data = Vec::new();
        data.extend_from_slice(&1i16.to_le_bytes());
        data.push(0);
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&(LARGE_FLAG | 12).to_le_bytes());
        data.extend_from_slice(&3u16.to_le_bytes());
        let table = ExtTable::parse(&data).unwrap();
        let item = table.item(0).unwrap();
        assert_eq!(item.size, 0x10004);
        assert_eq!(item.width, 12);
        assert!(table.load(&data, 0).is_err());
    }
}

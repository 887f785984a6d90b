//! Program (TOT) blob header and the tables it points at.

use std::ops::Range;

use anyhow::{Context, Result, ensure};

use crate::reader::{ByteReader, read_u16_le_at, read_u32_le_at};

pub const VARIABLE_COUNT_OFFSET: usize = 0x2C;
pub const TEXT_TABLE_OFFSET: usize = 0x30;
pub const RESOURCE_TABLE_OFFSET: usize = 0x34;
pub const ANIM_DATA_SIZE_OFFSET: usize = 0x38;
pub const EXT_SUFFIX_OFFSET: usize = 0x3B;
pub const ENTRY_POINT_OFFSET: usize = 0x64;
pub const FUNCTION_TABLE_OFFSET: usize = 0x68;
pub const HEADER_SIZE: usize = FUNCTION_TABLE_OFFSET;

const ABSENT: u32 = 0xFFFF_FFFF;
const RESOURCE_ITEM_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotHeader {
    pub variable_count: u32,
    pub text_table: Option<u32>,
    pub resource_table: Option<u32>,
    pub anim_data_size: u16,
    /// Raw bytes at +0x3B, +0x3C and +0x3D.
    pub ext_suffix: [u8; 3],
    pub entry_point: u32,
}

impl TotHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() >= HEADER_SIZE,
            "program blob of {} bytes is shorter than its {HEADER_SIZE} byte header",
            data.len()
        );

        let optional = |offset| -> Result<Option<u32>> {
            let value = read_u32_le_at(data, offset)?;
            Ok((value != ABSENT).then_some(value))
        };

        let entry_point = read_u32_le_at(data, ENTRY_POINT_OFFSET)?;
        ensure!(
            (entry_point as usize) < data.len(),
            "entry point {entry_point:#x} lies outside the {} byte program",
            data.len()
        );

        Ok(TotHeader {
            variable_count: read_u32_le_at(data, VARIABLE_COUNT_OFFSET)?,
            text_table: optional(TEXT_TABLE_OFFSET)?,
            resource_table: optional(RESOURCE_TABLE_OFFSET)?,
            anim_data_size: read_u16_le_at(data, ANIM_DATA_SIZE_OFFSET)?,
            ext_suffix: [
                data[EXT_SUFFIX_OFFSET],
                data[EXT_SUFFIX_OFFSET + 1],
                data[EXT_SUFFIX_OFFSET + 2],
            ],
            entry_point,
        })
    }

    /// Name of the image blob paired with `program` (`INTRO.TOT` -> `INTRO.IMA`).
    pub fn image_file_name(&self, program: &str) -> String {
        match self.ext_suffix[2] {
            0 => replace_extension(program, "ima"),
            digit => format!("commun.im{}", char::from(b'0' + digit % 10)),
        }
    }

    /// Name of the external-data table paired with `program`.
    pub fn ext_file_name(&self, program: &str) -> String {
        match self.ext_suffix[1] {
            0 => replace_extension(program, "ext"),
            digit => format!("commun.ex{}", char::from(b'0' + digit % 10)),
        }
    }
}

pub fn replace_extension(name: &str, extension: &str) -> String {
    let stem = match name.rfind('.') {
        Some(dot) => &name[..dot],
        None => name,
    };
    format!("{stem}.{extension}")
}

/// Offset stored in slot `index` (1-based) of the function table.
pub fn function_offset(data: &[u8], index: u16) -> Result<u32> {
    ensure!(index > 0, "function table slots start at 1");
    let at = FUNCTION_TABLE_OFFSET + 2 * (index as usize - 1);
    let offset = read_u16_le_at(data, at)
        .with_context(|| format!("reading function table slot {index}"))?;
    Ok(u32::from(offset))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextItem {
    pub offset: u16,
    pub size: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextTable {
    base: usize,
    items: Vec<TextItem>,
}

impl TextTable {
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        let base = offset as usize;
        let mut reader = ByteReader::at(data, base);
        let count = reader
            .u16_le()
            .with_context(|| format!("reading text table count at {base:#x}"))?;
        let mut items = Vec::with_capacity(count as usize);
        for index in 0..count {
            let item = TextItem {
                offset: reader.u16_le()?,
                size: reader.u16_le()?,
            };
            ensure!(
                base + item.offset as usize + item.size as usize <= data.len(),
                "text item {index} extends beyond the program"
            );
            items.push(item);
        }
        Ok(TextTable { base, items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[TextItem] {
        &self.items
    }

    pub fn range(&self, id: usize) -> Option<Range<usize>> {
        let item = self.items.get(id)?;
        let start = self.base + item.offset as usize;
        Some(start..start + item.size as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceItem {
    pub offset: i32,
    pub size: u16,
    pub width: u16,
    pub height: u16,
}

/// Where a resource payload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLocation {
    Program(Range<usize>),
    Image(Range<usize>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTable {
    data_start: usize,
    items: Vec<ResourceItem>,
}

impl ResourceTable {
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        let base = offset as usize;
        let mut reader = ByteReader::at(data, base);
        let count = reader
            .i16_le()
            .with_context(|| format!("reading resource table count at {base:#x}"))?;
        ensure!(count >= 0, "negative resource count {count}");
        reader.u8()?;

        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(ResourceItem {
                offset: reader.i32_le()?,
                size: reader.u16_le()?,
                width: reader.u16_le()?,
                height: reader.u16_le()?,
            });
        }
        debug_assert_eq!(
            reader.position(),
            base + 3 + items.len() * RESOURCE_ITEM_SIZE
        );

        Ok(ResourceTable {
            data_start: reader.position(),
            items,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, id: usize) -> Option<&ResourceItem> {
        self.items.get(id)
    }

    pub fn location(&self, id: usize) -> Option<ResourceLocation> {
        let item = self.items.get(id)?;
        let size = item.size as usize;
        if item.offset < 0 {
            let start = (-(item.offset as i64) - 1) as usize;
            Some(ResourceLocation::Image(start..start + size))
        } else {
            let start = self.data_start + item.offset as usize;
            Some(ResourceLocation::Program(start..start + size))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal program: header, a text table with one item, a resource table
    /// with two items (one in the program, one in the image blob).
    pub(crate) fn sample_program() -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[VARIABLE_COUNT_OFFSET..VARIABLE_COUNT_OFFSET + 4].copy_from_slice(&32u32.to_le_bytes());
        data[ANIM_DATA_SIZE_OFFSET..ANIM_DATA_SIZE_OFFSET + 2].copy_from_slice(&7u16.to_le_bytes());
        data[EXT_SUFFIX_OFFSET + 2] = 2;

        let text_at = data.len() as u32;
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&6u16.to_le_bytes());
        data.extend_from_slice(&5u16.to_le_bytes());
        data.extend_from_slice(b"hello");

        let res_at = data.len() as u32;
        data.extend_from_slice(&2i16.to_le_bytes());
        data.push(0);
        for (offset, size) in [(0i32, 3u16), (-5, 4)] {
            data.extend_from_slice(&offset.to_le_bytes());
            data.extend_from_slice(&size.to_le_bytes());
            data.extend_from_slice(&16u16.to_le_bytes());
            data.extend_from_slice(&8u16.to_le_bytes());
        }
        data.extend_from_slice(b"RES");

        let entry = data.len() as u32;
        data.push(0);

        data[TEXT_TABLE_OFFSET..TEXT_TABLE_OFFSET + 4].copy_from_slice(&text_at.to_le_bytes());
        data[RESOURCE_TABLE_OFFSET..RESOURCE_TABLE_OFFSET + 4].copy_from_slice(&res_at.to_le_bytes());
        data[ENTRY_POINT_OFFSET..ENTRY_POINT_OFFSET + 4].copy_from_slice(&entry.to_le_bytes());
        data
    }

    #[test]
    fn parses_header_and_tables() {
        let data = sample_program();
        let header = TotHeader::parse(&data).unwrap();
        assert_eq!(header.variable_count, 32);
        assert_eq!(header.anim_data_size, 7);
        assert_eq!(header.entry_point as usize, data.len() - 1);

        let text = TextTable::parse(&data, header.text_table.unwrap()).unwrap();
        assert_eq!(text.len(), 1);
        assert_eq!(&data[text.range(0).unwrap()], b"hello");

        let res = ResourceTable::parse(&data, header.resource_table.unwrap()).unwrap();
        assert_eq!(res.len(), 2);
        match res.location(0).unwrap() {
            ResourceLocation::Program(range) => assert_eq!(&data[range], b"RES"),
            other => panic!("unexpected location {other:?}"),
        }
        assert_eq!(res.location(1), Some(ResourceLocation::Image(4..8)));
        assert_eq!(res.item(1).unwrap().width, 16);
    }

    #[test]
    fn sentinel_marks_absent_tables() {
        let mut data = sample_program();
        data[TEXT_TABLE_OFFSET..TEXT_TABLE_OFFSET + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let header = TotHeader::parse(&data).unwrap();
        assert_eq!(header.text_table, None);
        assert!(header.resource_table.is_some());
    }

    #[test]
    fn companion_file_names() {
        let header = TotHeader::parse(&sample_program()).unwrap();
        assert_eq!(header.image_file_name("INTRO.TOT"), "commun.im2");
        assert_eq!(header.ext_file_name("INTRO.TOT"), "INTRO.ext");
        assert_eq!(replace_extension("noext", "tot"), "noext.tot");
    }

    #[test]
    fn rejects_short_or_inconsistent_blobs() {
        assert!(TotHeader::parse(&[0u8; 0x20]).is_err());
        let mut data = sample_program();
        data[ENTRY_POINT_OFFSET..ENTRY_POINT_OFFSET + 4].copy_from_slice(&0x10000u32.to_le_bytes());
        assert!(TotHeader::parse(&data).is_err());
        assert!(function_offset(&data, 0).is_err());
    }
}

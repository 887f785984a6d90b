use std::borrow::Cow;
use std::fs::File;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail, ensure};
use memmap2::{Mmap, MmapOptions};
use serde::Serialize;

use crate::lz;
use crate::reader::{ByteReader, fixed_name};

pub const NAME_LEN: usize = 13;
const ENTRY_SIZE: usize = NAME_LEN + 4 + 4 + 1;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StkEntry {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub packed: bool,
}

impl StkEntry {
    pub fn data_range(&self) -> Range<usize> {
        let start = self.offset as usize;
        let end = start + self.size as usize;
        start..end
    }
}

#[derive(Debug)]
enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(mmap) => mmap,
            Backing::Owned(bytes) => bytes,
        }
    }
}

/// Count-prefixed archive of fixed-size entries. An optional XOR key is
/// applied to every payload byte read through the handle.
#[derive(Debug)]
pub struct StkArchive {
    path: Option<PathBuf>,
    backing: Backing,
    entries: Vec<StkEntry>,
    xor_key: Option<u8>,
}

impl StkArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let file = File::open(&path_buf)
            .with_context(|| format!("opening archive at {}", path_buf.display()))?;
        let mmap = unsafe { MmapOptions::new().map(&file) }
            .with_context(|| format!("memory-mapping archive {}", path_buf.display()))?;

        let entries = parse_entries(&mmap)
            .with_context(|| format!("parsing archive {}", path_buf.display()))?;

        Ok(StkArchive {
            path: Some(path_buf),
            backing: Backing::Mapped(mmap),
            entries,
            xor_key: None,
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let entries = parse_entries(&bytes).context("parsing in-memory archive")?;
        Ok(StkArchive {
            path: None,
            backing: Backing::Owned(bytes),
            entries,
            xor_key: None,
        })
    }

    pub fn with_xor_key(mut self, key: Option<u8>) -> Self {
        self.xor_key = key;
        self
    }

    pub fn xor_key(&self) -> Option<u8> {
        self.xor_key
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[StkEntry] {
        &self.entries
    }

    pub fn find_entry(&self, name: &str) -> Option<&StkEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    /// Stored bytes of an entry (deciphered, still packed).
    pub fn raw_entry_bytes(&self, entry: &StkEntry) -> Cow<'_, [u8]> {
        let bytes = &self.backing.bytes()[entry.data_range()];
        match self.xor_key {
            Some(key) => Cow::Owned(bytes.iter().map(|b| b ^ key).collect()),
            None => Cow::Borrowed(bytes),
        }
    }

    /// Entry payload, unpacked when the entry is flagged as packed.
    pub fn read_entry(&self, entry: &StkEntry) -> Result<Vec<u8>> {
        let raw = self.raw_entry_bytes(entry);
        lz::maybe_unpack(&raw, entry.packed)
            .with_context(|| format!("unpacking archive entry {}", entry.name))
    }

    /// Byte range inside an unpacked entry payload.
    pub fn read_range(&self, entry: &StkEntry, offset: usize, len: usize) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| anyhow!("range overflow reading {}", entry.name))?;
        if entry.packed {
            let data = self.read_entry(entry)?;
            ensure!(
                end <= data.len(),
                "range {offset}..{end} outside {} ({} bytes)",
                entry.name,
                data.len()
            );
            return Ok(data[offset..end].to_vec());
        }
        ensure!(
            end <= entry.size as usize,
            "range {offset}..{end} outside {} ({} bytes)",
            entry.name,
            entry.size
        );
        let raw = self.raw_entry_bytes(entry);
        Ok(raw[offset..end].to_vec())
    }

    pub fn extract_entry<P: AsRef<Path>>(&self, entry: &StkEntry, dest: P) -> Result<()> {
        let bytes = self.read_entry(entry)?;
        let mut file = File::create(dest.as_ref())
            .with_context(|| format!("creating {}", dest.as_ref().display()))?;
        file.write_all(&bytes)
            .with_context(|| format!("writing {}", dest.as_ref().display()))?;
        Ok(())
    }
}

fn parse_entries(data: &[u8]) -> Result<Vec<StkEntry>> {
    let mut reader = ByteReader::new(data);
    let count = reader.u16_le().context("archive too small to hold an entry count")? as usize;

    let table_end = 2 + count
        .checked_mul(ENTRY_SIZE)
        .ok_or_else(|| anyhow!("archive entry count overflow"))?;
    ensure!(
        table_end <= data.len(),
        "archive truncated inside its entry table ({count} entries)"
    );

    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let name = fixed_name(reader.bytes(NAME_LEN)?);
        let size = reader.u32_le()?;
        let offset = reader.u32_le()?;
        let packed = reader.u8()? != 0;

        ensure!(!name.is_empty(), "archive entry {index} has an empty name");
        let end = (offset as usize)
            .checked_add(size as usize)
            .ok_or_else(|| anyhow!("archive entry {index} size overflow"))?;
        ensure!(
            end <= data.len(),
            "archive entry {index} ({name}) extends beyond the archive"
        );

        entries.push(StkEntry {
            name,
            offset,
            size,
            packed,
        });
    }

    Ok(entries)
}

/// Input for `build_archive`.
#[derive(Debug, Clone)]
pub struct StkSource<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    pub pack: bool,
}

/// Serialises entries into archive bytes, packing payloads on request and
/// XOR-ing every payload byte with `xor_key`.
pub fn build_archive(sources: &[StkSource<'_>], xor_key: Option<u8>) -> Result<Vec<u8>> {
    let count = u16::try_from(sources.len()).context("too many archive entries")?;
    let mut payloads = Vec::with_capacity(sources.len());
    for source in sources {
        if source.name.len() >= NAME_LEN {
            bail!("archive entry name {:?} exceeds 12 characters", source.name);
        }
        let mut payload = if source.pack {
            lz::pack(source.data)?
        } else {
            source.data.to_vec()
        };
        if let Some(key) = xor_key {
            payload.iter_mut().for_each(|b| *b ^= key);
        }
        payloads.push(payload);
    }

    let mut out = Vec::new();
    out.extend_from_slice(&count.to_le_bytes());
    let mut offset = 2 + sources.len() * ENTRY_SIZE;
    for (source, payload) in sources.iter().zip(&payloads) {
        let mut name = [0u8; NAME_LEN];
        name[..source.name.len()].copy_from_slice(source.name.as_bytes());
        out.extend_from_slice(&name);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        out.push(u8::from(source.pack));
        offset += payload.len();
    }
    for payload in payloads {
        out.extend_from_slice(&payload);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn sample_archive(xor_key: Option<u8>) -> Vec<u8> {
        build_archive(
            &[
                StkSource {
                    name: "INTRO.TOT",
                    data: b"program bytes",
                    pack: false,
                },
                StkSource {
                    name: "intro.ext",
                    data: &[0x41; 64],
                    pack: true,
                },
            ],
            xor_key,
        )
        .unwrap()
    }

    #[test]
    fn parses_hand_built_archive() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_le_bytes());
        let mut name = [0u8; NAME_LEN];
        name[..8].copy_from_slice(b"DEMO.SND");
        data.extend_from_slice(&name);
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&24u32.to_le_bytes());
        data.push(0);
        assert_eq!(data.len(), 24);
        data.extend_from_slice(b"ABCD");

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();

        let archive = StkArchive::open(file.path()).unwrap();
        assert_eq!(archive.entries().len(), 1);
        let entry = archive.find_entry("demo.snd").unwrap();
        assert_eq!(entry.offset, 24);
        assert_eq!(entry.size, 4);
        assert!(!entry.packed);
        assert_eq!(archive.read_entry(entry).unwrap(), b"ABCD");
        assert_eq!(archive.read_range(entry, 1, 2).unwrap(), b"BC");
        assert!(archive.read_range(entry, 3, 2).is_err());
    }

    #[test]
    fn unpacks_and_deciphers_entries() {
        let archive = StkArchive::from_bytes(sample_archive(Some(0x5A)))
            .unwrap()
            .with_xor_key(Some(0x5A));
        let tot = archive.find_entry("intro.tot").unwrap();
        assert_eq!(archive.read_entry(tot).unwrap(), b"program bytes");
        let ext = archive.find_entry("INTRO.EXT").unwrap();
        assert!(ext.packed);
        assert!(ext.size < 64);
        assert_eq!(archive.read_entry(ext).unwrap(), vec![0x41; 64]);
        assert_eq!(archive.read_range(ext, 60, 4).unwrap(), vec![0x41; 4]);
    }

    #[test]
    fn wrong_key_garbles_payload() {
        let archive = StkArchive::from_bytes(sample_archive(Some(0x5A))).unwrap();
        let tot = archive.find_entry("INTRO.TOT").unwrap();
        assert_ne!(archive.read_entry(tot).unwrap(), b"program bytes");
    }

    #[test]
    fn rejects_truncated_tables() {
        let mut data = sample_archive(None);
        data.truncate(10);
        assert!(StkArchive::from_bytes(data).is_err());
        assert!(StkArchive::from_bytes(vec![1]).is_err());
    }
}

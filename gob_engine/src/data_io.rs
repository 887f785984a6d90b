use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use gob_formats::StkArchive;
use log::{debug, warn};

/// Loose files in a data directory plus any number of archives. Loose files
/// win; archives are searched in registration order.
#[derive(Debug, Default)]
pub struct DataCollection {
    root: Option<PathBuf>,
    archives: Vec<StkArchive>,
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("stk") || ext.eq_ignore_ascii_case("itk"))
        .unwrap_or(false)
}

impl DataCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }

        let mut archives: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("reading data directory {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_archive(path))
            .collect();
        archives.sort();

        let mut collection = DataCollection {
            root: Some(dir.to_path_buf()),
            archives: Vec::new(),
        };
        for path in archives {
            match StkArchive::open(&path) {
                Ok(archive) => collection.archives.push(archive),
                Err(err) => warn!("failed to open {}: {err:?}", path.display()),
            }
        }
        Ok(collection)
    }

    pub fn add_archive(&mut self, archive: StkArchive) {
        self.archives.push(archive);
    }

    pub fn open_archive<P: AsRef<Path>>(&mut self, path: P, xor_key: Option<u8>) -> Result<()> {
        let archive = StkArchive::open(path)?.with_xor_key(xor_key);
        self.archives.push(archive);
        Ok(())
    }

    pub fn archive_count(&self) -> usize {
        self.archives.len()
    }

    fn loose_path(&self, name: &str) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let direct = root.join(name);
        if direct.is_file() {
            return Some(direct);
        }
        fs::read_dir(root)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|file| file.to_str())
                        .map(|file| file.eq_ignore_ascii_case(name))
                        .unwrap_or(false)
            })
    }

    pub fn exists(&self, name: &str) -> bool {
        self.loose_path(name).is_some()
            || self
                .archives
                .iter()
                .any(|archive| archive.find_entry(name).is_some())
    }

    /// Whole (unpacked) contents of `name`, or `None` when nothing carries it.
    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if let Some(path) = self.loose_path(name) {
            let bytes =
                fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            return Ok(Some(bytes));
        }
        for archive in &self.archives {
            if let Some(entry) = archive.find_entry(name) {
                debug!("{name}: {} bytes from archive", entry.size);
                return archive.read_entry(entry).map(Some);
            }
        }
        Ok(None)
    }
}

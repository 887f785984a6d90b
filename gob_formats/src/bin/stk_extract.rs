use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use gob_formats::{StkArchive, StkEntry};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(about = "Unpack the files stored in STK/ITK archives", version)]
struct Args {
    /// Archives, or game directories whose archives should all be unpacked
    #[arg(value_name = "PATH", required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory; each archive gets a subdirectory named after it
    #[arg(short, long, value_name = "DIR", default_value = "extracted")]
    out: PathBuf,

    /// DOS-style name patterns to keep, e.g. `*.TOT` or `INTRO?.*`
    #[arg(short, long = "name", value_name = "PATTERN")]
    names: Vec<String>,

    /// Write packed entries as stored instead of decompressing them
    #[arg(long)]
    raw: bool,

    /// Single-byte XOR key applied to every payload (hex, e.g. 0x5A)
    #[arg(long, value_name = "HEX", value_parser = parse_hex_byte)]
    xor: Option<u8>,

    /// Replace files that already exist
    #[arg(long)]
    overwrite: bool,
}

fn parse_hex_byte(value: &str) -> Result<u8, String> {
    u8::from_str_radix(value.trim_start_matches("0x"), 16).map_err(|err| err.to_string())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Tally {
    written: usize,
    unpacked: usize,
    skipped: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let archives = collect_archives(&args.inputs)?;
    if archives.is_empty() {
        bail!("no STK or ITK archives found");
    }

    for path in archives {
        let archive = StkArchive::open(&path)
            .with_context(|| format!("opening {}", path.display()))?
            .with_xor_key(args.xor);
        let dest = args.out.join(archive_dir_name(&path));
        let tally = extract(&archive, &dest, &args)?;
        println!(
            "{}: {} written ({} unpacked), {} skipped -> {}",
            path.display(),
            tally.written,
            tally.unpacked,
            tally.skipped,
            dest.display()
        );
    }
    Ok(())
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("stk") || ext.eq_ignore_ascii_case("itk"))
}

/// Files are taken as given; directories contribute the archives directly
/// inside them, as a game's data directory keeps them.
fn collect_archives(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            archives.push(input.clone());
            continue;
        }
        for entry in WalkDir::new(input).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("scanning {}", input.display()))?;
            if entry.file_type().is_file() && is_archive(entry.path()) {
                archives.push(entry.into_path());
            }
        }
    }
    archives.sort();
    archives.dedup();
    Ok(archives)
}

fn archive_dir_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("archive")
        .to_ascii_uppercase()
}

/// Matches an 8.3 name against a DOS wildcard pattern, ignoring case.
/// `*` spans any run of characters, `?` exactly one.
fn matches_pattern(pattern: &str, name: &str) -> bool {
    let pattern: Vec<u8> = pattern.bytes().map(|b| b.to_ascii_uppercase()).collect();
    let name: Vec<u8> = name.bytes().map(|b| b.to_ascii_uppercase()).collect();
    let (mut p, mut n) = (0, 0);
    let mut backtrack = None;
    while n < name.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == b'?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, from)) => {
                    p = star + 1;
                    n = from + 1;
                    backtrack = Some((star, from + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

fn selected(entry: &StkEntry, patterns: &[String]) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| matches_pattern(p, &entry.name))
}

fn extract(archive: &StkArchive, dest: &Path, args: &Args) -> Result<Tally> {
    fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;
    let mut tally = Tally::default();
    for entry in archive.entries().iter().filter(|e| selected(e, &args.names)) {
        // Stored names are flat; separators would escape the output directory.
        let path = dest.join(entry.name.replace(['\\', '/'], "_"));
        if path.exists() && !args.overwrite {
            tally.skipped += 1;
            continue;
        }
        if args.raw {
            fs::write(&path, archive.raw_entry_bytes(entry))
                .with_context(|| format!("writing {}", path.display()))?;
        } else {
            archive
                .extract_entry(entry, &path)
                .with_context(|| format!("unpacking {}", entry.name))?;
            if entry.packed {
                tally.unpacked += 1;
            }
        }
        tally.written += 1;
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gob_formats::stk::{StkSource, build_archive};
    use tempfile::tempdir;

    fn args(out: &Path, extra: &[&str]) -> Args {
        let mut argv = vec!["stk_extract", "game.stk", "--out"];
        argv.push(out.to_str().unwrap());
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    fn archive() -> StkArchive {
        let text = b"a packed program body, a packed program body".repeat(4);
        let sources = [
            StkSource {
                name: "INTRO.TOT",
                data: &text,
                pack: true,
            },
            StkSource {
                name: "INTRO.EXT",
                data: b"ext",
                pack: false,
            },
            StkSource {
                name: "MUSIC.ADL",
                data: b"adl",
                pack: false,
            },
        ];
        StkArchive::from_bytes(build_archive(&sources, None).unwrap()).unwrap()
    }

    #[test]
    fn dos_wildcards_ignore_case() {
        assert!(matches_pattern("*.tot", "INTRO.TOT"));
        assert!(matches_pattern("INTRO.*", "intro.ext"));
        assert!(matches_pattern("INTR?.TOT", "INTRO.TOT"));
        assert!(matches_pattern("*", "MUSIC.ADL"));
        assert!(matches_pattern("*O*.T*", "INTRO.TOT"));
        assert!(!matches_pattern("*.TOT", "INTRO.EXT"));
        assert!(!matches_pattern("INTR?.TOT", "INT.TOT"));
        assert!(!matches_pattern("MUSIC", "MUSIC.ADL"));
    }

    #[test]
    fn unpacks_only_the_matching_entries() {
        let dir = tempdir().unwrap();
        let archive = archive();
        let tally = extract(&archive, dir.path(), &args(dir.path(), &["-n", "intro.*"])).unwrap();

        assert_eq!(
            tally,
            Tally {
                written: 2,
                unpacked: 1,
                skipped: 0
            }
        );
        let body = fs::read(dir.path().join("INTRO.TOT")).unwrap();
        assert_eq!(body, b"a packed program body, a packed program body".repeat(4));
        assert!(!dir.path().join("MUSIC.ADL").exists());
    }

    #[test]
    fn raw_mode_keeps_stored_bytes_and_existing_files_are_skipped() {
        let dir = tempdir().unwrap();
        let archive = archive();
        let entry = archive.find_entry("INTRO.TOT").unwrap();
        let raw = args(dir.path(), &["--raw", "--name", "*.TOT"]);

        extract(&archive, dir.path(), &raw).unwrap();
        let stored = fs::read(dir.path().join("INTRO.TOT")).unwrap();
        assert_eq!(stored, archive.raw_entry_bytes(entry).as_ref());

        let again = extract(&archive, dir.path(), &raw).unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(again.written, 0);
    }

    #[test]
    fn directories_contribute_their_archives() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("COMMUN.STK"), b"").unwrap();
        fs::write(dir.path().join("music.itk"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("OTHER.STK"), b"").unwrap();

        let found = collect_archives(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["COMMUN.STK", "music.itk"]);
        assert_eq!(archive_dir_name(&found[1]), "MUSIC");
    }
}

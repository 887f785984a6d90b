use std::env;

use anyhow::{Context, Result};
use gob_formats::StkArchive;

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let path = args
        .next()
        .context("usage: stk_dump <STK file> [--json] [--xor <key>]")?;
    let mut json = false;
    let mut xor_key = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--xor" => {
                let value = args.next().context("--xor expects a byte value")?;
                let key = u8::from_str_radix(value.trim_start_matches("0x"), 16)
                    .with_context(|| format!("parsing XOR key {value}"))?;
                xor_key = Some(key);
            }
            other => anyhow::bail!("unexpected argument {other}"),
        }
    }

    let archive = StkArchive::open(&path)?.with_xor_key(xor_key);
    if json {
        println!("{}", serde_json::to_string_pretty(archive.entries())?);
        return Ok(());
    }

    println!("{} entries in {}", archive.entries().len(), path);
    for entry in archive.entries() {
        println!(
            "{name:<13} {packed:<6} {offset:>10} {size:>10}",
            name = entry.name,
            packed = if entry.packed { "packed" } else { "-" },
            offset = entry.offset,
            size = entry.size
        );
    }
    Ok(())
}

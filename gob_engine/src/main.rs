use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use gob_engine::sound::AudioEvent;
use gob_engine::video::VideoEvent;
use gob_engine::{DataCollection, Interpreter, ScriptedHost};
use log::info;
use serde::Serialize;

mod cli;
use cli::Args;

#[derive(Serialize)]
struct EventLog<'a> {
    program: &'a str,
    terminate: gob_engine::Terminate,
    video: Vec<VideoEvent>,
    audio: Vec<AudioEvent>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    args.validate()?;
    let rules = args.game_rules()?;

    let mut files = match &args.data {
        Some(dir) => DataCollection::load_from_dir(dir)
            .with_context(|| format!("loading data from {}", dir.display()))?,
        None => DataCollection::new(),
    };
    for archive in &args.archives {
        files
            .open_archive(archive, None)
            .with_context(|| format!("opening archive {}", archive.display()))?;
    }
    info!(
        "{} archives, rules {:?}, starting {}",
        files.archive_count(),
        rules.version,
        args.program
    );

    let host = ScriptedHost::new().with_budget(args.max_ms);
    let mut interp = Interpreter::new(rules, files, Box::new(host));
    interp
        .run(&args.program)
        .with_context(|| format!("running {}", args.program))?;

    let log = EventLog {
        program: &args.program,
        terminate: interp.terminate(),
        video: interp.video_mut().take_events(),
        audio: interp.sound_mut().take_events(),
    };
    println!(
        "{}: {} video events, {} audio events, {:?}",
        args.program,
        log.video.len(),
        log.audio.len(),
        log.terminate
    );
    if let Some(path) = &args.events {
        let json = serde_json::to_string_pretty(&log).context("serializing event log")?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

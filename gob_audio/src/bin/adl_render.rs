use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use gob_audio::{AdLibPlayer, AudioStream, OplEmulator, RecordingOpl};

/// Render an AdLib (.ADL) track to a WAV file through the OPL2 emulator.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// ADL file to render
    adl: PathBuf,

    /// Output WAV path
    #[arg(long, default_value = "out.wav")]
    out: PathBuf,

    /// Output sample rate
    #[arg(long, default_value_t = 22050)]
    rate: u32,

    /// Extra passes through the track (-1 loops until --seconds runs out)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    repeat: i32,

    /// Upper bound on the rendered length
    #[arg(long, default_value_t = 120)]
    seconds: u32,

    /// Also write the OPL register writes as JSON
    #[arg(long)]
    events: Option<PathBuf>,
}

const CHUNK: usize = 1024;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let data = fs::read(&args.adl).with_context(|| format!("reading {}", args.adl.display()))?;

    let mut player = AdLibPlayer::new(OplEmulator::new(args.rate), args.rate);
    player
        .load(&data)
        .with_context(|| format!("loading {}", args.adl.display()))?;
    player.set_repeating(args.repeat);
    player.start_play();

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: args.rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args.out, spec)
        .with_context(|| format!("creating {}", args.out.display()))?;

    let limit = args.rate as usize * args.seconds as usize;
    let mut buffer = vec![0i16; CHUNK];
    let mut written = 0usize;
    while written < limit && !player.end_of_data() {
        let wanted = CHUNK.min(limit - written);
        let got = player.read_buffer(&mut buffer[..wanted]);
        for &sample in &buffer[..got] {
            writer.write_sample(sample)?;
        }
        written += got;
        if got == 0 {
            break;
        }
    }
    writer.finalize()?;
    println!(
        "wrote {} ({:.2}s at {} Hz)",
        args.out.display(),
        written as f64 / args.rate as f64,
        args.rate
    );

    if let Some(path) = args.events {
        let recording = RecordingOpl::new();
        let mut replay = AdLibPlayer::new(recording.clone(), args.rate);
        replay.load(&data)?;
        replay.set_repeating(0);
        replay.start_play();
        let mut rendered = 0usize;
        while rendered < limit && !replay.end_of_data() {
            rendered += replay.read_buffer(&mut buffer);
        }
        let json = serde_json::to_string_pretty(&recording.events())?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        println!("wrote register log {}", path.display());
    }
    Ok(())
}

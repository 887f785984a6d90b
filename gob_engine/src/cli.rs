use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use gob_engine::GameRules;

#[derive(Parser, Debug)]
#[command(about = "Headless runner for Gob-style game programs", version)]
pub struct Args {
    /// Directory holding archives and loose data files
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Extra archive to search after the data directory (repeatable)
    #[arg(long = "archive")]
    pub archives: Vec<PathBuf>,

    /// Program to start with
    #[arg(long, default_value = "intro")]
    pub program: String,

    /// JSON file overriding the game rules
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Built-in rules preset (v1 or v2)
    #[arg(long, default_value = "v1")]
    pub rules_preset: String,

    /// Stop after this much virtual time
    #[arg(long, default_value_t = 60_000)]
    pub max_ms: u32,

    /// Path to write the recorded video and audio events as JSON
    #[arg(long)]
    pub events: Option<PathBuf>,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.data.is_none() && self.archives.is_empty() {
            bail!("nothing to run: pass --data and/or --archive");
        }
        if self.rules.is_some() && self.rules_preset != "v1" {
            bail!("--rules and --rules-preset are mutually exclusive");
        }
        Ok(())
    }

    pub fn game_rules(&self) -> Result<GameRules> {
        match &self.rules {
            Some(path) => GameRules::from_json_file(path),
            None => GameRules::preset(&self.rules_preset)
                .with_context(|| format!("unknown rules preset {}", self.rules_preset)),
        }
    }
}

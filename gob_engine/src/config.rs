use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineVersion {
    V1,
    V2,
}

/// Everything that differs between engine revisions, chosen once at load
/// time instead of through per-version code paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameRules {
    pub version: EngineVersion,
    pub collision_capacity: usize,
    pub collision_stack_depth: usize,
    pub capture_stack_depth: usize,
    pub backup_depth: usize,
    pub sprite_slots: usize,
    pub sound_slots: usize,
    /// Scroll the viewport when the cursor nears the edge of an oversized
    /// surface.
    pub viewport_shift: bool,
    /// A click that hits nothing answers 0x11B (Escape) unless only the
    /// left button is down.
    pub escape_on_unmatched_click: bool,
    /// Busy objects draw after idle ones that share their order and bottom.
    pub busy_tiebreak: bool,
    pub output_rate: u32,
    pub frame_rate_ms: u32,
    pub screen_width: i16,
    pub screen_height: i16,
    pub random_seed: u64,
}

impl GameRules {
    pub fn v1() -> Self {
        GameRules {
            version: EngineVersion::V1,
            collision_capacity: 150,
            collision_stack_depth: 20,
            capture_stack_depth: 20,
            backup_depth: 5,
            sprite_slots: 50,
            sound_slots: 60,
            viewport_shift: false,
            escape_on_unmatched_click: true,
            busy_tiebreak: true,
            output_rate: 22050,
            frame_rate_ms: 80,
            screen_width: 320,
            screen_height: 200,
            random_seed: 0x5EED,
        }
    }

    pub fn v2() -> Self {
        GameRules {
            version: EngineVersion::V2,
            collision_capacity: 250,
            viewport_shift: true,
            ..GameRules::v1()
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "v1" => Some(GameRules::v1()),
            "v2" => Some(GameRules::v2()),
            _ => None,
        }
    }

    /// Missing fields fall back to the v1 preset.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read rules file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse rules json: {}", path.display()))
    }
}

impl Default for GameRules {
    fn default() -> Self {
        GameRules::v1()
    }
}

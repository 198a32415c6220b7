use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::Swing;
use crate::engine::Engine;
use crate::error::ConfigError;
use crate::sequence::Resolution;

pub const CONFIG_ENV: &str = "SLICEBEAT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "slicebeat.json";

/// Startup settings.  Every field is optional in the file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bpm: f64,
    pub swing: Swing,          // 50 / 60 / 70
    pub resolution: Resolution,
    pub bars: usize,
    pub beats_per_bar: usize,
    pub metronome: bool,
    pub drum_bank: usize,
    pub pitch_semitones: i32,
    pub master_gain: f32,
    pub sample: Option<PathBuf>,
    pub log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bpm: 90.0,
            swing: Swing::Straight,
            resolution: Resolution::ThirtySecond,
            bars: 4,
            beats_per_bar: 4,
            metronome: true,
            drum_bank: 0,
            pitch_semitones: 0,
            master_gain: 0.8,
            sample: None,
            log_file: PathBuf::from("slicebeat.log"),
        }
    }
}

impl Config {
    /// `$SLICEBEAT_CONFIG`, else `slicebeat.json` in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// A missing file is not an error: it yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Io { path: path.to_path_buf(), source }),
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Like [`load`](Self::load), but problems are logged and the defaults used.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!("{e}; using default settings");
            Self::default()
        })
    }

    /// Push every setting into the engine.  The engine clamps them.
    pub fn apply(&self, engine: &mut Engine) {
        engine.set_bpm(self.bpm);
        engine.set_swing(self.swing);
        engine.set_resolution(self.resolution);
        engine.set_beats_per_bar(self.beats_per_bar);
        engine.set_bars(self.bars);
        engine.set_metronome(self.metronome);
        engine.set_drum_bank(self.drum_bank);
        engine.set_pitch(self.pitch_semitones);
        engine.set_master_gain(self.master_gain);
    }
}

//! Run configuration.
//!
//! A JSON file supplies the defaults, command line flags override them:
//!
//! ```json
//! {
//!     "verbosity": 1,
//!     "scope_tree_mode": "batched",
//!     "own_tracks": true,
//!     "file_path": "/captures/game.capline",
//!     "frame_track_function_ids": [12, 40],
//!     "block_capacity": 4096
//! }
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::timer_store::DEFAULT_BLOCK_CAPACITY;
use crate::track::ScopeTreeMode;

fn default_own_tracks() -> bool {
    true
}

fn default_block_capacity() -> usize {
    DEFAULT_BLOCK_CAPACITY
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Log level, 0 is warnings only.
    #[serde(default)]
    pub verbosity: u8,
    /// Unset means streaming for live processing and batched for replays.
    #[serde(default)]
    pub scope_tree_mode: Option<ScopeTreeMode>,
    /// Whether timers are also kept in the core's own tracks.
    #[serde(default = "default_own_tracks")]
    pub own_tracks: bool,
    /// Capture file, reported to the listener with capture-started.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub frame_track_function_ids: BTreeSet<u64>,
    /// Timers in the first block of every depth chain.
    #[serde(default = "default_block_capacity")]
    pub block_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbosity: 0,
            scope_tree_mode: None,
            own_tracks: default_own_tracks(),
            file_path: None,
            frame_track_function_ids: BTreeSet::new(),
            block_capacity: default_block_capacity(),
        }
    }
}

impl Config {
    pub fn from_json(buf: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(buf)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let buf = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&buf).with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.block_capacity == 0 {
            bail!("block_capacity must be greater than 0");
        }
        Ok(())
    }
}

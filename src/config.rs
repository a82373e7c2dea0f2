//! Pipeline configuration with serde defaults and tolerant file loading.

use crate::schema::PhaseName;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PHASE_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_LISTING_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CYCLES: u32 = 3;
const DEFAULT_UID_FLOOR: u32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Setup/teardown repetitions for idempotency cycling (minimum 2 to
    /// compare anything).
    pub cycles: u32,
    /// Command names that must resolve on the environment before setup.
    pub required_tools: Vec<String>,
    /// Directories whose file trees are part of every snapshot; the first is
    /// the task's expected working directory.
    pub working_dirs: Vec<String>,
    /// Directories declared for solution artifacts, checked after teardown.
    pub solution_dirs: Vec<String>,
    /// Commands quoted in the exercise text, checked for shell syntax and
    /// tool availability.
    pub checked_commands: Vec<String>,
    /// Course CLI invoked for setup/teardown/solve/grade.
    pub lab_command: String,
    /// Phases whose failure aborts the rest of the pipeline.
    pub gating_phases: Vec<PhaseName>,
    pub phase_timeouts_ms: BTreeMap<PhaseName, u64>,
    pub command_timeout_ms: u64,
    pub capture: CaptureConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cycles: DEFAULT_CYCLES,
            required_tools: Vec::new(),
            working_dirs: Vec::new(),
            solution_dirs: Vec::new(),
            checked_commands: Vec::new(),
            lab_command: "lab".to_string(),
            gating_phases: vec![PhaseName::Prerequisites],
            phase_timeouts_ms: BTreeMap::new(),
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            capture: CaptureConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn phase_timeout(&self, phase: PhaseName) -> Duration {
        let ms = self
            .phase_timeouts_ms
            .get(&phase)
            .copied()
            .unwrap_or(DEFAULT_PHASE_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    pub fn is_gating(&self, phase: PhaseName) -> bool {
        self.gating_phases.contains(&phase)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parse config {}", path.display()))
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lab-verify").join("config.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Accounts at or above this UID count as observable users.
    pub uid_floor: u32,
    /// Default accounts ignored even above the UID floor.
    pub excluded_users: BTreeSet<String>,
    pub listing_timeout_ms: u64,
    pub include_containers: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let excluded_users = ["nobody", "nfsnobody"]
            .iter()
            .map(ToString::to_string)
            .collect();
        Self {
            uid_floor: DEFAULT_UID_FLOOR,
            excluded_users,
            listing_timeout_ms: DEFAULT_LISTING_TIMEOUT_MS,
            include_containers: false,
        }
    }
}

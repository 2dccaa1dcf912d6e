use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tunables for one VM instance and the execution contexts built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Branch ceiling before a script is considered runaway.
    pub max_loop_iterations: u32,
    pub recursion_limit: u32,
    /// Cooperative wall-clock budget per top-level entry, checked every 256 branches.
    pub time_limit_ms: Option<u64>,
    /// Per-object cap on logged access violations; 0 logs all of them.
    pub max_access_violation_warnings: u32,
    pub short_script_warnings: bool,
    pub stack_pool_capacity: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: 1_000_000,
            recursion_limit: 120,
            time_limit_ms: None,
            max_access_violation_warnings: 0,
            short_script_warnings: false,
            stack_pool_capacity: 64,
        }
    }
}

impl VmConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: VmConfig = toml::from_str(input).map_err(|e| anyhow!(e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: VmConfig = serde_json::from_str(input).map_err(|e| anyhow!(e))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&data),
            Some("json") => Self::from_json_str(&data),
            other => bail!("unsupported config format {:?} for {}", other, path.display()),
        }
        .with_context(|| format!("parse {}", path.display()))?;
        debug!(target: "bcvm::config", path = %path.display(), ?config, "loaded vm config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_loop_iterations == 0 {
            bail!("max_loop_iterations must be positive");
        }
        if self.recursion_limit == 0 {
            bail!("recursion_limit must be positive");
        }
        if self.time_limit_ms == Some(0) {
            bail!("time_limit_ms must be positive when set");
        }
        Ok(())
    }
}

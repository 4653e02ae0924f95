//! Project configuration stored under `.rover/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::task::DEFAULT_AGENT;
use crate::error::{Result, RoverError};
use crate::io::atomic::write_atomic;

/// Rover configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// values that work with the stock agent image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoverConfig {
    /// Agent used for new tasks unless `--agent` is given.
    pub agent: String,

    /// Append `attribution_trailer` to commits rover creates.
    pub attribution: bool,
    pub attribution_trailer: String,

    /// Container image the agent runs in.
    pub image: String,

    /// Command run inside the container. `{prompt}` is replaced with the
    /// in-container path of the iteration prompt.
    pub agent_command: Vec<String>,

    /// Non-interactive AI CLI used for titles, commit messages and conflict
    /// resolution. The prompt is passed on stdin.
    pub ai_command: Vec<String>,

    /// Timeout for git and AI subprocesses.
    pub command_timeout_secs: u64,

    /// Timeout for a whole agent run (container start to exit).
    pub agent_timeout_secs: u64,

    /// Truncate captured subprocess output beyond this many bytes.
    pub output_limit_bytes: usize,

    /// How many main-branch commit subjects to hand the AI as context.
    pub recent_commit_count: usize,
}

impl Default for RoverConfig {
    fn default() -> Self {
        Self {
            agent: DEFAULT_AGENT.to_string(),
            attribution: true,
            attribution_trailer: "Co-Authored-By: Rover <noreply@rover.local>".to_string(),
            image: "ghcr.io/rover-dev/agent:latest".to_string(),
            agent_command: vec![
                "rover-agent".to_string(),
                "run".to_string(),
                "--prompt".to_string(),
                "{prompt}".to_string(),
            ],
            ai_command: vec!["claude".to_string(), "-p".to_string()],
            command_timeout_secs: 120,
            agent_timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
            recent_commit_count: 10,
        }
    }
}

impl RoverConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.agent.trim().is_empty() {
            return Err("agent must not be empty".to_string());
        }
        if self.image.trim().is_empty() {
            return Err("image must not be empty".to_string());
        }
        if self.command_timeout_secs == 0 {
            return Err("command_timeout_secs must be > 0".to_string());
        }
        if self.agent_timeout_secs == 0 {
            return Err("agent_timeout_secs must be > 0".to_string());
        }
        if self.output_limit_bytes == 0 {
            return Err("output_limit_bytes must be > 0".to_string());
        }
        if is_blank_command(&self.agent_command) {
            return Err("agent_command must be a non-empty array".to_string());
        }
        if is_blank_command(&self.ai_command) {
            return Err("ai_command must be a non-empty array".to_string());
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// Trailer to append to commits, if attribution is enabled.
    pub fn trailer(&self) -> Option<&str> {
        (self.attribution && !self.attribution_trailer.trim().is_empty())
            .then_some(self.attribution_trailer.as_str())
    }
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RoverConfig::default()`.
pub fn load_config(path: &Path) -> Result<RoverConfig> {
    let invalid = |message: String| RoverError::Config {
        path: path.to_path_buf(),
        message,
    };
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = RoverConfig::default();
        cfg.validate().map_err(invalid)?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).map_err(|e| RoverError::file("read", path, e))?;
    let cfg: RoverConfig = toml::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
    cfg.validate().map_err(invalid)?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RoverConfig) -> Result<()> {
    let invalid = |message: String| RoverError::Config {
        path: path.to_path_buf(),
        message,
    };
    cfg.validate().map_err(invalid)?;
    let mut buf = toml::to_string_pretty(cfg).map_err(|e| invalid(e.to_string()))?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RoverConfig::default());
        assert_eq!(cfg.trailer(), Some("Co-Authored-By: Rover <noreply@rover.local>"));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = RoverConfig {
            agent: "codex".to_string(),
            attribution: false,
            ..RoverConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.trailer(), None);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "image = \"my/agent:dev\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.image, "my/agent:dev");
        assert_eq!(cfg.ai_command, vec!["claude", "-p"]);
    }

    #[test]
    fn rejects_invalid_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "command_timeout_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("command_timeout_secs"));

        fs::write(&path, "ai_command = []\n").expect("write");
        assert!(matches!(load_config(&path), Err(RoverError::Config { .. })));
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Name of the output to capture (e.g., DP-2)
    #[serde(default)]
    pub target_output: String,

    /// Composite the cursor into the frame
    #[serde(default)]
    pub overlay_cursor: bool,

    /// Where the PNG is written
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("output.png")
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_output: String::new(),
            overlay_cursor: false,
            output_path: default_output_path(),
        }
    }
}

impl CaptureConfig {
    /// Default config file path for this platform
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("org", "shotcopy", "shotcopy") {
            dirs.config_dir().join("config.json")
        } else {
            PathBuf::from("shotcopy.json")
        }
    }

    /// Load config from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&data).with_context(|| "failed to parse config JSON")?;
        Ok(config)
    }

    /// Save config to a file path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }
}

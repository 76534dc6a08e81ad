//! Panel configuration file

use anyhow::Context;
use kaleido_control::ControlConfig;
use kaleido_whep::StreamConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything the kiosk needs; missing sections and keys take defaults
///
/// ```toml
/// [stream]
/// stream_url = "https://stream.kaleido.cam/kaleido-01/kaleidoscope/whep"
/// max_attempts = 20
///
/// [control]
/// channel = "rest"
/// api_base_url = "http://kaleido.local:5000"
/// rate_limit = "throttle"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub stream: StreamConfig,
    pub control: ControlConfig,
}

impl PanelConfig {
    /// Read `path` as TOML, or use defaults when no file is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.stream.validate().context("Invalid [stream] config")?;
        self.control.validate().context("Invalid [control] config")?;
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

use super::error::OutputError;

/// Configuration for an output driver instance.
///
/// Supplied by the owner's configuration layer; fields missing from a JSON
/// document fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfiguration {
    /// Device identifier handed to the backend (default: `"default"`).
    pub device: String,

    /// First mixer element name (default: `"PCM"`).
    pub mixer_channel1: String,

    /// Second mixer element name (default: `"Master"`).
    pub mixer_channel2: String,
}

impl OutputConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.device.trim().is_empty() {
            return Err("device name must not be empty".into());
        }
        Ok(())
    }

    /// Parse a configuration document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, OutputError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OutputError::InvalidConfiguration(format!("failed to parse: {}", e)))?;
        config.validate().map_err(OutputError::InvalidConfiguration)?;
        Ok(config)
    }
}

impl Default for OutputConfiguration {
    fn default() -> Self {
        Self {
            device: "default".into(),
            mixer_channel1: "PCM".into(),
            mixer_channel2: "Master".into(),
        }
    }
}

use std::{ fs, path::Path, str::FromStr };

use serde::{ Deserialize, Serialize };

use crate::{ error::{ EvalError, Result }, utils::heatmap::HeatmapOptions };

/// Where tensors live during evaluation. Which variants are usable depends on the backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
    /// Fastest device the backend can find.
    #[default]
    Best,
}

impl FromStr for DeviceSpec {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(DeviceSpec::Cpu),
            "best" | "auto" => Ok(DeviceSpec::Best),
            "cuda" => Ok(DeviceSpec::Cuda(0)),
            other => {
                other
                    .strip_prefix("cuda:")
                    .and_then(|index| index.parse().ok())
                    .map(DeviceSpec::Cuda)
                    .ok_or_else(|| EvalError::Config(format!("unknown device '{s}'")))
            }
        }
    }
}

impl TryFrom<String> for DeviceSpec {
    type Error = EvalError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceSpec> for String {
    fn from(device: DeviceSpec) -> Self {
        match device {
            DeviceSpec::Cpu => "cpu".to_string(),
            DeviceSpec::Cuda(index) => format!("cuda:{index}"),
            DeviceSpec::Best => "best".to_string(),
        }
    }
}

/// Defaults read from a TOML file; command line flags take precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub num_classes: Option<usize>,
    pub batch_size: usize,
    pub device: DeviceSpec,
    pub verbose: bool,
    pub heatmap: HeatmapOptions,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            num_classes: None,
            batch_size: 1,
            device: DeviceSpec::Best,
            verbose: true,
            heatmap: HeatmapOptions::default(),
        }
    }
}

impl EvalConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| EvalError::Config(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| EvalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }
}

//! Accelerator settings, loaded from TOML.
//!
//! ```toml
//! [accelerator]
//! wave_width = 32
//! max_tile_len = 512
//! worker_threads = 4
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_WAVE_WIDTH, error::ConfigurationError};

/// Widest supported wave.
pub const MAX_WAVE_WIDTH: usize = 64;

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    accelerator: AcceleratorConfig,
}

/// Shape and limits of the emulated accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceleratorConfig {
    /// Lanes per wave. A power of two, at most 64.
    #[serde(default = "default_wave_width")]
    pub wave_width: usize,
    /// Most work-items a single tile may hold.
    #[serde(default = "default_max_tile_len")]
    pub max_tile_len: usize,
    /// Group memory available to one tile (static plus dynamic).
    #[serde(default = "default_max_group_memory_bytes")]
    pub max_group_memory_bytes: usize,
    /// Device memory budget shared by all live buffers.
    #[serde(default = "default_device_memory_bytes")]
    pub device_memory_bytes: usize,
    /// Tile dispatch threads. Defaults to the number of CPUs.
    #[serde(default)]
    pub worker_threads: Option<usize>,
    /// Stack size of each work-item thread.
    #[serde(default = "default_work_item_stack_bytes")]
    pub work_item_stack_bytes: usize,
    /// Bounds the work-item threads alive at once across concurrently running tiles.
    #[serde(default = "default_max_resident_work_items")]
    pub max_resident_work_items: usize,
    /// Count barrier arrivals and report divergent tiles.
    #[serde(default = "default_check_barriers")]
    pub check_barriers: bool,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            wave_width: default_wave_width(),
            max_tile_len: default_max_tile_len(),
            max_group_memory_bytes: default_max_group_memory_bytes(),
            device_memory_bytes: default_device_memory_bytes(),
            worker_threads: None,
            work_item_stack_bytes: default_work_item_stack_bytes(),
            max_resident_work_items: default_max_resident_work_items(),
            check_barriers: default_check_barriers(),
        }
    }
}

fn default_wave_width() -> usize {
    DEFAULT_WAVE_WIDTH
}

fn default_max_tile_len() -> usize {
    1024
}

fn default_max_group_memory_bytes() -> usize {
    64 * 1024
}

fn default_device_memory_bytes() -> usize {
    1 << 30
}

fn default_work_item_stack_bytes() -> usize {
    128 * 1024
}

fn default_max_resident_work_items() -> usize {
    1024
}

fn default_check_barriers() -> bool {
    cfg!(debug_assertions)
}

impl AcceleratorConfig {
    /// Load the `[accelerator]` table of a TOML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| LoadError::Io(path.as_ref().display().to_string(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, LoadError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| LoadError::Parse(e.to_string()))?;
        file.accelerator.validate()?;
        Ok(file.accelerator)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let w = self.wave_width;
        if w == 0 || w > MAX_WAVE_WIDTH || !w.is_power_of_two() {
            return Err(ConfigurationError::InvalidWaveWidth(w));
        }
        if self.max_tile_len == 0 {
            return Err(ConfigurationError::ZeroTile { dim: 0 });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn parse_config(toml_str: &str) -> Result<AcceleratorConfig, LoadError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tilegrid.toml");
        std::fs::write(&path, toml_str).unwrap();
        AcceleratorConfig::load(&path)
    }

    #[test]
    fn test_partial_table_keeps_defaults() {
        let config = parse_config(
            r#"
[accelerator]
wave_width = 32
worker_threads = 2
"#,
        )
        .unwrap();
        assert_eq!(config.wave_width, 32);
        assert_eq!(config.worker_threads, Some(2));
        assert_eq!(config.max_tile_len, 1024);
        assert_eq!(config.max_group_memory_bytes, 65536);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(parse_config("").unwrap(), AcceleratorConfig::default());
    }

    #[test]
    fn test_invalid_wave_width() {
        let err = parse_config("[accelerator]\nwave_width = 48\n").unwrap_err();
        assert!(matches!(
            err,
            LoadError::Invalid(ConfigurationError::InvalidWaveWidth(48))
        ));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_config("[accelerator]\nwave_width = \"wide\"\n").unwrap_err();
        assert!(matches!(err, LoadError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = AcceleratorConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, LoadError::Io(..)));
    }
}

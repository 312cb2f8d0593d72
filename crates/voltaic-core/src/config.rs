//! Tunables for the power model and the loader that reads them from disk.
//!
//! Config files may be RON, TOML or JSON; the format is picked from the
//! file extension. Every field has a default, so a file only needs to name
//! the values it overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading a [`PowerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The values parsed but cannot drive a simulation.
    #[error("invalid power config: {0}")]
    Invalid(String),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported config file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, ConfigError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(ConfigError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// PowerConfig
// ===========================================================================

/// Config files spell energy values as plain decimals, not raw Q32.32 bits.
mod fixed_as_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::fixed::{Fixed64, f64_to_fixed64, fixed64_to_f64};

    pub fn serialize<S: Serializer>(value: &Fixed64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(fixed64_to_f64(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fixed64, D::Error> {
        let value = f64::deserialize(deserializer)?;
        if !value.is_finite() {
            return Err(serde::de::Error::custom("energy values must be finite"));
        }
        Ok(f64_to_fixed64(value))
    }
}

fn default_low_throughput() -> Fixed64 {
    Fixed64::from_num(450_000)
}

fn default_high_throughput() -> Fixed64 {
    Fixed64::from_num(1_000_000_000)
}

fn default_distribution_passes() -> u32 {
    5
}

fn default_min_transfer() -> Fixed64 {
    Fixed64::ONE
}

fn default_stats_window() -> usize {
    10
}

/// Tunable constants of the distribution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerConfig {
    /// Max throughput of a low-tier (cable) connection, units per second.
    #[serde(default = "default_low_throughput", with = "fixed_as_f64")]
    pub low_throughput: Fixed64,
    /// Max throughput of a high-tier (pole) connection, units per second.
    #[serde(default = "default_high_throughput", with = "fixed_as_f64")]
    pub high_throughput: Fixed64,
    /// Passes the offered-power distribution makes over a priority tier.
    /// A fixed cap rather than a fixed point: the last pass sweeps whatever
    /// remains greedily.
    #[serde(default = "default_distribution_passes")]
    pub distribution_passes: u32,
    /// Stored-power transfers smaller than this are skipped.
    #[serde(default = "default_min_transfer", with = "fixed_as_f64")]
    pub min_transfer: Fixed64,
    /// Number of ticks in the telemetry rolling averages.
    #[serde(default = "default_stats_window")]
    pub stats_window: usize,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            low_throughput: default_low_throughput(),
            high_throughput: default_high_throughput(),
            distribution_passes: default_distribution_passes(),
            min_transfer: default_min_transfer(),
            stats_window: default_stats_window(),
        }
    }
}

impl PowerConfig {
    /// Check that the values can drive a simulation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.low_throughput <= Fixed64::ZERO {
            return Err(ConfigError::Invalid("low_throughput must be positive".into()));
        }
        if self.high_throughput < self.low_throughput {
            return Err(ConfigError::Invalid(
                "high_throughput must not be below low_throughput".into(),
            ));
        }
        if self.distribution_passes == 0 {
            return Err(ConfigError::Invalid(
                "distribution_passes must be at least 1".into(),
            ));
        }
        if self.min_transfer < Fixed64::ZERO {
            return Err(ConfigError::Invalid("min_transfer must not be negative".into()));
        }
        if self.stats_window == 0 {
            return Err(ConfigError::Invalid("stats_window must be at least 1".into()));
        }
        Ok(())
    }

    /// Read a config file, detecting its format from the extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let parse_err = |detail: String| ConfigError::Parse {
            file: path.to_path_buf(),
            detail,
        };

        let config: PowerConfig = match format {
            Format::Ron => ron::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            Format::Json => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            Format::Toml => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse inline TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PowerConfig = toml::from_str(text).map_err(|e| ConfigError::Parse {
            file: PathBuf::from("<inline>"),
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PowerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.distribution_passes, 5);
        assert_eq!(config.low_throughput, Fixed64::from_num(450_000));
        assert_eq!(config.high_throughput, Fixed64::from_num(1_000_000_000));
    }

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("power.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("power.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("power.json")).unwrap(), Format::Json);
        assert!(matches!(
            detect_format(Path::new("power.yaml")),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn toml_overrides_only_named_fields() {
        let config = PowerConfig::from_toml_str("distribution_passes = 8\nstats_window = 30\n").unwrap();
        assert_eq!(config.distribution_passes, 8);
        assert_eq!(config.stats_window, 30);
        assert_eq!(config.min_transfer, Fixed64::ONE);
    }

    #[test]
    fn energy_values_read_as_decimals() {
        let config = PowerConfig::from_toml_str("low_throughput = 1200.5\nmin_transfer = 0.25\n").unwrap();
        assert_eq!(config.low_throughput, Fixed64::from_num(1200.5));
        assert_eq!(config.min_transfer, Fixed64::from_num(0.25));
    }

    #[test]
    fn high_below_low_rejected() {
        let err = PowerConfig::from_toml_str("low_throughput = 10.0\nhigh_throughput = 5.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_passes_rejected() {
        let err = PowerConfig::from_toml_str("distribution_passes = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = PowerConfig::from_toml_str("distribution_passes = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_from_each_format() {
        let dir = std::env::temp_dir().join(format!("voltaic-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let ron_path = dir.join("power.ron");
        std::fs::write(&ron_path, "(distribution_passes: 3)").unwrap();
        assert_eq!(PowerConfig::load(&ron_path).unwrap().distribution_passes, 3);

        let json_path = dir.join("power.json");
        std::fs::write(&json_path, r#"{"stats_window": 4}"#).unwrap();
        assert_eq!(PowerConfig::load(&json_path).unwrap().stats_window, 4);

        let toml_path = dir.join("power.toml");
        std::fs::write(&toml_path, "distribution_passes = 6").unwrap();
        assert_eq!(PowerConfig::load(&toml_path).unwrap().distribution_passes, 6);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = PowerConfig::load(Path::new("/definitely/not/here/power.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}

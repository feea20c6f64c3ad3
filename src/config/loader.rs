use crate::config::schema::{HarnessConfig, SuiteConfig, ValidationError};
use serde::de::DeserializeOwned;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config from {}: {}", path.display(), source)
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse config TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse config TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid config ({}):\n{}", path.display(), source),
                None => write!(f, "invalid config:\n{}", source),
            },
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
        }
    }
}

trait Validate {
    fn check(&self) -> Result<(), ValidationError>;
}

impl Validate for HarnessConfig {
    fn check(&self) -> Result<(), ValidationError> {
        self.validate()
    }
}

impl Validate for SuiteConfig {
    fn check(&self) -> Result<(), ValidationError> {
        self.validate()
    }
}

fn parse<T: DeserializeOwned + Validate>(input: &str) -> Result<T, ConfigError> {
    let config: T = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    config
        .check()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_harness_from_str(input: &str) -> Result<HarnessConfig, ConfigError> {
    parse(input)
}

/// Load harness settings. A missing file yields the defaults.
pub fn load_harness_from_path(path: impl AsRef<Path>) -> Result<HarnessConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(HarnessConfig::default());
    }
    parse(&read(path)?).map_err(|error| error.with_path(path))
}

pub fn load_suite_from_str(input: &str) -> Result<SuiteConfig, ConfigError> {
    parse(input)
}

pub fn load_suite_from_path(path: impl AsRef<Path>) -> Result<SuiteConfig, ConfigError> {
    let path = path.as_ref();
    parse(&read(path)?).map_err(|error| error.with_path(path))
}

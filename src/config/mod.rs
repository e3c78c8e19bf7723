pub mod component;
pub mod composition;

pub use component::{
    ComponentConfig, ComponentKind, InletConfig, InletKind, ProcessorConfig, ProcessorKind,
    ShellConfig, ShellKind, SkipReason,
};
pub use composition::{
    parse_tree, strip_jsonc_comments, ConfigFormat, Configuration, InvalidNode, SkippedNode,
    ValidationReport,
};

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Parse(String),
}

impl ConfigFormat {
    /// Pick the format from a file extension; anything but `.yaml`/`.yml` is JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ConfigFormat::Yaml
            }
            _ => ConfigFormat::Json,
        }
    }
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load and parse a configuration file from disk.
pub fn load_configuration_file(path: &Path) -> Result<Configuration, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Configuration::from_str(&content, ConfigFormat::from_path(path))
}

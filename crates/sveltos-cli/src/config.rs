//! sveltosctl configuration
//!
//! Settings come from, highest priority first:
//! 1. Command line flags
//! 2. `SVELTOSCTL_*` environment variables (resolved by clap)
//! 3. The YAML config file (`--config-filename`, default
//!    `~/.sveltosctl/config.yaml`)
//! 4. Built-in defaults
//!
//! The default config file is optional. An explicitly named one must exist.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, GlobalArgs, Result};

const CONFIG_DIR_NAME: &str = ".sveltosctl";
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Contents of the YAML config file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
    /// Enable debug logging
    pub verbose: Option<bool>,
    /// Print informational output (default true)
    pub console_output: Option<bool>,
    /// Kubeconfig for the cluster to bootstrap
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to use
    pub context: Option<String>,
}

/// Resolved configuration passed to every command
#[derive(Debug, Clone, PartialEq)]
pub struct CtlConfig {
    /// Enable debug logging
    pub verbose: bool,
    /// Print informational output; when false it is logged instead
    pub console_output: bool,
    /// Kubeconfig fallback when a command gets none
    pub kubeconfig: Option<PathBuf>,
    /// Context fallback when a command gets none
    pub context: Option<String>,
}

impl Default for CtlConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            console_output: true,
            kubeconfig: None,
            context: None,
        }
    }
}

/// Path to `~/.sveltosctl/config.yaml`, if a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Parse a config file. An empty file yields the defaults.
pub fn load_file(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&data)
        .map_err(|e| Error::validation(format!("failed to parse {}: {}", path.display(), e)))
}

impl CtlConfig {
    /// Load the config file named by `global` (or the default one) and
    /// apply the global flags on top.
    pub fn resolve(global: &GlobalArgs) -> Result<Self> {
        let file = match &global.config_filename {
            Some(path) => load_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => load_file(&path)?,
                _ => FileConfig::default(),
            },
        };
        Ok(Self::merge(global, file))
    }

    /// Combine flags with file values; flags win
    pub fn merge(global: &GlobalArgs, file: FileConfig) -> Self {
        let defaults = Self::default();
        Self {
            verbose: global
                .verbose
                .or(file.verbose)
                .unwrap_or(defaults.verbose),
            console_output: !global.no_console_output
                && file.console_output.unwrap_or(defaults.console_output),
            kubeconfig: file.kubeconfig,
            context: file.context,
        }
    }
}

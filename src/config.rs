// Script engine configuration
// Loaded from TOML; every field has a default so partial files are fine.

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Tunables for the compiler and the interpreter
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScriptConfig {
    /// Instructions one run may execute before it is treated as runaway (0 = unlimited)
    pub check_cmdcount: u32,
    /// Jumps one run may take before it is treated as runaway (0 = unlimited)
    pub check_gotocount: u32,
    /// Exclusive upper bound for array indices
    pub max_array_size: u32,
    /// Default lower bound for `input`
    pub input_min_value: i32,
    /// Default upper bound for `input`
    pub input_max_value: i32,
    /// Warn when a call passes more arguments than the builtin declares
    pub warn_func_mismatch_paramnum: bool,
    /// Warn when an argument does not match the declared type letter
    pub warn_func_mismatch_argtypes: bool,
    /// Seed for `rand`; unset means a fresh entropy seed
    pub rng_seed: Option<u64>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        ScriptConfig {
            check_cmdcount: 655_360,
            check_gotocount: 2048,
            max_array_size: 128,
            input_min_value: 0,
            input_max_value: i32::MAX,
            warn_func_mismatch_paramnum: true,
            warn_func_mismatch_argtypes: true,
            rng_seed: None,
        }
    }
}

impl ScriptConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("Invalid script configuration: {}", e))
    }

    /// Load a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| format!("Cannot read '{}': {}", path.display(), e))?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("Loaded script configuration from {}", path.display());
        Ok(config)
    }
}

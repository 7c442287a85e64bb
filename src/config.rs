//! Runtime configuration for the import pipeline.
//!
//! [`ImportConfig`] names the external tools and the scratch area used by
//! background imports. It is usually embedded as the `import` section of the
//! server configuration:
//!
//! ```toml
//! [import]
//! scratch_root = "/var/tmp/studio-import"
//! registry_program = "glance"
//! max_tracked_imports = 256
//! abort_on_preparation_failure = false
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`{0}` must name a program")]
    EmptyProgram(&'static str),

    #[error("`max_tracked_imports` must be at least 1")]
    ZeroCapacity,

    #[error("`scratch_root` must not be empty")]
    EmptyScratchRoot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Parent directory of per-task scratch directories.
    #[serde(default = "default_scratch_root")]
    pub scratch_root: PathBuf,

    #[serde(default = "default_download_program")]
    pub download_program: String,

    #[serde(default = "default_extract_program")]
    pub extract_program: String,

    #[serde(default = "default_convert_program")]
    pub convert_program: String,

    /// Image registry client, invoked as `<program> image-create ...`.
    #[serde(default = "default_registry_program")]
    pub registry_program: String,

    /// Upper bound on in-flight imports tracked by the supervisor. Imports
    /// beyond it still run, untracked.
    #[serde(default = "default_max_tracked_imports")]
    pub max_tracked_imports: usize,

    /// Skip the registry import when any preparation step failed.
    #[serde(default)]
    pub abort_on_preparation_failure: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            scratch_root: default_scratch_root(),
            download_program: default_download_program(),
            extract_program: default_extract_program(),
            convert_program: default_convert_program(),
            registry_program: default_registry_program(),
            max_tracked_imports: default_max_tracked_imports(),
            abort_on_preparation_failure: false,
        }
    }
}

impl ImportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("download_program", &self.download_program),
            ("extract_program", &self.extract_program),
            ("convert_program", &self.convert_program),
            ("registry_program", &self.registry_program),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyProgram(field));
            }
        }
        if self.scratch_root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyScratchRoot);
        }
        if self.max_tracked_imports == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

fn default_scratch_root() -> PathBuf {
    std::env::temp_dir().join("studio-import")
}

fn default_download_program() -> String {
    "curl".to_string()
}

fn default_extract_program() -> String {
    "tar".to_string()
}

fn default_convert_program() -> String {
    "vmware-vdiskmanager".to_string()
}

fn default_registry_program() -> String {
    "glance".to_string()
}

fn default_max_tracked_imports() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ImportConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.registry_program, "glance");
        assert_eq!(cfg.max_tracked_imports, 256);
        assert!(!cfg.abort_on_preparation_failure);
        assert!(cfg.scratch_root.ends_with("studio-import"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ImportConfig =
            serde_json::from_str(r#"{"registry_program": "/opt/bin/glance"}"#).unwrap();
        assert_eq!(cfg.registry_program, "/opt/bin/glance");
        assert_eq!(cfg.download_program, "curl");
    }

    #[test]
    fn validate_rejects_blank_programs_and_zero_capacity() {
        let cfg = ImportConfig {
            convert_program: "  ".into(),
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::EmptyProgram("convert_program"))
        );

        let cfg = ImportConfig {
            max_tracked_imports: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroCapacity));
    }
}

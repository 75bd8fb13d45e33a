//! Filesystem locations used by the engine.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//! Set `NATIVE_UPDATE_CONFIG_DIR` to relocate everything (tests, custom
//! deployments).

use std::path::PathBuf;

/// Engine config directory.
///
/// Resolves to `dirs::config_dir()/native-update/` by default.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("NATIVE_UPDATE_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("native-update"))
        .unwrap_or_else(|| PathBuf::from("/tmp/native-update-config"))
}

/// Persisted status record (`config_dir()/background-status.json`).
#[must_use]
pub fn status_file() -> PathBuf {
    config_dir().join("background-status.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_is_nonempty() {
        assert!(!config_dir().as_os_str().is_empty());
    }

    #[test]
    fn status_file_lives_in_config_dir() {
        let file = status_file();
        assert!(file.starts_with(config_dir()));
        assert_eq!(
            file.file_name().and_then(|n| n.to_str()),
            Some("background-status.json")
        );
    }
}

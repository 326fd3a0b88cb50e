//! Config file loading and environment overrides

use std::path::{Path, PathBuf};

use crate::config::{DroverConfig, StoreBackend};
use crate::error::{DroverError, DroverResult};

/// File name looked up under the platform config directory.
pub const DEFAULT_CONFIG_FILE: &str = "drover.toml";

/// Platform default: `<config dir>/drover/drover.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drover")
        .join(DEFAULT_CONFIG_FILE)
}

/// Load configuration: file (if present), then environment overrides, then
/// validation.
///
/// An explicitly supplied path must exist; the default path is allowed to be
/// absent, in which case the built-in defaults apply.
pub fn load_config(path: Option<&Path>) -> DroverResult<DroverConfig> {
    let mut config = match path {
        Some(path) => {
            let expanded = expand_path(path);
            if !expanded.exists() {
                return Err(DroverError::config(format!(
                    "config file not found: {}",
                    expanded.display()
                )));
            }
            load_from_file(&expanded)?
        }
        None => {
            let default = default_config_path();
            if default.exists() {
                load_from_file(&default)?
            } else {
                DroverConfig::default()
            }
        }
    };

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
}

/// Parse a config file, dispatching on extension.
fn load_from_file(path: &Path) -> DroverResult<DroverConfig> {
    let content = std::fs::read_to_string(path).map_err(|error| {
        DroverError::config(format!("failed to read {}: {error}", path.display()))
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|error| {
            DroverError::config(format!("invalid TOML in {}: {error}", path.display()))
        }),
        Some("json") => serde_json::from_str(&content).map_err(|error| {
            DroverError::config(format!("invalid JSON in {}: {error}", path.display()))
        }),
        other => Err(DroverError::config(format!(
            "unsupported config extension {:?} for {}",
            other.unwrap_or(""),
            path.display()
        ))),
    }
}

/// Environment variables override file values. Empty values are ignored so
/// `DROVER_STORE_URL= drover run` does not silently clear a setting.
fn apply_env_overrides(config: &mut DroverConfig) {
    if let Ok(level) = std::env::var("DROVER_LOG_LEVEL") {
        if !level.is_empty() {
            config.logging.level = level;
        }
    }
    if let Ok(url) = std::env::var("DROVER_STORE_URL") {
        if !url.is_empty() {
            config.store.base_url = Some(url);
            config.store.backend = StoreBackend::Http;
        }
    }
    if let Ok(command) = std::env::var("DROVER_AGENT_COMMAND") {
        if !command.is_empty() {
            config.agent.command = command;
        }
    }
    if let Ok(model) = std::env::var("DROVER_SYNTHESIS_MODEL") {
        if !model.is_empty() {
            config.synthesis.model = model;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drover.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[coordinator]\npoll_interval = \"10s\"\n\n[agent]\ncommand = \"mock-agent\"\n"
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(
            config.coordinator.poll_interval,
            std::time::Duration::from_secs(10)
        );
        assert_eq!(config.agent.command, "mock-agent");
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drover.json");
        std::fs::write(&path, r#"{"learning": {"min_batch_size": 5}}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.learning.min_batch_size, 5);
    }

    #[test]
    fn test_explicit_missing_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let error = load_config(Some(&path)).unwrap_err();
        assert!(error.to_string().contains("not found"));
    }

    #[test]
    fn test_unsupported_extension_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drover.yaml");
        std::fs::write(&path, "store: {}").unwrap();
        let error = load_config(Some(&path)).unwrap_err();
        assert!(error.to_string().contains("unsupported config extension"));
    }

    #[test]
    fn test_env_override_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drover.toml");
        std::fs::write(&path, "[synthesis]\nmodel = \"from-file\"\n").unwrap();

        // set_var is unsafe in edition 2024; confined to this test. No other
        // test in this binary reads the synthesis model, so the brief window
        // where the variable is set cannot bleed into a parallel load.
        unsafe { std::env::set_var("DROVER_SYNTHESIS_MODEL", "from-env") };
        let config = load_config(Some(&path)).unwrap();
        unsafe { std::env::remove_var("DROVER_SYNTHESIS_MODEL") };

        assert_eq!(config.synthesis.model, "from-env");
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drover.toml");
        std::fs::write(&path, "coordinator = not valid").unwrap();
        let error = load_config(Some(&path)).unwrap_err();
        assert!(error.to_string().contains("invalid TOML"));
    }
}

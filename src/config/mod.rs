mod types;

pub use types::*;

use crate::{Error, Result};
use std::{env, path::Path};
use tracing::debug;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Loads the configuration named by `CONFIG_PATH`, or `config.yaml`.
///
/// A missing default file yields the built-in defaults; a missing file that
/// was named explicitly is an error.
pub async fn load() -> Result<Config> {
    match env::var("CONFIG_PATH") {
        Ok(config_path) => load_from(&config_path).await,
        Err(_) if !Path::new(DEFAULT_CONFIG_PATH).exists() => {
            debug!("No {} found, using default configuration", DEFAULT_CONFIG_PATH);
            Ok(Config::default())
        }
        Err(_) => load_from(DEFAULT_CONFIG_PATH).await,
    }
}

pub async fn load_from(config_path: impl AsRef<Path>) -> Result<Config> {
    let config_path = config_path.as_ref();
    debug!("Loading configuration from: {}", config_path.display());

    let config_str = tokio::fs::read_to_string(config_path).await?;
    let config = parse(&config_str)?;

    Ok(config)
}

pub fn parse(config_str: &str) -> Result<Config> {
    // An empty document deserializes to unit, not to an empty mapping.
    if config_str.trim().is_empty() {
        return Ok(Config::default());
    }

    let config: Config = serde_yaml::from_str(config_str)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let generation = &config.generation;

    if generation.max_length == 0 {
        return Err(Error::config("generation.max_length must be greater than 0"));
    }
    if generation.max_concurrent == 0 {
        return Err(Error::config(
            "generation.max_concurrent must be greater than 0",
        ));
    }
    if let Some(temperature) = generation.temperature {
        if temperature < 0.0 {
            return Err(Error::config("generation.temperature must not be negative"));
        }
    }
    if let Some(top_p) = generation.top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(Error::config("generation.top_p must be within [0, 1]"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse("").unwrap();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.model.model_id, "microsoft/DialoGPT-medium");
        assert_eq!(config.generation.max_length, 100);
        assert_eq!(config.generation.timeout_secs, Some(120));
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let yaml = r#"
server:
  port: 9000
model:
  local_dir: "/models/dialogpt"
  device: cuda
generation:
  temperature: 0.7
  timeout_secs: null
"#;
        let config = parse(yaml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.server.cors);
        assert_eq!(config.server.logs.level, "info");
        assert_eq!(config.model.local_dir.as_deref(), Some("/models/dialogpt"));
        assert_eq!(config.model.device, DeviceKind::Cuda);
        assert_eq!(config.model.dtype, Precision::F32);
        assert_eq!(config.generation.temperature, Some(0.7));
        assert_eq!(config.generation.timeout_secs, None);
        assert_eq!(config.generation.max_concurrent, 1);
    }

    #[test]
    fn test_rejects_zero_max_length() {
        let err = parse("generation:\n  max_length: 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_out_of_range_top_p() {
        let err = parse("generation:\n  top_p: 1.5\n").unwrap_err();
        assert!(err.to_string().contains("top_p"));
    }

    #[test]
    fn test_rejects_unknown_device() {
        let err = parse("model:\n  device: tpu\n").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, "server:\n  host: \"127.0.0.1\"\n  logs:\n    level: debug\n")
            .await
            .unwrap();

        let config = load_from(&path).await.unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.logs.level, "debug");
    }

    #[tokio::test]
    async fn test_load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from(dir.path().join("absent.yaml")).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}

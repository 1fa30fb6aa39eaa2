//! JSON5 configuration loading and the shared `logging` section.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Log line encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// `logging` section shared by gateway binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `modgate_rtu=debug,info`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Return a copy with the level replaced by a CLI override, if any.
    pub fn with_level_override(&self, level: Option<&str>) -> Self {
        match level {
            Some(level) => Self {
                level: level.to_string(),
                format: self.format,
            },
            None => self.clone(),
        }
    }
}

/// Load a JSON5 configuration file.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse(&content, || format!("config file '{}'", path.display()))
}

/// Parse JSON5 configuration text.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    parse(content, || "config".to_string())
}

fn parse<T: for<'de> Deserialize<'de>>(content: &str, origin: impl FnOnce() -> String) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Parse {
        origin: origin(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_default_logging() {
        let config: Wrapper = parse_config("{}").unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_json_logging_format() {
        let json5 = r#"
        {
            logging: {
                level: "debug",
                format: "json",
            },
        }
        "#;

        let config: Wrapper = parse_config(json5).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_level_override() {
        let base = LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Json,
        };

        let overridden = base.with_level_override(Some("trace"));
        assert_eq!(overridden.level, "trace");
        assert_eq!(overridden.format, LogFormat::Json);

        assert_eq!(base.with_level_override(None).level, "info");
    }

    #[test]
    fn test_parse_error_names_origin() {
        let err = parse_config::<Wrapper>("{ logging: ").unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse config:"));
    }

    #[test]
    fn test_missing_file() {
        let result: Result<Wrapper> = load_config("/nonexistent/modgate.json5");
        assert!(matches!(result, Err(Error::Read { .. })));
    }
}

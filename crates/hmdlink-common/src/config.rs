//! Config file and environment helpers.

use std::path::Path;
use std::str::FromStr;

use serde::de::DeserializeOwned;

use crate::{Error, Result};

/// Read a JSON config file into `T`.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let value = serde_json::from_str(&raw)
        .map_err(|e| Error::serialization(format!("{}: {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(value)
}

/// Non-empty value of an environment variable.
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable, `Ok(None)` when it is unset or empty.
pub fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("{key}={raw}: {e}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        interval: u32,
    }

    fn temp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "hmdlink-common-{}-{name}",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_json_reads_struct() {
        let path = temp_file("ok.json", r#"{ "name": "emu", "interval": 90 }"#);
        let sample: Sample = load_json(&path).unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "emu".into(),
                interval: 90
            }
        );
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_load_json_reports_path_on_bad_input() {
        let path = temp_file("bad.json", "{ not json");
        let err = load_json::<Sample>(&path).unwrap_err();
        assert!(matches!(err, Error::Serialization(ref msg) if msg.contains("bad.json")));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_load_json_missing_file_is_io() {
        let err = load_json::<Sample>("/nonexistent/hmdlink.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_env_parse() {
        std::env::set_var("HMDLINK_COMMON_TEST_OK", " 42 ");
        std::env::set_var("HMDLINK_COMMON_TEST_BAD", "forty");
        std::env::set_var("HMDLINK_COMMON_TEST_EMPTY", "  ");

        assert_eq!(env_parse::<u32>("HMDLINK_COMMON_TEST_OK").unwrap(), Some(42));
        assert!(env_parse::<u32>("HMDLINK_COMMON_TEST_BAD").is_err());
        assert_eq!(env_parse::<u32>("HMDLINK_COMMON_TEST_EMPTY").unwrap(), None);
        assert_eq!(env_parse::<u32>("HMDLINK_COMMON_TEST_UNSET").unwrap(), None);
    }
}

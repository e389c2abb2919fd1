//! Loading JSON configuration files named by environment variables.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::errors::HsResult;

/// Path held in the environment variable `var`, if it is set.
///
/// A variable that is set but empty, or not valid unicode, is a configuration
/// error rather than "unset".
pub fn config_path_from_env(var: &str) -> HsResult<Option<PathBuf>> {
    match std::env::var(var) {
        Ok(path) if path.trim().is_empty() => Err(crate::config_error!("{var} is set but empty")),
        Ok(path) => Ok(Some(PathBuf::from(path))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(crate::config_error!("{var} is not valid unicode"))
        }
    }
}

/// Read and deserialize a JSON file.
pub fn load_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> HsResult<T> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HsError;
    use crate::space::SearchSpace;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("hs-types-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_json_file() {
        let path = temp_file(
            "space.json",
            r#"{"parameters": [{"name": "rate", "kind": {"Uniform": {"low": 0.0, "high": 1.0}}}]}"#,
        );
        let space: SearchSpace = load_json_file(&path).unwrap();
        assert_eq!(space.len(), 1);
        assert!(space.validate().is_ok());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::env::temp_dir().join("hs-types-does-not-exist.json");
        let err = load_json_file::<SearchSpace>(path).unwrap_err();
        assert!(matches!(err, HsError::Io(_)));
    }

    #[test]
    fn bad_json_is_serialization_error() {
        let path = temp_file("broken.json", "{\"parameters\": [");
        let err = load_json_file::<SearchSpace>(&path).unwrap_err();
        assert!(matches!(err, HsError::Serialization(_)));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn config_path_from_env_cases() {
        std::env::remove_var("HS_TYPES_TEST_UNSET");
        assert_eq!(config_path_from_env("HS_TYPES_TEST_UNSET").unwrap(), None);

        std::env::set_var("HS_TYPES_TEST_EMPTY", " ");
        assert!(matches!(
            config_path_from_env("HS_TYPES_TEST_EMPTY"),
            Err(HsError::Config(_))
        ));

        std::env::set_var("HS_TYPES_TEST_SET", "/tmp/sweep.json");
        assert_eq!(
            config_path_from_env("HS_TYPES_TEST_SET").unwrap(),
            Some(PathBuf::from("/tmp/sweep.json"))
        );
    }
}

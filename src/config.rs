use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::parser::DEFAULT_MAX_WORD_LEN;

/// Interpreter settings, read from `$MINISH_CONFIG` or
/// `~/.config/minish/config.toml`. Every key is optional.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Printed before each line when stdin is a terminal.
    pub prompt: String,
    /// Words longer than this are truncated.
    pub max_word_len: usize,
    /// How deeply `source` may nest.
    pub max_source_depth: usize,
    /// Block on unfinished background jobs when input ends.
    pub wait_on_exit: bool,
    /// `off`, `error`, `warn`, `info`, `debug` or `trace`.
    pub log_level: String,
    /// Append log records here instead of writing them to stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompt: ">> ".to_string(),
            max_word_len: DEFAULT_MAX_WORD_LEN,
            max_source_depth: 64,
            wait_on_exit: false,
            log_level: "warn".to_string(),
            log_file: None,
        }
    }
}

impl Config {
    pub fn from_toml(text: &str, path: PathBuf) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Where the config file is looked up.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os("MINISH_CONFIG") {
            return Some(PathBuf::from(path));
        }
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/minish/config.toml"))
    }

    /// Load the config file, falling back to defaults when there is none.
    pub fn load() -> Result<Self, ConfigError> {
        let Some(path) = Self::default_path() else {
            return Ok(Self::default());
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text, path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("", PathBuf::from("empty.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_word_len, 100);
        assert_eq!(config.prompt, ">> ");
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let text = r#"
            prompt = "$ "
            max_word_len = 16
            log_file = "/tmp/minish.log"
        "#;
        let config = Config::from_toml(text, PathBuf::from("partial.toml")).unwrap();
        assert_eq!(config.prompt, "$ ");
        assert_eq!(config.max_word_len, 16);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/minish.log")));
        assert!(!config.wait_on_exit);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = Config::from_toml("colour = true", PathBuf::from("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = Config::from_toml("max_word_len = \"big\"", PathBuf::from("bad.toml"));
        assert!(err.is_err());
    }
}

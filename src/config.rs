//! YAML startup configuration.
//!
//! Only the engine paths are mandatory; analysis defaults and the database
//! location fall back to built-in values. A relative database path is
//! resolved against the directory of the config file so the same file works
//! from any working directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::analysis::AnalyzerOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub engine: EngineSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
}

/// Paths handed to the engine process. All three are required.
#[derive(Clone, Debug, Deserialize)]
pub struct EngineSettings {
    pub exe_path: PathBuf,
    pub model_path: PathBuf,
    pub config_path: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub default_komi: f64,
    pub visits_19x19: u32,
    pub visits_small: u32,
    pub top_moves: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        AnalysisSettings {
            default_komi: 7.5,
            visits_19x19: 150,
            visits_small: 500,
            top_moves: 3,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: PathBuf::from("data/analysis.db"),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config = Self::parse(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        if config.database.path.is_relative() {
            if let Some(dir) = path.parent() {
                config.database.path = dir.join(&config.database.path);
            }
        }
        Ok(config)
    }

    fn parse(text: &str) -> Result<Config, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Default compute budget for a board size: big boards get fewer visits
    /// per position.
    pub fn visits_for(&self, size: u8) -> u32 {
        if size == 19 {
            self.analysis.visits_19x19
        } else {
            self.analysis.visits_small
        }
    }

    pub fn analyzer_options(&self) -> AnalyzerOptions {
        AnalyzerOptions {
            default_komi: self.analysis.default_komi,
            visits_19x19: self.analysis.visits_19x19,
            visits_small: self.analysis.visits_small,
            top_moves: self.analysis.top_moves,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "engine:\n  exe_path: /opt/katago/katago\n  model_path: /opt/katago/model.bin.gz\n  config_path: /opt/katago/gtp.cfg\n";

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.engine.exe_path, PathBuf::from("/opt/katago/katago"));
        assert_eq!(config.analysis.default_komi, 7.5);
        assert_eq!(config.analysis.top_moves, 3);
        assert_eq!(config.database.path, PathBuf::from("data/analysis.db"));
        assert_eq!(config.visits_for(19), 150);
        assert_eq!(config.visits_for(9), 500);
        assert_eq!(config.visits_for(13), 500);
    }

    #[test]
    fn test_overrides_win() {
        let text = format!(
            "{MINIMAL}analysis:\n  default_komi: 6.5\n  visits_19x19: 400\ndatabase:\n  path: /var/lib/go/cache.db\n"
        );
        let config = Config::parse(&text).unwrap();
        assert_eq!(config.analysis.default_komi, 6.5);
        assert_eq!(config.visits_for(19), 400);
        // Unset fields inside a present section still default.
        assert_eq!(config.analysis.visits_small, 500);
        assert_eq!(config.database.path, PathBuf::from("/var/lib/go/cache.db"));
    }

    #[test]
    fn test_missing_engine_section_is_an_error() {
        assert!(Config::parse("analysis:\n  top_moves: 5\n").is_err());
    }

    #[test]
    fn test_load_resolves_relative_database_path() {
        let dir = std::env::temp_dir().join(format!("go-analysis-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.path, dir.join("data/analysis.db"));

        std::fs::write(
            &path,
            format!("{MINIMAL}database:\n  path: /absolute/cache.db\n"),
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/absolute/cache.db"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_analyzer_options_mirror_analysis_section() {
        let config = Config::parse(MINIMAL).unwrap();
        let opts = config.analyzer_options();
        assert_eq!(opts.default_komi, 7.5);
        assert_eq!(opts.visits_19x19, 150);
        assert_eq!(opts.visits_small, 500);
        assert_eq!(opts.top_moves, 3);
    }
}

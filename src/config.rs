use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::LevelFilter;
use serde::Deserialize;

use crate::ops::DeletePolicy;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub db: Option<String>,
    pub delete_policy: Option<DeletePolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    pub level: Option<String>,
}

fn home() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".into())
}

/// `$HOME/.taskit`
pub fn data_dir() -> PathBuf {
    Path::new(&home()).join(".taskit")
}

/// Checks `TASKIT_CONFIG`, falls back to `$HOME/.taskit/config.toml`.
pub fn config_path() -> PathBuf {
    match std::env::var("TASKIT_CONFIG") {
        Ok(p) => PathBuf::from(p),
        Err(_) => data_dir().join("config.toml"),
    }
}

impl Config {
    /// Load config from [`config_path`].
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if let Some(level) = &self.log.level {
            if level.parse::<LevelFilter>().is_err() {
                bail!(
                    "failed to parse {}: log.level '{level}' is not one of off, error, warn, info, debug, trace",
                    path.display()
                );
            }
        }
        if let Some(db) = &self.store.db {
            if db.is_empty() {
                bail!("failed to parse {}: store.db must not be empty", path.display());
            }
        }
        Ok(())
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log
            .level
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or(LevelFilter::Warn)
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.store.delete_policy.unwrap_or_default()
    }

    /// Database path: `explicit` (from `--db` or `TASKIT_DB`), then
    /// `store.db`, then `$HOME/.taskit/taskit.db`.
    pub fn db_path(&self, explicit: Option<&str>) -> String {
        if let Some(p) = explicit {
            return p.to_string();
        }
        if let Some(p) = &self.store.db {
            return p.clone();
        }
        data_dir().join("taskit.db").to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn missing_file_returns_default() {
        let config = Config::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert!(config.store.db.is_none());
        assert_eq!(config.delete_policy(), DeletePolicy::Subtree);
        assert_eq!(config.log_level(), LevelFilter::Warn);
    }

    #[test]
    fn parse_full_config() {
        let f = write_config(
            r#"
[store]
db = "/tmp/tasks.db"
delete_policy = "row"

[log]
level = "debug"
"#,
        );
        let config = Config::load_from(f.path()).unwrap();
        assert_eq!(config.store.db.as_deref(), Some("/tmp/tasks.db"));
        assert_eq!(config.delete_policy(), DeletePolicy::Row);
        assert_eq!(config.log_level(), LevelFilter::Debug);
    }

    #[test]
    fn unknown_field_rejected() {
        let f = write_config("[store]\ndatabase = \"x\"\n");
        let err = Config::load_from(f.path()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"));
    }

    #[test]
    fn bad_delete_policy_rejected() {
        let f = write_config("[store]\ndelete_policy = \"everything\"\n");
        assert!(Config::load_from(f.path()).is_err());
    }

    #[test]
    fn bad_log_level_rejected() {
        let f = write_config("[log]\nlevel = \"loud\"\n");
        let err = Config::load_from(f.path()).unwrap_err();
        assert!(err.to_string().contains("log.level"));
    }

    #[test]
    fn empty_db_path_rejected() {
        let f = write_config("[store]\ndb = \"\"\n");
        assert!(Config::load_from(f.path()).is_err());
    }

    #[test]
    fn db_path_precedence() {
        let config = Config {
            store: StoreConfig {
                db: Some("/from/config.db".into()),
                delete_policy: None,
            },
            log: LogConfig::default(),
        };
        assert_eq!(config.db_path(Some("/flag.db")), "/flag.db");
        assert_eq!(config.db_path(None), "/from/config.db");
        assert!(Config::default().db_path(None).ends_with(".taskit/taskit.db"));
    }
}

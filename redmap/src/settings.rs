use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::str::FromStr;

pub const DEFAULT_TEMP_KEY_PREFIX: &str = "redmap:tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redb,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redb" => Ok(StoreBackend::Redb),
            _ => Err(format!("Invalid value for StoreBackend: {}", s)),
        }
    }
}

impl<'de> serde::Deserialize<'de> for StoreBackend {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        StoreBackend::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedmapSettings {
    pub store: StoreSettings,
    pub collection: CollectionSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub db_path: String,
    pub db_cache_size_mb: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionSettings {
    pub temp_key_prefix: String,
}

impl Default for RedmapSettings {
    fn default() -> Self {
        RedmapSettings {
            store: StoreSettings { backend: StoreBackend::Memory, db_path: "redmap.db".to_string(), db_cache_size_mb: 64 },
            collection: CollectionSettings { temp_key_prefix: DEFAULT_TEMP_KEY_PREFIX.to_string() },
        }
    }
}

impl RedmapSettings {
    /// Loads settings from an optional file overlaid with `REDMAP__SECTION__KEY` environment variables.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("REDMAP").try_parsing(true).separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Defaults overlaid with the environment only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(Environment::with_prefix("REDMAP").try_parsing(true).separator("__"))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let defaults = RedmapSettings::default();
        Config::builder()
            .set_default("store.backend", "memory")?
            .set_default("store.db_path", defaults.store.db_path)?
            .set_default("store.db_cache_size_mb", defaults.store.db_cache_size_mb as u64)?
            .set_default("collection.temp_key_prefix", defaults.collection.temp_key_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn it_should_fall_back_to_defaults() {
        let missing = env::temp_dir().join(format!("redmap_settings_missing_{}", rand::random::<u64>()));
        let settings = RedmapSettings::new(missing.to_str().expect("utf8 path")).expect("Failed to load settings");
        assert_eq!(settings.collection.temp_key_prefix, DEFAULT_TEMP_KEY_PREFIX);
        assert_eq!(settings.store.db_cache_size_mb, 64);
    }

    #[test]
    fn it_should_read_a_settings_file() {
        let path = env::temp_dir().join(format!("redmap_settings_{}.toml", rand::random::<u64>()));
        fs::write(&path, "[store]\nbackend = \"redb\"\ndb_path = \"/tmp/boats.db\"\n\n[collection]\ntemp_key_prefix = \"boats:tmp\"\n")
            .expect("Failed to write settings");
        let settings = RedmapSettings::new(path.to_str().expect("utf8 path")).expect("Failed to load settings");
        assert_eq!(settings.store.backend, StoreBackend::Redb);
        assert_eq!(settings.store.db_path, "/tmp/boats.db");
        assert_eq!(settings.collection.temp_key_prefix, "boats:tmp");
        fs::remove_file(path).expect("Failed to remove settings");
    }

    #[test]
    fn it_should_reject_unknown_backends() {
        assert!(StoreBackend::from_str("postgres").is_err());
        assert_eq!(StoreBackend::from_str("Memory"), Ok(StoreBackend::Memory));
    }
}

use crate::util::SerdeLevelFilter;
use anyhow::{anyhow, Context};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env::{self, VarError},
    fs,
    path::Path,
    sync::OnceLock,
};

static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

const POLYGON_API_KEY_ENV_VAR: &str = "POLYGON_API_KEY";
const CONFIG_PATH: &str = "./config.json";

pub struct Config {
    pub keys: ApiKeys,
    pub urls: Urls,
    pub feed: FeedConfig,
    pub store: StoreConfig,
    pub log_level_filter: LevelFilter,
}

impl Config {
    pub fn get() -> &'static Self {
        GLOBAL_CONFIG.get().expect("Config not set")
    }

    pub fn init() -> anyhow::Result<()> {
        let keys = ApiKeys::from_env()?;

        let config_path = Path::new(CONFIG_PATH);

        let on_disk_config = if config_path.exists() {
            let buf = fs::read_to_string(config_path).context("Failed to read config file")?;

            match serde_json::from_str::<OnDiskConfig>(&buf) {
                Ok(config) => config,
                Err(error) => {
                    println!("Failed to read on-disk config ({error}), writing default config.");
                    let (default, buf) = OnDiskConfig::default_serialized();
                    fs::write(config_path, buf.as_bytes())
                        .context("Failed to write default config")?;
                    default
                }
            }
        } else {
            let (default, buf) = OnDiskConfig::default_serialized();
            fs::write(config_path, buf.as_bytes()).context("Failed to write default config")?;
            default
        };

        let me = Self {
            keys,
            urls: on_disk_config.urls,
            feed: on_disk_config.feed,
            store: on_disk_config.store,
            log_level_filter: on_disk_config.log_level_filter,
        };

        GLOBAL_CONFIG
            .set(me)
            .map_err(|_| anyhow!("Config already initialized"))
    }
}

pub struct ApiKeys {
    pub polygon_api_key: String,
}

impl ApiKeys {
    fn from_env() -> anyhow::Result<Self> {
        let polygon_api_key = read_env_var(POLYGON_API_KEY_ENV_VAR)?;

        Ok(Self { polygon_api_key })
    }
}

#[derive(Serialize, Deserialize)]
pub struct Urls {
    pub polygon_api_base: String,
}

impl Default for Urls {
    fn default() -> Self {
        Self {
            polygon_api_base: "https://api.polygon.io".to_owned(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct FeedConfig {
    pub requests_per_minute: usize,
    pub page_limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        // The free Polygon tier allows five requests per minute
        Self {
            requests_per_minute: 5,
            page_limit: 50_000,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_file: "./stock-history.db".to_owned(),
        }
    }
}

fn read_env_var(env_var: &str) -> anyhow::Result<String> {
    read_opt_env_var(env_var)?.ok_or_else(|| anyhow!("Missing required env var {env_var}"))
}

fn read_opt_env_var(env_var: &str) -> anyhow::Result<Option<String>> {
    match env::var(env_var) {
        Ok(var) => Ok(Some(var)),
        Err(VarError::NotPresent) => Ok(None),
        Err(error @ VarError::NotUnicode(_)) => {
            Err(anyhow!("Failed to parse env var {env_var}: {error}"))
        }
    }
}

#[derive(Serialize, Deserialize)]
struct OnDiskConfig {
    urls: Urls,
    feed: FeedConfig,
    store: StoreConfig,
    #[serde(with = "SerdeLevelFilter")]
    log_level_filter: LevelFilter,
}

impl OnDiskConfig {
    fn default_serialized() -> (Self, String) {
        let default = Self::default();
        let serialized =
            serde_json::to_string_pretty(&default).expect("Failed to serialize on-disk config");

        (default, serialized)
    }
}

impl Default for OnDiskConfig {
    fn default() -> Self {
        Self {
            urls: Urls::default(),
            feed: FeedConfig::default(),
            store: StoreConfig::default(),
            log_level_filter: LevelFilter::Info,
        }
    }
}

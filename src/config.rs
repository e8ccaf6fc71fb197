use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::archive;
use crate::feed::DEFAULT_FALLBACK_TOTAL;
use crate::media::MediaScheme;
use crate::page::set_page_param;

const DEFAULT_ENV_PREFIX: &str = "ARCHIVE_FEED";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config: api.page_size must be at least 1")]
    InvalidPageSize,
    #[error("config: media.{field} is required for the {scheme} scheme")]
    MissingEndpoint {
        field: &'static str,
        scheme: &'static str,
    },
    #[error("config: unknown media scheme {0:?} (expected direct, resource_key or image_path)")]
    UnknownScheme(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_list_path")]
    pub list_path: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            list_path: default_list_path(),
            page_size: default_page_size(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    archive::DEFAULT_BASE_URL.to_string()
}

fn default_list_path() -> String {
    archive::DEFAULT_LIST_PATH.to_string()
}

fn default_page_size() -> u32 {
    10
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_user_agent() -> String {
    format!("archive-feed/{}", crate::VERSION)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    Direct,
    ResourceKey,
    #[default]
    ImagePath,
}

impl SchemeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemeKind::Direct => "direct",
            SchemeKind::ResourceKey => "resource_key",
            SchemeKind::ImagePath => "image_path",
        }
    }
}

impl FromStr for SchemeKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(SchemeKind::Direct),
            "resource_key" | "resource" => Ok(SchemeKind::ResourceKey),
            "image_path" | "image" => Ok(SchemeKind::ImagePath),
            other => Err(ConfigError::UnknownScheme(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default)]
    pub scheme: SchemeKind,
    #[serde(default = "default_resource_endpoint")]
    pub resource_endpoint: String,
    #[serde(default = "default_image_endpoint")]
    pub image_endpoint: String,
    #[serde(default = "default_video_endpoint")]
    pub video_endpoint: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            scheme: SchemeKind::default(),
            resource_endpoint: default_resource_endpoint(),
            image_endpoint: default_image_endpoint(),
            video_endpoint: default_video_endpoint(),
        }
    }
}

fn default_resource_endpoint() -> String {
    "/resource".into()
}

fn default_image_endpoint() -> String {
    "/api/image".into()
}

fn default_video_endpoint() -> String {
    "/api/video".into()
}

impl MediaConfig {
    pub fn scheme(&self) -> Result<MediaScheme, ConfigError> {
        let required = |field: &'static str, value: &str| {
            if value.trim().is_empty() {
                Err(ConfigError::MissingEndpoint {
                    field,
                    scheme: self.scheme.as_str(),
                })
            } else {
                Ok(value.trim().to_string())
            }
        };
        Ok(match self.scheme {
            SchemeKind::Direct => MediaScheme::Direct,
            SchemeKind::ResourceKey => MediaScheme::ResourceKey {
                resource: required("resource_endpoint", &self.resource_endpoint)?,
            },
            SchemeKind::ImagePath => MediaScheme::ImagePath {
                image: required("image_endpoint", &self.image_endpoint)?,
                video: required("video_endpoint", &self.video_endpoint)?,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_route")]
    pub route: String,
    #[serde(default = "default_filter_visibility")]
    pub filter_visibility: bool,
    #[serde(default = "default_fallback_total")]
    pub fallback_total: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            route: default_route(),
            filter_visibility: default_filter_visibility(),
            fallback_total: default_fallback_total(),
        }
    }
}

fn default_route() -> String {
    "/".into()
}

fn default_filter_visibility() -> bool {
    true
}

fn default_fallback_total() -> u64 {
    DEFAULT_FALLBACK_TOTAL
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("archive-feed").join("archive-feed.log"))
}

impl Config {
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.api.base_url)
            .with_context(|| format!("config: invalid api.base_url {:?}", self.api.base_url))
    }

    /// The feed route as a URL, with `page` set when one is given.
    pub fn feed_location(&self, page: Option<&str>) -> Result<Url> {
        let mut url = self
            .base_url()?
            .join(&self.feed.route)
            .with_context(|| format!("config: invalid feed.route {:?}", self.feed.route))?;
        if let Some(page) = page {
            set_page_param(&mut url, Some(page));
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.page_size == 0 {
            return Err(ConfigError::InvalidPageSize.into());
        }
        self.media.scheme()?;
        self.feed_location(None)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        let from_file = read_config_file(path)?;
        cfg = merge_config(cfg, from_file);
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix)?;
    cfg.validate()?;

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.is_empty() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.list_path.is_empty() {
        base.api.list_path = other.api.list_path;
    }
    if other.api.page_size != 0 {
        base.api.page_size = other.api.page_size;
    }
    if !other.api.timeout.is_zero() {
        base.api.timeout = other.api.timeout;
    }
    if !other.api.user_agent.is_empty() {
        base.api.user_agent = other.api.user_agent;
    }

    base.media.scheme = other.media.scheme;
    if !other.media.resource_endpoint.is_empty() {
        base.media.resource_endpoint = other.media.resource_endpoint;
    }
    if !other.media.image_endpoint.is_empty() {
        base.media.image_endpoint = other.media.image_endpoint;
    }
    if !other.media.video_endpoint.is_empty() {
        base.media.video_endpoint = other.media.video_endpoint;
    }

    if !other.feed.route.is_empty() {
        base.feed.route = other.feed.route;
    }
    base.feed.filter_visibility = other.feed.filter_visibility;
    if other.feed.fallback_total != 0 {
        base.feed.fallback_total = other.feed.fallback_total;
    }

    if !other.log.level.is_empty() {
        base.log.level = other.log.level;
    }
    if other.log.file.is_some() {
        base.log.file = other.log.file;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) -> Result<()> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value)?;
    }

    Ok(())
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) -> Result<()> {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.list_path" => cfg.api.list_path = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.page_size" => {
            if let Ok(parsed) = value.trim().parse::<u32>() {
                cfg.api.page_size = parsed;
            }
        }
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "media.scheme" => cfg.media.scheme = value.parse()?,
        "media.resource_endpoint" => cfg.media.resource_endpoint = value,
        "media.image_endpoint" => cfg.media.image_endpoint = value,
        "media.video_endpoint" => cfg.media.video_endpoint = value,
        "feed.route" => cfg.feed.route = value,
        "feed.filter_visibility" => {
            cfg.feed.filter_visibility = matches!(value.as_str(), "1" | "true" | "TRUE" | "True");
        }
        "feed.fallback_total" => {
            if let Ok(parsed) = value.trim().parse::<u64>() {
                cfg.feed.fallback_total = parsed;
            }
        }
        "log.level" => cfg.log.level = value,
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        _ => {}
    }
    Ok(())
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("archive-feed").join("config.yaml"))
}

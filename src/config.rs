use std::collections::HashMap;
use std::env;
use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::{self, CachePolicy};
use crate::paging;
use crate::scroll::{self, JumpTiming};

const DEFAULT_ENV_PREFIX: &str = "FORUM_TUI";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub comments: CommentsConfig,
    #[serde(default)]
    pub jump: JumpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    crate::forum::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("forum-tui/{}", crate::VERSION)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            page_size: default_page_size(),
        }
    }
}

impl UIConfig {
    pub fn page_size(&self) -> NonZeroU32 {
        NonZeroU32::new(self.page_size).unwrap_or(paging::DEFAULT_PAGE_SIZE)
    }
}

fn default_theme() -> String {
    "default".into()
}

fn default_page_size() -> u32 {
    paging::DEFAULT_PAGE_SIZE.get()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentsConfig {
    #[serde(default = "default_fresh_for", with = "humantime_serde")]
    pub fresh_for: Duration,
    #[serde(default = "default_serve_stale_for", with = "humantime_serde")]
    pub serve_stale_for: Duration,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            fresh_for: default_fresh_for(),
            serve_stale_for: default_serve_stale_for(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl CommentsConfig {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            fresh_for: self.fresh_for,
            serve_stale_for: self.serve_stale_for.max(self.fresh_for),
            capacity: self.cache_capacity.max(1),
        }
    }
}

fn default_fresh_for() -> Duration {
    cache::DEFAULT_FRESH_FOR
}

fn default_serve_stale_for() -> Duration {
    cache::DEFAULT_SERVE_STALE_FOR
}

fn default_cache_capacity() -> usize {
    cache::DEFAULT_CAPACITY
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JumpConfig {
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_highlight_for", with = "humantime_serde")]
    pub highlight_for: Duration,
}

impl Default for JumpConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_attempts: default_max_attempts(),
            highlight_for: default_highlight_for(),
        }
    }
}

impl JumpConfig {
    pub fn timing(&self) -> JumpTiming {
        JumpTiming {
            poll_interval: self.poll_interval,
            max_attempts: self.max_attempts.max(1),
            highlight_for: self.highlight_for,
        }
    }
}

fn default_poll_interval() -> Duration {
    scroll::DEFAULT_POLL_INTERVAL
}

fn default_max_attempts() -> u32 {
    scroll::DEFAULT_MAX_ATTEMPTS
}

fn default_highlight_for() -> Duration {
    scroll::DEFAULT_HIGHLIGHT_FOR
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = read_config_file(path)?;
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "ui.theme" => cfg.ui.theme = value,
        "ui.page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.ui.page_size = parsed;
            }
        }
        "comments.fresh_for" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.comments.fresh_for = duration;
            }
        }
        "comments.serve_stale_for" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.comments.serve_stale_for = duration;
            }
        }
        "comments.cache_capacity" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.comments.cache_capacity = parsed;
            }
        }
        "jump.poll_interval" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.jump.poll_interval = duration;
            }
        }
        "jump.max_attempts" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.jump.max_attempts = parsed;
            }
        }
        "jump.highlight_for" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.jump.highlight_for = duration;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("forum-tui").join("config.yaml"))
}

pub fn save_api_endpoint(path: Option<PathBuf>, base_url: &str) -> Result<PathBuf> {
    let base_url = base_url.trim();
    anyhow::ensure!(!base_url.is_empty(), "config: api.base_url is required");
    url::Url::parse(base_url).with_context(|| format!("config: invalid api.base_url {base_url:?}"))?;

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };
    cfg.api.base_url = base_url.to_string();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn isolated(dir: &Path) -> LoadOptions {
        LoadOptions {
            config_file: Some(dir.join("missing.yaml")),
            env_prefix: Some("FORUM_TUI_TEST_UNUSED".into()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(isolated(dir.path())).unwrap();
        assert_eq!(cfg.ui.theme, "default");
        assert_eq!(cfg.ui.page_size, 15);
        assert_eq!(cfg.jump.timing(), JumpTiming::default());
        assert_eq!(cfg.comments.fresh_for, Duration::from_secs(120));
    }

    #[test]
    fn file_values_use_humantime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "ui:\n  page_size: 20\njump:\n  poll_interval: 100ms\n  highlight_for: 3s\ncomments:\n  fresh_for: 1m\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("FORUM_TUI_TEST_UNUSED".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.page_size().get(), 20);
        assert_eq!(cfg.jump.poll_interval, Duration::from_millis(100));
        assert_eq!(cfg.jump.highlight_for, Duration::from_secs(3));
        assert_eq!(cfg.jump.max_attempts, 60);
        assert_eq!(cfg.comments.fresh_for, Duration::from_secs(60));
    }

    #[test]
    fn zero_page_size_falls_back() {
        let ui = UIConfig {
            page_size: 0,
            ..UIConfig::default()
        };
        assert_eq!(ui.page_size(), paging::DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn save_endpoint_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        save_api_endpoint(Some(path.clone()), "https://forum.example/api").unwrap();
        let saved = read_config_file(&path).unwrap();
        assert_eq!(saved.api.base_url, "https://forum.example/api");
        assert!(save_api_endpoint(Some(path), "not a url").is_err());
    }

    #[test]
    fn env_overrides() {
        let dir = tempdir().unwrap();
        env::set_var("FORUM_TUI_ENVTEST_UI__PAGE_SIZE", "25");
        env::set_var("FORUM_TUI_ENVTEST_JUMP__HIGHLIGHT_FOR", "1s");
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("FORUM_TUI_ENVTEST".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.page_size, 25);
        assert_eq!(cfg.jump.highlight_for, Duration::from_secs(1));
        env::remove_var("FORUM_TUI_ENVTEST_UI__PAGE_SIZE");
        env::remove_var("FORUM_TUI_ENVTEST_JUMP__HIGHLIGHT_FOR");
    }
}

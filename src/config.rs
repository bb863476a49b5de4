use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

use crate::menu::{ThemeRule, default_fallback_theme, default_themes};

pub const CONFIG_FILE: &str = "config.toml";

// 配置文件结构
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub ai: AiConfig,
    pub paging: PagingConfig,
    pub sync: SyncConfig,
    pub catalog: CatalogConfig,
    pub menu: MenuConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    /// 试算表后端的 `/exec` 地址；为空时所有远端调用都是静默的空操作
    pub url: Option<String>,
    pub timeout_seconds: u64,
    pub long_timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_seconds: 30,
            long_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub request_timeout_seconds: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "google/gemini-2.5-flash".to_string(),
            max_retries: 3,
            base_delay_ms: 5000,
            request_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PagingConfig {
    pub page_size: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: crate::catalog::DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub save_debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CatalogConfig {
    pub sort_order: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            sort_order: crate::catalog::CATEGORY_SORT_ORDER
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MenuConfig {
    pub themes: Vec<ThemeRule>,
    pub fallback: ThemeRule,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            themes: default_themes(),
            fallback: default_fallback_theme(),
        }
    }
}

impl Config {
    /// 读取工作目录下的 config.toml，不存在时使用默认值
    pub fn load() -> Result<Config> {
        let mut config = if Path::new(CONFIG_FILE).exists() {
            Self::parse_file(Path::new(CONFIG_FILE))?
        } else {
            tracing::debug!("未找到 {}，使用默认配置", CONFIG_FILE);
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Config> {
        let mut config = Self::parse_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Config> {
        let config_content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("配置文件 {} 无法读取: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_content)
            .map_err(|e| anyhow::anyhow!("配置文件解析失败: {}", e))?;
        Ok(config.normalized())
    }

    // 环境变量优先于配置文件
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("JUNIOR_VOCAB_API_KEY")
            .and_then(non_blank)
            .or_else(|| lookup("OPENROUTER_API_KEY").and_then(non_blank))
        {
            self.ai.api_key = Some(key);
        }
        if let Some(url) = lookup("JUNIOR_VOCAB_STORE_URL").and_then(non_blank) {
            self.remote.url = Some(url);
        }
    }

    fn normalized(mut self) -> Self {
        self.ai.api_key = self.ai.api_key.and_then(non_blank);
        self.remote.url = self.remote.url.and_then(non_blank);
        if self.paging.page_size == 0 {
            self.paging.page_size = crate::catalog::DEFAULT_PAGE_SIZE;
        }
        self
    }

    pub fn api_key(&self) -> Option<&str> {
        self.ai.api_key.as_deref()
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_sections_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.paging.page_size, 12);
        assert_eq!(config.sync.save_debounce_ms, 2000);
        assert_eq!(config.remote.timeout_seconds, 30);
        assert!(config.remote.url.is_none());
        assert_eq!(config.catalog.sort_order.first().map(String::as_str), Some("自建"));
        assert!(!config.menu.themes.is_empty());
    }

    #[test]
    fn parses_file_and_trims_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[remote]
url = "  https://script.google.com/macros/s/abc/exec  "

[ai]
api_key = "   "
max_retries = 1

[paging]
page_size = 0

[catalog]
sort_order = ["水果", "動物"]
"#
        )
        .unwrap();

        let config = Config::parse_file(file.path()).unwrap();
        assert_eq!(
            config.remote.url.as_deref(),
            Some("https://script.google.com/macros/s/abc/exec")
        );
        assert!(config.api_key().is_none());
        assert_eq!(config.ai.max_retries, 1);
        assert_eq!(config.paging.page_size, 12);
        assert_eq!(config.catalog.sort_order, vec!["水果", "動物"]);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "JUNIOR_VOCAB_API_KEY" => Some(" ".to_string()),
            "OPENROUTER_API_KEY" => Some(" sk-test ".to_string()),
            "JUNIOR_VOCAB_STORE_URL" => Some("https://example.com/exec".to_string()),
            _ => None,
        });
        assert_eq!(config.api_key(), Some("sk-test"));
        assert_eq!(config.remote.url.as_deref(), Some("https://example.com/exec"));
    }

    #[test]
    fn broken_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[paging\npage_size = ").unwrap();
        assert!(Config::parse_file(file.path()).is_err());
    }
}

//! 配置管理模块
//!
//! 提供TOML配置文件的读取、写入、自动发现与校验功能。

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TranslationError};
use crate::types::{BatchingConfig, CacheConfig, LimitsConfig, ProviderConfig, RetryConfig};

/// 调度库配置结构
///
/// 四个分组（`limits`、`retry`、`batching`、`cache`）都可以在运行时
/// 通过 [`Orchestrator::apply_config`](crate::Orchestrator::apply_config) 热更新。
///
/// # 示例
///
/// ```rust,no_run
/// use translate_dispatch::DispatchConfig;
///
/// // 从默认位置加载配置
/// let config = DispatchConfig::load_from_default_locations();
///
/// // 从指定文件加载配置
/// let config = DispatchConfig::from_file("config.toml").unwrap();
///
/// // 保存配置到文件
/// config.save_to_file("output.toml").unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

const DEFAULT_LOCATIONS: [&str; 3] = [
    "translate-dispatch.toml",
    "config.toml",
    ".translate-dispatch.toml",
];

impl DispatchConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            TranslationError::Config(format!("读取 {} 失败: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DispatchConfig =
            toml::from_str(content).map_err(|e| TranslationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_string()?;
        fs::write(path.as_ref(), content).map_err(|e| {
            TranslationError::Config(format!("写入 {} 失败: {}", path.as_ref().display(), e))
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TranslationError::Config(e.to_string()))
    }

    /// Load configuration from multiple possible locations
    pub fn load_from_default_locations() -> Self {
        for path in &DEFAULT_LOCATIONS {
            if Path::new(path).exists() {
                match Self::from_file(path) {
                    Ok(config) => {
                        info!(path, "loaded configuration");
                        return config;
                    }
                    Err(e) => {
                        warn!(path, error = %e, "failed to load configuration");
                    }
                }
            }
        }

        info!("no configuration file found, using defaults");
        Self::default()
    }

    /// Generate example configuration file
    pub fn generate_example_config<P: AsRef<Path>>(path: P) -> Result<()> {
        Self::default().save_to_file(path)
    }

    /// 校验各分组的取值范围
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.max_concurrent == 0 {
            return Err(TranslationError::Config("limits.max_concurrent 必须 >= 1".into()));
        }
        if !(limits.rps.is_finite() && limits.rps > 0.0) {
            return Err(TranslationError::Config("limits.rps 必须为正数".into()));
        }
        if limits.burst == 0 {
            return Err(TranslationError::Config("limits.burst 必须 >= 1".into()));
        }
        if limits.jitter_ms[0] > limits.jitter_ms[1] {
            return Err(TranslationError::Config(format!(
                "limits.jitter_ms 下限 {} 大于上限 {}",
                limits.jitter_ms[0], limits.jitter_ms[1]
            )));
        }

        let retry = &self.retry;
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(TranslationError::Config(format!(
                "retry.max_delay_ms ({}) 小于 retry.base_delay_ms ({})",
                retry.max_delay_ms, retry.base_delay_ms
            )));
        }

        let batching = &self.batching;
        if batching.max_items == 0 || batching.max_chars == 0 || batching.token_budget == 0 {
            return Err(TranslationError::Config(
                "batching 的 max_items/max_chars/token_budget 必须为正数".into(),
            ));
        }

        if self.cache.size == 0 {
            return Err(TranslationError::Config("cache.size 必须 >= 1".into()));
        }

        if self.provider.api_url.trim().is_empty() {
            return Err(TranslationError::Config("provider.api_url 不能为空".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn defaults_are_valid() {
        assert_ok!(DispatchConfig::default().validate());
    }

    #[test]
    fn partial_file_fills_missing_groups_with_defaults() {
        let config = DispatchConfig::from_toml_str(
            r#"
            [limits]
            max_concurrent = 8
            rps = 5.0

            [provider]
            kind = "chat"
            id = "openai"
            api_url = "https://api.example.com/v1/chat/completions"
            model = "gpt-4o-mini"
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.max_concurrent, 8);
        assert_eq!(config.limits.burst, LimitsConfig::default().burst);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.provider.kind, ProviderKind::Chat);
        assert!(config.provider.batch);
    }

    #[test]
    fn throttle_codes_are_configurable() {
        let config = DispatchConfig::from_toml_str("[retry]\nthrottle_on = [429]\n").unwrap();
        assert_eq!(config.retry.throttle_on, vec![429]);
        assert_eq!(config.retry.retry_on, RetryConfig::default().retry_on);
    }

    #[test]
    fn rejects_reversed_jitter_range() {
        let err = assert_err!(DispatchConfig::from_toml_str(
            "[limits]\njitter_ms = [300, 100]\n"
        ));
        assert!(matches!(err, TranslationError::Config(_)));
    }

    #[test]
    fn rejects_max_delay_below_base() {
        let mut config = DispatchConfig::default();
        config.retry.base_delay_ms = 1_000;
        config.retry.max_delay_ms = 10;
        assert_err!(config.validate());
    }

    #[test]
    fn toml_round_trip_preserves_values() {
        let mut config = DispatchConfig::default();
        config.cache.ttl_ms = 0;
        config.batching.enabled = false;
        let text = config.to_toml_string().unwrap();
        assert_eq!(DispatchConfig::from_toml_str(&text).unwrap(), config);
    }
}

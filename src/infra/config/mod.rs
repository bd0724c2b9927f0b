//! 配置管理系统模块
//!
//! 本模块负责：
//! 1. 从环境变量解析飞书应用凭证（支持两种前缀）
//! 2. 加载 TOML 配置文件（支持 `${VAR}` 环境变量替换）
//!
//! # 凭证解析顺序
//! ```text
//! 1. FEISHU_APP_ID / FEISHU_APP_SECRET
//! 2. TASKNEXUS_PLUGIN_FEISHU_APP_ID / TASKNEXUS_PLUGIN_FEISHU_APP_SECRET
//! ```
//! 每个前缀作为一个整体尝试：只有 app_id 和 app_secret 同时存在且非空时
//! 该前缀才算命中；不完整的前缀会继续尝试下一个前缀。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::{env, fs};

use super::error::{Error, Result};

/// 凭证解析前缀，按优先级排列
const CREDENTIAL_PREFIXES: [&str; 2] = ["FEISHU", "TASKNEXUS_PLUGIN_FEISHU"];

/// 飞书凭证配置
///
/// 存储飞书应用的认证信息，进程启动时构造一次，之后不可变
///
/// # 敏感信息
/// - `app_secret` 是应用密钥，必须保密
/// - 不要将凭据硬编码在代码中
#[derive(Debug, Clone)]
pub struct FeishuCredentials {
    /// 应用 ID
    pub app_id: String,
    /// 应用密钥
    pub app_secret: String,
}

impl FeishuCredentials {
    /// 创建凭证
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
        }
    }

    /// 从环境变量映射解析凭证
    ///
    /// 依次尝试 `FEISHU_*` 和 `TASKNEXUS_PLUGIN_FEISHU_*` 两种前缀，
    /// 第一个同时给出非空 app_id 和 app_secret 的前缀胜出。
    /// 空字符串视为未设置。
    ///
    /// # 参数说明
    /// * `env` - 环境变量映射（可注入，便于测试）
    ///
    /// # 返回值
    /// 解析成功返回凭证，两种前缀均不完整时返回 `Error::MissingConfiguration`
    pub fn resolve(env: &HashMap<String, String>) -> Result<Self> {
        for prefix in CREDENTIAL_PREFIXES {
            let app_id = non_empty(env.get(&format!("{}_APP_ID", prefix)));
            let app_secret = non_empty(env.get(&format!("{}_APP_SECRET", prefix)));

            if let (Some(app_id), Some(app_secret)) = (app_id, app_secret) {
                tracing::debug!(prefix = prefix, app_id = %app_id, "凭证解析命中前缀");
                return Ok(Self::new(app_id, app_secret));
            }
        }

        Err(Error::MissingConfiguration(
            "未找到飞书凭证，请设置 FEISHU_APP_ID / FEISHU_APP_SECRET \
             或 TASKNEXUS_PLUGIN_FEISHU_APP_ID / TASKNEXUS_PLUGIN_FEISHU_APP_SECRET"
                .to_string(),
        ))
    }

    /// 从进程环境变量解析凭证
    ///
    /// `resolve` 的薄封装，读取 `std::env::vars()`
    pub fn resolve_from_process_env() -> Result<Self> {
        let env: HashMap<String, String> = env::vars().collect();
        Self::resolve(&env)
    }
}

/// 过滤空字符串，空值视为未设置
fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.as_str()).filter(|s| !s.is_empty())
}

/// 主配置结构
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// 渠道配置
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
}

/// 渠道配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    /// 渠道类型
    pub channel_type: String,
    /// 启用状态
    pub enabled: bool,
    /// 凭证配置
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

impl ChannelConfig {
    /// 从凭证映射中提取完整的飞书凭证
    ///
    /// 只有 app_id 和 app_secret 同时存在且非空时才返回 `Some`，
    /// 不完整的配置交由环境变量解析兜底
    pub fn feishu_credentials(&self) -> Option<FeishuCredentials> {
        let app_id = non_empty(self.credentials.get("app_id"))?;
        let app_secret = non_empty(self.credentials.get("app_secret"))?;
        Some(FeishuCredentials::new(app_id, app_secret))
    }
}

/// 配置加载器
#[derive(Debug, Clone)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// 创建新的配置加载器
    pub fn new() -> Self {
        Self
    }

    /// 加载配置
    pub async fn load(&self, path: &str) -> Result<Config> {
        tracing::info!(path = path, "加载配置文件");

        // 检查文件是否存在
        if !PathBuf::from(path).exists() {
            tracing::warn!(path = path, "配置文件不存在，使用默认配置");
            return Ok(Config::default());
        }

        // 读取文件内容
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("读取配置文件失败: {}", e)))?;

        // 解析 TOML
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("解析配置文件失败: {}", e)))?;

        // 环境变量替换
        self.substitute_env_vars(&mut config);

        tracing::info!("配置加载成功");
        Ok(config)
    }

    /// 替换渠道凭证中的环境变量
    fn substitute_env_vars(&self, config: &mut Config) {
        for (_, channel) in &mut config.channels {
            for (_, value) in &mut channel.credentials {
                *value = self.replace_env_vars(value);
            }
        }
    }

    /// 替换字符串中的环境变量
    ///
    /// 将 `${VAR_NAME}` 格式的字符串替换为对应的环境变量值，
    /// 未设置的变量保留原样
    fn replace_env_vars(&self, input: &str) -> String {
        let pattern = r"\$\{([^}]+)\}";

        let re = regex::Regex::new(pattern).expect("环境变量替换正则无效");
        let result = re.replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
        });

        result.to_string()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolve_primary_pair() {
        let env = env_of(&[("FEISHU_APP_ID", "cli_1"), ("FEISHU_APP_SECRET", "s1")]);

        let creds = FeishuCredentials::resolve(&env).unwrap();
        assert_eq!(creds.app_id, "cli_1");
        assert_eq!(creds.app_secret, "s1");
    }

    #[test]
    fn resolve_fallback_pair() {
        let env = env_of(&[
            ("TASKNEXUS_PLUGIN_FEISHU_APP_ID", "cli_2"),
            ("TASKNEXUS_PLUGIN_FEISHU_APP_SECRET", "s2"),
        ]);

        let creds = FeishuCredentials::resolve(&env).unwrap();
        assert_eq!(creds.app_id, "cli_2");
        assert_eq!(creds.app_secret, "s2");
    }

    #[test]
    fn primary_pair_wins_over_fallback() {
        let env = env_of(&[
            ("FEISHU_APP_ID", "cli_1"),
            ("FEISHU_APP_SECRET", "s1"),
            ("TASKNEXUS_PLUGIN_FEISHU_APP_ID", "cli_2"),
            ("TASKNEXUS_PLUGIN_FEISHU_APP_SECRET", "s2"),
        ]);

        let creds = FeishuCredentials::resolve(&env).unwrap();
        assert_eq!(creds.app_id, "cli_1");
        assert_eq!(creds.app_secret, "s1");
    }

    #[test]
    fn partial_primary_falls_through_to_fallback() {
        // 主前缀只有 app_id，按整体跳过，命中备用前缀
        let env = env_of(&[
            ("FEISHU_APP_ID", "cli_1"),
            ("TASKNEXUS_PLUGIN_FEISHU_APP_ID", "cli_2"),
            ("TASKNEXUS_PLUGIN_FEISHU_APP_SECRET", "s2"),
        ]);

        let creds = FeishuCredentials::resolve(&env).unwrap();
        assert_eq!(creds.app_id, "cli_2");
        assert_eq!(creds.app_secret, "s2");
    }

    #[test]
    fn partial_primary_without_fallback_fails() {
        let env = env_of(&[("FEISHU_APP_ID", "cli_1")]);

        let err = FeishuCredentials::resolve(&env).unwrap_err();
        assert!(matches!(err, Error::MissingConfiguration(_)));
    }

    #[test]
    fn empty_values_are_treated_as_absent() {
        let env = env_of(&[
            ("FEISHU_APP_ID", "cli_1"),
            ("FEISHU_APP_SECRET", ""),
            ("TASKNEXUS_PLUGIN_FEISHU_APP_ID", "cli_2"),
            ("TASKNEXUS_PLUGIN_FEISHU_APP_SECRET", "s2"),
        ]);

        let creds = FeishuCredentials::resolve(&env).unwrap();
        assert_eq!(creds.app_id, "cli_2");
    }

    #[test]
    fn empty_env_fails_with_missing_configuration() {
        let env = HashMap::new();

        let err = FeishuCredentials::resolve(&env).unwrap_err();
        assert!(matches!(err, Error::MissingConfiguration(_)));
    }

    #[test]
    fn config_toml_parses_and_ignores_unknown_sections() {
        // 旧版配置文件可能带有额外的段（如 [logging]），解析时应直接忽略
        let doc = r#"
            [logging]
            level = "debug"

            [channels.feishu]
            channel_type = "feishu"
            enabled = true

            [channels.feishu.credentials]
            app_id = "cli_4"
            app_secret = "s4"
        "#;

        let config: Config = toml::from_str(doc).unwrap();
        let channel = config.channels.get("feishu").unwrap();
        assert!(channel.enabled);

        let creds = channel.feishu_credentials().unwrap();
        assert_eq!(creds.app_id, "cli_4");
        assert_eq!(creds.app_secret, "s4");
    }

    #[test]
    fn channel_config_requires_complete_pair() {
        let mut config = ChannelConfig {
            channel_type: "feishu".to_string(),
            enabled: true,
            credentials: HashMap::new(),
        };
        assert!(config.feishu_credentials().is_none());

        config
            .credentials
            .insert("app_id".to_string(), "cli_3".to_string());
        assert!(config.feishu_credentials().is_none());

        config
            .credentials
            .insert("app_secret".to_string(), "s3".to_string());
        let creds = config.feishu_credentials().unwrap();
        assert_eq!(creds.app_id, "cli_3");
        assert_eq!(creds.app_secret, "s3");
    }
}

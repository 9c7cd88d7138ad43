//! 配置加载器实现
//!
//! 支持 YAML（figment，可用 `URL_MONITOR_` 前缀的环境变量覆盖）与 TOML 两种格式，
//! 均支持 `${VAR}` 环境变量替换

use crate::config::types::{validate_config, Config};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use regex::Regex;
use std::path::{Path, PathBuf};

/// 环境变量覆盖的前缀
pub const ENV_PREFIX: &str = "URL_MONITOR_";

/// 配置加载器trait，定义配置加载接口
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// 从文件加载配置
    ///
    /// # 参数
    /// * `path` - 配置文件路径
    ///
    /// # 返回
    /// * `Result<Config>` - 加载的配置或错误
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            }
            .into());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::ParseError(format!("读取文件失败: {}", e)))?;

        let config = self.load_from_string(&content).await?;

        tracing::info!(path = %path.display(), test_sets = config.test_sets.len(), "成功加载配置文件");
        Ok(config)
    }

    /// 从字符串加载配置
    ///
    /// # 参数
    /// * `content` - 配置文件内容
    ///
    /// # 返回
    /// * `Result<Config>` - 加载的配置或错误
    async fn load_from_string(&self, content: &str) -> Result<Config>;

    /// 验证配置
    ///
    /// # 参数
    /// * `config` - 要验证的配置
    ///
    /// # 返回
    /// * `Result<()>` - 验证结果
    fn validate(&self, config: &Config) -> Result<()> {
        validate_config(config).map_err(Into::into)
    }
}

/// 替换字符串中的 `${VAR}` 环境变量
///
/// # 参数
/// * `content` - 要处理的字符串
///
/// # 返回
/// * `Result<String, ConfigError>` - 替换后的字符串；变量未设置时返回 `EnvVarError`
pub fn substitute_env_vars(content: &str) -> std::result::Result<String, ConfigError> {
    let env_var_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::ParseError(format!("正则表达式错误: {}", e)))?;

    let mut result = content.to_string();

    for captures in env_var_regex.captures_iter(content) {
        let full_match = &captures[0];
        let var_name = &captures[1];

        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(full_match, &value);
            }
            Err(_) => {
                return Err(ConfigError::EnvVarError {
                    var: var_name.to_string(),
                });
            }
        }
    }

    Ok(result)
}

/// YAML配置加载器
#[derive(Debug, Clone)]
pub struct YamlConfigLoader {
    /// 是否启用环境变量替换
    enable_env_substitution: bool,
    /// 环境变量覆盖前缀
    env_prefix: String,
}

impl YamlConfigLoader {
    /// 创建新的YAML配置加载器
    ///
    /// # 参数
    /// * `enable_env_substitution` - 是否启用 `${VAR}` 替换
    pub fn new(enable_env_substitution: bool) -> Self {
        Self {
            enable_env_substitution,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// 解析YAML内容并叠加环境变量覆盖
    ///
    /// 只有包含 `__` 的变量参与覆盖，例如 `URL_MONITOR_CONFIG__REQUEST_TIMEOUT=5`；
    /// `URL_MONITOR_CONFIG`（配置文件路径）不会被当作配置内容。
    pub fn parse_yaml(&self, content: &str) -> Result<Config> {
        let processed_content = if self.enable_env_substitution {
            substitute_env_vars(content)?
        } else {
            content.to_string()
        };

        let env = Env::prefixed(&self.env_prefix)
            .filter(|key| key.as_str().contains("__"))
            .split("__");

        let config: Config = Figment::new()
            .merge(Yaml::string(&processed_content))
            .merge(env)
            .extract()
            .map_err(|e| ConfigError::ParseError(format!("YAML解析失败: {}", e)))?;

        Ok(config)
    }
}

impl Default for YamlConfigLoader {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ConfigLoader for YamlConfigLoader {
    async fn load_from_string(&self, content: &str) -> Result<Config> {
        let config = self.parse_yaml(content)?;
        self.validate(&config)?;

        tracing::debug!(config = ?config, "成功解析YAML配置");
        Ok(config)
    }
}

/// TOML配置加载器实现
#[derive(Debug, Clone)]
pub struct TomlConfigLoader {
    /// 是否启用环境变量替换
    enable_env_substitution: bool,
}

impl TomlConfigLoader {
    /// 创建新的TOML配置加载器
    ///
    /// # 参数
    /// * `enable_env_substitution` - 是否启用环境变量替换
    pub fn new(enable_env_substitution: bool) -> Self {
        Self {
            enable_env_substitution,
        }
    }

    /// 解析TOML内容
    pub fn parse_toml(&self, content: &str) -> Result<Config> {
        let processed_content = if self.enable_env_substitution {
            substitute_env_vars(content)?
        } else {
            content.to_string()
        };

        let config: Config = toml::from_str(&processed_content)
            .map_err(|e| ConfigError::ParseError(format!("TOML解析失败: {}", e)))?;

        Ok(config)
    }
}

#[async_trait]
impl ConfigLoader for TomlConfigLoader {
    async fn load_from_string(&self, content: &str) -> Result<Config> {
        let config = self.parse_toml(content)?;
        self.validate(&config)?;

        tracing::debug!(config = ?config, "成功解析TOML配置");
        Ok(config)
    }
}

/// 按扩展名选择加载器并加载配置文件
///
/// `.toml` 使用 TOML，其余（`.yaml`、`.yml` 等）使用 YAML。
pub async fn load_config_file(path: &Path) -> Result<Config> {
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        TomlConfigLoader::new(true).load_from_file(path).await
    } else {
        YamlConfigLoader::new(true).load_from_file(path).await
    }
}

/// 获取默认配置文件路径
///
/// 依次查找 `./url_monitor.yaml`、`<用户配置目录>/url-monitor/url_monitor.yaml`，
/// 都不存在时返回 `/etc/url_monitor.yaml`。
pub fn get_default_config_path() -> PathBuf {
    let local = PathBuf::from("url_monitor.yaml");
    if local.exists() {
        return local;
    }

    if let Some(user_config) = dirs::config_dir()
        .map(|config_dir| config_dir.join("url-monitor").join("url_monitor.yaml"))
        .filter(|path| path.exists())
    {
        return user_config;
    }

    PathBuf::from("/etc/url_monitor.yaml")
}

//! 配置数据结构定义
//!
//! 定义配置文档（`config` + `testSet`）的结构体和验证逻辑

use crate::check::template::KeyTemplate;
use crate::error::ConfigError;
use crate::sink::zabbix::{BackendAddress, DEFAULT_ZABBIX_PORT};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// 主配置结构，包含全局配置和按键名排序的 testSet 列表
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "ConfigDocument")]
pub struct Config {
    /// 全局配置项
    pub global: GlobalConfig,
    /// testSet 列表（按 key 升序）
    pub test_sets: Vec<TestSet>,
}

/// 配置文件的原始形态
#[derive(Debug, Clone, Deserialize)]
struct ConfigDocument {
    config: GlobalConfig,
    #[serde(rename = "testSet", default)]
    test_set: BTreeMap<String, TestSet>,
}

impl From<ConfigDocument> for Config {
    fn from(document: ConfigDocument) -> Self {
        let test_sets = document
            .test_set
            .into_iter()
            .map(|(key, mut test_set)| {
                test_set.key = key;
                test_set
            })
            .collect();

        Self {
            global: document.config,
            test_sets,
        }
    }
}

impl Config {
    /// 按 key 查找 testSet
    pub fn test_set(&self, key: &str) -> Option<&TestSet> {
        self.test_sets.iter().find(|ts| ts.key == key)
    }
}

/// 全局配置结构
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 默认请求超时时间（秒）
    #[serde(default, deserialize_with = "lenient::opt_seconds")]
    pub request_timeout: Option<f64>,
    /// 默认是否校验SSL证书
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub request_verify_ssl: Option<bool>,
    /// PID锁文件路径
    pub pidfile: Option<PathBuf>,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Zabbix 后端配置
    pub zabbix: Option<ZabbixConfig>,
    /// 身份提供者（别名 -> 认证配置）
    #[serde(default)]
    pub identity_providers: BTreeMap<String, IdentityProviderConfig>,
    /// 全局请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 跳过运行的条件（备用节点使用）
    #[serde(default)]
    pub skip_run_when: Option<SkipRunWhen>,
}

impl GlobalConfig {
    /// 全局默认超时
    ///
    /// # 返回
    /// * `Result<Option<Duration>, ConfigError>` - 未配置时为 `None`，取值非法时返回 `ValidationError`
    pub fn default_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.request_timeout
            .map(|seconds| seconds_to_duration(seconds, "request_timeout"))
            .transpose()
    }

    /// 全局SSL校验策略，未配置时默认校验
    pub fn default_verify_ssl(&self) -> bool {
        self.request_verify_ssl.unwrap_or(true)
    }
}

/// 日志配置
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// 日志级别（debug/info/warn/error/critical...）
    pub level: Option<String>,
    /// 输出目标，逗号分隔（console,file,syslog）
    pub outputs: Option<String>,
    /// 日志文件路径（outputs 包含 file 时使用）
    pub logfile: Option<PathBuf>,
    /// syslog 目标（outputs 包含 syslog 时使用）
    #[serde(default)]
    pub syslog: Option<SyslogConfig>,
    /// 是否使用JSON格式
    #[serde(default)]
    pub json: bool,
}

/// syslog 输出配置
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SyslogConfig {
    /// 服务器地址 host[:port]，默认端口 514
    pub server: Option<String>,
    /// 传输协议：tcp 或 udp（默认）
    pub socket: Option<String>,
}

/// Zabbix 后端配置
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ZabbixConfig {
    /// 服务器地址 host[:port]
    pub server: Option<String>,
    /// 指标所属的 Zabbix 主机名
    pub host: Option<String>,
    /// 指标键模板
    pub item_key_format: Option<String>,
    /// 执行摘要指标键
    pub checksummary_key_format: Option<String>,
    /// 发送超时（秒）
    #[serde(default, deserialize_with = "lenient::opt_seconds")]
    pub send_timeout: Option<f64>,
}

/// 解析校验后的 Zabbix 设置
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// 服务器地址
    pub address: BackendAddress,
    /// 指标所属主机
    pub metric_host: String,
    /// 指标键模板
    pub item_key_format: KeyTemplate,
    /// 执行摘要指标键
    pub checksummary_key: String,
    /// 发送超时
    pub send_timeout: Duration,
}

fn default_send_timeout() -> f64 {
    30.0
}

/// 把配置中的秒数转换为 `Duration`
///
/// 取值必须是有限的正数，且不超过 `Duration` 的表示范围。
///
/// # 参数
/// * `seconds` - 秒数
/// * `field` - 出错时报告的配置项
///
/// # 返回
/// * `Result<Duration, ConfigError>` - 非法取值返回 `ValidationError`
pub fn seconds_to_duration(seconds: f64, field: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: String| {
        ConfigError::ValidationError(format!("{field} 必须为正数秒数，当前为 {seconds}: {reason}"))
    };
    if seconds <= 0.0 {
        return Err(invalid("不能小于等于 0".to_string()));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| invalid(e.to_string()))
}

impl ZabbixConfig {
    /// 校验并解析为强类型设置
    pub fn resolve(&self) -> Result<BackendSettings, ConfigError> {
        let required = |value: &Option<String>, field: &str| {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingGlobal {
                    field: format!("zabbix: {field}"),
                })
        };

        let server = required(&self.server, "server")?;
        let metric_host = required(&self.host, "host")?;
        let item_key_format = KeyTemplate::parse(&required(&self.item_key_format, "item_key_format")?)?;
        let checksummary_key = required(&self.checksummary_key_format, "checksummary_key_format")?;

        let send_timeout = seconds_to_duration(
            self.send_timeout.unwrap_or_else(default_send_timeout),
            "zabbix: send_timeout",
        )?;

        Ok(BackendSettings {
            address: BackendAddress::parse(&server, DEFAULT_ZABBIX_PORT)?,
            metric_host,
            item_key_format,
            checksummary_key,
            send_timeout,
        })
    }
}

/// 身份提供者配置，形如 `alias: { basic: { username, password } }`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum IdentityProviderConfig {
    /// HTTP Basic 认证
    Basic { username: String, password: String },
    /// Bearer Token 认证
    Bearer { token: String },
    /// 附加固定请求头
    Headers { headers: HashMap<String, String> },
    /// 不附加认证信息
    None {},
}

/// 跳过运行条件的原始配置
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SkipRunWhen {
    /// 基于 puppet facter 事实
    pub puppet_facter: Option<FacterConditionConfig>,
    /// 基于 shell 命令输出
    pub shell: Option<ShellConditionConfig>,
    /// 基于环境变量
    pub environment: Option<EnvironmentConditionConfig>,
}

/// facter 条件
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FacterConditionConfig {
    pub script: Option<String>,
    pub fact: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub value: Option<String>,
}

/// shell 条件
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ShellConditionConfig {
    pub script: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub stdout: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub code: Option<String>,
}

/// 环境变量条件
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EnvironmentConditionConfig {
    pub variable: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub value: Option<String>,
}

/// 一个被监控的HTTP资源及其提取规则
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TestSet {
    /// testSet 名称（来自配置映射的键）
    #[serde(skip)]
    pub key: String,
    /// 请求地址
    pub uri: Option<String>,
    /// 期望的HTTP状态码（按字符串比较）
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub ok_http_code: Option<String>,
    /// 身份提供者别名，或 `none`
    pub identity_provider: Option<String>,
    /// 响应格式（json/xml/text）
    pub response_type: Option<String>,
    /// testSet 级别的超时覆盖（秒）
    #[serde(default, deserialize_with = "lenient::opt_seconds")]
    pub request_timeout: Option<f64>,
    /// testSet 级别的SSL校验覆盖
    #[serde(default, alias = "verify_ssl", deserialize_with = "lenient::opt_bool")]
    pub request_verify_ssl: Option<bool>,
    /// 提取规则列表
    #[serde(rename = "testElements")]
    pub test_elements: Option<Vec<TestElement>>,
}

impl TestSet {
    /// 解析本 testSet 的超时：本地覆盖优先，否则全局默认
    ///
    /// # 返回
    /// * `Result<Duration, ConfigError>` - 本地取值非法时返回 `ValidationError`，
    ///   两者都没有时返回 `MissingDefaultTimeout`
    pub fn resolve_timeout(&self, default: Option<Duration>) -> Result<Duration, ConfigError> {
        match self.request_timeout {
            Some(seconds) => {
                seconds_to_duration(seconds, &format!("testSet `{}`: request_timeout", self.key))
            }
            None => default.ok_or_else(|| ConfigError::MissingDefaultTimeout {
                test_set: self.key.clone(),
            }),
        }
    }

    /// 解析本 testSet 的SSL校验策略
    pub fn resolve_verify_ssl(&self, default: bool) -> bool {
        self.request_verify_ssl.unwrap_or(default)
    }
}

/// 路径在配置中使用的字段名
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PathKey {
    /// `path`
    #[default]
    Path,
    /// `jsonvalue`
    JsonValue,
}

impl PathKey {
    /// 配置中的字段名
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKey::Path => "path",
            PathKey::JsonValue => "jsonvalue",
        }
    }
}

/// testElement 的原始形态，`path` 与 `jsonvalue` 分开接收
#[derive(Debug, Clone, Deserialize)]
struct TestElementDocument {
    path: Option<String>,
    jsonvalue: Option<String>,
    datatype: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    key: Option<String>,
    unit_of_measure: Option<String>,
    metricname: Option<String>,
    response_type: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// testSet 中的一条提取规则
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(from = "TestElementDocument")]
pub struct TestElement {
    /// 提取路径表达式
    pub path: Option<String>,
    /// 路径来自 `path` 还是 `jsonvalue`
    pub path_key: PathKey,
    /// 逗号分隔的数据类型列表
    pub datatype: Option<String>,
    /// 指标键片段
    pub key: Option<String>,
    /// 计量单位
    pub unit_of_measure: Option<String>,
    /// 友好名称
    pub metricname: Option<String>,
    /// 元素级别的响应格式覆盖
    pub response_type: Option<String>,
    /// 其余自定义字段（可用于键模板与自动发现）
    pub extra: BTreeMap<String, Value>,
}

impl From<TestElementDocument> for TestElement {
    fn from(document: TestElementDocument) -> Self {
        let mut extra = document.extra;
        // 两者都写时 `path` 生效，`jsonvalue` 作为普通字段保留
        let (path, path_key) = match (document.path, document.jsonvalue) {
            (Some(path), jsonvalue) => {
                if let Some(jsonvalue) = jsonvalue {
                    extra.insert(PathKey::JsonValue.as_str().to_string(), Value::String(jsonvalue));
                }
                (Some(path), PathKey::Path)
            }
            (None, Some(jsonvalue)) => (Some(jsonvalue), PathKey::JsonValue),
            (None, None) => (None, PathKey::Path),
        };

        Self {
            path,
            path_key,
            datatype: document.datatype,
            key: document.key,
            unit_of_measure: document.unit_of_measure,
            metricname: document.metricname,
            response_type: document.response_type,
            extra,
        }
    }
}

impl TestElement {
    /// 拆分 datatype 列表（去除首尾空白，保持顺序）
    pub fn datatypes(&self) -> Vec<String> {
        self.datatype
            .as_deref()
            .map(|raw| raw.split(',').map(|d| d.trim().to_string()).collect())
            .unwrap_or_default()
    }

    /// 按配置中的字段名导出全部字段，未配置的字段不输出
    pub fn fields(&self) -> Map<String, Value> {
        let mut fields: Map<String, Value> = self
            .extra
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let named = [
            (self.path_key.as_str(), &self.path),
            ("datatype", &self.datatype),
            ("key", &self.key),
            ("unit_of_measure", &self.unit_of_measure),
            ("metricname", &self.metricname),
            ("response_type", &self.response_type),
        ];
        for (name, value) in named {
            if let Some(value) = value {
                fields.insert(name.to_string(), Value::String(value.clone()));
            }
        }
        fields
    }
}

/// 配置验证函数
///
/// 只检查全局性、致命的问题；单个 testSet 的结构问题在检测时报告，
/// 不会阻止其它 testSet 运行。
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), ConfigError>` - 验证结果
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let global = &config.global;

    if global.pidfile.is_none() {
        return Err(ConfigError::MissingGlobal {
            field: "pidfile".to_string(),
        });
    }

    match &global.zabbix {
        Some(zabbix) => {
            zabbix.resolve()?;
        }
        None => {
            return Err(ConfigError::MissingGlobal {
                field: "zabbix".to_string(),
            })
        }
    }

    let default_timeout = global.default_timeout()?;

    if let Some(ref skip) = global.skip_run_when {
        crate::skip::conditions_from_config(skip)?;
    }

    for test_set in &config.test_sets {
        test_set.resolve_timeout(default_timeout)?;

        if let Some(ref provider) = test_set.identity_provider {
            if !provider.eq_ignore_ascii_case("none")
                && !global.identity_providers.contains_key(provider)
            {
                return Err(ConfigError::UnknownIdentityProvider {
                    test_set: test_set.key.clone(),
                    provider: provider.clone(),
                });
            }
        }
    }

    Ok(())
}

/// 宽松的标量解析：YAML 中的数字、布尔与字符串可以互换
mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(i64),
        Float(f64),
        Str(String),
    }

    impl Scalar {
        fn into_string(self) -> String {
            match self {
                Scalar::Bool(b) => b.to_string(),
                Scalar::Int(i) => i.to_string(),
                Scalar::Float(f) => f.to_string(),
                Scalar::Str(s) => s,
            }
        }
    }

    pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_string))
    }

    pub fn opt_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Scalar>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Scalar::Int(i)) => Ok(Some(i as f64)),
            Some(Scalar::Float(f)) => Ok(Some(f)),
            Some(Scalar::Str(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("无效的秒数: {s}"))),
            Some(Scalar::Bool(b)) => Err(serde::de::Error::custom(format!("无效的秒数: {b}"))),
        }
    }

    pub fn opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Scalar>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Scalar::Bool(b)) => Ok(Some(b)),
            Some(Scalar::Int(i)) => Ok(Some(i != 0)),
            Some(Scalar::Float(f)) => Ok(Some(f != 0.0)),
            Some(Scalar::Str(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "y" | "on" | "1" => Ok(Some(true)),
                "false" | "no" | "n" | "off" | "0" => Ok(Some(false)),
                _ => Err(serde::de::Error::custom(format!("无效的布尔值: {s}"))),
            },
        }
    }
}

//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use thiserror::Error;

/// URL Monitor 应用程序的主要错误类型
#[derive(Error, Debug)]
pub enum UrlMonitorError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// HTTP探测相关错误
    #[error("探测错误: {0}")]
    Probe(#[from] ProbeError),

    /// 指标发送相关错误
    #[error("指标发送错误: {0}")]
    Transmit(#[from] TransmitError),

    /// 进程锁相关错误
    #[error("进程锁错误: {0}")]
    Lock(#[from] LockError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },

    /// 全局配置缺少必填项
    #[error("全局配置缺少 `config: {field}`，无法继续")]
    MissingGlobal { field: String },

    /// testSet 缺少必填字段
    #[error("testSet `{test_set}` 缺少 `{field}`，检测无法执行")]
    MissingField { test_set: String, field: String },

    /// testElement 缺少必填字段
    #[error("testSet `{test_set}` 的第 {element} 个 testElement 缺少 `{field}`")]
    MissingElementField {
        test_set: String,
        element: usize,
        field: String,
    },

    /// datatype 为空或包含空项
    #[error("testSet `{test_set}` 的 testElement `{element}` datatype 无效: `{datatype}`")]
    EmptyDatatype {
        test_set: String,
        element: String,
        datatype: String,
    },

    /// 未注册的响应格式
    #[error("testSet `{test_set}` 使用了不支持的 response_type `{response_type}`")]
    UnknownResponseType {
        test_set: String,
        response_type: String,
    },

    /// 未定义的身份提供者
    #[error("testSet `{test_set}` 引用了未定义的 identity_provider `{provider}`")]
    UnknownIdentityProvider { test_set: String, provider: String },

    /// 模板中存在无法解析的占位符
    #[error("键模板 `{template}` 中的占位符 `{{{placeholder}}}` 无法解析")]
    UnresolvedPlaceholder {
        template: String,
        placeholder: String,
    },

    /// 模板格式错误（大括号不匹配等）
    #[error("键模板 `{template}` 格式错误: {reason}")]
    MalformedTemplate { template: String, reason: String },

    /// URI 无法解析出主机名
    #[error("无法解析URI `{uri}`: {reason}")]
    MalformedUri { uri: String, reason: String },

    /// 既没有 testSet 级别也没有全局默认超时
    #[error("testSet `{test_set}` 未配置 request_timeout，且缺少全局默认值 `config: request_timeout`")]
    MissingDefaultTimeout { test_set: String },

    /// 监控后端地址无效
    #[error("无效的 zabbix server 地址 `{address}`: {reason}")]
    InvalidBackendAddress { address: String, reason: String },

    /// discover 命令缺少 --datatype
    #[error(
        "discover 需要 --datatype 参数，当前配置中可用的 datatype: [{}]",
        .available.join(", ")
    )]
    MissingDatatypeFilter { available: Vec<String> },
}

/// HTTP探测错误类型
#[derive(Error, Debug)]
pub enum ProbeError {
    /// 请求超时
    #[error("请求超时: {uri}")]
    Timeout { uri: String },

    /// 连接失败
    #[error("连接失败: {uri}: {reason}")]
    Connect { uri: String, reason: String },

    /// TLS/证书错误
    #[error("SSL/TLS 错误: {uri}: {reason}")]
    Tls { uri: String, reason: String },

    /// 读取响应体失败
    #[error("读取响应体失败: {uri}: {reason}")]
    Body { uri: String, reason: String },

    /// 未知的身份提供者（配置校验后不应出现）
    #[error("未注册的身份提供者: {0}")]
    UnknownIdentityProvider(String),

    /// 其他请求错误
    #[error("请求失败: {uri}: {reason}")]
    Request { uri: String, reason: String },

    /// 创建HTTP客户端失败
    #[error("创建HTTP客户端失败: {0}")]
    Client(#[from] reqwest::Error),
}

/// 指标发送错误类型
#[derive(Error, Debug)]
pub enum TransmitError {
    /// 网络IO错误
    #[error("与 {address} 通信失败: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// 发送超时
    #[error("发送到 {address} 超时（{timeout_secs}秒）")]
    Timeout { address: String, timeout_secs: f64 },

    /// 响应帧格式错误
    #[error("来自 {address} 的响应格式错误: {reason}")]
    Protocol { address: String, reason: String },

    /// 服务端拒绝了这批数据
    #[error("{address} 拒绝了指标数据: {response}")]
    Rejected { address: String, response: String },

    /// 序列化请求失败
    #[error("序列化指标失败: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 进程锁错误类型
#[derive(Error, Debug)]
pub enum LockError {
    /// 已有实例在运行
    #[error("进程已在运行，PID {pid}（锁文件 {path}）")]
    AlreadyRunning { pid: u32, path: String },

    /// 读写锁文件失败
    #[error("锁文件 {path} 操作失败: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, UrlMonitorError>;

//! URL Monitor - HTTP接口探测与 Zabbix 指标上报工具
//!
//! 按声明式的 testSet 配置：
//! - 对每个接口发起一次HTTP请求
//! - 按路径从 JSON/XML/文本响应中提取值
//! - 按 datatype 生成指标并整批发送到 Zabbix
//! - 导出 Zabbix 低级自动发现文档

pub mod check;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod lock;
pub mod logging;
pub mod probe;
pub mod sink;
pub mod skip;

// 重新导出主要类型
pub use check::{CheckEvaluator, CheckOutcome, CheckReport, CheckRunner};
pub use config::{Config, GlobalConfig, TestElement, TestSet};
pub use error::UrlMonitorError;

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

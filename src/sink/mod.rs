//! 指标发送模块
//!
//! 把一批指标整体发送到监控后端，不重试、不跟踪部分投递

pub mod zabbix;

pub use zabbix::{BackendAddress, SendResponse, ZabbixSender, DEFAULT_ZABBIX_PORT};

use crate::error::TransmitError;
use async_trait::async_trait;
use serde::Serialize;

/// 一条待发送的指标
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    /// 指标所属主机
    pub host: String,
    /// 指标键
    pub key: String,
    /// 指标值，提取失败时为空
    pub value: Option<String>,
    /// 采集时间（Unix 秒）
    pub clock: i64,
}

impl Metric {
    /// 以当前时间创建指标
    pub fn new(host: impl Into<String>, key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            host: host.into(),
            key: key.into(),
            value,
            clock: chrono::Utc::now().timestamp(),
        }
    }
}

/// 指标发送器trait
#[async_trait]
pub trait MetricSender: Send + Sync {
    /// 发送一批指标
    ///
    /// # 参数
    /// * `metrics` - 指标列表
    ///
    /// # 返回
    /// * `Result<SendResponse, TransmitError>` - 整批成功或整批失败
    async fn send(&self, metrics: &[Metric]) -> Result<SendResponse, TransmitError>;
}

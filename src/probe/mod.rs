//! HTTP探测模块
//!
//! 每个 testSet 发起一次HTTP请求，返回状态码与原始响应体

pub mod auth;
pub mod http;

pub use auth::{AuthProvider, AuthRegistry};
pub use http::HttpProbe;

use crate::error::ProbeError;
use async_trait::async_trait;
use std::time::Duration;

/// 一次探测的参数
#[derive(Debug, Clone)]
pub struct ProbeRequest<'a> {
    /// 请求地址
    pub uri: &'a str,
    /// 超时时间
    pub timeout: Duration,
    /// 是否校验SSL证书
    pub verify_ssl: bool,
    /// 身份提供者名称
    pub identity_provider: &'a str,
}

/// 一次探测的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    /// HTTP状态码
    pub status_code: u16,
    /// 原始响应体
    pub content: String,
    /// 请求耗时
    pub elapsed: Duration,
}

/// 探测器trait
#[async_trait]
pub trait Probe: Send + Sync {
    /// 执行一次探测，不做任何重试
    ///
    /// # 参数
    /// * `request` - 探测参数
    ///
    /// # 返回
    /// * `Result<ProbeResult, ProbeError>` - 收到任何HTTP响应都视为成功，传输层失败返回错误
    async fn probe(&self, request: &ProbeRequest<'_>) -> Result<ProbeResult, ProbeError>;
}

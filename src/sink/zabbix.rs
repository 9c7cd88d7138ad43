//! Zabbix sender 协议实现
//!
//! 帧格式：`ZBXD` + 标志位 `0x01` + 8字节小端长度 + JSON 负载。
//! 请求与响应使用相同的帧格式。

use super::{Metric, MetricSender};
use crate::error::{ConfigError, TransmitError};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Zabbix trapper 默认端口
pub const DEFAULT_ZABBIX_PORT: u16 = 10051;

const HEADER_MAGIC: &[u8; 4] = b"ZBXD";
const FLAG_ZABBIX_PROTOCOL: u8 = 0x01;
const FLAG_COMPRESSED: u8 = 0x02;
const HEADER_LEN: usize = 13;
const MAX_RESPONSE_LEN: u64 = 16 * 1024 * 1024;

/// 监控后端地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAddress {
    /// 主机名或IP
    pub host: String,
    /// 端口
    pub port: u16,
}

impl BackendAddress {
    /// 解析 `host`、`host:port`、`[v6]` 或 `[v6]:port`
    ///
    /// # 参数
    /// * `address` - 配置中的地址字符串
    /// * `default_port` - 未写端口时使用的端口
    ///
    /// # 返回
    /// * `Result<Self, ConfigError>` - 主机为空或端口无效时返回 `InvalidBackendAddress`
    pub fn parse(address: &str, default_port: u16) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidBackendAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = address.trim();

        let (host, port) = if let Some(rest) = trimmed.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("缺少 `]`"))?;
            match tail {
                "" => (host, None),
                _ => {
                    let port = tail
                        .strip_prefix(':')
                        .ok_or_else(|| invalid("`]` 之后只能跟 `:端口`"))?;
                    (host, Some(port))
                }
            }
        } else if trimmed.matches(':').count() == 1 {
            let (host, port) = trimmed.split_once(':').unwrap_or((trimmed, ""));
            (host, Some(port))
        } else {
            // 没有冒号，或是不带方括号的 IPv6 地址
            (trimmed, None)
        };

        if host.is_empty() {
            return Err(invalid("主机名为空"));
        }

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| invalid(&format!("端口 `{port}` 无效")))?,
            None => default_port,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Serialize)]
struct SenderRequest<'a> {
    request: &'static str,
    data: &'a [Metric],
    clock: i64,
}

#[derive(Deserialize)]
struct SenderReply {
    response: String,
    #[serde(default)]
    info: Option<String>,
}

/// 服务端对一批指标的处理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendResponse {
    /// 已处理条数
    pub processed: Option<u64>,
    /// 失败条数
    pub failed: Option<u64>,
    /// 总条数
    pub total: Option<u64>,
    /// 服务端耗时（秒）
    pub seconds_spent: Option<f64>,
    /// 原始 info 字符串
    pub info: String,
}

impl SendResponse {
    /// 解析形如 `processed: 1; failed: 0; total: 1; seconds spent: 0.000055` 的 info
    pub fn from_info(info: &str) -> Self {
        let counter = |name: &str| -> Option<String> {
            let pattern = Regex::new(&format!(r"(?i){name}:\s*([0-9.]+)")).ok()?;
            pattern
                .captures(info)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        };

        Self {
            processed: counter("processed").and_then(|v| v.parse().ok()),
            failed: counter("failed").and_then(|v| v.parse().ok()),
            total: counter("total").and_then(|v| v.parse().ok()),
            seconds_spent: counter("seconds spent").and_then(|v| v.parse().ok()),
            info: info.to_string(),
        }
    }
}

/// 为负载加上协议头
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(HEADER_MAGIC);
    frame.push(FLAG_ZABBIX_PROTOCOL);
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// 解析协议头，返回负载长度
fn decode_header(header: &[u8; HEADER_LEN]) -> Result<u64, String> {
    if &header[..4] != HEADER_MAGIC {
        return Err(format!("协议头无效: {:?}", &header[..4]));
    }
    let flags = header[4];
    if flags & FLAG_ZABBIX_PROTOCOL == 0 {
        return Err(format!("不支持的标志位 0x{flags:02x}"));
    }
    if flags & FLAG_COMPRESSED != 0 {
        return Err("不支持压缩的响应".to_string());
    }

    let mut length = [0u8; 8];
    length.copy_from_slice(&header[5..]);
    Ok(u64::from_le_bytes(length))
}

/// Zabbix sender
pub struct ZabbixSender {
    address: BackendAddress,
    timeout: Duration,
}

impl ZabbixSender {
    /// 创建新的发送器
    ///
    /// # 参数
    /// * `address` - Zabbix server/proxy 地址
    /// * `timeout` - 整个发送过程（连接、写入、读取响应）的超时
    pub fn new(address: BackendAddress, timeout: Duration) -> Self {
        Self { address, timeout }
    }

    /// 目标地址
    pub fn address(&self) -> &BackendAddress {
        &self.address
    }

    /// 构建 sender data 请求帧
    pub fn encode_request(metrics: &[Metric], clock: i64) -> Result<Vec<u8>, TransmitError> {
        let payload = serde_json::to_vec(&SenderRequest {
            request: "sender data",
            data: metrics,
            clock,
        })?;
        Ok(encode_frame(&payload))
    }

    async fn exchange(&self, frame: &[u8]) -> Result<Vec<u8>, TransmitError> {
        let address = self.address.to_string();
        let io_error = |source: std::io::Error| TransmitError::Io {
            address: address.clone(),
            source,
        };

        let mut stream = TcpStream::connect((self.address.host.as_str(), self.address.port))
            .await
            .map_err(io_error)?;
        stream.write_all(frame).await.map_err(io_error)?;
        stream.flush().await.map_err(io_error)?;

        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await.map_err(io_error)?;
        let length = decode_header(&header).map_err(|reason| TransmitError::Protocol {
            address: address.clone(),
            reason,
        })?;
        if length > MAX_RESPONSE_LEN {
            return Err(TransmitError::Protocol {
                address: address.clone(),
                reason: format!("响应长度 {length} 超出上限"),
            });
        }

        let mut body = vec![0u8; length as usize];
        stream.read_exact(&mut body).await.map_err(io_error)?;
        Ok(body)
    }
}

#[async_trait]
impl MetricSender for ZabbixSender {
    async fn send(&self, metrics: &[Metric]) -> Result<SendResponse, TransmitError> {
        let address = self.address.to_string();
        let frame = Self::encode_request(metrics, chrono::Utc::now().timestamp())?;

        tracing::info!(address = %address, count = metrics.len(), "发送指标到 Zabbix");
        tracing::debug!(metrics = ?metrics, "待发送的指标");

        let body = match timeout(self.timeout, self.exchange(&frame)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransmitError::Timeout {
                    address,
                    timeout_secs: self.timeout.as_secs_f64(),
                })
            }
        };

        let reply: SenderReply =
            serde_json::from_slice(&body).map_err(|e| TransmitError::Protocol {
                address: address.clone(),
                reason: format!("响应不是合法JSON: {e}"),
            })?;

        if reply.response != "success" {
            return Err(TransmitError::Rejected {
                address,
                response: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let response = SendResponse::from_info(reply.info.as_deref().unwrap_or_default());
        if response.failed.unwrap_or(0) > 0 {
            tracing::warn!(address = %address, info = %response.info, "Zabbix 未能处理部分指标");
        } else {
            tracing::debug!(address = %address, info = %response.info, "Zabbix 已接收指标");
        }

        Ok(response)
    }
}

//! 基于 reqwest 的HTTP探测器

use super::{AuthRegistry, Probe, ProbeRequest, ProbeResult};
use crate::error::ProbeError;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::error::Error as _;
use std::time::Instant;
use tokio::time::timeout;

/// HTTP探测器
///
/// 持有校验证书与不校验证书两个客户端，按 testSet 的 `request_verify_ssl` 选用。
pub struct HttpProbe {
    /// 校验证书的客户端
    secure_client: Client,
    /// 不校验证书的客户端
    insecure_client: Client,
    /// 每个请求都附加的请求头
    headers: HashMap<String, String>,
    /// 身份提供者
    auth: AuthRegistry,
}

impl HttpProbe {
    /// 创建新的HTTP探测器
    ///
    /// # 参数
    /// * `headers` - 全局请求头
    /// * `auth` - 身份提供者表
    ///
    /// # 返回
    /// * `Result<Self, ProbeError>` - 探测器实例
    pub fn new(headers: HashMap<String, String>, auth: AuthRegistry) -> Result<Self, ProbeError> {
        let user_agent = format!("{}/{}", crate::APP_NAME, crate::VERSION);

        let secure_client = Client::builder().user_agent(&user_agent).build()?;
        let insecure_client = Client::builder()
            .user_agent(&user_agent)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            secure_client,
            insecure_client,
            headers,
            auth,
        })
    }

    fn client(&self, verify_ssl: bool) -> &Client {
        if verify_ssl {
            &self.secure_client
        } else {
            &self.insecure_client
        }
    }

    /// 把 reqwest 错误归类为探测错误
    fn classify_error(uri: &str, error: &reqwest::Error) -> ProbeError {
        let uri = uri.to_string();

        // 证书错误通常也带 is_connect 标记，需要先从错误链里识别
        let mut detail = error.to_string();
        let mut source = error.source();
        while let Some(inner) = source {
            detail.push_str(": ");
            detail.push_str(&inner.to_string());
            source = inner.source();
        }
        let lowered = detail.to_lowercase();

        if error.is_timeout() {
            ProbeError::Timeout { uri }
        } else if lowered.contains("certificate")
            || lowered.contains("tls")
            || lowered.contains("ssl")
        {
            ProbeError::Tls {
                uri,
                reason: detail,
            }
        } else if error.is_connect() {
            ProbeError::Connect {
                uri,
                reason: detail,
            }
        } else if error.is_body() || error.is_decode() {
            ProbeError::Body {
                uri,
                reason: detail,
            }
        } else {
            ProbeError::Request {
                uri,
                reason: detail,
            }
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, request: &ProbeRequest<'_>) -> Result<ProbeResult, ProbeError> {
        let provider = self
            .auth
            .get(request.identity_provider)
            .ok_or_else(|| ProbeError::UnknownIdentityProvider(request.identity_provider.to_string()))?;

        let mut builder = self.client(request.verify_ssl).get(request.uri);
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        let builder = provider.authorize(builder).timeout(request.timeout);

        let start_time = Instant::now();
        let uri = request.uri;

        // 超时覆盖连接、发送与读取响应体的全过程
        let exchange = async {
            let response = builder
                .send()
                .await
                .map_err(|e| Self::classify_error(uri, &e))?;
            let status_code = response.status().as_u16();
            let content = response.text().await.map_err(|e| ProbeError::Body {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
            Ok::<_, ProbeError>((status_code, content))
        };

        let (status_code, content) = match timeout(request.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProbeError::Timeout {
                    uri: uri.to_string(),
                })
            }
        };

        let elapsed = start_time.elapsed();
        tracing::debug!(
            uri = uri,
            status_code = status_code,
            elapsed_ms = elapsed.as_millis() as u64,
            "HTTP探测完成"
        );

        Ok(ProbeResult {
            status_code,
            content,
            elapsed,
        })
    }
}

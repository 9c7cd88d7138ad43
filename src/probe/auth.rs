//! 身份提供者模块
//!
//! 按名称注册的认证策略，在加载配置时构建，探测时附加到请求上

use crate::config::types::IdentityProviderConfig;
use reqwest::RequestBuilder;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// 认证策略trait
pub trait AuthProvider: Send + Sync {
    /// 为请求附加认证信息
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder;
}

/// 不附加任何认证信息
pub struct NoAuth;

impl AuthProvider for NoAuth {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
    }
}

/// HTTP Basic 认证
pub struct BasicAuth {
    username: String,
    password: String,
}

impl AuthProvider for BasicAuth {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }
}

/// Bearer Token 认证
pub struct BearerAuth {
    token: String,
}

impl AuthProvider for BearerAuth {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }
}

/// 固定请求头
pub struct HeaderAuth {
    headers: HashMap<String, String>,
}

impl AuthProvider for HeaderAuth {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        self.headers
            .iter()
            .fold(request, |request, (key, value)| request.header(key, value))
    }
}

/// 认证策略表
///
/// 名称 `none`（不区分大小写）始终可用。
#[derive(Clone)]
pub struct AuthRegistry {
    providers: HashMap<String, Arc<dyn AuthProvider>>,
}

impl AuthRegistry {
    /// 只包含 `none` 的策略表
    pub fn new() -> Self {
        let mut providers: HashMap<String, Arc<dyn AuthProvider>> = HashMap::new();
        providers.insert("none".to_string(), Arc::new(NoAuth));
        Self { providers }
    }

    /// 从配置构建
    pub fn from_config(configs: &BTreeMap<String, IdentityProviderConfig>) -> Self {
        let mut registry = Self::new();
        for (alias, config) in configs {
            let provider: Arc<dyn AuthProvider> = match config {
                IdentityProviderConfig::Basic { username, password } => Arc::new(BasicAuth {
                    username: username.clone(),
                    password: password.clone(),
                }),
                IdentityProviderConfig::Bearer { token } => Arc::new(BearerAuth {
                    token: token.clone(),
                }),
                IdentityProviderConfig::Headers { headers } => Arc::new(HeaderAuth {
                    headers: headers.clone(),
                }),
                IdentityProviderConfig::None {} => Arc::new(NoAuth),
            };
            registry.register(alias, provider);
        }
        registry
    }

    /// 注册认证策略
    pub fn register(&mut self, name: &str, provider: Arc<dyn AuthProvider>) {
        self.providers.insert(name.to_string(), provider);
    }

    /// 按名称查找认证策略
    pub fn get(&self, name: &str) -> Option<Arc<dyn AuthProvider>> {
        if name.eq_ignore_ascii_case("none") {
            return self.providers.get("none").cloned();
        }
        self.providers.get(name).cloned()
    }
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

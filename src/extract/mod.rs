//! 响应值提取模块
//!
//! 按 response_type 注册提取策略，从响应体中按路径取出单个值。
//! 提取从不向调用方报错：路径非法、节点不存在、响应体无法解析都归为 [`ExtractedValue::Absent`]。

pub mod json;
pub mod text;
pub mod xml;

pub use json::JsonExtractor;
pub use text::TextExtractor;
pub use xml::XmlExtractor;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// 一次提取的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedValue {
    /// 找到了值（保留原始类型）
    Present(Value),
    /// 未找到，附带可选的诊断信息
    Absent { reason: Option<String> },
}

impl ExtractedValue {
    /// 构造带诊断信息的缺失结果
    pub fn absent(reason: impl Into<String>) -> Self {
        Self::Absent {
            reason: Some(reason.into()),
        }
    }

    /// 构造不带诊断信息的缺失结果
    pub fn missing() -> Self {
        Self::Absent { reason: None }
    }

    /// 是否找到了值
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// 诊断信息
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Absent { reason } => reason.as_deref(),
            Self::Present(_) => None,
        }
    }

    /// 转换为发送给监控后端的字符串值
    ///
    /// 字符串原样返回，其它标量使用JSON文本，结构体压缩为JSON。
    pub fn to_metric_value(&self) -> Option<String> {
        match self {
            Self::Present(Value::String(s)) => Some(s.clone()),
            Self::Present(Value::Null) | Self::Absent { .. } => None,
            Self::Present(other) => Some(other.to_string()),
        }
    }
}

/// 提取策略trait
pub trait ValueExtractor: Send + Sync {
    /// 从响应内容中按路径提取单个值
    ///
    /// 必须是纯函数：相同输入总是得到相同结果。
    fn extract(&self, content: &str, path: &str) -> ExtractedValue;
}

/// 按 response_type 索引的提取策略表
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn ValueExtractor>>,
}

impl ExtractorRegistry {
    /// 创建空的策略表
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// 创建包含 json/xml/text 的默认策略表
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("json", Arc::new(JsonExtractor));
        registry.register("xml", Arc::new(XmlExtractor));
        registry.register("text", Arc::new(TextExtractor));
        registry
    }

    /// 注册（或替换）一个提取策略，response_type 不区分大小写
    pub fn register(&mut self, response_type: &str, extractor: Arc<dyn ValueExtractor>) {
        self.extractors
            .insert(response_type.trim().to_lowercase(), extractor);
    }

    /// 是否支持该 response_type
    pub fn supports(&self, response_type: &str) -> bool {
        self.extractors
            .contains_key(&response_type.trim().to_lowercase())
    }

    /// 已注册的 response_type（排序后）
    pub fn response_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.extractors.keys().cloned().collect();
        types.sort();
        types
    }

    /// 执行提取
    pub fn extract(&self, content: &str, response_type: &str, path: &str) -> ExtractedValue {
        match self.extractors.get(&response_type.trim().to_lowercase()) {
            Some(extractor) => extractor.extract(content, path),
            None => ExtractedValue::absent(format!("不支持的 response_type: {response_type}")),
        }
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("response_types", &self.response_types())
            .finish()
    }
}

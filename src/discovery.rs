//! Zabbix 低级自动发现（LLD）
//!
//! 把匹配指定 datatype 的 testElement 导出为 `{"data": [...]}` 文档，
//! 每个字段名改写为 `{#FIELDNAME}` 宏形式

use crate::config::types::TestSet;
use crate::error::ConfigError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// 发现文档
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscoveryDocument {
    /// 发现记录
    pub data: Vec<Map<String, Value>>,
}

impl DiscoveryDocument {
    /// 以3个空格缩进输出JSON
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// 把字段名改写为 LLD 宏
pub fn lld_macro(field: &str) -> String {
    format!("{{#{}}}", field.to_uppercase())
}

/// 发现文档导出器
pub struct DiscoveryExporter<'a> {
    test_sets: &'a [TestSet],
}

impl<'a> DiscoveryExporter<'a> {
    /// 创建导出器
    pub fn new(test_sets: &'a [TestSet]) -> Self {
        Self { test_sets }
    }

    /// 配置中出现过的全部 datatype（去重、排序）
    pub fn datatypes(&self) -> Vec<String> {
        self.test_sets
            .iter()
            .flat_map(|t| t.test_elements.iter().flatten())
            .flat_map(|e| e.datatypes())
            .filter(|d| !d.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// 导出匹配 datatype 的发现文档
    ///
    /// # 参数
    /// * `datatype` - datatype 过滤条件，区分大小写
    ///
    /// # 返回
    /// * `Result<DiscoveryDocument, ConfigError>` - 缺少过滤条件时返回 `MissingDatatypeFilter`
    pub fn discover(&self, datatype: Option<&str>) -> Result<DiscoveryDocument, ConfigError> {
        let datatype = match datatype.map(str::trim).filter(|d| !d.is_empty()) {
            Some(datatype) => datatype,
            None => {
                return Err(ConfigError::MissingDatatypeFilter {
                    available: self.datatypes(),
                })
            }
        };

        let mut document = DiscoveryDocument::default();

        for test_set in self.test_sets {
            for element in test_set.test_elements.iter().flatten() {
                for entry in element.datatypes() {
                    if entry != datatype {
                        continue;
                    }

                    let mut fields = element.fields();
                    fields.insert("checkname".to_string(), Value::String(test_set.key.clone()));
                    fields.insert(
                        "resource_uri".to_string(),
                        Value::String(test_set.uri.clone().unwrap_or_default()),
                    );

                    let record: Map<String, Value> = fields
                        .into_iter()
                        .map(|(name, value)| (lld_macro(&name), value))
                        .collect();

                    tracing::debug!(test_set = %test_set.key, record = ?record, "发现监控项");
                    document.data.push(record);
                }
            }
        }

        Ok(document)
    }
}

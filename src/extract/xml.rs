//! XML 响应提取
//!
//! 支持 XPath 的一个子集：
//! - 绝对/相对路径 `/a/b[2]/c`、`a/b`、`./a`
//! - 后代查找 `//name/...`
//! - 末尾的 `@attr` 与 `text()`
//!
//! 位置谓词从 1 开始计数，元素按本地名匹配（忽略命名空间）。

use super::{ExtractedValue, ValueExtractor};
use roxmltree::{Document, Node};
use serde_json::Value;

/// XML 提取策略
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlExtractor;

impl ValueExtractor for XmlExtractor {
    fn extract(&self, content: &str, path: &str) -> ExtractedValue {
        let document = match Document::parse(content) {
            Ok(document) => document,
            Err(e) => return ExtractedValue::absent(format!("响应体不是合法XML: {e}")),
        };

        match evaluate(&document, path.trim()) {
            Ok(Some(text)) => ExtractedValue::Present(Value::String(text)),
            Ok(None) => ExtractedValue::missing(),
            Err(reason) => ExtractedValue::absent(format!("路径 `{path}` 无效: {reason}")),
        }
    }
}

#[derive(Debug, PartialEq)]
enum XmlStep<'p> {
    Element { name: &'p str, position: usize },
    Attribute(&'p str),
    Text,
}

fn parse_step(step: &str) -> Result<XmlStep<'_>, String> {
    if step.is_empty() {
        return Err("路径中存在空的步骤".to_string());
    }
    if step == "text()" {
        return Ok(XmlStep::Text);
    }
    if let Some(attr) = step.strip_prefix('@') {
        if attr.is_empty() {
            return Err("属性名为空".to_string());
        }
        return Ok(XmlStep::Attribute(attr));
    }

    match step.split_once('[') {
        Some((name, predicate)) => {
            let position = predicate
                .strip_suffix(']')
                .and_then(|p| p.trim().parse::<usize>().ok())
                .filter(|p| *p >= 1)
                .ok_or_else(|| format!("不支持的谓词 `[{predicate}`"))?;
            Ok(XmlStep::Element { name, position })
        }
        None => Ok(XmlStep::Element {
            name: step,
            position: 1,
        }),
    }
}

fn matches_name(node: &Node, name: &str) -> bool {
    node.is_element() && (name == "*" || node.tag_name().name() == name)
}

fn string_value(node: Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

fn evaluate(document: &Document, path: &str) -> Result<Option<String>, String> {
    if path.is_empty() {
        return Err("路径为空".to_string());
    }

    let (mut node, steps) = if let Some(rest) = path.strip_prefix("//") {
        let mut parts = rest.split('/');
        let first = parse_step(parts.next().unwrap_or_default())?;
        let XmlStep::Element { name, position } = first else {
            return Err("`//` 之后必须是元素名".to_string());
        };
        let found = document
            .root()
            .descendants()
            .filter(|n| matches_name(n, name))
            .nth(position - 1);
        match found {
            Some(found) => (found, parts.collect::<Vec<_>>()),
            None => return Ok(None),
        }
    } else {
        let rest = path
            .strip_prefix("./")
            .or_else(|| path.strip_prefix('/'))
            .unwrap_or(path);
        (document.root(), rest.split('/').collect::<Vec<_>>())
    };

    let last = steps.len().saturating_sub(1);
    for (index, raw) in steps.iter().enumerate() {
        match parse_step(raw)? {
            XmlStep::Element { name, position } => {
                match node
                    .children()
                    .filter(|n| matches_name(n, name))
                    .nth(position - 1)
                {
                    Some(child) => node = child,
                    None => return Ok(None),
                }
            }
            XmlStep::Attribute(attr) if index == last => {
                return Ok(node.attribute(attr).map(str::to_string));
            }
            XmlStep::Text if index == last => {
                let text: String = node
                    .children()
                    .filter(|n| n.is_text())
                    .filter_map(|n| n.text())
                    .collect();
                return Ok(Some(text.trim().to_string()));
            }
            _ => return Err(format!("`{raw}` 只能出现在路径末尾")),
        }
    }

    if node.is_root() {
        return Ok(None);
    }
    Ok(Some(string_value(node)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"<?xml version="1.0"?>
<health xmlns="urn:example">
  <status>up</status>
  <checks>
    <check name="db" latency="12">ok</check>
    <check name="cache" latency="3">degraded</check>
  </checks>
</health>"#;

    fn extract(path: &str) -> ExtractedValue {
        XmlExtractor.extract(BODY, path)
    }

    fn present(text: &str) -> ExtractedValue {
        ExtractedValue::Present(Value::String(text.to_string()))
    }

    #[test]
    fn test_absolute_and_relative_paths() {
        assert_eq!(extract("/health/status"), present("up"));
        assert_eq!(extract("health/status"), present("up"));
        assert_eq!(extract("./health/checks/check[2]"), present("degraded"));
    }

    #[test]
    fn test_attribute_and_text() {
        assert_eq!(extract("/health/checks/check[1]/@latency"), present("12"));
        assert_eq!(extract("/health/status/text()"), present("up"));
    }

    #[test]
    fn test_descendant_search() {
        assert_eq!(extract("//check[2]/@name"), present("cache"));
        assert_eq!(extract("//status"), present("up"));
    }

    #[test]
    fn test_missing_nodes_are_absent() {
        assert_eq!(extract("/health/missing"), ExtractedValue::missing());
        assert_eq!(extract("/health/checks/check[5]"), ExtractedValue::missing());
        assert_eq!(extract("/health/status/@nope"), ExtractedValue::missing());
        assert_eq!(extract("//nothing"), ExtractedValue::missing());
    }

    #[test]
    fn test_invalid_paths_are_absent_with_reason() {
        for bad in ["", "/health//status", "/health/check[0]", "/health/@a/status"] {
            let value = extract(bad);
            assert!(!value.is_present(), "{bad} 不应命中");
            assert!(value.reason().is_some(), "{bad} 应带诊断信息");
        }
    }

    #[test]
    fn test_invalid_body_is_absent() {
        let value = XmlExtractor.extract("{\"json\": true}", "/health");
        assert!(!value.is_present());
        assert!(value.reason().is_some());
    }
}

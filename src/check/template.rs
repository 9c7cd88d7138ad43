//! 指标键模板模块
//!
//! 提供 `{name}` 风格的键模板渲染功能，`{{` 与 `}}` 表示字面量大括号

use crate::error::ConfigError;
use std::collections::BTreeMap;

/// 模板上下文数据
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    fields: BTreeMap<String, String>,
}

impl TemplateContext {
    /// 创建空的上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置字段
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// 设置字段（链式）
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// 获取字段
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// 预解析的键模板
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    /// 解析模板字符串
    ///
    /// # 参数
    /// * `template` - 模板字符串，例如 `url_monitor[{checkname},{key}]`
    ///
    /// # 返回
    /// * `Result<Self, ConfigError>` - 大括号不匹配或占位符为空时返回 `MalformedTemplate`
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        let malformed = |reason: &str| ConfigError::MalformedTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') => return Err(malformed("占位符中不能嵌套 `{`")),
                            Some(ch) => name.push(ch),
                            None => return Err(malformed("缺少 `}`")),
                        }
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(malformed("占位符名称为空"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.to_string()));
                }
                '}' => return Err(malformed("多余的 `}`")),
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// 原始模板字符串
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 模板引用的占位符名称
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// 渲染模板
    ///
    /// 任一占位符在上下文中不存在时返回 `UnresolvedPlaceholder`
    pub fn render(&self, context: &TemplateContext) -> Result<String, ConfigError> {
        let mut rendered = String::with_capacity(self.source.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Placeholder(name) => {
                    let value =
                        context
                            .get(name)
                            .ok_or_else(|| ConfigError::UnresolvedPlaceholder {
                                template: self.source.clone(),
                                placeholder: name.clone(),
                            })?;
                    rendered.push_str(value);
                }
            }
        }

        Ok(rendered)
    }
}

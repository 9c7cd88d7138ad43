//! JSON 响应提取
//!
//! 支持的路径写法：
//! - `$.a.b[0]`、`$['a b'][1]`、`a.b`
//! - `./a/b[0]`（斜杠写法）
//! - `/a/b/0`（JSON Pointer）

use super::{ExtractedValue, ValueExtractor};
use serde_json::Value;

/// JSON 提取策略
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExtractor;

impl ValueExtractor for JsonExtractor {
    fn extract(&self, content: &str, path: &str) -> ExtractedValue {
        let document: Value = match serde_json::from_str(content) {
            Ok(document) => document,
            Err(e) => return ExtractedValue::absent(format!("响应体不是合法JSON: {e}")),
        };

        let path = path.trim();
        let node = if path.starts_with('/') {
            document.pointer(path)
        } else {
            match parse_path(path) {
                Ok(steps) => walk(&document, &steps),
                Err(reason) => return ExtractedValue::absent(format!("路径 `{path}` 无效: {reason}")),
            }
        };

        match node {
            Some(Value::Null) | None => ExtractedValue::missing(),
            Some(value) => ExtractedValue::Present(value.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Result<Vec<Step>, String> {
    if path.is_empty() {
        return Err("路径为空".to_string());
    }

    if let Some(rest) = path.strip_prefix("./") {
        return parse_steps(rest, '/');
    }

    match path.strip_prefix('$') {
        Some(rest) => parse_steps(rest.strip_prefix('.').unwrap_or(rest), '.'),
        None => parse_steps(path, '.'),
    }
}

/// 解析以 `separator` 分隔的路径，名称后可以跟任意个 `[n]` / `['name']`
fn parse_steps(path: &str, separator: char) -> Result<Vec<Step>, String> {
    let mut steps = Vec::new();
    let chars: Vec<char> = path.chars().collect();
    let mut i = 0;
    let mut expect_name = true;

    while i < chars.len() {
        let c = chars[i];
        if c == '[' {
            let close = chars[i..]
                .iter()
                .position(|&ch| ch == ']')
                .map(|offset| i + offset)
                .ok_or("缺少 `]`")?;
            let inner: String = chars[i + 1..close].iter().collect();
            steps.push(parse_bracket(inner.trim())?);
            i = close + 1;
            expect_name = false;
        } else if c == separator {
            if expect_name {
                return Err(format!("位置 {i} 处缺少字段名"));
            }
            i += 1;
            expect_name = true;
            if i == chars.len() {
                return Err("路径不能以分隔符结尾".to_string());
            }
        } else {
            if !expect_name {
                return Err(format!("位置 {i} 处缺少分隔符"));
            }
            let start = i;
            while i < chars.len() && chars[i] != separator && chars[i] != '[' {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            steps.push(Step::Key(name));
            expect_name = false;
        }
    }

    Ok(steps)
}

fn parse_bracket(inner: &str) -> Result<Step, String> {
    for quote in ['\'', '"'] {
        if let Some(name) = inner
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Ok(Step::Key(name.to_string()));
        }
    }

    inner
        .parse::<usize>()
        .map(Step::Index)
        .map_err(|_| format!("不支持的下标 `[{inner}]`"))
}

fn walk<'a>(document: &'a Value, steps: &[Step]) -> Option<&'a Value> {
    steps.iter().try_fold(document, |node, step| match (step, node) {
        (Step::Key(name), Value::Object(map)) => map.get(name),
        (Step::Key(name), Value::Array(items)) => {
            name.parse::<usize>().ok().and_then(|idx| items.get(idx))
        }
        (Step::Index(idx), Value::Array(items)) => items.get(*idx),
        _ => None,
    })
}

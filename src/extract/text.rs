//! 纯文本响应提取
//!
//! 路径是一个正则表达式：有捕获组时取第一个捕获组，否则取整个匹配

use super::{ExtractedValue, ValueExtractor};
use regex::Regex;
use serde_json::Value;

/// 文本提取策略
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl ValueExtractor for TextExtractor {
    fn extract(&self, content: &str, path: &str) -> ExtractedValue {
        let pattern = match Regex::new(path) {
            Ok(pattern) => pattern,
            Err(e) => return ExtractedValue::absent(format!("正则表达式 `{path}` 无效: {e}")),
        };

        let Some(captures) = pattern.captures(content) else {
            return ExtractedValue::missing();
        };

        let matched = captures.get(1).or_else(|| captures.get(0));
        match matched {
            Some(m) => ExtractedValue::Present(Value::String(m.as_str().to_string())),
            None => ExtractedValue::missing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "uptime: 3600s\nstatus=OK\nqueue depth 17\n";

    #[test]
    fn test_capture_group() {
        assert_eq!(
            TextExtractor.extract(BODY, r"queue depth (\d+)"),
            ExtractedValue::Present(Value::String("17".to_string()))
        );
    }

    #[test]
    fn test_whole_match_without_group() {
        assert_eq!(
            TextExtractor.extract(BODY, r"status=\w+"),
            ExtractedValue::Present(Value::String("status=OK".to_string()))
        );
    }

    #[test]
    fn test_no_match_is_absent() {
        assert_eq!(
            TextExtractor.extract(BODY, "missing"),
            ExtractedValue::missing()
        );
    }

    #[test]
    fn test_invalid_regex_is_absent() {
        let value = TextExtractor.extract(BODY, "(unclosed");
        assert!(!value.is_present());
        assert!(value.reason().is_some());
    }
}

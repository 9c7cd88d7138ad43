//! 单个 testSet 的检测
//!
//! 流程：结构校验 → 探测 → 按 testElement × datatype 提取 → 渲染指标键。
//! 结构错误与探测失败都会丢弃该 testSet 的全部指标；提取不到值只影响健康状态。

use super::template::{KeyTemplate, TemplateContext};
use crate::config::types::{TestElement, TestSet};
use crate::error::{ConfigError, ProbeError};
use crate::extract::{ExtractedValue, ExtractorRegistry};
use crate::probe::{Probe, ProbeRequest, ProbeResult};
use crate::sink::Metric;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

/// 导致 testSet 整体失败的错误
#[derive(Error, Debug)]
pub enum CheckError {
    /// 配置结构错误
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 探测失败
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// testSet 检测结果
#[derive(Debug)]
pub enum CheckOutcome {
    /// 所有值都提取成功
    Healthy,
    /// 部分值缺失，指标仍然发送
    Unhealthy {
        /// 缺失的 `key[datatype]`
        missing: Vec<String>,
    },
    /// 结构错误或探测失败，没有指标
    Failed(CheckError),
}

impl CheckOutcome {
    /// 进程返回码：健康为 0，其余为 1
    pub fn return_code(&self) -> i32 {
        match self {
            CheckOutcome::Healthy => 0,
            CheckOutcome::Unhealthy { .. } | CheckOutcome::Failed(_) => 1,
        }
    }

    /// 是否健康
    pub fn is_healthy(&self) -> bool {
        matches!(self, CheckOutcome::Healthy)
    }
}

/// 单个 testSet 的检测报告
#[derive(Debug)]
pub struct CheckReport {
    /// testSet 名称
    pub test_set: String,
    /// 检测结果
    pub outcome: CheckOutcome,
    /// 生成的指标（按 testElement 声明顺序、datatype 拆分顺序）
    pub metrics: Vec<Metric>,
}

impl CheckReport {
    fn failed(test_set: &str, error: impl Into<CheckError>) -> Self {
        Self {
            test_set: test_set.to_string(),
            outcome: CheckOutcome::Failed(error.into()),
            metrics: Vec::new(),
        }
    }
}

/// 检测器的全局设置
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    /// 指标所属主机
    pub metric_host: String,
    /// 指标键模板
    pub item_key_format: KeyTemplate,
    /// 全局默认超时
    pub default_timeout: Option<Duration>,
    /// 全局默认是否校验证书
    pub default_verify_ssl: bool,
}

/// 校验通过后的 testElement
struct PlannedElement<'a> {
    element: &'a TestElement,
    key: &'a str,
    path: &'a str,
    response_type: String,
    datatypes: Vec<String>,
}

/// 校验通过后的 testSet
struct CheckPlan<'a> {
    uri: &'a str,
    originhost: String,
    ok_http_code: &'a str,
    identity_provider: &'a str,
    timeout: Duration,
    verify_ssl: bool,
    elements: Vec<PlannedElement<'a>>,
}

/// testSet 检测器
pub struct CheckEvaluator {
    probe: Arc<dyn Probe>,
    extractors: Arc<ExtractorRegistry>,
    settings: EvaluatorSettings,
}

impl CheckEvaluator {
    /// 创建新的检测器
    ///
    /// # 参数
    /// * `probe` - HTTP探测器
    /// * `extractors` - 提取策略表
    /// * `settings` - 全局设置
    pub fn new(
        probe: Arc<dyn Probe>,
        extractors: Arc<ExtractorRegistry>,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            probe,
            extractors,
            settings,
        }
    }

    /// 检测一个 testSet
    ///
    /// # 参数
    /// * `test_set` - testSet 定义，检测过程中不会被修改
    ///
    /// # 返回
    /// * `CheckReport` - 检测报告；错误只影响本 testSet
    pub async fn evaluate(&self, test_set: &TestSet) -> CheckReport {
        let span = tracing::info_span!(
            "check",
            test_set = %test_set.key,
            uri = test_set.uri.as_deref().unwrap_or_default()
        );
        self.evaluate_inner(test_set).instrument(span).await
    }

    async fn evaluate_inner(&self, test_set: &TestSet) -> CheckReport {
        let plan = match self.plan(test_set) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!(error = %e, "testSet 配置无效，跳过");
                return CheckReport::failed(&test_set.key, e);
            }
        };

        let request = ProbeRequest {
            uri: plan.uri,
            timeout: plan.timeout,
            verify_ssl: plan.verify_ssl,
            identity_provider: plan.identity_provider,
        };
        let response = match self.probe.probe(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "请求失败，跳过该 testSet");
                return CheckReport::failed(&test_set.key, e);
            }
        };

        if response.status_code.to_string() != plan.ok_http_code {
            // TODO: 状态码不匹配是否应判定失败需要确认，目前只记录
            tracing::warn!(
                status_code = response.status_code,
                ok_http_code = plan.ok_http_code,
                "HTTP状态码与 ok_http_code 不一致"
            );
        }

        let mut metrics = Vec::new();
        let mut missing = Vec::new();

        for planned in &plan.elements {
            for datatype in &planned.datatypes {
                let value = self.extractors.extract(
                    &response.content,
                    &planned.response_type,
                    planned.path,
                );

                let context = element_context(test_set, &plan, planned, datatype, &value, &response);
                let key = match self.settings.item_key_format.render(&context) {
                    Ok(key) => key,
                    Err(e) => {
                        tracing::error!(element = planned.key, error = %e, "指标键渲染失败");
                        return CheckReport::failed(&test_set.key, e);
                    }
                };

                if !value.is_present() {
                    tracing::warn!(
                        element = planned.key,
                        datatype = %datatype,
                        path = planned.path,
                        reason = value.reason().unwrap_or("未找到节点"),
                        "{} 检测失败，未能提取到值",
                        plan.originhost
                    );
                    missing.push(format!("{}[{}]", planned.key, datatype));
                }

                tracing::debug!(
                    element = planned.key,
                    datatype = %datatype,
                    value = ?value,
                    "提取结果"
                );

                metrics.push(Metric::new(
                    self.settings.metric_host.clone(),
                    key,
                    value.to_metric_value(),
                ));
            }
        }

        let outcome = if missing.is_empty() {
            CheckOutcome::Healthy
        } else {
            CheckOutcome::Unhealthy { missing }
        };

        CheckReport {
            test_set: test_set.key.clone(),
            outcome,
            metrics,
        }
    }

    /// 结构校验，失败时不发起任何请求
    fn plan<'a>(&self, test_set: &'a TestSet) -> Result<CheckPlan<'a>, ConfigError> {
        let name = test_set.key.as_str();
        let missing = |field: &str| ConfigError::MissingField {
            test_set: name.to_string(),
            field: field.to_string(),
        };

        let uri = test_set.uri.as_deref().ok_or_else(|| missing("uri"))?;
        let ok_http_code = test_set
            .ok_http_code
            .as_deref()
            .ok_or_else(|| missing("ok_http_code"))?;
        let identity_provider = test_set
            .identity_provider
            .as_deref()
            .ok_or_else(|| missing("identity_provider"))?;
        let test_elements = test_set
            .test_elements
            .as_ref()
            .ok_or_else(|| missing("testElements"))?;

        let timeout = test_set.resolve_timeout(self.settings.default_timeout)?;
        let verify_ssl = test_set.resolve_verify_ssl(self.settings.default_verify_ssl);
        let originhost = origin_host(uri)?;

        let mut elements = Vec::with_capacity(test_elements.len());
        for (index, element) in test_elements.iter().enumerate() {
            elements.push(self.plan_element(test_set, index, element)?);
        }

        Ok(CheckPlan {
            uri,
            originhost,
            ok_http_code,
            identity_provider,
            timeout,
            verify_ssl,
            elements,
        })
    }

    fn plan_element<'a>(
        &self,
        test_set: &'a TestSet,
        index: usize,
        element: &'a TestElement,
    ) -> Result<PlannedElement<'a>, ConfigError> {
        let missing = |field: &str| ConfigError::MissingElementField {
            test_set: test_set.key.clone(),
            element: index,
            field: field.to_string(),
        };

        let key = element
            .key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| missing("key"))?;
        let raw_datatype = element.datatype.as_deref().ok_or_else(|| missing("datatype"))?;
        let datatypes = element.datatypes();
        if datatypes.iter().any(String::is_empty) {
            return Err(ConfigError::EmptyDatatype {
                test_set: test_set.key.clone(),
                element: key.to_string(),
                datatype: raw_datatype.to_string(),
            });
        }
        let path = element.path.as_deref().ok_or_else(|| missing("path"))?;

        let response_type = element
            .response_type
            .as_deref()
            .or(test_set.response_type.as_deref())
            .ok_or_else(|| missing("response_type"))?
            .to_lowercase();
        if !self.extractors.supports(&response_type) {
            return Err(ConfigError::UnknownResponseType {
                test_set: test_set.key.clone(),
                response_type,
            });
        }

        Ok(PlannedElement {
            element,
            key,
            path,
            response_type,
            datatypes,
        })
    }
}

/// 解析 URI 中的主机名
pub fn origin_host(uri: &str) -> Result<String, ConfigError> {
    let malformed = |reason: String| ConfigError::MalformedUri {
        uri: uri.to_string(),
        reason,
    };
    let parsed = url::Url::parse(uri).map_err(|e| malformed(e.to_string()))?;
    parsed
        .host_str()
        .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_string())
        .ok_or_else(|| malformed("缺少主机名".to_string()))
}

/// 构建一次 (testElement, datatype) 的模板上下文
fn element_context(
    test_set: &TestSet,
    plan: &CheckPlan<'_>,
    planned: &PlannedElement<'_>,
    datatype: &str,
    value: &ExtractedValue,
    response: &ProbeResult,
) -> TemplateContext {
    let element = planned.element;
    let mut context = TemplateContext::new();

    for (name, extra) in &element.extra {
        let text = match extra {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        context.insert(name.clone(), text);
    }

    if let Some(ref unit) = element.unit_of_measure {
        context.insert("unit_of_measure", unit.clone());
    }
    if let Some(ref metricname) = element.metricname {
        context.insert("metricname", metricname.clone());
    }

    context
        .with("key", planned.key)
        .with("path", planned.path)
        .with(element.path_key.as_str(), planned.path)
        .with("datatype", datatype)
        .with("response_type", planned.response_type.as_str())
        .with("api_response", value.to_metric_value().unwrap_or_default())
        .with("uri", plan.uri)
        .with("originhost", plan.originhost.as_str())
        .with("request_statuscode", response.status_code.to_string())
        .with("checkname", test_set.key.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 按 URI 返回预设结果的探测器
    struct FakeProbe {
        responses: HashMap<String, (u16, String)>,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn new(responses: &[(&str, u16, &str)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(uri, code, body)| (uri.to_string(), (*code, body.to_string())))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Probe for FakeProbe {
        async fn probe(&self, request: &ProbeRequest<'_>) -> Result<ProbeResult, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(request.uri) {
                Some((status_code, content)) => Ok(ProbeResult {
                    status_code: *status_code,
                    content: content.clone(),
                    elapsed: Duration::from_millis(5),
                }),
                None => Err(ProbeError::Timeout {
                    uri: request.uri.to_string(),
                }),
            }
        }
    }

    fn evaluator(probe: Arc<FakeProbe>, template: &str) -> CheckEvaluator {
        CheckEvaluator::new(
            probe,
            Arc::new(ExtractorRegistry::with_defaults()),
            EvaluatorSettings {
                metric_host: "web01".to_string(),
                item_key_format: KeyTemplate::parse(template).unwrap(),
                default_timeout: Some(Duration::from_secs(5)),
                default_verify_ssl: true,
            },
        )
    }

    fn element(key: &str, datatype: &str, path: &str) -> TestElement {
        TestElement {
            key: Some(key.to_string()),
            datatype: Some(datatype.to_string()),
            path: Some(path.to_string()),
            ..Default::default()
        }
    }

    fn site(uri: &str, elements: Vec<TestElement>) -> TestSet {
        TestSet {
            key: "site".to_string(),
            uri: Some(uri.to_string()),
            ok_http_code: Some("200".to_string()),
            identity_provider: Some("none".to_string()),
            response_type: Some("json".to_string()),
            test_elements: Some(elements),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_value_present_is_healthy() {
        let probe = Arc::new(FakeProbe::new(&[("https://x/y", 200, r#"{"status":"up"}"#)]));
        let evaluator = evaluator(probe, "url_monitor[{checkname},{key},{datatype}]");

        let report = evaluator
            .evaluate(&site("https://x/y", vec![element("k1", "string", "$.status")]))
            .await;

        assert_eq!(report.outcome.return_code(), 0);
        assert_eq!(report.metrics.len(), 1);
        assert_eq!(report.metrics[0].host, "web01");
        assert_eq!(report.metrics[0].key, "url_monitor[site,k1,string]");
        assert_eq!(report.metrics[0].value.as_deref(), Some("up"));
    }

    #[tokio::test]
    async fn test_path_miss_still_emits_metric() {
        let probe = Arc::new(FakeProbe::new(&[("https://x/y", 200, r#"{"other":"x"}"#)]));
        let evaluator = evaluator(probe, "{key}");

        let report = evaluator
            .evaluate(&site("https://x/y", vec![element("k1", "string", "$.status")]))
            .await;

        assert_eq!(report.outcome.return_code(), 1);
        match &report.outcome {
            CheckOutcome::Unhealthy { missing } => assert_eq!(missing, &["k1[string]"]),
            other => panic!("期望 Unhealthy，实际 {other:?}"),
        }
        assert_eq!(report.metrics.len(), 1);
        assert_eq!(report.metrics[0].value, None);
    }

    #[tokio::test]
    async fn test_probe_failure_emits_nothing() {
        let probe = Arc::new(FakeProbe::new(&[]));
        let evaluator = evaluator(probe.clone(), "{key}");

        let report = evaluator
            .evaluate(&site("https://x/y", vec![element("k1", "string", "$.status")]))
            .await;

        assert!(matches!(
            report.outcome,
            CheckOutcome::Failed(CheckError::Probe(ProbeError::Timeout { .. }))
        ));
        assert!(report.metrics.is_empty());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_required_fields_skip_probe() {
        let probe = Arc::new(FakeProbe::new(&[("https://x/y", 200, "{}")]));
        let evaluator = evaluator(probe.clone(), "{key}");

        let base = site("https://x/y", vec![element("k1", "string", "$.a")]);
        let cases = [
            ("uri", TestSet { uri: None, ..base.clone() }),
            ("ok_http_code", TestSet { ok_http_code: None, ..base.clone() }),
            ("identity_provider", TestSet { identity_provider: None, ..base.clone() }),
            ("testElements", TestSet { test_elements: None, ..base.clone() }),
        ];

        for (field, test_set) in cases {
            let report = evaluator.evaluate(&test_set).await;
            match report.outcome {
                CheckOutcome::Failed(CheckError::Config(ConfigError::MissingField {
                    field: ref missing,
                    ..
                })) => assert_eq!(missing, field),
                ref other => panic!("{field}: 期望 MissingField，实际 {other:?}"),
            }
            assert!(report.metrics.is_empty());
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_elements_fail_whole_test_set() {
        let probe = Arc::new(FakeProbe::new(&[("https://x/y", 200, r#"{"a":1}"#)]));
        let evaluator = evaluator(probe.clone(), "{key}");

        let no_key = TestElement {
            key: None,
            ..element("", "string", "$.a")
        };
        let report = evaluator
            .evaluate(&site("https://x/y", vec![element("ok", "int", "$.a"), no_key]))
            .await;
        assert!(matches!(
            report.outcome,
            CheckOutcome::Failed(CheckError::Config(ConfigError::MissingElementField { element: 1, .. }))
        ));
        assert!(report.metrics.is_empty());

        let report = evaluator
            .evaluate(&site("https://x/y", vec![element("k", "string,,int", "$.a")]))
            .await;
        assert!(matches!(
            report.outcome,
            CheckOutcome::Failed(CheckError::Config(ConfigError::EmptyDatatype { .. }))
        ));

        let report = evaluator
            .evaluate(&site("https://x/y", vec![element("k", "", "$.a")]))
            .await;
        assert!(matches!(
            report.outcome,
            CheckOutcome::Failed(CheckError::Config(ConfigError::EmptyDatatype { .. }))
        ));

        let mut unknown_type = site("https://x/y", vec![element("k", "int", "$.a")]);
        unknown_type.response_type = Some("yaml".to_string());
        let report = evaluator.evaluate(&unknown_type).await;
        assert!(matches!(
            report.outcome,
            CheckOutcome::Failed(CheckError::Config(ConfigError::UnknownResponseType { .. }))
        ));

        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_datatype_fan_out_counts() {
        let body = r#"{"a":"x","b":2,"c":true}"#;
        let probe = Arc::new(FakeProbe::new(&[("https://x/y", 200, body)]));
        let evaluator = evaluator(probe, "{key}.{datatype}");

        let report = evaluator
            .evaluate(&site(
                "https://x/y",
                vec![
                    element("a", "string", "$.a"),
                    element("b", "int, count ,float", "$.b"),
                    element("c", "bool,string", "$.c"),
                ],
            ))
            .await;

        assert!(report.outcome.is_healthy());
        let keys: Vec<_> = report.metrics.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(
            keys,
            ["a.string", "b.int", "b.count", "b.float", "c.bool", "c.string"]
        );
        assert_eq!(report.metrics[1].value.as_deref(), Some("2"));
        assert_eq!(report.metrics[4].value.as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_empty_element_list_is_healthy() {
        let probe = Arc::new(FakeProbe::new(&[("https://x/y", 200, "{}")]));
        let evaluator = evaluator(probe, "{key}");

        let report = evaluator.evaluate(&site("https://x/y", vec![])).await;
        assert!(report.outcome.is_healthy());
        assert!(report.metrics.is_empty());
    }

    #[tokio::test]
    async fn test_template_context_fields() {
        let probe = Arc::new(FakeProbe::new(&[(
            "https://api.example.com:8443/health",
            503,
            r#"{"status":"up"}"#,
        )]));
        let evaluator = evaluator(
            probe,
            "{originhost}|{uri}|{request_statuscode}|{api_response}|{unit_of_measure}|{metricname}|{team}|{response_type}|{path}",
        );

        let mut with_extras = element("k", "string", "$.status");
        with_extras.unit_of_measure = Some("s".to_string());
        with_extras.metricname = Some("Status".to_string());
        with_extras
            .extra
            .insert("team".to_string(), serde_json::json!("ops"));

        let report = evaluator
            .evaluate(&site("https://api.example.com:8443/health", vec![with_extras]))
            .await;

        assert_eq!(
            report.metrics[0].key,
            "api.example.com|https://api.example.com:8443/health|503|up|s|Status|ops|json|$.status"
        );
        // 状态码不一致只记录，不判定失败
        assert!(report.outcome.is_healthy());
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_fails_test_set() {
        let probe = Arc::new(FakeProbe::new(&[("https://x/y", 200, r#"{"a":1}"#)]));
        let evaluator = evaluator(probe, "{key}.{unit_of_measure}");

        let report = evaluator
            .evaluate(&site("https://x/y", vec![element("k", "int", "$.a")]))
            .await;
        assert!(matches!(
            report.outcome,
            CheckOutcome::Failed(CheckError::Config(ConfigError::UnresolvedPlaceholder { .. }))
        ));
        assert!(report.metrics.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_uri_fails_test_set() {
        let probe = Arc::new(FakeProbe::new(&[]));
        let evaluator = evaluator(probe.clone(), "{key}");

        let report = evaluator
            .evaluate(&site("not a uri", vec![element("k", "int", "$.a")]))
            .await;
        assert!(matches!(
            report.outcome,
            CheckOutcome::Failed(CheckError::Config(ConfigError::MalformedUri { .. }))
        ));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_timeout_fails_test_set() {
        let probe = Arc::new(FakeProbe::new(&[("https://x/y", 200, r#"{"a":1}"#)]));
        let evaluator = evaluator(probe.clone(), "{key}");

        let mut test_set = site("https://x/y", vec![element("k", "int", "$.a")]);
        test_set.request_timeout = Some(-1.0);

        let report = evaluator.evaluate(&test_set).await;
        assert!(matches!(
            report.outcome,
            CheckOutcome::Failed(CheckError::Config(ConfigError::ValidationError(_)))
        ));
        assert!(report.metrics.is_empty());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_element_response_type_override() {
        let probe = Arc::new(FakeProbe::new(&[("https://x/y", 200, "load average: 0.42")]));
        let evaluator = evaluator(probe, "{key}");

        let mut text_element = element("load", "float", r"load average: ([\d.]+)");
        text_element.response_type = Some("TEXT".to_string());

        let report = evaluator
            .evaluate(&site("https://x/y", vec![text_element]))
            .await;
        assert!(report.outcome.is_healthy());
        assert_eq!(report.metrics[0].value.as_deref(), Some("0.42"));
    }

    #[test]
    fn test_origin_host() {
        assert_eq!(origin_host("https://x/y").unwrap(), "x");
        assert_eq!(origin_host("http://user@host.local:8080/a").unwrap(), "host.local");
        assert_eq!(origin_host("http://[::1]:8080/").unwrap(), "::1");
        assert!(origin_host("file:///tmp/x").is_err());
        assert!(origin_host("//nohost").is_err());
    }
}

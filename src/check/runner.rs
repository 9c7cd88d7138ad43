//! 一次 check 运行的编排
//!
//! 依次检测每个 testSet，汇总返回码，整批发送指标，最后发送执行摘要指标

use super::evaluator::{CheckEvaluator, CheckReport};
use crate::config::types::TestSet;
use crate::sink::{Metric, MetricSender};
use std::sync::Arc;

/// 一次运行的汇总
#[derive(Debug)]
pub struct RunSummary {
    /// 各 testSet 的检测报告
    pub reports: Vec<CheckReport>,
    /// 检测指标是否发送成功（没有指标时为 true）
    pub telemetry_sent: bool,
    /// 摘要指标是否发送成功
    pub summary_sent: bool,
    /// 进程返回码
    pub exit_code: i32,
}

/// check 运行器
pub struct CheckRunner {
    evaluator: CheckEvaluator,
    sender: Arc<dyn MetricSender>,
    metric_host: String,
    checksummary_key: String,
}

impl CheckRunner {
    /// 创建新的运行器
    ///
    /// # 参数
    /// * `evaluator` - testSet 检测器
    /// * `sender` - 指标发送器
    /// * `metric_host` - 摘要指标所属主机
    /// * `checksummary_key` - 摘要指标键
    pub fn new(
        evaluator: CheckEvaluator,
        sender: Arc<dyn MetricSender>,
        metric_host: impl Into<String>,
        checksummary_key: impl Into<String>,
    ) -> Self {
        Self {
            evaluator,
            sender,
            metric_host: metric_host.into(),
            checksummary_key: checksummary_key.into(),
        }
    }

    /// 执行一次运行
    ///
    /// # 参数
    /// * `test_sets` - 全部 testSet（按配置顺序）
    /// * `key_filter` - 只检测指定名称的 testSet
    ///
    /// # 返回
    /// * `RunSummary` - 运行汇总，任何 testSet 失败都不会中断其它 testSet
    pub async fn run(&self, test_sets: &[TestSet], key_filter: Option<&str>) -> RunSummary {
        let mut exit_code = 0;

        let selected: Vec<&TestSet> = test_sets
            .iter()
            .filter(|t| key_filter.map_or(true, |key| t.key == key))
            .collect();

        if let Some(key) = key_filter {
            if selected.is_empty() {
                tracing::error!(key = key, "配置中不存在名为 `{}` 的 testSet", key);
                exit_code = 1;
            }
        }

        let mut reports = Vec::with_capacity(selected.len());
        for test_set in selected {
            let report = self.evaluator.evaluate(test_set).await;
            if report.outcome.return_code() != 0 {
                exit_code = 1;
            }
            reports.push(report);
        }

        if exit_code == 0 {
            tracing::info!("检测完成，没有错误    [ OK ]");
        } else {
            tracing::info!("检测完成，存在错误    [FAIL]");
        }

        let telemetry: Vec<Metric> = reports
            .iter()
            .flat_map(|r| r.metrics.iter().cloned())
            .collect();

        let telemetry_sent = if telemetry.is_empty() {
            tracing::debug!("没有需要发送的检测指标");
            true
        } else {
            tracing::info!(count = telemetry.len(), "发送检测指标");
            match self.sender.send(&telemetry).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(critical = true, error = %e, "发送检测指标到 Zabbix 失败");
                    exit_code = 1;
                    false
                }
            }
        };

        let summary = Metric::new(
            self.metric_host.clone(),
            self.checksummary_key.clone(),
            Some(exit_code.to_string()),
        );
        tracing::info!(key = %summary.key, value = exit_code, "发送执行摘要指标");
        let summary_sent = match self.sender.send(std::slice::from_ref(&summary)).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(critical = true, error = %e, "发送执行摘要到 Zabbix 失败");
                exit_code = 1;
                false
            }
        };

        RunSummary {
            reports,
            telemetry_sent,
            summary_sent,
            exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{EvaluatorSettings, KeyTemplate};
    use crate::config::types::TestElement;
    use crate::error::{ProbeError, TransmitError};
    use crate::extract::ExtractorRegistry;
    use crate::probe::{Probe, ProbeRequest, ProbeResult};
    use crate::sink::SendResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct StaticProbe;

    #[async_trait]
    impl Probe for StaticProbe {
        async fn probe(&self, request: &ProbeRequest<'_>) -> Result<ProbeResult, ProbeError> {
            if request.uri.contains("down") {
                return Err(ProbeError::Connect {
                    uri: request.uri.to_string(),
                    reason: "refused".to_string(),
                });
            }
            Ok(ProbeResult {
                status_code: 200,
                content: r#"{"status":"up"}"#.to_string(),
                elapsed: Duration::from_millis(1),
            })
        }
    }

    /// 记录每一批指标的发送器，`fail_from` 之后的批次返回错误
    #[derive(Default)]
    struct RecordingSender {
        batches: Mutex<Vec<Vec<Metric>>>,
        fail_from: Option<usize>,
    }

    #[async_trait]
    impl MetricSender for RecordingSender {
        async fn send(&self, metrics: &[Metric]) -> Result<SendResponse, TransmitError> {
            let mut batches = self.batches.lock().unwrap();
            let index = batches.len();
            batches.push(metrics.to_vec());
            if self.fail_from.is_some_and(|from| index >= from) {
                return Err(TransmitError::Rejected {
                    address: "fake:10051".to_string(),
                    response: "failed".to_string(),
                });
            }
            Ok(SendResponse::default())
        }
    }

    fn runner(sender: Arc<RecordingSender>) -> CheckRunner {
        let evaluator = CheckEvaluator::new(
            Arc::new(StaticProbe),
            Arc::new(ExtractorRegistry::with_defaults()),
            EvaluatorSettings {
                metric_host: "web01".to_string(),
                item_key_format: KeyTemplate::parse("url_monitor[{checkname},{key}]").unwrap(),
                default_timeout: Some(Duration::from_secs(5)),
                default_verify_ssl: true,
            },
        );
        CheckRunner::new(evaluator, sender, "web01", "url_monitor.checksummary")
    }

    fn test_set(key: &str, uri: Option<&str>) -> TestSet {
        TestSet {
            key: key.to_string(),
            uri: uri.map(str::to_string),
            ok_http_code: Some("200".to_string()),
            identity_provider: Some("none".to_string()),
            response_type: Some("json".to_string()),
            test_elements: Some(vec![TestElement {
                key: Some("status".to_string()),
                datatype: Some("string".to_string()),
                path: Some("$.status".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_test_sets() {
        let sender = Arc::new(RecordingSender::default());
        let runner = runner(sender.clone());

        let test_sets = vec![
            test_set("broken", None),
            test_set("healthy", Some("https://example.com/health")),
        ];
        let summary = runner.run(&test_sets, None).await;

        assert_eq!(summary.exit_code, 1);
        assert_eq!(summary.reports.len(), 2);
        assert!(summary.telemetry_sent);
        assert!(summary.summary_sent);

        let batches = sender.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].key, "url_monitor[healthy,status]");
        assert_eq!(batches[1][0].key, "url_monitor.checksummary");
        assert_eq!(batches[1][0].value.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_all_healthy_run() {
        let sender = Arc::new(RecordingSender::default());
        let runner = runner(sender.clone());

        let test_sets = vec![
            test_set("a", Some("https://a.example.com/")),
            test_set("b", Some("https://b.example.com/")),
        ];
        let summary = runner.run(&test_sets, None).await;

        assert_eq!(summary.exit_code, 0);
        let batches = sender.batches.lock().unwrap();
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1][0].value.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_key_filter() {
        let sender = Arc::new(RecordingSender::default());
        let runner = runner(sender.clone());

        let test_sets = vec![
            test_set("a", Some("https://down.example.com/")),
            test_set("b", Some("https://b.example.com/")),
        ];
        let summary = runner.run(&test_sets, Some("b")).await;

        assert_eq!(summary.exit_code, 0);
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].test_set, "b");
    }

    #[tokio::test]
    async fn test_unknown_key_fails_run() {
        let sender = Arc::new(RecordingSender::default());
        let runner = runner(sender.clone());

        let test_sets = vec![test_set("a", Some("https://a.example.com/"))];
        let summary = runner.run(&test_sets, Some("nope")).await;

        assert_eq!(summary.exit_code, 1);
        assert!(summary.reports.is_empty());
        // 只有摘要指标
        let batches = sender.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].value.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_probe_failure_fails_run() {
        let sender = Arc::new(RecordingSender::default());
        let runner = runner(sender.clone());

        let test_sets = vec![test_set("a", Some("https://down.example.com/"))];
        let summary = runner.run(&test_sets, None).await;

        assert_eq!(summary.exit_code, 1);
        assert!(summary.reports[0].metrics.is_empty());
    }

    #[tokio::test]
    async fn test_transmit_failure_marks_run_failed() {
        let sender = Arc::new(RecordingSender {
            fail_from: Some(0),
            ..Default::default()
        });
        let runner = runner(sender.clone());

        let test_sets = vec![test_set("a", Some("https://a.example.com/"))];
        let summary = runner.run(&test_sets, None).await;

        assert_eq!(summary.exit_code, 1);
        assert!(!summary.telemetry_sent);
        assert!(!summary.summary_sent);
        // 摘要指标携带的是发送检测指标失败之后的返回码
        let batches = sender.batches.lock().unwrap();
        assert_eq!(batches[1][0].value.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_summary_failure_marks_run_failed() {
        let sender = Arc::new(RecordingSender {
            fail_from: Some(1),
            ..Default::default()
        });
        let runner = runner(sender);

        let test_sets = vec![test_set("a", Some("https://a.example.com/"))];
        let summary = runner.run(&test_sets, None).await;

        assert!(summary.telemetry_sent);
        assert!(!summary.summary_sent);
        assert_eq!(summary.exit_code, 1);
    }

    /// 收集日志输出的写入器
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_transmit_failures_are_logged_as_critical() {
        use tracing_subscriber::prelude::*;

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .without_time(),
        );
        let _guard = tracing::subscriber::set_default(subscriber);

        let sender = Arc::new(RecordingSender {
            fail_from: Some(0),
            ..Default::default()
        });
        let test_sets = vec![test_set("a", Some("https://a.example.com/"))];
        runner(sender).run(&test_sets, None).await;

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let critical: Vec<_> = output
            .lines()
            .filter(|line| line.contains("critical=true"))
            .collect();
        assert_eq!(critical.len(), 2, "{output}");
        assert!(critical.iter().all(|line| line.contains("ERROR")));
        assert!(critical[0].contains("发送检测指标到 Zabbix 失败"));
        assert!(critical[1].contains("发送执行摘要到 Zabbix 失败"));
    }
}

//! 命令处理逻辑
//!
//! 实现 check 与 discover 命令，返回进程退出码

use crate::check::{CheckEvaluator, CheckRunner, EvaluatorSettings};
use crate::config::Config;
use crate::discovery::DiscoveryExporter;
use crate::error::{ConfigError, LockError, Result};
use crate::extract::ExtractorRegistry;
use crate::lock::PidLock;
use crate::probe::{AuthRegistry, HttpProbe};
use crate::sink::ZabbixSender;
use crate::skip::{conditions_from_config, should_skip};
use async_trait::async_trait;
use std::sync::Arc;

/// 已有实例在运行时的退出码，与检测失败区分
pub const EXIT_LOCK_CONFLICT: i32 = 3;

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    ///
    /// # 参数
    /// * `config` - 已加载并验证的配置
    ///
    /// # 返回
    /// * `Result<i32>` - 进程退出码
    async fn execute(&self, config: &Config) -> Result<i32>;
}

/// check 命令
pub struct CheckCommand {
    /// 只检测指定的 testSet
    pub key: Option<String>,
}

#[async_trait]
impl Command for CheckCommand {
    async fn execute(&self, config: &Config) -> Result<i32> {
        let global = &config.global;

        if let Some(ref skip) = global.skip_run_when {
            let conditions = conditions_from_config(skip)?;
            if should_skip(&conditions).await.is_some() {
                return Ok(0);
            }
        }

        let pidfile = global.pidfile.as_ref().ok_or_else(|| ConfigError::MissingGlobal {
            field: "pidfile".to_string(),
        })?;
        let _lock = match PidLock::acquire(pidfile) {
            Ok(lock) => lock,
            Err(LockError::AlreadyRunning { pid, path }) => {
                tracing::error!(pid = pid, path = %path, "进程已在运行，停止执行");
                return Ok(EXIT_LOCK_CONFLICT);
            }
            Err(e) => return Err(e.into()),
        };

        let backend = global
            .zabbix
            .as_ref()
            .ok_or_else(|| ConfigError::MissingGlobal {
                field: "zabbix".to_string(),
            })?
            .resolve()?;

        let auth = AuthRegistry::from_config(&global.identity_providers);
        let probe = HttpProbe::new(global.headers.clone(), auth)?;

        let evaluator = CheckEvaluator::new(
            Arc::new(probe),
            Arc::new(ExtractorRegistry::with_defaults()),
            EvaluatorSettings {
                metric_host: backend.metric_host.clone(),
                item_key_format: backend.item_key_format.clone(),
                default_timeout: global.default_timeout()?,
                default_verify_ssl: global.default_verify_ssl(),
            },
        );
        let sender = ZabbixSender::new(backend.address.clone(), backend.send_timeout);
        let runner = CheckRunner::new(
            evaluator,
            Arc::new(sender),
            backend.metric_host,
            backend.checksummary_key,
        );

        let summary = runner.run(&config.test_sets, self.key.as_deref()).await;

        println!("{}", summary.exit_code);
        Ok(summary.exit_code)
    }
}

/// discover 命令
pub struct DiscoverCommand {
    /// datatype 过滤条件
    pub datatype: Option<String>,
}

#[async_trait]
impl Command for DiscoverCommand {
    async fn execute(&self, config: &Config) -> Result<i32> {
        let exporter = DiscoveryExporter::new(&config.test_sets);

        let document = match exporter.discover(self.datatype.as_deref()) {
            Ok(document) => document,
            Err(e @ ConfigError::MissingDatatypeFilter { .. }) => {
                tracing::error!(
                    "{}。请在 testSet -> <名称> -> testElements -> datatype 中定义 datatype",
                    e
                );
                return Ok(1);
            }
            Err(e) => return Err(e.into()),
        };

        println!("{}", document.to_pretty_json()?);
        Ok(0)
    }
}

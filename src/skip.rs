//! 跳过运行条件
//!
//! 备用节点上通过外部命令、环境变量或 facter 事实决定本次 check 是否直接退出

use crate::config::types::SkipRunWhen;
use crate::error::ConfigError;
use tokio::process::Command;

/// 默认的 facter 命令
pub const DEFAULT_FACTER_SCRIPT: &str = "facter";

/// 一个跳过条件
#[derive(Debug, Clone, PartialEq)]
pub enum SkipCondition {
    /// `<script> <fact>` 的输出等于 `value` 时跳过
    PuppetFacter {
        script: String,
        fact: String,
        value: String,
    },
    /// `sh -c <script>` 的输出与退出码都匹配时跳过
    Shell {
        script: String,
        stdout: String,
        code: i32,
    },
    /// 环境变量等于 `value` 时跳过
    Environment { variable: String, value: String },
}

fn required(value: &Option<String>, field: &str) -> Result<String, ConfigError> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingGlobal {
            field: format!("skip_run_when: {field}"),
        })
}

/// 从配置构建跳过条件
///
/// # 参数
/// * `config` - `config.skip_run_when`
///
/// # 返回
/// * `Result<Vec<SkipCondition>, ConfigError>` - 缺少必填项时返回错误
pub fn conditions_from_config(config: &SkipRunWhen) -> Result<Vec<SkipCondition>, ConfigError> {
    let mut conditions = Vec::new();

    if let Some(ref facter) = config.puppet_facter {
        conditions.push(SkipCondition::PuppetFacter {
            script: facter
                .script
                .clone()
                .unwrap_or_else(|| DEFAULT_FACTER_SCRIPT.to_string()),
            fact: required(&facter.fact, "puppet_facter: fact")?,
            value: required(&facter.value, "puppet_facter: value")?,
        });
    }

    if let Some(ref shell) = config.shell {
        let code = match shell.code.as_deref().map(str::trim) {
            None | Some("") => 0,
            Some(code) => code.parse::<i32>().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "skip_run_when: shell: code 必须是整数，当前为 `{code}`"
                ))
            })?,
        };
        conditions.push(SkipCondition::Shell {
            script: required(&shell.script, "shell: script")?,
            stdout: required(&shell.stdout, "shell: stdout")?,
            code,
        });
    }

    if let Some(ref environment) = config.environment {
        conditions.push(SkipCondition::Environment {
            variable: required(&environment.variable, "environment: variable")?,
            value: required(&environment.value, "environment: value")?,
        });
    }

    Ok(conditions)
}

impl SkipCondition {
    /// 条件名称，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            SkipCondition::PuppetFacter { .. } => "puppet_facter",
            SkipCondition::Shell { .. } => "shell",
            SkipCondition::Environment { .. } => "environment",
        }
    }

    /// 判断是否应跳过本次运行；命令无法执行时视为不跳过
    pub async fn is_met(&self) -> bool {
        match self {
            SkipCondition::PuppetFacter {
                script,
                fact,
                value,
            } => match Command::new(script).arg(fact).output().await {
                Ok(output) => String::from_utf8_lossy(&output.stdout).trim() == value,
                Err(e) => {
                    tracing::error!(script = %script, error = %e, "执行 facter 失败");
                    false
                }
            },
            SkipCondition::Shell {
                script,
                stdout,
                code,
            } => match Command::new("sh").arg("-c").arg(script).output().await {
                Ok(output) => {
                    let actual = String::from_utf8_lossy(&output.stdout);
                    actual.trim() == stdout.trim() && output.status.code() == Some(*code)
                }
                Err(e) => {
                    tracing::error!(script = %script, error = %e, "执行 shell 条件失败");
                    false
                }
            },
            SkipCondition::Environment { variable, value } => {
                std::env::var(variable).is_ok_and(|actual| &actual == value)
            }
        }
    }
}

/// 依次检查跳过条件，第一个满足的条件生效
///
/// # 返回
/// * `Option<&SkipCondition>` - 满足的条件
pub async fn should_skip(conditions: &[SkipCondition]) -> Option<&SkipCondition> {
    if !conditions.is_empty() {
        tracing::info!(count = conditions.len(), "检查备用节点条件，判断是否跳过本次执行");
    }
    for condition in conditions {
        if condition.is_met().await {
            tracing::info!(condition = condition.name(), "满足跳过条件，本次不执行检测");
            return Some(condition);
        }
    }
    None
}

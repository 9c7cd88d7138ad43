//! 检测执行模块
//!
//! 对单个 testSet 执行探测、提取、生成指标，并在一次运行中汇总所有 testSet 的结果

pub mod evaluator;
pub mod runner;
pub mod template;

pub use evaluator::{CheckError, CheckEvaluator, CheckOutcome, CheckReport, EvaluatorSettings};
pub use runner::{CheckRunner, RunSummary};
pub use template::{KeyTemplate, TemplateContext};

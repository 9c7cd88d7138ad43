//! URL Monitor 主程序入口
//!
//! 探测HTTP接口并把提取的值发送到 Zabbix

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};
use url_monitor::cli::{Args, CheckCommand, Command, Commands, DiscoverCommand};
use url_monitor::config::load_config_file;
use url_monitor::logging::{parse_log_level, LogConfig, LoggingSystem};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();
    let config_path = args.get_config_path();

    // 加载配置；失败时日志配置尚不可用，使用默认控制台输出报告错误
    let config = match load_config_file(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            let fallback = LogConfig {
                level: args
                    .loglevel
                    .as_deref()
                    .map(parse_log_level)
                    .unwrap_or(log::LevelFilter::Info),
                ..Default::default()
            };
            LoggingSystem::init(&fallback).context("初始化日志系统失败")?;
            error!("加载配置文件 {} 失败: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };

    // 初始化日志系统
    let log_config = LogConfig::from_settings(&config.global.logging, args.loglevel.as_deref());
    LoggingSystem::init(&log_config).context("初始化日志系统失败")?;

    debug!("URL Monitor v{} 启动", url_monitor::VERSION);

    // 执行命令
    let command: Box<dyn Command> = match &args.command {
        Commands::Check { key } => Box::new(CheckCommand { key: key.clone() }),
        Commands::Discover { datatype } => Box::new(DiscoverCommand {
            datatype: datatype.clone(),
        }),
    };

    let exit_code = match command.execute(&config).await {
        Ok(code) => code,
        Err(e) => {
            error!("命令执行失败: {}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// URL Monitor - 探测HTTP接口并把提取的值发送到 Zabbix
#[derive(Parser, Debug, Clone)]
#[command(
    name = "url-monitor",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "配置文件路径，默认依次查找 ./url_monitor.yaml、用户配置目录与 /etc/url_monitor.yaml",
        env = "URL_MONITOR_CONFIG"
    )]
    pub config: Option<PathBuf>,

    /// 日志级别覆盖
    #[arg(
        long,
        global = true,
        value_name = "LEVEL",
        help = "覆盖配置中的日志级别 [debug, info, warning, error, critical, exceptions]"
    )]
    pub loglevel: Option<String>,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// 执行检测并把指标发送到 Zabbix
    Check {
        /// 只检测指定的 testSet
        #[arg(short, long, value_name = "KEY", help = "只检测 testSet 下指定名称的一项")]
        key: Option<String>,
    },

    /// 输出 Zabbix 低级自动发现文档
    Discover {
        /// datatype 过滤条件（必填）
        #[arg(
            short = 't',
            long,
            value_name = "DATATYPE",
            help = "只导出包含该 datatype 的 testElement"
        )]
        datatype: Option<String>,
    },
}

impl Args {
    /// 获取配置文件路径
    pub fn get_config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::loader::get_default_config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_parse_check() {
        std::env::remove_var("URL_MONITOR_CONFIG");
        let args = Args::try_parse_from(["url-monitor", "check", "--key", "site"]).unwrap();
        assert_eq!(
            args.command,
            Commands::Check {
                key: Some("site".to_string())
            }
        );
        assert!(args.config.is_none());
        assert!(args.loglevel.is_none());
    }

    #[test]
    #[serial]
    fn test_parse_discover_with_global_flags() {
        let args = Args::try_parse_from([
            "url-monitor",
            "discover",
            "-t",
            "string",
            "-c",
            "/etc/custom.yaml",
            "--loglevel",
            "debug",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Commands::Discover {
                datatype: Some("string".to_string())
            }
        );
        assert_eq!(args.get_config_path(), PathBuf::from("/etc/custom.yaml"));
        assert_eq!(args.loglevel.as_deref(), Some("debug"));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("URL_MONITOR_CONFIG", "/tmp/from-env.yaml");
        let args = Args::try_parse_from(["url-monitor", "discover"]).unwrap();
        std::env::remove_var("URL_MONITOR_CONFIG");

        assert_eq!(args.config, Some(PathBuf::from("/tmp/from-env.yaml")));
        assert_eq!(args.command, Commands::Discover { datatype: None });
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Args::try_parse_from(["url-monitor", "start"]).is_err());
    }
}

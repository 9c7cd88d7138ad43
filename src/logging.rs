//! 日志系统模块
//!
//! 基于 tracing 的结构化日志，支持控制台（stderr）、文件与 syslog 输出。
//! stdout 保留给 check 的返回码与 discover 的文档。

use crate::config::types::{LoggingConfig, SyslogConfig};
use crate::sink::BackendAddress;
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter, Layer};

/// syslog 默认端口
pub const DEFAULT_SYSLOG_PORT: u16 = 514;

/// syslog 报文中的程序标识
const SYSLOG_TAG: &str = "url_monitor";

/// syslog 传输协议
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyslogTransport {
    #[default]
    Udp,
    Tcp,
}

/// syslog 输出目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogTarget {
    /// 服务器地址
    pub address: BackendAddress,
    /// 传输协议
    pub transport: SyslogTransport,
}

impl SyslogTarget {
    /// 从 `config.logging.syslog` 构建
    ///
    /// `socket` 为 `tcp` 时使用 TCP，其余取值一律使用 UDP。
    ///
    /// # 返回
    /// * `Result<Self, String>` - 缺少 server 或地址无效时返回原因
    pub fn from_settings(settings: Option<&SyslogConfig>) -> Result<Self, String> {
        let settings = settings.ok_or_else(|| "缺少 syslog 配置".to_string())?;
        let server = settings
            .server
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "缺少 syslog.server".to_string())?;
        let address =
            BackendAddress::parse(server, DEFAULT_SYSLOG_PORT).map_err(|e| e.to_string())?;

        let transport = match settings.socket.as_deref().map(str::trim) {
            Some(socket) if socket.eq_ignore_ascii_case("tcp") => SyslogTransport::Tcp,
            _ => SyslogTransport::Udp,
        };
        Ok(Self { address, transport })
    }
}

/// 日志配置结构
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// 日志级别
    pub level: LevelFilter,
    /// 是否输出到控制台
    pub console: bool,
    /// 日志文件路径（可选）
    pub file_path: Option<PathBuf>,
    /// syslog 目标（可选）
    pub syslog: Option<SyslogTarget>,
    /// 是否使用JSON格式
    pub json_format: bool,
    /// 配置中无法识别、被忽略的输出
    pub ignored_outputs: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            console: true,
            file_path: None,
            syslog: None,
            json_format: false,
            ignored_outputs: Vec::new(),
        }
    }
}

impl LogConfig {
    /// 从配置文件的 `config.logging` 构建
    ///
    /// # 参数
    /// * `settings` - 配置文件中的日志设置
    /// * `level_override` - 命令行 `--loglevel`
    ///
    /// # 返回
    /// * `LogConfig` - 日志配置
    pub fn from_settings(settings: &LoggingConfig, level_override: Option<&str>) -> Self {
        let level = level_override
            .or(settings.level.as_deref())
            .map(parse_log_level)
            .unwrap_or(LevelFilter::Info);

        let mut config = Self {
            level,
            console: false,
            file_path: None,
            syslog: None,
            json_format: settings.json,
            ignored_outputs: Vec::new(),
        };

        let outputs = settings.outputs.as_deref().unwrap_or("console");
        for output in outputs.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match output.to_lowercase().as_str() {
                "console" | "stdout" | "stderr" => config.console = true,
                "file" => match settings.logfile {
                    Some(ref path) => config.file_path = Some(path.clone()),
                    None => config.ignored_outputs.push("file（缺少 logfile）".to_string()),
                },
                "syslog" => match SyslogTarget::from_settings(settings.syslog.as_ref()) {
                    Ok(target) => config.syslog = Some(target),
                    Err(reason) => config.ignored_outputs.push(format!("syslog（{reason}）")),
                },
                _ => config.ignored_outputs.push(output.to_string()),
            }
        }

        if !config.console && config.file_path.is_none() && config.syslog.is_none() {
            config.console = true;
        }
        config
    }
}

/// 按前缀解析日志级别
///
/// `err*`、`exc*`、`crit*` 都映射为 error，无法识别的取值同样按 error 处理。
pub fn parse_log_level(level: &str) -> LevelFilter {
    let level = level.trim().to_lowercase();
    if level.starts_with("warn") {
        LevelFilter::Warn
    } else if level.starts_with("info") {
        LevelFilter::Info
    } else if level.starts_with("debu") {
        LevelFilter::Debug
    } else if level.starts_with("trac") {
        LevelFilter::Trace
    } else if level == "off" {
        LevelFilter::Off
    } else {
        LevelFilter::Error
    }
}

/// 日志系统
pub struct LoggingSystem;

impl LoggingSystem {
    /// 安装全局 subscriber，重复调用时保持第一次的设置
    ///
    /// # 参数
    /// * `config` - 日志配置
    ///
    /// # 返回
    /// * `anyhow::Result<()>` - 日志文件无法打开或 syslog 无法连接时返回错误
    pub fn init(config: &LogConfig) -> anyhow::Result<()> {
        Self::init_log_tracer()?;

        let env_filter = EnvFilter::from_default_env()
            .add_directive(Self::convert_level_to_directive(config.level));

        let console_layer = config.console.then(|| {
            if config.json_format {
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_target(false)
                    .boxed()
            }
        });

        let file_layer = match config.file_path {
            Some(ref path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| anyhow::anyhow!("打开日志文件 {} 失败: {}", path.display(), e))?;
                let writer = Arc::new(file);
                let layer = if config.json_format {
                    fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_timer(fmt::time::ChronoUtc::rfc_3339())
                        .boxed()
                } else {
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_timer(fmt::time::ChronoUtc::rfc_3339())
                        .boxed()
                };
                Some(layer)
            }
            None => None,
        };

        let syslog_layer = match config.syslog {
            Some(ref target) => {
                let writer = SyslogWriter::connect(target).map_err(|e| {
                    anyhow::anyhow!("连接 syslog 服务器 {} 失败: {}", target.address, e)
                })?;
                let layer = if config.json_format {
                    fmt::layer().json().with_writer(writer).without_time().boxed()
                } else {
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(false)
                        .without_time()
                        .boxed()
                };
                Some(layer)
            }
            None => None,
        };

        let result = registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .with(syslog_layer)
            .try_init();

        match result {
            Ok(()) => {
                tracing::debug!(config = ?config, "日志系统初始化完成");
            }
            Err(e) => {
                // 已经安装过 subscriber（测试中常见），沿用已有设置
                tracing::debug!(error = %e, "日志系统已经初始化过了");
            }
        }

        for output in &config.ignored_outputs {
            tracing::warn!(output = %output, "不支持的日志输出，已忽略");
        }
        Ok(())
    }

    /// 初始化 LogTracer（log crate 到 tracing 的桥接）
    fn init_log_tracer() -> anyhow::Result<()> {
        use tracing_log::LogTracer;

        static LOG_TRACER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

        let result = LOG_TRACER_INIT.get_or_init(|| LogTracer::init().map_err(|e| e.to_string()));

        result
            .as_ref()
            .map_err(|e| anyhow::anyhow!("LogTracer初始化失败: {}", e))?;
        Ok(())
    }

    /// 将 log::LevelFilter 转换为 tracing 的指令
    fn convert_level_to_directive(level: LevelFilter) -> tracing_subscriber::filter::Directive {
        use tracing_subscriber::filter::{Directive, LevelFilter as TracingLevel};
        let level = match level {
            LevelFilter::Off => TracingLevel::OFF,
            LevelFilter::Error => TracingLevel::ERROR,
            LevelFilter::Warn => TracingLevel::WARN,
            LevelFilter::Info => TracingLevel::INFO,
            LevelFilter::Debug => TracingLevel::DEBUG,
            LevelFilter::Trace => TracingLevel::TRACE,
        };
        Directive::from(level)
    }
}

/// syslog 连接
#[derive(Debug)]
enum SyslogConnection {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

/// syslog 写入器，每条日志事件发送一条报文
///
/// UDP 下一条事件对应一个数据报，TCP 下以换行分隔。
#[derive(Debug)]
pub struct SyslogWriter {
    connection: Mutex<SyslogConnection>,
}

impl SyslogWriter {
    /// 连接 syslog 服务器
    ///
    /// # 参数
    /// * `target` - syslog 目标
    ///
    /// # 返回
    /// * `io::Result<Self>` - 地址无法解析或连接失败时返回错误
    pub fn connect(target: &SyslogTarget) -> io::Result<Self> {
        let remote = (target.address.host.as_str(), target.address.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "地址无法解析"))?;

        let connection = match target.transport {
            SyslogTransport::Udp => {
                let local_ip = match remote {
                    SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                };
                let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0))?;
                socket.connect(remote)?;
                SyslogConnection::Udp(socket)
            }
            SyslogTransport::Tcp => SyslogConnection::Tcp(TcpStream::connect(remote)?),
        };

        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// 发送一条报文：`<PRI>url_monitor[pid]: 消息`
    fn send(&self, priority: u8, message: &[u8]) -> io::Result<()> {
        let message = message.strip_suffix(b"\n").unwrap_or(message);
        let mut packet = format!("<{priority}>{SYSLOG_TAG}[{}]: ", std::process::id()).into_bytes();
        packet.extend_from_slice(message);

        let mut connection = self
            .connection
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "syslog 连接锁已损坏"))?;
        match *connection {
            SyslogConnection::Udp(ref socket) => socket.send(&packet).map(|_| ()),
            SyslogConnection::Tcp(ref mut stream) => {
                packet.push(b'\n');
                stream.write_all(&packet)
            }
        }
    }
}

/// user 设施下的优先级（facility 1 * 8 + severity）
fn syslog_priority(level: &Level) -> u8 {
    let severity = match *level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        _ => 7,
    };
    8 + severity
}

/// 单条日志事件的缓冲，释放时整条发送
pub struct SyslogLine<'a> {
    writer: &'a SyslogWriter,
    priority: u8,
    buffer: Vec<u8>,
}

impl Write for SyslogLine<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let buffer = std::mem::take(&mut self.buffer);
        self.writer.send(self.priority, &buffer)
    }
}

impl Drop for SyslogLine<'_> {
    fn drop(&mut self) {
        // 日志通道本身出错时无处上报
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for SyslogWriter {
    type Writer = SyslogLine<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogLine {
            writer: self,
            priority: syslog_priority(&Level::INFO),
            buffer: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogLine {
            writer: self,
            priority: syslog_priority(meta.level()),
            buffer: Vec::new(),
        }
    }
}

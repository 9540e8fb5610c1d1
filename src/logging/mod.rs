//! 日志初始化模块.
//!
//! 解码库内部通过 `log` 门面输出, 这里安装 tracing 订阅器并桥接 `log` 记录.
//!
//! 双输出:
//! - console: 可选彩色, 默认 debug 级别
//! - file: 无色, 默认 info, `H263KIT_LOG` 环境变量可覆盖
//!
//! 日志文件输出到 {log_dir}/{prefix}.{date}.log, 按天翻滚.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// 文件日志级别的环境变量
const LOG_ENV: &str = "H263KIT_LOG";

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 控制台过滤规则 (EnvFilter 语法)
    #[serde(default = "default_console_level")]
    pub console_level: String,
    /// 文件过滤规则 (EnvFilter 语法)
    #[serde(default = "default_file_level")]
    pub file_level: String,
    /// 日志目录
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// 日志文件前缀
    pub file_prefix: String,
    /// 是否写文件
    #[serde(default = "default_true")]
    pub enable_file: bool,
    /// 控制台是否输出颜色
    #[serde(default = "default_true")]
    pub ansi: bool,
}

fn default_console_level() -> String {
    "debug".to_string()
}

fn default_file_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: default_console_level(),
            file_level: default_file_level(),
            log_dir: default_log_dir(),
            file_prefix: "h263kit".to_string(),
            enable_file: true,
            ansi: true,
        }
    }
}

static INITIALIZED: OnceLock<()> = OnceLock::new();
static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 初始化日志系统
///
/// 全局订阅器只能安装一次, 重复调用直接返回 `Ok(())`.
pub fn init(config: LoggingConfig) -> Result<()> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let console_filter = EnvFilter::try_new(&config.console_level)
        .with_context(|| format!("控制台日志级别无效: {}", config.console_level))?;
    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stdout)
        .with_ansi(config.ansi)
        .event_format(ConsoleFormatter { ansi: config.ansi })
        .with_filter(console_filter);

    let file_layer = if config.enable_file {
        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("创建日志目录失败, path={}", config.log_dir))?;
        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(&config.file_prefix)
            .filename_suffix("log")
            .build(&config.log_dir)
            .with_context(|| format!("创建日志文件失败, dir={}", config.log_dir))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        LOG_GUARD.set(guard).ok();

        let file_filter = match EnvFilter::try_from_env(LOG_ENV) {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.file_level)
                .with_context(|| format!("文件日志级别无效: {}", config.file_level))?,
        };
        Some(
            fmt::Layer::default()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(FileFormatter)
                .with_filter(file_filter),
        )
    } else {
        None
    };

    // tracing-log 特性会同时安装 LogTracer, 桥接解码库的 log 记录
    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("安装全局日志订阅器失败")?;
    INITIALIZED.set(()).ok();
    Ok(())
}

/// 指定日期的日志文件路径
pub fn log_file_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

/// Console 格式: 时间戳, 级别 (可选彩色) 和源码位置
struct ConsoleFormatter {
    ansi: bool,
}

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        write_timestamp(&mut writer, &now)?;
        if self.ansi {
            let color = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                _ => "\x1b[34m",
            };
            write!(writer, "{}{:5}\x1b[0m ", color, meta.level().to_string())?;
        } else {
            write!(writer, "{:5} ", meta.level().to_string())?;
        }
        write!(
            writer,
            "{}:{} > ",
            meta.file().unwrap_or("unknown"),
            meta.line().unwrap_or(0)
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// File 格式: 无色, 无源码位置
struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        write_timestamp(&mut writer, &now)?;
        write!(writer, "{:5} > ", event.metadata().level().to_string())?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn write_timestamp(writer: &mut Writer<'_>, now: &chrono::DateTime<Local>) -> std::fmt::Result {
    write!(
        writer,
        "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.timestamp_subsec_millis()
    )
}

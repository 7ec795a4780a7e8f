use anyhow::{Context, Result};
use clap::{Arg, Command};
use taskbus::app::{AppMode, Application};
use taskbus::shutdown::install_signal_handler;
use taskbus_core::{config::AppConfig, init_logging, LogFormat};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskbus")
        .version(env!("CARGO_PKG_VERSION"))
        .about("异步消息处理与定时任务调度")
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(AppMode::NAMES)
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时按默认路径查找"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty", "compact"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path).context("加载配置失败")?;

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = match matches.get_one::<String>("log-format") {
        Some(format) => format.parse::<LogFormat>()?,
        None => config.observability.log_format,
    };
    init_logging(&log_level, log_format)?;

    let mode: AppMode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or_default()
        .parse()?;

    let host = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    info!("启动taskbus，模式: {}，主机: {}", mode, host);
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let app = Application::new(config, mode).await?;
    let shutdown = install_signal_handler();
    app.run(shutdown).await?;

    info!("taskbus已退出");
    Ok(())
}

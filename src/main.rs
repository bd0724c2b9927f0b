//! channel_bot 主入口
//!
//! 宿主框架的渠道机器人命令，按 `--channel` 加载对应渠道插件并驱动事件循环。

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use tasknexus_feishu::channels::feishu::FeishuChannel;
use tasknexus_feishu::channels::traits::Channel;
use tasknexus_feishu::channels::ChannelRegistry;
use tasknexus_feishu::infra::config::{Config, ConfigLoader, FeishuCredentials};
use tasknexus_feishu::infra::logging::{self, LogLevel, LoggingConfig};

// 命令行参数解析结构体
#[derive(Parser, Debug)]
#[command(name = "channel_bot")]
#[command(version = "0.1.0")]
#[command(about = "TaskNexus 渠道机器人", long_about = None)]
struct Args {
    /// 渠道标识
    #[arg(long, default_value = "feishu")]
    channel: String,

    /// 配置文件路径
    #[arg(short, long, default_value = "tasknexus.toml")]
    config: String,

    /// 是否启用 verbose 模式（显示 DEBUG 日志）
    #[arg(short, long)]
    verbose: bool,

    /// 子命令
    #[command(subcommand)]
    command: Option<Commands>,
}

// 子命令枚举
#[derive(Subcommand, Debug)]
enum Commands {
    /// 启动渠道机器人
    Start,
    /// 检查配置与凭证是否可解析
    Check,
    /// 显示版本信息
    Version,
}

#[tokio::main]
async fn main() {
    // 加载 .env 文件
    dotenv::dotenv().ok();

    let args = Args::parse();

    // 设置日志级别
    let log_level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    logging::init(&LoggingConfig { level: log_level });

    info!(version = "0.1.0", channel = %args.channel, "channel_bot 启动");

    match args.command {
        Some(Commands::Start) | None => {
            run_channel(&args.channel, &args.config).await;
        }
        Some(Commands::Check) => {
            check_config(&args.channel, &args.config).await;
        }
        Some(Commands::Version) => {
            println!("channel_bot v0.1.0");
        }
    }
}

// 解析凭证：配置文件中的完整凭证优先，否则回退到环境变量解析
fn resolve_credentials(
    channel: &str,
    config: &Config,
) -> Result<FeishuCredentials, tasknexus_feishu::infra::error::Error> {
    if let Some(channel_config) = config.channels.get(channel) {
        if let Some(credentials) = channel_config.feishu_credentials() {
            info!("使用配置文件中的飞书凭证");
            return Ok(credentials);
        }
    }
    FeishuCredentials::resolve_from_process_env()
}

// 构建渠道注册表
fn build_registry(credentials: FeishuCredentials) -> ChannelRegistry {
    let mut registry = ChannelRegistry::new();
    registry.register(Arc::new(FeishuChannel::new(credentials)));
    registry
}

// 启动渠道并消费入站消息流
async fn run_channel(channel_id: &str, config_path: &str) {
    let loader = ConfigLoader::new();
    let config = match loader.load(config_path).await {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "配置加载失败");
            return;
        }
    };

    let credentials = match resolve_credentials(channel_id, &config) {
        Ok(credentials) => credentials,
        Err(e) => {
            // 缺少凭证属于致命配置错误，直接退出
            error!(error = %e, "凭证解析失败");
            std::process::exit(1);
        }
    };

    let registry = build_registry(credentials);
    let channel = match registry.get(channel_id) {
        Some(channel) => channel,
        None => {
            error!(channel = %channel_id, known = ?registry.ids(), "未知渠道");
            std::process::exit(1);
        }
    };

    let mut stream = match channel.start().await {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "渠道启动失败");
            return;
        }
    };

    info!(channel = channel.id(), label = channel.label(), "渠道已启动，等待消息");

    // 入站消息交付给宿主框架；独立运行时仅记录日志
    while let Some(message) = stream.recv().await {
        info!(
            chat_id = %message.chat_id,
            sender_id = %message.sender_id,
            content = %message.content,
            "收到渠道消息"
        );
    }

    channel.stop().await;
    info!("channel_bot 退出");
}

// 检查配置文件与凭证解析，不建立连接
async fn check_config(channel_id: &str, config_path: &str) {
    println!("验证配置文件: {}", config_path);

    let loader = ConfigLoader::new();
    match loader.load(config_path).await {
        Ok(config) => {
            println!("配置验证成功!");
            println!("- Channels: {}", config.channels.len());

            match resolve_credentials(channel_id, &config) {
                Ok(credentials) => {
                    println!("- 飞书凭证: app_id = {}", credentials.app_id);
                }
                Err(e) => {
                    println!("- 凭证解析失败: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            println!("配置验证失败: {}", e);
            std::process::exit(1);
        }
    }
}

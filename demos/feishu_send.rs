//! 飞书消息发送演示
//!
//! 验证飞书机器人发送消息功能
//!
//! # 使用方法
//! ```bash
//! cargo run --example feishu_send -- --to "oc_xxx" --text "Hello!"
//! ```
//! 凭证从环境变量解析（FEISHU_APP_ID / FEISHU_APP_SECRET，
//! 或 TASKNEXUS_PLUGIN_FEISHU_APP_ID / TASKNEXUS_PLUGIN_FEISHU_APP_SECRET）

use clap::Parser;
use tracing::Level;

use tasknexus_feishu::channels::feishu::{FeishuClient, FeishuMessageSender, MessageReceiver};
use tasknexus_feishu::infra::config::FeishuCredentials;

/// 飞书消息发送演示参数
#[derive(Parser, Debug)]
#[command(name = "feishu-send")]
#[command(about = "发送一条飞书文本消息", long_about = None)]
struct Args {
    /// 接收者 ID（Open ID 或群聊 ID）
    #[arg(long)]
    to: String,

    /// 消息文本内容
    #[arg(long)]
    text: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let credentials = FeishuCredentials::resolve_from_process_env()?;
    let sender = FeishuMessageSender::from_client(FeishuClient::new(credentials));

    let receiver = MessageReceiver::infer(&args.to);
    let response = sender.send_text(&receiver, &args.text).await?;

    println!("发送成功: message_id = {}", response.message_id);
    Ok(())
}

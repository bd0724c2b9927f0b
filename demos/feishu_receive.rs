//! 飞书消息接收演示
//!
//! 建立 WebSocket 长链接并打印收到的消息
//!
//! # 使用方法
//! ```bash
//! FEISHU_APP_ID=cli_xxx FEISHU_APP_SECRET=xxx cargo run --example feishu_receive
//! ```

use tracing::{info, Level};

use tasknexus_feishu::channels::feishu::FeishuChannel;
use tasknexus_feishu::channels::traits::Channel;
use tasknexus_feishu::infra::config::FeishuCredentials;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let credentials = FeishuCredentials::resolve_from_process_env()?;
    let channel = FeishuChannel::new(credentials);

    let mut stream = channel.start().await?;
    info!("长链接已建立，Ctrl+C 退出");

    while let Some(message) = stream.recv().await {
        println!(
            "[{}] {} -> {}: {}",
            message.channel_id, message.sender_id, message.chat_id, message.content
        );
    }

    channel.stop().await;
    Ok(())
}

//! 飞书渠道插件模块
//!
//! 本模块实现了飞书平台的渠道插件。
//!
//! # 功能
//! - 接收消息（通过 WebSocket 长链接）
//! - 发送消息（通过 API，机器人身份）
//!
//! # 所需平台权限
//! - `im:message`
//! - `im:message.p2p_msg:readonly`
//! - `im:message.group_at_msg:readonly`
//! - `im:message:send_as_bot`
//!
//! # 事件订阅
//! - `im.message.receive_v1`
//! - `im.message.message_read_v1`

pub mod client;
pub mod events;
pub mod send;
pub mod ws;

// 重新导出常用类型
pub use client::FeishuClient;
pub use events::{FeishuEventEnvelope, MessageEventHandler, MessageReceiveResult};
pub use send::{FeishuMessageSender, MessageReceiver, SendMessageResponse};
pub use ws::{FeishuWsMonitor, WsConfig};

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::info;

use crate::channels::traits::{Channel, MessagePayload, MessageStream};
use crate::infra::config::FeishuCredentials;
use crate::infra::error::{Error, Result};

/// 入站消息流缓冲大小
const MESSAGE_STREAM_CAPACITY: usize = 100;

/// 飞书渠道插件
///
/// 实现 `Channel` 接口，持有客户端与长链接监控器
pub struct FeishuChannel {
    /// 飞书客户端
    client: Arc<FeishuClient>,
    /// 消息发送器
    sender: FeishuMessageSender,
    /// 长链接监控器（start 后填充）
    monitor: Mutex<Option<FeishuWsMonitor>>,
}

impl FeishuChannel {
    /// 创建飞书渠道插件
    ///
    /// 凭证在进程启动时解析一次，之后不可变
    pub fn new(credentials: FeishuCredentials) -> Self {
        let client = Arc::new(FeishuClient::new(credentials));
        Self {
            sender: FeishuMessageSender::from_client((*client).clone()),
            client,
            monitor: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Channel for FeishuChannel {
    fn id(&self) -> &'static str {
        "feishu"
    }

    fn label(&self) -> &'static str {
        "飞书"
    }

    async fn start(&self) -> Result<MessageStream> {
        let mut guard = self.monitor.lock().await;
        if guard.is_some() {
            return Err(Error::Channel("飞书渠道已启动".to_string()));
        }

        info!("启动飞书渠道");

        let (tx, rx) = mpsc::channel(MESSAGE_STREAM_CAPACITY);
        let monitor = FeishuWsMonitor::new(self.client.clone());
        monitor.start(tx).await?;
        *guard = Some(monitor);

        Ok(rx)
    }

    async fn send(&self, payload: &MessagePayload) -> Result<String> {
        let receiver = MessageReceiver::infer(&payload.chat_id);
        let response = self.sender.send_text(&receiver, &payload.content).await?;
        Ok(response.message_id)
    }

    async fn stop(&self) {
        let mut guard = self.monitor.lock().await;
        if let Some(monitor) = guard.take() {
            monitor.stop();
        }
        info!("飞书渠道已停止");
    }
}

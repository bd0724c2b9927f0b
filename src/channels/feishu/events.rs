//! 飞书事件处理模块
//!
//! 处理飞书长链接推送的事件，包括：
//! 1. 解析 schema 2.0 事件信封
//! 2. 解析消息事件数据
//! 3. 转换为统一的 `ChannelMessage` 格式
//!
//! # 事件类型
//! - `im.message.receive_v1`: 收到消息事件
//! - `im.message.message_read_v1`: 消息已读事件（订阅但忽略）

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::channels::traits::ChannelMessage;
use crate::infra::error::{Error, Result};

/// 收到消息事件类型
pub const EVENT_MESSAGE_RECEIVE: &str = "im.message.receive_v1";
/// 消息已读事件类型
pub const EVENT_MESSAGE_READ: &str = "im.message.message_read_v1";

/// 飞书事件信封（schema 2.0）
///
/// 长链接推送的完整事件结构
#[derive(Debug, Deserialize)]
pub struct FeishuEventEnvelope {
    /// 协议版本（"2.0"）
    #[serde(default)]
    pub schema: Option<String>,
    /// 事件头
    pub header: FeishuEventHeader,
    /// 事件数据
    pub event: serde_json::Value,
}

/// 飞书事件头
#[derive(Debug, Deserialize)]
pub struct FeishuEventHeader {
    /// 事件唯一标识（每次推送都不同，不可用于消息去重）
    pub event_id: String,
    /// 事件类型
    pub event_type: String,
    /// 事件创建时间（毫秒时间戳字符串）
    #[serde(default)]
    pub create_time: Option<String>,
}

/// 飞书消息事件
///
/// `im.message.receive_v1` 事件的数据部分
#[derive(Debug, Deserialize)]
pub struct FeishuMessageEvent {
    /// 发送者
    pub sender: FeishuSender,
    /// 消息内容
    pub message: FeishuMessageBody,
}

/// 飞书发送者
#[derive(Debug, Deserialize, Clone)]
pub struct FeishuSender {
    /// 发送者 ID
    pub sender_id: FeishuSenderId,
    /// 发送者类型（"user" / "app"）
    pub sender_type: String,
}

/// 飞书发送者 ID
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FeishuSenderId {
    /// Open ID
    #[serde(default)]
    pub open_id: Option<String>,
    /// User ID
    #[serde(default)]
    pub user_id: Option<String>,
    /// Union ID
    #[serde(default)]
    pub union_id: Option<String>,
}

/// 飞书消息体详情
#[derive(Debug, Deserialize)]
pub struct FeishuMessageBody {
    /// 消息 ID
    pub message_id: String,
    /// 创建时间（毫秒时间戳字符串）
    pub create_time: String,
    /// 会话 ID
    pub chat_id: String,
    /// 会话类型（"p2p" / "group"）
    #[serde(default)]
    pub chat_type: String,
    /// 消息类型
    pub message_type: String,
    /// 消息内容（JSON 字符串）
    pub content: String,
}

/// 飞书文本消息内容
#[derive(Debug, Deserialize)]
pub struct FeishuTextContent {
    /// 文本内容
    pub text: String,
}

/// 消息接收处理结果
pub struct MessageReceiveResult {
    /// 转换后的消息
    pub message: ChannelMessage,
    /// 是否需要发送已读回执
    pub need_read_receipt: bool,
}

/// 消息事件处理器
///
/// 将飞书消息事件转换为统一的渠道消息
#[derive(Clone, Debug, Default)]
pub struct MessageEventHandler;

impl MessageEventHandler {
    /// 创建新的消息事件处理器
    pub fn new() -> Self {
        Self
    }

    /// 处理消息事件
    ///
    /// # 参数说明
    /// * `event_id` - 事件 ID（仅用于日志）
    /// * `event_data` - 事件数据（信封的 event 字段）
    ///
    /// # 返回值
    /// 处理结果（包含转换后的消息）
    pub fn handle(
        &self,
        event_id: &str,
        event_data: &serde_json::Value,
    ) -> Result<MessageReceiveResult> {
        let message_event: FeishuMessageEvent = serde_json::from_value(event_data.clone())
            .map_err(|e| Error::Serialization(format!("解析消息事件失败: {}", e)))?;

        debug!(
            event_id = %event_id,
            message_id = %message_event.message.message_id,
            "解析消息事件成功"
        );

        let message = self.convert_to_channel_message(&message_event)?;

        // 仅对用户发送的消息回已读回执
        let need_read_receipt = message_event.sender.sender_type == "user";

        Ok(MessageReceiveResult {
            message,
            need_read_receipt,
        })
    }

    /// 转换为统一的渠道消息格式
    fn convert_to_channel_message(&self, event: &FeishuMessageEvent) -> Result<ChannelMessage> {
        let content = self.parse_message_content(&event.message)?;

        // 优先使用 Open ID
        let sender_id = event
            .sender
            .sender_id
            .open_id
            .as_ref()
            .or(event.sender.sender_id.user_id.as_ref())
            .or(event.sender.sender_id.union_id.as_ref())
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ChannelMessage {
            channel_id: "feishu".to_string(),
            chat_id: event.message.chat_id.clone(),
            sender_id: sender_id.clone(),
            // 获取用户名需要额外 API 调用，暂以 ID 代替
            sender_name: sender_id,
            content,
            raw: serde_json::json!({
                "message_id": event.message.message_id,
                "message_type": event.message.message_type,
                "create_time": event.message.create_time,
                "chat_type": event.message.chat_type,
            }),
            timestamp: Utc::now(),
        })
    }

    /// 解析消息内容
    ///
    /// 只提取文本消息的正文，其他类型用占位文本代替
    fn parse_message_content(&self, message: &FeishuMessageBody) -> Result<String> {
        match message.message_type.as_str() {
            "text" => {
                let text_content: FeishuTextContent = serde_json::from_str(&message.content)
                    .map_err(|e| Error::Serialization(format!("解析文本内容失败: {}", e)))?;
                Ok(text_content.text)
            }
            other => {
                warn!(msg_type = %other, "收到非文本消息类型");
                Ok(format!("[未支持的消息类型: {}]", other))
            }
        }
    }
}

/// 从事件数据中提取 message_id
///
/// 使用 message_id 而不是 event_id 进行去重，因为飞书的 event_id 每次推送都不同
pub fn extract_message_id(event_data: &serde_json::Value) -> Option<String> {
    event_data
        .get("message")
        .and_then(|m| m.get("message_id"))
        .and_then(|id| id.as_str())
        .map(|s| s.to_string())
}

/// 从事件数据中提取消息创建时间（毫秒时间戳）
///
/// 用于过滤服务启动前的历史消息
pub fn extract_message_create_time(event_data: &serde_json::Value) -> Option<i64> {
    let create_time = event_data.get("message")?.get("create_time")?;

    // create_time 可能是字符串格式的时间戳，也可能是数字格式
    if let Some(time_str) = create_time.as_str() {
        return time_str.parse::<i64>().ok();
    }
    create_time.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> serde_json::Value {
        serde_json::json!({
            "sender": {
                "sender_id": {
                    "open_id": "ou_abc",
                    "user_id": "u_123",
                    "union_id": "on_xyz"
                },
                "sender_type": "user"
            },
            "message": {
                "message_id": "om_msg1",
                "create_time": "1700000000000",
                "chat_id": "oc_chat1",
                "chat_type": "p2p",
                "message_type": "text",
                "content": "{\"text\":\"你好\"}"
            }
        })
    }

    #[test]
    fn handle_text_message_event() {
        let handler = MessageEventHandler::new();
        let result = handler.handle("ev_1", &sample_event()).unwrap();

        assert_eq!(result.message.channel_id, "feishu");
        assert_eq!(result.message.chat_id, "oc_chat1");
        assert_eq!(result.message.sender_id, "ou_abc");
        assert_eq!(result.message.sender_name, "ou_abc");
        assert_eq!(result.message.content, "你好");
        assert!(result.need_read_receipt);
        assert_eq!(result.message.raw["message_id"], "om_msg1");
    }

    #[test]
    fn app_sender_skips_read_receipt() {
        let mut event = sample_event();
        event["sender"]["sender_type"] = serde_json::json!("app");

        let handler = MessageEventHandler::new();
        let result = handler.handle("ev_2", &event).unwrap();
        assert!(!result.need_read_receipt);
    }

    #[test]
    fn non_text_message_gets_placeholder() {
        let mut event = sample_event();
        event["message"]["message_type"] = serde_json::json!("image");
        event["message"]["content"] = serde_json::json!("{\"image_key\":\"img_1\"}");

        let handler = MessageEventHandler::new();
        let result = handler.handle("ev_3", &event).unwrap();
        assert_eq!(result.message.content, "[未支持的消息类型: image]");
    }

    #[test]
    fn sender_id_falls_back_to_user_id() {
        let mut event = sample_event();
        event["sender"]["sender_id"] = serde_json::json!({"user_id": "u_123"});

        let handler = MessageEventHandler::new();
        let result = handler.handle("ev_4", &event).unwrap();
        assert_eq!(result.message.sender_id, "u_123");
    }

    #[test]
    fn envelope_decodes_header() {
        let envelope_json = serde_json::json!({
            "schema": "2.0",
            "header": {
                "event_id": "ev_5",
                "event_type": "im.message.receive_v1",
                "create_time": "1700000000000"
            },
            "event": sample_event()
        });

        let envelope: FeishuEventEnvelope = serde_json::from_value(envelope_json).unwrap();
        assert_eq!(envelope.schema.as_deref(), Some("2.0"));
        assert_eq!(envelope.header.event_type, EVENT_MESSAGE_RECEIVE);
        assert_eq!(envelope.header.event_id, "ev_5");
    }

    #[test]
    fn extract_message_id_and_create_time() {
        let event = sample_event();
        assert_eq!(extract_message_id(&event).as_deref(), Some("om_msg1"));
        assert_eq!(extract_message_create_time(&event), Some(1700000000000));

        // 数字格式的 create_time
        let mut event = sample_event();
        event["message"]["create_time"] = serde_json::json!(1700000000001i64);
        assert_eq!(extract_message_create_time(&event), Some(1700000000001));

        assert_eq!(extract_message_id(&serde_json::json!({})), None);
    }
}

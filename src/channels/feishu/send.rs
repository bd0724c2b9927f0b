//! 飞书消息发送模块
//!
//! 本模块实现了向飞书发送消息的功能（im:message:send_as_bot）。

use serde::{Deserialize, Serialize};
use tracing::info;

use super::client::FeishuClient;
use crate::infra::error::Result;

/// 消息接收者
///
/// 飞书发送消息时需要指定 receive_id_type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageReceiver {
    /// 用户 ID（Open ID）
    OpenId(String),
    /// 用户 ID（User ID）
    UserId(String),
    /// 群聊 ID
    ChatId(String),
    /// 邮箱
    Email(String),
}

impl MessageReceiver {
    pub fn id_type(&self) -> &'static str {
        match self {
            MessageReceiver::OpenId(_) => "open_id",
            MessageReceiver::UserId(_) => "user_id",
            MessageReceiver::ChatId(_) => "chat_id",
            MessageReceiver::Email(_) => "email",
        }
    }

    pub fn id_value(&self) -> &str {
        match self {
            MessageReceiver::OpenId(id) => id,
            MessageReceiver::UserId(id) => id,
            MessageReceiver::ChatId(id) => id,
            MessageReceiver::Email(id) => id,
        }
    }

    /// 根据 ID 前缀推断接收者类型
    ///
    /// 飞书群聊 ID 以 "oc_" 开头，Open ID 以 "ou_" 开头
    pub fn infer(id: &str) -> Self {
        if id.starts_with("oc_") {
            MessageReceiver::ChatId(id.to_string())
        } else {
            MessageReceiver::OpenId(id.to_string())
        }
    }
}

/// 发送消息响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    /// 消息 ID
    pub message_id: String,
    /// 根消息 ID
    #[serde(default)]
    pub root_id: Option<String>,
    /// 父消息 ID
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// 飞书消息发送器
#[derive(Clone, Debug)]
pub struct FeishuMessageSender {
    client: FeishuClient,
}

impl FeishuMessageSender {
    pub fn from_client(client: FeishuClient) -> Self {
        Self { client }
    }

    /// 发送文本消息
    pub async fn send_text(
        &self,
        receiver: &MessageReceiver,
        text: &str,
    ) -> Result<SendMessageResponse> {
        let content = serde_json::json!({
            "text": text
        });
        self.send_raw(receiver, "text", content).await
    }

    /// 发送富文本消息
    pub async fn send_rich_text(
        &self,
        receiver: &MessageReceiver,
        content: &serde_json::Value,
    ) -> Result<SendMessageResponse> {
        self.send_raw(receiver, "post", content.clone()).await
    }

    /// 发送原始消息
    async fn send_raw(
        &self,
        receiver: &MessageReceiver,
        msg_type: &str,
        content: serde_json::Value,
    ) -> Result<SendMessageResponse> {
        let path = format!("/im/v1/messages?receive_id_type={}", receiver.id_type());

        #[derive(Serialize)]
        struct RequestBody<'a> {
            receive_id: &'a str,
            msg_type: &'a str,
            // 飞书要求 content 为 JSON 字符串而不是对象
            content: String,
        }

        let body = RequestBody {
            receive_id: receiver.id_value(),
            msg_type,
            content: content.to_string(),
        };

        let response: SendMessageResponse = self.client.request("POST", &path, Some(body)).await?;

        info!(message_id = %response.message_id, receive_id = %receiver.id_value(), "消息发送成功");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_id_type_mapping() {
        assert_eq!(MessageReceiver::OpenId("ou_1".into()).id_type(), "open_id");
        assert_eq!(MessageReceiver::UserId("u_1".into()).id_type(), "user_id");
        assert_eq!(MessageReceiver::ChatId("oc_1".into()).id_type(), "chat_id");
        assert_eq!(MessageReceiver::Email("a@b.c".into()).id_type(), "email");
        assert_eq!(MessageReceiver::ChatId("oc_1".into()).id_value(), "oc_1");
    }

    #[test]
    fn receiver_inferred_from_prefix() {
        assert!(matches!(
            MessageReceiver::infer("oc_chat"),
            MessageReceiver::ChatId(_)
        ));
        assert!(matches!(
            MessageReceiver::infer("ou_user"),
            MessageReceiver::OpenId(_)
        ));
    }
}

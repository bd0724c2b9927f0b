//! 渠道 Trait 定义模块
//!
//! 定义渠道插件的统一接口。
//!
//! # 设计原则
//! 1. 使用 `async-trait` 支持异步方法
//! 2. 所有方法返回 `Result` 类型
//! 3. 入站消息通过 mpsc 流交付，不使用回调注册

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::infra::error::Result;

/// 入站渠道消息
///
/// 渠道收到消息后转换成的统一格式，交付给宿主框架
///
/// # 字段说明
/// - `channel_id`: 渠道标识（如 "feishu"）
/// - `chat_id`: 会话 ID（发送回复时使用）
/// - `sender_id`: 发送者 ID（飞书为 Open ID）
/// - `sender_name`: 发送者名称（未获取用户信息时与 ID 相同）
/// - `content`: 文本内容
/// - `raw`: 原始消息数据（message_id、message_type、create_time 等）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// 渠道标识
    pub channel_id: String,
    /// 会话 ID
    pub chat_id: String,
    /// 发送者 ID
    pub sender_id: String,
    /// 发送者名称
    pub sender_name: String,
    /// 文本内容
    pub content: String,
    /// 原始消息数据（用于调试）
    pub raw: serde_json::Value,
    /// 接收时间戳
    pub timestamp: DateTime<Utc>,
}

/// 出站消息载荷
///
/// 宿主框架请求发送的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    /// 目标会话 ID
    pub chat_id: String,
    /// 文本内容
    pub content: String,
}

impl MessagePayload {
    /// 创建文本消息载荷
    pub fn text(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            content: content.into(),
        }
    }
}

/// 消息流类型
///
/// 接收入站消息的异步流
pub type MessageStream = mpsc::Receiver<ChannelMessage>;

/// 渠道插件 Trait
///
/// 定义渠道插件的统一接口
///
/// # 方法说明
/// - `id()`: 返回渠道标识
/// - `label()`: 返回人类可读名称
/// - `start()`: 建立连接并开始接收消息
/// - `send()`: 发送消息
/// - `stop()`: 断开连接
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// 获取渠道标识
    fn id(&self) -> &'static str;

    /// 获取人类可读名称
    fn label(&self) -> &'static str;

    /// 建立连接并开始接收消息
    ///
    /// # 返回值
    /// 入站消息流（异步迭代器）
    async fn start(&self) -> Result<MessageStream>;

    /// 发送消息
    ///
    /// # 参数说明
    /// * `payload` - 要发送的消息
    ///
    /// # 返回值
    /// 发送成功的消息 ID
    async fn send(&self, payload: &MessagePayload) -> Result<String>;

    /// 断开连接
    async fn stop(&self);
}

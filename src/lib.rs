//! TaskNexus 飞书渠道插件库入口
//!
//! 将飞书（Lark）消息平台接入 TaskNexus 宿主框架：
//! 使用 App ID / App Secret 认证，通过 WebSocket 长链接订阅消息事件，
//! 并以机器人身份收发消息。
//!
//! # 使用示例
//! ```rust,no_run
//! use tasknexus_feishu::channels::feishu::FeishuChannel;
//! use tasknexus_feishu::infra::config::FeishuCredentials;
//!
//! let credentials = FeishuCredentials::resolve_from_process_env().unwrap();
//! let channel = FeishuChannel::new(credentials);
//! ```

pub mod channels;
pub mod infra;

pub use channels::feishu::{FeishuChannel, FeishuClient};
pub use channels::traits::{Channel, ChannelMessage, MessagePayload, MessageStream};
pub use channels::ChannelRegistry;
pub use infra::config::FeishuCredentials;

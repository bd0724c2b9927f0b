//! 渠道插件模块
//!
//! 本模块定义了渠道插件的统一接口，并实现了飞书平台的渠道插件。

pub mod feishu;
pub mod traits;

use std::collections::HashMap;
use std::sync::Arc;

use traits::Channel;

/// 渠道注册表
///
/// 宿主框架通过注册表按标识查找渠道插件
///
/// # 使用示例
/// ```rust
/// use std::sync::Arc;
/// use tasknexus_feishu::channels::ChannelRegistry;
/// use tasknexus_feishu::channels::feishu::FeishuChannel;
/// use tasknexus_feishu::infra::config::FeishuCredentials;
///
/// let mut registry = ChannelRegistry::new();
/// let credentials = FeishuCredentials::new("cli_xxx", "secret");
/// registry.register(Arc::new(FeishuChannel::new(credentials)));
/// assert!(registry.get("feishu").is_some());
/// ```
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// 注册渠道插件
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        tracing::info!(channel = channel.id(), label = channel.label(), "注册渠道");
        self.channels.insert(channel.id().to_string(), channel);
    }

    /// 按标识查找渠道
    pub fn get(&self, id: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(id).cloned()
    }

    /// 已注册的渠道标识列表
    pub fn ids(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::feishu::FeishuChannel;
    use crate::infra::config::FeishuCredentials;

    #[test]
    fn registry_lookup_by_id() {
        let mut registry = ChannelRegistry::new();
        assert!(registry.get("feishu").is_none());

        let credentials = FeishuCredentials::new("cli_test", "secret");
        registry.register(Arc::new(FeishuChannel::new(credentials)));

        let channel = registry.get("feishu").unwrap();
        assert_eq!(channel.id(), "feishu");
        assert_eq!(channel.label(), "飞书");
        assert_eq!(registry.ids(), vec!["feishu".to_string()]);
    }
}

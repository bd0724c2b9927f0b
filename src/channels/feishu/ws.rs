//! 飞书 WebSocket 长链接模块
//!
//! 实现飞书消息事件的 WebSocket 长连接接收：
//! 获取长链接地址 → 建立连接 → 读取事件 → 去重 → 转换 → 交付消息流。
//! 连接断开后按固定间隔自动重连。

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tracing::{debug, error, info, warn};

use super::client::FeishuClient;
use super::events::{
    extract_message_create_time, extract_message_id, FeishuEventEnvelope, MessageEventHandler,
    EVENT_MESSAGE_READ, EVENT_MESSAGE_RECEIVE,
};
use crate::channels::traits::ChannelMessage;
use crate::infra::error::{Error, Result};

/// 去重缓存最大条目数
///
/// 超出后淘汰较旧的一半，防止内存无限增长
const MESSAGE_CACHE_SIZE: usize = 1000;

/// 去重条目保留时间
const MESSAGE_CACHE_TTL: Duration = Duration::from_secs(300);

/// WebSocket 配置
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// 重连间隔（秒）
    pub reconnect_interval_secs: u64,
    /// 心跳间隔（秒）
    pub heartbeat_interval_secs: u64,
    /// 读取超时（秒）
    pub read_timeout_secs: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_secs: 5,
            heartbeat_interval_secs: 30,
            read_timeout_secs: 60,
        }
    }
}

/// 控制帧
///
/// 非事件信封的 WebSocket 文本帧（心跳与错误通知）
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ControlFrame {
    /// 心跳 ping
    #[serde(rename = "ping")]
    Ping,
    /// 心跳响应 pang
    #[serde(rename = "pang")]
    Pang,
    /// 错误
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: i64,
        #[serde(default)]
        msg: String,
    },
    /// 未知
    #[serde(other)]
    Unknown,
}

/// 消息去重缓存
///
/// 以 message_id 为键（飞书的 event_id 每次推送都不同，不能用于去重）。
/// 条目在 5 分钟后过期，总量超过上限时淘汰较旧的一半。
#[derive(Clone)]
pub struct DedupCache {
    entries: Arc<dashmap::DashMap<String, Instant>>,
    capacity: usize,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(dashmap::DashMap::new()),
            capacity,
        }
    }

    /// 检查并记录消息 ID
    ///
    /// # 返回值
    /// 首次出现返回 `true`，重复消息返回 `false`
    pub fn check_and_insert(&self, key: &str) -> bool {
        let now = Instant::now();

        // 清理过期条目
        self.entries
            .retain(|_, inserted| now.duration_since(*inserted) < MESSAGE_CACHE_TTL);

        if self.entries.contains_key(key) {
            return false;
        }

        self.entries.insert(key.to_string(), now);

        // 超出上限时淘汰较旧的一半
        if self.entries.len() > self.capacity {
            let mut by_age: Vec<(String, Instant)> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect();
            by_age.sort_by_key(|(_, inserted)| *inserted);

            for (old_key, _) in by_age.into_iter().take(self.capacity / 2) {
                self.entries.remove(&old_key);
            }
        }

        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 飞书 WebSocket 监控器
///
/// 通过 WebSocket 长连接接收飞书消息事件并写入消息流
#[derive(Clone)]
pub struct FeishuWsMonitor {
    /// 飞书客户端
    client: Arc<FeishuClient>,
    /// 消息事件处理器
    event_handler: Arc<MessageEventHandler>,
    /// WebSocket 配置
    ws_config: WsConfig,
    /// 消息去重缓存
    dedup: DedupCache,
    /// 监控启动时间（毫秒时间戳），用于过滤历史消息
    started_at_ms: Arc<AtomicI64>,
    /// 停止发送器
    shutdown_tx: broadcast::Sender<()>,
}

impl FeishuWsMonitor {
    /// 创建 WebSocket 监控器
    pub fn new(client: Arc<FeishuClient>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            client,
            event_handler: Arc::new(MessageEventHandler::new()),
            ws_config: WsConfig::default(),
            dedup: DedupCache::new(MESSAGE_CACHE_SIZE),
            started_at_ms: Arc::new(AtomicI64::new(0)),
            shutdown_tx,
        }
    }

    /// 启动监控服务
    ///
    /// 在后台任务中维护长连接，解析到的消息写入 `tx`。
    ///
    /// # 参数说明
    /// * `tx` - 入站消息发送端
    ///
    /// # 返回值
    /// 后台任务句柄
    pub async fn start(
        &self,
        tx: mpsc::Sender<ChannelMessage>,
    ) -> Result<tokio::task::JoinHandle<()>> {
        info!("启动飞书 WebSocket 监控服务（长链接）");

        // 记录启动时间：飞书在连接建立后会推送服务离线期间的消息，
        // 启动前产生的历史消息需要被忽略
        let start_time_ms = chrono::Utc::now().timestamp_millis();
        self.started_at_ms.store(start_time_ms, Ordering::SeqCst);
        info!(start_time_ms = start_time_ms, "将忽略启动前的历史消息");

        let monitor = self.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let reconnect_interval = Duration::from_secs(self.ws_config.reconnect_interval_secs);

        let handle = tokio::spawn(async move {
            let mut shutdown_rx = shutdown_tx.subscribe();
            let mut ws_url: Option<String> = None;

            while shutdown_rx.try_recv().is_err() {
                // 获取 WebSocket URL
                if ws_url.is_none() {
                    match monitor.client.get_websocket_url().await {
                        Ok(url) => {
                            info!("获取 WebSocket URL 成功");
                            ws_url = Some(url);
                        }
                        Err(e) => {
                            error!(error = %e, "获取 WebSocket URL 失败");
                            tokio::time::sleep(reconnect_interval).await;
                            continue;
                        }
                    }
                }

                // 连接并进入读取循环
                if let Some(url) = &ws_url {
                    match monitor.client.connect_websocket(url).await {
                        Ok(ws) => {
                            info!("WebSocket 连接成功");
                            monitor.read_loop(ws, &tx).await;
                            // 读取循环退出后重新获取 URL（地址可能已失效）
                            ws_url = None;
                        }
                        Err(e) => {
                            error!(error = %e, "WebSocket 连接失败");
                            ws_url = None;
                            tokio::time::sleep(reconnect_interval).await;
                        }
                    }
                }

                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            info!("飞书 WebSocket 监控服务已退出");
        });

        // Ctrl+C 处理
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            let _ = signal::ctrl_c().await;
            info!("收到 Ctrl+C 信号，停止 WebSocket 监控");
            let _ = shutdown_tx.send(());
        });

        Ok(handle)
    }

    /// 停止监控服务
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// 读取和处理 WebSocket 消息
    ///
    /// 连接拆分为读写两半，心跳与读取在同一 select 中并发等待，
    /// 读取挂起时不会阻塞心跳。返回即表示连接需要重建（收到停止信号时除外）。
    async fn read_loop<S>(&self, ws: S, tx: &mpsc::Sender<ChannelMessage>)
    where
        S: futures::Stream<Item = std::result::Result<WsFrame, WsError>>
            + Sink<WsFrame, Error = WsError>
            + Unpin,
    {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut heartbeat_interval =
            tokio::time::interval(Duration::from_secs(self.ws_config.heartbeat_interval_secs));
        let read_timeout = Duration::from_secs(self.ws_config.read_timeout_secs);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，关闭 WebSocket");
                    let _ = ws_tx.close().await;
                    break;
                }
                _ = heartbeat_interval.tick() => {
                    let ping = serde_json::json!({"type": "ping"});
                    if let Err(e) = ws_tx.send(WsFrame::Text(ping.to_string())).await {
                        error!(error = %e, "发送心跳失败");
                        break;
                    }
                }
                frame = tokio::time::timeout(read_timeout, ws_rx.next()) => {
                    match frame {
                        Ok(Some(Ok(WsFrame::Text(text)))) => {
                            if let Err(e) = self.process_frame(&text, &mut ws_tx, tx).await {
                                error!(error = %e, "处理消息失败");
                            }
                        }
                        Ok(Some(Ok(WsFrame::Binary(bin)))) => {
                            // 部分推送为二进制帧，内嵌 JSON 负载
                            debug!(length = bin.len(), "收到二进制 WebSocket 帧");
                            if let Some(start_idx) = bin.iter().position(|&b| b == b'{') {
                                if let Ok(text) = String::from_utf8(bin[start_idx..].to_vec()) {
                                    if let Err(e) = self.process_frame(&text, &mut ws_tx, tx).await {
                                        error!(error = %e, "处理二进制帧负载失败");
                                    }
                                }
                            }
                        }
                        Ok(Some(Ok(WsFrame::Ping(_)))) => {
                            // 底层 Ping 由 tungstenite 自动回复
                            debug!("收到底层 Ping 帧");
                        }
                        Ok(Some(Ok(WsFrame::Close(_)))) => {
                            warn!("收到 Close 帧");
                            break;
                        }
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(e))) => {
                            error!(error = %e, "WebSocket 读取错误");
                            break;
                        }
                        Ok(None) => {
                            warn!("WebSocket 连接关闭");
                            break;
                        }
                        Err(_) => {
                            // 读取超时，继续循环等待下一帧
                        }
                    }
                }
            }
        }
    }

    /// 处理 WebSocket 文本帧
    async fn process_frame<W>(
        &self,
        text: &str,
        ws_tx: &mut W,
        tx: &mpsc::Sender<ChannelMessage>,
    ) -> Result<()>
    where
        W: Sink<WsFrame, Error = WsError> + Unpin,
    {
        debug!(raw_message = %text, "收到 WebSocket 消息");

        // 只解析第一个完整的 JSON 对象，忽略可能跟随的垃圾字节
        let mut stream = serde_json::Deserializer::from_str(text).into_iter::<serde_json::Value>();
        let value = match stream.next() {
            Some(Ok(v)) => v,
            Some(Err(e)) => {
                error!(error = %e, "解析 WebSocket 消息失败");
                return Err(Error::Serialization(e.to_string()));
            }
            None => {
                warn!("WebSocket 消息为空");
                return Ok(());
            }
        };

        // schema 2.0 事件信封
        if value.get("schema").and_then(|s| s.as_str()) == Some("2.0") {
            let envelope: FeishuEventEnvelope = serde_json::from_value(value)?;
            self.dispatch_envelope(envelope, tx).await;
            return Ok(());
        }

        // 控制帧
        match serde_json::from_value::<ControlFrame>(value) {
            Ok(ControlFrame::Ping) => {
                let pang = serde_json::json!({"type": "pang"});
                let _ = ws_tx.send(WsFrame::Text(pang.to_string())).await;
            }
            Ok(ControlFrame::Pang) => {
                debug!("收到心跳响应 pang");
            }
            Ok(ControlFrame::Error { code, msg }) => {
                error!(code = code, msg = %msg, "WebSocket 错误帧");
            }
            Ok(ControlFrame::Unknown) | Err(_) => {
                warn!("收到无法识别的 WebSocket 消息");
            }
        }

        Ok(())
    }

    /// 分发事件信封
    ///
    /// 消息事件进入去重与转换流程，已读事件订阅但无需处理
    async fn dispatch_envelope(
        &self,
        envelope: FeishuEventEnvelope,
        tx: &mpsc::Sender<ChannelMessage>,
    ) {
        debug!(
            event_id = %envelope.header.event_id,
            event_type = %envelope.header.event_type,
            "收到事件"
        );

        match envelope.header.event_type.as_str() {
            EVENT_MESSAGE_RECEIVE => {
                self.handle_message_event(&envelope.header.event_id, &envelope.event, tx)
                    .await;
            }
            EVENT_MESSAGE_READ => {
                debug!("忽略消息已读事件");
            }
            other => {
                debug!(event_type = %other, "跳过其他事件类型");
            }
        }
    }

    /// 处理消息事件
    ///
    /// 去重、过滤历史消息，转换后写入消息流，并按需回已读回执
    async fn handle_message_event(
        &self,
        event_id: &str,
        event_data: &serde_json::Value,
        tx: &mpsc::Sender<ChannelMessage>,
    ) {
        // 过滤服务启动前的历史消息
        let started_at = self.started_at_ms.load(Ordering::SeqCst);
        if let Some(create_time) = extract_message_create_time(event_data) {
            if create_time < started_at {
                debug!(
                    event_id = %event_id,
                    create_time = create_time,
                    "忽略启动前的历史消息"
                );
                return;
            }
        }

        // 以 message_id 去重，提取失败时退回 event_id
        let dedupe_key =
            extract_message_id(event_data).unwrap_or_else(|| event_id.to_string());
        if !self.dedup.check_and_insert(&dedupe_key) {
            debug!(message_id = %dedupe_key, "消息已处理过，跳过");
            return;
        }

        match self.event_handler.handle(event_id, event_data) {
            Ok(result) => {
                info!(
                    message_id = %dedupe_key,
                    chat_id = %result.message.chat_id,
                    sender_id = %result.message.sender_id,
                    "收到飞书消息"
                );

                if result.need_read_receipt {
                    if let Err(e) = self.client.mark_message_read(&dedupe_key).await {
                        warn!(message_id = %dedupe_key, error = %e, "已读回执发送失败");
                    }
                }

                if tx.send(result.message).await.is_err() {
                    warn!("消息流接收端已关闭，丢弃消息");
                }
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "消息事件处理失败");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::FeishuCredentials;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;
    use std::task::{Context, Poll};

    fn test_monitor() -> FeishuWsMonitor {
        let client = FeishuClient::new(FeishuCredentials::new("cli_test", "secret_test"));
        FeishuWsMonitor::new(Arc::new(client))
    }

    #[test]
    fn dedup_suppresses_repeats() {
        let cache = DedupCache::new(10);
        assert!(cache.check_and_insert("om_1"));
        assert!(!cache.check_and_insert("om_1"));
        assert!(cache.check_and_insert("om_2"));
    }

    #[test]
    fn dedup_evicts_oldest_half_at_capacity() {
        let cache = DedupCache::new(10);
        for i in 0..11 {
            assert!(cache.check_and_insert(&format!("om_{}", i)));
        }
        // 超限后淘汰较旧的一半
        assert!(cache.len() <= 6);
    }

    #[test]
    fn control_frame_decodes_ping() {
        let frame: ControlFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame, ControlFrame::Ping));

        let frame: ControlFrame =
            serde_json::from_str(r#"{"type":"error","code":1,"msg":"bad"}"#).unwrap();
        assert!(matches!(frame, ControlFrame::Error { code: 1, .. }));

        let frame: ControlFrame = serde_json::from_str(r#"{"type":"whatever"}"#).unwrap();
        assert!(matches!(frame, ControlFrame::Unknown));
    }

    #[tokio::test]
    async fn read_event_is_ignored() {
        let monitor = test_monitor();
        let (tx, mut rx) = mpsc::channel(4);

        let envelope: FeishuEventEnvelope = serde_json::from_value(serde_json::json!({
            "schema": "2.0",
            "header": {
                "event_id": "ev_read",
                "event_type": "im.message.message_read_v1"
            },
            "event": {
                "reader": {"reader_id": {"open_id": "ou_abc"}},
                "message_id_list": ["om_msg1"]
            }
        }))
        .unwrap();

        monitor.dispatch_envelope(envelope, &tx).await;

        // 已读事件不产生渠道消息
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_event_type_is_skipped() {
        let monitor = test_monitor();
        let (tx, mut rx) = mpsc::channel(4);

        let envelope: FeishuEventEnvelope = serde_json::from_value(serde_json::json!({
            "schema": "2.0",
            "header": {
                "event_id": "ev_other",
                "event_type": "contact.user.updated_v3"
            },
            "event": {}
        }))
        .unwrap();

        monitor.dispatch_envelope(envelope, &tx).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn startup_backlog_is_dropped() {
        let monitor = test_monitor();
        // 监控启动时间晚于消息创建时间
        monitor
            .started_at_ms
            .store(1_800_000_000_000, Ordering::SeqCst);

        let (tx, mut rx) = mpsc::channel(4);

        let event = serde_json::json!({
            "sender": {
                "sender_id": {"open_id": "ou_abc"},
                "sender_type": "user"
            },
            "message": {
                "message_id": "om_backlog",
                "create_time": "1700000000000",
                "chat_id": "oc_chat1",
                "chat_type": "p2p",
                "message_type": "text",
                "content": "{\"text\":\"离线期间的消息\"}"
            }
        });

        monitor.handle_message_event("ev_backlog", &event, &tx).await;

        // 启动前的历史消息被丢弃，不进入消息流
        assert!(rx.try_recv().is_err());
        // 丢弃发生在去重记录之前，message_id 未被占用
        assert!(monitor.dedup.check_and_insert("om_backlog"));
    }

    /// 测试替身：读取永远挂起，记录写出的帧
    struct PendingWs {
        sent: Arc<StdMutex<Vec<WsFrame>>>,
    }

    impl futures::Stream for PendingWs {
        type Item = std::result::Result<WsFrame, WsError>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    impl Sink<WsFrame> for PendingWs {
        type Error = WsError;

        fn poll_ready(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(
            self: Pin<&mut Self>,
            item: WsFrame,
        ) -> std::result::Result<(), WsError> {
            self.sent.lock().unwrap().push(item);
            Ok(())
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_fires_while_read_is_pending() {
        let monitor = test_monitor();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let ws = PendingWs { sent: sent.clone() };
        let (tx, _rx) = mpsc::channel(4);

        let loop_monitor = monitor.clone();
        let handle = tokio::spawn(async move {
            loop_monitor.read_loop(ws, &tx).await;
        });

        // 推进两个心跳周期，期间读取始终挂起
        tokio::time::sleep(Duration::from_secs(65)).await;
        monitor.stop();
        handle.await.unwrap();

        let pings = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| matches!(frame, WsFrame::Text(text) if text.contains("ping")))
            .count();
        assert!(pings >= 2, "读取挂起期间心跳应持续发送");
    }
}

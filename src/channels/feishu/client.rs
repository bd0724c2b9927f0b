//! 飞书客户端模块
//!
//! 封装飞书 API 的 HTTP 客户端。
//!
//! # 功能
//! 1. 获取访问令牌（App Access Token）
//! 2. 发送经过认证的 API 请求
//! 3. 获取 WebSocket 长链接地址并建立连接
//!
//! # 认证流程
//! ```text
//! 1. 使用 app_id 和 app_secret 获取 app_access_token
//! 2. 在 HTTP 请求头中添加 Authorization: Bearer {token}
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::infra::config::FeishuCredentials;
use crate::infra::error::{Error, Result};

/// WebSocket 连接类型
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// 飞书客户端
///
/// 用于调用飞书 API 的 HTTP 客户端
///
/// # 字段说明
/// * `credentials` - 认证凭证
/// * `http_client` - HTTP 客户端
/// * `base_url` - API 基础 URL
/// * `access_token` - 访问令牌（缓存）
/// * `token_expires_at` - 令牌过期时间
#[derive(Clone)]
pub struct FeishuClient {
    /// 认证凭证
    credentials: Arc<FeishuCredentials>,
    /// HTTP 客户端
    http_client: reqwest::Client,
    /// API 基础 URL
    base_url: String,
    /// 访问令牌（缓存）
    access_token: Arc<tokio::sync::RwLock<Option<String>>>,
    /// 令牌过期时间（Unix 秒）
    token_expires_at: Arc<tokio::sync::RwLock<Option<i64>>>,
}

impl std::fmt::Debug for FeishuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeishuClient")
            .field("base_url", &self.base_url)
            .field("app_id", &self.credentials.app_id)
            .finish()
    }
}

impl FeishuClient {
    /// 创建飞书客户端
    pub fn new(credentials: FeishuCredentials) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("创建 HTTP 客户端失败");

        Self {
            credentials: Arc::new(credentials),
            http_client,
            base_url: "https://open.feishu.cn/open-apis".to_string(),
            access_token: Arc::new(tokio::sync::RwLock::new(None)),
            token_expires_at: Arc::new(tokio::sync::RwLock::new(None)),
        }
    }

    /// 获取访问令牌
    ///
    /// 飞书使用 app_access_token 进行 API 认证，令牌缓存到过期前 5 分钟
    ///
    /// # 返回值
    /// 访问令牌
    pub async fn get_access_token(&self) -> Result<String> {
        // 检查缓存的令牌是否有效
        {
            let token = self.access_token.read().await;
            let expires_at = *self.token_expires_at.read().await;
            if let (Some(t), Some(exp)) = (&*token, expires_at) {
                // 如果令牌还有 5 分钟以上有效期，直接使用
                if exp - chrono::Utc::now().timestamp() > 300 {
                    debug!("使用缓存的访问令牌");
                    return Ok(t.clone());
                }
            }
        }

        debug!("缓存令牌无效或过期，重新获取");

        let url = format!("{}/auth/v3/app_access_token/internal", self.base_url);

        #[derive(Serialize)]
        struct Request<'a> {
            app_id: &'a str,
            app_secret: &'a str,
        }

        let request_body = Request {
            app_id: &self.credentials.app_id,
            app_secret: &self.credentials.app_secret,
        };

        debug!(app_id = %request_body.app_id, "请求访问令牌");

        let response = self
            .http_client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("请求访问令牌失败: {}", e)))?;

        #[derive(Deserialize)]
        struct Response {
            code: i64,
            msg: String,
            app_access_token: Option<String>,
            expire: Option<i64>,
        }

        let response_body: Response = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("解析访问令牌响应失败: {}", e)))?;

        if response_body.code != 0 {
            error!(code = response_body.code, msg = %response_body.msg, "获取访问令牌失败");
            return Err(Error::Auth(format!(
                "获取访问令牌失败: {}",
                response_body.msg
            )));
        }

        // 缓存令牌
        if let Some(token) = response_body.app_access_token {
            let mut token_guard = self.access_token.write().await;
            *token_guard = Some(token.clone());

            if let Some(expire) = response_body.expire {
                let mut expires_guard = self.token_expires_at.write().await;
                *expires_guard = Some(chrono::Utc::now().timestamp() + expire);
            }

            info!("获取访问令牌成功");
            Ok(token)
        } else {
            Err(Error::Auth("响应中未包含访问令牌".to_string()))
        }
    }

    /// 发送 API 请求
    ///
    /// 通用方法，用于发送经过认证的 API 请求
    ///
    /// # 参数说明
    /// * `method` - HTTP 方法
    /// * `path` - API 路径
    /// * `body` - 请求体（可选）
    ///
    /// # 返回值
    /// 响应 data 字段反序列化结果
    pub async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        path: &str,
        body: Option<impl Serialize>,
    ) -> Result<T> {
        let token = self.get_access_token().await?;
        let url = format!("{}{}", self.base_url, path);

        let http_method = match method.to_uppercase().as_str() {
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "DELETE" => reqwest::Method::DELETE,
            _ => reqwest::Method::GET,
        };

        let mut request = self
            .http_client
            .request(http_method, &url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json");

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("API 请求失败: {}", e)))?;

        #[derive(Deserialize)]
        struct ApiResponse<T> {
            code: i64,
            msg: String,
            data: Option<T>,
        }

        let response_body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("解析 API 响应失败: {}", e)))?;

        if response_body.code != 0 {
            error!(code = response_body.code, msg = %response_body.msg, "API 请求失败");
            return Err(Error::Channel(format!(
                "飞书 API 错误: {}",
                response_body.msg
            )));
        }

        response_body
            .data
            .ok_or_else(|| Error::Channel("响应中未包含数据".to_string()))
    }

    /// 发送已读回执
    ///
    /// 失败只记录警告，不影响消息处理
    pub async fn mark_message_read(&self, message_id: &str) -> Result<()> {
        let token = self.get_access_token().await?;
        let url = format!("{}/im/v1/messages/{}/read", self.base_url, message_id);

        #[derive(Serialize)]
        struct MarkReadRequest {
            read_time: String,
        }

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .json(&MarkReadRequest {
                read_time: chrono::Utc::now().to_rfc3339(),
            })
            .send()
            .await
            .map_err(|e| Error::Network(format!("发送已读回执失败: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(message_id = %message_id, error = %error_text, "发送已读回执失败");
        }

        Ok(())
    }

    /// 获取 WebSocket 长链接 URL
    ///
    /// 飞书使用 WebSocket 长连接接收消息事件。
    /// 该端点不依赖 access_token，直接使用 AppID 和 AppSecret 认证。
    /// SDK 参考: https://github.com/larksuite/oapi-sdk-go/blob/v3_main/ws/client.go
    pub async fn get_websocket_url(&self) -> Result<String> {
        let url = "https://open.feishu.cn/callback/ws/endpoint";

        #[derive(Serialize)]
        struct WsAuthRequest<'a> {
            #[serde(rename = "AppID")]
            app_id: &'a str,
            #[serde(rename = "AppSecret")]
            app_secret: &'a str,
        }

        let request_body = WsAuthRequest {
            app_id: &self.credentials.app_id,
            app_secret: &self.credentials.app_secret,
        };

        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json; charset=utf-8")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("获取 WebSocket URL 失败: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Network(format!(
                "获取 WebSocket URL 失败: {}",
                error_text
            )));
        }

        #[derive(Deserialize)]
        struct WsUrlResponse {
            code: i64,
            msg: String,
            data: Option<WsUrlData>,
        }

        #[derive(Deserialize)]
        struct WsUrlData {
            #[serde(rename = "URL")]
            url: String,
        }

        let ws_response: WsUrlResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("解析 WebSocket URL 失败: {}", e)))?;

        if ws_response.code != 0 {
            return Err(Error::Channel(format!(
                "获取 WebSocket URL 失败: {}",
                ws_response.msg
            )));
        }

        ws_response
            .data
            .map(|d| d.url)
            .ok_or_else(|| Error::Channel("响应中未包含 WebSocket URL".to_string()))
    }

    /// 连接 WebSocket
    pub async fn connect_websocket(&self, url: &str) -> Result<WsStream> {
        use tokio_tungstenite::connect_async;

        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| Error::Network(format!("连接 WebSocket 失败: {}", e)))?;

        Ok(ws)
    }
}

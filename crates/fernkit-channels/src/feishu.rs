//! Feishu/Lark channel — REST send + WebSocket bridge receive.
//!
//! Supplemented from `examples/original_source/nanobot/channels/feishu.py`,
//! which drives the official `lark-oapi` SDK directly. That SDK speaks a
//! proprietary binary long-connection protocol with no Rust counterpart in
//! this dependency stack, so receiving follows the same bridge-client shape
//! as [`crate::whatsapp`]: a companion process running the official SDK
//! forwards events as newline-delimited JSON over a WebSocket this channel
//! connects to as a client.
//!
//! Sending goes straight to Feishu's REST API: a cached tenant access token
//! fetched from `auth/v3/tenant_access_token/internal`, then a plain POST to
//! `im/v1/messages`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use fernkit_core::bus::queue::MessageBus;
use fernkit_core::bus::types::{InboundMessage, OutboundMessage};

use crate::base::Channel;

// ─────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────

const FEISHU_API_BASE: &str = "https://open.feishu.cn/open-apis";

/// Default bridge WebSocket URL for the companion event-forwarding process.
const DEFAULT_BRIDGE_URL: &str = "ws://localhost:3002";

/// Reconnect backoff (seconds).
const RECONNECT_DELAY_SECS: u64 = 5;

/// Refresh the tenant access token this long before it actually expires.
const TOKEN_REFRESH_SLACK_SECS: u64 = 120;

// ─────────────────────────────────────────────
// FeishuChannel
// ─────────────────────────────────────────────

/// Feishu/Lark channel — REST for outbound, bridge WebSocket for inbound.
pub struct FeishuChannel {
    app_id: String,
    app_secret: String,
    bridge_url: String,
    bus: Arc<MessageBus>,
    allowed_users: Vec<String>,
    http: reqwest::Client,
    token: Arc<Mutex<Option<CachedToken>>>,
    shutdown: Arc<Notify>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl FeishuChannel {
    /// Create a new Feishu channel.
    pub fn new(
        app_id: String,
        app_secret: String,
        bridge_url: String,
        bus: Arc<MessageBus>,
        allowed_users: Vec<String>,
    ) -> Self {
        let url = if bridge_url.is_empty() {
            DEFAULT_BRIDGE_URL.to_string()
        } else {
            bridge_url
        };

        Self {
            app_id,
            app_secret,
            bridge_url: url,
            bus,
            allowed_users,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            token: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Check if a sender is allowed.
    fn is_allowed(&self, sender_id: &str) -> bool {
        if self.allowed_users.is_empty() {
            return true;
        }
        if self.allowed_users.iter().any(|u| u == sender_id) {
            return true;
        }
        for part in sender_id.split('|') {
            if !part.is_empty() && self.allowed_users.iter().any(|u| u == part) {
                return true;
            }
        }
        false
    }

    /// Fetch a cached, or freshly obtained, tenant access token.
    async fn tenant_access_token(&self) -> anyhow::Result<String> {
        {
            let cached = self.token.lock().await;
            if let Some(tok) = cached.as_ref() {
                if tok.expires_at > Instant::now() {
                    return Ok(tok.value.clone());
                }
            }
        }

        let url = format!("{FEISHU_API_BASE}/auth/v3/tenant_access_token/internal");
        let resp = self
            .http
            .post(&url)
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()
            .await?
            .json::<Value>()
            .await?;

        let code = resp["code"].as_i64().unwrap_or(-1);
        if code != 0 {
            anyhow::bail!(
                "feishu tenant_access_token failed: code={} msg={}",
                code,
                resp["msg"].as_str().unwrap_or("unknown")
            );
        }

        let token = resp["tenant_access_token"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("feishu response missing tenant_access_token"))?
            .to_string();
        let expire_secs = resp["expire"].as_u64().unwrap_or(7200);
        let ttl = expire_secs.saturating_sub(TOKEN_REFRESH_SLACK_SECS).max(60);

        let mut cached = self.token.lock().await;
        *cached = Some(CachedToken {
            value: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });

        Ok(token)
    }

    /// Derive the `receive_id_type` for a target id: `chat_id` (prefixed
    /// `oc_`) vs. a direct `open_id`.
    fn receive_id_type(target: &str) -> &'static str {
        if target.starts_with("oc_") {
            "chat_id"
        } else {
            "open_id"
        }
    }

    /// Run the bridge WebSocket connection with auto-reconnect.
    async fn run_bridge_loop(&self) -> anyhow::Result<()> {
        loop {
            match self.bridge_session().await {
                Ok(()) => {
                    info!("feishu bridge session ended normally");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "feishu bridge error, reconnecting in {RECONNECT_DELAY_SECS}s");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                        _ = self.shutdown.notified() => {
                            info!("feishu shutdown during reconnect wait");
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Single WebSocket session to the bridge.
    async fn bridge_session(&self) -> anyhow::Result<()> {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        debug!(url = %self.bridge_url, "connecting to feishu bridge");
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.bridge_url).await?;
        info!("connected to feishu bridge");

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            error!(error = %e, "feishu ws read error");
                            return Err(e.into());
                        }
                        None => {
                            debug!("feishu ws stream ended");
                            return Ok(());
                        }
                    };

                    let text = match msg {
                        WsMessage::Text(t) => t.to_string(),
                        WsMessage::Close(_) => {
                            info!("feishu bridge closed connection");
                            return Ok(());
                        }
                        _ => continue,
                    };

                    if let Err(e) = self.handle_bridge_event(&text).await {
                        warn!(error = %e, "failed to handle feishu bridge event");
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("feishu shutdown signal received");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    /// Parse and publish a single event line from the bridge.
    async fn handle_bridge_event(&self, raw: &str) -> anyhow::Result<()> {
        let payload: Value = serde_json::from_str(raw)?;

        let sender_id = payload["sender_id"].as_str().unwrap_or("").to_string();
        let chat_id = payload["chat_id"].as_str().unwrap_or("").to_string();
        let content = payload["content"].as_str().unwrap_or("").to_string();

        if sender_id.is_empty() || chat_id.is_empty() || content.is_empty() {
            debug!("feishu bridge event missing required fields, ignoring");
            return Ok(());
        }

        if !self.is_allowed(&sender_id) {
            warn!(sender = %sender_id, "feishu message from unauthorized user, ignoring");
            return Ok(());
        }

        let is_group = payload["is_group"].as_bool().unwrap_or(false);

        let mut inbound = InboundMessage::new("feishu", &sender_id, &chat_id, &content);
        inbound.metadata.insert("is_group".into(), is_group.to_string());

        self.bus
            .publish_inbound(inbound)
            .map_err(|e| anyhow::anyhow!("failed to publish feishu message to bus: {e}"))
    }
}

#[async_trait]
impl Channel for FeishuChannel {
    fn name(&self) -> &str {
        "feishu"
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.app_id.is_empty() || self.app_secret.is_empty() {
            anyhow::bail!("feishu channel requires app_id and app_secret");
        }
        info!(url = %self.bridge_url, "starting feishu channel");
        self.run_bridge_loop().await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("stopping feishu channel");
        self.shutdown.notify_waiters();
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let token = self.tenant_access_token().await?;
        let url = format!("{FEISHU_API_BASE}/im/v1/messages");
        let receive_id_type = Self::receive_id_type(&msg.chat_id);

        let body = json!({
            "receive_id": msg.chat_id,
            "msg_type": "text",
            "content": serde_json::to_string(&json!({ "text": msg.content }))?,
        });

        let resp = self
            .http
            .post(&url)
            .query(&[("receive_id_type", receive_id_type)])
            .header("Authorization", format!("Bearer {token}"))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("feishu send failed (HTTP {status}): {text}");
        }

        let parsed: Value = resp.json().await.unwrap_or(Value::Null);
        let code = parsed["code"].as_i64().unwrap_or(0);
        if code != 0 {
            anyhow::bail!(
                "feishu send failed: code={} msg={}",
                code,
                parsed["msg"].as_str().unwrap_or("unknown")
            );
        }

        debug!(chat_id = %msg.chat_id, "feishu message sent");
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_channel() -> FeishuChannel {
        let bus = Arc::new(MessageBus::new());
        FeishuChannel::new(
            "app1".into(),
            "secret1".into(),
            String::new(),
            bus,
            vec![],
        )
    }

    fn create_restricted_channel() -> FeishuChannel {
        let bus = Arc::new(MessageBus::new());
        FeishuChannel::new(
            "app1".into(),
            "secret1".into(),
            String::new(),
            bus,
            vec!["ou_allowed".into()],
        )
    }

    #[test]
    fn test_channel_name() {
        let ch = create_test_channel();
        assert_eq!(ch.name(), "feishu");
    }

    #[test]
    fn test_default_bridge_url() {
        let ch = create_test_channel();
        assert_eq!(ch.bridge_url, "ws://localhost:3002");
    }

    #[test]
    fn test_custom_bridge_url() {
        let bus = Arc::new(MessageBus::new());
        let ch = FeishuChannel::new(
            "a".into(),
            "s".into(),
            "ws://mybridge:9000".into(),
            bus,
            vec![],
        );
        assert_eq!(ch.bridge_url, "ws://mybridge:9000");
    }

    #[test]
    fn test_receive_id_type_chat() {
        assert_eq!(FeishuChannel::receive_id_type("oc_abc123"), "chat_id");
    }

    #[test]
    fn test_receive_id_type_open() {
        assert_eq!(FeishuChannel::receive_id_type("ou_abc123"), "open_id");
    }

    #[test]
    fn test_is_allowed_empty_list() {
        let ch = create_test_channel();
        assert!(ch.is_allowed("anyone"));
    }

    #[test]
    fn test_is_allowed_match() {
        let ch = create_restricted_channel();
        assert!(ch.is_allowed("ou_allowed"));
        assert!(!ch.is_allowed("ou_stranger"));
    }

    #[test]
    fn test_is_allowed_pipe_split() {
        let ch = create_restricted_channel();
        assert!(ch.is_allowed("ou_allowed|someuser"));
        assert!(!ch.is_allowed("000|stranger"));
    }

    #[tokio::test]
    async fn test_start_requires_credentials() {
        let bus = Arc::new(MessageBus::new());
        let ch = FeishuChannel::new(String::new(), String::new(), String::new(), bus, vec![]);
        let result = ch.start().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_handle_bridge_event_publishes() {
        let bus = Arc::new(MessageBus::new());
        let ch = FeishuChannel::new(
            "a".into(),
            "s".into(),
            String::new(),
            bus.clone(),
            vec![],
        );

        let payload = json!({
            "sender_id": "ou_123",
            "chat_id": "oc_456",
            "content": "hello from feishu",
            "is_group": false
        });

        ch.handle_bridge_event(&payload.to_string()).await.unwrap();

        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.channel, "feishu");
        assert_eq!(msg.sender_id, "ou_123");
        assert_eq!(msg.chat_id, "oc_456");
        assert_eq!(msg.content, "hello from feishu");
        assert_eq!(msg.metadata.get("is_group").unwrap(), "false");
    }

    #[tokio::test]
    async fn test_handle_bridge_event_missing_fields() {
        let bus = Arc::new(MessageBus::new());
        let ch = FeishuChannel::new(
            "a".into(),
            "s".into(),
            String::new(),
            bus.clone(),
            vec![],
        );

        ch.handle_bridge_event(r#"{"content":"orphan"}"#).await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            bus.consume_inbound(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_handle_bridge_event_unauthorized() {
        let bus = Arc::new(MessageBus::new());
        let ch = FeishuChannel::new(
            "a".into(),
            "s".into(),
            String::new(),
            bus.clone(),
            vec!["ou_allowed".into()],
        );

        let payload = json!({
            "sender_id": "ou_stranger",
            "chat_id": "oc_456",
            "content": "hello"
        });

        ch.handle_bridge_event(&payload.to_string()).await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            bus.consume_inbound(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_handle_bridge_event_invalid_json() {
        let ch = create_test_channel();
        let result = ch.handle_bridge_event("not json").await;
        assert!(result.is_err());
    }
}

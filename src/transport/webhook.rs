//! WhatsApp gateway transport: POSTs each message to an automation webhook
//! that forwards it to the chat provider.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::{OutboundMessage, Transport};
use crate::config::ServerConfig;
use crate::error::TransportError;

const NAME: &str = "whatsapp_webhook";

/// Maximum bytes of a gateway error body kept in the error.
const ERROR_BODY_LIMIT: usize = 200;

/// Wire payload expected by the gateway workflow.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    phone_number: &'a str,
    mensagem: String,
    tag_campanha: &'a str,
}

/// Webhook-backed transport.
pub struct WebhookTransport {
    url: Option<String>,
    token: Option<SecretString>,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(url: Option<String>, token: Option<SecretString>, timeout: Duration) -> Self {
        Self {
            url,
            token,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.webhook_url.clone(),
            config.webhook_token.clone(),
            config.request_timeout,
        )
    }

    fn url(&self) -> Result<&str, TransportError> {
        self.url.as_deref().ok_or_else(|| TransportError::NotConfigured {
            name: NAME.into(),
            reason: "WHATSAPP_WEBHOOK_URL is not set".into(),
        })
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn name(&self) -> &str {
        NAME
    }

    async fn check_ready(&self) -> Result<(), TransportError> {
        let url = self.url()?;
        reqwest::Url::parse(url).map_err(|e| TransportError::NotConfigured {
            name: NAME.into(),
            reason: format!("invalid webhook URL: {e}"),
        })?;
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let url = self.url()?;
        let payload = WebhookPayload {
            phone_number: &message.phone,
            mensagem: sanitize_message(&message.text),
            tag_campanha: &message.campaign_tag,
        };

        let mut request = self.client.post(url).timeout(self.timeout).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    name: NAME.into(),
                    timeout: self.timeout,
                }
            } else if e.is_connect() {
                TransportError::Unreachable {
                    name: NAME.into(),
                    reason: e.to_string(),
                }
            } else {
                TransportError::Http(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(phone = %message.phone, "Gateway accepted message");
            return Ok(());
        }

        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > ERROR_BODY_LIMIT {
            let cut = (0..=ERROR_BODY_LIMIT)
                .rev()
                .find(|&i| body.is_char_boundary(i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        Err(TransportError::Rejected {
            name: NAME.into(),
            status: status.as_u16(),
            body,
        })
    }
}

/// Normalize line endings, drop NUL bytes, and trim.
pub fn sanitize_message(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\0', "")
        .trim()
        .to_string()
}

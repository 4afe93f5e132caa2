//! Outbound message transport: the gateway the dispatcher sends through.

pub mod webhook;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::TransportError;

pub use webhook::{WebhookTransport, sanitize_message};

/// One message bound for one lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub phone: String,
    pub text: String,
    /// Tag the gateway attaches to the conversation.
    pub campaign_tag: String,
}

/// Black-box message delivery.
///
/// Every error is treated as a per-lead failure; the dispatcher never retries
/// within a run.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the transport name, used in logs and errors.
    fn name(&self) -> &str;

    /// Verify the transport can accept messages. Called once before a
    /// campaign's first send; an error here fails the campaign.
    async fn check_ready(&self) -> Result<(), TransportError>;

    /// Deliver one message.
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

//! Chat channel boundary.
//!
//! The bot core never talks to Twilio directly; it goes through the
//! [`MessageSender`] and [`MediaFetcher`] traits so the whole messaging
//! layer can be swapped for another provider (or a mock) without touching
//! parsing or query logic. The webhook server lives in [`server`], the
//! Twilio REST implementations in [`twilio`].

pub mod server;
pub mod twilio;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::pipeline::RawDocument;

pub use server::{webhook_router, AppState, BotServer};
pub use twilio::{TwilioMediaClient, TwilioSender};

// ═══════════════════════════════════════════════════════════
// Traits
// ═══════════════════════════════════════════════════════════

/// Outbound message delivery.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Deliver `body` to the `to` address (e.g. "whatsapp:+5691234...").
    async fn send_message(&self, to: &str, body: &str) -> Result<(), GatewayError>;
}

/// Attachment download. Webhooks carry media URLs, not bytes.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RawDocument, GatewayError>;
}

// ═══════════════════════════════════════════════════════════
// Dry-run sender
// ═══════════════════════════════════════════════════════════

/// Logs outbound messages instead of delivering them. Used when the bot
/// runs without Twilio credentials (GUARDIA_DRY_RUN).
pub struct DryRunSender;

#[async_trait]
impl MessageSender for DryRunSender {
    async fn send_message(&self, to: &str, body: &str) -> Result<(), GatewayError> {
        info!(to = %to, chars = body.len(), "Dry run, outbound message suppressed");
        debug!(body = %body, "Suppressed message body");
        Ok(())
    }
}

/// Fails every download. Used in dry runs without Twilio credentials,
/// where media URLs cannot be authenticated anyway.
pub struct NoopMediaFetcher;

#[async_trait]
impl MediaFetcher for NoopMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<RawDocument, GatewayError> {
        info!(url = %url, "Dry run without credentials, media fetch skipped");
        Err(GatewayError::Connection(url.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════
// Mocks
// ═══════════════════════════════════════════════════════════

/// Records sent messages instead of delivering them.
pub struct MockMessageSender {
    sent: std::sync::Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl MockMessageSender {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A sender whose every delivery fails with a connection error.
    pub fn failing() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Every (to, body) pair sent so far, in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Default for MockMessageSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSender for MockMessageSender {
    async fn send_message(&self, to: &str, body: &str) -> Result<(), GatewayError> {
        if self.fail {
            return Err(GatewayError::Connection("mock".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((to.to_string(), body.to_string()));
        }
        Ok(())
    }
}

/// Serves a fixed document for any URL, or fails.
pub struct MockMediaFetcher {
    document: Option<RawDocument>,
}

impl MockMediaFetcher {
    pub fn new(document: RawDocument) -> Self {
        Self {
            document: Some(document),
        }
    }

    pub fn failing() -> Self {
        Self { document: None }
    }
}

#[async_trait]
impl MediaFetcher for MockMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<RawDocument, GatewayError> {
        self.document
            .clone()
            .ok_or_else(|| GatewayError::Connection(url.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP client error: {0}")]
    Http(String),
    #[error("Chat API rejected the request ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Cannot reach the chat API at {0}")]
    Connection(String),
    #[error("Chat API request timed out after {0}s")]
    Timeout(u64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! Twilio WhatsApp REST client.
//!
//! Outbound messages go through the Messages API; inbound attachments are
//! downloaded from the media URLs Twilio puts in the webhook form.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{GatewayError, MediaFetcher, MessageSender};
use crate::config::TwilioConfig;
use crate::pipeline::RawDocument;

pub const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Outbound send budget. Twilio normally answers in well under a second.
const SEND_TIMEOUT_SECS: u64 = 30;
/// Attachment download budget; phone photos run to several megabytes.
const FETCH_TIMEOUT_SECS: u64 = 60;

/// WhatsApp addresses must carry the channel prefix or the Messages API
/// rejects them.
fn ensure_whatsapp_prefix(number: &str) -> String {
    let trimmed = number.trim();
    if trimmed.starts_with("whatsapp:") {
        trimmed.to_string()
    } else {
        format!("whatsapp:{trimmed}")
    }
}

fn map_request_error(e: reqwest::Error, url: &str, timeout_secs: u64) -> GatewayError {
    if e.is_connect() {
        GatewayError::Connection(url.to_string())
    } else if e.is_timeout() {
        GatewayError::Timeout(timeout_secs)
    } else {
        GatewayError::Http(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════
// Message sending
// ═══════════════════════════════════════════════════════════

pub struct TwilioSender {
    http: Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioSender {
    pub fn new(config: &TwilioConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        Ok(Self {
            http,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: ensure_whatsapp_prefix(&config.whatsapp_number),
        })
    }
}

/// Subset of the Messages API response. The SID identifies the accepted
/// message in Twilio's console and delivery logs.
#[derive(Deserialize)]
struct MessageAccepted {
    sid: Option<String>,
}

#[async_trait]
impl MessageSender for TwilioSender {
    async fn send_message(&self, to: &str, body: &str) -> Result<(), GatewayError> {
        let url = format!("{TWILIO_API_BASE}/Accounts/{}/Messages.json", self.account_sid);
        let params = [
            ("To", ensure_whatsapp_prefix(to)),
            ("From", self.from_number.clone()),
            ("Body", body.to_string()),
        ];

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| map_request_error(e, &url, SEND_TIMEOUT_SECS))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let sid = response
            .json::<MessageAccepted>()
            .await
            .ok()
            .and_then(|m| m.sid)
            .unwrap_or_else(|| "unknown".to_string());
        debug!(to = %to, sid = %sid, "Outbound WhatsApp message accepted");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Media download
// ═══════════════════════════════════════════════════════════

pub struct TwilioMediaClient {
    http: Client,
    account_sid: String,
    auth_token: String,
}

impl TwilioMediaClient {
    pub fn new(config: &TwilioConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        Ok(Self {
            http,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl MediaFetcher for TwilioMediaClient {
    async fn fetch(&self, url: &str) -> Result<RawDocument, GatewayError> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| map_request_error(e, url, FETCH_TIMEOUT_SECS))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        debug!(url = %url, bytes = bytes.len(), media_type = %media_type, "Fetched attachment");
        Ok(RawDocument::new(bytes.to_vec(), media_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whatsapp_prefix_is_added_once() {
        assert_eq!(ensure_whatsapp_prefix("+56912345678"), "whatsapp:+56912345678");
        assert_eq!(
            ensure_whatsapp_prefix("whatsapp:+56912345678"),
            "whatsapp:+56912345678"
        );
        assert_eq!(ensure_whatsapp_prefix("  +56912345678 "), "whatsapp:+56912345678");
    }

    #[test]
    fn message_response_sid_parses() {
        let parsed: MessageAccepted =
            serde_json::from_str(r#"{"sid":"SM1a2b3c","status":"queued","num_media":"0"}"#)
                .unwrap();
        assert_eq!(parsed.sid.as_deref(), Some("SM1a2b3c"));

        let bare: MessageAccepted = serde_json::from_str("{}").unwrap();
        assert!(bare.sid.is_none());
    }

    #[test]
    fn sender_normalizes_the_from_number() {
        let sender = TwilioSender::new(&TwilioConfig {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            whatsapp_number: "+14155238886".to_string(),
        })
        .unwrap();
        assert_eq!(sender.from_number, "whatsapp:+14155238886");
    }
}

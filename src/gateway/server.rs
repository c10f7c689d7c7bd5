//! Axum webhook server for the Twilio WhatsApp channel.
//!
//! Twilio POSTs one form per inbound message. Text replies ride back in
//! the TwiML response; media uploads are acked immediately and answered
//! out-of-band, since OCR takes longer than Twilio's webhook window.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::{GatewayError, MediaFetcher, MessageSender};
use crate::bot::GuardiaBot;

// ═══════════════════════════════════════════════════════════
// State and wire types
// ═══════════════════════════════════════════════════════════

/// Everything the webhook handlers need, shared behind one `Arc`.
pub struct AppState {
    pub bot: Arc<GuardiaBot>,
    pub sender: Arc<dyn MessageSender>,
    pub fetcher: Arc<dyn MediaFetcher>,
}

/// The subset of Twilio's webhook form we consume. Only the first media
/// item is considered; schedules arrive one document at a time.
#[derive(Debug, Deserialize)]
struct TwilioWebhook {
    #[serde(rename = "From")]
    from: String,
    #[serde(rename = "Body")]
    body: Option<String>,
    #[serde(rename = "NumMedia")]
    num_media: Option<String>,
    #[serde(rename = "MediaUrl0")]
    media_url: Option<String>,
    #[serde(rename = "MediaContentType0")]
    media_content_type: Option<String>,
}

// ═══════════════════════════════════════════════════════════
// Router and handlers
// ═══════════════════════════════════════════════════════════

pub fn webhook_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/incoming", post(incoming_message))
        .with_state(state)
}

async fn health() -> &'static str {
    "Guardia está en línea. Configura /incoming como webhook de Twilio."
}

async fn incoming_message(
    State(state): State<Arc<AppState>>,
    Form(webhook): Form<TwilioWebhook>,
) -> Response {
    let media_count = webhook
        .num_media
        .as_deref()
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(0);

    if media_count > 0 {
        // Audio, video and contacts are refused before any download.
        if let Some(posted) = webhook.media_content_type.as_deref() {
            if !media_type_is_processable(posted) {
                warn!(from = %webhook.from, media_type = %posted, "Refusing unprocessable media type");
                return twiml_reply(
                    "Ese formato no está soportado. Envíame el horario como PDF o como foto \
                     (JPG o PNG).",
                );
            }
        }
        if let Some(url) = webhook.media_url.clone() {
            let from = webhook.from.clone();
            let content_type = webhook.media_content_type.clone();
            tokio::spawn(async move {
                process_upload_and_notify(state, from, url, content_type).await;
            });
            return twiml_reply(
                "📄 Recibí tu documento, lo estoy leyendo. Te aviso apenas esté listo.",
            );
        }
        warn!(from = %webhook.from, "Webhook reports media but carries no URL");
    }

    let body = webhook.body.unwrap_or_default();
    let reply = state
        .bot
        .handle_inbound_message(&webhook.from, &body, None)
        .await;
    twiml_reply(&reply)
}

/// Media types worth downloading: the pipeline's two document kinds,
/// plus the generic type some providers put on everything (resolved
/// after download by magic bytes or the posted content type).
fn media_type_is_processable(media_type: &str) -> bool {
    let media = media_type.trim().to_ascii_lowercase();
    media == "application/pdf"
        || media.starts_with("image/")
        || media == "application/octet-stream"
}

/// Download the attachment, run it through the pipeline and push the
/// outcome as a fresh outbound message.
async fn process_upload_and_notify(
    state: Arc<AppState>,
    from: String,
    url: String,
    content_type: Option<String>,
) {
    let reply = match state.fetcher.fetch(&url).await {
        Ok(mut document) => {
            // The posted MediaContentType0 beats a generic download header.
            if document.media_type == "application/octet-stream" {
                if let Some(posted) = content_type {
                    document.media_type = posted;
                }
            }
            state.bot.handle_inbound_message(&from, "", Some(document)).await
        }
        Err(e) => {
            warn!(from = %from, error = %e, "Media download failed");
            "⚠️ No pude descargar el archivo. Intenta enviarlo de nuevo.".to_string()
        }
    };

    if let Err(e) = state.sender.send_message(&from, &reply).await {
        error!(from = %from, error = %e, "Failed to deliver processing result");
    }
}

// ═══════════════════════════════════════════════════════════
// TwiML
// ═══════════════════════════════════════════════════════════

fn twiml_reply(message: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
        xml_escape(message)
    );
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Server lifecycle
// ═══════════════════════════════════════════════════════════

pub struct BotServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl BotServer {
    /// Bind and serve the webhook in a background task.
    pub async fn start(state: Arc<AppState>, bind_addr: SocketAddr) -> Result<Self, GatewayError> {
        // Step 1: Bind the listener (port 0 picks a free port)
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;

        // Step 2: Build the router
        let app = webhook_router(state);

        // Step 3: Shutdown channel
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        // Step 4: Serve until shutdown is signalled
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Webhook server error");
            }
        });

        info!(addr = %addr, "Webhook server listening");
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Signal graceful shutdown. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            info!("Webhook server shutting down");
        }
    }
}

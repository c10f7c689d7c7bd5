pub mod bot;
pub mod config;
pub mod gateway; // Twilio webhook server + outbound messaging
pub mod pipeline; // PDF/image -> OCR -> structured roster
pub mod query;
pub mod roster;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// built-in default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}

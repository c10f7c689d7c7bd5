use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use guardia::bot::GuardiaBot;
use guardia::config::{self, BotConfig, DataDir};
use guardia::gateway::{
    AppState, BotServer, DryRunSender, GatewayError, MediaFetcher, MessageSender,
    NoopMediaFetcher, TwilioMediaClient, TwilioSender,
};
use guardia::pipeline::build_processor;
use guardia::roster::store::RosterStore;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    guardia::init_tracing();
    info!("Guardia starting v{}", config::APP_VERSION);

    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    // Native engine problems (missing PDFium, missing traineddata) are
    // startup-fatal, never discovered mid-request.
    let processor = match build_processor(&config) {
        Ok(processor) => processor,
        Err(e) => {
            error!(error = %e, "Document pipeline failed to initialize");
            return ExitCode::FAILURE;
        }
    };

    let store = build_store(&config);
    let bot = Arc::new(GuardiaBot::new(processor, store, &config));

    let (sender, fetcher) = match build_channel(&config) {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "Twilio client failed to initialize");
            return ExitCode::FAILURE;
        }
    };

    let state = Arc::new(AppState { bot, sender, fetcher });
    let mut server = match BotServer::start(state, config.bind_addr).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, addr = %config.bind_addr, "Could not bind the webhook server");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Signal handler failed");
    }
    server.shutdown();
    info!("Guardia stopped");
    ExitCode::SUCCESS
}

/// Persistent store when a data directory is available, in-memory
/// otherwise. Persistence failures degrade, they never abort startup.
fn build_store(config: &BotConfig) -> RosterStore {
    let dir = match &config.data_dir {
        DataDir::Disabled => {
            info!("Persistence disabled, rosters stay in memory");
            None
        }
        DataDir::Explicit(dir) => Some(dir.clone()),
        DataDir::Default => {
            let fallback = config::default_data_dir();
            if fallback.is_none() {
                warn!("No home directory, rosters stay in memory");
            }
            fallback
        }
    };
    match dir {
        Some(dir) => match RosterStore::with_persistence(&dir, config.roster_ttl_days) {
            Ok(store) => {
                info!(dir = %dir.display(), "Roster persistence enabled");
                store
            }
            Err(e) => {
                warn!(error = %e, dir = %dir.display(), "Persistence unavailable, rosters stay in memory");
                RosterStore::new_in_memory(config.roster_ttl_days)
            }
        },
        None => RosterStore::new_in_memory(config.roster_ttl_days),
    }
}

fn build_channel(
    config: &BotConfig,
) -> Result<(Arc<dyn MessageSender>, Arc<dyn MediaFetcher>), GatewayError> {
    let sender: Arc<dyn MessageSender> = match (&config.twilio, config.dry_run) {
        (Some(twilio), false) => Arc::new(TwilioSender::new(twilio)?),
        _ => {
            info!("Dry run, replies are logged instead of sent");
            Arc::new(DryRunSender)
        }
    };
    // Credentials still allow media downloads in a dry run; without them
    // uploads are refused with a download error.
    let fetcher: Arc<dyn MediaFetcher> = match &config.twilio {
        Some(twilio) => Arc::new(TwilioMediaClient::new(twilio)?),
        None => Arc::new(NoopMediaFetcher),
    };
    Ok((sender, fetcher))
}

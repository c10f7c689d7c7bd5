//! Runtime configuration.
//!
//! Everything is driven by environment variables so the bot can run the
//! same way under systemd, Docker, or a shell with a `.env` file. Values
//! are validated up front; a bad variable stops startup with a clear
//! message instead of surfacing mid-request.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::pipeline::PreprocessOptions;

/// Application-level constants
pub const APP_NAME: &str = "Guardia";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tesseract language pack(s), '+'-separated ("spa+eng").
pub const DEFAULT_OCR_LANGUAGES: &str = "spa";
/// Rasterization density for PDF pages. 300 keeps table rules and small
/// print legible without ballooning render times.
pub const DEFAULT_OCR_DPI: u32 = 300;
pub const MIN_OCR_DPI: u32 = 72;
pub const MAX_OCR_DPI: u32 = 600;
/// Tokens below this OCR confidence are flagged, not dropped.
pub const DEFAULT_OCR_MIN_CONFIDENCE: f32 = 0.4;
/// Rosters older than this are evicted; schedules are monthly in practice.
pub const DEFAULT_ROSTER_TTL_DAYS: i64 = 30;
/// Schedules come from Chilean hospitals, so date words resolve there
/// unless configured otherwise.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Santiago;
pub const DEFAULT_BIND_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000);
/// Processing budget per page; a whole upload gets pages x this.
pub const DEFAULT_PAGE_TIMEOUT_SECS: u64 = 10;

/// Default `tracing` filter when RUST_LOG is unset.
pub fn default_log_filter() -> &'static str {
    "info,guardia=debug"
}

/// Default roster persistence directory, ~/Guardia/rosters (user-visible).
/// `None` when no home directory can be determined.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join("Guardia").join("rosters"))
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Twilio WhatsApp credentials.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number, e.g. "whatsapp:+14155238886".
    pub whatsapp_number: String,
}

/// Where rosters persist, from GUARDIA_DATA_DIR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataDir {
    /// Variable unset: use the platform default directory.
    Default,
    /// Explicit directory.
    Explicit(PathBuf),
    /// Set to the empty string: keep rosters in memory only.
    Disabled,
}

/// Validated bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub ocr_languages: String,
    pub ocr_dpi: u32,
    pub ocr_min_confidence: f32,
    pub roster_ttl_days: i64,
    /// Timezone used to resolve "hoy" and "mañana" in queries.
    pub timezone: Tz,
    pub preprocess: PreprocessOptions,
    /// Explicit tessdata directory; `None` lets Tesseract use its own
    /// search path.
    pub tessdata_dir: Option<PathBuf>,
    pub data_dir: DataDir,
    pub bind_addr: SocketAddr,
    pub page_timeout_secs: u64,
    /// Log outbound messages instead of calling Twilio.
    pub dry_run: bool,
    /// Always present unless `dry_run` is set.
    pub twilio: Option<TwilioConfig>,
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl BotConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source. Tests pass closures over
    /// maps; `from_env` passes the real environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ocr_languages = lookup("OCR_LANGUAGES")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_OCR_LANGUAGES.to_string());
        if ocr_languages.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "OCR_LANGUAGES",
                reason: "must name at least one language pack".to_string(),
            });
        }

        let ocr_dpi: u32 = parse_or_default(lookup("OCR_DPI"), "OCR_DPI", DEFAULT_OCR_DPI)?;
        if !(MIN_OCR_DPI..=MAX_OCR_DPI).contains(&ocr_dpi) {
            return Err(ConfigError::InvalidValue {
                name: "OCR_DPI",
                reason: format!("must be between {MIN_OCR_DPI} and {MAX_OCR_DPI}, got {ocr_dpi}"),
            });
        }

        let ocr_min_confidence: f32 = parse_or_default(
            lookup("OCR_MIN_CONFIDENCE"),
            "OCR_MIN_CONFIDENCE",
            DEFAULT_OCR_MIN_CONFIDENCE,
        )?;
        if !(0.0..=1.0).contains(&ocr_min_confidence) {
            return Err(ConfigError::InvalidValue {
                name: "OCR_MIN_CONFIDENCE",
                reason: format!("must be within [0, 1], got {ocr_min_confidence}"),
            });
        }

        let roster_ttl_days: i64 = parse_or_default(
            lookup("ROSTER_TTL_DAYS"),
            "ROSTER_TTL_DAYS",
            DEFAULT_ROSTER_TTL_DAYS,
        )?;
        if roster_ttl_days < 1 {
            return Err(ConfigError::InvalidValue {
                name: "ROSTER_TTL_DAYS",
                reason: format!("must be at least 1, got {roster_ttl_days}"),
            });
        }

        let timezone: Tz = match lookup("TIMEZONE") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "TIMEZONE",
                reason: format!("unknown IANA timezone {raw:?}"),
            })?,
            None => DEFAULT_TIMEZONE,
        };

        let preprocess = PreprocessOptions {
            binarize: parse_bool_or(lookup("PREPROCESS_BINARIZE"), "PREPROCESS_BINARIZE", true)?,
            denoise: parse_bool_or(lookup("PREPROCESS_DENOISE"), "PREPROCESS_DENOISE", true)?,
            deskew: parse_bool_or(lookup("PREPROCESS_DESKEW"), "PREPROCESS_DESKEW", true)?,
        };

        let page_timeout_secs: u64 = parse_or_default(
            lookup("PAGE_TIMEOUT_SECS"),
            "PAGE_TIMEOUT_SECS",
            DEFAULT_PAGE_TIMEOUT_SECS,
        )?;
        if page_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PAGE_TIMEOUT_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        let bind_addr: SocketAddr =
            parse_or_default(lookup("BIND_ADDR"), "BIND_ADDR", DEFAULT_BIND_ADDR)?;

        let dry_run = parse_bool_or(lookup("GUARDIA_DRY_RUN"), "GUARDIA_DRY_RUN", false)?;

        let account_sid = lookup("TWILIO_ACCOUNT_SID");
        let auth_token = lookup("TWILIO_AUTH_TOKEN");
        let whatsapp_number = lookup("TWILIO_WHATSAPP_NUMBER");
        let any_twilio =
            account_sid.is_some() || auth_token.is_some() || whatsapp_number.is_some();
        let twilio = if any_twilio || !dry_run {
            Some(TwilioConfig {
                account_sid: account_sid
                    .ok_or(ConfigError::MissingVar("TWILIO_ACCOUNT_SID"))?,
                auth_token: auth_token.ok_or(ConfigError::MissingVar("TWILIO_AUTH_TOKEN"))?,
                whatsapp_number: whatsapp_number
                    .ok_or(ConfigError::MissingVar("TWILIO_WHATSAPP_NUMBER"))?,
            })
        } else {
            None
        };

        let data_dir = match lookup("GUARDIA_DATA_DIR").map(|s| s.trim().to_string()) {
            None => DataDir::Default,
            Some(s) if s.is_empty() => DataDir::Disabled,
            Some(s) => DataDir::Explicit(PathBuf::from(s)),
        };

        Ok(Self {
            ocr_languages,
            ocr_dpi,
            ocr_min_confidence,
            roster_ttl_days,
            timezone,
            preprocess,
            tessdata_dir: lookup("TESSDATA_DIR").map(PathBuf::from),
            data_dir,
            bind_addr,
            page_timeout_secs,
            dry_run,
            twilio,
        })
    }
}

fn parse_or_default<T>(value: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            name,
            reason: format!("{raw:?} is not valid: {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_bool_or(
    value: Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some("1") | Some("true") | Some("yes") | Some("on") => Ok(true),
        Some("0") | Some("false") | Some("no") | Some("off") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            name,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

// ═══════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

//! Bot core: turns inbound WhatsApp messages into replies.
//!
//! Attachments run through the document pipeline and land in the roster
//! store; text goes through query parsing against the latest roster. All
//! user-facing strings are Spanish, the language of the schedules and of
//! the people asking.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BotConfig;
use crate::pipeline::{DocumentProcessor, ParseContext, PipelineError, RawDocument};
use crate::query::{parse_query, resolve, Answer, Query};
use crate::roster::store::RosterStore;
use crate::roster::Roster;

/// Native engine handles that may run at once. OCR is CPU-bound; more
/// parallelism than this just thrashes on the small hosts this runs on.
const MAX_CONCURRENT_EXTRACTIONS: usize = 2;

/// Below this mean OCR confidence the upload summary warns that the
/// source image is hard to read.
const LOW_CONFIDENCE_WARNING: f32 = 0.5;

// ═══════════════════════════════════════════════════════════
// Bot
// ═══════════════════════════════════════════════════════════

pub struct GuardiaBot {
    processor: Arc<DocumentProcessor>,
    store: RosterStore,
    timezone: Tz,
    /// Per-page slice of the processing budget; a request gets
    /// `pages x page_timeout`.
    page_timeout: Duration,
    ocr_pool: Arc<Semaphore>,
}

impl GuardiaBot {
    pub fn new(processor: DocumentProcessor, store: RosterStore, config: &BotConfig) -> Self {
        Self {
            processor: Arc::new(processor),
            store,
            timezone: config.timezone,
            page_timeout: Duration::from_secs(config.page_timeout_secs),
            ocr_pool: Arc::new(Semaphore::new(MAX_CONCURRENT_EXTRACTIONS)),
        }
    }

    /// Handle one inbound message and produce the reply text.
    ///
    /// A message with an attachment is a schedule upload; its caption is
    /// ignored. Plain text is a query against the latest stored roster.
    pub async fn handle_inbound_message(
        &self,
        from: &str,
        text: &str,
        attachment: Option<RawDocument>,
    ) -> String {
        debug!(from = %from, has_attachment = attachment.is_some(), "Inbound message");
        match attachment {
            Some(document) => self.handle_upload(document).await,
            None => self.handle_text(text),
        }
    }

    // ── Upload path ──

    async fn handle_upload(&self, document: RawDocument) -> String {
        let source_id = Uuid::new_v4();
        let pages = self.processor.page_count_estimate(&document);
        let budget = self.page_timeout * pages as u32;
        info!(
            source_id = %source_id,
            bytes = document.bytes.len(),
            media_type = %document.media_type,
            estimated_pages = pages,
            budget_secs = budget.as_secs(),
            "Processing upload"
        );

        let permit = match self.ocr_pool.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("Extraction pool closed");
                return internal_error_reply();
            }
        };

        let now = Utc::now();
        let context = ParseContext {
            source_id,
            parsed_at: now,
            reference_date: now.with_timezone(&self.timezone).date_naive(),
        };
        let processor = self.processor.clone();
        let outcome = tokio::time::timeout(
            budget,
            tokio::task::spawn_blocking(move || {
                // Permit lives as long as the native engines are busy.
                let _permit = permit;
                processor.process(&document, &context)
            }),
        )
        .await;

        match outcome {
            Err(_elapsed) => {
                warn!(source_id = %source_id, budget_secs = budget.as_secs(), "Processing timed out");
                render_pipeline_error(&PipelineError::ProcessingTimeout(budget.as_secs()))
            }
            Ok(Err(join_error)) => {
                error!(source_id = %source_id, error = %join_error, "Processing task failed");
                internal_error_reply()
            }
            Ok(Ok(Err(pipeline_error))) => {
                warn!(source_id = %source_id, error = %pipeline_error, "Upload rejected");
                render_pipeline_error(&pipeline_error)
            }
            Ok(Ok(Ok(roster))) => {
                let reply = render_upload_summary(&roster);
                if let Err(e) = self.store.put(roster) {
                    error!(source_id = %source_id, error = %e, "Failed to store roster");
                    return internal_error_reply();
                }
                reply
            }
        }
    }

    // ── Query path ──

    fn handle_text(&self, text: &str) -> String {
        match self.store.evict_expired(Utc::now()) {
            Ok(evicted) if evicted > 0 => info!(evicted, "Evicted expired rosters"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Eviction failed"),
        }

        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        let query = match parse_query(text, today) {
            Some(query) => query,
            None => return unrecognized_reply(),
        };
        if query == Query::Help {
            return help_reply();
        }

        let roster = match self.store.latest() {
            Ok(Some(roster)) => roster,
            Ok(None) => {
                return "Todavía no tengo ningún horario cargado. Envíame el horario de \
                        guardias como PDF o foto y después pregúntame quién está de turno."
                    .to_string()
            }
            Err(e) => {
                error!(error = %e, "Roster store unavailable");
                return internal_error_reply();
            }
        };

        render_answer(&resolve(&query, &roster, today), &roster)
    }
}

// ═══════════════════════════════════════════════════════════
// Reply rendering
// ═══════════════════════════════════════════════════════════

fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

fn internal_error_reply() -> String {
    "⚠️ Tuve un problema procesando tu mensaje. Intenta de nuevo en unos minutos.".to_string()
}

fn unrecognized_reply() -> String {
    "No te entendí. Pregúntame por ejemplo \"¿quién está de guardia hoy?\" o \
     \"¿quién cubre la noche el 15/03?\". Escribe \"ayuda\" para ver más opciones."
        .to_string()
}

fn help_reply() -> String {
    "🤖 Guardia\n\n\
     Envíame el horario de guardias como PDF o foto y después pregúntame:\n\
     • ¿Quién está de guardia hoy?\n\
     • ¿Quién está de guardia mañana?\n\
     • ¿Quién está de guardia el 15/03?\n\
     • ¿Quién cubre la noche el 15/03?\n\
     • personas (lista los nombres del horario)\n\n\
     Un horario nuevo reemplaza al anterior."
        .to_string()
}

fn render_pipeline_error(error: &PipelineError) -> String {
    match error {
        PipelineError::UnsupportedDocument(_) => {
            "No puedo leer ese tipo de archivo. Envíame el horario como PDF o como foto \
             (JPG o PNG)."
                .to_string()
        }
        PipelineError::EmptyDocument => {
            "El PDF que enviaste no tiene páginas. Revisa el archivo e intenta de nuevo."
                .to_string()
        }
        PipelineError::InvalidImage(_) => {
            "No pude leer la imagen. ¿Puedes tomar la foto de nuevo, con buena luz y el \
             horario completo en el cuadro?"
                .to_string()
        }
        PipelineError::ProcessingTimeout(secs) => format!(
            "⏱️ El documento es muy grande y no alcancé a procesarlo en {secs} segundos. \
             Prueba enviando menos páginas o una foto por semana."
        ),
        PipelineError::Io(_)
        | PipelineError::PdfEngineUnavailable(_)
        | PipelineError::PdfRender(_)
        | PipelineError::OcrEngineUnavailable(_) => internal_error_reply(),
    }
}

fn render_upload_summary(roster: &Roster) -> String {
    if roster.records.is_empty() {
        let mut reply = String::from(
            "Leí el documento pero no encontré turnos. Asegúrate de que el horario tenga \
             una columna de fechas y los nombres por turno.",
        );
        if roster.unparsed_page_count > 0 {
            reply.push_str(&format!(
                "\n⚠️ {} página(s) sin tabla legible.",
                roster.unparsed_page_count
            ));
        }
        return reply;
    }

    let count = roster.records.len();
    let noun = if count == 1 { "turno" } else { "turnos" };
    let mut reply = match roster.date_range() {
        Some((start, end)) if start != end => format!(
            "📅 Horario cargado: {count} {noun} del {} al {}.",
            format_date(start),
            format_date(end)
        ),
        Some((day, _)) => {
            format!("📅 Horario cargado: {count} {noun} el {}.", format_date(day))
        }
        None => format!("📅 Horario cargado: {count} {noun}."),
    };

    if roster.confidence.unparsed_rows > 0 {
        reply.push_str(&format!(
            "\n⚠️ {} fila(s) no se pudieron leer y quedaron fuera.",
            roster.confidence.unparsed_rows
        ));
    }
    if roster.unparsed_page_count > 0 {
        reply.push_str(&format!(
            "\n⚠️ {} página(s) sin tabla legible.",
            roster.unparsed_page_count
        ));
    }
    if roster.confidence.mean_token_confidence < LOW_CONFIDENCE_WARNING
        && roster.confidence.mean_token_confidence > 0.0
    {
        reply.push_str(
            "\n⚠️ La imagen se ve poco nítida; revisa que los turnos coincidan con el papel.",
        );
    }
    reply.push_str("\n\nPregúntame \"¿quién está de guardia hoy?\" cuando quieras.");
    reply
}

fn render_answer(answer: &Answer, roster: &Roster) -> String {
    match answer {
        Answer::Help => help_reply(),
        Answer::People(names) if names.is_empty() => {
            "El horario cargado no tiene nombres legibles.".to_string()
        }
        Answer::People(names) => {
            let mut reply = String::from("👥 Personas registradas en el horario:");
            for name in names {
                reply.push_str(&format!("\n• {name}"));
            }
            if let Some((start, end)) = roster.date_range() {
                reply.push_str(&format!(
                    "\nCubre del {} al {}.",
                    format_date(start),
                    format_date(end)
                ));
            }
            reply
        }
        Answer::OnCall { date, shift, matches } if matches.is_empty() => {
            let mut reply = match shift {
                Some(shift) => format!(
                    "No encontré guardia de {} para el {}.",
                    shift.display_name(),
                    format_date(*date)
                ),
                None => format!("No encontré guardias para el {}.", format_date(*date)),
            };
            if let Some((start, end)) = roster.date_range() {
                reply.push_str(&format!(
                    " El horario cargado cubre del {} al {}.",
                    format_date(start),
                    format_date(end)
                ));
            }
            reply
        }
        Answer::OnCall { date, matches, .. } if matches.len() == 1 => {
            let record = &matches[0];
            format!(
                "🏥 {} está de guardia el {} ({}).",
                record.person,
                format_date(*date),
                record.shift.display_name()
            )
        }
        Answer::OnCall { date, matches, .. } => {
            let mut reply = format!("🏥 Guardias del {}:", format_date(*date));
            for record in matches {
                reply.push_str(&format!(
                    "\n• {}: {}",
                    record.shift.display_name(),
                    record.person
                ));
            }
            reply
        }
    }
}

//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (ueberschreibt die Konfigurationsdatei):
//! - `RELAIS_LOG_LEVEL`: Filter-Direktive (z.B. `info`, `relais_queue=debug`), Standard: info
//! - `RELAIS_LOG_FORMAT`: Format (text/json), Standard: text

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "RELAIS_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "RELAIS_LOG_FORMAT";

/// Fehler beim Initialisieren des Loggings
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Unbekanntes Log-Format: {0} (erlaubt: text, json)")]
    UnbekanntesFormat(String),

    #[error("Ungueltige Filter-Direktive '{direktive}': {grund}")]
    UngueltigerFilter { direktive: String, grund: String },

    /// Ein globaler Subscriber ist bereits gesetzt
    #[error("Logging bereits initialisiert")]
    BereitsInitialisiert,
}

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            andere => Err(LoggingError::UnbekanntesFormat(andere.to_string())),
        }
    }
}

/// Ermittelt Filter und Format aus Umgebung und Konfiguration
///
/// `env` liefert den Wert einer Umgebungsvariable; gesetzte Variablen
/// haben Vorrang vor den uebergebenen Werten.
fn einstellungen_ermitteln(
    level: &str,
    format: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(EnvFilter, LogFormat), LoggingError> {
    let direktive = env(ENV_LOG_LEVEL).unwrap_or_else(|| level.to_string());
    let filter = EnvFilter::try_new(&direktive).map_err(|e| LoggingError::UngueltigerFilter {
        direktive: direktive.clone(),
        grund: e.to_string(),
    })?;

    let format = env(ENV_LOG_FORMAT)
        .unwrap_or_else(|| format.to_string())
        .parse::<LogFormat>()?;

    Ok((filter, format))
}

/// Initialisiert den globalen tracing-Subscriber
///
/// `level` und `format` stammen aus der Konfiguration; `RELAIS_LOG_LEVEL`
/// und `RELAIS_LOG_FORMAT` ueberschreiben sie.
pub fn logging_initialisieren(level: &str, format: &str) -> Result<LogFormat, LoggingError> {
    let (filter, format) = einstellungen_ermitteln(level, format, |name| std::env::var(name).ok())?;

    let ergebnis = match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    ergebnis.map_err(|_| LoggingError::BereitsInitialisiert)?;
    Ok(format)
}

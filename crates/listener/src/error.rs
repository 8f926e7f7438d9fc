//! Fehlertypen fuer den Listener

use thiserror::Error;

/// Fehlertyp fuer den Listener
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Zertifikat, Schluessel oder Listener-Konfiguration ungueltig
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    /// Adresse konnte nicht gebunden werden
    #[error("Bind auf {adresse} fehlgeschlagen: {quelle}")]
    Bind {
        adresse: String,
        #[source]
        quelle: std::io::Error,
    },

    /// Nicht behebbarer Fehler beim Annehmen neuer Verbindungen
    #[error("Annahme-Fehler: {0}")]
    Annahme(#[source] std::io::Error),

    /// `annehmen` wurde bereits aufgerufen oder der Listener ist geschlossen
    #[error("Listener nimmt bereits Verbindungen an oder ist geschlossen")]
    BereitsAngenommen,

    /// Sonstiger IO-Fehler
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

pub type ListenerResult<T> = Result<T, ListenerError>;

//! Fehlertypen fuer Queue und Sender

use relais_core::ConnId;
use thiserror::Error;

/// Fehler der Queue-Operationen
#[derive(Debug, Error)]
pub enum QueueError {
    /// Operation ist reserviert, aber noch nicht umgesetzt
    #[error("Nicht implementiert: {0}")]
    NichtImplementiert(&'static str),
}

/// Fehler eines `AnfrageSender`
///
/// Ein Sendefehler stoppt nur die aktuelle Zustellrunde; die Anfrage
/// bleibt eingereiht.
#[derive(Debug, Error)]
pub enum SendeFehler {
    /// Zur ConnId existiert keine offene Verbindung (mehr)
    #[error("Verbindung unbekannt: {0}")]
    VerbindungUnbekannt(ConnId),

    /// Anfrage konnte nicht serialisiert werden
    #[error("Serialisierung fehlgeschlagen: {0}")]
    Serialisierung(String),

    /// Schreiben auf die Verbindung fehlgeschlagen
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

/// Result-Typ fuer Queue-Operationen
pub type QueueResult<T> = Result<T, QueueError>;

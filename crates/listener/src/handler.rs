//! Handler-Trait fuer Ereignisse einer Verbindung

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::session::Session;
use crate::verbindung::Verbindung;

/// Empfaengt Daten-Frames und Trennungen vom Listener
///
/// Beide Methoden laufen auf eigenen Tasks; mehrere Aufrufe von
/// `nachricht_empfangen` fuer dieselbe Verbindung koennen ueberlappen.
#[async_trait]
pub trait VerbindungsHandler: Send + Sync + 'static {
    /// Einmal pro Daten-Frame (nie fuer `ping` oder `close`)
    async fn nachricht_empfangen(&self, verbindung: Arc<Verbindung>, session: Arc<Session>, payload: Bytes);

    /// Genau einmal pro Verbindung, nachdem ihr Lese-Task geendet hat
    async fn verbindung_getrennt(&self, verbindung: Arc<Verbindung>, session: Arc<Session>);
}

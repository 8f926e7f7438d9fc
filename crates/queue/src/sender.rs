//! Sender-Schnittstelle
//!
//! Die Queue weiss nicht, wie eine Anfrage auf dem Draht aussieht. Der
//! Besitzer der Queue injiziert beim Erstellen einen `AnfrageSender`, der
//! eine eingereihte Anfrage ueber eine Verbindung uebertraegt.

use async_trait::async_trait;
use relais_core::ConnId;
use relais_protocol::RpcAntwort;
use serde_json::Value;
use std::sync::Arc;

use crate::error::SendeFehler;

/// Wird aufgerufen, sobald der Empfaenger eine Anfrage beantwortet (ACK)
pub type AntwortHandler = Arc<dyn Fn(&RpcAntwort) + Send + Sync>;

/// Eine eingereihte, noch nicht zugestellte Anfrage
pub struct WartendeAnfrage {
    pub method: String,
    pub params: Value,
    pub antwort_handler: Option<AntwortHandler>,
}

impl WartendeAnfrage {
    /// Erstellt eine Anfrage ohne Antwort-Handler
    pub fn neu(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            antwort_handler: None,
        }
    }

    /// Setzt den Antwort-Handler
    pub fn mit_handler(mut self, handler: AntwortHandler) -> Self {
        self.antwort_handler = Some(handler);
        self
    }
}

impl std::fmt::Debug for WartendeAnfrage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WartendeAnfrage")
            .field("method", &self.method)
            .field("params", &self.params)
            .field("antwort_handler", &self.antwort_handler.is_some())
            .finish()
    }
}

/// Uebertraegt eine eingereihte Anfrage an eine Verbindung
///
/// `Ok` bedeutet: die Anfrage ist uebergeben und darf aus dem Rueckstand
/// entfernt werden. Rueckgabewert ist die vergebene Request-ID.
#[async_trait]
pub trait AnfrageSender: Send + Sync + 'static {
    async fn senden(
        &self,
        conn_id: ConnId,
        anfrage: Arc<WartendeAnfrage>,
    ) -> Result<String, SendeFehler>;
}

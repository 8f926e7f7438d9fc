//! Verbindungs-Sender – stellt eingereihte Anfragen ueber den Listener zu
//!
//! Jede Zustellung wird als RPC-Anfrage mit frischer ID in einen Frame
//! geschrieben. Traegt die Anfrage einen Antwort-Handler, wird er unter
//! dieser ID fuer die empfangende Verbindung vorgemerkt, bis deren Antwort
//! eintrifft oder die Verbindung getrennt wird.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use relais_core::ConnId;
use relais_listener::VerbindungsRegister;
use relais_protocol::{ErrorCode, RpcAnfrage, RpcAntwort, RpcNachricht};
use relais_queue::{AnfrageSender, AntwortHandler, SendeFehler, WartendeAnfrage};

/// Vorgemerkter Handler einer zugestellten Anfrage
struct OffeneAntwort {
    conn_id: ConnId,
    handler: AntwortHandler,
}

pub struct VerbindungsSender {
    register: VerbindungsRegister,
    /// Request-ID -> Empfaenger-Verbindung und Handler
    offen: DashMap<String, OffeneAntwort>,
}

impl VerbindungsSender {
    pub fn neu(register: VerbindungsRegister) -> Self {
        Self {
            register,
            offen: DashMap::new(),
        }
    }

    /// Uebergibt eine Client-Antwort an den vorgemerkten Handler
    ///
    /// Nur Antworten der Verbindung, an die die Anfrage ging, werden
    /// angenommen. Gibt `false` zurueck wenn keine passende Anfrage aussteht.
    pub fn antwort_zustellen(&self, conn_id: ConnId, antwort: &RpcAntwort) -> bool {
        match self.offen.remove_if(&antwort.id, |_, offen| offen.conn_id == conn_id) {
            Some((_, offen)) => {
                (offen.handler)(antwort);
                true
            }
            None => false,
        }
    }

    /// Verwirft alle offenen Antworten einer getrennten Verbindung
    ///
    /// Jeder Handler erhaelt eine Fehler-Antwort. Gibt die Anzahl zurueck.
    pub fn verbindung_verwerfen(&self, conn_id: ConnId) -> usize {
        let ids: Vec<String> = self
            .offen
            .iter()
            .filter(|e| e.value().conn_id == conn_id)
            .map(|e| e.key().clone())
            .collect();

        let mut verworfen = 0;
        for id in ids {
            if let Some((id, offen)) = self.offen.remove_if(&id, |_, o| o.conn_id == conn_id) {
                let antwort = RpcAntwort::fehler(id, ErrorCode::InternalError, "Verbindung vor Antwort getrennt");
                (offen.handler)(&antwort);
                verworfen += 1;
            }
        }
        verworfen
    }

    /// Anzahl zugestellter Anfragen, deren Antwort noch aussteht
    pub fn offene_antworten(&self) -> usize {
        self.offen.len()
    }
}

#[async_trait]
impl AnfrageSender for VerbindungsSender {
    async fn senden(&self, conn_id: ConnId, anfrage: Arc<WartendeAnfrage>) -> Result<String, SendeFehler> {
        let verbindung = self
            .register
            .holen(conn_id)
            .ok_or(SendeFehler::VerbindungUnbekannt(conn_id))?;

        let rpc = RpcAnfrage::neu(anfrage.method.clone(), anfrage.params.clone());
        let request_id = rpc.id.clone();
        let payload = RpcNachricht::from(rpc)
            .zu_bytes()
            .map_err(|e| SendeFehler::Serialisierung(e.to_string()))?;

        // Vor dem Schreiben vormerken, die Antwort kann sofort eintreffen
        if let Some(handler) = &anfrage.antwort_handler {
            self.offen.insert(
                request_id.clone(),
                OffeneAntwort {
                    conn_id,
                    handler: Arc::clone(handler),
                },
            );
        }

        if let Err(e) = verbindung.frame_senden(&payload).await {
            self.offen.remove(&request_id);
            return Err(e.into());
        }
        Ok(request_id)
    }
}

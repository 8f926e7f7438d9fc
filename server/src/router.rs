//! Anfrage-Routing fuer authentifizierte Benutzer
//!
//! Methoden:
//! - `msg.echo` – gibt `params` unveraendert zurueck
//! - `msg.send` – `{to, message}`: reiht `msg.recv` `{from, message}` fuer
//!   den Empfaenger ein und antwortet mit `"ACK"`

use std::sync::Arc;

use async_trait::async_trait;
use relais_core::UserId;
use relais_protocol::{ErrorCode, RpcAnfrage, RpcAntwort};
use relais_queue::{AntwortHandler, NachrichtenQueue};
use serde::Deserialize;
use serde_json::{json, Value};

pub const METHODE_ECHO: &str = "msg.echo";
pub const METHODE_SENDEN: &str = "msg.send";
pub const METHODE_EMPFANGEN: &str = "msg.recv";

/// Beantwortet Anfragen eines authentifizierten Benutzers
#[async_trait]
pub trait AnfrageRouter: Send + Sync + 'static {
    async fn verarbeiten(&self, absender: &UserId, anfrage: RpcAnfrage) -> RpcAntwort;
}

#[derive(Debug, Deserialize)]
struct SendenParams {
    to: String,
    message: String,
}

/// Router fuer `msg.echo` und `msg.send`
pub struct StandardRouter {
    queue: NachrichtenQueue,
}

impl StandardRouter {
    pub fn neu(queue: NachrichtenQueue) -> Self {
        Self { queue }
    }

    fn senden(&self, absender: &UserId, id: String, params: Value) -> RpcAntwort {
        let params: SendenParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                return RpcAntwort::fehler(id, ErrorCode::InvalidRequest, format!("msg.send: {e}"));
            }
        };
        if params.to.is_empty() {
            return RpcAntwort::fehler(id, ErrorCode::InvalidRequest, "msg.send: 'to' ist leer");
        }

        let empfaenger = UserId::neu(params.to);
        let bestaetigung: AntwortHandler = {
            let absender = absender.clone();
            let empfaenger = empfaenger.clone();
            Arc::new(move |antwort: &RpcAntwort| {
                if antwort.ist_ok() {
                    tracing::debug!(von = %absender, an = %empfaenger, "Nachricht bestaetigt");
                } else {
                    tracing::warn!(
                        von = %absender,
                        an = %empfaenger,
                        fehler = ?antwort.error,
                        "Empfaenger hat Nachricht abgelehnt"
                    );
                }
            })
        };

        self.queue.anfrage_hinzufuegen(
            empfaenger,
            METHODE_EMPFANGEN,
            json!({ "from": absender.as_str(), "message": params.message }),
            Some(bestaetigung),
        );
        RpcAntwort::ok(id, json!("ACK"))
    }
}

#[async_trait]
impl AnfrageRouter for StandardRouter {
    async fn verarbeiten(&self, absender: &UserId, anfrage: RpcAnfrage) -> RpcAntwort {
        let RpcAnfrage { id, method, params } = anfrage;
        match method.as_str() {
            METHODE_ECHO => RpcAntwort::ok(id, params),
            METHODE_SENDEN => self.senden(absender, id, params),
            _ => {
                tracing::debug!(user_id = %absender, method = %method, "Unbekannte Methode");
                RpcAntwort::fehler(id, ErrorCode::MethodNotFound, format!("Unbekannte Methode: {method}"))
            }
        }
    }
}

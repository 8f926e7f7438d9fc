//! RPC-Umschlag fuer Daten-Frames
//!
//! Jeder Daten-Frame traegt genau eine JSON-Nachricht: entweder eine
//! Anfrage (`id`, `method`, `params`) oder eine Antwort (`id` plus
//! `result` oder `error`). Anfragen laufen in beide Richtungen; der Server
//! stellt z.B. eingereihte Nachrichten als Anfrage `msg.recv` zu und
//! wertet die Antwort des Clients als ACK.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Fehlercodes
// ---------------------------------------------------------------------------

/// Fehlercodes in RPC-Antworten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InternalError,
    InvalidRequest,
    MethodNotFound,
    NotAuthenticated,
    InvalidCredentials,
}

/// Fehlerteil einer Antwort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFehler {
    pub code: ErrorCode,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Anfrage / Antwort
// ---------------------------------------------------------------------------

/// RPC-Anfrage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcAnfrage {
    /// Vom Absender vergebene ID, wird in die Antwort kopiert
    pub id: String,
    /// Methodenname, z.B. `msg.send`
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcAnfrage {
    /// Erstellt eine Anfrage mit zufaelliger ID
    pub fn neu(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }
}

/// RPC-Antwort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcAntwort {
    /// ID der beantworteten Anfrage
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcFehler>,
}

impl RpcAntwort {
    /// Erfolgreiche Antwort
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Fehler-Antwort
    pub fn fehler(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(RpcFehler {
                code,
                message: message.into(),
            }),
        }
    }

    /// true wenn die Antwort keinen Fehler traegt
    pub fn ist_ok(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Umschlag
// ---------------------------------------------------------------------------

/// Eine Nachricht in einem Daten-Frame
///
/// Unterschieden wird am Feld `method`: nur Anfragen tragen es.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcNachricht {
    Anfrage(RpcAnfrage),
    Antwort(RpcAntwort),
}

impl RpcNachricht {
    /// Deserialisiert eine Frame-Payload
    pub fn aus_bytes(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    /// Serialisiert die Nachricht als Frame-Payload
    pub fn zu_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl From<RpcAnfrage> for RpcNachricht {
    fn from(anfrage: RpcAnfrage) -> Self {
        RpcNachricht::Anfrage(anfrage)
    }
}

impl From<RpcAntwort> for RpcNachricht {
    fn from(antwort: RpcAntwort) -> Self {
        RpcNachricht::Antwort(antwort)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

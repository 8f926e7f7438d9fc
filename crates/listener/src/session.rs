//! Session – fluechtiger Zustand pro Verbindung
//!
//! Lebt genau so lange wie die zugehoerige Verbindung. Die Benutzer-ID wird
//! hoechstens einmal gesetzt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use relais_core::UserId;

/// Warum der Lese-Task einer Verbindung geendet hat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrennGrund {
    /// Gegenseite hat den Stream beendet
    Eof,
    /// Kontroll-Frame `close` empfangen
    CloseFrame,
    /// Lesefehler oder ungueltiger Frame
    Lesefehler,
    /// Kein Frame innerhalb des Leerlauf-Timeouts
    Leerlauf,
    /// Server faehrt herunter
    Shutdown,
    /// Serverseitig per `Verbindung::schliessen` beendet
    Geschlossen,
}

impl std::fmt::Display for TrennGrund {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TrennGrund::Eof => "eof",
            TrennGrund::CloseFrame => "close",
            TrennGrund::Lesefehler => "lesefehler",
            TrennGrund::Leerlauf => "leerlauf",
            TrennGrund::Shutdown => "shutdown",
            TrennGrund::Geschlossen => "geschlossen",
        };
        f.write_str(text)
    }
}

/// Zustand einer Verbindung auf Anwendungsebene
#[derive(Debug, Default)]
pub struct Session {
    user_id: OnceLock<UserId>,
    getrennt: AtomicBool,
    trenn_grund: Mutex<Option<TrennGrund>>,
    letzter_fehler: Mutex<Option<String>>,
}

impl Session {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Authentifizierter Benutzer, falls gesetzt
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.get()
    }

    /// Setzt den Benutzer; nur der erste Aufruf wirkt
    pub fn user_id_setzen(&self, user_id: UserId) -> bool {
        self.user_id.set(user_id).is_ok()
    }

    pub fn ist_authentifiziert(&self) -> bool {
        self.user_id.get().is_some()
    }

    pub fn ist_getrennt(&self) -> bool {
        self.getrennt.load(Ordering::SeqCst)
    }

    pub fn trenn_grund(&self) -> Option<TrennGrund> {
        *self.trenn_grund.lock()
    }

    /// Letzter Lesefehler der Verbindung
    pub fn letzter_fehler(&self) -> Option<String> {
        self.letzter_fehler.lock().clone()
    }

    pub(crate) fn fehler_setzen(&self, fehler: impl Into<String>) {
        *self.letzter_fehler.lock() = Some(fehler.into());
    }

    /// Markiert die Session als getrennt; nur der erste Aufruf wirkt
    pub(crate) fn als_getrennt_markieren(&self, grund: TrennGrund) -> bool {
        let mut aktuell = self.trenn_grund.lock();
        if self.getrennt.swap(true, Ordering::SeqCst) {
            return false;
        }
        *aktuell = Some(grund);
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

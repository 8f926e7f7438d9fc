//! Presence-Verzeichnis – Welche Verbindung repraesentiert welchen Benutzer?
//!
//! Pro Benutzer existiert hoechstens ein Eintrag. Die erste Registrierung
//! gewinnt; weitere Registrierungen fuer einen bereits anwesenden Benutzer
//! sind wirkungslos, bis der Eintrag entfernt wird.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relais_core::{ConnId, UserId};
use std::sync::Arc;

/// Verwaltet die Zuordnung UserId -> ConnId
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct PresenceVerzeichnis {
    eintraege: Arc<DashMap<UserId, ConnId>>,
}

impl PresenceVerzeichnis {
    /// Erstellt ein leeres Verzeichnis
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert `conn_id` fuer `user_id`, falls der Benutzer noch nicht anwesend ist
    ///
    /// Gibt `true` zurueck wenn ein neuer Eintrag angelegt wurde.
    pub fn registrieren(&self, user_id: UserId, conn_id: ConnId) -> bool {
        match self.eintraege.entry(user_id) {
            Entry::Occupied(bestehend) => {
                tracing::debug!(
                    user_id = %bestehend.key(),
                    bestehend = %bestehend.get(),
                    abgewiesen = %conn_id,
                    "Benutzer bereits anwesend – Registrierung ignoriert"
                );
                false
            }
            Entry::Vacant(frei) => {
                tracing::info!(user_id = %frei.key(), conn_id = %conn_id, "Benutzer online");
                frei.insert(conn_id);
                true
            }
        }
    }

    /// Entfernt den Eintrag eines Benutzers
    pub fn entfernen(&self, user_id: &UserId) -> Option<ConnId> {
        let entfernt = self.eintraege.remove(user_id).map(|(_, conn_id)| conn_id);
        if let Some(conn_id) = entfernt {
            tracing::info!(user_id = %user_id, conn_id = %conn_id, "Benutzer offline");
        }
        entfernt
    }

    /// Entfernt den Eintrag nur, wenn er noch auf `conn_id` zeigt
    pub fn entfernen_falls(&self, user_id: &UserId, conn_id: ConnId) -> bool {
        let entfernt = self
            .eintraege
            .remove_if(user_id, |_, aktuell| *aktuell == conn_id)
            .is_some();
        if entfernt {
            tracing::info!(user_id = %user_id, conn_id = %conn_id, "Benutzer offline");
        }
        entfernt
    }

    /// Gibt die Verbindung zurueck, die den Benutzer gerade repraesentiert
    pub fn verbindung_von(&self, user_id: &UserId) -> Option<ConnId> {
        self.eintraege.get(user_id).map(|e| *e.value())
    }

    /// Prueft ob ein Benutzer anwesend ist
    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.eintraege.contains_key(user_id)
    }

    /// Anzahl anwesender Benutzer
    pub fn online_anzahl(&self) -> usize {
        self.eintraege.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

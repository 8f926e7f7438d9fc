//! Nachrichten-Queue – Offline-Rueckstand pro Benutzer
//!
//! Jede Anfrage an einen Benutzer wird zuerst in dessen FIFO-Rueckstand
//! eingereiht und dann von einem Zustell-Worker an die aktuelle Verbindung
//! des Benutzers uebergeben. Pro Benutzer laeuft hoechstens ein Worker;
//! dadurch bleibt die Reihenfolge erhalten und keine Anfrage wird doppelt
//! gesendet.
//!
//! ## Garantien
//! - Zustellversuche erfolgen strikt in Einreihungs-Reihenfolge
//! - Eine Anfrage verlaesst den Rueckstand erst nach erfolgreichem Senden
//! - Ein Sendefehler stoppt nur die aktuelle Runde, der Rest bleibt eingereiht
//! - Jeder Aufruf von `anfrage_hinzufuegen` loest eine Zustellrunde aus

use dashmap::DashMap;
use parking_lot::Mutex;
use relais_core::{ConnId, UserId};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::task::TaskTracker;

use crate::error::{QueueError, QueueResult};
use crate::presence::PresenceVerzeichnis;
use crate::sender::{AnfrageSender, AntwortHandler, WartendeAnfrage};

// ---------------------------------------------------------------------------
// BenutzerQueue
// ---------------------------------------------------------------------------

/// Rueckstand und Worker-Zustand eines Benutzers
#[derive(Default)]
struct BenutzerQueue {
    rueckstand: Mutex<VecDeque<Arc<WartendeAnfrage>>>,
    /// Mindestens ein Weckruf seit Beginn der aktuellen Runde
    angefordert: AtomicBool,
    /// Ein Worker laeuft fuer diesen Benutzer
    worker_aktiv: AtomicBool,
}

impl BenutzerQueue {
    fn ist_leer(&self) -> bool {
        self.rueckstand.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// NachrichtenQueue
// ---------------------------------------------------------------------------

/// Offline-Queue mit Presence-Verzeichnis
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
/// Alle Methoden, die eine Zustellung ausloesen koennen, muessen innerhalb
/// einer tokio-Runtime aufgerufen werden.
#[derive(Clone)]
pub struct NachrichtenQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    sender: Arc<dyn AnfrageSender>,
    presence: PresenceVerzeichnis,
    benutzer: DashMap<UserId, Arc<BenutzerQueue>>,
    worker: TaskTracker,
}

impl NachrichtenQueue {
    /// Erstellt eine neue Queue mit dem gegebenen Sender
    pub fn neu(sender: Arc<dyn AnfrageSender>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                sender,
                presence: PresenceVerzeichnis::neu(),
                benutzer: DashMap::new(),
                worker: TaskTracker::new(),
            }),
        }
    }

    /// Das Presence-Verzeichnis dieser Queue
    pub fn presence(&self) -> &PresenceVerzeichnis {
        &self.inner.presence
    }

    /// Ordnet einem Benutzer eine Verbindung zu und startet die Zustellung
    ///
    /// Ist der Benutzer bereits anwesend, passiert nichts (erste
    /// Registrierung gewinnt). Gibt `true` zurueck wenn die Zuordnung neu ist.
    pub fn verbindung_setzen(&self, user_id: UserId, conn_id: ConnId) -> bool {
        if !self.inner.presence.registrieren(user_id.clone(), conn_id) {
            return false;
        }
        self.zustellung_anstossen(&user_id);
        true
    }

    /// Entfernt die Verbindung eines Benutzers
    ///
    /// Der Rueckstand bleibt unveraendert eingereiht.
    pub fn verbindung_entfernen(&self, user_id: &UserId) -> Option<ConnId> {
        let entfernt = self.inner.presence.entfernen(user_id);
        self.aufraeumen(user_id);
        entfernt
    }

    /// Wie `verbindung_entfernen`, aber nur wenn der Benutzer noch von `conn_id` repraesentiert wird
    pub fn verbindung_entfernen_falls(&self, user_id: &UserId, conn_id: ConnId) -> bool {
        let entfernt = self.inner.presence.entfernen_falls(user_id, conn_id);
        if entfernt {
            self.aufraeumen(user_id);
        }
        entfernt
    }

    /// Reiht eine Anfrage fuer einen Benutzer ein und stoesst die Zustellung an
    ///
    /// Funktioniert unabhaengig davon, ob der Benutzer gerade online ist.
    pub fn anfrage_hinzufuegen(
        &self,
        user_id: UserId,
        method: impl Into<String>,
        params: Value,
        antwort_handler: Option<AntwortHandler>,
    ) {
        let anfrage = Arc::new(WartendeAnfrage {
            method: method.into(),
            params,
            antwort_handler,
        });

        {
            // Einreihen unter dem Shard-Lock, damit `aufraeumen` den Eintrag
            // nicht zwischen Nachschlagen und Einfuegen entfernt
            let slot = self.inner.benutzer.entry(user_id.clone()).or_default();
            slot.rueckstand.lock().push_back(anfrage);
        }

        tracing::trace!(user_id = %user_id, "Anfrage eingereiht");
        self.zustellung_anstossen(&user_id);
    }

    /// Reserviert fuer das Zusammenfassen gleichartiger Anfragen
    pub fn batch_anfrage_hinzufuegen(&self) -> QueueResult<()> {
        Err(QueueError::NichtImplementiert("batch_anfrage_hinzufuegen"))
    }

    /// Stoesst eine Zustellrunde fuer den Benutzer an
    ///
    /// Laeuft bereits ein Worker, wird nur vermerkt, dass nach der
    /// aktuellen Runde eine weitere folgen muss.
    pub fn zustellung_anstossen(&self, user_id: &UserId) {
        let slot = match self.inner.benutzer.get(user_id) {
            Some(slot) => Arc::clone(slot.value()),
            None => return,
        };

        slot.angefordert.store(true, Ordering::SeqCst);
        if slot.worker_aktiv.swap(true, Ordering::SeqCst) {
            return;
        }

        let queue = self.clone();
        let user_id = user_id.clone();
        self.inner.worker.spawn(async move {
            queue.worker(user_id, slot).await;
        });
    }

    /// Anzahl eingereihter Anfragen eines Benutzers
    pub fn rueckstand_laenge(&self, user_id: &UserId) -> usize {
        self.inner
            .benutzer
            .get(user_id)
            .map(|slot| slot.rueckstand.lock().len())
            .unwrap_or(0)
    }

    /// Methodennamen der eingereihten Anfragen in Zustell-Reihenfolge
    pub fn ausstehende_methoden(&self, user_id: &UserId) -> Vec<String> {
        self.inner
            .benutzer
            .get(user_id)
            .map(|slot| {
                slot.rueckstand
                    .lock()
                    .iter()
                    .map(|a| a.method.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Wartet bis alle laufenden Zustell-Worker beendet sind
    ///
    /// Danach werden keine neuen Worker mehr verfolgt; nur beim Herunterfahren aufrufen.
    pub async fn herunterfahren(&self) {
        self.inner.worker.close();
        self.inner.worker.wait().await;
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsmethoden
    // -----------------------------------------------------------------------

    async fn worker(&self, user_id: UserId, slot: Arc<BenutzerQueue>) {
        loop {
            slot.angefordert.store(false, Ordering::SeqCst);
            self.zustellen(&user_id, &slot).await;

            if slot.angefordert.load(Ordering::SeqCst) {
                continue;
            }

            slot.worker_aktiv.store(false, Ordering::SeqCst);

            // Weckruf zwischen letzter Pruefung und Freigabe?
            if slot.angefordert.load(Ordering::SeqCst)
                && !slot.worker_aktiv.swap(true, Ordering::SeqCst)
            {
                continue;
            }
            break;
        }

        self.aufraeumen(&user_id);
    }

    /// Eine Zustellrunde: sendet den Rueckstand in FIFO-Reihenfolge
    async fn zustellen(&self, user_id: &UserId, slot: &BenutzerQueue) {
        let mut zugestellt = 0usize;

        loop {
            // Presence vor jedem Versand neu pruefen
            let conn_id = match self.inner.presence.verbindung_von(user_id) {
                Some(conn_id) => conn_id,
                None => {
                    tracing::trace!(user_id = %user_id, "Benutzer offline – Zustellung pausiert");
                    break;
                }
            };

            let naechste = slot.rueckstand.lock().front().cloned();
            let Some(anfrage) = naechste else {
                break;
            };

            match self
                .inner
                .sender
                .senden(conn_id, Arc::clone(&anfrage))
                .await
            {
                Ok(request_id) => {
                    let mut rueckstand = slot.rueckstand.lock();
                    debug_assert!(rueckstand
                        .front()
                        .is_some_and(|erste| Arc::ptr_eq(erste, &anfrage)));
                    rueckstand.pop_front();
                    drop(rueckstand);

                    zugestellt += 1;
                    tracing::debug!(
                        user_id = %user_id,
                        conn_id = %conn_id,
                        request_id = %request_id,
                        method = %anfrage.method,
                        "Anfrage zugestellt"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        conn_id = %conn_id,
                        method = %anfrage.method,
                        verbleibend = slot.rueckstand.lock().len(),
                        fehler = %e,
                        "Zustellung fehlgeschlagen – Rest bleibt eingereiht"
                    );
                    break;
                }
            }
        }

        if zugestellt > 0 {
            tracing::debug!(user_id = %user_id, anzahl = zugestellt, "Zustellrunde beendet");
        }
    }

    /// Entfernt den Eintrag eines Benutzers, der offline ist und nichts mehr ausstehen hat
    fn aufraeumen(&self, user_id: &UserId) {
        if self.inner.presence.ist_online(user_id) {
            return;
        }
        self.inner.benutzer.remove_if(user_id, |_, slot| {
            !slot.worker_aktiv.load(Ordering::SeqCst) && slot.ist_leer()
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

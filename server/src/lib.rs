//! relais-server – Bibliotheks-Root
//!
//! Setzt Listener, Presence-Verzeichnis und Offline-Queue zu einem Relais
//! zusammen und stellt den Einstiegspunkt fuer Integrationstests bereit.
//!
//! ## Ablauf einer Verbindung
//! 1. Client sendet `auth.token` `{token}`; ohne gueltiges Token wird jede
//!    andere Anfrage mit `not_authenticated` beantwortet
//! 2. Jeder Frame einer authentifizierten Session meldet die Verbindung als
//!    Presence des Benutzers an (wirkungslos, falls bereits anwesend)
//! 3. Die Anmeldung stoesst die Zustellung des Rueckstands an
//! 4. Antworten des Clients gehen an den Handler der zugestellten Anfrage
//! 5. Beim Trennen wird die Presence entfernt, sofern sie noch auf diese
//!    Verbindung zeigt

pub mod auth;
pub mod config;
pub mod router;
pub mod sender;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use relais_core::UserId;
use relais_listener::{Listener, ListenerKonfig, ListenerResult, Session, Verbindung, VerbindungsHandler};
use relais_protocol::{ErrorCode, RpcAnfrage, RpcAntwort, RpcNachricht};
use relais_queue::{AnfrageSender, NachrichtenQueue};
use serde::Deserialize;
use serde_json::json;

use auth::{Authentifizierer, TokenTabelle};
use config::ServerConfig;
use router::{AnfrageRouter, StandardRouter};
use sender::VerbindungsSender;

pub const METHODE_AUTH: &str = "auth.token";

// ---------------------------------------------------------------------------
// RelaisServer
// ---------------------------------------------------------------------------

/// Haelt den laufenden Server-Zustand zusammen
pub struct RelaisServer {
    listener: Arc<Listener>,
    handler: Arc<RelaisHandler>,
    shutdown_timeout: Duration,
}

impl RelaisServer {
    /// Bindet den Server gemaess Konfiguration mit Token-Tabelle und `StandardRouter`
    pub async fn binden(config: &ServerConfig, zertifikat_pem: &[u8], schluessel_pem: &[u8]) -> Result<Self> {
        let auth = Arc::new(TokenTabelle::neu(&config.auth.tokens));
        tracing::info!(tokens = auth.anzahl(), "Token-Tabelle geladen");

        Self::binden_mit(
            zertifikat_pem,
            schluessel_pem,
            &config.bind_adresse(),
            config.listener_konfig(),
            config.shutdown_timeout(),
            auth,
            |queue| -> Arc<dyn AnfrageRouter> { Arc::new(StandardRouter::neu(queue)) },
        )
        .await
    }

    /// Bindet den Server mit eigener Authentifizierung und eigenem Router
    ///
    /// `router_bauen` erhaelt die Queue, damit der Router Nachrichten fuer
    /// andere Benutzer einreihen kann.
    pub async fn binden_mit<F>(
        zertifikat_pem: &[u8],
        schluessel_pem: &[u8],
        adresse: &str,
        konfig: ListenerKonfig,
        shutdown_timeout: Duration,
        auth: Arc<dyn Authentifizierer>,
        router_bauen: F,
    ) -> Result<Self>
    where
        F: FnOnce(NachrichtenQueue) -> Arc<dyn AnfrageRouter>,
    {
        let listener = Arc::new(Listener::binden(zertifikat_pem, schluessel_pem, adresse, konfig).await?);

        let sender = Arc::new(VerbindungsSender::neu(listener.register().clone()));
        let queue = NachrichtenQueue::neu(Arc::clone(&sender) as Arc<dyn AnfrageSender>);
        let router = router_bauen(queue.clone());

        Ok(Self {
            listener,
            handler: Arc::new(RelaisHandler {
                queue,
                sender,
                auth,
                router,
            }),
            shutdown_timeout,
        })
    }

    /// Nimmt Verbindungen an, bis der Listener geschlossen wird
    pub async fn starten(&self) -> ListenerResult<()> {
        tracing::info!(adresse = %self.listener.lokale_adresse(), "Relais laeuft");
        self.listener.annehmen(Arc::clone(&self.handler)).await
    }

    /// Faehrt geordnet herunter: Listener schliessen, Verbindungen trennen,
    /// Handler und Zustell-Worker abwarten
    ///
    /// Gibt `true` zurueck wenn alles innerhalb des Timeouts beendet wurde.
    pub async fn herunterfahren(&self) -> bool {
        tracing::info!(timeout_sek = self.shutdown_timeout.as_secs(), "Relais faehrt herunter");
        let listener_fertig = self.listener.herunterfahren(self.shutdown_timeout).await;

        let queue_fertig = tokio::time::timeout(self.shutdown_timeout, self.handler.queue.herunterfahren())
            .await
            .is_ok();
        if !queue_fertig {
            tracing::warn!("Zustell-Worker nicht rechtzeitig beendet");
        }

        listener_fertig && queue_fertig
    }

    pub fn lokale_adresse(&self) -> SocketAddr {
        self.listener.lokale_adresse()
    }

    pub fn queue(&self) -> &NachrichtenQueue {
        &self.handler.queue
    }

    /// Zugestellte Anfragen ohne Antwort des Clients
    pub fn offene_antworten(&self) -> usize {
        self.handler.sender.offene_antworten()
    }
}

// ---------------------------------------------------------------------------
// RelaisHandler
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AuthParams {
    token: String,
}

/// Verbindet Listener-Ereignisse mit Authentifizierung, Queue und Router
struct RelaisHandler {
    queue: NachrichtenQueue,
    sender: Arc<VerbindungsSender>,
    auth: Arc<dyn Authentifizierer>,
    router: Arc<dyn AnfrageRouter>,
}

impl RelaisHandler {
    /// Meldet die Verbindung als Presence des Benutzers an
    ///
    /// Geschlossene oder sich trennende Verbindungen werden nie angemeldet.
    fn presence_auffrischen(&self, user_id: &UserId, verbindung: &Verbindung, session: &Session) {
        if verbindung.ist_beendet() || session.ist_getrennt() {
            return;
        }
        self.queue.verbindung_setzen(user_id.clone(), verbindung.id());

        // Trennung kann waehrend dieses Handlers gemeldet worden sein
        if verbindung.ist_beendet() || session.ist_getrennt() {
            self.queue.verbindung_entfernen_falls(user_id, verbindung.id());
        }
    }

    async fn anfrage_verarbeiten(&self, verbindung: &Verbindung, session: &Session, anfrage: RpcAnfrage) -> RpcAntwort {
        let Some(user_id) = session.user_id().cloned() else {
            if anfrage.method != METHODE_AUTH {
                return RpcAntwort::fehler(
                    anfrage.id,
                    ErrorCode::NotAuthenticated,
                    format!("Nur {METHODE_AUTH} ist vor der Anmeldung erlaubt"),
                );
            }
            return self.authentifizieren(verbindung, session, anfrage).await;
        };

        self.presence_auffrischen(&user_id, verbindung, session);

        if anfrage.method == METHODE_AUTH {
            return RpcAntwort::ok(anfrage.id, json!({ "user_id": user_id.as_str() }));
        }
        self.router.verarbeiten(&user_id, anfrage).await
    }

    async fn authentifizieren(&self, verbindung: &Verbindung, session: &Session, anfrage: RpcAnfrage) -> RpcAntwort {
        let token = match serde_json::from_value::<AuthParams>(anfrage.params) {
            Ok(p) => p.token,
            Err(e) => {
                return RpcAntwort::fehler(anfrage.id, ErrorCode::InvalidRequest, format!("{METHODE_AUTH}: {e}"));
            }
        };

        let Some(user_id) = self.auth.pruefen(&token).await else {
            tracing::info!(conn_id = %verbindung.id(), peer = %verbindung.peer_addr(), "Ungueltiges Token");
            return RpcAntwort::fehler(anfrage.id, ErrorCode::InvalidCredentials, "Ungueltiges Token");
        };

        session.user_id_setzen(user_id);
        // Bei parallelen Anmeldungen gilt die erste
        let Some(user_id) = session.user_id().cloned() else {
            return RpcAntwort::fehler(anfrage.id, ErrorCode::InternalError, "Session ohne Benutzer");
        };

        tracing::info!(conn_id = %verbindung.id(), user_id = %user_id, "Client authentifiziert");
        self.presence_auffrischen(&user_id, verbindung, session);
        RpcAntwort::ok(anfrage.id, json!({ "user_id": user_id.as_str() }))
    }

    async fn antwort_senden(&self, verbindung: &Verbindung, antwort: RpcAntwort) {
        let payload = match RpcNachricht::from(antwort).zu_bytes() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(conn_id = %verbindung.id(), fehler = %e, "Antwort nicht serialisierbar");
                return;
            }
        };
        if let Err(e) = verbindung.frame_senden(&payload).await {
            tracing::debug!(conn_id = %verbindung.id(), fehler = %e, "Antwort konnte nicht gesendet werden");
        }
    }
}

#[async_trait]
impl VerbindungsHandler for RelaisHandler {
    async fn nachricht_empfangen(&self, verbindung: Arc<Verbindung>, session: Arc<Session>, payload: Bytes) {
        if verbindung.ist_beendet() {
            tracing::debug!(conn_id = %verbindung.id(), "Frame einer geschlossenen Verbindung verworfen");
            return;
        }
        let nachricht = match RpcNachricht::aus_bytes(&payload) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(conn_id = %verbindung.id(), fehler = %e, "Ungueltige Nachricht");
                let antwort = RpcAntwort::fehler("", ErrorCode::InvalidRequest, format!("Ungueltiges JSON: {e}"));
                self.antwort_senden(&verbindung, antwort).await;
                return;
            }
        };

        match nachricht {
            RpcNachricht::Anfrage(anfrage) => {
                let method = anfrage.method.clone();
                let antwort = self.anfrage_verarbeiten(&verbindung, &session, anfrage).await;
                let abgewiesen = method == METHODE_AUTH
                    && antwort.error.as_ref().is_some_and(|f| f.code == ErrorCode::InvalidCredentials);

                self.antwort_senden(&verbindung, antwort).await;

                if abgewiesen {
                    verbindung.schliessen().await;
                }
            }
            RpcNachricht::Antwort(antwort) => {
                let Some(user_id) = session.user_id().cloned() else {
                    tracing::debug!(conn_id = %verbindung.id(), "Antwort vor Anmeldung ignoriert");
                    return;
                };
                self.presence_auffrischen(&user_id, &verbindung, &session);

                if !self.sender.antwort_zustellen(verbindung.id(), &antwort) {
                    tracing::debug!(user_id = %user_id, request_id = %antwort.id, "Antwort ohne offene Anfrage");
                }
            }
        }
    }

    async fn verbindung_getrennt(&self, verbindung: Arc<Verbindung>, session: Arc<Session>) {
        let grund = session.trenn_grund();
        let verworfen = self.sender.verbindung_verwerfen(verbindung.id());
        if verworfen > 0 {
            tracing::debug!(conn_id = %verbindung.id(), verworfen, "Offene Antworten der Verbindung verworfen");
        }
        match session.user_id() {
            Some(user_id) => {
                self.queue.verbindung_entfernen_falls(user_id, verbindung.id());
                tracing::info!(
                    conn_id = %verbindung.id(),
                    user_id = %user_id,
                    grund = ?grund,
                    rueckstand = self.queue.rueckstand_laenge(user_id),
                    "Client getrennt"
                );
            }
            None => {
                tracing::debug!(conn_id = %verbindung.id(), grund = ?grund, "Anonyme Verbindung getrennt");
            }
        }
    }
}

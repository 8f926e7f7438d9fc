//! TLS-Listener – Bindet Socket, akzeptiert Verbindungen, startet Lese-Tasks
//!
//! Fuer jede angenommene Verbindung laeuft ein eigener Task: erst der
//! TLS-Handshake, dann die Lese-Schleife. Daten-Frames werden auf eigenen
//! Tasks an den `VerbindungsHandler` uebergeben, ebenso die Trennung.
//!
//! ## Shutdown
//! - `schliessen()` schliesst nur den Listen-Socket; offene Verbindungen laufen weiter
//! - `herunterfahren()` signalisiert zusaetzlich allen Verbindungen das Ende und
//!   wartet (begrenzt) erst auf die Verbindungs-Tasks, dann auf die Handler-Tasks

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use relais_protocol::wire::{Frame, DEFAULT_KOPF_LAENGE, DEFAULT_MAX_FRAME_SIZE};
use relais_protocol::FrameCodec;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::FramedRead;
use tokio_util::task::TaskTracker;

use crate::error::{ListenerError, ListenerResult};
use crate::handler::VerbindungsHandler;
use crate::register::VerbindungsRegister;
use crate::session::{Session, TrennGrund};
use crate::tls;
use crate::verbindung::{Verbindung, VerbindungsZustand};

/// Groesste erlaubte Kopfbreite
pub const MAX_KOPF_LAENGE: usize = 20;

/// Wartezeit nach Erschoepfung der Datei-Deskriptoren
const RESSOURCEN_BACKOFF: Duration = Duration::from_millis(100);

// Linux errno
const ENOMEM: i32 = 12;
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;
const EPROTO: i32 = 71;
const ENOBUFS: i32 = 105;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Laufzeit-Einstellungen des Listeners
#[derive(Debug, Clone)]
pub struct ListenerKonfig {
    /// Breite des Laengenkopfs in Bytes
    pub kopf_laenge: usize,
    /// Maximale Payload pro Frame
    pub max_payload: usize,
    /// Verbindungen ohne Frame in diesem Zeitraum werden getrennt (None = aus)
    pub leerlauf_timeout: Option<Duration>,
    /// Maximale Dauer des TLS-Handshakes
    pub handshake_timeout: Duration,
}

impl Default for ListenerKonfig {
    fn default() -> Self {
        Self {
            kopf_laenge: DEFAULT_KOPF_LAENGE,
            max_payload: DEFAULT_MAX_FRAME_SIZE,
            leerlauf_timeout: None,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ListenerKonfig {
    fn pruefen(&self) -> ListenerResult<()> {
        if self.kopf_laenge == 0 || self.kopf_laenge > MAX_KOPF_LAENGE {
            return Err(ListenerError::Konfiguration(format!(
                "kopf_laenge muss zwischen 1 und {} liegen (war {})",
                MAX_KOPF_LAENGE, self.kopf_laenge
            )));
        }
        if self.max_payload == 0 {
            return Err(ListenerError::Konfiguration(
                "max_payload muss groesser als 0 sein".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// TLS-Listener fuer das Relais-Framing
pub struct Listener {
    /// Wird von `annehmen` uebernommen oder von `schliessen` verworfen
    tcp: Mutex<Option<TcpListener>>,
    lokale_adresse: SocketAddr,
    acceptor: TlsAcceptor,
    codec: FrameCodec,
    konfig: ListenerKonfig,
    register: VerbindungsRegister,
    /// Laufende Verbindungs-Tasks
    verbindungen: TaskTracker,
    /// Laufende Handler-Tasks (Nachrichten und Trennungen)
    anfragen: TaskTracker,
    geschlossen_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
}

impl Listener {
    /// Baut die TLS-Konfiguration und bindet den Socket
    pub async fn binden(
        zertifikat_pem: &[u8],
        schluessel_pem: &[u8],
        adresse: &str,
        konfig: ListenerKonfig,
    ) -> ListenerResult<Self> {
        konfig.pruefen()?;
        let acceptor = tls::acceptor_erstellen(zertifikat_pem, schluessel_pem)?;

        let tcp = TcpListener::bind(adresse)
            .await
            .map_err(|quelle| ListenerError::Bind {
                adresse: adresse.to_string(),
                quelle,
            })?;
        let lokale_adresse = tcp.local_addr()?;

        tracing::info!(
            adresse = %lokale_adresse,
            kopf_laenge = konfig.kopf_laenge,
            "TLS-Listener gebunden"
        );

        let (geschlossen_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            tcp: Mutex::new(Some(tcp)),
            lokale_adresse,
            acceptor,
            codec: FrameCodec::with_limits(konfig.kopf_laenge, konfig.max_payload),
            konfig,
            register: VerbindungsRegister::neu(),
            verbindungen: TaskTracker::new(),
            anfragen: TaskTracker::new(),
            geschlossen_tx,
            shutdown_tx,
        })
    }

    /// Nimmt Verbindungen an, bis der Listener geschlossen wird
    ///
    /// Gibt `Ok(())` zurueck wenn `schliessen` aufgerufen wurde. Fehler
    /// einzelner Verbindungen beenden die Schleife nicht.
    pub async fn annehmen<H: VerbindungsHandler>(&self, handler: Arc<H>) -> ListenerResult<()> {
        let mut geschlossen_rx = self.geschlossen_tx.subscribe();
        let tcp = match self.tcp.lock().take() {
            Some(tcp) => tcp,
            None if *geschlossen_rx.borrow() => return Ok(()),
            None => return Err(ListenerError::BereitsAngenommen),
        };

        let kontext = VerbindungsKontext {
            handler,
            acceptor: self.acceptor.clone(),
            codec: self.codec.clone(),
            leerlauf_timeout: self.konfig.leerlauf_timeout,
            handshake_timeout: self.konfig.handshake_timeout,
            register: self.register.clone(),
            anfragen: self.anfragen.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };

        tracing::info!(adresse = %self.lokale_adresse, "Listener nimmt Verbindungen an");

        loop {
            let geschlossen = *geschlossen_rx.borrow_and_update();
            if geschlossen {
                break;
            }

            tokio::select! {
                ergebnis = tcp.accept() => match ergebnis {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!(peer = %peer_addr, "TCP-Verbindung angenommen");
                        let kontext = kontext.clone();
                        self.verbindungen.spawn(async move {
                            kontext.verbindung_behandeln(stream, peer_addr).await;
                        });
                    }
                    Err(e) => match annahme_fehler_einordnen(&e) {
                        AnnahmeFehler::Verbindung => {
                            tracing::debug!(fehler = %e, "Accept-Fehler einer einzelnen Verbindung");
                        }
                        AnnahmeFehler::Ressourcen => {
                            tracing::warn!(fehler = %e, "Keine Ressourcen fuer neue Verbindungen – warte");
                            tokio::time::sleep(RESSOURCEN_BACKOFF).await;
                        }
                        AnnahmeFehler::Fatal => {
                            tracing::error!(fehler = %e, "Nicht behebbarer Accept-Fehler");
                            return Err(ListenerError::Annahme(e));
                        }
                    },
                },

                // Schliessen-Signal
                Ok(()) = geschlossen_rx.changed() => {}
            }
        }

        tracing::info!(adresse = %self.lokale_adresse, "Listener geschlossen");
        Ok(())
    }

    /// Schliesst den Listen-Socket; offene Verbindungen bleiben bestehen
    pub fn schliessen(&self) {
        let war_geschlossen = self.geschlossen_tx.send_replace(true);
        self.tcp.lock().take();
        if !war_geschlossen {
            tracing::info!(adresse = %self.lokale_adresse, "Listener wird geschlossen");
        }
    }

    /// Schliesst den Listener, trennt alle Verbindungen und wartet auf laufende Tasks
    ///
    /// Gibt `true` zurueck wenn alle Tasks innerhalb von `timeout` beendet wurden.
    pub async fn herunterfahren(&self, timeout: Duration) -> bool {
        self.schliessen();
        self.shutdown_tx.send_replace(true);
        self.verbindungen.close();
        self.anfragen.close();

        let abgeschlossen = tokio::time::timeout(timeout, async {
            self.verbindungen.wait().await;
            self.anfragen.wait().await;
        })
        .await
        .is_ok();

        if abgeschlossen {
            tracing::info!("Listener heruntergefahren");
        } else {
            tracing::warn!(
                offene_verbindungen = self.verbindungen.len(),
                offene_anfragen = self.anfragen.len(),
                timeout_ms = timeout.as_millis() as u64,
                "Shutdown-Timeout erreicht"
            );
            // Verbliebene Verbindungen hart schliessen
            for verbindung in self.register.alle() {
                verbindung.schliessen().await;
            }
        }
        abgeschlossen
    }

    /// Tatsaechlich gebundene Adresse (relevant bei Port 0)
    pub fn lokale_adresse(&self) -> SocketAddr {
        self.lokale_adresse
    }

    /// Register aller aktiven Verbindungen
    pub fn register(&self) -> &VerbindungsRegister {
        &self.register
    }

    pub fn offene_verbindungen(&self) -> usize {
        self.register.anzahl()
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("lokale_adresse", &self.lokale_adresse)
            .field("konfig", &self.konfig)
            .field("offene_verbindungen", &self.register.anzahl())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pro-Verbindung
// ---------------------------------------------------------------------------

/// Alles, was ein Verbindungs-Task vom Listener braucht
struct VerbindungsKontext<H> {
    handler: Arc<H>,
    acceptor: TlsAcceptor,
    codec: FrameCodec,
    leerlauf_timeout: Option<Duration>,
    handshake_timeout: Duration,
    register: VerbindungsRegister,
    anfragen: TaskTracker,
    shutdown_rx: watch::Receiver<bool>,
}

impl<H> Clone for VerbindungsKontext<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            acceptor: self.acceptor.clone(),
            codec: self.codec.clone(),
            leerlauf_timeout: self.leerlauf_timeout,
            handshake_timeout: self.handshake_timeout,
            register: self.register.clone(),
            anfragen: self.anfragen.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
        }
    }
}

impl<H: VerbindungsHandler> VerbindungsKontext<H> {
    /// Handshake, Lese-Schleife und Aufraeumen einer Verbindung
    async fn verbindung_behandeln(self, stream: TcpStream, peer_addr: SocketAddr) {
        let tls = match tokio::time::timeout(self.handshake_timeout, self.acceptor.accept(stream)).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => {
                tracing::warn!(peer = %peer_addr, fehler = %e, "TLS-Handshake fehlgeschlagen – Verbindung abgelehnt");
                return;
            }
            Err(_) => {
                tracing::warn!(peer = %peer_addr, "TLS-Handshake Timeout – Verbindung abgelehnt");
                return;
            }
        };

        let client_zertifikat = tls
            .get_ref()
            .1
            .peer_certificates()
            .is_some_and(|kette| !kette.is_empty());

        let (leser, schreiber) = tokio::io::split(tls);
        let verbindung = Arc::new(Verbindung::neu(
            peer_addr,
            schreiber,
            self.codec.clone(),
            client_zertifikat,
        ));
        let session = Arc::new(Session::neu());

        self.register.einfuegen(Arc::clone(&verbindung));
        verbindung.zustand_wechseln(VerbindungsZustand::Aktiv);
        tracing::debug!(
            conn_id = %verbindung.id(),
            peer = %peer_addr,
            client_zertifikat,
            "Verbindung aktiv"
        );

        let grund = self.lese_schleife(leser, &verbindung, &session).await;

        // Aufraeumen auf jedem Pfad
        verbindung.zustand_wechseln(VerbindungsZustand::Trennend);
        session.als_getrennt_markieren(grund);
        self.register.entfernen(verbindung.id());
        verbindung.schliessen().await;

        tracing::debug!(conn_id = %verbindung.id(), peer = %peer_addr, grund = %grund, "Verbindung beendet");

        let handler = Arc::clone(&self.handler);
        self.anfragen.spawn(async move {
            handler.verbindung_getrennt(verbindung, session).await;
        });
    }

    /// Liest Frames bis zu einer Ende-Bedingung und liefert deren Grund
    async fn lese_schleife<R>(
        &self,
        leser: R,
        verbindung: &Arc<Verbindung>,
        session: &Arc<Session>,
    ) -> TrennGrund
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(leser, self.codec.clone());
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut geschlossen_rx = verbindung.geschlossen_signal();

        loop {
            let naechster = tokio::select! {
                _ = shutdown_abwarten(&mut shutdown_rx) => return TrennGrund::Shutdown,
                _ = shutdown_abwarten(&mut geschlossen_rx) => return TrennGrund::Geschlossen,
                _ = leerlauf_abwarten(self.leerlauf_timeout) => {
                    tracing::debug!(conn_id = %verbindung.id(), "Leerlauf-Timeout");
                    return TrennGrund::Leerlauf;
                }
                frame = frames.next() => frame,
            };

            match naechster {
                Some(Ok(Frame::Ping)) => {
                    tracing::trace!(conn_id = %verbindung.id(), "Ping");
                }
                Some(Ok(Frame::Schliessen)) => return TrennGrund::CloseFrame,
                Some(Ok(Frame::Daten(payload))) => {
                    let handler = Arc::clone(&self.handler);
                    let verbindung = Arc::clone(verbindung);
                    let session = Arc::clone(session);
                    self.anfragen.spawn(async move {
                        handler.nachricht_empfangen(verbindung, session, payload).await;
                    });
                }
                None => return TrennGrund::Eof,
                Some(Err(e)) if ist_normales_ende(&e) => {
                    tracing::trace!(conn_id = %verbindung.id(), fehler = %e, "Stream beendet");
                    return TrennGrund::Eof;
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        conn_id = %verbindung.id(),
                        peer = %verbindung.peer_addr(),
                        fehler = %e,
                        "Lesefehler – Verbindung wird getrennt"
                    );
                    session.fehler_setzen(e.to_string());
                    return TrennGrund::Lesefehler;
                }
            }
        }
    }
}

/// Wartet bis das Signal `true` zeigt
async fn shutdown_abwarten(rx: &mut watch::Receiver<bool>) {
    loop {
        let aktiv = *rx.borrow_and_update();
        if aktiv {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn leerlauf_abwarten(timeout: Option<Duration>) {
    match timeout {
        Some(dauer) => tokio::time::sleep(dauer).await,
        None => std::future::pending::<()>().await,
    }
}

// ---------------------------------------------------------------------------
// Fehler-Einordnung
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum AnnahmeFehler {
    /// Betrifft nur die eine Verbindung
    Verbindung,
    /// Deskriptoren oder Puffer erschoepft
    Ressourcen,
    Fatal,
}

fn annahme_fehler_einordnen(e: &std::io::Error) -> AnnahmeFehler {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionRefused
        | ErrorKind::Interrupted
        | ErrorKind::TimedOut
        | ErrorKind::WouldBlock => AnnahmeFehler::Verbindung,
        _ => match e.raw_os_error() {
            Some(EPROTO) => AnnahmeFehler::Verbindung,
            Some(ENFILE | EMFILE | ENOBUFS | ENOMEM) => AnnahmeFehler::Ressourcen,
            _ => AnnahmeFehler::Fatal,
        },
    }
}

/// Lesefehler, die als gewoehnliches Verbindungsende gelten
fn ist_normales_ende(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Verbindung – Schreibseite und Lebenszyklus einer TLS-Verbindung
//!
//! Die Leseseite gehoert exklusiv dem Lese-Task des Listeners. Eine
//! `Verbindung` kapselt die Schreibseite, sodass Handler und Queue-Sender
//! parallel Frames an den Client senden koennen. `schliessen()` beendet
//! ueber ein Signal auch den Lese-Task.

use std::net::SocketAddr;

use bytes::BytesMut;
use parking_lot::Mutex;
use relais_core::ConnId;
use relais_protocol::FrameCodec;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

type Schreiber = Box<dyn AsyncWrite + Send + Unpin>;

/// Lebenszyklus einer Verbindung
///
/// Uebergaenge laufen nur vorwaerts: Offen -> Aktiv -> Trennend -> Geschlossen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerbindungsZustand {
    /// TLS-Handshake abgeschlossen, Lese-Task noch nicht gestartet
    Offen,
    /// Lese-Task laeuft
    Aktiv,
    /// Lese-Task beendet, Aufraeumen laeuft
    Trennend,
    /// Socket geschlossen
    Geschlossen,
}

/// Eine angenommene TLS-Verbindung
pub struct Verbindung {
    id: ConnId,
    peer_addr: SocketAddr,
    client_zertifikat: bool,
    codec: FrameCodec,
    zustand: Mutex<VerbindungsZustand>,
    schreiber: tokio::sync::Mutex<Schreiber>,
    geschlossen_tx: watch::Sender<bool>,
}

impl Verbindung {
    /// Erstellt eine Verbindung im Zustand `Offen`
    pub fn neu<W>(peer_addr: SocketAddr, schreiber: W, codec: FrameCodec, client_zertifikat: bool) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id: ConnId::new(),
            peer_addr,
            client_zertifikat,
            codec,
            zustand: Mutex::new(VerbindungsZustand::Offen),
            schreiber: tokio::sync::Mutex::new(Box::new(schreiber)),
            geschlossen_tx: watch::channel(false).0,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// true wenn der Client im Handshake ein (gueltiges) Zertifikat praesentiert hat
    pub fn hat_client_zertifikat(&self) -> bool {
        self.client_zertifikat
    }

    pub fn zustand(&self) -> VerbindungsZustand {
        *self.zustand.lock()
    }

    /// Setzt den Zustand, falls er damit vorwaerts wechselt
    ///
    /// Gibt `true` zurueck wenn der Uebergang stattgefunden hat.
    pub(crate) fn zustand_wechseln(&self, neu: VerbindungsZustand) -> bool {
        let mut zustand = self.zustand.lock();
        if *zustand >= neu {
            return false;
        }
        *zustand = neu;
        true
    }

    /// true sobald `schliessen` aufgerufen oder der Lese-Task beendet wurde
    pub fn ist_beendet(&self) -> bool {
        self.zustand() >= VerbindungsZustand::Trennend
    }

    /// Empfaenger, der `true` sieht sobald `schliessen` aufgerufen wurde
    pub(crate) fn geschlossen_signal(&self) -> watch::Receiver<bool> {
        self.geschlossen_tx.subscribe()
    }

    /// Schreibt rohe Bytes auf den Stream
    pub async fn schreiben(&self, daten: &[u8]) -> std::io::Result<()> {
        if self.zustand() == VerbindungsZustand::Geschlossen {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("Verbindung {} ist geschlossen", self.id),
            ));
        }
        let mut schreiber = self.schreiber.lock().await;
        schreiber.write_all(daten).await?;
        schreiber.flush().await
    }

    /// Kodiert `payload` als Frame und schreibt ihn
    pub async fn frame_senden(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut puffer = BytesMut::with_capacity(self.codec.kopf_laenge() + payload.len());
        self.codec.kodieren(payload, &mut puffer)?;
        self.schreiben(&puffer).await
    }

    /// Schliesst die Verbindung: Lese-Task wird beendet, Schreibseite heruntergefahren
    ///
    /// Mehrfache Aufrufe sind unschaedlich.
    pub async fn schliessen(&self) {
        if !self.zustand_wechseln(VerbindungsZustand::Geschlossen) {
            return;
        }
        self.geschlossen_tx.send_replace(true);
        let mut schreiber = self.schreiber.lock().await;
        if let Err(e) = schreiber.shutdown().await {
            tracing::trace!(conn_id = %self.id, fehler = %e, "Shutdown der Schreibseite fehlgeschlagen");
        }
    }
}

impl std::fmt::Debug for Verbindung {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verbindung")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("zustand", &self.zustand())
            .field("client_zertifikat", &self.client_zertifikat)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

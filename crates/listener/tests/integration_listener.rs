//! Integration-Tests fuer den TLS-Listener
//!
//! Jeder Test startet einen Listener auf 127.0.0.1:0 mit einem frisch
//! generierten selbstsignierten Zertifikat und verbindet sich mit einem
//! tokio-rustls Client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use relais_core::ConnId;
use relais_listener::{
    Listener, ListenerError, ListenerKonfig, Session, TrennGrund, Verbindung, VerbindungsHandler,
};
use relais_protocol::wire::{read_frame, write_frame};
use relais_protocol::{Frame, FrameCodec};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Ereignis {
    Nachricht {
        conn_id: ConnId,
        payload: Bytes,
        client_zertifikat: bool,
    },
    Getrennt {
        conn_id: ConnId,
        grund: Option<TrennGrund>,
        fehler: Option<String>,
    },
}

/// Payload, nach dessen Echo der Handler die Verbindung schliesst
const ABSCHIED: &[u8] = b"tschuess";

/// Meldet alle Ereignisse und schickt Daten-Frames als Echo zurueck
struct EchoHandler {
    tx: mpsc::UnboundedSender<Ereignis>,
}

#[async_trait]
impl VerbindungsHandler for EchoHandler {
    async fn nachricht_empfangen(&self, verbindung: Arc<Verbindung>, _session: Arc<Session>, payload: Bytes) {
        let _ = verbindung.frame_senden(&payload).await;
        let abschied = &payload[..] == ABSCHIED;
        let _ = self.tx.send(Ereignis::Nachricht {
            conn_id: verbindung.id(),
            payload,
            client_zertifikat: verbindung.hat_client_zertifikat(),
        });
        if abschied {
            verbindung.schliessen().await;
        }
    }

    async fn verbindung_getrennt(&self, verbindung: Arc<Verbindung>, session: Arc<Session>) {
        let _ = self.tx.send(Ereignis::Getrennt {
            conn_id: verbindung.id(),
            grund: session.trenn_grund(),
            fehler: session.letzter_fehler(),
        });
    }
}

struct TestZertifikat {
    cert_pem: String,
    key_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

fn test_zertifikat() -> TestZertifikat {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    params.extended_key_usages = vec![
        rcgen::ExtendedKeyUsagePurpose::ServerAuth,
        rcgen::ExtendedKeyUsagePurpose::ClientAuth,
    ];
    let cert = params.self_signed(&key_pair).unwrap();
    TestZertifikat {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
        cert_der: cert.der().clone(),
        key_der: key_pair.serialize_der(),
    }
}

struct TestServer {
    listener: Arc<Listener>,
    annahme: JoinHandle<Result<(), ListenerError>>,
    ereignisse: mpsc::UnboundedReceiver<Ereignis>,
    zertifikat: TestZertifikat,
}

impl TestServer {
    async fn starten(konfig: ListenerKonfig) -> Self {
        let zertifikat = test_zertifikat();
        let listener = Arc::new(
            Listener::binden(
                zertifikat.cert_pem.as_bytes(),
                zertifikat.key_pem.as_bytes(),
                "127.0.0.1:0",
                konfig,
            )
            .await
            .unwrap(),
        );

        let (tx, ereignisse) = mpsc::unbounded_channel();
        let handler = Arc::new(EchoHandler { tx });
        let annahme = {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { listener.annehmen(handler).await })
        };

        Self {
            listener,
            annahme,
            ereignisse,
            zertifikat,
        }
    }

    fn adresse(&self) -> SocketAddr {
        self.listener.lokale_adresse()
    }

    async fn verbinden(&self) -> TlsStream<TcpStream> {
        self.verbinden_mit(self.client_config(false)).await
    }

    async fn verbinden_mit(&self, config: ClientConfig) -> TlsStream<TcpStream> {
        let connector = TlsConnector::from(Arc::new(config));
        let tcp = TcpStream::connect(self.adresse()).await.unwrap();
        let name = ServerName::try_from("localhost").unwrap();
        connector.connect(name, tcp).await.unwrap()
    }

    fn client_config(&self, mit_client_zertifikat: bool) -> ClientConfig {
        let mut roots = RootCertStore::empty();
        roots.add(self.zertifikat.cert_der.clone()).unwrap();
        let builder = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots);

        if mit_client_zertifikat {
            let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.zertifikat.key_der.clone()));
            builder
                .with_client_auth_cert(vec![self.zertifikat.cert_der.clone()], key)
                .unwrap()
        } else {
            builder.with_no_client_auth()
        }
    }

    async fn naechstes_ereignis(&mut self) -> Ereignis {
        tokio::time::timeout(Duration::from_secs(5), self.ereignisse.recv())
            .await
            .expect("Ereignis erwartet")
            .expect("Handler-Kanal offen")
    }

    async fn keine_weiteren_ereignisse(&mut self) {
        let ergebnis = tokio::time::timeout(Duration::from_millis(200), self.ereignisse.recv()).await;
        assert!(
            !matches!(ergebnis, Ok(Some(_))),
            "Kein weiteres Ereignis erwartet: {:?}",
            ergebnis
        );
    }
}

async fn roh_senden(stream: &mut TlsStream<TcpStream>, daten: &[u8]) {
    stream.write_all(daten).await.unwrap();
    stream.flush().await.unwrap();
}

async fn echo_lesen(stream: &mut TlsStream<TcpStream>) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), read_frame(stream, &FrameCodec::new()))
        .await
        .expect("Echo erwartet")
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_erreicht_handler_nie() {
    let mut server = TestServer::starten(ListenerKonfig::default()).await;
    let mut client = server.verbinden().await;

    roh_senden(&mut client, b"4   ping").await;
    roh_senden(&mut client, b"5   hallo").await;

    match server.naechstes_ereignis().await {
        Ereignis::Nachricht { payload, .. } => assert_eq!(&payload[..], b"hallo"),
        anderes => panic!("Nachricht erwartet, war {:?}", anderes),
    }
    assert_eq!(echo_lesen(&mut client).await, Frame::Daten(Bytes::from_static(b"hallo")));
    server.keine_weiteren_ereignisse().await;
}

#[tokio::test]
async fn daten_frames_mit_payload_werden_zugestellt() {
    let mut server = TestServer::starten(ListenerKonfig::default()).await;
    let mut client = server.verbinden().await;

    let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.";
    write_frame(&mut client, text.as_bytes(), &FrameCodec::new()).await.unwrap();

    match server.naechstes_ereignis().await {
        Ereignis::Nachricht { payload, client_zertifikat, .. } => {
            assert_eq!(&payload[..], text.as_bytes());
            assert!(!client_zertifikat);
        }
        anderes => panic!("Nachricht erwartet, war {:?}", anderes),
    }
}

#[tokio::test]
async fn close_frame_loest_genau_eine_trennung_aus() {
    let mut server = TestServer::starten(ListenerKonfig::default()).await;
    let mut client = server.verbinden().await;

    roh_senden(&mut client, b"5   close").await;

    match server.naechstes_ereignis().await {
        Ereignis::Getrennt { grund, fehler, .. } => {
            assert_eq!(grund, Some(TrennGrund::CloseFrame));
            assert_eq!(fehler, None);
        }
        anderes => panic!("Trennung erwartet, war {:?}", anderes),
    }
    server.keine_weiteren_ereignisse().await;

    // Client beobachtet eine geschlossene Verbindung
    let mut rest = Vec::new();
    let gelesen = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
        .await
        .expect("Verbindungsende erwartet");
    assert!(gelesen.map(|n| n == 0).unwrap_or(true));
    assert_eq!(server.listener.offene_verbindungen(), 0);
}

#[tokio::test]
async fn schliessen_durch_handler_beendet_lese_task() {
    let mut server = TestServer::starten(ListenerKonfig::default()).await;
    let mut client = server.verbinden().await;

    write_frame(&mut client, ABSCHIED, &FrameCodec::new()).await.unwrap();

    match server.naechstes_ereignis().await {
        Ereignis::Nachricht { payload, .. } => assert_eq!(&payload[..], ABSCHIED),
        anderes => panic!("Nachricht erwartet, war {:?}", anderes),
    }
    match server.naechstes_ereignis().await {
        Ereignis::Getrennt { grund, .. } => assert_eq!(grund, Some(TrennGrund::Geschlossen)),
        anderes => panic!("Trennung erwartet, war {:?}", anderes),
    }

    // Weitere Frames erreichen den Handler nicht mehr
    let _ = client.write_all(b"5   hallo").await;
    let _ = client.flush().await;
    server.keine_weiteren_ereignisse().await;
    assert_eq!(server.listener.offene_verbindungen(), 0);
}

#[tokio::test]
async fn eof_loest_trennung_aus() {
    let mut server = TestServer::starten(ListenerKonfig::default()).await;
    let mut client = server.verbinden().await;

    client.shutdown().await.unwrap();
    drop(client);

    match server.naechstes_ereignis().await {
        Ereignis::Getrennt { grund, .. } => assert_eq!(grund, Some(TrennGrund::Eof)),
        anderes => panic!("Trennung erwartet, war {:?}", anderes),
    }
    server.keine_weiteren_ereignisse().await;
}

#[tokio::test]
async fn ungueltiger_kopf_trennt_nur_diese_verbindung() {
    let mut server = TestServer::starten(ListenerKonfig::default()).await;
    let mut kaputt = server.verbinden().await;
    let mut intakt = server.verbinden().await;

    roh_senden(&mut kaputt, b"abcdxyz").await;

    let kaputt_id = match server.naechstes_ereignis().await {
        Ereignis::Getrennt { conn_id, grund, fehler } => {
            assert_eq!(grund, Some(TrennGrund::Lesefehler));
            assert!(fehler.is_some());
            conn_id
        }
        anderes => panic!("Trennung erwartet, war {:?}", anderes),
    };

    roh_senden(&mut intakt, b"2   ok").await;
    match server.naechstes_ereignis().await {
        Ereignis::Nachricht { conn_id, payload, .. } => {
            assert_ne!(conn_id, kaputt_id);
            assert_eq!(&payload[..], b"ok");
        }
        anderes => panic!("Nachricht erwartet, war {:?}", anderes),
    }
}

#[tokio::test]
async fn nicht_tls_client_wird_abgelehnt() {
    let mut server = TestServer::starten(ListenerKonfig::default()).await;
    let mut intakt = server.verbinden().await;

    let mut roh = TcpStream::connect(server.adresse()).await.unwrap();
    roh.write_all(b"4   ping5   hallo").await.unwrap();

    // Server beendet die Klartext-Verbindung
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), roh.read_to_end(&mut rest))
        .await
        .expect("Server muss die Verbindung beenden")
        .ok();

    // Die TLS-Verbindung laeuft unbeeinflusst weiter
    roh_senden(&mut intakt, b"3   hey").await;
    match server.naechstes_ereignis().await {
        Ereignis::Nachricht { payload, .. } => assert_eq!(&payload[..], b"hey"),
        anderes => panic!("Nachricht erwartet, war {:?}", anderes),
    }
    assert_eq!(echo_lesen(&mut intakt).await, Frame::Daten(Bytes::from_static(b"hey")));
}

#[tokio::test]
async fn schliessen_beendet_annehmen_und_laesst_verbindungen_offen() {
    let mut server = TestServer::starten(ListenerKonfig::default()).await;
    let mut client = server.verbinden().await;

    server.listener.schliessen();
    let ergebnis = tokio::time::timeout(Duration::from_secs(5), &mut server.annahme)
        .await
        .expect("annehmen muss zurueckkehren")
        .unwrap();
    assert!(ergebnis.is_ok());

    // Bestehende Verbindung funktioniert weiter
    roh_senden(&mut client, b"5   noch?").await;
    match server.naechstes_ereignis().await {
        Ereignis::Nachricht { payload, .. } => assert_eq!(&payload[..], b"noch?"),
        anderes => panic!("Nachricht erwartet, war {:?}", anderes),
    }
    assert_eq!(echo_lesen(&mut client).await, Frame::Daten(Bytes::from_static(b"noch?")));

    // Neue Verbindungen werden nicht mehr angenommen
    assert!(TcpStream::connect(server.adresse()).await.is_err());
}

#[tokio::test]
async fn zweites_annehmen_ist_fehler() {
    let server = TestServer::starten(ListenerKonfig::default()).await;
    // Warten bis der erste Aufruf den Socket uebernommen hat
    let _client = server.verbinden().await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let ergebnis = server.listener.annehmen(Arc::new(EchoHandler { tx })).await;
    assert!(matches!(ergebnis, Err(ListenerError::BereitsAngenommen)));
}

#[tokio::test]
async fn leerlauf_timeout_trennt_stille_verbindung() {
    let konfig = ListenerKonfig {
        leerlauf_timeout: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let mut server = TestServer::starten(konfig).await;
    let _client = server.verbinden().await;

    match server.naechstes_ereignis().await {
        Ereignis::Getrennt { grund, .. } => assert_eq!(grund, Some(TrennGrund::Leerlauf)),
        anderes => panic!("Trennung erwartet, war {:?}", anderes),
    }
}

#[tokio::test]
async fn herunterfahren_trennt_offene_verbindungen() {
    let mut server = TestServer::starten(ListenerKonfig::default()).await;
    let _a = server.verbinden().await;
    let _b = server.verbinden().await;

    // Beide Verbindungen sind registriert sobald ihr Lese-Task laeuft
    for _ in 0..50 {
        if server.listener.offene_verbindungen() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.listener.offene_verbindungen(), 2);

    assert!(server.listener.herunterfahren(Duration::from_secs(5)).await);

    for _ in 0..2 {
        match server.naechstes_ereignis().await {
            Ereignis::Getrennt { grund, .. } => assert_eq!(grund, Some(TrennGrund::Shutdown)),
            anderes => panic!("Trennung erwartet, war {:?}", anderes),
        }
    }
    assert_eq!(server.listener.offene_verbindungen(), 0);
    assert!(server.annahme.await.unwrap().is_ok());
}

#[tokio::test]
async fn client_zertifikat_wird_erkannt() {
    let mut server = TestServer::starten(ListenerKonfig::default()).await;
    let config = server.client_config(true);
    let mut client = server.verbinden_mit(config).await;

    roh_senden(&mut client, b"4   cert").await;
    match server.naechstes_ereignis().await {
        Ereignis::Nachricht { client_zertifikat, .. } => assert!(client_zertifikat),
        anderes => panic!("Nachricht erwartet, war {:?}", anderes),
    }
}

#[tokio::test]
async fn ungueltiges_zertifikat_wird_beim_binden_abgelehnt() {
    let ergebnis = Listener::binden(b"kein zertifikat", b"kein schluessel", "127.0.0.1:0", ListenerKonfig::default()).await;
    assert!(matches!(ergebnis, Err(ListenerError::Konfiguration(_))));
}

#[tokio::test]
async fn unbindbare_adresse_ist_fehler() {
    let zertifikat = test_zertifikat();
    let ergebnis = Listener::binden(
        zertifikat.cert_pem.as_bytes(),
        zertifikat.key_pem.as_bytes(),
        "keine-adresse",
        ListenerKonfig::default(),
    )
    .await;
    assert!(matches!(ergebnis, Err(ListenerError::Bind { .. })));
}

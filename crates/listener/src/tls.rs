//! TLS-Konfiguration fuer den Listener
//!
//! Client-Zertifikate sind optional: wird eines praesentiert, muss es gegen
//! das Server-Zertifikat als Vertrauensanker verifizierbar sein. Clients
//! ohne Zertifikat werden zugelassen.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pemfile::{certs, private_key};
use tokio_rustls::TlsAcceptor;

use crate::error::{ListenerError, ListenerResult};

/// Baut einen TlsAcceptor aus PEM-kodiertem Zertifikat und Schluessel
pub fn acceptor_erstellen(zertifikat_pem: &[u8], schluessel_pem: &[u8]) -> ListenerResult<TlsAcceptor> {
    let kette = zertifikate_parsen(zertifikat_pem)?;
    let schluessel = schluessel_parsen(schluessel_pem)?;
    let provider: Arc<CryptoProvider> = Arc::new(rustls::crypto::ring::default_provider());

    let mut anker = RootCertStore::empty();
    for zertifikat in &kette {
        anker
            .add(zertifikat.clone())
            .map_err(|e| ListenerError::Konfiguration(format!("Vertrauensanker ungueltig: {}", e)))?;
    }

    let client_verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(anker), Arc::clone(&provider))
            .allow_unauthenticated()
            .build()
            .map_err(|e| ListenerError::Konfiguration(format!("Client-Verifier: {}", e)))?;

    let tls_config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ListenerError::Konfiguration(format!("TLS-Versionen: {}", e)))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(kette, schluessel)
        .map_err(|e| ListenerError::Konfiguration(format!("Zertifikat/Schluessel: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

fn zertifikate_parsen(pem: &[u8]) -> ListenerResult<Vec<CertificateDer<'static>>> {
    let mut cursor = std::io::Cursor::new(pem);
    let kette = certs(&mut cursor)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ListenerError::Konfiguration(format!("Zertifikat-Parsing fehlgeschlagen: {}", e)))?;
    if kette.is_empty() {
        return Err(ListenerError::Konfiguration(
            "Kein Zertifikat gefunden".to_string(),
        ));
    }
    Ok(kette)
}

fn schluessel_parsen(pem: &[u8]) -> ListenerResult<PrivateKeyDer<'static>> {
    let mut cursor = std::io::Cursor::new(pem);
    private_key(&mut cursor)
        .map_err(|e| ListenerError::Konfiguration(format!("Schluessel-Parsing fehlgeschlagen: {}", e)))?
        .ok_or_else(|| ListenerError::Konfiguration("Kein privater Schluessel gefunden".to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_zertifikat() -> (String, String) {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }

    #[test]
    fn acceptor_aus_gueltigem_pem() {
        let (cert, key) = test_zertifikat();
        assert!(acceptor_erstellen(cert.as_bytes(), key.as_bytes()).is_ok());
    }

    #[test]
    fn leeres_zertifikat_ist_konfigurationsfehler() {
        let (_, key) = test_zertifikat();
        let fehler = acceptor_erstellen(b"", key.as_bytes()).err().expect("Fehler erwartet");
        assert!(matches!(fehler, ListenerError::Konfiguration(_)));
    }

    #[test]
    fn fehlender_schluessel_ist_konfigurationsfehler() {
        let (cert, _) = test_zertifikat();
        let fehler = acceptor_erstellen(cert.as_bytes(), b"kein pem").err().expect("Fehler erwartet");
        assert!(matches!(fehler, ListenerError::Konfiguration(_)));
    }
}

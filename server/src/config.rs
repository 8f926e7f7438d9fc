//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte; ohne Konfigurationsdatei fehlen lediglich
//! die Pfade zu Zertifikat und Schluessel.

use std::collections::HashMap;
use std::time::Duration;

use relais_listener::ListenerKonfig;
use relais_protocol::wire::DEFAULT_KOPF_LAENGE;
use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk- und TLS-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Framing und Zeitlimits pro Verbindung
    pub verbindung: VerbindungsEinstellungen,
    /// Graceful Shutdown
    pub shutdown: ShutdownEinstellungen,
    /// Statische Token-Tabelle
    pub auth: AuthEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers (nur fuer Logs)
    pub name: String,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Relais".into(),
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer den TLS-Listener
    pub bind_adresse: String,
    /// Port fuer den TLS-Listener
    pub port: u16,
    /// Pfad zum PEM-Zertifikat (Kette)
    pub tls_zertifikat: String,
    /// Pfad zum PEM-Schluessel
    pub tls_schluessel: String,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 3000,
            tls_zertifikat: "cert.pem".into(),
            tls_schluessel: "key.pem".into(),
        }
    }
}

/// Framing und Zeitlimits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// Breite des ASCII-Laengenkopfs in Bytes
    pub kopf_laenge: usize,
    /// Maximale Payload pro Frame
    pub max_payload_bytes: usize,
    /// Leerlauf-Timeout in Sekunden (0 = aus)
    pub leerlauf_timeout_sek: u64,
    /// Maximale Dauer des TLS-Handshakes in Sekunden
    pub handshake_timeout_sek: u64,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            kopf_laenge: DEFAULT_KOPF_LAENGE,
            max_payload_bytes: 9999,
            leerlauf_timeout_sek: 0,
            handshake_timeout_sek: 10,
        }
    }
}

/// Graceful Shutdown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownEinstellungen {
    /// Maximale Wartezeit auf laufende Verbindungen und Handler
    pub timeout_sek: u64,
}

impl Default for ShutdownEinstellungen {
    fn default() -> Self {
        Self { timeout_sek: 10 }
    }
}

/// Statische Token-Tabelle (Token -> Benutzer-ID)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEinstellungen {
    pub tokens: HashMap<String, String>,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Filter-Direktive, z.B. "info" oder "relais_queue=debug"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Vollstaendige Bind-Adresse des TLS-Listeners
    pub fn bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }

    /// Listener-Einstellungen aus dem Abschnitt `verbindung`
    pub fn listener_konfig(&self) -> ListenerKonfig {
        let v = &self.verbindung;
        ListenerKonfig {
            kopf_laenge: v.kopf_laenge,
            max_payload: v.max_payload_bytes,
            leerlauf_timeout: (v.leerlauf_timeout_sek > 0)
                .then(|| Duration::from_secs(v.leerlauf_timeout_sek)),
            handshake_timeout: Duration::from_secs(v.handshake_timeout_sek),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown.timeout_sek)
    }
}

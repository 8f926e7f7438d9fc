//! Relais Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging, liest Zertifikat und
//! Schluessel und laeuft bis Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use relais_observability::logging_initialisieren;
use relais_server::{config::ServerConfig, RelaisServer};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("RELAIS_CONFIG").unwrap_or_else(|_| "relais.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = ServerConfig::laden(&config_pfad)?;

    let log_format = logging_initialisieren(&config.logging.level, &config.logging.format)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        server_name = %config.server.name,
        log_format = ?log_format,
        "Relais wird initialisiert"
    );

    let zertifikat = std::fs::read(&config.netzwerk.tls_zertifikat)
        .with_context(|| format!("Zertifikat '{}' nicht lesbar", config.netzwerk.tls_zertifikat))?;
    let schluessel = std::fs::read(&config.netzwerk.tls_schluessel)
        .with_context(|| format!("Schluessel '{}' nicht lesbar", config.netzwerk.tls_schluessel))?;

    let server = Arc::new(RelaisServer::binden(&config, &zertifikat, &schluessel).await?);

    let mut annahme = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.starten().await })
    };

    tokio::select! {
        ergebnis = &mut annahme => {
            // Listener endet nur bei nicht behebbarem Accept-Fehler von selbst
            server.herunterfahren().await;
            ergebnis.context("Annahme-Task abgebrochen")??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Ctrl-C-Handler konnte nicht registriert werden")?;
            tracing::info!("Shutdown-Signal empfangen");
        }
    }

    if !server.herunterfahren().await {
        tracing::warn!("Shutdown nicht vollstaendig innerhalb des Timeouts");
    }
    annahme.await.context("Annahme-Task abgebrochen")??;

    tracing::info!("Relais beendet");
    Ok(())
}

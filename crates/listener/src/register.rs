//! Verbindungs-Register – alle aktiven Verbindungen nach ConnId

use std::sync::Arc;

use dashmap::DashMap;
use relais_core::ConnId;

use crate::verbindung::Verbindung;

/// Referenziert (besitzt nicht) die Verbindungen des Listeners
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct VerbindungsRegister {
    verbindungen: Arc<DashMap<ConnId, Arc<Verbindung>>>,
}

impl VerbindungsRegister {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn einfuegen(&self, verbindung: Arc<Verbindung>) {
        self.verbindungen.insert(verbindung.id(), verbindung);
    }

    pub fn entfernen(&self, conn_id: ConnId) -> Option<Arc<Verbindung>> {
        self.verbindungen.remove(&conn_id).map(|(_, v)| v)
    }

    pub fn holen(&self, conn_id: ConnId) -> Option<Arc<Verbindung>> {
        self.verbindungen.get(&conn_id).map(|v| Arc::clone(v.value()))
    }

    pub fn anzahl(&self) -> usize {
        self.verbindungen.len()
    }

    /// Momentaufnahme aller registrierten Verbindungen
    pub fn alle(&self) -> Vec<Arc<Verbindung>> {
        self.verbindungen.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relais_protocol::FrameCodec;

    #[tokio::test]
    async fn einfuegen_holen_entfernen() {
        let register = VerbindungsRegister::neu();
        let (client, _server) = tokio::io::duplex(16);
        let verbindung = Arc::new(Verbindung::neu(
            "127.0.0.1:1".parse().unwrap(),
            client,
            FrameCodec::new(),
            false,
        ));
        let id = verbindung.id();

        register.einfuegen(Arc::clone(&verbindung));
        assert_eq!(register.anzahl(), 1);
        assert!(register.holen(id).is_some());
        assert_eq!(register.alle().len(), 1);

        assert!(register.entfernen(id).is_some());
        assert!(register.holen(id).is_none());
        assert_eq!(register.anzahl(), 0);
    }
}

//! relais-listener – TLS-Listener mit Length-Prefix-Framing
//!
//! Nimmt TLS-Verbindungen an, liest pro Verbindung Frames im Relais-Format
//! und meldet Daten-Frames sowie Trennungen an einen `VerbindungsHandler`.
//! Die Kontroll-Frames `ping` und `close` werden intern verarbeitet.
//!
//! ## Verbindungs-Lebenszyklus
//!
//! ```text
//! accept -> TLS-Handshake -> Offen -> Aktiv -> Trennend -> Geschlossen
//!                 |                        ^
//!                 +-- Fehler: nur diese    +-- EOF, close, Lesefehler,
//!                     Verbindung abgelehnt     Leerlauf, Shutdown
//! ```

pub mod error;
pub mod handler;
pub mod listener;
pub mod register;
pub mod session;
pub mod tls;
pub mod verbindung;

// Bequeme Re-Exporte
pub use error::{ListenerError, ListenerResult};
pub use handler::VerbindungsHandler;
pub use listener::{Listener, ListenerKonfig};
pub use register::VerbindungsRegister;
pub use session::{Session, TrennGrund};
pub use verbindung::{Verbindung, VerbindungsZustand};

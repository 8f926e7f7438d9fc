//! relais-queue – Presence und Offline-Queue
//!
//! Dieses Crate haelt fest, welche Verbindung einen Benutzer gerade
//! repraesentiert, und sammelt ausgehende Anfragen pro Benutzer, bis er
//! erreichbar ist.
//!
//! ## Architektur
//!
//! ```text
//! anfrage_hinzufuegen(user, ...)      verbindung_setzen(user, conn)
//!         |                                   |
//!         v                                   v
//!   Rueckstand (FIFO) ---- Weckruf ----> Zustell-Worker (max. 1 pro User)
//!                                             |
//!                                             v
//!                                  AnfrageSender::senden(conn, anfrage)
//! ```
//!
//! Weckrufe waehrend einer laufenden Zustellung werden zu einer einzigen
//! weiteren Runde zusammengefasst.

pub mod error;
pub mod presence;
pub mod queue;
pub mod sender;

// Bequeme Re-Exporte
pub use error::{QueueError, QueueResult, SendeFehler};
pub use presence::PresenceVerzeichnis;
pub use queue::NachrichtenQueue;
pub use sender::{AnfrageSender, AntwortHandler, WartendeAnfrage};

//! relais-core – Gemeinsame Typen
//!
//! Dieses Crate stellt die ID-Typen bereit, die Listener, Queue und Server
//! gemeinsam verwenden.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{ConnId, UserId};

//! relais-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert das Frame-Format auf dem TLS-Stream und den
//! JSON-Umschlag, mit dem der Server Anfragen und Antworten austauscht.

pub mod rpc;
pub mod wire;

pub use rpc::{ErrorCode, RpcAnfrage, RpcAntwort, RpcFehler, RpcNachricht};
pub use wire::{Frame, FrameCodec};

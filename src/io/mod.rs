//! External interfaces: acceptor serial link, scanner serial link,
//! session-coordination wire protocol

pub mod acceptor;
pub mod scanner;
pub mod wire;

pub use acceptor::{AcceptorHandle, AcceptorLink};
pub use scanner::{LineAssembler, ScanRequest, ScannerLink};
pub use wire::{ClientMessage, ServerMessage};

//! Core domain types: session record, command alphabet, check outcomes

pub mod session;
pub mod types;

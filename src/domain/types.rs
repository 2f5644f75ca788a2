//! Shared types for the device gateway

use serde::{Deserialize, Serialize};

/// Session identifier assigned by the coordination service
pub type SessionId = i64;

/// Single-byte command alphabet understood by the acceptor controller.
///
/// Each command is written as its ASCII byte followed by a newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorCommand {
    /// `S` - open the acceptor, session start
    Start,
    /// `E` - close the acceptor, session end
    End,
    /// `P` - accept the deposited item as plastic
    AcceptPlastic,
    /// `A` - accept the deposited item as aluminum
    AcceptAluminum,
    /// `R` - reject the deposited item
    Reject,
}

impl AcceptorCommand {
    pub fn as_byte(&self) -> u8 {
        match self {
            AcceptorCommand::Start => b'S',
            AcceptorCommand::End => b'E',
            AcceptorCommand::AcceptPlastic => b'P',
            AcceptorCommand::AcceptAluminum => b'A',
            AcceptorCommand::Reject => b'R',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptorCommand::Start => "S",
            AcceptorCommand::End => "E",
            AcceptorCommand::AcceptPlastic => "P",
            AcceptorCommand::AcceptAluminum => "A",
            AcceptorCommand::Reject => "R",
        }
    }

    /// Map a bottle material name to the accept/reject command.
    ///
    /// Matching is case-insensitive and by prefix ("plast", "alum") so
    /// catalog variants like "Plastic (PET)" still map correctly.
    /// Anything unrecognized rejects.
    pub fn for_material(material: Option<&str>) -> Self {
        let Some(material) = material else {
            return AcceptorCommand::Reject;
        };
        let m = material.to_ascii_lowercase();
        if m.starts_with("plast") {
            AcceptorCommand::AcceptPlastic
        } else if m.starts_with("alum") {
            AcceptorCommand::AcceptAluminum
        } else {
            AcceptorCommand::Reject
        }
    }
}

impl std::fmt::Display for AcceptorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bottle record returned by the service on a positive check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottle {
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Resolution of one bottle check exchange
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// The bottle exists in the catalog and was accepted
    Accepted { code: String, material: String },
    /// The bottle is unknown; the item was rejected
    NotFound,
}

/// Why a session stopped being active. Drives the log wording so the
/// three closure paths stay distinguishable in the scan log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureCause {
    ServerCancel,
    Inactivity,
    Hardware,
}

impl ClosureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClosureCause::ServerCancel => "server_cancel",
            ClosureCause::Inactivity => "inactivity",
            ClosureCause::Hardware => "hardware",
        }
    }
}

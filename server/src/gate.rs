//! Precondition gate
//!
//! Maps each client opcode to the least connection state allowed to send it.
//! Codes without an explicit entry require the connection to be in the world.
//! A refused frame is dropped without reaching its handler and without
//! surfacing an error; the connection keeps running.

use log::debug;
use shared::{ClientCode, ConnectionState, Requirement};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct PreconditionGate {
    requirements: HashMap<u8, Requirement>,
    default: Requirement,
}

impl Default for PreconditionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PreconditionGate {
    pub fn new() -> Self {
        Self {
            requirements: HashMap::new(),
            default: Requirement::InWorld,
        }
    }

    pub fn require(&mut self, code: ClientCode, requirement: Requirement) {
        self.requirements.insert(code.as_u8(), requirement);
    }

    pub fn requirement(&self, code: u8) -> Requirement {
        self.requirements.get(&code).copied().unwrap_or(self.default)
    }

    /// Whether a connection in `state` may dispatch `code`
    pub fn authorize(&self, code: u8, state: ConnectionState) -> bool {
        let requirement = self.requirement(code);
        let allowed = requirement.is_met_by(state);
        if !allowed {
            debug!(
                "Gate refused 0x{:02X}: requires {:?}, connection is {}",
                code, requirement, state
            );
        }
        allowed
    }
}

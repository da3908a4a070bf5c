//! Handler registry
//!
//! One table per protocol family, filled by explicit [`HandlerRegistry::register`]
//! calls at start-up and read-only afterwards. A connection only resolves
//! handlers from the family its client build belongs to.

use crate::context::HandlerContext;
use crate::error::PipelineError;
use shared::{ClientCode, Frame, ProtocolFamily};
use std::collections::HashMap;
use std::sync::Arc;

/// Business logic for one client opcode
///
/// Handlers run synchronously inside the connection's dispatch slot. Any
/// `Err` ends the connection.
pub trait PacketHandler: Send + Sync {
    /// Identity reported by slow-dispatch warnings
    fn name(&self) -> &'static str;

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    tables: HashMap<ProtocolFamily, HashMap<u8, Arc<dyn PacketHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `code` in one family, replacing any previous
    /// registration
    pub fn register(&mut self, family: ProtocolFamily, code: ClientCode, handler: Arc<dyn PacketHandler>) {
        self.tables
            .entry(family)
            .or_default()
            .insert(code.as_u8(), handler);
    }

    /// Registers the same handler in every family
    pub fn register_all(&mut self, code: ClientCode, handler: Arc<dyn PacketHandler>) {
        for family in ProtocolFamily::ALL {
            self.register(family, code, Arc::clone(&handler));
        }
    }

    pub fn resolve(&self, family: ProtocolFamily, code: u8) -> Option<Arc<dyn PacketHandler>> {
        self.tables.get(&family)?.get(&code).cloned()
    }

    pub fn len(&self, family: ProtocolFamily) -> usize {
        self.tables.get(&family).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(HashMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl PacketHandler for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn handle(&self, _: &mut HandlerContext<'_>, _: &mut Frame) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    #[test]
    fn test_resolution_is_scoped_by_family() {
        let mut registry = HandlerRegistry::new();
        registry.register(ProtocolFamily::V168, ClientCode::PlayerPositionUpdate, Arc::new(Named("old")));
        registry.register(ProtocolFamily::V172, ClientCode::PlayerPositionUpdate, Arc::new(Named("new")));

        let code = ClientCode::PlayerPositionUpdate.as_u8();
        assert_eq!(registry.resolve(ProtocolFamily::V168, code).unwrap().name(), "old");
        assert_eq!(registry.resolve(ProtocolFamily::V172, code).unwrap().name(), "new");
    }

    #[test]
    fn test_unknown_code_resolves_to_none() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        registry.register_all(ClientCode::PingRequest, Arc::new(Named("ping")));
        assert!(registry.resolve(ProtocolFamily::V172, 0x01).is_none());
        assert_eq!(registry.len(ProtocolFamily::V168), 1);
        assert_eq!(registry.len(ProtocolFamily::V172), 1);
    }
}

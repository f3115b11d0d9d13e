//! The factory registry: an ordered sequence of connection factories, kept
//! sorted descending by priority with stable insertion for ties.

use std::sync::Arc;

use meshline_connection::Factory;
use parking_lot::RwLock;

#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<Vec<Arc<dyn Factory>>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts before the first existing factory of strictly lower priority,
    /// so factories registered at the same priority keep their registration
    /// order.
    pub fn register(&self, factory: Arc<dyn Factory>) {
        let mut factories = self.factories.write();
        let position = factories.iter().position(|f| f.priority() < factory.priority()).unwrap_or(factories.len());
        factories.insert(position, factory);
    }

    /// A priority-descending snapshot, stable for concurrent registration.
    pub fn ordered(&self) -> Vec<Arc<dyn Factory>> {
        self.factories.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meshline_connection::{ConnectionType, SharedConnection};
    use meshline_core::{ConnectionError, NetworkInfo};

    struct StubFactory(ConnectionType);

    #[async_trait]
    impl Factory for StubFactory {
        fn connection_type(&self) -> ConnectionType {
            self.0
        }

        fn estimate_success(&self, _peer_id: &str, _info: &NetworkInfo) -> u8 {
            0
        }

        async fn create(&self, _own_id: &str, _peer_id: &str, _info: &NetworkInfo) -> Result<SharedConnection, ConnectionError> {
            unimplemented!()
        }
    }

    #[test]
    fn orders_descending_by_priority() {
        let registry = FactoryRegistry::new();
        registry.register(Arc::new(StubFactory(ConnectionType::Polling)));
        registry.register(Arc::new(StubFactory(ConnectionType::StunMedia)));
        registry.register(Arc::new(StubFactory(ConnectionType::LanBroadcast)));

        let ordered: Vec<_> = registry.ordered().iter().map(|f| f.connection_type()).collect();
        assert_eq!(ordered, vec![ConnectionType::StunMedia, ConnectionType::Polling, ConnectionType::LanBroadcast]);
    }
}

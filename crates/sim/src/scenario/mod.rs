mod environments;

pub use environments::{DefaultScenario, IotSensorScenario, ObstacleScenario};

use std::collections::HashMap;

use crate::physics::{PhysicsEngine, RigidEngine};
use crate::room::Room;

/// One environment template. `setup` is called exactly once per room
/// construction and must finish furnishing the room synchronously.
pub trait Scenario: Send + Sync {
    fn id(&self) -> &'static str;

    fn engine(&self) -> Box<dyn PhysicsEngine> {
        Box::new(RigidEngine::new())
    }

    fn setup(&self, room: &mut Room);
}

pub type ScenarioFactory = fn() -> Box<dyn Scenario>;

/// Static environment catalog: id string to a factory producing a fresh
/// scenario object. "Cloning" an environment is calling its factory again.
pub struct ScenarioRegistry {
    factories: HashMap<&'static str, ScenarioFactory>,
}

impl ScenarioRegistry {
    pub const DEFAULT_ENVIRONMENT: &'static str = "default";

    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("default", || Box::new(DefaultScenario));
        registry.register("obstacles", || Box::new(ObstacleScenario));
        registry.register("iot_sensors", || Box::new(IotSensorScenario));
        registry
    }

    pub fn register(&mut self, id: &'static str, factory: ScenarioFactory) {
        self.factories.insert(id, factory);
    }

    pub fn environments(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.factories.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Unknown ids fall back to the default environment rather than failing
    /// room construction.
    pub fn resolve(&self, id: &str) -> Box<dyn Scenario> {
        if let Some(factory) = self.factories.get(id) {
            return factory();
        }
        log::warn!("unknown environment {id:?}, using {}", Self::DEFAULT_ENVIRONMENT);
        match self.factories.get(Self::DEFAULT_ENVIRONMENT) {
            Some(factory) => factory(),
            None => Box::new(DefaultScenario),
        }
    }
}

impl Default for ScenarioRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lists_and_resolves() {
        let registry = ScenarioRegistry::with_defaults();
        assert_eq!(
            registry.environments(),
            vec!["default", "iot_sensors", "obstacles"]
        );

        assert_eq!(registry.resolve("obstacles").id(), "obstacles");
        assert_eq!(registry.resolve("bogus").id(), "default");
    }
}

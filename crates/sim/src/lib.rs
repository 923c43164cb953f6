pub mod activity;
pub mod entity;
pub mod events;
pub mod iotscape;
pub mod physics;
pub mod robot;
pub mod room;
pub mod scenario;
pub mod timestep;
pub mod viewer;

pub use activity::ActivityMonitor;
pub use entity::{
    ClaimState, DroneCommand, DroneUnit, DynamicBody, Entity, EntityBody, EntityKind,
    TriggerVolume, VisualInfo,
};
pub use events::SimEvent;
pub use iotscape::{
    ANNOUNCE_INTERVAL, IoTScapeError, IoTScapeObject, IoTScapeRegistry, MethodDescriptor,
    ServiceDefinition,
};
pub use physics::{
    Aabb, BodyHandle, BodyInfo, BodyState, CollisionFilter, NullEngine, PhysicsEngine, RayHit,
    RigidEngine, Simulation, SimulationError, StaticHandle, SubGroups,
};
pub use robot::{RobotConfig, RobotError, RobotId, RobotLink};
pub use room::{Room, RoomConfig, RoomError, RoomManager};
pub use scenario::{Scenario, ScenarioRegistry};
pub use timestep::FixedTimestep;
pub use viewer::{ViewerEvent, ViewerSocket};

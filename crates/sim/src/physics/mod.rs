mod null;
mod rigid;
mod simulation;

pub use null::NullEngine;
pub use rigid::RigidEngine;
pub use simulation::{BodyInfo, Simulation};

use glam::{Quat, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticHandle(pub u32);

#[derive(Debug, Clone, Copy)]
pub struct BodyState {
    pub position: Vec3,
    pub orientation: Quat,
    pub linvel: Vec3,
    pub angvel: Vec3,
    pub awake: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct StaticState {
    pub position: Vec3,
    pub orientation: Quat,
}

#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    pub point: Vec3,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }
}

bitflags::bitflags! {
    /// Collision sub-groups scoped to one owner id. Bodies sharing an owner
    /// collide only when their group masks allow it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubGroups: u16 {
        const GROUP_0 = 1 << 0;
        const GROUP_1 = 1 << 1;
        const GROUP_2 = 1 << 2;
        const GROUP_3 = 1 << 3;
        const GROUP_4 = 1 << 4;
        const GROUP_5 = 1 << 5;
        const GROUP_6 = 1 << 6;
        const GROUP_7 = 1 << 7;
        const GROUP_8 = 1 << 8;
        const GROUP_9 = 1 << 9;
        const GROUP_10 = 1 << 10;
        const GROUP_11 = 1 << 11;
        const GROUP_12 = 1 << 12;
        const GROUP_13 = 1 << 13;
        const GROUP_14 = 1 << 14;
        const GROUP_15 = 1 << 15;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CollisionFilter {
    /// 0 means "no owner": collides with everything by the owner rule.
    pub owner: u32,
    pub memberships: SubGroups,
    pub collides_with: SubGroups,
}

impl CollisionFilter {
    pub fn new(owner: u32, memberships: SubGroups, collides_with: SubGroups) -> Self {
        Self {
            owner,
            memberships,
            collides_with,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("{operation} is not supported for this simulation type")]
    Unsupported { operation: &'static str },
    #[error("unknown body handle")]
    UnknownBody,
    #[error("entity name {0:?} is already in use")]
    DuplicateName(String),
    #[error("entity {0:?} has no dynamic body")]
    NotDynamic(String),
}

impl SimulationError {
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }
}

/// One pluggable physics engine instance. Bodies are owned by the engine that
/// created them; callers hold opaque handles only.
pub trait PhysicsEngine: Send {
    fn create_box(
        &mut self,
        position: Vec3,
        orientation: Quat,
        size: Vec3,
        mass: f32,
        kinematic: bool,
    ) -> BodyHandle;

    fn create_static_box(&mut self, position: Vec3, orientation: Quat, size: Vec3) -> StaticHandle;

    /// Advance the engine by `dt` seconds. No-op for `dt <= 0`.
    fn step(&mut self, dt: f32);

    fn body_state(&self, handle: BodyHandle) -> Option<BodyState>;

    fn static_state(&self, handle: StaticHandle) -> Option<StaticState>;

    fn set_position(&mut self, handle: BodyHandle, position: Vec3);

    fn set_orientation(&mut self, handle: BodyHandle, orientation: Quat);

    fn set_linvel(&mut self, handle: BodyHandle, velocity: Vec3, wake: bool);

    fn set_angvel(&mut self, handle: BodyHandle, velocity: Vec3, wake: bool);

    fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3);

    fn wake(&mut self, handle: BodyHandle);

    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
    ) -> Result<Option<RayHit>, SimulationError>;

    fn set_collision_filter(
        &mut self,
        handle: BodyHandle,
        filter: CollisionFilter,
    ) -> Result<(), SimulationError>;

    /// Axis-aligned world boundary. Only the null engine honors it; the rigid
    /// engine resolves containment through real collision geometry.
    fn set_boundary(&mut self, boundary: Aabb);
}

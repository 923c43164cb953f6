mod drone;
mod trigger;

pub use drone::{DroneCommand, DroneTelemetry, DroneUnit};
pub use trigger::TriggerVolume;

use glam::{Quat, Vec3};
use serde::Serialize;

use crate::events::SimEvent;
use crate::physics::{BodyHandle, PhysicsEngine, SimulationError, StaticHandle};
use crate::robot::RobotLink;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VisualInfo {
    Model {
        model: String,
        scale: f32,
    },
    Color {
        color: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        texture: Option<String>,
    },
}

impl VisualInfo {
    pub fn model(name: impl Into<String>, scale: f32) -> Self {
        Self::Model {
            model: name.into(),
            scale,
        }
    }

    pub fn color(color: impl Into<String>) -> Self {
        Self::Color {
            color: color.into(),
            texture: None,
        }
    }

    pub fn textured(color: impl Into<String>, texture: impl Into<String>) -> Self {
        Self::Color {
            color: color.into(),
            texture: Some(texture.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClaimState {
    pub claimable: bool,
    pub claimed_by_user: Option<String>,
    pub claimed_by_socket: Option<u64>,
}

/// Dynamic physics body plus the bookkeeping needed for client sync and
/// reset. The force-update latch is set by the pose setters and cleared only
/// by a diff query, so a moved-but-sleeping body is still reported once.
#[derive(Debug, Clone)]
pub struct DynamicBody {
    handle: BodyHandle,
    size: Vec3,
    initial_position: Vec3,
    initial_orientation: Quat,
    force_update: bool,
}

impl DynamicBody {
    pub fn new(handle: BodyHandle, size: Vec3, position: Vec3, orientation: Quat) -> Self {
        Self {
            handle,
            size,
            initial_position: position,
            initial_orientation: orientation,
            force_update: true,
        }
    }

    pub fn handle(&self) -> BodyHandle {
        self.handle
    }

    pub fn size(&self) -> Vec3 {
        self.size
    }

    pub fn initial_position(&self) -> Vec3 {
        self.initial_position
    }

    pub fn set_position(&mut self, engine: &mut dyn PhysicsEngine, position: Vec3) {
        engine.set_position(self.handle, position);
        self.force_update = true;
    }

    pub fn set_orientation(&mut self, engine: &mut dyn PhysicsEngine, orientation: Quat) {
        engine.set_orientation(self.handle, orientation);
        self.force_update = true;
    }

    pub fn force_update_pending(&self) -> bool {
        self.force_update
    }

    pub fn reset(&mut self, engine: &mut dyn PhysicsEngine) {
        engine.set_position(self.handle, self.initial_position);
        engine.set_orientation(self.handle, self.initial_orientation);
        engine.set_linvel(self.handle, Vec3::ZERO, false);
        engine.set_angvel(self.handle, Vec3::ZERO, false);
        engine.wake(self.handle);
        self.force_update = true;
    }
}

#[derive(Debug, Clone)]
pub enum EntityBody {
    Static(StaticHandle),
    Dynamic(DynamicBody),
    /// Visual-only marker; no physics representation.
    None { position: Vec3 },
}

pub enum EntityKind {
    Block,
    Ground,
    Marker,
    Trigger(TriggerVolume),
    Robot(Box<RobotLink>),
    Drone(Box<DroneUnit>),
}

pub struct Entity {
    name: String,
    visual: VisualInfo,
    claim: ClaimState,
    visual_dirty: bool,
    body: EntityBody,
    kind: EntityKind,
}

impl Entity {
    pub fn new(name: String, visual: VisualInfo, body: EntityBody, kind: EntityKind) -> Self {
        Self {
            name,
            visual,
            claim: ClaimState::default(),
            visual_dirty: true,
            body,
            kind,
        }
    }

    pub fn claimable(mut self) -> Self {
        self.claim.claimable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn visual(&self) -> &VisualInfo {
        &self.visual
    }

    pub fn set_visual(&mut self, visual: VisualInfo) {
        self.visual = visual;
        self.visual_dirty = true;
    }

    pub fn claim(&self) -> &ClaimState {
        &self.claim
    }

    pub fn body(&self) -> &EntityBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut EntityBody {
        &mut self.body
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut EntityKind {
        &mut self.kind
    }

    /// Split borrow for callers that need the behavior and its body together.
    pub fn kind_body_mut(&mut self) -> (&mut EntityKind, &mut EntityBody) {
        (&mut self.kind, &mut self.body)
    }

    pub fn dynamic_body(&self) -> Option<&DynamicBody> {
        match &self.body {
            EntityBody::Dynamic(body) => Some(body),
            _ => None,
        }
    }

    pub fn is_robot(&self) -> bool {
        matches!(self.kind, EntityKind::Robot(_))
    }

    pub fn try_claim(&mut self, user: &str, socket: u64) -> bool {
        if !self.claim.claimable || self.claim.claimed_by_user.is_some() {
            return false;
        }
        self.claim.claimed_by_user = Some(user.to_string());
        self.claim.claimed_by_socket = Some(socket);
        self.visual_dirty = true;
        true
    }

    pub fn release_claim(&mut self, user: &str) -> bool {
        if self.claim.claimed_by_user.as_deref() != Some(user) {
            return false;
        }
        self.claim.claimed_by_user = None;
        self.claim.claimed_by_socket = None;
        self.visual_dirty = true;
        true
    }

    /// Drops a claim held through the given viewer socket, whoever owns it.
    pub fn release_socket_claim(&mut self, socket: u64) -> bool {
        if self.claim.claimed_by_socket != Some(socket) {
            return false;
        }
        self.claim.claimed_by_user = None;
        self.claim.claimed_by_socket = None;
        self.visual_dirty = true;
        true
    }

    /// May the given user drive or reset this entity? Unclaimed entities are
    /// open to everyone.
    pub fn controllable_by(&self, user: &str) -> bool {
        match &self.claim.claimed_by_user {
            Some(owner) => owner == user,
            None => true,
        }
    }

    pub fn update(
        &mut self,
        dt: f32,
        engine: &mut dyn PhysicsEngine,
        events: &mut Vec<SimEvent>,
    ) -> Result<(), SimulationError> {
        let Entity {
            name, body, kind, ..
        } = self;

        match kind {
            EntityKind::Block | EntityKind::Ground | EntityKind::Marker => Ok(()),
            EntityKind::Trigger(volume) => {
                volume.update(name, engine, events);
                Ok(())
            }
            EntityKind::Robot(link) => {
                let EntityBody::Dynamic(dynamic) = body else {
                    return Err(SimulationError::NotDynamic(name.clone()));
                };
                link.update(dt, name, dynamic, engine, events);
                Ok(())
            }
            EntityKind::Drone(unit) => {
                let EntityBody::Dynamic(dynamic) = body else {
                    return Err(SimulationError::NotDynamic(name.clone()));
                };
                unit.update(dynamic, engine);
                Ok(())
            }
        }
    }

    pub fn reset(&mut self, engine: &mut dyn PhysicsEngine, events: &mut Vec<SimEvent>) {
        let Entity {
            name, body, kind, ..
        } = self;

        match kind {
            EntityKind::Trigger(volume) => {
                volume.reset();
                events.push(SimEvent::EntityReset {
                    entity: name.clone(),
                });
            }
            EntityKind::Robot(link) => {
                if let EntityBody::Dynamic(dynamic) = body {
                    link.reset(name, dynamic, engine, events);
                }
            }
            EntityKind::Drone(unit) => {
                if let EntityBody::Dynamic(dynamic) = body {
                    unit.reset();
                    dynamic.reset(engine);
                    events.push(SimEvent::EntityReset {
                        entity: name.clone(),
                    });
                }
            }
            EntityKind::Block | EntityKind::Ground | EntityKind::Marker => {
                if let EntityBody::Dynamic(dynamic) = body {
                    dynamic.reset(engine);
                    events.push(SimEvent::EntityReset {
                        entity: name.clone(),
                    });
                }
            }
        }
    }

    /// Reported state for one client-sync query. `all_data` reports every
    /// field; a delta query (`only_awake`) reports moving or latched bodies
    /// only and consumes the latches.
    pub fn body_info(
        &mut self,
        engine: &dyn PhysicsEngine,
        only_awake: bool,
        all_data: bool,
    ) -> Option<crate::physics::BodyInfo> {
        use crate::physics::BodyInfo;

        let delta_query = only_awake && !all_data;

        match &mut self.body {
            EntityBody::Static(handle) => {
                if only_awake && !all_data {
                    return None;
                }
                let state = engine.static_state(*handle)?;
                let mut info = BodyInfo {
                    pos: Some(state.position.to_array()),
                    orientation: Some(state.orientation.to_array()),
                    ..BodyInfo::default()
                };
                if all_data {
                    info.visual_info = Some(self.visual.clone());
                }
                Some(info)
            }
            EntityBody::Dynamic(dynamic) => {
                let state = engine.body_state(dynamic.handle)?;
                let include = all_data
                    || !only_awake
                    || state.awake
                    || dynamic.force_update
                    || self.visual_dirty;
                if !include {
                    return None;
                }

                let mut info = BodyInfo {
                    pos: Some(state.position.to_array()),
                    orientation: Some(state.orientation.to_array()),
                    lin_vel: Some(state.linvel.to_array()),
                    ang_vel: Some(state.angvel.to_array()),
                    ..BodyInfo::default()
                };
                if all_data {
                    info.width = Some(dynamic.size.x);
                    info.height = Some(dynamic.size.y);
                    info.depth = Some(dynamic.size.z);
                    info.visual_info = Some(self.visual.clone());
                    info.claimable = Some(self.claim.claimable);
                    info.claimed_by = self.claim.claimed_by_user.clone();
                } else if self.visual_dirty {
                    info.visual_info = Some(self.visual.clone());
                    info.claimed_by = self.claim.claimed_by_user.clone();
                }

                if delta_query {
                    dynamic.force_update = false;
                    self.visual_dirty = false;
                }
                Some(info)
            }
            EntityBody::None { position } => {
                if delta_query && !self.visual_dirty {
                    return None;
                }
                let mut info = BodyInfo {
                    pos: Some(position.to_array()),
                    visual_info: Some(self.visual.clone()),
                    ..BodyInfo::default()
                };
                if all_data {
                    info.orientation = Some(Quat::IDENTITY.to_array());
                }
                if delta_query {
                    self.visual_dirty = false;
                }
                Some(info)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::NullEngine;

    fn dynamic_entity(engine: &mut NullEngine, position: Vec3) -> Entity {
        let handle = engine.create_box(position, Quat::IDENTITY, Vec3::ONE, 1.0, false);
        Entity::new(
            "crate_0".to_string(),
            VisualInfo::color("#8b4513"),
            EntityBody::Dynamic(DynamicBody::new(handle, Vec3::ONE, position, Quat::IDENTITY)),
            EntityKind::Block,
        )
    }

    #[test]
    fn reset_restores_pose_and_zeroes_velocity() {
        let mut engine = NullEngine::new();
        let start = Vec3::new(1.0, 2.0, 3.0);
        let mut entity = dynamic_entity(&mut engine, start);
        let handle = entity.dynamic_body().unwrap().handle();

        engine.set_linvel(handle, Vec3::new(5.0, 0.0, 0.0), true);
        engine.step(1.0);

        let mut events = Vec::new();
        entity.reset(&mut engine, &mut events);

        let state = engine.body_state(handle).unwrap();
        assert_eq!(state.position, start);
        assert_eq!(state.linvel, Vec3::ZERO);
        assert_eq!(state.angvel, Vec3::ZERO);
        assert_eq!(events.len(), 1);

        // Idempotent: resetting again changes nothing.
        entity.reset(&mut engine, &mut events);
        let state = engine.body_state(handle).unwrap();
        assert_eq!(state.position, start);
        assert_eq!(state.linvel, Vec3::ZERO);
    }

    #[test]
    fn force_update_latch_survives_steps_until_queried() {
        let mut engine = NullEngine::new();
        let mut entity = dynamic_entity(&mut engine, Vec3::ZERO);

        // Consume the initial latch.
        assert!(entity.body_info(&engine, true, false).is_some());
        engine.step(1.0 / 60.0);
        assert!(entity.body_info(&engine, true, false).is_none());

        if let EntityBody::Dynamic(body) = entity.body_mut() {
            body.set_position(&mut engine, Vec3::new(4.0, 0.0, 0.0));
        }
        // Stepping does not clear the latch.
        engine.step(1.0 / 60.0);
        engine.step(1.0 / 60.0);

        assert!(entity.body_info(&engine, true, false).is_some());
        assert!(entity.body_info(&engine, true, false).is_none());
    }

    #[test]
    fn claim_lifecycle() {
        let mut engine = NullEngine::new();
        let mut entity = dynamic_entity(&mut engine, Vec3::ZERO).claimable();

        assert!(entity.try_claim("ada", 7));
        assert!(!entity.try_claim("grace", 8));
        assert!(entity.controllable_by("ada"));
        assert!(!entity.controllable_by("grace"));

        assert!(!entity.release_claim("grace"));
        assert!(entity.release_claim("ada"));
        assert!(entity.controllable_by("grace"));
    }
}

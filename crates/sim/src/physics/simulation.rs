use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::entity::{Entity, VisualInfo};
use crate::events::SimEvent;
use crate::physics::BodyHandle;

use super::{PhysicsEngine, SimulationError};

/// Nullable per-entity report; a diff payload carries only the fields that
/// changed since the previous query.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lin_vel: Option<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ang_vel: Option<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_info: Option<VisualInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
}

/// One engine instance plus the entities layered on it. Entity names are
/// unique for the simulation's lifetime and never reused.
pub struct Simulation {
    engine: Box<dyn PhysicsEngine>,
    entities: Vec<Entity>,
    names: HashSet<String>,
    counters: HashMap<String, u32>,
    pending_events: Vec<SimEvent>,
    elapsed: f64,
}

impl Simulation {
    pub fn new(engine: Box<dyn PhysicsEngine>) -> Self {
        Self {
            engine,
            entities: Vec::new(),
            names: HashSet::new(),
            counters: HashMap::new(),
            pending_events: Vec::new(),
            elapsed: 0.0,
        }
    }

    pub fn engine(&self) -> &dyn PhysicsEngine {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut dyn PhysicsEngine {
        self.engine.as_mut()
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Next free `prefix_N` name. Allocated names stay burned even if the
    /// entity is never added.
    pub fn allocate_name(&mut self, prefix: &str) -> String {
        loop {
            let counter = self.counters.entry(prefix.to_string()).or_insert(0);
            let name = format!("{prefix}_{counter}");
            *counter += 1;
            if !self.names.contains(&name) {
                self.names.insert(name.clone());
                return name;
            }
        }
    }

    /// Claims an exact name, e.g. a robot's MAC-derived one.
    pub fn claim_name(&mut self, name: &str) -> Result<(), SimulationError> {
        if !self.names.insert(name.to_string()) {
            return Err(SimulationError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn add_entity(&mut self, entity: Entity) -> Result<(), SimulationError> {
        if self.entities.iter().any(|e| e.name() == entity.name()) {
            return Err(SimulationError::DuplicateName(entity.name().to_string()));
        }
        // Burn the name permanently, whether or not it was pre-reserved.
        self.names.insert(entity.name().to_string());
        self.entities.push(entity);
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name() == name)
    }

    pub fn entity_mut(&mut self, name: &str) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.name() == name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.iter_mut()
    }

    pub fn body_handle(&self, name: &str) -> Option<BodyHandle> {
        self.entity(name)
            .and_then(|e| e.dynamic_body().map(|b| b.handle()))
    }

    pub fn robot_names(&self) -> Vec<String> {
        self.entities
            .iter()
            .filter(|e| e.is_robot())
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Advance physics, then update entities in insertion order. A failing
    /// entity is logged and skipped; the rest of the tick proceeds.
    pub fn update(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }

        self.engine.step(dt);

        let Simulation {
            engine,
            entities,
            pending_events,
            ..
        } = self;
        for entity in entities.iter_mut() {
            if let Err(e) = entity.update(dt, engine.as_mut(), pending_events) {
                log::error!("entity {} update failed: {e}", entity.name());
            }
        }

        self.elapsed += dt as f64;
    }

    pub fn get_bodies(&mut self, only_awake: bool, all_data: bool) -> HashMap<String, BodyInfo> {
        let Simulation {
            engine, entities, ..
        } = self;

        let mut bodies = HashMap::new();
        for entity in entities.iter_mut() {
            if let Some(info) = entity.body_info(engine.as_ref(), only_awake, all_data) {
                bodies.insert(entity.name().to_string(), info);
            }
        }
        bodies
    }

    pub fn reset_all(&mut self) {
        let Simulation {
            engine,
            entities,
            pending_events,
            ..
        } = self;
        for entity in entities.iter_mut() {
            entity.reset(engine.as_mut(), pending_events);
        }
    }

    pub fn reset_entity(&mut self, name: &str) -> bool {
        let Simulation {
            engine,
            entities,
            pending_events,
            ..
        } = self;
        match entities.iter_mut().find(|e| e.name() == name) {
            Some(entity) => {
                entity.reset(engine.as_mut(), pending_events);
                true
            }
            None => false,
        }
    }

    /// Scripted move; sets the entity's force-update latch so the next delta
    /// query reports it even if the body is asleep.
    pub fn set_entity_position(&mut self, name: &str, position: glam::Vec3) -> bool {
        use crate::entity::EntityBody;

        let Simulation {
            engine, entities, ..
        } = self;
        match entities.iter_mut().find(|e| e.name() == name) {
            Some(entity) => match entity.body_mut() {
                EntityBody::Dynamic(body) => {
                    body.set_position(engine.as_mut(), position);
                    true
                }
                _ => false,
            },
            None => false,
        }
    }

    pub fn set_entity_orientation(&mut self, name: &str, orientation: glam::Quat) -> bool {
        use crate::entity::EntityBody;

        let Simulation {
            engine, entities, ..
        } = self;
        match entities.iter_mut().find(|e| e.name() == name) {
            Some(entity) => match entity.body_mut() {
                EntityBody::Dynamic(body) => {
                    body.set_orientation(engine.as_mut(), orientation);
                    true
                }
                _ => false,
            },
            None => false,
        }
    }

    /// Inject a datagram into a robot's virtual socket, exactly as if it had
    /// arrived over UDP.
    pub fn send_robot_command(&mut self, name: &str, data: &[u8]) -> Result<(), SimulationError> {
        use crate::entity::{EntityBody, EntityKind};
        use crate::robot::CommandCtx;

        let Simulation {
            engine,
            entities,
            pending_events,
            ..
        } = self;

        let entity = entities
            .iter_mut()
            .find(|e| e.name() == name)
            .ok_or_else(|| SimulationError::NotDynamic(name.to_string()))?;

        // Split the entity so the link and its body can be borrowed together.
        let entity_name = entity.name().to_string();
        let (kind, body) = entity.kind_body_mut();
        let (EntityKind::Robot(link), EntityBody::Dynamic(dynamic)) = (kind, body) else {
            return Err(SimulationError::NotDynamic(entity_name));
        };

        let mut ctx = CommandCtx {
            name: &entity_name,
            body: dynamic,
            engine: engine.as_mut(),
            events: pending_events,
        };
        link.handle_datagram(data, &mut ctx);
        Ok(())
    }

    pub fn set_robot_button(&mut self, name: &str, pressed: bool) -> bool {
        use crate::entity::EntityKind;
        match self.entity_mut(name).map(Entity::kind_mut) {
            Some(EntityKind::Robot(link)) => {
                link.set_button(pressed);
                true
            }
            _ => false,
        }
    }

    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub fn push_event(&mut self, event: SimEvent) {
        self.pending_events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DynamicBody, EntityBody, EntityKind};
    use crate::physics::NullEngine;
    use glam::{Quat, Vec3};

    fn simulation_with_block(position: Vec3) -> (Simulation, String) {
        let mut sim = Simulation::new(Box::new(NullEngine::new()));
        let handle =
            sim.engine_mut()
                .create_box(position, Quat::IDENTITY, Vec3::ONE, 1.0, false);
        let name = sim.allocate_name("block");
        sim.add_entity(Entity::new(
            name.clone(),
            VisualInfo::color("#336699"),
            EntityBody::Dynamic(DynamicBody::new(handle, Vec3::ONE, position, Quat::IDENTITY)),
            EntityKind::Block,
        ))
        .unwrap();
        (sim, name)
    }

    fn add_static(sim: &mut Simulation) -> String {
        let handle = sim.engine_mut().create_static_box(
            Vec3::ZERO,
            Quat::IDENTITY,
            Vec3::new(10.0, 1.0, 10.0),
        );
        let name = sim.allocate_name("ground");
        sim.add_entity(Entity::new(
            name.clone(),
            VisualInfo::color("#555555"),
            EntityBody::Static(handle),
            EntityKind::Ground,
        ))
        .unwrap();
        name
    }

    #[test]
    fn names_are_never_reused() {
        let mut sim = Simulation::new(Box::new(NullEngine::new()));
        let a = sim.allocate_name("block");
        let b = sim.allocate_name("block");
        assert_eq!(a, "block_0");
        assert_eq!(b, "block_1");

        assert!(sim.claim_name("block_2").is_ok());
        assert!(sim.claim_name("block_2").is_err());
        assert_eq!(sim.allocate_name("block"), "block_3");
    }

    #[test]
    fn delta_query_excludes_statics_and_sleeping_bodies() {
        let (mut sim, block) = simulation_with_block(Vec3::ZERO);
        let ground = add_static(&mut sim);

        // Full query reports everything, including visual and size data.
        let all = sim.get_bodies(false, true);
        assert!(all.contains_key(&ground));
        assert!(all[&block].visual_info.is_some());
        assert!(all[&block].width.is_some());

        // First delta drains the initial force-update latch.
        let delta = sim.get_bodies(true, false);
        assert!(delta.contains_key(&block));
        assert!(!delta.contains_key(&ground));

        sim.update(1.0 / 60.0);
        let delta = sim.get_bodies(true, false);
        assert!(delta.is_empty());
    }

    #[test]
    fn delta_query_reports_moved_sleeping_body_once() {
        let (mut sim, block) = simulation_with_block(Vec3::ZERO);
        sim.get_bodies(true, false);
        sim.update(1.0 / 60.0);
        assert!(sim.get_bodies(true, false).is_empty());

        // Scripted move on a resting body latches it for exactly one report,
        // and stepping in between does not clear the latch.
        assert!(sim.set_entity_position(&block, Vec3::new(3.0, 0.0, 0.0)));
        sim.update(1.0 / 60.0);
        sim.update(1.0 / 60.0);

        let delta = sim.get_bodies(true, false);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[&block].pos.unwrap()[0], 3.0);

        assert!(sim.get_bodies(true, false).is_empty());
    }

    #[test]
    fn update_is_noop_for_zero_dt() {
        let (mut sim, block) = simulation_with_block(Vec3::ZERO);
        let handle = sim.body_handle(&block).unwrap();
        sim.engine_mut().set_linvel(handle, Vec3::X, true);

        sim.update(0.0);
        assert_eq!(sim.elapsed(), 0.0);
        let state = sim.engine().body_state(handle).unwrap();
        assert_eq!(state.position, Vec3::ZERO);
    }
}

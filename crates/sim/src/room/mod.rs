mod manager;

pub use manager::{RoomError, RoomManager};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};
use serde_json::{Value, json};

use crate::activity::ActivityMonitor;
use crate::entity::{
    DroneUnit, DynamicBody, Entity, EntityBody, EntityKind, TriggerVolume, VisualInfo,
};
use crate::iotscape::{IoTScapeObject, IoTScapeRegistry};
use crate::physics::Simulation;
use crate::robot::{ROBOT_MASS, ROBOT_SIZE, RobotConfig, RobotLink};
use crate::scenario::Scenario;
use crate::viewer::ViewerSocket;

pub const MIN_TIME_MULTIPLIER: f32 = 0.1;
pub const MAX_TIME_MULTIPLIER: f32 = 10.0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Idle time before an active room hibernates.
    pub timeout: Duration,
    /// Hibernation time before the room is eligible for garbage collection.
    pub max_hibernate: Duration,
    pub time_multiplier: f32,
    /// Every Nth broadcast cycle carries a full snapshot instead of a delta.
    pub full_update_every: u32,
    pub robot: RobotConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15 * 60),
            max_hibernate: Duration::from_secs(24 * 60 * 60),
            time_multiplier: 1.0,
            full_update_every: 50,
            robot: RobotConfig::default(),
        }
    }
}

pub type UpdateObserver = Box<dyn FnMut(f32, &mut Simulation) + Send>;
pub type ResetObserver = Box<dyn FnMut(&mut Simulation) + Send>;

/// One simulated space: an engine instance, its entities, the connected
/// viewers and the active/hibernating lifecycle.
pub struct Room {
    id: String,
    environment: String,
    simulation: Simulation,
    viewers: Vec<Box<dyn ViewerSocket>>,
    password: Option<String>,
    activity: Arc<ActivityMonitor>,
    hibernating: bool,
    hibernate_since: Option<Instant>,
    hibernate_mark: u64,
    time_multiplier: f32,
    config: RoomConfig,
    on_update: Vec<UpdateObserver>,
    on_reset: Vec<ResetObserver>,
    broadcast_counter: u32,
    registry: Option<Arc<Mutex<IoTScapeRegistry>>>,
    iot_devices: Vec<(String, String)>,
}

impl Room {
    /// The scenario furnishes the room synchronously, before the first
    /// update can run.
    pub fn new(
        id: impl Into<String>,
        scenario: &dyn Scenario,
        config: RoomConfig,
        registry: Option<Arc<Mutex<IoTScapeRegistry>>>,
    ) -> Self {
        let time_multiplier = config
            .time_multiplier
            .clamp(MIN_TIME_MULTIPLIER, MAX_TIME_MULTIPLIER);
        let mut room = Self {
            id: id.into(),
            environment: scenario.id().to_string(),
            simulation: Simulation::new(scenario.engine()),
            viewers: Vec::new(),
            password: None,
            activity: Arc::new(ActivityMonitor::new()),
            hibernating: false,
            hibernate_since: None,
            hibernate_mark: 0,
            time_multiplier,
            config,
            on_update: Vec::new(),
            on_reset: Vec::new(),
            broadcast_counter: 0,
            registry,
            iot_devices: Vec::new(),
        };
        scenario.setup(&mut room);
        room
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn set_password(&mut self, password: Option<String>) {
        self.password = password;
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn is_hibernating(&self) -> bool {
        self.hibernating
    }

    pub fn hibernating_for(&self) -> Option<Duration> {
        self.hibernate_since.map(|since| since.elapsed())
    }

    pub fn elapsed(&self) -> f64 {
        self.simulation.elapsed()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn activity(&self) -> Arc<ActivityMonitor> {
        Arc::clone(&self.activity)
    }

    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.simulation
    }

    pub fn time_multiplier(&self) -> f32 {
        self.time_multiplier
    }

    pub fn set_time_multiplier(&mut self, multiplier: f32) {
        self.time_multiplier = multiplier.clamp(MIN_TIME_MULTIPLIER, MAX_TIME_MULTIPLIER);
    }

    pub fn on_update(&mut self, observer: UpdateObserver) {
        self.on_update.push(observer);
    }

    pub fn on_reset(&mut self, observer: ResetObserver) {
        self.on_reset.push(observer);
    }

    // ---- scenario furniture -------------------------------------------------

    pub fn add_ground(&mut self, half_extent: f32) -> String {
        let size = Vec3::new(half_extent * 2.0, 0.2, half_extent * 2.0);
        let position = Vec3::new(0.0, -0.1, 0.0);
        let handle = self
            .simulation
            .engine_mut()
            .create_static_box(position, Quat::IDENTITY, size);
        let name = self.simulation.allocate_name("ground");
        let entity = Entity::new(
            name.clone(),
            VisualInfo::textured("#2d6a4f", "grass"),
            EntityBody::Static(handle),
            EntityKind::Ground,
        );
        self.add_entity(entity);
        name
    }

    pub fn add_static_box(&mut self, position: Vec3, size: Vec3, visual: VisualInfo) -> String {
        let handle = self
            .simulation
            .engine_mut()
            .create_static_box(position, Quat::IDENTITY, size);
        let name = self.simulation.allocate_name("wall");
        let entity = Entity::new(
            name.clone(),
            visual,
            EntityBody::Static(handle),
            EntityKind::Block,
        );
        self.add_entity(entity);
        name
    }

    pub fn add_block(
        &mut self,
        position: Vec3,
        size: Vec3,
        mass: f32,
        visual: VisualInfo,
    ) -> String {
        let handle = self.simulation.engine_mut().create_box(
            position,
            Quat::IDENTITY,
            size,
            mass,
            false,
        );
        let name = self.simulation.allocate_name("block");
        let entity = Entity::new(
            name.clone(),
            visual,
            EntityBody::Dynamic(DynamicBody::new(handle, size, position, Quat::IDENTITY)),
            EntityKind::Block,
        );
        self.add_entity(entity);
        name
    }

    pub fn add_marker(&mut self, position: Vec3, visual: VisualInfo) -> String {
        let name = self.simulation.allocate_name("marker");
        let entity = Entity::new(
            name.clone(),
            visual,
            EntityBody::None { position },
            EntityKind::Marker,
        );
        self.add_entity(entity);
        name
    }

    pub fn add_trigger(&mut self, volume: TriggerVolume) -> String {
        let name = self.simulation.allocate_name("trigger");
        let entity = Entity::new(
            name.clone(),
            VisualInfo::color("#00000000"),
            EntityBody::None {
                position: Vec3::ZERO,
            },
            EntityKind::Trigger(volume),
        );
        self.add_entity(entity);
        name
    }

    /// Spawn a robot entity with its device link. The entity name derives
    /// from the link's MAC suffix.
    pub fn add_robot(&mut self, position: Vec3, orientation: Quat) -> String {
        let mut link = RobotLink::new(&self.config.robot);
        link.set_activity(self.activity());

        let handle = self.simulation.engine_mut().create_box(
            position,
            orientation,
            ROBOT_SIZE,
            ROBOT_MASS,
            false,
        );

        let mut name = format!("robot_{}", link.id().suffix_hex());
        if self.simulation.claim_name(&name).is_err() {
            // MAC suffix collision inside one room; fall back to a counter.
            name = self.simulation.allocate_name("robot");
        }

        let entity = Entity::new(
            name.clone(),
            VisualInfo::model("parallax_robot", 1.0),
            EntityBody::Dynamic(DynamicBody::new(handle, ROBOT_SIZE, position, orientation)),
            EntityKind::Robot(Box::new(link)),
        )
        .claimable();
        self.add_entity(entity);
        name
    }

    /// Spawn an IoTScape-controlled drone and register its service when a
    /// registry is attached.
    pub fn add_drone(&mut self, position: Vec3) -> String {
        let drone = DroneUnit::new();
        let service = drone.build_service();

        let size = Vec3::new(0.3, 0.1, 0.3);
        let handle = self.simulation.engine_mut().create_box(
            position,
            Quat::IDENTITY,
            size,
            0.8,
            true,
        );
        let name = self.simulation.allocate_name("drone");
        let entity = Entity::new(
            name.clone(),
            VisualInfo::model("quadcopter", 1.0),
            EntityBody::Dynamic(DynamicBody::new(handle, size, position, Quat::IDENTITY)),
            EntityKind::Drone(Box::new(drone)),
        );
        self.add_entity(entity);

        self.register_device(service);
        name
    }

    /// Register an IoTScape device owned by this room; it is wired to the
    /// room's activity monitor and unregistered across hibernation.
    pub fn register_device(&mut self, device: IoTScapeObject) {
        let Some(registry) = &self.registry else {
            return;
        };
        let service = device.definition.name.clone();
        let device = device.with_activity(Arc::clone(&self.activity));
        match lock(registry).register(device) {
            Ok(id) => self.iot_devices.push((service, id)),
            Err(e) => log::error!("room {}: device registration failed: {e}", self.id),
        }
    }

    fn add_entity(&mut self, entity: Entity) {
        let name = entity.name().to_string();
        if let Err(e) = self.simulation.add_entity(entity) {
            log::error!("room {}: {e} (entity {name} dropped)", self.id);
        }
    }

    // ---- viewers ------------------------------------------------------------

    pub fn add_viewer(&mut self, viewer: Box<dyn ViewerSocket>) {
        if self.hibernating {
            self.wake();
        }
        self.activity.touch();

        viewer.send("roomJoined", &json!({ "room": self.id }));
        viewer.send("roomInfo", &self.room_info());
        let full = self.simulation.get_bodies(false, true);
        if let Ok(payload) = serde_json::to_value(&full) {
            viewer.send("fullUpdate", &payload);
        }

        self.viewers.push(viewer);
    }

    pub fn remove_viewer(&mut self, socket_id: u64) -> bool {
        let Some(index) = self.viewers.iter().position(|v| v.id() == socket_id) else {
            return false;
        };
        let viewer = self.viewers.remove(index);
        viewer.send("roomLeft", &json!({ "room": self.id }));

        for entity in self.simulation.entities_mut() {
            entity.release_socket_claim(socket_id);
        }

        if self.viewers.is_empty() && !self.hibernating {
            self.hibernate();
        }
        true
    }

    pub fn room_info(&self) -> Value {
        json!({
            "environment": self.environment,
            "entities": self.simulation.entity_count(),
            "time": self.simulation.elapsed(),
            "hasPassword": self.password.is_some(),
        })
    }

    // ---- lifecycle ----------------------------------------------------------

    /// One update tick. Frozen while hibernating; otherwise scaled by the
    /// time multiplier, timeout-checked, observer-notified, then stepped.
    pub fn update(&mut self, dt: f32) {
        if self.hibernating {
            if self.activity.last_mark() > self.hibernate_mark {
                self.wake();
            } else {
                return;
            }
        }

        let dt = dt * self.time_multiplier;
        if dt <= 0.0 {
            return;
        }

        if self.activity.idle() > self.config.timeout {
            self.hibernate();
            return;
        }

        let mut observers = std::mem::take(&mut self.on_update);
        for observer in observers.iter_mut() {
            observer(dt, &mut self.simulation);
        }
        observers.append(&mut self.on_update);
        self.on_update = observers;

        self.simulation.update(dt);
    }

    /// User-triggered reset. Restores every resettable entity and notifies
    /// subscribers synchronously; hibernation state and timers are untouched.
    pub fn reset(&mut self) {
        self.simulation.reset_all();

        let mut observers = std::mem::take(&mut self.on_reset);
        for observer in observers.iter_mut() {
            observer(&mut self.simulation);
        }
        observers.append(&mut self.on_reset);
        self.on_reset = observers;
    }

    fn hibernate(&mut self) {
        log::info!("room {} hibernating", self.id);
        let leaving = std::mem::take(&mut self.viewers);
        for viewer in &leaving {
            viewer.send("roomLeft", &json!({ "room": self.id }));
        }

        if let Some(registry) = &self.registry {
            let mut registry = lock(registry);
            for (service, id) in &self.iot_devices {
                registry.unregister(service, id);
            }
        }

        self.hibernating = true;
        self.hibernate_since = Some(Instant::now());
        self.hibernate_mark = self.activity.last_mark();
    }

    fn wake(&mut self) {
        log::info!("room {} waking from hibernation", self.id);
        self.hibernating = false;
        self.hibernate_since = None;

        if let Some(registry) = &self.registry {
            let mut registry = lock(registry);
            for (service, id) in &self.iot_devices {
                registry.reregister(service, id);
            }
        }
        self.activity.touch();
    }

    /// Explicit un-hibernate, e.g. from a management surface.
    pub fn wake_up(&mut self) {
        if self.hibernating {
            self.wake();
        }
    }

    /// Drop the room's devices from the directory entirely; called by the
    /// manager when the room is garbage collected.
    pub fn dispose(&mut self) {
        if let Some(registry) = &self.registry {
            let mut registry = lock(registry);
            for (service, id) in self.iot_devices.drain(..) {
                registry.remove(&service, &id);
            }
        }
    }

    // ---- viewer-driven robot operations ------------------------------------

    pub fn reset_robot(&mut self, name: &str, user: &str) {
        self.activity.touch();
        let Some(entity) = self.simulation.entity(name) else {
            log::debug!("room {}: reset for unknown entity {name}", self.id);
            return;
        };
        if !entity.controllable_by(user) {
            log::debug!("room {}: {user} cannot reset claimed {name}", self.id);
            return;
        }
        self.simulation.reset_entity(name);
    }

    pub fn reset_all(&mut self) {
        self.activity.touch();
        self.reset();
    }

    pub fn claim_robot(&mut self, name: &str, claim: bool, user: &str, socket_id: u64) {
        self.activity.touch();
        let Some(entity) = self.simulation.entity_mut(name) else {
            log::debug!("room {}: claim for unknown entity {name}", self.id);
            return;
        };

        let changed = if claim {
            entity.try_claim(user, socket_id)
        } else {
            entity.release_claim(user)
        };
        if !changed {
            return;
        }

        let payload = json!({ "id": name, "user": user, "claimed": claim });
        for viewer in &self.viewers {
            viewer.send("robotClaimed", &payload);
        }
    }

    pub fn robot_button(&mut self, name: &str, pressed: bool, user: &str) {
        self.activity.touch();
        let Some(entity) = self.simulation.entity(name) else {
            return;
        };
        if !entity.controllable_by(user) {
            return;
        }
        self.simulation.set_robot_button(name, pressed);
    }

    // ---- broadcasting -------------------------------------------------------

    /// One broadcast cycle: pending sim events, then a delta snapshot (or a
    /// periodic full one) to every viewer.
    pub fn broadcast(&mut self) {
        let events = self.simulation.drain_events();
        if self.viewers.is_empty() {
            return;
        }

        for event in &events {
            let payload = event.payload();
            for viewer in &self.viewers {
                viewer.send(event.viewer_name(), &payload);
            }
        }

        self.broadcast_counter = self.broadcast_counter.wrapping_add(1);
        let full = self.broadcast_counter % self.config.full_update_every.max(1) == 0;
        let bodies = if full {
            self.simulation.get_bodies(false, true)
        } else {
            self.simulation.get_bodies(true, false)
        };
        if bodies.is_empty() && !full {
            return;
        }

        match serde_json::to_value(&bodies) {
            Ok(payload) => {
                let name = if full { "fullUpdate" } else { "update" };
                for viewer in &self.viewers {
                    viewer.send(name, &payload);
                }
            }
            Err(e) => log::error!("room {}: snapshot serialization failed: {e}", self.id),
        }
    }
}

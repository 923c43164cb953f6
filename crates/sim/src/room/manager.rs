use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::iotscape::IoTScapeRegistry;
use crate::scenario::ScenarioRegistry;
use crate::viewer::{ViewerEvent, ViewerSocket};

use super::{Room, RoomConfig};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("invalid password")]
    InvalidPassword,
    #[error("viewer is already in a room")]
    AlreadyJoined,
}

/// Owns every live room and routes viewer traffic into them. Rooms are
/// individually locked so update and broadcast can run across rooms in
/// parallel.
pub struct RoomManager {
    rooms: HashMap<String, Arc<Mutex<Room>>>,
    viewer_rooms: HashMap<u64, String>,
    scenarios: ScenarioRegistry,
    registry: Option<Arc<Mutex<IoTScapeRegistry>>>,
    config: RoomConfig,
}

impl RoomManager {
    pub fn new(
        scenarios: ScenarioRegistry,
        registry: Option<Arc<Mutex<IoTScapeRegistry>>>,
        config: RoomConfig,
    ) -> Self {
        Self {
            rooms: HashMap::new(),
            viewer_rooms: HashMap::new(),
            scenarios,
            registry,
            config,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(id).cloned()
    }

    pub fn rooms(&self) -> Vec<Arc<Mutex<Room>>> {
        self.rooms.values().cloned().collect()
    }

    pub fn create_room(
        &mut self,
        environment: &str,
        password: Option<String>,
        namespace: Option<&str>,
    ) -> String {
        let id = loop {
            let candidate = match namespace {
                Some(ns) => format!("{ns}-{:04x}", rand::random::<u16>()),
                None => format!("{:06x}", rand::random::<u32>() & 0x00ff_ffff),
            };
            if !self.rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let scenario = self.scenarios.resolve(environment);
        let mut room = Room::new(
            id.clone(),
            scenario.as_ref(),
            self.config.clone(),
            self.registry.clone(),
        );
        room.set_password(password);

        log::info!("room {id} created (environment {})", room.environment());
        self.rooms.insert(id.clone(), Arc::new(Mutex::new(room)));
        id
    }

    /// Handle a `joinRoom` request, creating the room when asked to. The
    /// viewer socket moves into the room on success.
    pub fn join(
        &mut self,
        viewer: Box<dyn ViewerSocket>,
        room_id: &str,
        password: Option<&str>,
        env: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<String, RoomError> {
        if self.viewer_rooms.contains_key(&viewer.id()) {
            return Err(RoomError::AlreadyJoined);
        }

        let id = if room_id == "create" {
            self.create_room(
                env.unwrap_or("default"),
                password.map(str::to_string),
                namespace,
            )
        } else {
            room_id.to_string()
        };

        let room = self.rooms.get(&id).ok_or(RoomError::NotFound)?;
        {
            let mut room = lock(room);
            if let Some(required) = room.password() {
                match password {
                    Some(provided) if provided == required => {}
                    _ => return Err(RoomError::InvalidPassword),
                }
            }
            let viewer_id = viewer.id();
            room.add_viewer(viewer);
            self.viewer_rooms.insert(viewer_id, id.clone());
        }
        Ok(id)
    }

    pub fn leave(&mut self, socket_id: u64) -> Option<String> {
        let room_id = self.viewer_rooms.remove(&socket_id)?;
        if let Some(room) = self.rooms.get(&room_id) {
            lock(room).remove_viewer(socket_id);
        }
        Some(room_id)
    }

    /// Route a non-join viewer event to the sender's room.
    pub fn handle_event(&mut self, socket_id: u64, event: &ViewerEvent) {
        match event {
            ViewerEvent::JoinRoom { .. } => {
                log::debug!("joinRoom must be routed through RoomManager::join");
            }
            ViewerEvent::LeaveRoom => {
                self.leave(socket_id);
            }
            ViewerEvent::ResetRobot { id, user } => {
                self.with_viewer_room(socket_id, |room| room.reset_robot(id, user));
            }
            ViewerEvent::ResetAll => {
                self.with_viewer_room(socket_id, |room| room.reset_all());
            }
            ViewerEvent::ClaimRobot { id, claim, user } => {
                self.with_viewer_room(socket_id, |room| {
                    room.claim_robot(id, *claim, user, socket_id)
                });
            }
            ViewerEvent::RobotButton { id, pressed, user } => {
                self.with_viewer_room(socket_id, |room| room.robot_button(id, *pressed, user));
            }
        }
    }

    fn with_viewer_room(&self, socket_id: u64, f: impl FnOnce(&mut Room)) {
        let Some(room_id) = self.viewer_rooms.get(&socket_id) else {
            log::debug!("event from viewer {socket_id} outside any room");
            return;
        };
        if let Some(room) = self.rooms.get(room_id) {
            f(&mut lock(room));
        }
    }

    /// Drop rooms that stayed hibernating past the configured limit.
    pub fn collect_garbage(&mut self) -> usize {
        let max_hibernate = self.config.max_hibernate;
        let expired: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, room)| {
                let room = lock(room);
                room.hibernating_for()
                    .is_some_and(|idle| idle > max_hibernate)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(room) = self.rooms.remove(id) {
                lock(&room).dispose();
                log::info!("room {id} garbage collected");
            }
            self.viewer_rooms.retain(|_, room_id| room_id != id);
        }
        expired.len()
    }
}

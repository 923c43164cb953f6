use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::events::SimEvent;
use crate::physics::{Aabb, BodyHandle, PhysicsEngine};

/// Axis-aligned volume that raises enter/exit edges for the bodies it watches.
/// Occupancy is mirrored into a shared flag so an IoTScape sensor can poll it
/// without touching the simulation.
pub struct TriggerVolume {
    region: Aabb,
    watched: Vec<(String, BodyHandle)>,
    inside: HashSet<String>,
    one_shot: bool,
    active: bool,
    occupied: Arc<AtomicBool>,
}

impl TriggerVolume {
    pub fn new(region: Aabb) -> Self {
        Self {
            region,
            watched: Vec::new(),
            inside: HashSet::new(),
            one_shot: false,
            active: true,
            occupied: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }

    pub fn watch(&mut self, name: impl Into<String>, handle: BodyHandle) {
        self.watched.push((name.into(), handle));
    }

    pub fn occupancy_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.occupied)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn update(&mut self, name: &str, engine: &dyn PhysicsEngine, events: &mut Vec<SimEvent>) {
        if !self.active {
            return;
        }

        for (body_name, handle) in &self.watched {
            let Some(state) = engine.body_state(*handle) else {
                continue;
            };
            let contained = self.region.contains(state.position);
            let was_inside = self.inside.contains(body_name);

            if contained && !was_inside {
                self.inside.insert(body_name.clone());
                events.push(SimEvent::TriggerEnter {
                    trigger: name.to_string(),
                    body: body_name.clone(),
                });
                if self.one_shot {
                    self.active = false;
                }
            } else if !contained && was_inside {
                self.inside.remove(body_name);
                events.push(SimEvent::TriggerExit {
                    trigger: name.to_string(),
                    body: body_name.clone(),
                });
            }
        }

        self.occupied.store(!self.inside.is_empty(), Ordering::Relaxed);
    }

    pub fn reset(&mut self) {
        self.inside.clear();
        self.active = true;
        self.occupied.store(false, Ordering::Relaxed);
    }
}

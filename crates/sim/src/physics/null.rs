use glam::{Quat, Vec3};

use super::{
    Aabb, BodyHandle, BodyState, CollisionFilter, PhysicsEngine, RayHit, SimulationError,
    StaticHandle, StaticState,
};

const SLEEP_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone)]
struct NullBody {
    position: Vec3,
    orientation: Quat,
    linvel: Vec3,
    angvel: Vec3,
    kinematic: bool,
    moved: bool,
}

#[derive(Debug, Clone)]
struct NullStatic {
    position: Vec3,
    orientation: Quat,
}

/// Kinematic-only engine: positions integrate by `v * dt`, no collision or
/// contact resolution. Scenarios that only exercise sensor and IoT logic run
/// here without paying full rigid-body cost.
pub struct NullEngine {
    bodies: Vec<NullBody>,
    statics: Vec<NullStatic>,
    gravity: Option<Vec3>,
    boundary: Option<Aabb>,
}

impl NullEngine {
    pub fn new() -> Self {
        Self {
            bodies: Vec::new(),
            statics: Vec::new(),
            gravity: None,
            boundary: None,
        }
    }

    pub fn with_gravity(gravity: Vec3) -> Self {
        Self {
            gravity: Some(gravity),
            ..Self::new()
        }
    }

    fn body(&self, handle: BodyHandle) -> Option<&NullBody> {
        self.bodies.get(handle.0 as usize)
    }

    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut NullBody> {
        self.bodies.get_mut(handle.0 as usize)
    }

    fn clamp_to_boundary(body: &mut NullBody, boundary: &Aabb) {
        let p = &mut body.position;
        let v = &mut body.linvel;

        if p.x < boundary.min.x {
            p.x = boundary.min.x;
            v.x = 0.0;
        } else if p.x > boundary.max.x {
            p.x = boundary.max.x;
            v.x = 0.0;
        }
        if p.y < boundary.min.y {
            p.y = boundary.min.y;
            v.y = 0.0;
        } else if p.y > boundary.max.y {
            p.y = boundary.max.y;
            v.y = 0.0;
        }
        if p.z < boundary.min.z {
            p.z = boundary.min.z;
            v.z = 0.0;
        } else if p.z > boundary.max.z {
            p.z = boundary.max.z;
            v.z = 0.0;
        }
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsEngine for NullEngine {
    fn create_box(
        &mut self,
        position: Vec3,
        orientation: Quat,
        _size: Vec3,
        _mass: f32,
        kinematic: bool,
    ) -> BodyHandle {
        let handle = BodyHandle(self.bodies.len() as u32);
        self.bodies.push(NullBody {
            position,
            orientation,
            linvel: Vec3::ZERO,
            angvel: Vec3::ZERO,
            kinematic,
            moved: false,
        });
        handle
    }

    fn create_static_box(&mut self, position: Vec3, orientation: Quat, _size: Vec3) -> StaticHandle {
        let handle = StaticHandle(self.statics.len() as u32);
        self.statics.push(NullStatic {
            position,
            orientation,
        });
        handle
    }

    fn step(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }

        let gravity = self.gravity;
        let boundary = self.boundary;

        for body in &mut self.bodies {
            if let Some(g) = gravity {
                if !body.kinematic {
                    body.linvel += g * dt;
                }
            }

            let before = body.position;
            body.position += body.linvel * dt;
            if body.angvel.y.abs() > 0.0 {
                body.orientation = (Quat::from_rotation_y(body.angvel.y * dt) * body.orientation)
                    .normalize();
            }

            if let Some(bounds) = &boundary {
                Self::clamp_to_boundary(body, bounds);
            }

            body.moved = (body.position - before).length_squared() > SLEEP_EPSILON * SLEEP_EPSILON;
        }
    }

    fn body_state(&self, handle: BodyHandle) -> Option<BodyState> {
        self.body(handle).map(|b| BodyState {
            position: b.position,
            orientation: b.orientation,
            linvel: b.linvel,
            angvel: b.angvel,
            awake: b.moved
                || b.linvel.length_squared() > SLEEP_EPSILON
                || b.angvel.length_squared() > SLEEP_EPSILON,
        })
    }

    fn static_state(&self, handle: StaticHandle) -> Option<StaticState> {
        self.statics.get(handle.0 as usize).map(|s| StaticState {
            position: s.position,
            orientation: s.orientation,
        })
    }

    fn set_position(&mut self, handle: BodyHandle, position: Vec3) {
        if let Some(body) = self.body_mut(handle) {
            body.position = position;
        }
    }

    fn set_orientation(&mut self, handle: BodyHandle, orientation: Quat) {
        if let Some(body) = self.body_mut(handle) {
            body.orientation = orientation.normalize();
        }
    }

    fn set_linvel(&mut self, handle: BodyHandle, velocity: Vec3, _wake: bool) {
        if let Some(body) = self.body_mut(handle) {
            body.linvel = velocity;
        }
    }

    fn set_angvel(&mut self, handle: BodyHandle, velocity: Vec3, _wake: bool) {
        if let Some(body) = self.body_mut(handle) {
            body.angvel = velocity;
        }
    }

    fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3) {
        // Unit mass: an impulse is a velocity change.
        if let Some(body) = self.body_mut(handle) {
            body.linvel += impulse;
        }
    }

    fn wake(&mut self, handle: BodyHandle) {
        if let Some(body) = self.body_mut(handle) {
            body.moved = true;
        }
    }

    fn raycast(
        &self,
        _origin: Vec3,
        _direction: Vec3,
        _max_distance: f32,
    ) -> Result<Option<RayHit>, SimulationError> {
        Err(SimulationError::unsupported("raycast"))
    }

    fn set_collision_filter(
        &mut self,
        _handle: BodyHandle,
        _filter: CollisionFilter,
    ) -> Result<(), SimulationError> {
        Err(SimulationError::unsupported("collision filter"))
    }

    fn set_boundary(&mut self, boundary: Aabb) {
        self.boundary = Some(boundary);
    }
}

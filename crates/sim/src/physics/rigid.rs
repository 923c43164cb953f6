use glam::{Quat, Vec3};
use rapier3d::prelude::*;

use super::{
    Aabb, BodyHandle, BodyState, CollisionFilter, PhysicsEngine, RayHit, SimulationError,
    StaticHandle, StaticState,
};

fn encode_filter(filter: &CollisionFilter) -> u128 {
    (filter.owner as u128)
        | ((filter.memberships.bits() as u128) << 32)
        | ((filter.collides_with.bits() as u128) << 48)
}

fn pair_allowed(a: u128, b: u128) -> bool {
    let owner_a = (a & 0xffff_ffff) as u32;
    let owner_b = (b & 0xffff_ffff) as u32;
    if owner_a == 0 || owner_b == 0 || owner_a != owner_b {
        return true;
    }

    let member_a = ((a >> 32) & 0xffff) as u16;
    let filter_a = ((a >> 48) & 0xffff) as u16;
    let member_b = ((b >> 32) & 0xffff) as u16;
    let filter_b = ((b >> 48) & 0xffff) as u16;
    (member_a & filter_b) != 0 && (member_b & filter_a) != 0
}

struct SubGroupHooks;

impl PhysicsHooks for SubGroupHooks {
    fn filter_contact_pair(&self, context: &PairFilterContext) -> Option<SolverFlags> {
        let a = context.colliders[context.collider1].user_data;
        let b = context.colliders[context.collider2].user_data;
        if pair_allowed(a, b) {
            Some(SolverFlags::COMPUTE_IMPULSES)
        } else {
            None
        }
    }

    fn filter_intersection_pair(&self, context: &PairFilterContext) -> bool {
        let a = context.colliders[context.collider1].user_data;
        let b = context.colliders[context.collider2].user_data;
        pair_allowed(a, b)
    }
}

/// Full rigid-body engine backed by rapier. Friction combines as the
/// symmetric per-pair average; same-owner bodies are filtered through the
/// sub-group masks in [`SubGroupHooks`].
pub struct RigidEngine {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector,
    handles: Vec<RigidBodyHandle>,
    static_handles: Vec<ColliderHandle>,
}

impl RigidEngine {
    const DEFAULT_FRICTION: f32 = 0.5;

    pub fn new() -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters: IntegrationParameters::default(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: Vector::new(0.0, -9.81, 0.0),
            handles: Vec::new(),
            static_handles: Vec::new(),
        }
    }

    fn rigid_handle(&self, handle: BodyHandle) -> Option<RigidBodyHandle> {
        self.handles.get(handle.0 as usize).copied()
    }

    fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.rigid_handle(handle).and_then(|h| self.bodies.get(h))
    }

    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        let rigid = self.rigid_handle(handle)?;
        self.bodies.get_mut(rigid)
    }

    fn query_pipeline(&self) -> QueryPipeline<'_> {
        self.broad_phase.as_query_pipeline(
            self.narrow_phase.query_dispatcher(),
            &self.bodies,
            &self.colliders,
            QueryFilter::default(),
        )
    }
}

impl Default for RigidEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsEngine for RigidEngine {
    fn create_box(
        &mut self,
        position: Vec3,
        orientation: Quat,
        size: Vec3,
        mass: f32,
        kinematic: bool,
    ) -> BodyHandle {
        let builder = if kinematic {
            RigidBodyBuilder::kinematic_velocity_based()
        } else {
            RigidBodyBuilder::dynamic().ccd_enabled(true)
        };
        let body = builder
            .translation(Vector::new(position.x, position.y, position.z))
            .build();
        let rigid = self.bodies.insert(body);

        let collider = ColliderBuilder::cuboid(size.x / 2.0, size.y / 2.0, size.z / 2.0)
            .mass(mass)
            .friction(Self::DEFAULT_FRICTION)
            .friction_combine_rule(CoefficientCombineRule::Average)
            .build();
        self.colliders
            .insert_with_parent(collider, rigid, &mut self.bodies);

        let handle = BodyHandle(self.handles.len() as u32);
        self.handles.push(rigid);
        self.set_orientation(handle, orientation);
        handle
    }

    fn create_static_box(&mut self, position: Vec3, orientation: Quat, size: Vec3) -> StaticHandle {
        let rot = Rotation::from_xyzw(orientation.x, orientation.y, orientation.z, orientation.w)
            .normalize();
        let collider = ColliderBuilder::cuboid(size.x / 2.0, size.y / 2.0, size.z / 2.0)
            .friction(Self::DEFAULT_FRICTION)
            .friction_combine_rule(CoefficientCombineRule::Average)
            .position(Pose::from_parts(
                Vector::new(position.x, position.y, position.z),
                rot,
            ))
            .build();
        let collider_handle = self.colliders.insert(collider);

        let handle = StaticHandle(self.static_handles.len() as u32);
        self.static_handles.push(collider_handle);
        handle
    }

    fn step(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }

        self.integration_parameters.dt = dt;
        self.pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &SubGroupHooks,
            &(),
        );
    }

    fn body_state(&self, handle: BodyHandle) -> Option<BodyState> {
        self.body(handle).map(|body| {
            let t = body.translation();
            let r = body.rotation();
            let lv = body.linvel();
            let av = body.angvel();
            BodyState {
                position: Vec3::new(t.x, t.y, t.z),
                orientation: Quat::from_xyzw(r.x, r.y, r.z, r.w),
                linvel: Vec3::new(lv.x, lv.y, lv.z),
                angvel: Vec3::new(av.x, av.y, av.z),
                awake: !body.is_sleeping(),
            }
        })
    }

    fn static_state(&self, handle: StaticHandle) -> Option<StaticState> {
        let collider_handle = self.static_handles.get(handle.0 as usize)?;
        self.colliders.get(*collider_handle).map(|collider| {
            let t = collider.translation();
            let r = collider.rotation();
            StaticState {
                position: Vec3::new(t.x, t.y, t.z),
                orientation: Quat::from_xyzw(r.x, r.y, r.z, r.w),
            }
        })
    }

    fn set_position(&mut self, handle: BodyHandle, position: Vec3) {
        if let Some(body) = self.body_mut(handle) {
            let current_rot = *body.rotation();
            let new_pose = Pose::from_parts(
                Vector::new(position.x, position.y, position.z),
                current_rot,
            );
            body.set_position(new_pose, true);
        }
    }

    fn set_orientation(&mut self, handle: BodyHandle, orientation: Quat) {
        if let Some(body) = self.body_mut(handle) {
            let rot = Rotation::from_xyzw(
                orientation.x,
                orientation.y,
                orientation.z,
                orientation.w,
            )
            .normalize();
            let translation = body.translation();
            let new_pose = Pose::from_parts(translation, rot);
            body.set_position(new_pose, true);
        }
    }

    fn set_linvel(&mut self, handle: BodyHandle, velocity: Vec3, wake: bool) {
        if let Some(body) = self.body_mut(handle) {
            body.set_linvel(Vector::new(velocity.x, velocity.y, velocity.z), wake);
        }
    }

    fn set_angvel(&mut self, handle: BodyHandle, velocity: Vec3, wake: bool) {
        if let Some(body) = self.body_mut(handle) {
            body.set_angvel(Vector::new(velocity.x, velocity.y, velocity.z), wake);
        }
    }

    fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3) {
        if let Some(body) = self.body_mut(handle) {
            body.apply_impulse(Vector::new(impulse.x, impulse.y, impulse.z), true);
        }
    }

    fn wake(&mut self, handle: BodyHandle) {
        if let Some(body) = self.body_mut(handle) {
            body.wake_up(true);
        }
    }

    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
    ) -> Result<Option<RayHit>, SimulationError> {
        let query = self.query_pipeline();
        let ray = Ray::new(
            Vector::new(origin.x, origin.y, origin.z),
            Vector::new(direction.x, direction.y, direction.z),
        );

        Ok(query.cast_ray(&ray, max_distance, true).map(|(_, toi)| {
            let point = origin + direction * toi;
            RayHit {
                point,
                distance: toi,
            }
        }))
    }

    fn set_collision_filter(
        &mut self,
        handle: BodyHandle,
        filter: CollisionFilter,
    ) -> Result<(), SimulationError> {
        let rigid = self.rigid_handle(handle).ok_or(SimulationError::UnknownBody)?;
        let body = self.bodies.get(rigid).ok_or(SimulationError::UnknownBody)?;
        let encoded = encode_filter(&filter);

        let collider_handles: Vec<_> = body.colliders().to_vec();
        for collider_handle in collider_handles {
            if let Some(collider) = self.colliders.get_mut(collider_handle) {
                collider.user_data = encoded;
                collider.set_active_hooks(
                    ActiveHooks::FILTER_CONTACT_PAIRS | ActiveHooks::FILTER_INTERSECTION_PAIR,
                );
            }
        }
        Ok(())
    }

    fn set_boundary(&mut self, _boundary: Aabb) {}
}

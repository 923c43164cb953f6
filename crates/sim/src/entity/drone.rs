use std::sync::{Arc, Mutex, PoisonError};

use glam::Vec3;
use serde_json::json;

use crate::iotscape::{IoTScapeError, IoTScapeObject, MethodDescriptor, ServiceDefinition};
use crate::physics::PhysicsEngine;

use super::DynamicBody;

const CLIMB_GAIN: f32 = 1.5;
const MAX_CLIMB_RATE: f32 = 2.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct DroneCommand {
    pub velocity: Vec3,
    pub target_altitude: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DroneTelemetry {
    pub position: Vec3,
}

/// Flying unit steered entirely over IoTScape. Method handlers write the
/// shared command cell; the entity reads it once per tick and never blocks on
/// the registry.
pub struct DroneUnit {
    command: Arc<Mutex<DroneCommand>>,
    telemetry: Arc<Mutex<DroneTelemetry>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DroneUnit {
    pub fn new() -> Self {
        Self {
            command: Arc::new(Mutex::new(DroneCommand::default())),
            telemetry: Arc::new(Mutex::new(DroneTelemetry::default())),
        }
    }

    pub fn command_cell(&self) -> Arc<Mutex<DroneCommand>> {
        Arc::clone(&self.command)
    }

    pub fn update(&mut self, body: &DynamicBody, engine: &mut dyn PhysicsEngine) {
        let command = *lock(&self.command);
        let Some(state) = engine.body_state(body.handle()) else {
            return;
        };

        let mut velocity = command.velocity;
        if let Some(target) = command.target_altitude {
            velocity.y =
                ((target - state.position.y) * CLIMB_GAIN).clamp(-MAX_CLIMB_RATE, MAX_CLIMB_RATE);
        }
        engine.set_linvel(body.handle(), velocity, velocity.length_squared() > 0.0);

        lock(&self.telemetry).position = state.position;
    }

    pub fn reset(&mut self) {
        *lock(&self.command) = DroneCommand::default();
    }

    /// Service definition plus method handlers bound to this drone's shared
    /// cells. Registering the returned object is the caller's job.
    pub fn build_service(&self) -> IoTScapeObject {
        let definition = ServiceDefinition::new("drone", "1.0")
            .describe("Simulated quadcopter with velocity and altitude-hold control")
            .method(
                "setVelocity",
                MethodDescriptor::new()
                    .param("x", "number")
                    .param("y", "number")
                    .param("z", "number"),
            )
            .method("setAltitude", MethodDescriptor::new().param("height", "number"))
            .method("stop", MethodDescriptor::new())
            .method(
                "getPosition",
                MethodDescriptor::new().returns(&["number", "number", "number"]),
            );

        let command = Arc::clone(&self.command);
        let set_velocity = move |params: &[String]| {
            let mut cmd = lock(&command);
            cmd.velocity = Vec3::new(
                parse_number("setVelocity", params, 0)?,
                parse_number("setVelocity", params, 1)?,
                parse_number("setVelocity", params, 2)?,
            );
            cmd.target_altitude = None;
            Ok(vec![])
        };

        let command = Arc::clone(&self.command);
        let set_altitude = move |params: &[String]| {
            lock(&command).target_altitude = Some(parse_number("setAltitude", params, 0)?);
            Ok(vec![])
        };

        let command = Arc::clone(&self.command);
        let stop = move |_params: &[String]| {
            *lock(&command) = DroneCommand::default();
            Ok(vec![])
        };

        let telemetry = Arc::clone(&self.telemetry);
        let get_position = move |_params: &[String]| {
            let position = lock(&telemetry).position;
            Ok(vec![json!(position.x), json!(position.y), json!(position.z)])
        };

        IoTScapeObject::new(definition)
            .method("setVelocity", set_velocity)
            .method("setAltitude", set_altitude)
            .method("stop", stop)
            .method("getPosition", get_position)
    }
}

impl Default for DroneUnit {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number(method: &'static str, params: &[String], index: usize) -> Result<f32, IoTScapeError> {
    params
        .get(index)
        .and_then(|raw| raw.parse::<f32>().ok())
        .ok_or(IoTScapeError::BadParameter { method, index })
}

use glam::{Quat, Vec3};
use serde_json::json;

use crate::entity::{TriggerVolume, VisualInfo};
use crate::iotscape::{IoTScapeObject, MethodDescriptor, ServiceDefinition};
use crate::physics::{Aabb, CollisionFilter, NullEngine, PhysicsEngine, SubGroups};
use crate::room::Room;

use super::Scenario;

/// Flat ground, one robot, a few pushable crates.
pub struct DefaultScenario;

impl Scenario for DefaultScenario {
    fn id(&self) -> &'static str {
        "default"
    }

    fn setup(&self, room: &mut Room) {
        room.add_ground(25.0);
        let robot = room.add_robot(Vec3::new(0.0, 0.07, 0.0), Quat::IDENTITY);
        apply_robot_filter(room, &robot, 1);

        room.add_block(
            Vec3::new(0.8, 0.25, -1.2),
            Vec3::splat(0.5),
            2.0,
            VisualInfo::textured("#8b5a2b", "crate"),
        );
        room.add_block(
            Vec3::new(-0.9, 0.25, -1.8),
            Vec3::splat(0.5),
            2.0,
            VisualInfo::textured("#8b5a2b", "crate"),
        );
    }
}

/// Walled course ending in a goal trigger; two robots race through it.
pub struct ObstacleScenario;

impl Scenario for ObstacleScenario {
    fn id(&self) -> &'static str {
        "obstacles"
    }

    fn setup(&self, room: &mut Room) {
        room.add_ground(25.0);

        let wall_visual = VisualInfo::color("#9a9a9a");
        room.add_static_box(
            Vec3::new(0.0, 0.5, -3.0),
            Vec3::new(4.0, 1.0, 0.2),
            wall_visual.clone(),
        );
        room.add_static_box(
            Vec3::new(-2.5, 0.5, -5.0),
            Vec3::new(0.2, 1.0, 4.0),
            wall_visual.clone(),
        );
        room.add_static_box(
            Vec3::new(2.5, 0.5, -5.0),
            Vec3::new(0.2, 1.0, 4.0),
            wall_visual,
        );

        let mut robots = Vec::new();
        for (i, x) in [(-0.8f32), 0.8].into_iter().enumerate() {
            let robot = room.add_robot(Vec3::new(x, 0.07, 0.0), Quat::IDENTITY);
            apply_robot_filter(room, &robot, (i + 1) as u32);
            robots.push(robot);
        }

        let mut goal = TriggerVolume::new(Aabb::from_center(
            Vec3::new(0.0, 0.5, -8.0),
            Vec3::new(2.0, 1.0, 0.5),
        ));
        for robot in &robots {
            if let Some(handle) = room.simulation().body_handle(robot) {
                goal.watch(robot.clone(), handle);
            }
        }
        room.add_trigger(goal);

        room.add_marker(
            Vec3::new(0.0, 0.01, -8.0),
            VisualInfo::textured("#ffd60a", "finish_line"),
        );
    }
}

/// IoT-only room on the null engine: a drone, a proximity sensor over a
/// landing pad, no collision cost.
pub struct IotSensorScenario;

impl Scenario for IotSensorScenario {
    fn id(&self) -> &'static str {
        "iot_sensors"
    }

    fn engine(&self) -> Box<dyn PhysicsEngine> {
        let mut engine = NullEngine::new();
        engine.set_boundary(Aabb::new(
            Vec3::new(-20.0, 0.0, -20.0),
            Vec3::new(20.0, 15.0, 20.0),
        ));
        Box::new(engine)
    }

    fn setup(&self, room: &mut Room) {
        let drone = room.add_drone(Vec3::new(0.0, 1.0, 0.0));

        let mut pad = TriggerVolume::new(Aabb::from_center(
            Vec3::new(5.0, 0.5, 5.0),
            Vec3::new(1.0, 0.5, 1.0),
        ));
        if let Some(handle) = room.simulation().body_handle(&drone) {
            pad.watch(drone, handle);
        }
        let occupied = pad.occupancy_flag();
        room.add_trigger(pad);

        let definition = ServiceDefinition::new("proximity", "1.0")
            .describe("Occupancy sensor over the landing pad")
            .method("isOccupied", MethodDescriptor::new().returns(&["boolean"]))
            .event("triggered", &["body"]);
        let sensor = IoTScapeObject::new(definition)
            .with_device_type("pad")
            .method("isOccupied", move |_params: &[String]| {
                Ok(vec![json!(occupied.load(std::sync::atomic::Ordering::Relaxed))])
            });
        room.register_device(sensor);

        room.add_marker(
            Vec3::new(5.0, 0.01, 5.0),
            VisualInfo::textured("#e5383b", "landing_pad"),
        );
    }
}

/// Robots carry an owner-scoped filter so multi-part attachments never
/// self-collide; distinct owners are unaffected.
fn apply_robot_filter(room: &mut Room, robot: &str, owner: u32) {
    let Some(handle) = room.simulation().body_handle(robot) else {
        return;
    };
    let filter = CollisionFilter::new(owner, SubGroups::GROUP_0, SubGroups::all());
    if let Err(e) = room
        .simulation_mut()
        .engine_mut()
        .set_collision_filter(handle, filter)
    {
        log::debug!("collision filter skipped for {robot}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomConfig;

    #[test]
    fn default_scenario_spawns_a_robot() {
        let room = Room::new("r1", &DefaultScenario, RoomConfig::default(), None);
        let robots = room.simulation().robot_names();
        assert_eq!(robots.len(), 1);
        assert!(robots[0].starts_with("robot_"));
        assert!(room.simulation().entity_count() >= 4);
    }

    #[test]
    fn obstacle_scenario_has_two_robots_and_a_trigger() {
        let room = Room::new("r2", &ObstacleScenario, RoomConfig::default(), None);
        assert_eq!(room.simulation().robot_names().len(), 2);
        assert!(room.simulation().entity("trigger_0").is_some());
    }

    #[test]
    fn iot_scenario_runs_on_the_null_engine() {
        let mut room = Room::new("r3", &IotSensorScenario, RoomConfig::default(), None);
        // No raycast support on the null engine.
        assert!(
            room.simulation_mut()
                .engine_mut()
                .raycast(Vec3::ZERO, Vec3::NEG_Z, 1.0)
                .is_err()
        );
        assert_eq!(room.simulation().robot_names().len(), 0);
    }
}

use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use glam::Vec3;
use serde_json::{Value, json};

use robolab::robot::{CMD_SET_SPEED, decode_frame, push_i16_le};
use robolab::scenario::{DefaultScenario, IotSensorScenario};
use robolab::{IoTScapeRegistry, RobotConfig, Room, RoomConfig};

fn set_speed(left: i16, right: i16) -> Vec<u8> {
    let mut data = vec![CMD_SET_SPEED];
    push_i16_le(&mut data, left);
    push_i16_le(&mut data, right);
    data
}

fn fast_robot_config() -> RoomConfig {
    RoomConfig {
        robot: RobotConfig {
            min_time_between_messages: Duration::ZERO,
            ..RobotConfig::default()
        },
        ..RoomConfig::default()
    }
}

#[test]
fn robot_drives_forward_and_reset_restores_the_pose() {
    let mut room = Room::new("e2e", &DefaultScenario, fast_robot_config(), None);
    let robot = room.simulation().robot_names()[0].clone();
    let handle = room.simulation().body_handle(&robot).unwrap();

    // Let the robot settle onto the ground.
    for _ in 0..60 {
        room.update(1.0 / 60.0);
    }
    let start = room.simulation().engine().body_state(handle).unwrap();

    room.simulation_mut()
        .send_robot_command(&robot, &set_speed(140, 140))
        .unwrap();

    // Three simulated seconds of straight driving.
    for _ in 0..180 {
        room.update(1.0 / 60.0);
    }

    let state = room.simulation().engine().body_state(handle).unwrap();
    let displacement = state.position - start.position;
    let forward = start.orientation * Vec3::NEG_Z;
    assert!(
        displacement.dot(forward) > 0.2,
        "expected forward travel, got {displacement:?}"
    );

    let ticks = robot_ticks(&room, &robot);
    assert!(ticks.0 > 0 && ticks.1 > 0);

    room.reset_robot(&robot, "ada");
    let state = room.simulation().engine().body_state(handle).unwrap();
    assert!((state.position - start.position).length() < 0.1);
    assert_eq!(robot_ticks(&room, &robot), (0, 0));
}

fn robot_ticks(room: &Room, name: &str) -> (i32, i32) {
    match room.simulation().entity(name).map(|e| e.kind()) {
        Some(robolab::EntityKind::Robot(link)) => link.encoder_ticks(),
        _ => panic!("{name} is not a robot"),
    }
}

#[test]
fn robot_heartbeats_echoes_and_obeys_over_udp() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    server
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();

    let config = RoomConfig {
        robot: RobotConfig {
            server_addr: Some(server.local_addr().unwrap()),
            min_time_between_messages: Duration::ZERO,
            ..RobotConfig::default()
        },
        ..RoomConfig::default()
    };
    let mut room = Room::new("udp", &DefaultScenario, config, None);
    let robot = room.simulation().robot_names()[0].clone();
    let handle = room.simulation().body_handle(&robot).unwrap();

    room.update(1.0 / 60.0);

    // First outbound frame is the heartbeat.
    let mut buf = [0u8; 512];
    let (len, robot_addr) = server.recv_from(&mut buf).unwrap();
    let (id, _millis, payload) = decode_frame(&buf[..len]).expect("valid frame");
    assert_eq!(payload, [b'I'].as_slice());
    assert_eq!(id[0] & 0b11, 0b10);

    // Command the robot from the control-server side.
    let command = set_speed(200, 200);
    server.send_to(&command, robot_addr).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    for _ in 0..5 {
        room.update(1.0 / 60.0);
    }

    // The inbound datagram is echoed back verbatim as a frame payload.
    let mut echoed = false;
    while let Ok(len) = server.recv(&mut buf) {
        if let Some((_, _, payload)) = decode_frame(&buf[..len]) {
            if payload == command.as_slice() {
                echoed = true;
                break;
            }
        }
    }
    assert!(echoed, "echo frame not seen");

    let state = room.simulation().engine().body_state(handle).unwrap();
    assert!(state.linvel.length() > 0.01, "robot ignored the command");
}

#[test]
fn iot_room_is_driven_and_kept_awake_by_rpc_traffic() {
    let router = UdpSocket::bind("127.0.0.1:0").unwrap();
    router
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();

    let registry = Arc::new(Mutex::new(
        IoTScapeRegistry::connect(router.local_addr().unwrap())
            .unwrap()
            .with_prefix("cafe"),
    ));

    let mut room = Room::new(
        "iot",
        &IotSensorScenario,
        RoomConfig::default(),
        Some(Arc::clone(&registry)),
    );

    let drone_id = {
        let registry = registry.lock().unwrap();
        let ids = registry.device_ids("drone");
        assert_eq!(ids.len(), 1);
        assert!(!registry.device_ids("proximity").is_empty());
        ids[0].clone()
    };

    // Fly toward the landing pad.
    let request = json!({
        "id": "req-1",
        "service": "drone",
        "device": drone_id,
        "function": "setVelocity",
        "params": ["2.5", "0", "2.5"],
    });
    registry
        .lock()
        .unwrap()
        .dispatch(request.to_string().as_bytes());

    let activity = room.activity();
    assert!(activity.last_mark() > 0 || activity.idle() < Duration::from_millis(50));

    for _ in 0..180 {
        room.update(1.0 / 60.0);
    }

    let position: Value = {
        let request = json!({
            "id": "req-2",
            "service": "drone",
            "device": drone_id,
            "function": "getPosition",
        });
        registry
            .lock()
            .unwrap()
            .dispatch(request.to_string().as_bytes());

        // Drain router datagrams until the req-2 response shows up.
        let mut buf = [0u8; 4096];
        let mut found = Value::Null;
        while let Ok(len) = router.recv(&mut buf) {
            let value: Value = serde_json::from_slice(&buf[..len]).unwrap();
            if value.get("request") == Some(&Value::String("req-2".to_string())) {
                found = value;
                break;
            }
        }
        found
    };

    assert_ne!(position, Value::Null, "no getPosition response observed");
    let x = position["response"][0].as_f64().unwrap();
    assert!(x > 1.0, "drone did not move, x = {x}");
}

#[test]
fn hibernating_iot_room_reregisters_on_wake() {
    let registry = Arc::new(Mutex::new(IoTScapeRegistry::new().with_prefix("cafe")));

    let config = RoomConfig {
        timeout: Duration::from_millis(10),
        ..RoomConfig::default()
    };
    let mut room = Room::new(
        "nap",
        &IotSensorScenario,
        config,
        Some(Arc::clone(&registry)),
    );

    let drone_id = registry.lock().unwrap().device_ids("drone")[0].clone();
    assert!(registry.lock().unwrap().is_registered("drone", &drone_id));

    std::thread::sleep(Duration::from_millis(20));
    room.update(1.0 / 60.0);
    assert!(room.is_hibernating());
    assert!(!registry.lock().unwrap().is_registered("drone", &drone_id));

    // RPC traffic against the room's devices counts as an interaction.
    room.activity().touch();
    room.update(1.0 / 60.0);
    assert!(!room.is_hibernating());
    assert!(registry.lock().unwrap().is_registered("drone", &drone_id));
}

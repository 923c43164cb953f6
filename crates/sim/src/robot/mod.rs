mod frame;
mod id;

pub use frame::{HEADER_LEN, decode_frame, encode_frame, push_i16_le, push_i32_le, read_i16_le, read_u16_le};
pub use id::RobotId;

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;

use crate::activity::ActivityMonitor;
use crate::entity::DynamicBody;
use crate::events::SimEvent;
use crate::physics::PhysicsEngine;

pub const CMD_HEARTBEAT: u8 = b'I';
pub const CMD_SET_SPEED: u8 = b'S';
pub const CMD_DRIVE: u8 = b'D';
pub const CMD_BEEP: u8 = b'B';
pub const CMD_SET_LED: u8 = b'L';
pub const CMD_GET_RANGE: u8 = b'R';
pub const CMD_GET_TICKS: u8 = b'T';
pub const CMD_BUTTON: u8 = b'P';

pub const ROBOT_SIZE: Vec3 = Vec3::new(0.09, 0.05, 0.12);
pub const ROBOT_MASS: f32 = 0.5;

const TICKS_PER_METER: f32 = 700.0;
const TRACK_WIDTH: f32 = 0.12;
const DRIVE_SPEED: f32 = 150.0;
const MAX_RANGE_M: f32 = 3.0;

#[derive(Debug, thiserror::Error)]
pub enum RobotError {
    #[error("command code {0:#04x} is already registered")]
    DuplicateCommand(u8),
}

#[derive(Debug, Clone)]
pub struct RobotConfig {
    /// Control server the emulated device reports to. `None` keeps the robot
    /// offline (still simulated, nothing sent).
    pub server_addr: Option<SocketAddr>,
    pub heartbeat_period: Duration,
    pub min_time_between_messages: Duration,
    /// Command codes exempt from the inbound rate gate.
    pub non_delayed: Vec<u8>,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            server_addr: None,
            heartbeat_period: Duration::from_secs(1),
            min_time_between_messages: Duration::from_secs_f64(1.0 / 45.0),
            non_delayed: vec![CMD_HEARTBEAT, CMD_SET_LED, CMD_GET_RANGE, CMD_GET_TICKS, CMD_BUTTON],
        }
    }
}

pub struct CommandCtx<'a> {
    pub name: &'a str,
    pub body: &'a mut DynamicBody,
    pub engine: &'a mut dyn PhysicsEngine,
    pub events: &'a mut Vec<SimEvent>,
}

pub type CommandFn = fn(&mut RobotLink, &mut CommandCtx<'_>, &[u8]);

#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub code: u8,
    pub non_delayed: bool,
    pub handler: CommandFn,
}

#[derive(Default)]
pub struct CommandTable {
    handlers: HashMap<u8, CommandSpec>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate codes are a programming error and fail fast.
    pub fn register(&mut self, spec: CommandSpec) -> Result<(), RobotError> {
        if self.handlers.contains_key(&spec.code) {
            return Err(RobotError::DuplicateCommand(spec.code));
        }
        self.handlers.insert(spec.code, spec);
        Ok(())
    }

    pub fn get(&self, code: u8) -> Option<CommandSpec> {
        self.handlers.get(&code).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DriveMode {
    Speed,
    Ticks { left_target: f64, right_target: f64 },
}

#[derive(Debug, Clone, Copy)]
struct DriveState {
    left: f32,
    right: f32,
    mode: DriveMode,
    left_ticks: f64,
    right_ticks: f64,
}

impl Default for DriveState {
    fn default() -> Self {
        Self {
            left: 0.0,
            right: 0.0,
            mode: DriveMode::Speed,
            left_ticks: 0.0,
            right_ticks: 0.0,
        }
    }
}

impl DriveState {
    fn set_speed(&mut self, left: f32, right: f32) {
        self.left = left;
        self.right = right;
        self.mode = DriveMode::Speed;
    }

    fn drive_ticks(&mut self, left_delta: f64, right_delta: f64) {
        self.mode = DriveMode::Ticks {
            left_target: self.left_ticks + left_delta,
            right_target: self.right_ticks + right_delta,
        };
        self.left = DRIVE_SPEED * left_delta.signum() as f32;
        self.right = DRIVE_SPEED * right_delta.signum() as f32;
    }

    /// Advance the encoders and return the wheel speeds for this tick,
    /// stopping each wheel that reached its target.
    fn tick(&mut self, dt: f32) -> (f32, f32) {
        if let DriveMode::Ticks {
            left_target,
            right_target,
        } = self.mode
        {
            if (self.left > 0.0 && self.left_ticks >= left_target)
                || (self.left < 0.0 && self.left_ticks <= left_target)
            {
                self.left = 0.0;
            }
            if (self.right > 0.0 && self.right_ticks >= right_target)
                || (self.right < 0.0 && self.right_ticks <= right_target)
            {
                self.right = 0.0;
            }
            if self.left == 0.0 && self.right == 0.0 {
                self.mode = DriveMode::Speed;
            }
        }

        self.left_ticks += (self.left * dt) as f64;
        self.right_ticks += (self.right * dt) as f64;
        (self.left, self.right)
    }
}

/// Emulation of one physical robot: UDP framing, heartbeat cadence, inbound
/// rate gating and command dispatch. One link exists per robot entity and is
/// driven from the owning room's update tick.
pub struct RobotLink {
    id: RobotId,
    socket: Option<UdpSocket>,
    started: Instant,
    heartbeat_period: Duration,
    last_heartbeat: Option<Instant>,
    min_gap: Duration,
    last_accepted: Option<Instant>,
    commands: CommandTable,
    drive: DriveState,
    leds: [u8; 2],
    button_pressed: bool,
    activity: Option<Arc<ActivityMonitor>>,
}

impl RobotLink {
    pub fn new(config: &RobotConfig) -> Self {
        let socket = config.server_addr.and_then(|addr| match bind_socket(addr) {
            Ok(socket) => Some(socket),
            Err(e) => {
                log::warn!("robot socket unavailable ({addr}): {e}");
                None
            }
        });

        Self {
            id: RobotId::generate(&mut rand::thread_rng()),
            socket,
            started: Instant::now(),
            heartbeat_period: config.heartbeat_period,
            last_heartbeat: None,
            min_gap: config.min_time_between_messages,
            last_accepted: None,
            commands: default_table(config),
            drive: DriveState::default(),
            leds: [0; 2],
            button_pressed: false,
            activity: None,
        }
    }

    pub fn id(&self) -> RobotId {
        self.id
    }

    pub fn set_activity(&mut self, activity: Arc<ActivityMonitor>) {
        self.activity = Some(activity);
    }

    pub fn set_button(&mut self, pressed: bool) {
        self.button_pressed = pressed;
    }

    pub fn leds(&self) -> [u8; 2] {
        self.leds
    }

    pub fn encoder_ticks(&self) -> (i32, i32) {
        (self.drive.left_ticks as i32, self.drive.right_ticks as i32)
    }

    /// Register an additional command for a robot subtype.
    pub fn register_command(&mut self, spec: CommandSpec) -> Result<(), RobotError> {
        self.commands.register(spec)
    }

    pub fn millis(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    pub fn send_frame(&self, payload: &[u8]) {
        let Some(socket) = &self.socket else {
            return;
        };
        let frame = encode_frame(&self.id, self.millis(), payload);
        if let Err(e) = socket.send(&frame) {
            log::debug!("robot {}: send failed: {e}", self.id);
        }
    }

    fn send_heartbeat(&mut self) {
        self.send_frame(&[CMD_HEARTBEAT]);
        self.last_heartbeat = Some(Instant::now());
    }

    fn heartbeat_due(&self) -> bool {
        self.last_heartbeat
            .is_none_or(|last| last.elapsed() >= self.heartbeat_period)
    }

    pub fn update(
        &mut self,
        dt: f32,
        name: &str,
        body: &mut DynamicBody,
        engine: &mut dyn PhysicsEngine,
        events: &mut Vec<SimEvent>,
    ) {
        // Heartbeat goes out before any inbound processing.
        if self.heartbeat_due() {
            self.send_heartbeat();
        }

        let datagrams = self.poll_socket();
        let mut ctx = CommandCtx {
            name,
            body,
            engine,
            events,
        };
        for data in datagrams {
            self.handle_datagram(&data, &mut ctx);
        }

        self.apply_drive(dt, &mut ctx);
    }

    /// Dispatch one inbound datagram. The first byte selects the handler;
    /// gated datagrams are dropped, dispatched datagrams are echoed back.
    pub fn handle_datagram(&mut self, data: &[u8], ctx: &mut CommandCtx<'_>) {
        let Some(&code) = data.first() else {
            log::debug!("robot {}: empty datagram dropped", self.id);
            return;
        };
        let Some(spec) = self.commands.get(code) else {
            log::debug!("robot {}: unknown command {code:#04x} dropped", self.id);
            return;
        };

        if !spec.non_delayed
            && self
                .last_accepted
                .is_some_and(|last| last.elapsed() < self.min_gap)
        {
            log::debug!("robot {}: command {code:#04x} rate limited", self.id);
            return;
        }

        (spec.handler)(self, ctx, &data[1..]);
        if code != CMD_HEARTBEAT {
            self.last_accepted = Some(Instant::now());
        }
        if let Some(activity) = &self.activity {
            activity.touch();
        }

        // Acknowledgement-by-echo.
        self.send_frame(data);
    }

    fn apply_drive(&mut self, dt: f32, ctx: &mut CommandCtx<'_>) {
        let handle = ctx.body.handle();
        let Some(state) = ctx.engine.body_state(handle) else {
            return;
        };

        let (left, right) = self.drive.tick(dt);
        let linear = (left + right) * 0.5 / TICKS_PER_METER;
        let yaw_rate = (right - left) / TICKS_PER_METER / TRACK_WIDTH;

        let forward = state.orientation * Vec3::NEG_Z;
        let velocity = Vec3::new(forward.x * linear, state.linvel.y, forward.z * linear);
        let moving = left != 0.0 || right != 0.0;

        ctx.engine.set_linvel(handle, velocity, moving);
        ctx.engine
            .set_angvel(handle, Vec3::new(0.0, yaw_rate, 0.0), moving);
    }

    fn poll_socket(&mut self) -> Vec<Vec<u8>> {
        let mut datagrams = Vec::new();
        let Some(socket) = &self.socket else {
            return datagrams;
        };

        let mut buf = [0u8; 512];
        loop {
            match socket.recv(&mut buf) {
                Ok(len) => datagrams.push(buf[..len].to_vec()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                // A closed or refused socket reads as "no data".
                Err(e) => {
                    log::trace!("robot {}: recv error treated as idle: {e}", self.id);
                    break;
                }
            }
        }
        datagrams
    }

    pub fn reset(
        &mut self,
        name: &str,
        body: &mut DynamicBody,
        engine: &mut dyn PhysicsEngine,
        events: &mut Vec<SimEvent>,
    ) {
        body.reset(engine);
        self.drive = DriveState::default();
        self.started = Instant::now();
        self.last_accepted = None;
        self.send_heartbeat();
        events.push(SimEvent::RobotReset {
            robot: name.to_string(),
        });
    }
}

fn bind_socket(server: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_nonblocking(true)?;
    socket.connect(server)?;
    Ok(socket)
}

fn default_table(config: &RobotConfig) -> CommandTable {
    let mut table = CommandTable::new();
    let built_ins: [(u8, CommandFn); 8] = [
        (CMD_HEARTBEAT, cmd_heartbeat),
        (CMD_SET_SPEED, cmd_set_speed),
        (CMD_DRIVE, cmd_drive),
        (CMD_BEEP, cmd_beep),
        (CMD_SET_LED, cmd_set_led),
        (CMD_GET_RANGE, cmd_get_range),
        (CMD_GET_TICKS, cmd_get_ticks),
        (CMD_BUTTON, cmd_button),
    ];
    for (code, handler) in built_ins {
        table
            .register(CommandSpec {
                code,
                non_delayed: config.non_delayed.contains(&code),
                handler,
            })
            .expect("built-in robot command codes are distinct");
    }
    table
}

fn cmd_heartbeat(_robot: &mut RobotLink, _ctx: &mut CommandCtx<'_>, _payload: &[u8]) {}

fn cmd_set_speed(robot: &mut RobotLink, _ctx: &mut CommandCtx<'_>, payload: &[u8]) {
    let (Some(left), Some(right)) = (read_i16_le(payload, 0), read_i16_le(payload, 2)) else {
        log::debug!("robot {}: malformed set-speed payload", robot.id);
        return;
    };
    robot.drive.set_speed(left as f32, right as f32);
}

fn cmd_drive(robot: &mut RobotLink, _ctx: &mut CommandCtx<'_>, payload: &[u8]) {
    let (Some(left), Some(right)) = (read_i16_le(payload, 0), read_i16_le(payload, 2)) else {
        log::debug!("robot {}: malformed drive payload", robot.id);
        return;
    };
    robot.drive.drive_ticks(left as f64, right as f64);
}

fn cmd_beep(robot: &mut RobotLink, ctx: &mut CommandCtx<'_>, payload: &[u8]) {
    let (Some(duration_ms), Some(tone_hz)) = (read_u16_le(payload, 0), read_u16_le(payload, 2))
    else {
        log::debug!("robot {}: malformed beep payload", robot.id);
        return;
    };
    ctx.events.push(SimEvent::RobotBeep {
        robot: ctx.name.to_string(),
        duration_ms,
        tone_hz,
    });
}

fn cmd_set_led(robot: &mut RobotLink, _ctx: &mut CommandCtx<'_>, payload: &[u8]) {
    let (Some(&index), Some(&state)) = (payload.first(), payload.get(1)) else {
        log::debug!("robot {}: malformed led payload", robot.id);
        return;
    };
    if let Some(led) = robot.leds.get_mut(index as usize) {
        *led = state;
    }
}

fn cmd_get_range(robot: &mut RobotLink, ctx: &mut CommandCtx<'_>, _payload: &[u8]) {
    let mut range_m = MAX_RANGE_M;
    if let Some(state) = ctx.engine.body_state(ctx.body.handle()) {
        let forward = state.orientation * Vec3::NEG_Z;
        let origin = state.position + forward * (ctx.body.size().z / 2.0 + 0.01);
        match ctx.engine.raycast(origin, forward, MAX_RANGE_M) {
            Ok(Some(hit)) => range_m = hit.distance,
            Ok(None) => {}
            Err(e) => log::warn!("robot {}: range sensor unavailable: {e}", robot.id),
        }
    }

    let mut payload = vec![CMD_GET_RANGE];
    push_i16_le(&mut payload, (range_m * 1000.0) as i16);
    robot.send_frame(&payload);
}

fn cmd_get_ticks(robot: &mut RobotLink, _ctx: &mut CommandCtx<'_>, _payload: &[u8]) {
    let (left, right) = robot.encoder_ticks();
    let mut payload = vec![CMD_GET_TICKS];
    push_i32_le(&mut payload, left);
    push_i32_le(&mut payload, right);
    robot.send_frame(&payload);
}

fn cmd_button(robot: &mut RobotLink, _ctx: &mut CommandCtx<'_>, _payload: &[u8]) {
    let payload = [CMD_BUTTON, robot.button_pressed as u8];
    robot.send_frame(&payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{NullEngine, PhysicsEngine};
    use glam::Quat;
    use std::thread;

    fn test_robot(min_gap: Duration) -> (RobotLink, DynamicBody, NullEngine) {
        let config = RobotConfig {
            min_time_between_messages: min_gap,
            ..RobotConfig::default()
        };
        let robot = RobotLink::new(&config);

        let mut engine = NullEngine::new();
        let handle = engine.create_box(Vec3::ZERO, Quat::IDENTITY, ROBOT_SIZE, ROBOT_MASS, false);
        let body = DynamicBody::new(handle, ROBOT_SIZE, Vec3::ZERO, Quat::IDENTITY);
        (robot, body, engine)
    }

    fn set_speed_payload(left: i16, right: i16) -> Vec<u8> {
        let mut data = vec![CMD_SET_SPEED];
        push_i16_le(&mut data, left);
        push_i16_le(&mut data, right);
        data
    }

    #[test]
    fn duplicate_command_registration_fails() {
        let mut table = CommandTable::new();
        table
            .register(CommandSpec {
                code: b'X',
                non_delayed: false,
                handler: cmd_heartbeat,
            })
            .unwrap();

        let err = table
            .register(CommandSpec {
                code: b'X',
                non_delayed: true,
                handler: cmd_heartbeat,
            })
            .unwrap_err();
        assert!(matches!(err, RobotError::DuplicateCommand(b'X')));
    }

    #[test]
    fn rate_gate_drops_fast_consecutive_commands() {
        let (mut robot, mut body, mut engine) = test_robot(Duration::from_millis(20));
        let mut events = Vec::new();
        let mut ctx = CommandCtx {
            name: "robot_x",
            body: &mut body,
            engine: &mut engine,
            events: &mut events,
        };

        robot.handle_datagram(&set_speed_payload(50, 50), &mut ctx);
        assert_eq!(robot.drive.left, 50.0);

        // Too soon: handler must not run.
        robot.handle_datagram(&set_speed_payload(90, 90), &mut ctx);
        assert_eq!(robot.drive.left, 50.0);

        thread::sleep(Duration::from_millis(25));
        robot.handle_datagram(&set_speed_payload(90, 90), &mut ctx);
        assert_eq!(robot.drive.left, 90.0);
    }

    #[test]
    fn non_delayed_commands_bypass_the_gate() {
        let (mut robot, mut body, mut engine) = test_robot(Duration::from_secs(60));
        let mut events = Vec::new();
        let mut ctx = CommandCtx {
            name: "robot_x",
            body: &mut body,
            engine: &mut engine,
            events: &mut events,
        };

        robot.handle_datagram(&set_speed_payload(50, 50), &mut ctx);
        // The gate is now armed for a minute, but LED writes go through.
        robot.handle_datagram(&[CMD_SET_LED, 1, 255], &mut ctx);
        assert_eq!(robot.leds(), [0, 255]);
    }

    #[test]
    fn drive_moves_forward_and_accumulates_ticks() {
        let (mut robot, mut body, mut engine) = test_robot(Duration::ZERO);
        let mut events = Vec::new();

        {
            let mut ctx = CommandCtx {
                name: "robot_x",
                body: &mut body,
                engine: &mut engine,
                events: &mut events,
            };
            robot.handle_datagram(&set_speed_payload(140, 140), &mut ctx);
        }

        for _ in 0..60 {
            robot.update(1.0 / 60.0, "robot_x", &mut body, &mut engine, &mut events);
            engine.step(1.0 / 60.0);
        }

        let state = engine.body_state(body.handle()).unwrap();
        // Identity orientation: forward is -Z.
        assert!(state.position.z < -0.1);
        assert!(state.position.x.abs() < 1e-3);

        let (left, right) = robot.encoder_ticks();
        assert!(left > 0 && right > 0);
    }

    #[test]
    fn reset_restarts_clock_and_clears_state() {
        let (mut robot, mut body, mut engine) = test_robot(Duration::ZERO);
        let mut events = Vec::new();

        {
            let mut ctx = CommandCtx {
                name: "robot_x",
                body: &mut body,
                engine: &mut engine,
                events: &mut events,
            };
            robot.handle_datagram(&set_speed_payload(140, 140), &mut ctx);
        }
        for _ in 0..30 {
            robot.update(1.0 / 60.0, "robot_x", &mut body, &mut engine, &mut events);
            engine.step(1.0 / 60.0);
        }

        events.clear();
        robot.reset("robot_x", &mut body, &mut engine, &mut events);

        assert_eq!(robot.encoder_ticks(), (0, 0));
        assert!(robot.last_accepted.is_none());
        let state = engine.body_state(body.handle()).unwrap();
        assert_eq!(state.position, Vec3::ZERO);
        assert_eq!(state.linvel, Vec3::ZERO);
        assert!(events.iter().any(|e| matches!(e, SimEvent::RobotReset { .. })));
    }

    #[test]
    fn beep_raises_a_sim_event() {
        let (mut robot, mut body, mut engine) = test_robot(Duration::ZERO);
        let mut events = Vec::new();
        let mut ctx = CommandCtx {
            name: "robot_x",
            body: &mut body,
            engine: &mut engine,
            events: &mut events,
        };

        let mut payload = vec![CMD_BEEP];
        push_i16_le(&mut payload, 500);
        push_i16_le(&mut payload, 440);
        robot.handle_datagram(&payload, &mut ctx);

        assert_eq!(
            events,
            vec![SimEvent::RobotBeep {
                robot: "robot_x".to_string(),
                duration_ms: 500,
                tone_hz: 440,
            }]
        );
    }
}

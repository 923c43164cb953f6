mod config;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use robolab::{
    FixedTimestep, IoTScapeRegistry, RobotConfig, RoomConfig, RoomManager, ScenarioRegistry,
};

use config::ServerConfig;

#[derive(Parser)]
#[command(name = "robolab-server")]
#[command(about = "Headless robotics simulation server")]
struct Args {
    #[arg(short, long, default_value_t = 60, help = "Simulation tick rate in Hz")]
    tick_rate: u32,

    #[arg(long, default_value_t = 10, help = "Viewer broadcast rate in Hz")]
    broadcast_rate: u32,

    #[arg(short, long, default_value_t = 1, help = "Rooms to open at startup")]
    rooms: usize,

    #[arg(short, long, default_value = "default", help = "Environment for startup rooms")]
    environment: String,

    #[arg(long, default_value_t = 900, help = "Room idle timeout in seconds")]
    timeout_secs: u64,

    #[arg(long, help = "Robot control server address (host:port)")]
    robot_server: Option<SocketAddr>,

    #[arg(long, help = "IoTScape router address (host:port)")]
    iot_server: Option<SocketAddr>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        broadcast_rate: args.broadcast_rate,
        rooms: args.rooms,
        environment: args.environment,
        room_timeout: Duration::from_secs(args.timeout_secs),
        robot_server: args.robot_server,
        iot_server: args.iot_server,
    };

    let registry = match config.iot_server {
        Some(addr) => {
            let registry = IoTScapeRegistry::connect(addr)?;
            log::info!("iotscape router at {addr}");
            Some(Arc::new(Mutex::new(registry)))
        }
        None => None,
    };

    let room_config = RoomConfig {
        timeout: config.room_timeout,
        robot: RobotConfig {
            server_addr: config.robot_server,
            ..RobotConfig::default()
        },
        ..RoomConfig::default()
    };

    let manager = Arc::new(Mutex::new(RoomManager::new(
        ScenarioRegistry::with_defaults(),
        registry.clone(),
        room_config,
    )));

    {
        let mut manager = lock(&manager);
        for _ in 0..config.rooms {
            manager.create_room(&config.environment, None, None);
        }
    }
    log::info!(
        "serving {} room(s) at {} Hz (environment {})",
        config.rooms,
        config.tick_rate,
        config.environment
    );

    let update_manager = Arc::clone(&manager);
    let tick_rate = config.tick_rate;
    let update_handle = thread::spawn(move || update_loop(update_manager, tick_rate));

    let broadcast_manager = Arc::clone(&manager);
    let broadcast_period = Duration::from_secs_f64(1.0 / config.broadcast_rate.max(1) as f64);
    thread::spawn(move || broadcast_loop(broadcast_manager, broadcast_period));

    match registry {
        Some(registry) => iotscape_loop(registry),
        None => {
            let _ = update_handle.join();
        }
    }
    Ok(())
}

/// Fixed-timestep driver: the single writer for every room.
fn update_loop(manager: Arc<Mutex<RoomManager>>, tick_rate: u32) {
    let mut timestep = FixedTimestep::new(tick_rate);
    let mut last = Instant::now();
    let mut last_gc = Instant::now();

    loop {
        thread::sleep(Duration::from_millis(1));
        let now = Instant::now();
        timestep.accumulate((now - last).as_secs_f32());
        last = now;

        while timestep.consume_tick() {
            for room in lock(&manager).rooms() {
                lock(&room).update(timestep.dt());
            }
        }

        if last_gc.elapsed() > Duration::from_secs(5) {
            let collected = lock(&manager).collect_garbage();
            if collected > 0 {
                log::info!("collected {collected} expired room(s)");
            }
            last_gc = Instant::now();
        }
    }
}

/// Pushes delta/full snapshots to viewer sockets, independently of the
/// update cadence.
fn broadcast_loop(manager: Arc<Mutex<RoomManager>>, period: Duration) {
    loop {
        thread::sleep(period);
        for room in lock(&manager).rooms() {
            lock(&room).broadcast();
        }
    }
}

/// Periodic announce plus inbound RPC dispatch.
fn iotscape_loop(registry: Arc<Mutex<IoTScapeRegistry>>) {
    loop {
        lock(&registry).tick();
        thread::sleep(Duration::from_millis(10));
    }
}

use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub broadcast_rate: u32,
    pub rooms: usize,
    pub environment: String,
    pub room_timeout: Duration,
    pub robot_server: Option<SocketAddr>,
    pub iot_server: Option<SocketAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            broadcast_rate: 10,
            rooms: 1,
            environment: String::from("default"),
            room_timeout: Duration::from_secs(15 * 60),
            robot_server: None,
            iot_server: None,
        }
    }
}

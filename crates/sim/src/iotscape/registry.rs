use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::activity::ActivityMonitor;

use super::message::{announce_payload, params_to_strings, parse_request, response_payload};
use super::{IoTScapeError, ServiceDefinition, event_payload};

pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);

pub type MethodFn = Box<dyn FnMut(&[String]) -> Result<Vec<Value>, IoTScapeError> + Send>;

/// One remotely callable device: a service definition, an assigned id and the
/// method table behind it.
pub struct IoTScapeObject {
    pub definition: ServiceDefinition,
    id: Option<String>,
    id_override: Option<String>,
    device_type_id: Option<String>,
    handlers: HashMap<String, MethodFn>,
    activity: Option<Arc<ActivityMonitor>>,
    registered: bool,
}

impl IoTScapeObject {
    pub fn new(definition: ServiceDefinition) -> Self {
        Self {
            definition,
            id: None,
            id_override: None,
            device_type_id: None,
            handlers: HashMap::new(),
            activity: None,
            registered: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_id_override(mut self, prefix: impl Into<String>) -> Self {
        self.id_override = Some(prefix.into());
        self
    }

    pub fn with_device_type(mut self, type_id: impl Into<String>) -> Self {
        self.device_type_id = Some(type_id.into());
        self
    }

    pub fn with_activity(mut self, activity: Arc<ActivityMonitor>) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        handler: impl FnMut(&[String]) -> Result<Vec<Value>, IoTScapeError> + Send + 'static,
    ) -> Self {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }
}

/// Device-service directory: assigns ids, announces definitions to the
/// IoTScape router, and dispatches inbound RPC requests to device method
/// tables. Constructed once and shared by reference with every room.
pub struct IoTScapeRegistry {
    socket: Option<UdpSocket>,
    router: Option<SocketAddr>,
    prefix: String,
    sequences: HashMap<String, u32>,
    devices: HashMap<(String, String), IoTScapeObject>,
    announce_interval: Duration,
    last_announce: Option<Instant>,
}

impl IoTScapeRegistry {
    /// Offline registry: id assignment and dispatch work, nothing hits the
    /// network.
    pub fn new() -> Self {
        Self {
            socket: None,
            router: None,
            prefix: format!("{:04x}", rand::random::<u16>()),
            sequences: HashMap::new(),
            devices: HashMap::new(),
            announce_interval: ANNOUNCE_INTERVAL,
            last_announce: None,
        }
    }

    pub fn connect(router: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket: Some(socket),
            router: Some(router),
            ..Self::new()
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device_ids(&self, service: &str) -> Vec<String> {
        self.devices
            .keys()
            .filter(|(s, _)| s == service)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn is_registered(&self, service: &str, id: &str) -> bool {
        self.devices
            .get(&(service.to_string(), id.to_string()))
            .is_some_and(|d| d.registered)
    }

    /// Register a device, synthesizing an id when it has none, and announce
    /// it. Inserting a second object under an occupied (service, id) pair is
    /// a programming error; bringing a known pair back is [`Self::reregister`].
    pub fn register(&mut self, mut object: IoTScapeObject) -> Result<String, IoTScapeError> {
        let service = object.definition.name.clone();

        let id = match object.id.clone() {
            Some(id) => id,
            None => self.synthesize_id(
                &service,
                object.id_override.as_deref(),
                object.device_type_id.as_deref(),
            ),
        };

        if self.devices.contains_key(&(service.clone(), id.clone())) {
            return Err(IoTScapeError::DuplicateDevice { service, id });
        }

        object.id = Some(id.clone());
        object.registered = true;
        self.announce(&object);
        self.devices.insert((service, id.clone()), object);
        Ok(id)
    }

    fn synthesize_id(
        &mut self,
        service: &str,
        id_override: Option<&str>,
        device_type_id: Option<&str>,
    ) -> String {
        let mut key = service.to_string();
        if let Some(over) = id_override {
            key.push(':');
            key.push_str(over);
        }
        if let Some(type_id) = device_type_id {
            key.push(':');
            key.push_str(type_id);
        }

        let sequence = self.sequences.entry(key).or_insert(0);
        let n = *sequence;
        *sequence += 1;

        let mut id = id_override.unwrap_or(&self.prefix).to_string();
        if let Some(type_id) = device_type_id {
            id.push('_');
            id.push_str(type_id);
        }
        // A custom prefix keeps its first id human-readable.
        if !(id_override.is_some() && n == 0) {
            id.push_str(&format!("_{n:04x}"));
        }
        id
    }

    /// Hide a device from dispatch and the announce loop without forgetting
    /// it; used when the owning room hibernates.
    pub fn unregister(&mut self, service: &str, id: &str) {
        if let Some(device) = self.devices.get_mut(&(service.to_string(), id.to_string())) {
            device.registered = false;
        }
    }

    /// Idempotent: re-registering an already-registered pair is a no-op
    /// beyond the immediate announce.
    pub fn reregister(&mut self, service: &str, id: &str) -> bool {
        let Some(device) = self.devices.get_mut(&(service.to_string(), id.to_string())) else {
            return false;
        };
        device.registered = true;
        let payload = announce_payload(&device.definition, id);
        self.send(&payload);
        true
    }

    pub fn remove(&mut self, service: &str, id: &str) -> Option<IoTScapeObject> {
        self.devices.remove(&(service.to_string(), id.to_string()))
    }

    fn announce(&self, object: &IoTScapeObject) {
        let Some(id) = &object.id else {
            return;
        };
        self.send(&announce_payload(&object.definition, id));
    }

    /// Re-announce every registered device; a router restart or a lost
    /// datagram heals within one interval.
    pub fn announce_all(&mut self) {
        let payloads: Vec<Value> = self
            .devices
            .values()
            .filter(|d| d.registered)
            .filter_map(|d| d.id.as_ref().map(|id| announce_payload(&d.definition, id)))
            .collect();
        for payload in payloads {
            self.send(&payload);
        }
        self.last_announce = Some(Instant::now());
    }

    /// Drive the periodic announce and drain the inbound socket. Called from
    /// the server's IoTScape loop.
    pub fn tick(&mut self) {
        if self
            .last_announce
            .is_none_or(|last| last.elapsed() >= self.announce_interval)
        {
            self.announce_all();
        }
        self.poll();
    }

    pub fn poll(&mut self) {
        let mut inbound = Vec::new();
        if let Some(socket) = &self.socket {
            let mut buf = [0u8; 4096];
            loop {
                match socket.recv_from(&mut buf) {
                    Ok((len, _)) => inbound.push(buf[..len].to_vec()),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::trace!("iotscape recv error treated as idle: {e}");
                        break;
                    }
                }
            }
        }
        for data in inbound {
            self.dispatch(&data);
        }
    }

    /// Dispatch one request datagram. Unknown devices and methods are dropped
    /// with a diagnostic only; no error frame goes back.
    pub fn dispatch(&mut self, data: &[u8]) {
        let request = match parse_request(data) {
            Ok(request) => request,
            Err(e) => {
                log::debug!("malformed iotscape request dropped: {e}");
                return;
            }
        };

        let key = (request.service.clone(), request.device.clone());
        let Some(device) = self.devices.get_mut(&key) else {
            log::debug!(
                "iotscape request for unknown device {}/{} dropped",
                request.service,
                request.device
            );
            return;
        };
        if !device.registered {
            log::debug!(
                "iotscape request for unregistered device {}/{} dropped",
                request.service,
                request.device
            );
            return;
        }

        // Built-in liveness probe; deliberately not an interaction.
        if request.function == "heartbeat" {
            let payload = response_payload(
                &request.device,
                &request.id,
                &request.service,
                Ok(vec![Value::Bool(true)]),
            );
            self.send(&payload);
            return;
        }

        if !device.handlers.contains_key(&request.function) {
            log::debug!(
                "iotscape request for unknown method {}.{} dropped",
                request.service,
                request.function
            );
            return;
        }
        if let Some(activity) = &device.activity {
            activity.touch();
        }

        let params = params_to_strings(&request.params);
        let Some(handler) = device.handlers.get_mut(&request.function) else {
            return;
        };
        let result = handler(&params).map_err(|e| e.to_string());
        let payload = response_payload(&request.device, &request.id, &request.service, result);
        self.send(&payload);
    }

    pub fn send_event(&self, service: &str, id: &str, event_type: &str, args: Vec<Value>) {
        let request_id = format!("{:08x}", rand::random::<u32>());
        self.send(&event_payload(id, &request_id, service, event_type, args));
    }

    fn send(&self, payload: &Value) {
        let (Some(socket), Some(router)) = (&self.socket, self.router) else {
            return;
        };
        match serde_json::to_vec(payload) {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, router) {
                    log::debug!("iotscape send failed: {e}");
                }
            }
            Err(e) => log::debug!("iotscape payload serialization failed: {e}"),
        }
    }
}

impl Default for IoTScapeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iotscape::MethodDescriptor;
    use serde_json::json;
    use std::thread;

    fn sensor_object() -> IoTScapeObject {
        let definition = ServiceDefinition::new("sensor", "1.0")
            .method("ping", MethodDescriptor::new().returns(&["string"]));
        IoTScapeObject::new(definition).method("ping", |_params: &[String]| Ok(vec![json!("pong")]))
    }

    #[test]
    fn sequential_ids_share_a_prefix() {
        let mut registry = IoTScapeRegistry::new().with_prefix("ab12");

        let ids: Vec<String> = (0..3)
            .map(|_| registry.register(sensor_object()).unwrap())
            .collect();

        assert_eq!(ids, vec!["ab12_0000", "ab12_0001", "ab12_0002"]);
        assert_eq!(registry.device_count(), 3);
    }

    #[test]
    fn id_override_omits_the_first_suffix() {
        let mut registry = IoTScapeRegistry::new();

        let first = registry
            .register(sensor_object().with_id_override("lamp"))
            .unwrap();
        let second = registry
            .register(sensor_object().with_id_override("lamp"))
            .unwrap();

        assert_eq!(first, "lamp");
        assert_eq!(second, "lamp_0001");
    }

    #[test]
    fn device_type_lands_between_prefix_and_sequence() {
        let mut registry = IoTScapeRegistry::new().with_prefix("ab12");

        let id = registry
            .register(sensor_object().with_device_type("7"))
            .unwrap();
        assert_eq!(id, "ab12_7_0000");

        // Type-scoped sequences are independent of the bare-service one.
        let bare = registry.register(sensor_object()).unwrap();
        assert_eq!(bare, "ab12_0000");
    }

    #[test]
    fn occupied_pair_is_a_programmer_error() {
        let mut registry = IoTScapeRegistry::new();
        registry
            .register(sensor_object().with_id("custom"))
            .unwrap();

        let err = registry
            .register(sensor_object().with_id("custom"))
            .unwrap_err();
        assert!(matches!(err, IoTScapeError::DuplicateDevice { .. }));
    }

    #[test]
    fn unregister_hides_and_reregister_restores() {
        let mut registry = IoTScapeRegistry::new();
        let id = registry.register(sensor_object()).unwrap();

        assert!(registry.is_registered("sensor", &id));
        registry.unregister("sensor", &id);
        assert!(!registry.is_registered("sensor", &id));

        // Idempotent both ways.
        assert!(registry.reregister("sensor", &id));
        assert!(registry.reregister("sensor", &id));
        assert!(registry.is_registered("sensor", &id));
    }

    #[test]
    fn unregistered_device_drops_requests() {
        let mut registry = IoTScapeRegistry::new();
        let activity = Arc::new(ActivityMonitor::new());
        let id = registry
            .register(sensor_object().with_activity(Arc::clone(&activity)))
            .unwrap();
        registry.unregister("sensor", &id);

        thread::sleep(Duration::from_millis(5));
        let request =
            json!({ "id": "r1", "service": "sensor", "device": id, "function": "ping" });
        registry.dispatch(request.to_string().as_bytes());
        assert_eq!(activity.last_mark(), 0);
    }

    #[test]
    fn heartbeat_is_not_an_interaction_but_methods_are() {
        let mut registry = IoTScapeRegistry::new();
        let activity = Arc::new(ActivityMonitor::new());
        let id = registry
            .register(sensor_object().with_activity(Arc::clone(&activity)))
            .unwrap();

        thread::sleep(Duration::from_millis(10));

        let heartbeat =
            json!({ "id": "r1", "service": "sensor", "device": id, "function": "heartbeat" });
        registry.dispatch(heartbeat.to_string().as_bytes());
        assert_eq!(activity.last_mark(), 0);

        let ping = json!({ "id": "r2", "service": "sensor", "device": id, "function": "ping" });
        registry.dispatch(ping.to_string().as_bytes());
        assert!(activity.last_mark() > 0);
    }

    #[test]
    fn dispatch_responds_over_the_wire() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();

        let mut registry =
            IoTScapeRegistry::connect(listener.local_addr().unwrap()).unwrap();
        let id = registry.register(sensor_object()).unwrap();

        let request = json!({
            "id": "req-7",
            "service": "sensor",
            "device": id,
            "function": "ping",
        });
        registry.dispatch(request.to_string().as_bytes());

        let mut buf = [0u8; 4096];

        // Registration announced the definition first.
        let len = listener.recv(&mut buf).unwrap();
        let announce: Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(announce["sensor"]["id"], Value::String(id.clone()));

        let len = listener.recv(&mut buf).unwrap();
        let response: Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(response["request"], "req-7");
        assert_eq!(response["id"], Value::String(id));
        assert_eq!(response["response"][0], "pong");
    }

    #[test]
    fn unknown_method_sends_nothing_back() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();

        let mut registry =
            IoTScapeRegistry::connect(listener.local_addr().unwrap()).unwrap();
        let id = registry.register(sensor_object()).unwrap();

        let mut buf = [0u8; 4096];
        listener.recv(&mut buf).unwrap(); // drain the announce

        let request = json!({
            "id": "req-8",
            "service": "sensor",
            "device": id,
            "function": "noSuchMethod",
        });
        registry.dispatch(request.to_string().as_bytes());

        assert!(listener.recv(&mut buf).is_err());
    }
}

mod message;
mod registry;
mod service;

pub use message::{
    Request, announce_payload, event_payload, params_to_strings, parse_request, response_payload,
};
pub use registry::{ANNOUNCE_INTERVAL, IoTScapeObject, IoTScapeRegistry, MethodFn};
pub use service::{
    EventDescriptor, MethodDescriptor, MethodParam, MethodReturns, ServiceDefinition,
};

#[derive(Debug, thiserror::Error)]
pub enum IoTScapeError {
    #[error("device {service}/{id} is already registered")]
    DuplicateDevice { service: String, id: String },
    #[error("bad parameter {index} for {method}")]
    BadParameter { method: &'static str, index: usize },
}

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::ServiceDefinition;

/// Inbound RPC request: `{id, service, device, function, params: [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: String,
    pub service: String,
    pub device: String,
    pub function: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

pub fn parse_request(data: &[u8]) -> Result<Request, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Method parameters arrive as arbitrary JSON scalars but handlers take
/// strings; bare strings pass through, everything else keeps its JSON form.
pub fn params_to_strings(params: &[Value]) -> Vec<String> {
    params
        .iter()
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

pub fn response_payload(
    device: &str,
    request_id: &str,
    service: &str,
    result: Result<Vec<Value>, String>,
) -> Value {
    match result {
        Ok(values) => json!({
            "id": device,
            "request": request_id,
            "service": service,
            "response": values,
        }),
        Err(error) => json!({
            "id": device,
            "request": request_id,
            "service": service,
            "error": error,
        }),
    }
}

/// Unsolicited event frame: the `response` field is replaced by
/// `{event: {type, args}}`.
pub fn event_payload(
    device: &str,
    request_id: &str,
    service: &str,
    event_type: &str,
    args: Vec<Value>,
) -> Value {
    json!({
        "id": device,
        "request": request_id,
        "service": service,
        "event": { "type": event_type, "args": args },
    })
}

pub fn announce_payload(definition: &ServiceDefinition, id: &str) -> Value {
    let mut service = Map::new();
    service.insert("version".to_string(), Value::String(definition.version.clone()));
    if let Some(description) = &definition.description {
        service.insert("description".to_string(), Value::String(description.clone()));
    }

    let body = json!({
        "name": definition.name,
        "id": id,
        "service": Value::Object(service),
        "methods": definition.methods,
        "events": definition.events,
    });

    let mut envelope = Map::new();
    envelope.insert(definition.name.clone(), body);
    Value::Object(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iotscape::MethodDescriptor;

    #[test]
    fn request_parses_with_and_without_params() {
        let req = parse_request(
            br#"{"id":"r1","service":"drone","device":"d_0000","function":"stop"}"#,
        )
        .unwrap();
        assert_eq!(req.function, "stop");
        assert!(req.params.is_empty());

        let req = parse_request(
            br#"{"id":"r2","service":"drone","device":"d_0000","function":"setVelocity","params":[1,"2",3.5]}"#,
        )
        .unwrap();
        assert_eq!(
            params_to_strings(&req.params),
            vec!["1".to_string(), "2".to_string(), "3.5".to_string()]
        );
    }

    #[test]
    fn response_is_keyed_by_the_original_request() {
        let payload = response_payload("d_0000", "r1", "drone", Ok(vec![json!(true)]));
        assert_eq!(payload["id"], "d_0000");
        assert_eq!(payload["request"], "r1");
        assert_eq!(payload["response"][0], true);
        assert!(payload.get("error").is_none());

        let payload = response_payload("d_0000", "r1", "drone", Err("boom".to_string()));
        assert_eq!(payload["error"], "boom");
        assert!(payload.get("response").is_none());
    }

    #[test]
    fn announce_nests_under_the_service_name() {
        let definition = ServiceDefinition::new("proximity", "1.0")
            .describe("occupancy sensor")
            .method(
                "isOccupied",
                MethodDescriptor::new().returns(&["boolean"]),
            )
            .event("triggered", &["body"]);

        let payload = announce_payload(&definition, "prox_0001");
        let inner = &payload["proximity"];
        assert_eq!(inner["id"], "prox_0001");
        assert_eq!(inner["service"]["version"], "1.0");
        assert_eq!(inner["service"]["description"], "occupancy sensor");
        assert_eq!(inner["methods"]["isOccupied"]["returns"]["type"][0], "boolean");
        assert_eq!(inner["events"]["triggered"]["params"][0], "body");
    }
}

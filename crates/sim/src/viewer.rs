use serde::Deserialize;
use serde_json::Value;

/// Opaque handle to one connected viewer, provided by the external transport
/// bridge. Sends are fire-and-forget; delivery failures are the bridge's
/// problem, not the room's.
pub trait ViewerSocket: Send {
    fn id(&self) -> u64;
    fn send(&self, event: &str, payload: &Value);
}

/// Inbound events the transport bridge turns into calls on the room manager.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewerEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Room id, or `"create"` to open a fresh room.
        #[serde(rename = "roomID")]
        room_id: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        env: Option<String>,
        #[serde(default)]
        namespace: Option<String>,
    },
    LeaveRoom,
    #[serde(rename_all = "camelCase")]
    ResetRobot { id: String, user: String },
    ResetAll,
    #[serde(rename_all = "camelCase")]
    ClaimRobot {
        id: String,
        claim: bool,
        user: String,
    },
    #[serde(rename_all = "camelCase")]
    RobotButton {
        id: String,
        pressed: bool,
        user: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_deserialize_from_bridge_json() {
        let event: ViewerEvent = serde_json::from_str(
            r#"{"type":"joinRoom","roomID":"create","env":"obstacles","password":null,"namespace":"class1"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ViewerEvent::JoinRoom {
                room_id: "create".to_string(),
                password: None,
                env: Some("obstacles".to_string()),
                namespace: Some("class1".to_string()),
            }
        );

        let event: ViewerEvent = serde_json::from_str(
            r#"{"type":"claimRobot","id":"robot_4a21","claim":true,"user":"ada"}"#,
        )
        .unwrap();
        assert!(matches!(event, ViewerEvent::ClaimRobot { claim: true, .. }));

        let event: ViewerEvent = serde_json::from_str(r#"{"type":"resetAll"}"#).unwrap();
        assert_eq!(event, ViewerEvent::ResetAll);
    }
}

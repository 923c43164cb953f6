use serde_json::{Value, json};

/// Notifications raised by entities during a simulation step. Drained by the
/// owning room and forwarded to viewer sockets on the next broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    RobotBeep {
        robot: String,
        duration_ms: u16,
        tone_hz: u16,
    },
    RobotReset {
        robot: String,
    },
    EntityReset {
        entity: String,
    },
    TriggerEnter {
        trigger: String,
        body: String,
    },
    TriggerExit {
        trigger: String,
        body: String,
    },
}

impl SimEvent {
    pub fn viewer_name(&self) -> &'static str {
        match self {
            Self::RobotBeep { .. } => "beep",
            Self::RobotReset { .. } => "robotReset",
            Self::EntityReset { .. } => "entityReset",
            Self::TriggerEnter { .. } => "triggerEnter",
            Self::TriggerExit { .. } => "triggerExit",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::RobotBeep {
                robot,
                duration_ms,
                tone_hz,
            } => json!({ "robot": robot, "duration": duration_ms, "frequency": tone_hz }),
            Self::RobotReset { robot } => json!({ "robot": robot }),
            Self::EntityReset { entity } => json!({ "entity": entity }),
            Self::TriggerEnter { trigger, body } => json!({ "trigger": trigger, "body": body }),
            Self::TriggerExit { trigger, body } => json!({ "trigger": trigger, "body": body }),
        }
    }
}

//! Events pushed to session observers.

use serde::{Deserialize, Serialize};

use crate::manifest::{Patch, PropMap};

/// One event on a session's push stream.
///
/// Serialized as a JSON object tagged by `type`:
///
/// ```text
/// {"type":"patch","key":..,"instanceId":..,"patch":{..}}
/// {"type":"snapshot","key":..,"instanceId":..,"state":{..}}
/// {"type":"error","message":..}
/// {"type":"ack","requestId":..,"applied":..}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BroadcastEvent {
    /// Merge `patch` into the instance's props.
    Patch {
        key: String,
        #[serde(rename = "instanceId")]
        instance_id: String,
        patch: Patch,
    },
    /// Replace the instance's props with `state`.
    Snapshot {
        key: String,
        #[serde(rename = "instanceId")]
        instance_id: String,
        state: PropMap,
    },
    Error {
        message: String,
    },
    Ack {
        #[serde(rename = "requestId")]
        request_id: String,
        applied: bool,
    },
}

impl BroadcastEvent {
    pub fn patch(key: impl Into<String>, instance_id: impl Into<String>, patch: Patch) -> Self {
        Self::Patch {
            key: key.into(),
            instance_id: instance_id.into(),
            patch,
        }
    }

    pub fn snapshot(key: impl Into<String>, instance_id: impl Into<String>, state: PropMap) -> Self {
        Self::Snapshot {
            key: key.into(),
            instance_id: instance_id.into(),
            state,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn ack(request_id: impl Into<String>, applied: bool) -> Self {
        Self::Ack {
            request_id: request_id.into(),
            applied,
        }
    }

    /// Short name of the event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Patch { .. } => "patch",
            Self::Snapshot { .. } => "snapshot",
            Self::Error { .. } => "error",
            Self::Ack { .. } => "ack",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_wire_shape() {
        let patch = json!({ "title": "New" }).as_object().cloned().unwrap();
        let event = BroadcastEvent::patch("demo-card", "inst-1", patch);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "patch", "key": "demo-card", "instanceId": "inst-1", "patch": { "title": "New" } })
        );
    }

    #[test]
    fn snapshot_wire_shape() {
        let state = json!({ "title": "T", "body": "B" }).as_object().cloned().unwrap();
        let event = BroadcastEvent::snapshot("demo-card", "inst-1", state);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["state"]["body"], "B");
    }

    #[test]
    fn error_and_ack_wire_shapes() {
        assert_eq!(
            serde_json::to_value(BroadcastEvent::error("boom")).unwrap(),
            json!({ "type": "error", "message": "boom" })
        );
        assert_eq!(
            serde_json::to_value(BroadcastEvent::ack("req-7", false)).unwrap(),
            json!({ "type": "ack", "requestId": "req-7", "applied": false })
        );
    }

    #[test]
    fn parses_client_side_json() {
        let event: BroadcastEvent =
            serde_json::from_str(r#"{"type":"ack","requestId":"r","applied":true}"#).unwrap();
        assert_eq!(event, BroadcastEvent::ack("r", true));
        assert_eq!(event.kind(), "ack");
    }
}

use crate::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use tracefarm_core::{OwnerId, Pixel, SceneId, UnitId, WorkUnit, WorkerId};

/// Longest owner identity accepted on join
pub const MAX_OWNER_ID_LEN: usize = 128;

/// Events sent by a worker to the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Ask to take part in rendering a scene
    JoinScene { scene_id: SceneId, owner_id: OwnerId },

    /// Echo of the identity event; assignment starts after this
    Registered { scene_id: SceneId, worker_id: WorkerId },

    /// Coloured pixels for an assigned unit
    UnitResult {
        scene_id: SceneId,
        worker_id: WorkerId,
        unit_id: UnitId,
        pixels: Vec<Pixel>,
    },

    /// Explicit pull for the next unit
    RequestUnit { scene_id: SceneId, worker_id: WorkerId },

    /// Stop working on a scene
    LeaveScene { scene_id: SceneId, worker_id: WorkerId },
}

impl ClientEvent {
    pub fn scene_id(&self) -> SceneId {
        match self {
            ClientEvent::JoinScene { scene_id, .. }
            | ClientEvent::Registered { scene_id, .. }
            | ClientEvent::UnitResult { scene_id, .. }
            | ClientEvent::RequestUnit { scene_id, .. }
            | ClientEvent::LeaveScene { scene_id, .. } => *scene_id,
        }
    }

    /// Checks the constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        match self {
            ClientEvent::JoinScene { owner_id, .. } => {
                if owner_id.is_empty() {
                    return Err(ProtocolError::Invalid("owner_id is empty".to_string()));
                }
                if owner_id.len() > MAX_OWNER_ID_LEN {
                    return Err(ProtocolError::Invalid(format!(
                        "owner_id longer than {} bytes",
                        MAX_OWNER_ID_LEN
                    )));
                }
                Ok(())
            }
            ClientEvent::UnitResult { pixels, .. } => {
                if let Some(p) = pixels.iter().find(|p| !p.is_finite()) {
                    return Err(ProtocolError::Invalid(format!(
                        "non-finite colour at ({}, {})",
                        p.x, p.y
                    )));
                }
                Ok(())
            }
            ClientEvent::Registered { .. }
            | ClientEvent::RequestUnit { .. }
            | ClientEvent::LeaveScene { .. } => Ok(()),
        }
    }
}

/// Range description sent with an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub id: UnitId,
    pub start: u64,
    pub end: u64,
}

impl From<&WorkUnit> for UnitDescriptor {
    fn from(unit: &WorkUnit) -> Self {
        UnitDescriptor {
            id: unit.id,
            start: unit.range.start,
            end: unit.range.end,
        }
    }
}

/// Events sent by the scheduler to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The worker id allocated on join
    Identity { scene_id: SceneId, worker_id: WorkerId },

    /// A unit to render
    UnitAssignment { scene_id: SceneId, unit: UnitDescriptor },

    /// The scene is complete; `artifact` names the output when one was written
    SceneFinished {
        scene_id: SceneId,
        artifact: Option<String>,
    },
}

impl ServerEvent {
    pub fn scene_id(&self) -> SceneId {
        match self {
            ServerEvent::Identity { scene_id, .. }
            | ServerEvent::UnitAssignment { scene_id, .. }
            | ServerEvent::SceneFinished { scene_id, .. } => *scene_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_client_event_wire_shape() {
        let scene_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"unit_result","scene_id":"{}","worker_id":"u-0","unit_id":3,
                "pixels":[{{"x":1,"y":2,"r":0.5,"g":0.25,"b":1.0}}]}}"#,
            scene_id
        );

        let event: ClientEvent = serde_json::from_str(&raw).unwrap();
        match event {
            ClientEvent::UnitResult { worker_id, unit_id, pixels, .. } => {
                assert_eq!(worker_id.as_str(), "u-0");
                assert_eq!(unit_id, 3);
                assert_eq!(pixels.len(), 1);
                assert_eq!(pixels[0].x, 1);
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let raw = format!(r#"{{"type":"registered","scene_id":"{}"}}"#, Uuid::new_v4());
        assert!(serde_json::from_str::<ClientEvent>(&raw).is_err());

        let raw = r#"{"type":"reticulate","scene_id":"x"}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_server_event_wire_shape() {
        let scene_id = Uuid::new_v4();
        let event = ServerEvent::UnitAssignment {
            scene_id,
            unit: UnitDescriptor { id: 0, start: 0, end: 2500 },
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "unit_assignment");
        assert_eq!(value["scene_id"], scene_id.to_string());
        assert_eq!(value["unit"]["end"], 2500);
    }

    #[test]
    fn test_validate_join() {
        let scene_id = Uuid::new_v4();
        let ok = ClientEvent::JoinScene { scene_id, owner_id: "acid".to_string() };
        assert!(ok.validate().is_ok());

        let empty = ClientEvent::JoinScene { scene_id, owner_id: String::new() };
        assert!(matches!(empty.validate(), Err(ProtocolError::Invalid(_))));

        let long = ClientEvent::JoinScene {
            scene_id,
            owner_id: "a".repeat(MAX_OWNER_ID_LEN + 1),
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nan_pixels() {
        let event = ClientEvent::UnitResult {
            scene_id: Uuid::new_v4(),
            worker_id: WorkerId::new("u", 0),
            unit_id: 0,
            pixels: vec![Pixel { x: 0, y: 0, r: f32::NAN, g: 0.0, b: 0.0 }],
        };
        assert!(event.validate().is_err());
    }
}

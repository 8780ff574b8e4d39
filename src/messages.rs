// Message types exchanged with the runtime

use serde::{Deserialize, Serialize};

use crate::motion::{MotionRequest, Vector3};

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BaseCommand {
    SetVelocity {
        #[serde(default)]
        linear: Vector3,
        #[serde(default)]
        angular: Vector3,
    },
    SetPower {
        #[serde(default)]
        linear: Vector3,
        #[serde(default)]
        angular: Vector3,
    },
    MoveStraight {
        distance_mm: i32,
        mm_per_sec: f64,
    },
    Spin {
        angle_deg: f64,
        deg_per_sec: f64,
    },
    Stop,
    DoCommand {
        command: String,
    },
}

impl BaseCommand {
    /// Continuous commands keep the robot moving until replaced, so the watchdog covers them
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::SetVelocity { .. } | Self::SetPower { .. })
    }

    /// Anything that claims the base's motion slot
    pub fn is_motion(&self) -> bool {
        !matches!(self, Self::DoCommand { .. })
    }

    /// Blocking motions that run for a computed duration
    pub fn timed_request(&self) -> Option<MotionRequest> {
        match *self {
            Self::MoveStraight {
                distance_mm,
                mm_per_sec,
            } => Some(MotionRequest::Straight {
                distance_mm,
                mm_per_sec,
            }),
            Self::Spin {
                angle_deg,
                deg_per_sec,
            } => Some(MotionRequest::Spin {
                angle_deg,
                deg_per_sec,
            }),
            _ => None,
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Idle,
    Ok,
    CmdStale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_velocity_command() {
        let cmd: BaseCommand =
            serde_json::from_str(r#"{"type": "set_velocity", "linear": {"y": 200}}"#).unwrap();
        assert_eq!(
            cmd,
            BaseCommand::SetVelocity {
                linear: Vector3::new(0.0, 200.0, 0.0),
                angular: Vector3::default(),
            }
        );
        assert!(cmd.is_continuous());
        assert!(cmd.is_motion());
        assert_eq!(cmd.timed_request(), None);
    }

    #[test]
    fn test_parse_timed_and_named_commands() {
        let cmd: BaseCommand = serde_json::from_str(
            r#"{"type": "move_straight", "distance_mm": -300, "mm_per_sec": 150}"#,
        )
        .unwrap();
        assert_eq!(
            cmd.timed_request(),
            Some(MotionRequest::Straight {
                distance_mm: -300,
                mm_per_sec: 150.0
            })
        );
        assert!(!cmd.is_continuous());

        let cmd: BaseCommand =
            serde_json::from_str(r#"{"type": "do_command", "command": "seek_dock"}"#).unwrap();
        assert_eq!(
            cmd,
            BaseCommand::DoCommand {
                command: "seek_dock".into()
            }
        );
        assert!(!cmd.is_motion());

        let cmd: BaseCommand = serde_json::from_str(r#"{"type": "stop"}"#).unwrap();
        assert_eq!(cmd, BaseCommand::Stop);
    }

    #[test]
    fn test_health_serialization() {
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::CmdStale).unwrap(),
            "\"cmd_stale\""
        );
    }
}

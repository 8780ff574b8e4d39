// Differential-drive kinematics for the OI drive command
// Converts continuous motion requests into (velocity, radius) wire pairs.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::time::Duration;
use tracing::warn;

use crate::config::BaseConfig;
use crate::error::{OiError, Result};
use crate::oi::DriveCommand;
use crate::oi::protocol::{RADIUS_SPIN_CCW, RADIUS_SPIN_CW, RADIUS_STRAIGHT};

/// Device wheel speed limit (mm/s)
pub const MAX_WHEEL_SPEED: f64 = 500.0;

/// Largest representable turn radius (mm)
pub const MAX_TURN_RADIUS: f64 = 2000.0;

/// Velocity sent with a spin; the device turns in place at radius +/-1 regardless
pub const SPIN_VELOCITY: i16 = 100;

/// Requested velocities at or below this are treated as stopped (mm/s)
pub const MOVING_THRESHOLD: i16 = 5;

/// Static robot dimensions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotGeometry {
    pub width_mm: f64,
    pub wheel_circumference_mm: f64,
}

impl Default for RobotGeometry {
    fn default() -> Self {
        Self {
            width_mm: 235.0,
            wheel_circumference_mm: 220.0,
        }
    }
}

impl From<&BaseConfig> for RobotGeometry {
    fn from(config: &BaseConfig) -> Self {
        Self {
            width_mm: f64::from(config.width_or_default()),
            wheel_circumference_mm: f64::from(config.wheel_circumference_or_default()),
        }
    }
}

impl RobotGeometry {
    /// Angular rate (deg/s) whose wheel-tip speed equals MAX_WHEEL_SPEED
    pub fn max_angular_deg_per_sec(&self) -> f64 {
        MAX_WHEEL_SPEED * 180.0 / (PI * self.width_mm / 2.0)
    }
}

/// 3-vector used for velocity and power requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A high-level motion request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionRequest {
    Straight { distance_mm: i32, mm_per_sec: f64 },
    Spin { angle_deg: f64, deg_per_sec: f64 },
    Velocity { linear_mm_s: f64, angular_deg_s: f64 },
    Stop,
}

/// A drive command held for a fixed time before stopping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedDrive {
    pub command: DriveCommand,
    pub duration: Duration,
}

fn duration_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| OiError::InvalidArgument(format!("motion duration {secs}s: {e}")))
}

/// Clamp to the wheel speed limit and truncate to the wire type
fn clamp_velocity(velocity: f64) -> i16 {
    velocity.clamp(-MAX_WHEEL_SPEED, MAX_WHEEL_SPEED) as i16
}

/// Plan a straight move; None means the request reduces to a stop
pub fn plan_straight(distance_mm: i32, mm_per_sec: f64) -> Result<Option<TimedDrive>> {
    if distance_mm == 0 || mm_per_sec == 0.0 {
        return Ok(None);
    }
    let duration = duration_secs((f64::from(distance_mm) / mm_per_sec).abs())?;

    let magnitude = mm_per_sec.abs();
    if magnitude > MAX_WHEEL_SPEED {
        warn!(
            "Clamping velocity from {} to {} mm/sec",
            magnitude, MAX_WHEEL_SPEED
        );
    }
    let velocity = clamp_velocity(magnitude.copysign(f64::from(distance_mm)));

    Ok(Some(TimedDrive {
        command: DriveCommand::new(velocity, RADIUS_STRAIGHT),
        duration,
    }))
}

/// Plan an in-place spin; positive angles turn counter-clockwise
pub fn plan_spin(angle_deg: f64, deg_per_sec: f64) -> Result<Option<TimedDrive>> {
    if angle_deg == 0.0 || deg_per_sec == 0.0 {
        return Ok(None);
    }
    let duration = duration_secs((angle_deg / deg_per_sec).abs())?;
    let radius = if angle_deg > 0.0 {
        RADIUS_SPIN_CCW
    } else {
        RADIUS_SPIN_CW
    };

    Ok(Some(TimedDrive {
        command: DriveCommand::new(SPIN_VELOCITY, radius),
        duration,
    }))
}

/// Convert linear (mm/s) and angular (deg/s) velocity to a drive command
///
/// Out-of-range linear velocities are clamped with a warning.
pub fn velocity_command(
    geometry: &RobotGeometry,
    linear_mm_s: f64,
    angular_deg_s: f64,
) -> DriveCommand {
    if linear_mm_s == 0.0 && angular_deg_s == 0.0 {
        return DriveCommand::STOP;
    }

    if linear_mm_s == 0.0 {
        // Pure spin, wheel speed proportional to turn rate and wheelbase
        let wheel_speed = angular_deg_s.abs() * PI / 180.0 * geometry.width_mm / 2.0;
        let radius = if angular_deg_s > 0.0 {
            RADIUS_SPIN_CCW
        } else {
            RADIUS_SPIN_CW
        };
        return DriveCommand::new(wheel_speed.min(MAX_WHEEL_SPEED) as i16, radius);
    }

    let velocity = clamp_velocity(linear_mm_s);
    if linear_mm_s.abs() > MAX_WHEEL_SPEED {
        warn!(
            "Clamping velocity from {} to {} mm/sec",
            linear_mm_s, velocity
        );
    }

    if angular_deg_s == 0.0 {
        return DriveCommand::new(velocity, RADIUS_STRAIGHT);
    }

    // r = v / w with w in rad/s
    let radius = (f64::from(velocity) * 180.0) / (angular_deg_s * PI);
    DriveCommand::new(
        velocity,
        radius.clamp(-MAX_TURN_RADIUS, MAX_TURN_RADIUS) as i16,
    )
}

/// Scale power in [-1, 1] to (linear mm/s, angular deg/s)
///
/// Full angular power gives the same wheel-tip speed as full linear power.
pub fn power_to_velocity(geometry: &RobotGeometry, linear: Vector3, angular: Vector3) -> (f64, f64) {
    (
        linear.y * MAX_WHEEL_SPEED,
        angular.z * geometry.max_angular_deg_per_sec(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_zero_is_stop() {
        assert_eq!(plan_straight(0, 100.0).unwrap(), None);
        assert_eq!(plan_straight(100, 0.0).unwrap(), None);
    }

    #[test]
    fn test_straight_plan() {
        let plan = plan_straight(1000, 200.0).unwrap().unwrap();
        assert_eq!(plan.command, DriveCommand::new(200, RADIUS_STRAIGHT));
        assert_eq!(plan.duration, Duration::from_secs(5));

        let back = plan_straight(-300, 100.0).unwrap().unwrap();
        assert_eq!(back.command.velocity, -100);
        assert_eq!(back.duration, Duration::from_secs(3));
    }

    #[test]
    fn test_straight_sign_follows_distance() {
        let plan = plan_straight(500, -250.0).unwrap().unwrap();
        assert_eq!(plan.command.velocity, 250);
        assert_eq!(plan.duration, Duration::from_secs(2));
    }

    #[test]
    fn test_straight_velocity_clamped() {
        for speed in [501.0, 900.0, 40_000.0, -1_000.0] {
            let forward = plan_straight(1000, speed).unwrap().unwrap();
            assert_eq!(forward.command.velocity, 500);
            let backward = plan_straight(-1000, speed).unwrap().unwrap();
            assert_eq!(backward.command.velocity, -500);
        }
    }

    #[test]
    fn test_straight_rejects_non_finite_speed() {
        assert!(plan_straight(100, f64::NAN).is_err());
    }

    #[test]
    fn test_spin_plan() {
        let plan = plan_spin(1000.0, 10.0).unwrap().unwrap();
        assert_eq!(plan.duration, Duration::from_secs(100));
        assert_eq!(plan.command.radius, 1);

        let cw = plan_spin(-90.0, 45.0).unwrap().unwrap();
        assert_eq!(cw.command.radius, -1);
        assert_eq!(cw.duration, Duration::from_secs(2));

        assert_eq!(plan_spin(0.0, 10.0).unwrap(), None);
        assert_eq!(plan_spin(90.0, 0.0).unwrap(), None);
    }

    #[test]
    fn test_velocity_zero_is_stop() {
        let geometry = RobotGeometry::default();
        assert!(velocity_command(&geometry, 0.0, 0.0).is_stop());
    }

    #[test]
    fn test_velocity_clamped() {
        let geometry = RobotGeometry::default();
        for (linear, expected) in [(501.0, 500), (2000.0, 500), (-501.0, -500), (-9999.0, -500)] {
            let cmd = velocity_command(&geometry, linear, 0.0);
            assert_eq!(cmd, DriveCommand::new(expected, RADIUS_STRAIGHT));
        }
    }

    #[test]
    fn test_velocity_radius_clamped() {
        let geometry = RobotGeometry::default();
        for linear in [-500.0, -120.0, -1.0, 1.0, 50.0, 300.0, 500.0] {
            for angular in [-720.0, -30.0, -0.5, 0.01, 2.0, 90.0, 1000.0] {
                let cmd = velocity_command(&geometry, linear, angular);
                assert!(
                    (-2000..=2000).contains(&cmd.radius),
                    "radius {} for linear={} angular={}",
                    cmd.radius,
                    linear,
                    angular
                );
            }
        }
        // Slow turn saturates
        assert_eq!(velocity_command(&geometry, 500.0, 0.01).radius, 2000);
        assert_eq!(velocity_command(&geometry, 500.0, -0.01).radius, -2000);
    }

    #[test]
    fn test_velocity_arc_radius() {
        let geometry = RobotGeometry::default();
        // 100 mm/s at 90 deg/s: r = 100 / (pi/2) = 63.66 mm
        let cmd = velocity_command(&geometry, 100.0, 90.0);
        assert_eq!(cmd, DriveCommand::new(100, 63));
    }

    #[test]
    fn test_velocity_pure_spin() {
        let geometry = RobotGeometry::default();
        // 90 deg/s * pi/180 * 117.5 = 184.57 mm/s
        let ccw = velocity_command(&geometry, 0.0, 90.0);
        assert_eq!(ccw, DriveCommand::new(184, 1));
        let cw = velocity_command(&geometry, 0.0, -90.0);
        assert_eq!(cw, DriveCommand::new(184, -1));

        let fast = velocity_command(&geometry, 0.0, 10_000.0);
        assert_eq!(fast.velocity, 500);
    }

    #[test]
    fn test_full_linear_power() {
        let geometry = RobotGeometry::default();
        let (linear, angular) =
            power_to_velocity(&geometry, Vector3::new(0.0, 1.0, 0.0), Vector3::default());
        let cmd = velocity_command(&geometry, linear, angular);
        assert_eq!(cmd, DriveCommand::new(500, RADIUS_STRAIGHT));
    }

    #[test]
    fn test_full_angular_power_hits_max_wheel_speed() {
        let geometry = RobotGeometry::default();
        let (linear, angular) =
            power_to_velocity(&geometry, Vector3::default(), Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(linear, 0.0);
        assert!((angular - geometry.max_angular_deg_per_sec()).abs() < 1e-9);

        let cmd = velocity_command(&geometry, linear, angular);
        assert!(cmd.velocity >= 499 && cmd.velocity <= 500);
        assert_eq!(cmd.radius, 1);
    }
}

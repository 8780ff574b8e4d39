// High-level motion driver for the differential-drive base
//
// Combines kinematics and the OI protocol client into a simple API. Timed
// motions (straight, spin) block until their duration elapses or they are
// cancelled, and always finish with a stop.

use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::kinematics::{
    MOVING_THRESHOLD, MotionRequest, RobotGeometry, TimedDrive, Vector3, plan_spin,
    plan_straight, power_to_velocity, velocity_command,
};
use super::operation::{CancelToken, OperationSlot};
use crate::config::BaseConfig;
use crate::error::{OiError, Result};
use crate::oi::{Connection, ConnectionRegistry, DriveCommand, ProtocolClient};

/// Sensor packet holding the last requested velocity
const PACKET_REQUESTED_VELOCITY: u8 = 39;

/// Body footprint radius (340 mm diameter)
const BODY_RADIUS_MM: f64 = 170.0;

/// Named device commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    EnterFullMode,
    EnterSafeMode,
    SeekDock,
    Clean,
    Stop,
}

impl FromStr for Command {
    type Err = OiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "enter_full_mode" => Ok(Self::EnterFullMode),
            "enter_safe_mode" => Ok(Self::EnterSafeMode),
            "seek_dock" => Ok(Self::SeekDock),
            "clean" => Ok(Self::Clean),
            "stop" => Ok(Self::Stop),
            other => Err(OiError::UnknownCommand(other.to_string())),
        }
    }
}

impl Command {
    pub fn status(&self) -> &'static str {
        match self {
            Self::EnterFullMode => "full_mode_enabled",
            Self::EnterSafeMode => "safe_mode_enabled",
            Self::SeekDock => "seeking_dock",
            Self::Clean => "cleaning",
            Self::Stop => "stopped",
        }
    }
}

/// Physical properties in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Properties {
    pub width_meters: f64,
    pub turning_radius_meters: f64,
    pub wheel_circumference_meters: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Sphere { radius_mm: f64, label: String },
}

/// Issues a stop if a motion future is dropped mid-wait
struct StopOnDrop {
    connection: Arc<Connection>,
    armed: bool,
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let connection = Arc::clone(&self.connection);
        let stop = move || match connection.lock().stop() {
            Ok(()) => debug!("Motion abandoned, robot stopped"),
            Err(e) => warn!("Failed to stop abandoned motion: {}", e),
        };
        // Off the async worker when there is one
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(stop);
            }
            Err(_) => stop(),
        }
    }
}

pub struct BaseDriver {
    name: String,
    registry: Arc<ConnectionRegistry>,
    connection: Arc<Connection>,
    geometry: RobotGeometry,
    operations: OperationSlot,
    shutdown: CancelToken,
    closed: AtomicBool,
}

impl BaseDriver {
    /// Attach to the configured port and enter safe mode
    pub fn new(
        name: impl Into<String>,
        registry: Arc<ConnectionRegistry>,
        config: &BaseConfig,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let connection = registry.acquire(&config.serial_port)?;

        if let Err(e) = connection.lock().safe() {
            registry.release(&config.serial_port);
            return Err(OiError::Connection {
                port: config.serial_port.clone(),
                reason: format!("failed to enter Safe mode: {e}"),
            });
        }

        let geometry = RobotGeometry::from(config);
        info!(
            "Base {} initialized on {} (width: {}mm, wheel circumference: {}mm)",
            name, config.serial_port, geometry.width_mm, geometry.wheel_circumference_mm
        );

        Ok(Self {
            name,
            registry,
            connection,
            geometry,
            operations: OperationSlot::new(),
            shutdown: CancelToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> &str {
        self.connection.port()
    }

    pub fn geometry(&self) -> RobotGeometry {
        self.geometry
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(OiError::Closed)
        } else {
            Ok(())
        }
    }

    /// Run serial I/O on the blocking pool; the connection lock may be held
    /// by a sensor query for up to the read timeout
    async fn with_client<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProtocolClient<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || f(&mut connection.lock()))
            .await
            .map_err(|e| OiError::Transport {
                op: "serial task",
                port: self.port().to_string(),
                source: std::io::Error::other(e),
            })?
    }

    async fn send_drive(&self, command: DriveCommand) -> Result<()> {
        self.with_client(move |client| client.send_drive(command)).await
    }

    async fn send_stop(&self) -> Result<()> {
        self.with_client(|client| client.stop()).await?;
        debug!("Base {} stopped", self.name);
        Ok(())
    }

    /// Move straight; zero distance or speed just stops. Blocks until done or cancelled.
    pub async fn move_straight(
        &self,
        distance_mm: i32,
        mm_per_sec: f64,
        cancel: &CancelToken,
    ) -> Result<()> {
        let plan = plan_straight(distance_mm, mm_per_sec)?;
        if let Some(plan) = &plan {
            debug!(
                "MoveStraight: distance={} mm, velocity={} mm/sec, duration={:.2} sec",
                distance_mm,
                plan.command.velocity,
                plan.duration.as_secs_f64()
            );
        }
        self.run_timed(plan, cancel).await
    }

    /// Spin in place; positive angles turn counter-clockwise. Blocks until done or cancelled.
    pub async fn spin(&self, angle_deg: f64, deg_per_sec: f64, cancel: &CancelToken) -> Result<()> {
        let plan = plan_spin(angle_deg, deg_per_sec)?;
        if let Some(plan) = &plan {
            debug!(
                "Spin: angle={:.2} deg, speed={:.2} deg/sec, duration={:.2} sec",
                angle_deg,
                deg_per_sec,
                plan.duration.as_secs_f64()
            );
        }
        self.run_timed(plan, cancel).await
    }

    async fn run_timed(&self, plan: Option<TimedDrive>, cancel: &CancelToken) -> Result<()> {
        self.ensure_open()?;
        let operation = self.operations.begin().await;
        // close() may have run while we waited for the slot
        self.ensure_open()?;
        if operation.is_superseded() {
            return Err(OiError::Cancelled);
        }

        let Some(plan) = plan else {
            return self.send_stop().await;
        };
        let mut stop_guard = StopOnDrop {
            connection: Arc::clone(&self.connection),
            armed: true,
        };
        self.send_drive(plan.command).await?;

        let waited: Result<()> = tokio::select! {
            _ = tokio::time::sleep(plan.duration) => Ok(()),
            _ = operation.superseded() => Err(OiError::Cancelled),
            _ = self.shutdown.cancelled() => Err(OiError::Cancelled),
            reason = cancel.cancelled() => Err(reason.into()),
        };

        stop_guard.armed = false;
        let stopped = self.send_stop().await;
        match waited {
            Ok(()) => stopped,
            Err(e) => {
                if let Err(stop_err) = stopped {
                    warn!("Failed to stop after cancelled motion: {}", stop_err);
                }
                Err(e)
            }
        }
    }

    /// Run any motion request; velocity requests return immediately
    pub async fn execute(&self, request: MotionRequest, cancel: &CancelToken) -> Result<()> {
        match request {
            MotionRequest::Straight {
                distance_mm,
                mm_per_sec,
            } => self.move_straight(distance_mm, mm_per_sec, cancel).await,
            MotionRequest::Spin {
                angle_deg,
                deg_per_sec,
            } => self.spin(angle_deg, deg_per_sec, cancel).await,
            MotionRequest::Velocity {
                linear_mm_s,
                angular_deg_s,
            } => self.drive_velocity(linear_mm_s, angular_deg_s).await,
            MotionRequest::Stop => self.stop().await,
        }
    }

    /// Set linear (mm/s, +Y forward) and angular (deg/s, +Z left) velocity
    pub async fn set_velocity(&self, linear: Vector3, angular: Vector3) -> Result<()> {
        self.drive_velocity(linear.y, angular.z).await
    }

    /// Set power in [-1, 1] (+Y forward, +Z left)
    pub async fn set_power(&self, linear: Vector3, angular: Vector3) -> Result<()> {
        let (linear_mm_s, angular_deg_s) = power_to_velocity(&self.geometry, linear, angular);
        self.drive_velocity(linear_mm_s, angular_deg_s).await
    }

    async fn drive_velocity(&self, linear_mm_s: f64, angular_deg_s: f64) -> Result<()> {
        self.ensure_open()?;
        let operation = self.operations.begin().await;
        self.ensure_open()?;
        if operation.is_superseded() {
            return Err(OiError::Cancelled);
        }

        let command = velocity_command(&self.geometry, linear_mm_s, angular_deg_s);
        if command.is_stop() {
            return self.send_stop().await;
        }
        self.send_drive(command).await?;
        debug!(
            "SetVelocity: velocity={} mm/sec, radius={} mm",
            command.velocity, command.radius
        );
        Ok(())
    }

    /// Cancel any running motion and stop
    ///
    /// Always sends the stop, even if a newer request queues up meanwhile;
    /// that request waits for this one.
    pub async fn stop(&self) -> Result<()> {
        self.ensure_open()?;
        let _operation = self.operations.begin().await;
        self.ensure_open()?;
        self.send_stop().await
    }

    /// Whether the last *requested* velocity is non-zero
    ///
    /// Reads the requested-velocity packet, not wheel encoders: this reports
    /// what was commanded, so a stalled or lifted robot still reads as moving.
    pub fn is_moving(&self) -> Result<bool> {
        self.ensure_open()?;
        let data = self.connection.lock().sensor(PACKET_REQUESTED_VELOCITY)?;
        let requested = i16::from_be_bytes([data[0], data[1]]);
        let moving = requested.unsigned_abs() > MOVING_THRESHOLD.unsigned_abs();
        debug!(
            "IsMoving: requested_velocity={} mm/s, moving={}",
            requested, moving
        );
        Ok(moving)
    }

    pub fn properties(&self) -> Properties {
        Properties {
            width_meters: self.geometry.width_mm / 1000.0,
            turning_radius_meters: 0.0, // turns in place
            wheel_circumference_meters: self.geometry.wheel_circumference_mm / 1000.0,
        }
    }

    pub fn geometries(&self) -> Vec<Geometry> {
        vec![Geometry::Sphere {
            radius_mm: BODY_RADIUS_MM,
            label: self.name.clone(),
        }]
    }

    /// Run a named command; unknown names fail before any I/O
    pub async fn do_command(&self, name: &str) -> Result<&'static str> {
        let command: Command = name.parse()?;
        self.ensure_open()?;

        match command {
            Command::Stop => self.stop().await?,
            Command::EnterFullMode => {
                self.with_client(|client| client.full()).await?;
                info!("Entered Full mode (safety features disabled)");
            }
            Command::EnterSafeMode => {
                self.with_client(|client| client.safe()).await?;
                info!("Entered Safe mode (safety features enabled)");
            }
            Command::SeekDock => {
                self.with_client(|client| client.seek_dock()).await?;
                info!("Seeking charging dock");
            }
            Command::Clean => {
                self.with_client(|client| client.clean()).await?;
                info!("Started cleaning mode");
            }
        }
        Ok(command.status())
    }

    /// Stop, cancel in-flight motion and release the connection. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        self.operations.cancel_current().await;
        if let Err(e) = self.with_client(|client| client.stop()).await {
            warn!("Failed to stop base during close: {}", e);
        }
        self.unregister();
    }

    fn unregister(&self) {
        self.registry.release(self.connection.port());
        info!("Base {} closed", self.name);
    }
}

impl Drop for BaseDriver {
    fn drop(&mut self) {
        // Try to stop the robot when the driver is dropped without close()
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
            if let Err(e) = self.connection.lock().stop() {
                warn!("Failed to stop base during drop: {}", e);
            }
            self.unregister();
        }
    }
}

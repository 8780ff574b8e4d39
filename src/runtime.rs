// 50 Hz command loop with watchdog, plus periodic sensor publishing
// Note: the watchdog only covers continuous velocity/power commands. If teleop
// crashes mid-drive, the robot is stopped once the last command goes stale.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::{CMD_TIMEOUT, LOOP_HZ, RuntimeConfig, TOPIC_CMD_BASE, TOPIC_HEALTH, TOPIC_READINGS};
use crate::messages::{BaseCommand, RuntimeHealth};
use crate::motion::{BaseDriver, CancelToken};
use crate::oi::ConnectionRegistry;
use crate::sensor::SensorDriver;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct Runtime {
    continuous_since: Option<Instant>,
    health: RuntimeHealth,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            continuous_since: None,
            health: RuntimeHealth::Idle,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Track an incoming command
    fn on_command(&mut self, cmd: &BaseCommand, now: Instant) {
        debug!("Received command: {:?}", cmd);
        if cmd.is_continuous() {
            self.continuous_since = Some(now);
            self.health = RuntimeHealth::Ok;
        } else {
            self.continuous_since = None;
            self.health = RuntimeHealth::Idle;
        }
    }

    /// Returns true once when a continuous command has gone stale
    fn watchdog_expired(&mut self, now: Instant) -> bool {
        match self.continuous_since {
            Some(at) if now.duration_since(at) > CMD_TIMEOUT => {
                warn!(
                    "Command stale ({:?} old), stopping robot",
                    now.duration_since(at)
                );
                self.continuous_since = None;
                self.health = RuntimeHealth::CmdStale;
                true
            }
            _ => false,
        }
    }
}

/// Run a command; timed motions go to their own task so newer commands can supersede them
async fn dispatch(base: &Arc<BaseDriver>, cmd: BaseCommand) {
    if let Some(request) = cmd.timed_request() {
        let base = Arc::clone(base);
        tokio::spawn(async move {
            if let Err(e) = base.execute(request, &CancelToken::new()).await {
                warn!("{:?} ended early: {}", request, e);
            }
        });
        return;
    }

    let result = match cmd {
        BaseCommand::SetVelocity { linear, angular } => base.set_velocity(linear, angular).await,
        BaseCommand::SetPower { linear, angular } => base.set_power(linear, angular).await,
        BaseCommand::Stop => base.stop().await,
        BaseCommand::DoCommand { command } => base.do_command(&command).await.map(|status| {
            info!("Command {} -> {}", command, status);
        }),
        BaseCommand::MoveStraight { .. } | BaseCommand::Spin { .. } => Ok(()),
    };
    if let Err(e) = result {
        warn!("Command failed: {}", e);
    }
}

async fn publish_readings(
    sensor: &Arc<SensorDriver>,
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), BoxError> {
    let sensor = Arc::clone(sensor);
    // The query blocks on serial reads
    match tokio::task::spawn_blocking(move || sensor.readings()).await? {
        Ok(reading) => publisher.put(serde_json::to_string(&reading)?).await?,
        Err(e) => warn!("Failed to read sensors: {}", e),
    }
    Ok(())
}

async fn serve(
    base: &Arc<BaseDriver>,
    sensor: &Arc<SensorDriver>,
    readings_hz: f64,
) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_BASE).await?;
    let pub_readings = session.declare_publisher(TOPIC_READINGS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let mut readings_tick = interval(Duration::from_secs_f64(1.0 / readings_hz));
    readings_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout, readings at {}Hz",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis(),
        readings_hz
    );
    info!("Subscribed to: {}", TOPIC_CMD_BASE);
    info!("Publishing to: {}, {}", TOPIC_READINGS, TOPIC_HEALTH);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                return Ok(());
            }
            _ = tick.tick() => {
                // 1. Drain all pending commands (non-blocking). Named commands run
                // in arrival order; of the motion commands only the newest runs.
                let mut motion = None;
                while let Ok(Some(sample)) = subscriber.try_recv() {
                    let payload = sample.payload().to_bytes();
                    match serde_json::from_slice::<BaseCommand>(&payload) {
                        Ok(cmd) => {
                            runtime.on_command(&cmd, Instant::now());
                            if cmd.is_motion() {
                                motion = Some(cmd);
                            } else {
                                dispatch(base, cmd).await;
                            }
                        }
                        Err(e) => warn!("Failed to parse command: {}", e),
                    }
                }
                if let Some(cmd) = motion {
                    dispatch(base, cmd).await;
                }

                // 2. Watchdog
                if runtime.watchdog_expired(Instant::now()) {
                    if let Err(e) = base.stop().await {
                        warn!("Watchdog stop failed: {}", e);
                    }
                }

                // 3. Publish health
                pub_health.put(serde_json::to_string(&runtime.health())?).await?;
            }
            _ = readings_tick.tick() => {
                publish_readings(sensor, &pub_readings).await?;
            }
        }
    }
}

/// Open the drivers, serve until Ctrl-C, then close everything
pub async fn run(config: RuntimeConfig) -> Result<(), BoxError> {
    let registry = Arc::new(ConnectionRegistry::new());
    let base = Arc::new(BaseDriver::new(
        "base",
        Arc::clone(&registry),
        &config.base,
    )?);
    let sensor = Arc::new(SensorDriver::new(
        Arc::clone(&registry),
        &config.sensor_config(),
    )?);

    let outcome = serve(&base, &sensor, config.readings_hz).await;

    base.close().await;
    sensor.close();
    registry.shutdown();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::Vector3;

    fn velocity() -> BaseCommand {
        BaseCommand::SetVelocity {
            linear: Vector3::new(0.0, 100.0, 0.0),
            angular: Vector3::default(),
        }
    }

    #[test]
    fn test_starts_idle() {
        let mut runtime = Runtime::new();
        assert_eq!(runtime.health(), RuntimeHealth::Idle);
        assert!(!runtime.watchdog_expired(Instant::now() + Duration::from_secs(10)));
    }

    #[test]
    fn test_watchdog_fires_once_for_stale_velocity() {
        let mut runtime = Runtime::new();
        let t0 = Instant::now();
        runtime.on_command(&velocity(), t0);
        assert_eq!(runtime.health(), RuntimeHealth::Ok);

        assert!(!runtime.watchdog_expired(t0 + Duration::from_millis(100)));
        assert!(runtime.watchdog_expired(t0 + Duration::from_millis(300)));
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
        assert!(!runtime.watchdog_expired(t0 + Duration::from_millis(400)));
    }

    #[test]
    fn test_fresh_command_resets_watchdog() {
        let mut runtime = Runtime::new();
        let t0 = Instant::now();
        runtime.on_command(&velocity(), t0);
        runtime.on_command(&velocity(), t0 + Duration::from_millis(200));
        assert!(!runtime.watchdog_expired(t0 + Duration::from_millis(400)));
    }

    #[test]
    fn test_timed_motion_disarms_watchdog() {
        let mut runtime = Runtime::new();
        let t0 = Instant::now();
        runtime.on_command(&velocity(), t0);
        runtime.on_command(
            &BaseCommand::Spin {
                angle_deg: 90.0,
                deg_per_sec: 10.0,
            },
            t0,
        );
        assert_eq!(runtime.health(), RuntimeHealth::Idle);
        assert!(!runtime.watchdog_expired(t0 + Duration::from_secs(5)));
    }
}

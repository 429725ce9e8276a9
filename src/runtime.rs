// 100 Hz loop hosting the robot core against the simulated base, with a command watchdog
// Note: the watchdog drops the API order when its source stops refreshing it, so a
// crashed client does not leave the robot driving

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{
    CMD_TIMEOUT, LOOP_HZ, ROBOT_RADIUS, SERVO_DT_MS, TELEMETRY_DIVIDER, TOPIC_CMD, TOPIC_HEALTH,
    TOPIC_TELEMETRY, Tuning, WHEEL_ALPHAS_DEG, WHEEL_RADIUS,
};
use crate::drive::{ChassisVelocity, Kinematics, KinematicsError, PwmSink, encoder};
use crate::messages::{Command, RuntimeHealth, Telemetry};
use crate::odometry::{GoalLimits, Pose};
use crate::robot::Robot;
use crate::sim::SimulatedBase;

/// Options of the runtime, usually from the command line
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub tuning_path: Option<PathBuf>,
    pub telemetry_divider: u32,
    pub cmd_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tuning_path: None,
            telemetry_divider: TELEMETRY_DIVIDER,
            cmd_timeout: CMD_TIMEOUT,
        }
    }
}

pub struct Runtime {
    robot: Robot,
    base: SimulatedBase,
    api_received_at: Option<Instant>,
    cmd_timeout: Duration,
    health: RuntimeHealth,
    started: Instant,
}

impl Runtime {
    pub fn new(tuning: Tuning, cmd_timeout: Duration) -> Result<Self, KinematicsError> {
        let kinematics = Kinematics::from_alphas(WHEEL_ALPHAS_DEG, WHEEL_RADIUS, ROBOT_RADIUS)?;
        let (encoders, readout) = encoder::channel();
        let base = SimulatedBase::new(kinematics.clone(), encoders, &tuning.servo);
        let robot = Robot::new(tuning, kinematics, readout);

        Ok(Self {
            robot,
            base,
            api_received_at: None,
            cmd_timeout,
            health: RuntimeHealth::CmdStale, // Start stale until first API order
            started: Instant::now(),
        })
    }

    fn now_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Dispatch one incoming command
    fn on_command(&mut self, cmd: Command) {
        debug!("Received command: {:?}", &cmd);
        match cmd {
            Command::Joystick { dx, dy, turn } => {
                self.robot.set_joystick_order(ChassisVelocity::new(dx, dy, turn));
            }
            Command::Api { dx, dy, turn } => {
                self.robot.set_api_order(ChassisVelocity::new(dx, dy, turn));
                self.api_received_at = Some(Instant::now());
            }
            Command::Program { id, dx, dy, turn } => {
                let now = self.now_ms();
                self.robot.set_program_order(id, now, ChassisVelocity::new(dx, dy, turn));
            }
            Command::ProgramEnable { id, enable } => {
                self.robot.orders_mut().set_program_enabled(id, enable);
            }
            Command::Control {
                dx,
                dy,
                turn,
                speed,
                turn_speed,
            } => {
                let limits = GoalLimits {
                    max_speed: speed,
                    max_turn: turn_speed,
                };
                self.robot.control(ChassisVelocity::new(dx, dy, turn.to_radians()), limits);
            }
            Command::Goto {
                x,
                y,
                theta,
                speed,
                turn_speed,
            } => {
                let limits = GoalLimits {
                    max_speed: speed,
                    max_turn: turn_speed,
                };
                self.robot.goto(Pose::new(x, y, theta.to_radians()), limits);
            }
            Command::Stop => self.robot.stop_goal(),
            Command::Emergency => {
                self.robot.emergency_stop();
                self.api_received_at = None;
            }
            Command::ResetOdometry => self.robot.reset_odometry(),
            Command::ResetEncoders => self.robot.reset_encoders(),
            Command::SetPose { x, y, theta } => {
                self.robot.set_pose(Pose::new(x, y, theta.to_radians()));
            }
            Command::Pwm { pwm } => {
                let pwm = self.robot.manual_pwm(pwm);
                self.base.write_pwm(pwm);
            }
            Command::ServoEnable { enable } => {
                info!("Servo {}", if enable { "enabled" } else { "disabled" });
                self.robot.servo_mut().set_enabled(enable);
            }
        }
    }

    /// Drop the API order once it went stale
    fn check_watchdog(&mut self) {
        match self.api_received_at {
            Some(received_at) if received_at.elapsed() > self.cmd_timeout => {
                warn!(
                    "API order stale ({:?} old), dropping it",
                    received_at.elapsed()
                );
                self.robot.orders_mut().disable_api();
                self.api_received_at = None;
                self.health = RuntimeHealth::CmdStale;
            }
            Some(_) => self.health = RuntimeHealth::Ok,
            None => self.health = RuntimeHealth::CmdStale,
        }
    }

    /// One period: sample the base, servo the wheels, update pose and orders
    fn tick(&mut self) {
        self.check_watchdog();

        self.base.step(SERVO_DT_MS as f32 / 1000.0);
        self.base.window_tick();

        if let Some(pwm) = self.robot.servo_tick() {
            self.base.write_pwm(pwm);
        }

        self.robot.control_tick(self.base.yaw());
    }

    fn telemetry(&self) -> Telemetry {
        self.robot.telemetry(self.now_ms())
    }
}

pub async fn run(options: RuntimeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let tuning = match &options.tuning_path {
        Some(path) => {
            info!("Loading tuning from {}", path.display());
            Tuning::load(path)?
        }
        None => Tuning::default(),
    };
    debug!("Tuning: {:?}", tuning);

    let mut runtime = Runtime::new(tuning, options.cmd_timeout)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let divider = options.telemetry_divider.max(1);
    let mut ticks: u32 = 0;

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        options.cmd_timeout.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD);
    info!("Publishing to: {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Drain all pending commands (non-blocking), in arrival order
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<Command>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Servo and control (includes watchdog logic)
        runtime.tick();

        // 3. Publish telemetry and health
        ticks = ticks.wrapping_add(1);
        if ticks % divider == 0 {
            let telemetry_json = serde_json::to_string(&runtime.telemetry())?;
            pub_telemetry.put(telemetry_json).await?;

            let health_json = serde_json::to_string(&runtime.health)?;
            pub_health.put(health_json).await?;
        }
    }
}

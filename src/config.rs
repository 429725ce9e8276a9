// Geometry, periods, topics and tunable control parameters
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Runtime loop frequency (one servo + control tick per period)
pub const LOOP_HZ: u64 = 100;

// Watchdog on the API order
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Publish telemetry every N ticks
pub const TELEMETRY_DIVIDER: u32 = 10;

// Zenoh topics
pub const TOPIC_CMD: &str = "holo/cmd"; // commands
pub const TOPIC_TELEMETRY: &str = "holo/telemetry"; // pose, wheels, encoders
pub const TOPIC_HEALTH: &str = "holo/state/health"; // health status

// Wheels gear reduction ratio
pub const REDUCTION_RATIO: i32 = 210;

// Encoder cycles per wheel revolution
pub const WHEELS_CPR: i32 = 7 * 4 * REDUCTION_RATIO;

// Wheel radius [mm]
pub const WHEEL_RADIUS: f32 = 35.0;

// Distance from robot center to wheel [mm]
pub const ROBOT_RADIUS: f32 = 51.4;

// Changing this moves the "front" of the robot used in the kinematics [deg]
pub const FRONT_OFFSET_ALPHA: f32 = 0.0;

// Wheels orientations [deg]
pub const WHEEL_ALPHAS_DEG: [f32; 3] = [
    FRONT_OFFSET_ALPHA + 60.0,
    FRONT_OFFSET_ALPHA + 180.0,
    FRONT_OFFSET_ALPHA - 60.0,
];

// Servo period [ms]
pub const SERVO_DT_MS: u32 = 10;

// Speed estimation period [ms], a multiple of the servo period
pub const SPEED_DT_MS: u32 = 50;

// Number of servo periods covered by the speed estimation
pub const SPEED_WINDOW: usize = (SPEED_DT_MS / SERVO_DT_MS) as usize;

// Full-scale PWM
pub const PWM_MAX: i32 = 3000;

// Maximum chassis speed [mm/s] before orders get renormalized
pub const MAX_SPEED: f32 = 250.0;

// Number of program order slots
pub const PROGRAM_SLOTS: usize = 3;

// Goal reached thresholds
pub const REACHED_DISTANCE: f32 = 5.0; // mm
pub const REACHED_ANGLE: f32 = 0.12; // rad

/// Velocity servo gains and feed-forward model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoParams {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Max variation of the smoothed target per tick [raw]
    pub max_step: f32,
    /// Linear model slope [% of full scale per raw unit]
    pub ff_a: f32,
    /// Linear model offset (dead zone) [% of full scale]
    pub ff_b: f32,
    /// Max PID correction [fraction of full scale]
    pub max_correction: f32,
}

impl Default for ServoParams {
    fn default() -> Self {
        Self {
            kp: 15.0,
            ki: 0.5,
            kd: 0.0,
            max_step: 10.0,
            ff_a: 0.11,
            ff_b: 42.0,
            max_correction: 0.25,
        }
    }
}

/// Goal controller gains and default limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalParams {
    /// Default max linear speed [mm/s]
    pub max_speed: f32,
    /// Default max turn speed [deg/s]
    pub max_turn: f32,
    pub kp: f32,
    pub turn_kp: f32,
}

impl Default for GoalParams {
    fn default() -> Self {
        Self {
            max_speed: 50.0,
            max_turn: 50.0,
            kp: 1.5,
            turn_kp: 75.0,
        }
    }
}

/// Everything that can be tuned without rebuilding
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub servo: ServoParams,
    pub goal: GoalParams,
    /// Chassis speed limit [mm/s]
    pub max_speed: f32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            servo: ServoParams::default(),
            goal: GoalParams::default(),
            max_speed: MAX_SPEED,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read tuning file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid tuning file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Invalid tuning value {field}: {value}")]
    Invalid { field: &'static str, value: f32 },
}

impl Tuning {
    /// Load tuning from a JSON file, missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let tuning = Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tuning.validate()?;
        Ok(tuning)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Reject limits and steps that must be non-negative
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("servo.max_step", self.servo.max_step),
            ("servo.max_correction", self.servo.max_correction),
            ("goal.max_speed", self.goal.max_speed),
            ("goal.max_turn", self.goal.max_turn),
            ("max_speed", self.max_speed),
        ];
        for (field, value) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid { field, value });
            }
        }
        Ok(())
    }
}

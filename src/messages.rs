// Message types exchanged with the runtime

use serde::{Deserialize, Serialize};

use crate::drive::ChassisVelocity;
use crate::odometry::Pose;

// Command from teleop/scripts/programs -> runtime
// Velocities are mm/s and deg/s, angles in degrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Manual joystick order
    Joystick { dx: f32, dy: f32, turn: f32 },
    /// External API order, dropped by the watchdog when not refreshed
    Api { dx: f32, dy: f32, turn: f32 },
    /// Order of a running program
    Program { id: u32, dx: f32, dy: f32, turn: f32 },
    ProgramEnable { id: u32, enable: bool },
    /// Move by an offset relative to the current goal
    Control {
        dx: f32,
        dy: f32,
        turn: f32,
        speed: f32,
        turn_speed: f32,
    },
    /// Move to an absolute pose in the odometry frame
    Goto {
        x: f32,
        y: f32,
        theta: f32,
        speed: f32,
        turn_speed: f32,
    },
    /// Stop seeking the goal
    Stop,
    Emergency,
    ResetOdometry,
    ResetEncoders,
    SetPose { x: f32, y: f32, theta: f32 },
    /// Raw PWMs, disables the servo
    Pwm { pwm: [i32; 3] },
    ServoEnable { enable: bool },
}

// Snapshot published by the runtime for the telemetry sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Telemetry {
    /// Milliseconds since runtime start
    pub timestamp: u32,
    pub pose: Pose,
    pub goal: Pose,
    pub goal_enabled: bool,
    pub goal_reached: bool,
    /// Aggregated order [mm/s, mm/s, deg/s]
    pub order: ChassisVelocity,
    /// Measured wheel speeds [rad/s]
    pub wheel_speeds: [f32; 3],
    /// Wheel speed targets [rad/s]
    pub wheel_targets: [f32; 3],
    pub encoders: [i32; 3],
    pub encoder_fails: [u32; 3],
    pub pwm: [i32; 3],
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

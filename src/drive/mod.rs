// Drive layer of the holonomic base
//
// Provides:
// - Quadrature decoding and windowed wheel speed estimation
// - Forward and inverse omniwheel kinematics
// - Per-wheel feed-forward + PID velocity servo

pub mod encoder;
pub mod kinematics;
pub mod servo;

pub use encoder::{EncoderReadout, Encoders, PhaseSample};
pub use kinematics::{ChassisVelocity, Kinematics, KinematicsError, WheelGeometry};
pub use servo::{VelocityServo, WheelServo};

/// Receives the PWM commands of the three motors
pub trait PwmSink {
    fn write_pwm(&mut self, pwm: [i32; 3]);
}

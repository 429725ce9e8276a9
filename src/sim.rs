// Simulated drive base
//
// Stands in for the motors, the encoder sampler and the heading sensor: PWMs are turned
// into wheel speeds with the inverse of the servo feed-forward model, wheel rotations
// are fed to the encoders as quadrature phase samples, and the true pose is integrated
// with the same kinematics as the robot.

use std::f64::consts::PI;

use crate::config::{PWM_MAX, ServoParams, WHEELS_CPR};
use crate::drive::{Encoders, Kinematics, PhaseSample, PwmSink, encoder};
use crate::odometry::{Pose, normalize_angle};

/// Raw AB value of each quadrature state
const STATE_TO_PHASE: [u8; 4] = [0b00, 0b01, 0b11, 0b10];

/// Motor response time constant [s]
const MOTOR_TAU: f32 = 0.03;

/// Phase generator of one wheel encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadratureSignal {
    state: u8,
}

impl QuadratureSignal {
    pub fn phase(&self) -> PhaseSample {
        PhaseSample::from_raw(STATE_TO_PHASE[self.state as usize])
    }

    /// Advance one state forward (positive) or backward (negative)
    pub fn step(&mut self, direction: i32) -> PhaseSample {
        self.state = (self.state as i32 + direction.signum()).rem_euclid(4) as u8;
        self.phase()
    }
}

/// Steady-state wheel speed [rad/s] for a PWM, inverse of the linear motor model
fn motor_speed(params: &ServoParams, pwm: i32) -> f32 {
    let percent = 100.0 * pwm as f32 / PWM_MAX as f32;
    if percent.abs() <= params.ff_b || params.ff_a <= 0.0 {
        return 0.0;
    }
    let raw = (percent - percent.signum() * params.ff_b) / params.ff_a;
    encoder::raw_speed_to_rad_per_s(raw)
}

pub struct SimulatedBase {
    kinematics: Kinematics,
    encoders: Encoders,
    model: ServoParams,
    signals: [QuadratureSignal; 3],
    // Wheel angles [rad] and the encoder steps already emitted for them
    angles: [f64; 3],
    emitted: [i64; 3],
    speeds: [f32; 3],
    pwm: [i32; 3],
    pose: Pose,
}

impl SimulatedBase {
    pub fn new(kinematics: Kinematics, encoders: Encoders, model: &ServoParams) -> Self {
        Self {
            kinematics,
            encoders,
            model: *model,
            signals: [QuadratureSignal::default(); 3],
            angles: [0.0; 3],
            emitted: [0; 3],
            speeds: [0.0; 3],
            pwm: [0; 3],
            pose: Pose::default(),
        }
    }

    /// Advance the motor model by `dt` seconds with the last PWMs
    pub fn step(&mut self, dt: f32) {
        let alpha = (dt / MOTOR_TAU).min(1.0);
        for (speed, pwm) in self.speeds.iter_mut().zip(self.pwm) {
            let target = motor_speed(&self.model, pwm);
            *speed += (target - *speed) * alpha;
        }
        self.integrate(dt);
    }

    /// Spin the wheels at exactly the given speeds [rad/s] for `dt` seconds
    pub fn drive_ideal(&mut self, speeds: [f32; 3], dt: f32) {
        self.speeds = speeds;
        self.integrate(dt);
    }

    fn integrate(&mut self, dt: f32) {
        let mut steps = [0i64; 3];
        for k in 0..3 {
            self.angles[k] += self.speeds[k] as f64 * dt as f64;
            let count = (self.angles[k] * WHEELS_CPR as f64 / (2.0 * PI)).round() as i64;
            steps[k] = count - self.emitted[k];
            self.emitted[k] = count;
        }

        // One sample per step so that the decoder never misses a state
        let longest = steps.iter().map(|s| s.abs()).max().unwrap_or(0);
        for i in 0..longest {
            let mut phases = [PhaseSample::default(); 3];
            for k in 0..3 {
                phases[k] = if i < steps[k].abs() {
                    self.signals[k].step(steps[k].signum() as i32)
                } else {
                    self.signals[k].phase()
                };
            }
            self.encoders.sample(phases);
        }

        let motion = self.kinematics.forward(self.speeds.map(|w| w * dt));
        let (wx, wy) = self.pose.local_to_world(motion.dx, motion.dy);
        self.pose.x += wx;
        self.pose.y += wy;
        self.pose.theta = normalize_angle(self.pose.theta + motion.turn);
    }

    /// Speed estimation tick of the encoders
    pub fn window_tick(&mut self) {
        self.encoders.window_tick();
    }

    /// Inject one raw phase sample, bypassing the wheel model
    pub fn sample(&mut self, phases: [PhaseSample; 3]) {
        self.encoders.sample(phases);
    }

    /// Heading sensor output [rad]
    pub fn yaw(&self) -> f32 {
        self.pose.theta
    }

    /// True pose of the base
    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn pwm(&self) -> [i32; 3] {
        self.pwm
    }
}

impl PwmSink for SimulatedBase {
    fn write_pwm(&mut self, pwm: [i32; 3]) {
        self.pwm = pwm.map(|p| p.clamp(-PWM_MAX, PWM_MAX));
    }
}

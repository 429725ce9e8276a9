// Per-wheel velocity servo: slew-limited target, linear feed-forward and clamped PID
//
// Targets and measurements are in raw encoder units (steps per speed window), the
// output is a signed PWM in [-PWM_MAX, PWM_MAX].

use crate::config::{PWM_MAX, ServoParams};

/// Servo state of one wheel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelServo {
    /// Requested target [raw]
    pub target: f32,
    /// Slew-rate limited target actually servoed [raw]
    pub smoothed: f32,
    /// Integral accumulator [pwm]
    pub integral: f32,
    pub last_error: f32,
    pub pwm: i32,
}

impl WheelServo {
    fn tick(&mut self, params: &ServoParams, measured: i32) -> i32 {
        let max_pwm = PWM_MAX as f32;

        self.smoothed = if self.smoothed + params.max_step < self.target {
            self.smoothed + params.max_step
        } else if self.smoothed - params.max_step > self.target {
            self.smoothed - params.max_step
        } else {
            self.target
        };

        let target = self.smoothed;
        let error = target - measured as f32;
        let sign = if target > 0.0 {
            1.0
        } else if target < 0.0 {
            -1.0
        } else {
            0.0
        };

        // A priori value from the motor linear model
        let feed_forward = max_pwm * (params.ff_a * target + sign * params.ff_b) / 100.0;

        let max_correction = params.max_correction.abs() * max_pwm;
        let derivative = params.kd * (error - self.last_error);
        let correction =
            (params.kp * error + self.integral + derivative).clamp(-max_correction, max_correction);

        self.integral = (self.integral + params.ki * error).clamp(-max_pwm, max_pwm);

        let mut pwm = (feed_forward + correction) as i32;

        // Never drive against the target direction
        if target == 0.0 || (target > 0.0 && pwm < 0) || (target < 0.0 && pwm > 0) {
            pwm = 0;
        }

        self.pwm = pwm.clamp(-PWM_MAX, PWM_MAX);
        self.last_error = error;
        self.pwm
    }
}

/// Closed-loop speed control of the three wheels
#[derive(Debug, Clone)]
pub struct VelocityServo {
    params: ServoParams,
    wheels: [WheelServo; 3],
    enabled: bool,
}

impl VelocityServo {
    pub fn new(params: ServoParams) -> Self {
        Self {
            params,
            wheels: [WheelServo::default(); 3],
            enabled: true,
        }
    }

    /// Disabled, `tick` leaves outputs alone (manual PWM testing)
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set wheel targets [raw], a zero target clears that wheel's integral
    pub fn set_targets(&mut self, targets: [f32; 3]) {
        for (wheel, target) in self.wheels.iter_mut().zip(targets) {
            wheel.target = target.trunc();
            if wheel.target == 0.0 {
                wheel.integral = 0.0;
            }
        }
    }

    pub fn targets(&self) -> [f32; 3] {
        self.wheels.map(|w| w.target)
    }

    /// Zero all targets
    pub fn stop(&mut self) {
        self.set_targets([0.0; 3]);
    }

    /// One servo period, returns the PWMs to apply unless disabled
    pub fn tick(&mut self, measured: [i32; 3]) -> Option<[i32; 3]> {
        if !self.enabled {
            return None;
        }

        let mut pwms = [0; 3];
        for ((wheel, speed), pwm) in self.wheels.iter_mut().zip(measured).zip(pwms.iter_mut()) {
            *pwm = wheel.tick(&self.params, speed);
        }
        Some(pwms)
    }

    pub fn wheel(&self, index: usize) -> &WheelServo {
        &self.wheels[index]
    }

    pub fn pwms(&self) -> [i32; 3] {
        self.wheels.map(|w| w.pwm)
    }
}

impl Default for VelocityServo {
    fn default() -> Self {
        Self::new(ServoParams::default())
    }
}

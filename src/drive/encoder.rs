// Quadrature decoding and windowed speed estimation
//
// The decoder runs in the sampling interrupt and owns the phase/direction state and
// the speed ring buffer. Position, fail counter and speed estimate are atomics shared
// with the main loop, which only ever sees them through `EncoderReadout`.

use std::f32::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::config::{SPEED_DT_MS, SPEED_WINDOW, WHEELS_CPR};

/// Maps the raw AB value (0b00 0b01 0b10 0b11) to a monotonic quadrature state
const PHASES_TO_STATE: [u8; 4] = [0, 1, 3, 2];

/// Ring buffer length: the window plus the current sample
const SPEED_RING: usize = SPEED_WINDOW + 1;

/// One (A, B) sample for a wheel, A in bit 0 and B in bit 1
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSample(u8);

impl PhaseSample {
    pub fn new(a: bool, b: bool) -> Self {
        Self(a as u8 | ((b as u8) << 1))
    }

    pub fn from_raw(raw: u8) -> Self {
        Self(raw & 0b11)
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    /// Quadrature state in 0..=3
    pub fn state(self) -> u8 {
        PHASES_TO_STATE[self.0 as usize]
    }
}

#[derive(Debug, Default)]
struct WheelCounters {
    position: AtomicI32,
    fails: AtomicU32,
    speed: AtomicI32,
}

#[derive(Debug, Default)]
struct Counters {
    wheels: [WheelCounters; 3],
}

/// Creates the interrupt half and the main-loop half of the encoders
pub fn channel() -> (Encoders, EncoderReadout) {
    let counters = Arc::new(Counters::default());
    let encoders = Encoders {
        counters: Arc::clone(&counters),
        phase: [0; 3],
        direction: [0; 3],
        ring: [[0; SPEED_RING]; 3],
        ring_index: 0,
    };
    (encoders, EncoderReadout { counters })
}

/// Interrupt-side encoder state for the three wheels
#[derive(Debug)]
pub struct Encoders {
    counters: Arc<Counters>,
    phase: [u8; 3],
    // Last movement direction, 0 until the first clean step
    direction: [i32; 3],
    ring: [[i32; SPEED_RING]; 3],
    ring_index: usize,
}

impl Encoders {
    /// Decode one phase sample per wheel
    pub fn sample(&mut self, phases: [PhaseSample; 3]) {
        for (k, phase) in phases.into_iter().enumerate() {
            self.update(k, phase.state());
        }
    }

    fn update(&mut self, k: usize, state: u8) {
        if self.phase[k] == state {
            return;
        }

        // Phase diff, -1, 1 or 2 once wrapped
        let diff = match state as i32 - self.phase[k] as i32 {
            -3 => 1,
            3 => -1,
            -2 => 2,
            d => d,
        };

        let wheel = &self.counters.wheels[k];
        match diff {
            1 | -1 => {
                self.direction[k] = diff;
                wheel.position.fetch_add(diff, Ordering::Relaxed);
            }
            _ => {
                // Missed a step, keep going the same way
                wheel.position.fetch_add(self.direction[k], Ordering::Relaxed);
                wheel.fails.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.phase[k] = state;
    }

    /// Push the current positions in the ring buffer and refresh the speed estimates
    pub fn window_tick(&mut self) {
        let current = self.ring_index;
        self.ring_index = (self.ring_index + 1) % SPEED_RING;

        for (k, wheel) in self.counters.wheels.iter().enumerate() {
            let position = wheel.position.load(Ordering::Relaxed);
            self.ring[k][current] = position;
            // The next slot is the oldest one, SPEED_WINDOW ticks ago
            let speed = position.wrapping_sub(self.ring[k][self.ring_index]);
            wheel.speed.store(speed, Ordering::Relaxed);
        }
    }
}

/// Main-loop handle on the encoder counters
#[derive(Debug, Clone)]
pub struct EncoderReadout {
    counters: Arc<Counters>,
}

impl EncoderReadout {
    pub fn position(&self, wheel: usize) -> i32 {
        self.counters.wheels[wheel].position.load(Ordering::Relaxed)
    }

    pub fn positions(&self) -> [i32; 3] {
        [0, 1, 2].map(|k| self.position(k))
    }

    /// Missed steps (double transitions) seen since the last reset
    pub fn fails(&self, wheel: usize) -> u32 {
        self.counters.wheels[wheel].fails.load(Ordering::Relaxed)
    }

    pub fn all_fails(&self) -> [u32; 3] {
        [0, 1, 2].map(|k| self.fails(k))
    }

    /// Speed estimate [raw steps per speed window]
    pub fn speed(&self, wheel: usize) -> i32 {
        self.counters.wheels[wheel].speed.load(Ordering::Relaxed)
    }

    pub fn speeds(&self) -> [i32; 3] {
        [0, 1, 2].map(|k| self.speed(k))
    }

    /// Zero positions and fail counters, the ring buffer alignment is kept
    pub fn reset(&self) {
        for wheel in &self.counters.wheels {
            wheel.position.store(0, Ordering::Relaxed);
            wheel.fails.store(0, Ordering::Relaxed);
        }
    }
}

/// Encoder steps to wheel rotation [rad]
pub fn delta_to_radians(delta: i32) -> f32 {
    delta as f32 * 2.0 * PI / WHEELS_CPR as f32
}

/// Speed estimate [steps per window] to [rad/s]
pub fn raw_speed_to_rad_per_s(raw: f32) -> f32 {
    raw / (SPEED_DT_MS as f32 / 1000.0) / WHEELS_CPR as f32 * (2.0 * PI)
}

/// Wheel speed [rad/s] to [steps per window]
pub fn rad_per_s_to_raw_speed(w: f32) -> f32 {
    w * (SPEED_DT_MS as f32 / 1000.0) * WHEELS_CPR as f32 / (2.0 * PI)
}

// Omniwheel kinematics for a three-wheel holonomic base
// Forward: wheel rotations -> chassis motion. Inverse: chassis velocity -> wheel speeds.
//
// Each wheel i satisfies  r * w_i = v_ix * dx + v_iy * dy + R * turn
// where (v_ix, v_iy) is the wheel drive vector, r the wheel radius and R the robot radius.

use std::f32::consts::PI;
use std::ops::{Add, AddAssign, Mul};

use serde::{Deserialize, Serialize};

use crate::config::{ROBOT_RADIUS, WHEEL_ALPHAS_DEG, WHEEL_RADIUS};

/// Below this the drive points are considered collinear
const MIN_DETERMINANT: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KinematicsError {
    #[error("Degenerate wheel geometry: drive vectors are collinear (det = {determinant})")]
    DegenerateGeometry { determinant: f32 },

    #[error("Invalid {name} radius: {value}")]
    InvalidRadius { name: &'static str, value: f32 },
}

/// Chassis velocity (or displacement) in the robot frame
///
/// Units depend on the caller: orders are in mm/s and deg/s, kinematics works in
/// mm/s and rad/s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisVelocity {
    pub dx: f32,
    pub dy: f32,
    pub turn: f32,
}

impl ChassisVelocity {
    pub fn new(dx: f32, dy: f32, turn: f32) -> Self {
        Self { dx, dy, turn }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Norm of the translation part
    pub fn linear_speed(&self) -> f32 {
        self.dx.hypot(self.dy)
    }
}

impl Add for ChassisVelocity {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.dx + other.dx, self.dy + other.dy, self.turn + other.turn)
    }
}

impl AddAssign for ChassisVelocity {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Mul<f32> for ChassisVelocity {
    type Output = Self;

    fn mul(self, ratio: f32) -> Self {
        Self::new(self.dx * ratio, self.dy * ratio, self.turn * ratio)
    }
}

/// Mounting of one wheel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelGeometry {
    pub alpha_deg: f32,
    /// Unit vector of the direction the wheel pushes the chassis
    pub drive: [f32; 2],
}

impl WheelGeometry {
    pub fn new(alpha_deg: f32) -> Self {
        let alpha = alpha_deg * (PI / 180.0);
        Self {
            alpha_deg,
            drive: [-alpha.sin(), alpha.cos()],
        }
    }
}

fn det3(m: [[f32; 3]; 3]) -> f32 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Immutable kinematic model of the base
#[derive(Debug, Clone, PartialEq)]
pub struct Kinematics {
    wheels: [WheelGeometry; 3],
    wheel_radius: f32,
    robot_radius: f32,
    // Rows [v_x, v_y, R], one per wheel
    matrix: [[f32; 3]; 3],
    determinant: f32,
}

impl Kinematics {
    pub fn new(
        wheels: [WheelGeometry; 3],
        wheel_radius: f32,
        robot_radius: f32,
    ) -> Result<Self, KinematicsError> {
        if !(wheel_radius > 0.0) {
            return Err(KinematicsError::InvalidRadius {
                name: "wheel",
                value: wheel_radius,
            });
        }
        if !(robot_radius > 0.0) {
            return Err(KinematicsError::InvalidRadius {
                name: "robot",
                value: robot_radius,
            });
        }

        let matrix = wheels.map(|w| [w.drive[0], w.drive[1], robot_radius]);
        let determinant = det3(matrix);
        // det = R * det([v_x, v_y, 1]), normalise by R before comparing
        if (determinant / robot_radius).abs() < MIN_DETERMINANT {
            return Err(KinematicsError::DegenerateGeometry { determinant });
        }

        Ok(Self {
            wheels,
            wheel_radius,
            robot_radius,
            matrix,
            determinant,
        })
    }

    /// Build from mounting angles [deg]
    pub fn from_alphas(
        alphas_deg: [f32; 3],
        wheel_radius: f32,
        robot_radius: f32,
    ) -> Result<Self, KinematicsError> {
        Self::new(alphas_deg.map(WheelGeometry::new), wheel_radius, robot_radius)
    }

    pub fn robot_radius(&self) -> f32 {
        self.robot_radius
    }

    /// Wheel rotations [rad] (or speeds [rad/s]) to chassis motion [mm, mm, rad]
    ///
    /// Solved with Cramer's rule, no symmetry of the wheel spacing is assumed.
    pub fn forward(&self, wheels: [f32; 3]) -> ChassisVelocity {
        let b = wheels.map(|w| w * self.wheel_radius);

        let mut solution = [0.0f32; 3];
        for (col, value) in solution.iter_mut().enumerate() {
            let mut m = self.matrix;
            for (row, rhs) in b.iter().enumerate() {
                m[row][col] = *rhs;
            }
            *value = det3(m) / self.determinant;
        }

        ChassisVelocity::new(solution[0], solution[1], solution[2])
    }

    /// Chassis velocity [mm/s, mm/s, rad/s] to wheel speeds [rad/s]
    pub fn inverse(&self, chassis: ChassisVelocity) -> [f32; 3] {
        self.matrix.map(|[vx, vy, r]| {
            (vx * chassis.dx + vy * chassis.dy + r * chassis.turn) / self.wheel_radius
        })
    }
}

impl Default for Kinematics {
    fn default() -> Self {
        match Self::from_alphas(WHEEL_ALPHAS_DEG, WHEEL_RADIUS, ROBOT_RADIUS) {
            Ok(kinematics) => kinematics,
            Err(e) => panic!("built-in wheel geometry is invalid: {e}"),
        }
    }
}

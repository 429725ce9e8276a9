// Dead-reckoning odometry and goal-seeking controller
//
// Positions are in mm in a `world` frame fixed at the last reset, headings in rad.
// Kinematics provides the translation, the heading comes from the fused yaw.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::config::{GoalParams, REACHED_ANGLE, REACHED_DISTANCE};
use crate::drive::{ChassisVelocity, Kinematics, encoder};
use crate::motion::MotionOrders;

/// Wrap an angle to (-pi, pi]
pub fn normalize_angle(mut angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    angle %= 2.0 * PI;
    if angle <= -PI {
        angle += 2.0 * PI;
    } else if angle > PI {
        angle -= 2.0 * PI;
    }
    angle
}

/// Bound `value` to [-|max|, |max|]
fn limit(value: f32, max: f32) -> f32 {
    let max = max.abs();
    if value > max {
        max
    } else if value < -max {
        -max
    } else {
        value
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub theta: f32,
}

impl Pose {
    pub fn new(x: f32, y: f32, theta: f32) -> Self {
        Self {
            x,
            y,
            theta: normalize_angle(theta),
        }
    }

    /// Vector expressed in this pose's frame, rotated into the world frame
    pub fn local_to_world(&self, x: f32, y: f32) -> (f32, f32) {
        let (sin, cos) = self.theta.sin_cos();
        (cos * x - sin * y, sin * x + cos * y)
    }

    /// World vector rotated into this pose's frame
    pub fn world_to_local(&self, x: f32, y: f32) -> (f32, f32) {
        let (sin, cos) = self.theta.sin_cos();
        (cos * x + sin * y, -sin * x + cos * y)
    }
}

/// Robot pose estimate
#[derive(Debug, Clone)]
pub struct Odometry {
    pose: Pose,
    last_positions: [i32; 3],
    // Rotation seen by the wheels on the last update, informative only
    kinematic_turn: f32,
}

impl Odometry {
    pub fn new(positions: [i32; 3]) -> Self {
        Self {
            pose: Pose::default(),
            last_positions: positions,
            kinematic_turn: 0.0,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    pub fn kinematic_turn(&self) -> f32 {
        self.kinematic_turn
    }

    /// Zero the pose
    pub fn reset(&mut self) {
        self.pose = Pose::default();
        self.kinematic_turn = 0.0;
    }

    /// Re-anchor the encoder reference, after the counters were reset
    pub fn rebase(&mut self, positions: [i32; 3]) {
        self.last_positions = positions;
    }

    /// Integrate the wheel motion since the previous call
    ///
    /// The displacement is rotated with the heading stored before this update, then the
    /// heading is replaced by the fused one.
    pub fn update(&mut self, kinematics: &Kinematics, positions: [i32; 3], heading: f32) {
        let mut deltas = [0.0f32; 3];
        for (k, delta) in deltas.iter_mut().enumerate() {
            *delta = encoder::delta_to_radians(positions[k].wrapping_sub(self.last_positions[k]));
        }
        self.last_positions = positions;

        let ChassisVelocity { dx, dy, turn } = kinematics.forward(deltas);
        self.kinematic_turn = turn;

        let (wx, wy) = self.pose.local_to_world(dx, dy);
        self.pose.x += wx;
        self.pose.y += wy;
        self.pose.theta = normalize_angle(heading);
    }
}

/// Speed limits of a goal request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalLimits {
    /// [mm/s]
    pub max_speed: f32,
    /// [deg/s]
    pub max_turn: f32,
}

/// Proportional controller driving the robot pose to the goal
#[derive(Debug, Clone)]
pub struct GoalController {
    goal: Pose,
    enabled: bool,
    max_speed: f32,
    max_turn: f32,
    kp: f32,
    turn_kp: f32,
}

impl GoalController {
    pub fn new(params: GoalParams) -> Self {
        Self {
            goal: Pose::default(),
            enabled: false,
            max_speed: params.max_speed,
            max_turn: params.max_turn,
            kp: params.kp,
            turn_kp: params.turn_kp,
        }
    }

    pub fn goal(&self) -> Pose {
        self.goal
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn limits(&self) -> GoalLimits {
        GoalLimits {
            max_speed: self.max_speed,
            max_turn: self.max_turn,
        }
    }

    /// Disable and zero the goal
    pub fn reset(&mut self) {
        self.enabled = false;
        self.goal = Pose::default();
    }

    /// Move by an offset expressed in the current goal frame (turn in rad)
    pub fn move_by(&mut self, offset: ChassisVelocity, limits: GoalLimits) {
        let (wx, wy) = self.goal.local_to_world(offset.dx, offset.dy);
        self.goal.x += wx;
        self.goal.y += wy;
        self.goal.theta = normalize_angle(self.goal.theta + offset.turn);
        self.start(limits);
    }

    /// Move to an absolute world pose
    pub fn move_to(&mut self, goal: Pose, limits: GoalLimits) {
        self.goal = Pose::new(goal.x, goal.y, goal.theta);
        self.start(limits);
    }

    fn start(&mut self, limits: GoalLimits) {
        // Limits are magnitudes, whatever sign the caller gave them
        self.max_speed = limits.max_speed.abs();
        self.max_turn = limits.max_turn.abs();
        self.enabled = true;
    }

    /// Put the goal where the robot is, so relative moves start from there
    pub fn set_goal_to_pose(&mut self, pose: Pose) {
        self.goal = pose;
    }

    /// Stop seeking and zero the joystick order
    pub fn stop(&mut self, orders: &mut MotionOrders) {
        orders.set_joystick_order(ChassisVelocity::zero());
        self.enabled = false;
    }

    /// True when the robot is within the position and heading thresholds
    pub fn reached(&self, robot: &Pose) -> bool {
        let distance = (self.goal.x - robot.x).hypot(self.goal.y - robot.y);
        let angle = normalize_angle(self.goal.theta - robot.theta);
        distance < REACHED_DISTANCE && angle.abs() < REACHED_ANGLE
    }

    /// Chassis order [mm/s, mm/s, deg/s] towards the goal, in the robot frame
    pub fn command(&self, robot: &Pose) -> ChassisVelocity {
        let (x, y) = robot.world_to_local(self.goal.x - robot.x, self.goal.y - robot.y);
        let turn_error = normalize_angle(self.goal.theta - robot.theta);

        let mut x_err = x * self.kp;
        let mut y_err = y * self.kp;
        let norm = x_err.hypot(y_err);
        if norm > self.max_speed {
            x_err *= self.max_speed / norm;
            y_err *= self.max_speed / norm;
        }

        // The gain is applied a second time to shape the approach
        let dx = limit(x_err * self.kp, self.max_speed);
        let dy = limit(y_err * self.kp, self.max_speed);
        let turn = limit(turn_error * self.turn_kp, self.max_turn);

        ChassisVelocity::new(dx, dy, turn)
    }

    /// Push the goal order into the joystick slot while enabled
    pub fn tick(&mut self, robot: &Pose, orders: &mut MotionOrders) {
        if self.enabled {
            orders.set_joystick_order(self.command(robot));
        }
    }
}

impl Default for GoalController {
    fn default() -> Self {
        Self::new(GoalParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WHEELS_CPR;
    use std::f32::consts::FRAC_PI_2;

    fn limits() -> GoalLimits {
        GoalLimits {
            max_speed: 200.0,
            max_turn: 100.0,
        }
    }

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(3.0 * PI).abs() - PI).abs() < 1e-5);
        assert!((normalize_angle(-PI) - PI).abs() < 1e-5);
        assert!((normalize_angle(-3.0 * FRAC_PI_2) - FRAC_PI_2).abs() < 1e-5);
        assert_eq!(normalize_angle(0.5), 0.5);
        assert_eq!(normalize_angle(f32::NAN), 0.0);
    }

    #[test]
    fn test_odometry_straight_line() {
        let kinematics = Kinematics::default();
        let mut odometry = Odometry::new([0; 3]);

        // Wheel rotations for 100 mm forward
        let wheels = kinematics.inverse(ChassisVelocity::new(100.0, 0.0, 0.0));
        let counts = wheels.map(|w| (w * WHEELS_CPR as f32 / (2.0 * PI)).round() as i32);
        odometry.update(&kinematics, counts, 0.0);

        let pose = odometry.pose();
        assert!((pose.x - 100.0).abs() < 0.1, "x = {}", pose.x);
        assert!(pose.y.abs() < 0.1, "y = {}", pose.y);
    }

    #[test]
    fn test_odometry_uses_previous_heading() {
        let kinematics = Kinematics::default();
        let mut odometry = Odometry::new([0; 3]);
        odometry.set_pose(Pose::new(0.0, 0.0, FRAC_PI_2));

        let wheels = kinematics.inverse(ChassisVelocity::new(50.0, 0.0, 0.0));
        let counts = wheels.map(|w| (w * WHEELS_CPR as f32 / (2.0 * PI)).round() as i32);
        // The fused heading changes during this update, the motion is rotated by pi/2
        odometry.update(&kinematics, counts, 0.0);

        let pose = odometry.pose();
        assert!(pose.x.abs() < 0.1, "x = {}", pose.x);
        assert!((pose.y - 50.0).abs() < 0.1, "y = {}", pose.y);
        assert_eq!(pose.theta, 0.0);
    }

    #[test]
    fn test_heading_comes_from_fused_yaw() {
        let kinematics = Kinematics::default();
        let mut odometry = Odometry::new([0; 3]);
        let wheels = kinematics.inverse(ChassisVelocity::new(0.0, 0.0, 1.0));
        let counts = wheels.map(|w| (w * WHEELS_CPR as f32 / (2.0 * PI)).round() as i32);
        odometry.update(&kinematics, counts, 0.25);

        assert!((odometry.kinematic_turn() - 1.0).abs() < 1e-2);
        assert_eq!(odometry.pose().theta, 0.25);
    }

    #[test]
    fn test_command_clamped_and_in_robot_frame() {
        let mut controller = GoalController::default();
        controller.move_to(Pose::new(1000.0, 0.0, 0.0), limits());

        let command = controller.command(&Pose::default());
        assert_eq!(command, ChassisVelocity::new(200.0, 0.0, 0.0));

        // Facing +y the goal is on the right side
        let command = controller.command(&Pose::new(0.0, 0.0, FRAC_PI_2));
        assert!(command.dx.abs() < 1e-3);
        assert!((command.dy + 200.0).abs() < 1e-3);
        assert_eq!(command.turn, -100.0);
    }

    #[test]
    fn test_command_gain_applied_twice() {
        let mut controller = GoalController::default();
        controller.move_to(Pose::new(10.0, 0.0, 0.0), limits());
        let command = controller.command(&Pose::default());
        assert!((command.dx - 10.0 * 1.5 * 1.5).abs() < 1e-4);
    }

    #[test]
    fn test_negative_limits_used_as_magnitudes() {
        let mut controller = GoalController::default();
        let reversed = GoalLimits {
            max_speed: -100.0,
            max_turn: -10.0,
        };
        controller.move_to(Pose::new(500.0, 0.0, 1.0), reversed);
        assert_eq!(
            controller.limits(),
            GoalLimits {
                max_speed: 100.0,
                max_turn: 10.0,
            }
        );

        let command = controller.command(&Pose::default());
        assert!((command.dx - 100.0).abs() < 1e-3);
        assert_eq!(command.turn, 10.0);
    }

    #[test]
    fn test_limit_bounds_both_ways() {
        assert_eq!(limit(12.0, 5.0), 5.0);
        assert_eq!(limit(-12.0, 5.0), -5.0);
        assert_eq!(limit(3.0, -5.0), 3.0);
        assert_eq!(limit(-12.0, -5.0), -5.0);
    }

    #[test]
    fn test_turn_error_wrapped() {
        let mut controller = GoalController::default();
        controller.move_to(Pose::new(0.0, 0.0, 3.0), limits());
        // Shortest way from -3 rad to 3 rad is clockwise
        let command = controller.command(&Pose::new(0.0, 0.0, -3.0));
        assert!(command.turn < 0.0);
    }

    #[test]
    fn test_move_by_accumulates_in_goal_frame() {
        let mut controller = GoalController::default();
        controller.move_by(ChassisVelocity::new(100.0, 0.0, FRAC_PI_2), limits());
        controller.move_by(ChassisVelocity::new(100.0, 0.0, 0.0), limits());

        let goal = controller.goal();
        assert!((goal.x - 100.0).abs() < 1e-3);
        assert!((goal.y - 100.0).abs() < 1e-3);
        assert!((goal.theta - FRAC_PI_2).abs() < 1e-5);
        assert!(controller.is_enabled());
        assert_eq!(controller.limits(), limits());
    }

    #[test]
    fn test_reached_thresholds() {
        let mut controller = GoalController::default();
        controller.move_to(Pose::new(100.0, 0.0, 0.0), limits());
        assert!(!controller.reached(&Pose::default()));
        assert!(controller.reached(&Pose::new(97.0, 2.0, 0.05)));
        assert!(!controller.reached(&Pose::new(100.0, 0.0, 0.2)));
    }

    #[test]
    fn test_stop_zeroes_joystick() {
        let mut controller = GoalController::default();
        let mut orders = MotionOrders::new();
        controller.move_to(Pose::new(500.0, 0.0, 0.0), limits());
        controller.tick(&Pose::default(), &mut orders);
        assert!(orders.aggregate().dx > 0.0);

        controller.stop(&mut orders);
        assert!(!controller.is_enabled());
        controller.tick(&Pose::default(), &mut orders);
        assert_eq!(orders.aggregate(), ChassisVelocity::zero());
    }
}

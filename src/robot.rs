// Robot context: encoders, servo, orders, odometry and goal controller wired together
//
// `servo_tick` runs once per servo period, `control_tick` once per control period.
// Both are bounded computations that never block.

use tracing::{debug, info, warn};

use crate::config::{PWM_MAX, Tuning};
use crate::drive::{ChassisVelocity, EncoderReadout, Kinematics, VelocityServo, encoder};
use crate::messages::Telemetry;
use crate::motion::MotionOrders;
use crate::odometry::{GoalController, GoalLimits, Odometry, Pose, normalize_angle};

/// Scale an order [mm/s, mm/s, deg/s] so that the fastest wheel contact point stays
/// under `max_speed`
pub fn limit_speed(order: ChassisVelocity, max_speed: f32, robot_radius: f32) -> ChassisVelocity {
    let rotation_speed = order.turn.to_radians().abs() * robot_radius;
    let desired = order.linear_speed() + rotation_speed;
    if desired > max_speed {
        order * (max_speed / desired)
    } else {
        order
    }
}

pub struct Robot {
    kinematics: Kinematics,
    encoders: EncoderReadout,
    servo: VelocityServo,
    orders: MotionOrders,
    odometry: Odometry,
    goal: GoalController,
    max_speed: f32,
    // Stop the goal controller once the goal is reached
    auto_stop: bool,
    // False once a non-zero manual order moved the robot away from the goal
    goal_anchored: bool,
    // Raw fused yaw and the value it had at the last odometry reset
    last_yaw: f32,
    yaw_reference: f32,
    order: ChassisVelocity,
    wheel_command: [f32; 3],
}

impl Robot {
    pub fn new(tuning: Tuning, kinematics: Kinematics, encoders: EncoderReadout) -> Self {
        let odometry = Odometry::new(encoders.positions());
        Self {
            kinematics,
            encoders,
            servo: VelocityServo::new(tuning.servo),
            orders: MotionOrders::new(),
            odometry,
            goal: GoalController::new(tuning.goal),
            max_speed: tuning.max_speed,
            auto_stop: true,
            goal_anchored: true,
            last_yaw: 0.0,
            yaw_reference: 0.0,
            order: ChassisVelocity::zero(),
            wheel_command: [0.0; 3],
        }
    }

    /// One servo period, returns the PWMs for the sink unless the servo is disabled
    pub fn servo_tick(&mut self) -> Option<[i32; 3]> {
        self.servo.tick(self.encoders.speeds())
    }

    /// One control period
    ///
    /// Updates the pose from the wheels and the fused yaw [rad], runs the goal
    /// controller, aggregates every order and sets the wheel speed targets.
    pub fn control_tick(&mut self, fused_yaw: f32) {
        self.last_yaw = fused_yaw;
        let heading = normalize_angle(fused_yaw - self.yaw_reference);
        self.odometry.update(&self.kinematics, self.encoders.positions(), heading);

        let pose = self.odometry.pose();
        if self.goal.is_enabled() {
            if self.auto_stop && self.goal.reached(&pose) {
                info!(
                    "Goal reached at x={:.1} y={:.1} theta={:.3}",
                    pose.x, pose.y, pose.theta
                );
                self.goal.stop(&mut self.orders);
            } else {
                self.goal.tick(&pose, &mut self.orders);
            }
        }

        let order = limit_speed(
            self.orders.aggregate(),
            self.max_speed,
            self.kinematics.robot_radius(),
        );
        self.order = order;

        self.wheel_command = self.kinematics.inverse(ChassisVelocity::new(
            order.dx,
            order.dy,
            order.turn.to_radians(),
        ));
        self.servo.set_targets(self.wheel_command.map(encoder::rad_per_s_to_raw_speed));
    }

    pub fn set_joystick_order(&mut self, velocity: ChassisVelocity) {
        self.unanchor(velocity);
        self.orders.set_joystick_order(velocity);
    }

    pub fn set_api_order(&mut self, velocity: ChassisVelocity) {
        self.unanchor(velocity);
        self.orders.set_api_order(velocity);
    }

    pub fn set_program_order(&mut self, program: u32, now_ms: u32, velocity: ChassisVelocity) {
        self.unanchor(velocity);
        self.orders.set_program_order(program, now_ms, velocity);
    }

    fn unanchor(&mut self, velocity: ChassisVelocity) {
        if velocity != ChassisVelocity::zero() {
            self.goal_anchored = false;
        }
    }

    /// Move by an offset [mm, mm, rad] relative to the current goal
    pub fn control(&mut self, offset: ChassisVelocity, limits: GoalLimits) {
        if !self.goal_anchored {
            // Manual motion happened, start from where the robot actually is
            self.goal.set_goal_to_pose(self.odometry.pose());
            self.goal_anchored = true;
        }
        self.goal.move_by(offset, limits);
        let goal = self.goal.goal();
        info!(
            "New relative goal: x={:.1} y={:.1} theta={:.3}",
            goal.x, goal.y, goal.theta
        );
    }

    /// Move to an absolute pose in the odometry frame
    pub fn goto(&mut self, pose: Pose, limits: GoalLimits) {
        self.goal_anchored = true;
        self.goal.move_to(pose, limits);
        info!(
            "New goal: x={:.1} y={:.1} theta={:.3}",
            pose.x, pose.y, pose.theta
        );
    }

    pub fn stop_goal(&mut self) {
        debug!("Goal controller stopped");
        self.goal.stop(&mut self.orders);
    }

    /// Disable every order, stop seeking and zero the wheel targets
    pub fn emergency_stop(&mut self) {
        warn!("Emergency stop");
        self.goal.stop(&mut self.orders);
        self.orders.emergency_stop();
        self.servo.stop();
        self.order = ChassisVelocity::zero();
        self.wheel_command = [0.0; 3];
    }

    /// Zero robot and goal poses, the current yaw becomes the heading reference
    pub fn reset_odometry(&mut self) {
        info!("Odometry reset");
        self.goal.stop(&mut self.orders);
        self.goal.reset();
        self.odometry.reset();
        self.yaw_reference = self.last_yaw;
        self.goal_anchored = true;
    }

    pub fn reset_encoders(&mut self) {
        info!("Encoders reset");
        self.encoders.reset();
        self.odometry.rebase(self.encoders.positions());
    }

    pub fn set_pose(&mut self, pose: Pose) {
        self.odometry.set_pose(pose);
        self.yaw_reference = normalize_angle(self.last_yaw - pose.theta);
    }

    /// Disable the servo and return the clamped PWMs to apply
    pub fn manual_pwm(&mut self, pwm: [i32; 3]) -> [i32; 3] {
        if self.servo.is_enabled() {
            info!("Servo disabled for manual PWM");
        }
        self.servo.set_enabled(false);
        pwm.map(|p| p.clamp(-PWM_MAX, PWM_MAX))
    }

    pub fn set_auto_stop(&mut self, auto_stop: bool) {
        self.auto_stop = auto_stop;
    }

    pub fn pose(&self) -> Pose {
        self.odometry.pose()
    }

    pub fn goal(&self) -> &GoalController {
        &self.goal
    }

    pub fn reached(&self) -> bool {
        self.goal.reached(&self.odometry.pose())
    }

    pub fn orders_mut(&mut self) -> &mut MotionOrders {
        &mut self.orders
    }

    pub fn servo(&self) -> &VelocityServo {
        &self.servo
    }

    pub fn servo_mut(&mut self) -> &mut VelocityServo {
        &mut self.servo
    }

    /// Last aggregated order after speed limiting [mm/s, mm/s, deg/s]
    pub fn order(&self) -> ChassisVelocity {
        self.order
    }

    /// Last wheel speeds requested from inverse kinematics [rad/s]
    pub fn wheel_command(&self) -> [f32; 3] {
        self.wheel_command
    }

    pub fn telemetry(&self, timestamp: u32) -> Telemetry {
        let pose = self.odometry.pose();
        Telemetry {
            timestamp,
            pose,
            goal: self.goal.goal(),
            goal_enabled: self.goal.is_enabled(),
            goal_reached: self.goal.reached(&pose),
            order: self.order,
            wheel_speeds: self
                .encoders
                .speeds()
                .map(|s| encoder::raw_speed_to_rad_per_s(s as f32)),
            wheel_targets: self.servo.targets().map(encoder::raw_speed_to_rad_per_s),
            encoders: self.encoders.positions(),
            encoder_fails: self.encoders.all_fails(),
            pwm: self.servo.pwms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ROBOT_RADIUS, SERVO_DT_MS};
    use crate::drive::PwmSink;
    use crate::sim::SimulatedBase;

    const DT: f32 = SERVO_DT_MS as f32 / 1000.0;

    fn setup() -> (Robot, SimulatedBase) {
        let (encoders, readout) = encoder::channel();
        let kinematics = Kinematics::default();
        let base = SimulatedBase::new(kinematics.clone(), encoders, &Tuning::default().servo);
        let robot = Robot::new(Tuning::default(), kinematics, readout);
        (robot, base)
    }

    fn generous() -> GoalLimits {
        GoalLimits {
            max_speed: 200.0,
            max_turn: 100.0,
        }
    }

    #[test]
    fn test_limit_speed() {
        let order = ChassisVelocity::new(300.0, 400.0, 0.0);
        let limited = limit_speed(order, 250.0, ROBOT_RADIUS);
        assert!((limited.linear_speed() - 250.0).abs() < 1e-3);

        let slow = ChassisVelocity::new(10.0, 0.0, -5.0);
        assert_eq!(limit_speed(slow, 250.0, ROBOT_RADIUS), slow);

        // Turning in either direction counts against the limit
        let spin = ChassisVelocity::new(0.0, 0.0, -720.0);
        let limited = limit_speed(spin, 250.0, ROBOT_RADIUS);
        assert!((limited.turn.to_radians().abs() * ROBOT_RADIUS - 250.0).abs() < 1e-2);
    }

    #[test]
    fn test_goal_reached_with_ideal_drive() {
        let (mut robot, mut base) = setup();
        robot.set_auto_stop(false);
        robot.goto(Pose::new(1000.0, 0.0, 0.0), generous());

        let mut ticks = 0;
        while !robot.reached() {
            assert!(ticks < 3000, "goal not reached, pose {:?}", robot.pose());
            robot.control_tick(base.yaw());
            base.drive_ideal(robot.wheel_command(), DT);
            ticks += 1;
        }
        println!("Reached after {} ticks: {:?}", ticks, robot.pose());
        assert!((base.pose().x - 1000.0).abs() < 10.0);

        robot.stop_goal();
        for _ in 0..10 {
            robot.control_tick(base.yaw());
            assert_eq!(robot.order(), ChassisVelocity::zero());
            assert_eq!(robot.orders_mut().aggregate(), ChassisVelocity::zero());
        }
    }

    #[test]
    fn test_relative_moves_with_auto_stop() {
        let (mut robot, mut base) = setup();
        robot.control(ChassisVelocity::new(0.0, 300.0, 0.0), generous());

        for _ in 0..3000 {
            robot.control_tick(base.yaw());
            base.drive_ideal(robot.wheel_command(), DT);
            if !robot.goal().is_enabled() {
                break;
            }
        }
        assert!(!robot.goal().is_enabled(), "goal controller still running");
        let pose = robot.pose();
        assert!((pose.y - 300.0).abs() < 5.0, "pose {:?}", pose);
        assert!(pose.x.abs() < 5.0, "pose {:?}", pose);
    }

    #[test]
    fn test_goal_turns_in_place() {
        let (mut robot, mut base) = setup();
        robot.set_auto_stop(false);
        robot.goto(Pose::new(0.0, 0.0, 1.0), generous());

        let mut ticks = 0;
        while !robot.reached() {
            assert!(ticks < 3000, "goal not reached, pose {:?}", robot.pose());
            robot.control_tick(base.yaw());
            base.drive_ideal(robot.wheel_command(), DT);
            ticks += 1;
        }
        assert!((robot.pose().theta - 1.0).abs() < 0.12);
    }

    #[test]
    fn test_servo_drives_simulated_base_forward() {
        let (mut robot, mut base) = setup();
        robot.set_api_order(ChassisVelocity::new(100.0, 0.0, 0.0));

        for _ in 0..200 {
            base.step(DT);
            base.window_tick();
            if let Some(pwm) = robot.servo_tick() {
                base.write_pwm(pwm);
            }
            robot.control_tick(base.yaw());
        }

        let pose = base.pose();
        println!("Simulated pose after 2s: {:?}", pose);
        assert!(pose.x > 50.0, "pose {:?}", pose);
        assert!(pose.y.abs() < 0.5 * pose.x, "pose {:?}", pose);
        assert!(robot.pose().x > 50.0);
    }

    #[test]
    fn test_emergency_stop_zeroes_everything() {
        let (mut robot, mut base) = setup();
        robot.set_api_order(ChassisVelocity::new(100.0, 0.0, 0.0));
        robot.goto(Pose::new(500.0, 0.0, 0.0), generous());
        robot.control_tick(base.yaw());
        assert!(robot.servo().targets().iter().any(|t| *t != 0.0));

        robot.emergency_stop();
        assert!(!robot.goal().is_enabled());
        assert_eq!(robot.servo().targets(), [0.0; 3]);

        robot.control_tick(base.yaw());
        base.drive_ideal(robot.wheel_command(), DT);
        assert_eq!(robot.order(), ChassisVelocity::zero());
        assert_eq!(robot.servo_tick(), Some([0, 0, 0]));
    }

    #[test]
    fn test_reset_odometry_uses_current_yaw_as_reference() {
        let (mut robot, _base) = setup();
        robot.control_tick(0.7);
        assert!((robot.pose().theta - 0.7).abs() < 1e-6);

        robot.reset_odometry();
        robot.control_tick(0.7);
        assert_eq!(robot.pose(), Pose::default());

        robot.control_tick(0.9);
        assert!((robot.pose().theta - 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_relative_move_after_manual_motion_starts_from_pose() {
        let (mut robot, mut base) = setup();
        robot.set_joystick_order(ChassisVelocity::new(100.0, 0.0, 0.0));
        for _ in 0..100 {
            robot.control_tick(base.yaw());
            base.drive_ideal(robot.wheel_command(), DT);
        }
        robot.set_joystick_order(ChassisVelocity::zero());
        robot.control_tick(base.yaw());
        let pose = robot.pose();
        assert!(pose.x > 90.0, "pose {:?}", pose);

        robot.control(ChassisVelocity::new(0.0, 100.0, 0.0), generous());
        let goal = robot.goal().goal();
        assert!((goal.x - pose.x).abs() < 1e-2, "goal {:?}", goal);
        assert!((goal.y - (pose.y + 100.0)).abs() < 1e-2, "goal {:?}", goal);

        // No manual motion in between: the next move stacks on the goal
        robot.control(ChassisVelocity::new(0.0, 100.0, 0.0), generous());
        let stacked = robot.goal().goal();
        assert!((stacked.y - (goal.y + 100.0)).abs() < 1e-2, "goal {:?}", stacked);
    }

    #[test]
    fn test_reset_encoders_keeps_pose() {
        let (mut robot, mut base) = setup();
        robot.set_joystick_order(ChassisVelocity::new(0.0, 80.0, 0.0));
        for _ in 0..50 {
            robot.control_tick(base.yaw());
            base.drive_ideal(robot.wheel_command(), DT);
        }
        robot.set_joystick_order(ChassisVelocity::zero());
        robot.control_tick(base.yaw());
        let before = robot.pose();
        assert!(before.y > 30.0, "pose {:?}", before);

        robot.reset_encoders();
        robot.control_tick(base.yaw());
        assert_eq!(robot.telemetry(0).encoders, [0, 0, 0]);
        assert_eq!(robot.pose(), before);
    }

    #[test]
    fn test_set_pose_sets_reported_heading() {
        let (mut robot, _base) = setup();
        robot.control_tick(0.4);

        robot.set_pose(Pose::new(10.0, 20.0, 1.0));
        robot.control_tick(0.4);
        let pose = robot.pose();
        assert_eq!((pose.x, pose.y), (10.0, 20.0));
        assert!((pose.theta - 1.0).abs() < 1e-5, "pose {:?}", pose);

        robot.control_tick(0.5);
        assert!((robot.pose().theta - 1.1).abs() < 1e-5);
    }

    #[test]
    fn test_manual_pwm_disables_servo() {
        let (mut robot, _base) = setup();
        let pwm = robot.manual_pwm([5000, -100, 0]);
        assert_eq!(pwm, [PWM_MAX, -100, 0]);
        assert!(!robot.servo().is_enabled());
        assert_eq!(robot.servo_tick(), None);
    }

    #[test]
    fn test_telemetry_snapshot() {
        let (mut robot, mut base) = setup();
        robot.set_joystick_order(ChassisVelocity::new(0.0, 0.0, 90.0));
        for _ in 0..20 {
            robot.control_tick(base.yaw());
            base.drive_ideal(robot.wheel_command(), DT);
            base.window_tick();
        }
        let telemetry = robot.telemetry(1234);
        assert_eq!(telemetry.timestamp, 1234);
        assert_eq!(telemetry.order, ChassisVelocity::new(0.0, 0.0, 90.0));
        assert!(telemetry.encoders.iter().all(|p| *p > 0));
        assert!(telemetry.wheel_speeds.iter().all(|s| *s > 0.0));
        assert_eq!(telemetry.encoder_fails, [0, 0, 0]);
    }
}

// Keyboard teleop over the API order slot
//
// WASD translate, Z/X rotate, R/F change speed level, G square step (relative goal),
// O reset odometry, Space emergency stop, Q/Esc quit.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use holo_zenoh_runtime::config::TOPIC_CMD;
use holo_zenoh_runtime::drive::ChassisVelocity;
use holo_zenoh_runtime::messages::Command;
use std::time::{Duration, Instant};
use tracing::info;

// Speed levels: linear [mm/s] and turn [deg/s]
const LEVELS: [(&str, f32, f32); 3] = [
    ("LOW", 50.0, 30.0),
    ("MED", 150.0, 90.0),
    ("HIGH", 250.0, 180.0),
];

// An axis falls back to zero when its key is not repeated within this delay
const HOLD_TIMEOUT: Duration = Duration::from_millis(100);

// Refresh period of the API order, well under the runtime watchdog
const PUBLISH_PERIOD: Duration = Duration::from_millis(20);

// G key: one side of a square [mm], then a quarter turn [deg]
const SQUARE_SIDE: f32 = 300.0;
const SQUARE_TURN: f32 = 90.0;

/// Chassis axis driven by a key
#[derive(Clone, Copy)]
enum Axis {
    Forward,
    Left,
    Turn,
}

/// Axis and direction of a movement key
fn movement(code: KeyCode) -> Option<(Axis, f32)> {
    match code {
        KeyCode::Char('w') => Some((Axis::Forward, 1.0)),
        KeyCode::Char('s') => Some((Axis::Forward, -1.0)),
        KeyCode::Char('a') => Some((Axis::Left, 1.0)),
        KeyCode::Char('d') => Some((Axis::Left, -1.0)),
        KeyCode::Char('z') => Some((Axis::Turn, 1.0)),
        KeyCode::Char('x') => Some((Axis::Turn, -1.0)),
        _ => None,
    }
}

/// Held direction of each axis with the time it was last refreshed
#[derive(Default)]
struct HeldAxes {
    axes: [Option<(f32, Instant)>; 3],
}

impl HeldAxes {
    fn press(&mut self, axis: Axis, direction: f32) {
        self.axes[axis as usize] = Some((direction, Instant::now()));
    }

    fn expire(&mut self) {
        for axis in &mut self.axes {
            if matches!(axis, Some((_, at)) if at.elapsed() > HOLD_TIMEOUT) {
                *axis = None;
            }
        }
    }

    fn order(&self, level: usize) -> ChassisVelocity {
        let (_, speed, turn_speed) = LEVELS[level];
        let direction = |axis: Axis| self.axes[axis as usize].map_or(0.0, |(d, _)| d);
        ChassisVelocity::new(
            direction(Axis::Forward) * speed,
            direction(Axis::Left) * speed,
            direction(Axis::Turn) * turn_speed,
        )
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, G=square step, O=reset, Space=stop, Q=quit");
    info!("Speed: {}", LEVELS[0].0);

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn send(
    publisher: &zenoh::pubsub::Publisher<'_>,
    cmd: &Command,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(cmd)?).await?;
    Ok(())
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut level = 0;
    let mut held = HeldAxes::default();

    loop {
        if event::poll(PUBLISH_PERIOD)? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                if kind == KeyEventKind::Release {
                    continue;
                }
                if let Some((axis, direction)) = movement(code) {
                    held.press(axis, direction);
                } else {
                    match code {
                        KeyCode::Char('r') | KeyCode::Char('f') => {
                            level = if code == KeyCode::Char('r') {
                                (level + 1).min(LEVELS.len() - 1)
                            } else {
                                level.saturating_sub(1)
                            };
                            info!("Speed: {}", LEVELS[level].0);
                        }
                        KeyCode::Char('g') => {
                            let (_, speed, turn_speed) = LEVELS[level];
                            info!("Square step");
                            let cmd = Command::Control {
                                dx: SQUARE_SIDE,
                                dy: 0.0,
                                turn: SQUARE_TURN,
                                speed,
                                turn_speed,
                            };
                            send(publisher, &cmd).await?;
                        }
                        KeyCode::Char('o') => {
                            info!("Odometry reset");
                            send(publisher, &Command::ResetOdometry).await?;
                        }
                        KeyCode::Char(' ') => {
                            info!("Emergency stop");
                            held = HeldAxes::default();
                            send(publisher, &Command::Emergency).await?;
                        }
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        _ => {}
                    }
                }
            }
        }

        // The API slot is refreshed continuously, the runtime drops it once we stop
        held.expire();
        let order = held.order(level);
        send(
            publisher,
            &Command::Api {
                dx: order.dx,
                dy: order.dy,
                turn: order.turn,
            },
        )
        .await?;
    }

    Ok(())
}

// Control core of a three-wheel holonomic robot and its Zenoh runtime

pub mod config;
pub mod drive;
pub mod messages;
pub mod motion;
pub mod odometry;
pub mod robot;
pub mod runtime;
pub mod sim;

pub mod backend;
pub mod config;
pub mod server;
pub mod telemetry;

pub use backend::Services;
pub use config::{Cli, Command, Settings};

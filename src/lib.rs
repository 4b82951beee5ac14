pub mod buttons;
pub mod commands;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod focus;
pub mod input_loop;
pub mod macros;
pub mod orchestrator;
pub mod platform;
pub mod process_watcher;
pub mod state;

use config::ConfigDir;
use orchestrator::Orchestrator;

/// Service entry point: set up logging, resolve the config directory and run
/// until an `Exit` command arrives.
pub fn run() -> error::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_dir = ConfigDir::from_env()?;
    log::info!("Config directory: {}", config_dir.root().display());
    Orchestrator::run(platform::create_platform(), config_dir)
}

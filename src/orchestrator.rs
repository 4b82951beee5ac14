use crate::commands::CommandServer;
use crate::config::{self, ConfigDir};
use crate::error::Result;
use crate::platform::PlatformServices;
use crate::process_watcher::ProcessWatcher;
use crate::state::AppState;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Owns the service threads: process watcher, command channel and (through
/// [`AppState`]) the injection loop.
pub struct Orchestrator {
    state: Arc<AppState>,
    watcher: ProcessWatcher,
    server: Option<CommandServer>,
}

impl Orchestrator {
    pub fn new(platform: Arc<dyn PlatformServices>, config_dir: ConfigDir) -> Self {
        Self {
            state: Arc::new(AppState::new(platform, config_dir)),
            watcher: ProcessWatcher::new(),
            server: None,
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Command channel address, once started.
    pub fn command_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(CommandServer::local_addr)
    }

    pub fn start(&mut self, command_addr: SocketAddr) -> Result<()> {
        self.server = Some(CommandServer::start(command_addr, self.state.clone())?);
        self.watcher.start(self.state.clone())
    }

    /// Block until an `Exit` command arrives.
    pub fn wait_for_shutdown(&self) {
        while !self.state.shutdown_requested() {
            std::thread::sleep(SHUTDOWN_POLL);
        }
    }

    pub fn shutdown(&mut self) {
        log::info!("Shutting down");
        self.watcher.stop();
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
        self.state.teardown();
    }

    /// Start everything, serve until `Exit`, then tear down.
    pub fn run(platform: Arc<dyn PlatformServices>, config_dir: ConfigDir) -> Result<()> {
        let port = config::command_port(&config_dir.open_global()?);
        let mut orchestrator = Self::new(platform, config_dir);
        if let Err(e) = orchestrator.start(SocketAddr::from((Ipv4Addr::LOCALHOST, port))) {
            orchestrator.shutdown();
            return Err(e);
        }
        orchestrator.wait_for_shutdown();
        orchestrator.shutdown();
        Ok(())
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.server.is_some() || self.watcher.is_running() {
            self.shutdown();
        }
    }
}

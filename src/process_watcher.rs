use crate::error::Result;
use crate::focus::{FocusState, FocusTracker};
use crate::platform::ProcessMonitor;
use crate::state::AppState;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const POLL_SLICE: Duration = Duration::from_millis(100);
/// Slices to wait between polls while no game is running.
const IDLE_SLICES: u32 = 5;

/// Outcome of one foreground-title poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    Idle,
    Launched(u64),
    Running(u64),
    Exited(u64),
}

/// Application ids carry `0x01` in their top byte; anything else is a system
/// applet unless whitelisted.
pub fn is_game(title_id: u64, whitelist: &HashSet<u64>) -> bool {
    title_id >> 56 == 0x01 || whitelist.contains(&title_id)
}

/// Turns successive foreground-title reads into launch/exit transitions.
#[derive(Debug, Default)]
pub struct GameWatcher {
    current: Option<u64>,
    pending: Option<GameEvent>,
}

impl GameWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<u64> {
        self.current
    }

    /// A direct switch from one game to another yields `Exited(old)` on this
    /// poll and `Launched(new)` on the next.
    pub fn poll(&mut self, monitor: &dyn ProcessMonitor, whitelist: &HashSet<u64>) -> GameEvent {
        if let Some(event) = self.pending.take() {
            return event;
        }

        let title = match monitor.current_title_id() {
            Ok(title) => title,
            Err(e) => {
                log::debug!("Title query failed: {}", e);
                return match self.current {
                    Some(tid) => GameEvent::Running(tid),
                    None => GameEvent::Idle,
                };
            }
        };
        let game = title.filter(|&tid| is_game(tid, whitelist));

        match (self.current, game) {
            (None, None) => GameEvent::Idle,
            (None, Some(tid)) => {
                self.current = Some(tid);
                GameEvent::Launched(tid)
            }
            (Some(current), Some(tid)) if current == tid => GameEvent::Running(tid),
            (Some(current), Some(tid)) => {
                self.current = Some(tid);
                self.pending = Some(GameEvent::Launched(tid));
                GameEvent::Exited(current)
            }
            (Some(current), None) => {
                self.current = None;
                GameEvent::Exited(current)
            }
        }
    }
}

/// Polls the foreground title and focus state and drives [`AppState`].
pub struct ProcessWatcher {
    running: Arc<AtomicBool>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl ProcessWatcher {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    pub fn start(&mut self, state: Arc<AppState>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let spawned = std::thread::Builder::new()
            .name("turbopad-process-watcher".into())
            .spawn(move || watcher_loop(running, state));
        match spawned {
            Ok(handle) => self.thread_handle = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }
        log::info!("Process watcher started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        log::info!("Process watcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for ProcessWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watcher_loop(running: Arc<AtomicBool>, state: Arc<AppState>) {
    let platform = state.platform().clone();
    let mut games = GameWatcher::new();
    let mut focus = FocusTracker::new();

    while running.load(Ordering::SeqCst) {
        let whitelist = state.whitelist();
        let event = games.poll(&*platform, &whitelist);

        match event {
            GameEvent::Idle => {}
            GameEvent::Launched(tid) => {
                log::info!("Game launched: {:016X}", tid);
                focus.reset(&*platform, tid);
                state.on_game_launched(tid);
            }
            GameEvent::Running(tid) => match focus.poll(&*platform, tid) {
                FocusState::Unknown => {}
                change => state.on_focus_changed(tid, change),
            },
            GameEvent::Exited(tid) => {
                log::info!("Game exited: {:016X}", tid);
                state.on_game_exited(tid);
            }
        }
        state.reap_recording();

        let slices = if event == GameEvent::Idle { IDLE_SLICES } else { 1 };
        for _ in 0..slices {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(POLL_SLICE);
        }
    }
}

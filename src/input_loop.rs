use crate::buttons::{Buttons, StickPos};
use crate::device::{
    ControllerShape, DeviceSide, EntryState, StateList, StateListEntry, VirtualEntry,
};
use crate::engine::{
    EngineEvent, MacroEngine, MacroSet, ProcessResult, RemapEngine, RemapTable, TurboConfig,
    TurboEngine,
};
use crate::error::Result;
use crate::platform::PlatformServices;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Sleep slice while paused. Bounds how long `stop` can wait.
pub const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// Snapshot of everything the tick thread needs. Each handle is immutable;
/// a reload publishes a new `EngineSettings` with a fresh `Arc`.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub paused: bool,
    pub turbo: Option<Arc<TurboConfig>>,
    pub macros: Option<Arc<MacroSet>>,
    pub remap: Option<Arc<RemapTable>>,
}

impl EngineSettings {
    /// Whether any engine would drive the virtual pad.
    pub fn has_engine(&self) -> bool {
        self.turbo.is_some() || self.macros.is_some()
    }
}

/// Single-slot latest-value mailbox. Publishing overwrites an untaken value.
#[derive(Default)]
pub struct SettingsMailbox {
    slot: Mutex<Option<EngineSettings>>,
}

impl SettingsMailbox {
    pub fn publish(&self, settings: EngineSettings) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings);
    }

    pub fn take(&self) -> Option<EngineSettings> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub event: EngineEvent,
    pub published: bool,
}

/// Owns the engines and the virtual-pad session. Runs one tick at a time;
/// the thread wrapper is [`InputLoop`].
pub struct Injector {
    platform: Arc<dyn PlatformServices>,
    settings: EngineSettings,
    turbo: Option<TurboEngine>,
    macros: Option<MacroEngine>,
    remap: Option<RemapEngine>,
    attached: bool,
    entries: Vec<VirtualEntry>,
}

impl Injector {
    pub fn new(platform: Arc<dyn PlatformServices>, settings: EngineSettings) -> Self {
        let mut injector = Self {
            platform,
            settings: EngineSettings::default(),
            turbo: None,
            macros: None,
            remap: None,
            attached: false,
            entries: vec![],
        };
        injector.apply_settings(settings, Instant::now());
        injector
    }

    /// Swap in a new snapshot. Engines whose handle is unchanged keep their
    /// state; changed handles reconfigure; pausing ends every activation.
    pub fn apply_settings(&mut self, settings: EngineSettings, now: Instant) {
        self.turbo = match (self.turbo.take(), &settings.turbo) {
            (Some(mut engine), Some(config)) => {
                if !Arc::ptr_eq(engine.config(), config) {
                    log::debug!("Autofire reconfigured");
                    engine.reconfigure(config.clone(), now);
                }
                Some(engine)
            }
            (None, Some(config)) => Some(TurboEngine::new(config.clone())),
            (_, None) => None,
        };

        self.macros = match (self.macros.take(), &settings.macros) {
            (Some(mut engine), Some(set)) => {
                if !Arc::ptr_eq(engine.set(), set) {
                    engine.reconfigure(set.clone());
                }
                Some(engine)
            }
            (None, Some(set)) => Some(MacroEngine::new(set.clone())),
            (_, None) => None,
        };

        let remap_changed = match (&self.remap, &settings.remap) {
            (Some(engine), Some(table)) => !Arc::ptr_eq(engine.table(), table),
            (None, None) => false,
            _ => true,
        };
        if remap_changed {
            self.remap = settings.remap.clone().map(RemapEngine::new);
        }

        if settings.paused {
            if let Some(engine) = self.turbo.as_mut() {
                engine.finish();
            }
            if let Some(engine) = self.macros.as_mut() {
                engine.finish();
            }
        }
        self.settings = settings;
    }

    pub fn tick(&mut self, now: Instant) -> Result<TickOutcome> {
        if self.settings.paused {
            return Ok(TickOutcome {
                event: EngineEvent::Paused,
                published: false,
            });
        }
        if !self.attached {
            self.platform.attach()?;
            self.attached = true;
            log::debug!("Virtual pad session attached");
        }

        let Some((frame, shape)) = self.platform.read_frame()? else {
            return Ok(TickOutcome {
                event: EngineEvent::Idle,
                published: false,
            });
        };
        let mut frame = frame.without_pseudo_buttons();
        let scope = shape.owned_buttons();
        if let Some(remap) = &self.remap {
            frame.buttons = remap.reverse(frame.buttons, scope);
        }

        let mut result = ProcessResult::from_frame(&frame);
        if let Some(engine) = self.macros.as_mut() {
            engine.process(&mut result, now);
        }
        if result.event == EngineEvent::Idle {
            if let Some(engine) = self.turbo.as_mut() {
                engine.process(&mut result, shape, now);
            }
        } else if let Some(engine) = self.turbo.as_mut() {
            if result.event == EngineEvent::Starting && engine.is_active() {
                log::debug!("Macro starting; autofire finished");
            }
            engine.finish();
        }

        if !result.event.publishes() {
            return Ok(TickOutcome {
                event: result.event,
                published: false,
            });
        }
        if result.event == EngineEvent::Starting || self.entries.is_empty() {
            self.entries = self.platform.dump_entries()?;
        }
        let list = self.compose(&result, shape);
        self.platform.apply_state_list(&list)?;
        Ok(TickOutcome {
            event: result.event,
            published: true,
        })
    }

    /// Shape the composed result for each registered entry.
    fn compose(&self, result: &ProcessResult, shape: ControllerShape) -> StateList {
        let forward = |buttons: Buttons, scope: Buttons| match &self.remap {
            Some(remap) => remap.forward(buttons, scope),
            None => buttons,
        };
        let entries = self
            .entries
            .iter()
            .map(|&entry| {
                let state = match entry.side {
                    DeviceSide::Left => EntryState {
                        buttons: forward(result.joycon_buttons, Buttons::LEFT_HALF)
                            & Buttons::LEFT_HALF,
                        stick_left: result.stick_left,
                        stick_right: StickPos::CENTER,
                    },
                    DeviceSide::Right => EntryState {
                        buttons: forward(result.joycon_buttons, Buttons::RIGHT_HALF)
                            & Buttons::RIGHT_HALF,
                        stick_left: StickPos::CENTER,
                        stick_right: result.stick_right,
                    },
                    DeviceSide::Full => EntryState {
                        buttons: forward(result.other_buttons, shape.owned_buttons()),
                        stick_left: result.stick_left,
                        stick_right: result.stick_right,
                    },
                };
                StateListEntry { entry, state }
            })
            .collect();
        StateList { entries }
    }

    /// Drop the session after a failure; the next tick re-attaches.
    pub fn reset_session(&mut self) {
        if self.attached {
            let _ = self.platform.detach();
        }
        self.attached = false;
        self.entries.clear();
    }

    pub fn is_paused(&self) -> bool {
        self.settings.paused
    }
}

impl Drop for Injector {
    fn drop(&mut self) {
        self.reset_session();
    }
}

/// Manages the injection thread.
///
/// Runs on a dedicated `std::thread` at ~1000Hz. Settings reach it through a
/// single-slot mailbox checked at the top of every tick.
pub struct InputLoop {
    running: Arc<AtomicBool>,
    mailbox: Arc<SettingsMailbox>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl InputLoop {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            mailbox: Arc::new(SettingsMailbox::default()),
            thread_handle: None,
        }
    }

    /// Start the loop, or hand the settings to the running one.
    pub fn start(
        &mut self,
        platform: Arc<dyn PlatformServices>,
        settings: EngineSettings,
    ) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            self.update(settings);
            return Ok(());
        }

        let running = self.running.clone();
        let mailbox = self.mailbox.clone();
        mailbox.take();
        running.store(true, Ordering::SeqCst);

        let spawned = std::thread::Builder::new()
            .name("turbopad-injection".into())
            .spawn(move || {
                log::info!("Injection loop started");
                let mut injector = Injector::new(platform, settings);
                run_loop(&mut injector, &running, &mailbox);
                log::info!("Injection loop stopped");
            });

        match spawned {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Publish a new snapshot to the running loop.
    pub fn update(&self, settings: EngineSettings) {
        self.mailbox.publish(settings);
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for InputLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InputLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(injector: &mut Injector, running: &AtomicBool, mailbox: &SettingsMailbox) {
    // One warning per failure streak.
    let mut failing = false;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if let Some(settings) = mailbox.take() {
            injector.apply_settings(settings, now);
        }

        match injector.tick(now) {
            Ok(_) => {
                if failing {
                    log::info!("Injection recovered");
                    failing = false;
                }
            }
            Err(e) => {
                if !failing {
                    log::warn!("Injection tick failed: {}", e);
                    failing = true;
                }
                injector.reset_session();
            }
        }

        if injector.is_paused() {
            std::thread::sleep(PAUSE_SLICE);
        } else {
            std::thread::sleep(TICK_INTERVAL);
        }
    }
}

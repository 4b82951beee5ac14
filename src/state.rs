use crate::commands::{Command, CommandHandler};
use crate::config::{self, ConfigDir, FeatureSwitches, GameStores};
use crate::engine::{MacroSet, RemapTable, TurboConfig};
use crate::error::{Result, TurboPadError};
use crate::focus::FocusState;
use crate::input_loop::{EngineSettings, InputLoop};
use crate::macros::sampler::MacroSampler;
use crate::platform::PlatformServices;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Turbo,
    Remap,
    Macro,
}

/// Loaded configuration snapshots for the current title. `None` when the
/// part failed to load.
#[derive(Debug, Clone, Default)]
pub struct Snapshots {
    pub turbo: Option<Arc<TurboConfig>>,
    pub remap: Option<Arc<RemapTable>>,
    pub macros: Option<Arc<MacroSet>>,
}

impl Snapshots {
    fn load(dir: &ConfigDir, title_id: u64) -> Result<(FeatureSwitches, Self)> {
        let stores = GameStores::open(dir, title_id)?;
        let features = FeatureSwitches::load(&stores);
        let log_failure = |what: &str, e: &TurboPadError| {
            log::error!("Failed to load {} config for {:016X}: {}", what, title_id, e);
        };
        let snapshots = Self {
            turbo: load_turbo(&stores)
                .map_err(|e| log_failure("autofire", &e))
                .ok(),
            remap: Some(load_remap(&stores)),
            macros: load_macros(dir, &stores, title_id)
                .map_err(|e| log_failure("macro", &e))
                .ok(),
        };
        Ok((features, snapshots))
    }
}

fn load_turbo(stores: &GameStores) -> Result<Arc<TurboConfig>> {
    TurboConfig::load(stores.params(), &stores.global).map(Arc::new)
}

fn load_remap(stores: &GameStores) -> Arc<RemapTable> {
    Arc::new(RemapTable::load(stores.params()))
}

fn load_macros(dir: &ConfigDir, stores: &GameStores, title_id: u64) -> Result<Arc<MacroSet>> {
    let set = match &stores.game {
        Some(game) => MacroSet::load(game, &dir.macro_dir(title_id))?,
        None => MacroSet::default(),
    };
    Ok(Arc::new(set))
}

pub struct Inner {
    pub title_id: Option<u64>,
    pub in_focus: bool,
    pub features: FeatureSwitches,
    pub snapshots: Snapshots,
    pub input_loop: InputLoop,
    pub remap_applied: bool,
    pub recording: Option<MacroSampler>,
}

impl Inner {
    fn new() -> Self {
        Self {
            title_id: None,
            in_focus: false,
            features: FeatureSwitches::default(),
            snapshots: Snapshots::default(),
            input_loop: InputLoop::new(),
            remap_applied: false,
            recording: None,
        }
    }

    /// Settings for the tick thread: enabled features only.
    pub fn engine_settings(&self) -> EngineSettings {
        let snapshots = &self.snapshots;
        EngineSettings {
            paused: !self.in_focus,
            turbo: snapshots.turbo.clone().filter(|_| self.features.turbo),
            macros: snapshots
                .macros
                .clone()
                .filter(|set| self.features.macros && !set.is_empty()),
            remap: snapshots
                .remap
                .clone()
                .filter(|table| self.features.remap && !table.is_empty()),
        }
    }

    /// Start, update or stop the injection loop to match the current state.
    /// An out-of-focus title keeps a running loop paused but never starts one.
    pub fn sync_injection(&mut self, platform: &Arc<dyn PlatformServices>) -> Result<()> {
        let settings = self.engine_settings();
        if self.title_id.is_none() || !settings.has_engine() {
            if self.input_loop.is_running() {
                self.input_loop.stop();
            }
            return Ok(());
        }
        if self.input_loop.is_running() {
            self.input_loop.update(settings);
        } else if self.in_focus {
            self.input_loop.start(platform.clone(), settings)?;
        }
        Ok(())
    }

    /// Push the hardware-layer mapping while a title with remap enabled is in
    /// focus; restore the default mapping otherwise.
    pub fn sync_remap(&mut self, platform: &dyn PlatformServices) -> Result<()> {
        let table = self
            .snapshots
            .remap
            .as_ref()
            .filter(|table| self.features.remap && !table.is_empty());
        match table {
            Some(table) if self.title_id.is_some() && self.in_focus => {
                for kind in platform.connected_pads()? {
                    platform.apply_button_config(kind, &table.pairs_for_pad(kind))?;
                }
                self.remap_applied = true;
            }
            _ if self.remap_applied => {
                platform.restore_button_config()?;
                self.remap_applied = false;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn cancel_recording(&mut self) {
        if let Some(sampler) = self.recording.take() {
            sampler.cancel();
        }
    }

    fn feature_mut(&mut self, feature: Feature) -> &mut bool {
        match feature {
            Feature::Turbo => &mut self.features.turbo,
            Feature::Remap => &mut self.features.remap,
            Feature::Macro => &mut self.features.macros,
        }
    }
}

/// Shared service state. The watcher thread and the command thread both go
/// through it; the tick thread only sees what `sync_injection` publishes.
pub struct AppState {
    inner: Mutex<Inner>,
    platform: Arc<dyn PlatformServices>,
    config_dir: ConfigDir,
    /// Swapped whole on `reload-whitelist`.
    whitelist: Mutex<Arc<HashSet<u64>>>,
    shutdown: AtomicBool,
}

impl AppState {
    pub fn new(platform: Arc<dyn PlatformServices>, config_dir: ConfigDir) -> Self {
        let whitelist = match config_dir.open_global() {
            Ok(global) => config::load_whitelist(&global),
            Err(e) => {
                log::warn!("Global config unreadable, empty whitelist: {}", e);
                HashSet::new()
            }
        };
        Self {
            inner: Mutex::new(Inner::new()),
            platform,
            config_dir,
            whitelist: Mutex::new(Arc::new(whitelist)),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn platform(&self) -> &Arc<dyn PlatformServices> {
        &self.platform
    }

    pub fn config_dir(&self) -> &ConfigDir {
        &self.config_dir
    }

    pub fn whitelist(&self) -> Arc<HashSet<u64>> {
        self.whitelist
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn sync(&self, inner: &mut Inner) {
        if let Err(e) = inner.sync_injection(&self.platform) {
            log::error!("Failed to update injection loop: {}", e);
        }
        if let Err(e) = inner.sync_remap(&*self.platform) {
            log::error!("Failed to update button mapping: {}", e);
        }
    }

    pub fn on_game_launched(&self, title_id: u64) {
        let loaded = Snapshots::load(&self.config_dir, title_id);
        let mut inner = self.lock_inner();
        inner.cancel_recording();
        inner.title_id = Some(title_id);
        inner.in_focus = true;
        match loaded {
            Ok((features, snapshots)) => {
                log::info!("Features for {:016X}: {:?}", title_id, features);
                inner.features = features;
                inner.snapshots = snapshots;
            }
            Err(e) => {
                log::error!("Failed to open config for {:016X}: {}", title_id, e);
                inner.features = FeatureSwitches::default();
                inner.snapshots = Snapshots::default();
            }
        }
        self.sync(&mut inner);
    }

    pub fn on_focus_changed(&self, title_id: u64, focus: FocusState) {
        let mut inner = self.lock_inner();
        if inner.title_id != Some(title_id) {
            return;
        }
        match focus {
            FocusState::InFocus => {
                log::info!("{:016X} in focus", title_id);
                inner.in_focus = true;
            }
            FocusState::OutOfFocus => {
                log::info!("{:016X} lost focus", title_id);
                inner.in_focus = false;
                inner.cancel_recording();
            }
            FocusState::Unknown => return,
        }
        self.sync(&mut inner);
    }

    pub fn on_game_exited(&self, title_id: u64) {
        let mut inner = self.lock_inner();
        if inner.title_id != Some(title_id) {
            return;
        }
        inner.cancel_recording();
        inner.title_id = None;
        inner.in_focus = false;
        self.sync(&mut inner);
    }

    /// Stop every worker and restore the default mapping.
    pub fn teardown(&self) {
        let mut inner = self.lock_inner();
        inner.cancel_recording();
        inner.input_loop.stop();
        inner.title_id = None;
        inner.in_focus = false;
        if let Err(e) = inner.sync_remap(&*self.platform) {
            log::error!("Failed to restore button mapping: {}", e);
        }
    }

    /// Enabling re-reads the feature's config for the running title first,
    /// so edits made while it was off take effect. A failed read leaves the
    /// feature off and is returned.
    pub fn set_feature(&self, feature: Feature, enabled: bool) -> Result<()> {
        log::info!("{:?} {}", feature, if enabled { "enabled" } else { "disabled" });
        let title_id = self.lock_inner().title_id;
        let loaded = match title_id {
            Some(tid) if enabled => {
                let stores = GameStores::open(&self.config_dir, tid)?;
                Some(self.load_feature(&stores, tid, feature)?)
            }
            _ => None,
        };

        let mut inner = self.lock_inner();
        if let Some(update) = loaded {
            if inner.title_id != title_id {
                log::info!("Title changed while enabling {:?}; discarded", feature);
                return Ok(());
            }
            update(&mut *inner);
        }
        *inner.feature_mut(feature) = enabled;
        inner.sync_injection(&self.platform)?;
        inner.sync_remap(&*self.platform)
    }

    /// Read one feature's snapshot. Called without the lock held; the
    /// returned update swaps it in.
    fn load_feature(
        &self,
        stores: &GameStores,
        title_id: u64,
        feature: Feature,
    ) -> Result<Box<dyn FnOnce(&mut Inner)>> {
        let update: Box<dyn FnOnce(&mut Inner)> = match feature {
            Feature::Turbo => {
                let turbo = load_turbo(stores)?;
                Box::new(move |inner: &mut Inner| inner.snapshots.turbo = Some(turbo))
            }
            Feature::Remap => {
                let remap = load_remap(stores);
                Box::new(move |inner: &mut Inner| inner.snapshots.remap = Some(remap))
            }
            Feature::Macro => {
                let macros = load_macros(&self.config_dir, stores, title_id)?;
                Box::new(move |inner: &mut Inner| inner.snapshots.macros = Some(macros))
            }
        };
        Ok(update)
    }

    /// Re-read config for the running title and swap the new snapshots in.
    /// On failure the previous snapshots stay in force.
    pub fn reload(&self, command: Command) -> Result<()> {
        if command == Command::ReloadWhitelist {
            let global = self.config_dir.open_global()?;
            let whitelist = config::load_whitelist(&global);
            log::info!("Whitelist reloaded ({} entries)", whitelist.len());
            *self.whitelist.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(whitelist);
            return Ok(());
        }

        let Some(title_id) = self.lock_inner().title_id else {
            log::debug!("{:?} with no running title", command);
            return Ok(());
        };

        // Files are read without holding the lock.
        let stores = GameStores::open(&self.config_dir, title_id)?;
        let update: Box<dyn FnOnce(&mut Inner)> = match command {
            Command::ReloadBasic => {
                let features = FeatureSwitches::load(&stores);
                let turbo = load_turbo(&stores)?;
                let remap = load_remap(&stores);
                let macros = load_macros(&self.config_dir, &stores, title_id)?;
                Box::new(move |inner| {
                    inner.features = features;
                    inner.snapshots = Snapshots {
                        turbo: Some(turbo),
                        remap: Some(remap),
                        macros: Some(macros),
                    };
                })
            }
            Command::ReloadTurbo => self.load_feature(&stores, title_id, Feature::Turbo)?,
            Command::ReloadRemap => self.load_feature(&stores, title_id, Feature::Remap)?,
            Command::ReloadMacro => self.load_feature(&stores, title_id, Feature::Macro)?,
            other => {
                return Err(TurboPadError::Command(format!("{:?} is not a reload", other)));
            }
        };

        let mut inner = self.lock_inner();
        if inner.title_id != Some(title_id) {
            log::info!("Title changed during {:?}; discarded", command);
            return Ok(());
        }
        update(&mut *inner);
        log::info!("{:?} applied for {:016X}", command, title_id);
        inner.sync_injection(&self.platform)?;
        inner.sync_remap(&*self.platform)
    }

    pub fn start_recording(&self) -> Result<()> {
        let stop_combo = config::record_stop_combo(&self.config_dir.open_global()?);
        let mut inner = self.lock_inner();
        let title_id = match inner.title_id {
            Some(tid) if inner.in_focus => tid,
            _ => return Err(TurboPadError::Command("no game in focus".into())),
        };
        if inner.recording.is_some() {
            return Err(TurboPadError::Command("already recording".into()));
        }
        let sampler = MacroSampler::prepare(
            self.platform.clone(),
            title_id,
            self.config_dir.macro_dir(title_id),
            stop_combo,
            inner.engine_settings().remap,
        )?;
        sampler.start();
        inner.recording = Some(sampler);
        Ok(())
    }

    pub fn cancel_recording(&self) {
        self.lock_inner().cancel_recording();
    }

    pub fn is_recording(&self) -> bool {
        self.lock_inner().recording.is_some()
    }

    /// Collect a recording that ended on its own.
    pub fn reap_recording(&self) {
        let finished = {
            let mut inner = self.lock_inner();
            match &inner.recording {
                Some(sampler) if sampler.is_finished() => inner.recording.take(),
                _ => None,
            }
        };
        let Some(sampler) = finished else {
            return;
        };
        match sampler.stop() {
            Ok(Some(path)) => log::info!("Recording saved to {}", path.display()),
            Ok(None) => {}
            Err(e) => log::error!("Failed to save recording: {}", e),
        }
    }
}

impl CommandHandler for AppState {
    fn handle(&self, command: Command) -> Result<()> {
        match command {
            Command::EnableTurbo => self.set_feature(Feature::Turbo, true),
            Command::DisableTurbo => self.set_feature(Feature::Turbo, false),
            Command::EnableRemap => self.set_feature(Feature::Remap, true),
            Command::DisableRemap => self.set_feature(Feature::Remap, false),
            Command::EnableMacro => self.set_feature(Feature::Macro, true),
            Command::DisableMacro => self.set_feature(Feature::Macro, false),
            Command::ReloadBasic
            | Command::ReloadTurbo
            | Command::ReloadRemap
            | Command::ReloadMacro
            | Command::ReloadWhitelist => self.reload(command),
            Command::RecordStart => self.start_recording(),
            Command::RecordCancel => {
                self.cancel_recording();
                Ok(())
            }
            Command::Exit => {
                log::info!("Exit requested");
                self.request_shutdown();
                Ok(())
            }
        }
    }
}

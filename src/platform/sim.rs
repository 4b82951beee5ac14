use crate::buttons::Buttons;
use crate::device::{
    ControllerShape, PadReadings, PhysicalPadKind, RawInputFrame, StateList, VirtualEntry,
};
use crate::error::{Result, TurboPadError};
use crate::focus::PlayEvent;
use crate::platform::{ButtonConfigurator, InputSource, PlayEventLog, ProcessMonitor, VirtualPad};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// In-memory platform for development and tests.
///
/// Tests drive it by setting the physical frame, the registered virtual
/// entries, the foreground title and the play-event log, then inspect what the
/// engine published.
#[derive(Default)]
pub struct SimPlatform {
    inner: Mutex<SimState>,
}

#[derive(Default)]
struct SimState {
    input: Option<(RawInputFrame, ControllerShape)>,
    entries: Vec<VirtualEntry>,
    published: Vec<StateList>,
    attached: bool,
    attach_failures: u32,
    fail_apply: bool,
    pads: Vec<PhysicalPadKind>,
    button_config: HashMap<PhysicalPadKind, Vec<(Buttons, Buttons)>>,
    title_id: Option<u64>,
    events: Vec<PlayEvent>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_input(&self, frame: RawInputFrame, shape: ControllerShape) {
        self.lock().input = Some((frame, shape));
    }

    /// Set per-style reads and let them resolve the way a console backend does.
    pub fn set_readings(&self, readings: PadReadings) {
        self.lock().input = readings.resolve();
    }

    pub fn disconnect_input(&self) {
        self.lock().input = None;
    }

    pub fn set_entries(&self, entries: Vec<VirtualEntry>) {
        self.lock().entries = entries;
    }

    /// Make the next `count` attach calls fail.
    pub fn fail_next_attaches(&self, count: u32) {
        self.lock().attach_failures = count;
    }

    pub fn set_fail_apply(&self, fail: bool) {
        self.lock().fail_apply = fail;
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    pub fn published(&self) -> Vec<StateList> {
        self.lock().published.clone()
    }

    pub fn last_published(&self) -> Option<StateList> {
        self.lock().published.last().cloned()
    }

    pub fn clear_published(&self) {
        self.lock().published.clear();
    }

    pub fn set_pads(&self, pads: Vec<PhysicalPadKind>) {
        self.lock().pads = pads;
    }

    /// Hardware button config currently applied to `kind`, if any.
    pub fn button_config(&self, kind: PhysicalPadKind) -> Option<Vec<(Buttons, Buttons)>> {
        self.lock().button_config.get(&kind).cloned()
    }

    pub fn set_title(&self, title_id: Option<u64>) {
        self.lock().title_id = title_id;
    }

    pub fn push_event(&self, event: PlayEvent) {
        self.lock().events.push(event);
    }
}

impl InputSource for SimPlatform {
    fn read_frame(&self) -> Result<Option<(RawInputFrame, ControllerShape)>> {
        Ok(self
            .lock()
            .input
            .map(|(frame, shape)| (frame.without_pseudo_buttons(), shape)))
    }
}

impl VirtualPad for SimPlatform {
    fn attach(&self) -> Result<()> {
        let mut state = self.lock();
        if state.attach_failures > 0 {
            state.attach_failures -= 1;
            return Err(TurboPadError::Platform("virtual pad session busy".into()));
        }
        state.attached = true;
        Ok(())
    }

    fn detach(&self) -> Result<()> {
        self.lock().attached = false;
        Ok(())
    }

    fn dump_entries(&self) -> Result<Vec<VirtualEntry>> {
        let state = self.lock();
        if !state.attached {
            return Err(TurboPadError::Platform("session not attached".into()));
        }
        Ok(state.entries.clone())
    }

    fn apply_state_list(&self, list: &StateList) -> Result<()> {
        let mut state = self.lock();
        if !state.attached {
            return Err(TurboPadError::Platform("session not attached".into()));
        }
        if state.fail_apply {
            return Err(TurboPadError::Platform("apply rejected".into()));
        }
        state.published.push(list.clone());
        Ok(())
    }
}

impl ButtonConfigurator for SimPlatform {
    fn connected_pads(&self) -> Result<Vec<PhysicalPadKind>> {
        Ok(self.lock().pads.clone())
    }

    fn apply_button_config(
        &self,
        kind: PhysicalPadKind,
        pairs: &[(Buttons, Buttons)],
    ) -> Result<()> {
        self.lock().button_config.insert(kind, pairs.to_vec());
        Ok(())
    }

    fn restore_button_config(&self) -> Result<()> {
        self.lock().button_config.clear();
        Ok(())
    }
}

impl ProcessMonitor for SimPlatform {
    fn current_title_id(&self) -> Result<Option<u64>> {
        Ok(self.lock().title_id)
    }
}

impl PlayEventLog for SimPlatform {
    fn latest_event_index(&self) -> Result<Option<u32>> {
        let len = self.lock().events.len();
        Ok(len.checked_sub(1).map(|i| i as u32))
    }

    fn query_events(&self, start: u32, max: usize) -> Result<Vec<PlayEvent>> {
        Ok(self
            .lock()
            .events
            .iter()
            .skip(start as usize)
            .take(max)
            .copied()
            .collect())
    }
}

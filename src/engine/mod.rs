pub mod macro_player;
pub mod remap;
pub mod turbo;

use crate::buttons::{Buttons, StickPos};
use crate::device::RawInputFrame;

pub use macro_player::{MacroEngine, MacroEntry, MacroSet};
pub use remap::{RemapEngine, RemapTable};
pub use turbo::{SplitHand, TurboConfig, TurboEngine};

/// Lifecycle event shared by the turbo and macro state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Injection suspended (focus lost). Nothing is read or published.
    Paused,
    /// No engine is acting; the physical pad is passed through untouched.
    Idle,
    /// An engine just activated. Virtual entries must be re-enumerated.
    Starting,
    Executing,
    /// Last tick of an activation. Output is the raw frame so no pulse latches.
    Finishing,
}

impl EngineEvent {
    /// Whether this tick produces a state-list publish.
    pub fn publishes(self) -> bool {
        matches!(
            self,
            EngineEvent::Starting | EngineEvent::Executing | EngineEvent::Finishing
        )
    }
}

/// Per-tick composed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessResult {
    pub event: EngineEvent,
    /// Raw physical buttons after pseudo-button stripping and reverse remap.
    pub buttons: Buttons,
    pub stick_left: StickPos,
    pub stick_right: StickPos,
    /// Destined for full and docked entries.
    pub other_buttons: Buttons,
    /// Destined for split-half entries. Carries only engine-driven buttons.
    pub joycon_buttons: Buttons,
}

impl ProcessResult {
    pub fn from_frame(frame: &RawInputFrame) -> Self {
        Self {
            event: EngineEvent::Idle,
            buttons: frame.buttons,
            stick_left: frame.stick_left,
            stick_right: frame.stick_right,
            other_buttons: frame.buttons,
            joycon_buttons: Buttons::empty(),
        }
    }

    /// Reset the outputs to a plain passthrough of the raw frame.
    pub fn passthrough(&mut self, event: EngineEvent) {
        self.event = event;
        self.other_buttons = self.buttons;
        self.joycon_buttons = Buttons::empty();
    }
}

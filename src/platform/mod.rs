use crate::buttons::Buttons;
use crate::device::{
    ControllerShape, PhysicalPadKind, RawInputFrame, StateList, VirtualEntry,
};
use crate::error::Result;
use crate::focus::PlayEvent;
use std::sync::Arc;

/// Read the physical controller and classify its shape.
pub trait InputSource: Send + Sync {
    /// Current frame of player one, or `None` when no pad is connected.
    /// Implementations must already strip [`Buttons::STICK_PSEUDO`].
    fn read_frame(&self) -> Result<Option<(RawInputFrame, ControllerShape)>>;
}

/// Present synthetic controller state through the virtual-controller subsystem.
pub trait VirtualPad: Send + Sync {
    fn attach(&self) -> Result<()>;
    fn detach(&self) -> Result<()>;
    /// Enumerate the entries currently registered with the subsystem.
    fn dump_entries(&self) -> Result<Vec<VirtualEntry>>;
    /// Publish one complete state list.
    fn apply_state_list(&self, list: &StateList) -> Result<()>;
}

/// Hardware-layer button configuration, used for remapping pads the
/// injection engines are not driving.
pub trait ButtonConfigurator: Send + Sync {
    fn connected_pads(&self) -> Result<Vec<PhysicalPadKind>>;
    fn apply_button_config(
        &self,
        kind: PhysicalPadKind,
        pairs: &[(Buttons, Buttons)],
    ) -> Result<()>;
    fn restore_button_config(&self) -> Result<()>;
}

/// Identify the foreground application.
pub trait ProcessMonitor: Send + Sync {
    fn current_title_id(&self) -> Result<Option<u64>>;
}

/// The platform's play-event log (focus gained / lost per title).
pub trait PlayEventLog: Send + Sync {
    /// Index of the newest event, `None` while the log is empty.
    fn latest_event_index(&self) -> Result<Option<u32>>;
    /// Up to `max` events starting at index `start`, oldest first.
    fn query_events(&self, start: u32, max: usize) -> Result<Vec<PlayEvent>>;
}

/// Combined trait for full platform support.
pub trait PlatformServices:
    InputSource + VirtualPad + ButtonConfigurator + ProcessMonitor + PlayEventLog
{
}

// Blanket impl: anything implementing all sub-traits is a PlatformServices.
impl<T> PlatformServices for T where
    T: InputSource + VirtualPad + ButtonConfigurator + ProcessMonitor + PlayEventLog
{
}

pub mod sim;
mod unsupported;

pub use sim::SimPlatform;

/// Create the platform service provider for this build.
pub fn create_platform() -> Arc<dyn PlatformServices> {
    Arc::new(unsupported::UnsupportedPlatform::new())
}

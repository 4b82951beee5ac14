use crate::buttons::Buttons;
use crate::device::{ControllerShape, PhysicalPadKind, RawInputFrame, StateList, VirtualEntry};
use crate::error::{Result, TurboPadError};
use crate::focus::PlayEvent;
use crate::platform::{ButtonConfigurator, InputSource, PlayEventLog, ProcessMonitor, VirtualPad};

/// Host build stub: no console services are reachable, so every pad call fails
/// and the engine loops simply log and retry.
pub struct UnsupportedPlatform;

impl UnsupportedPlatform {
    pub fn new() -> Self {
        Self
    }

    fn unsupported<T>() -> Result<T> {
        Err(TurboPadError::PlatformNotSupported(
            std::env::consts::OS.into(),
        ))
    }
}

impl Default for UnsupportedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for UnsupportedPlatform {
    fn read_frame(&self) -> Result<Option<(RawInputFrame, ControllerShape)>> {
        Ok(None)
    }
}

impl VirtualPad for UnsupportedPlatform {
    fn attach(&self) -> Result<()> {
        Self::unsupported()
    }

    fn detach(&self) -> Result<()> {
        Ok(())
    }

    fn dump_entries(&self) -> Result<Vec<VirtualEntry>> {
        Self::unsupported()
    }

    fn apply_state_list(&self, _list: &StateList) -> Result<()> {
        Self::unsupported()
    }
}

impl ButtonConfigurator for UnsupportedPlatform {
    fn connected_pads(&self) -> Result<Vec<PhysicalPadKind>> {
        Ok(vec![])
    }

    fn apply_button_config(
        &self,
        _kind: PhysicalPadKind,
        _pairs: &[(Buttons, Buttons)],
    ) -> Result<()> {
        Self::unsupported()
    }

    fn restore_button_config(&self) -> Result<()> {
        Ok(())
    }
}

impl ProcessMonitor for UnsupportedPlatform {
    fn current_title_id(&self) -> Result<Option<u64>> {
        Ok(None)
    }
}

impl PlayEventLog for UnsupportedPlatform {
    fn latest_event_index(&self) -> Result<Option<u32>> {
        Ok(None)
    }

    fn query_events(&self, _start: u32, _max: usize) -> Result<Vec<PlayEvent>> {
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_calls_fail_and_queries_read_empty() {
        let platform = UnsupportedPlatform::default();
        assert!(matches!(
            platform.attach(),
            Err(TurboPadError::PlatformNotSupported(_))
        ));
        assert!(platform.apply_state_list(&StateList::default()).is_err());
        assert_eq!(platform.read_frame().unwrap(), None);
        assert_eq!(platform.current_title_id().unwrap(), None);
        assert!(platform.connected_pads().unwrap().is_empty());
    }
}

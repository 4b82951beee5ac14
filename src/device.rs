use crate::buttons::{Buttons, StickPos};

/// Physical shape of the controller currently driving player one.
///
/// Re-evaluated every tick, so a pad swap mid-game is picked up on the next read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerShape {
    /// Single full pad (Pro-style or third-party).
    FullPad,
    /// Two split halves held together as one pad.
    DualStickPad,
    /// Left half used on its own.
    SplitLeft,
    /// Right half used on its own.
    SplitRight,
    /// Halves attached to the console (handheld / Lite).
    DockedPad,
}

impl ControllerShape {
    /// Buttons this shape physically owns. Remap substitution never leaves this set.
    pub fn owned_buttons(self) -> Buttons {
        match self {
            ControllerShape::FullPad
            | ControllerShape::DualStickPad
            | ControllerShape::DockedPad => Buttons::all(),
            ControllerShape::SplitLeft => Buttons::LEFT_HALF,
            ControllerShape::SplitRight => Buttons::RIGHT_HALF,
        }
    }

    /// Whether this shape is built from detachable halves.
    pub fn is_split(self) -> bool {
        matches!(
            self,
            ControllerShape::DualStickPad | ControllerShape::SplitLeft | ControllerShape::SplitRight
        )
    }
}

/// One sample of the physical controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawInputFrame {
    pub buttons: Buttons,
    pub stick_left: StickPos,
    pub stick_right: StickPos,
}

impl RawInputFrame {
    pub fn new(buttons: Buttons, stick_left: StickPos, stick_right: StickPos) -> Self {
        Self {
            buttons,
            stick_left,
            stick_right,
        }
    }

    pub fn from_buttons(buttons: Buttons) -> Self {
        Self {
            buttons,
            ..Self::default()
        }
    }

    /// Copy with the stick-direction pseudo buttons removed.
    pub fn without_pseudo_buttons(mut self) -> Self {
        self.buttons = self.buttons.difference(Buttons::STICK_PSEUDO);
        self
    }

    pub fn is_neutral(&self) -> bool {
        self.buttons.is_empty() && self.stick_left.is_centered() && self.stick_right.is_centered()
    }
}

/// Player one as read through each controller style the platform exposes.
/// A style the pad is not using reads as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PadReadings {
    pub system_ext: Option<RawInputFrame>,
    pub handheld: Option<RawInputFrame>,
    pub full_key: Option<RawInputFrame>,
    pub dual: Option<RawInputFrame>,
    pub left: Option<RawInputFrame>,
    pub right: Option<RawInputFrame>,
}

impl PadReadings {
    /// Pick the style actually in use and return its frame.
    ///
    /// Styles are tried in a fixed order because some third-party pads report
    /// a bogus style next to the real one. Two lone halves are merged: buttons
    /// OR-ed, each stick from its own half.
    pub fn resolve(&self) -> Option<(RawInputFrame, ControllerShape)> {
        let resolved = if let Some(frame) = self.system_ext {
            (frame, ControllerShape::FullPad)
        } else if let Some(frame) = self.handheld {
            (frame, ControllerShape::DockedPad)
        } else if let Some(frame) = self.full_key {
            (frame, ControllerShape::FullPad)
        } else if let Some(frame) = self.dual {
            (frame, ControllerShape::DualStickPad)
        } else {
            match (self.left, self.right) {
                (Some(left), Some(right)) => (
                    RawInputFrame::new(
                        left.buttons | right.buttons,
                        left.stick_left,
                        right.stick_right,
                    ),
                    ControllerShape::DualStickPad,
                ),
                (Some(left), None) => (left, ControllerShape::SplitLeft),
                (None, Some(right)) => (right, ControllerShape::SplitRight),
                (None, None) => return None,
            }
        };
        Some((resolved.0.without_pseudo_buttons(), resolved.1))
    }
}

/// Which physical half a virtual-controller entry stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSide {
    Left,
    Right,
    Full,
}

/// A device registered with the virtual-controller subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualEntry {
    pub device_id: u64,
    pub side: DeviceSide,
}

/// State written to a single virtual-controller entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryState {
    pub buttons: Buttons,
    pub stick_left: StickPos,
    pub stick_right: StickPos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateListEntry {
    pub entry: VirtualEntry,
    pub state: EntryState,
}

/// Complete per-tick publish. Always applied as a whole, never entry by entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateList {
    pub entries: Vec<StateListEntry>,
}

impl StateList {
    pub fn state_for(&self, device_id: u64) -> Option<&EntryState> {
        self.entries
            .iter()
            .find(|e| e.entry.device_id == device_id)
            .map(|e| &e.state)
    }
}

/// Physical pad classes the platform keeps a hardware button config for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalPadKind {
    /// Console-attached halves and debug pads.
    Embedded,
    FullKey,
    LeftHalf,
    RightHalf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_shapes_own_only_their_half() {
        assert_eq!(ControllerShape::SplitLeft.owned_buttons(), Buttons::LEFT_HALF);
        assert_eq!(ControllerShape::SplitRight.owned_buttons(), Buttons::RIGHT_HALF);
        assert!(ControllerShape::FullPad.owned_buttons().contains(Buttons::A | Buttons::ZL));
        assert!(ControllerShape::DualStickPad.is_split());
        assert!(!ControllerShape::DockedPad.is_split());
    }

    #[test]
    fn pseudo_buttons_are_stripped() {
        let frame = RawInputFrame::from_buttons(Buttons::A | Buttons::STICK_L_UP);
        assert_eq!(frame.without_pseudo_buttons().buttons, Buttons::A);
    }

    #[test]
    fn readings_follow_style_priority() {
        let pro = RawInputFrame::from_buttons(Buttons::A);
        let bogus = RawInputFrame::from_buttons(Buttons::B);
        let readings = PadReadings {
            full_key: Some(pro),
            dual: Some(bogus),
            ..PadReadings::default()
        };
        assert_eq!(readings.resolve(), Some((pro, ControllerShape::FullPad)));

        let readings = PadReadings {
            handheld: Some(bogus),
            full_key: Some(pro),
            ..PadReadings::default()
        };
        assert_eq!(readings.resolve(), Some((bogus, ControllerShape::DockedPad)));
        assert_eq!(PadReadings::default().resolve(), None);
    }

    #[test]
    fn lone_halves_merge_into_one_pad() {
        let left = RawInputFrame::new(Buttons::ZL, StickPos::new(-300, 0), StickPos::new(9, 9));
        let right = RawInputFrame::new(
            Buttons::A | Buttons::STICK_R_UP,
            StickPos::new(9, 9),
            StickPos::new(0, 400),
        );
        let (frame, shape) = PadReadings {
            left: Some(left),
            right: Some(right),
            ..PadReadings::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(shape, ControllerShape::DualStickPad);
        assert_eq!(frame.buttons, Buttons::ZL | Buttons::A);
        assert_eq!(frame.stick_left, StickPos::new(-300, 0));
        assert_eq!(frame.stick_right, StickPos::new(0, 400));

        let (_, shape) = PadReadings {
            right: Some(right),
            ..PadReadings::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(shape, ControllerShape::SplitRight);
    }

    #[test]
    fn neutral_frame_detection() {
        assert!(RawInputFrame::default().is_neutral());
        let frame = RawInputFrame::new(Buttons::empty(), StickPos::new(0, 12), StickPos::CENTER);
        assert!(!frame.is_neutral());
    }
}

use crate::platform::PlayEventLog;

/// Kind of a play-event log record relevant to focus tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayEventKind {
    InFocus,
    OutOfFocus,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayEvent {
    pub program_id: u64,
    pub kind: PlayEventKind,
}

impl PlayEvent {
    pub fn new(program_id: u64, kind: PlayEventKind) -> Self {
        Self { program_id, kind }
    }
}

/// Result of a focus poll. `Unknown` means "no change observed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusState {
    InFocus,
    OutOfFocus,
    Unknown,
}

/// Events examined per poll.
const MAX_EVENTS_PER_POLL: usize = 10;

/// Update/DLC title ids share the base id except for the low 12 bits.
fn base_title(title_id: u64) -> u64 {
    title_id & !0xFFF
}

/// Follows the play-event log with a read cursor that only moves forward.
pub struct FocusTracker {
    title: Option<u64>,
    /// Index of the last event already consumed.
    cursor: Option<u32>,
    state: FocusState,
}

impl FocusTracker {
    pub fn new() -> Self {
        Self {
            title: None,
            cursor: None,
            state: FocusState::Unknown,
        }
    }

    /// Start tracking a new title. History before this point is skipped.
    pub fn reset(&mut self, log: &dyn PlayEventLog, title_id: u64) {
        self.title = Some(base_title(title_id));
        self.state = FocusState::Unknown;
        self.cursor = match log.latest_event_index() {
            Ok(latest) => latest,
            Err(e) => {
                log::debug!("Play-event range unavailable: {}", e);
                None
            }
        };
    }

    /// Report a focus transition for `title_id`, or `Unknown` if nothing changed.
    pub fn poll(&mut self, log: &dyn PlayEventLog, title_id: u64) -> FocusState {
        let title = base_title(title_id);
        if self.title != Some(title) {
            self.reset(log, title_id);
            return FocusState::Unknown;
        }

        let latest = match log.latest_event_index() {
            Ok(Some(latest)) => latest,
            Ok(None) => return FocusState::Unknown,
            Err(e) => {
                log::debug!("Play-event range unavailable: {}", e);
                return FocusState::Unknown;
            }
        };
        let next = self.cursor.map_or(0, |c| c + 1);
        if latest < next {
            return FocusState::Unknown;
        }

        // Only the newest window matters; older events are superseded.
        let start = next.max((latest + 1).saturating_sub(MAX_EVENTS_PER_POLL as u32));
        let events = log.query_events(start, MAX_EVENTS_PER_POLL);
        self.cursor = Some(latest);
        let events = match events {
            Ok(events) => events,
            Err(e) => {
                log::debug!("Play-event query failed: {}", e);
                return FocusState::Unknown;
            }
        };

        let Some(last) = events
            .iter()
            .rev()
            .find(|e| base_title(e.program_id) == title)
        else {
            return FocusState::Unknown;
        };

        let observed = match last.kind {
            PlayEventKind::InFocus => FocusState::InFocus,
            PlayEventKind::OutOfFocus => FocusState::OutOfFocus,
            PlayEventKind::Other => return FocusState::Unknown,
        };
        if observed == self.state {
            return FocusState::Unknown;
        }
        self.state = observed;
        observed
    }
}

impl Default for FocusTracker {
    fn default() -> Self {
        Self::new()
    }
}

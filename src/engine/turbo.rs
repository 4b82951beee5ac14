use crate::buttons::Buttons;
use crate::config::{ConfigStore, AUTOFIRE};
use crate::device::ControllerShape;
use crate::engine::{EngineEvent, ProcessResult};
use crate::error::{Result, TurboPadError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long a whitelisted button must be held before autofire kicks in when
/// `delay_start` is set. Shorter taps pass through untouched.
pub const DELAY_START_WINDOW: Duration = Duration::from_millis(200);

/// Time after a phase switch during which a raw read may still reflect the
/// previous injected state.
pub const RELEASE_SETTLE: Duration = Duration::from_millis(10);

/// Which half of a split pad autofire applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitHand {
    Left,
    Right,
}

/// Immutable autofire parameters. Replaced wholesale on reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurboConfig {
    pub whitelist: Buttons,
    pub press: Duration,
    pub release: Duration,
    pub delay_start: bool,
    pub split_hand: SplitHand,
}

impl TurboConfig {
    pub fn new(
        whitelist: Buttons,
        press: Duration,
        release: Duration,
        delay_start: bool,
        split_hand: SplitHand,
    ) -> Result<Self> {
        if press.is_zero() || release.is_zero() {
            return Err(TurboPadError::Config(format!(
                "autofire durations must be positive (press {:?}, release {:?})",
                press, release
            )));
        }
        Ok(Self {
            whitelist,
            press,
            release,
            delay_start,
            split_hand,
        })
    }

    /// Build from the `AUTOFIRE` section. `params` is whichever store the
    /// per-game `globconfig` switch selected; the split hand is always global.
    pub fn load(params: &dyn ConfigStore, global: &dyn ConfigStore) -> Result<Self> {
        let press = params.get_int(AUTOFIRE, "presstime", 100);
        let release = params.get_int(AUTOFIRE, "fireinterval", 100);
        let to_duration = |key: &str, ms: i64| {
            u64::try_from(ms)
                .map(Duration::from_millis)
                .map_err(|_| TurboPadError::Config(format!("AUTOFIRE.{} is negative: {}", key, ms)))
        };
        let split_hand = if global.get_bool(AUTOFIRE, "jc_right_hand", true) {
            SplitHand::Right
        } else {
            SplitHand::Left
        };
        Self::new(
            Buttons::mask(params.get_u64(AUTOFIRE, "buttons", 0)),
            to_duration("presstime", press)?,
            to_duration("fireinterval", release)?,
            params.get_bool(AUTOFIRE, "delaystart", true),
            split_hand,
        )
    }

    /// Whitelist restricted to what the current shape can autofire.
    pub fn whitelist_for(&self, shape: ControllerShape) -> Buttons {
        if !shape.is_split() {
            return self.whitelist;
        }
        let hand = match self.split_hand {
            SplitHand::Left => Buttons::LEFT_HALF,
            SplitHand::Right => Buttons::RIGHT_HALF,
        };
        self.whitelist & hand & shape.owned_buttons()
    }

    fn cycle(&self) -> Duration {
        self.press + self.release
    }

    fn settle(&self) -> Duration {
        RELEASE_SETTLE.min(self.press / 2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurboState {
    Inactive,
    /// Whitelisted button down, waiting out the delay-start window.
    Debouncing { since: Instant },
    Running { cycle_start: Instant, started: bool },
}

/// Press/release duty-cycle state machine over the whitelisted buttons.
pub struct TurboEngine {
    config: Arc<TurboConfig>,
    state: TurboState,
    /// Autofire buttons of the current activation. Kept across ticks where the
    /// raw read is blank because our own release pulse was read back.
    held: Buttons,
}

impl TurboEngine {
    pub fn new(config: Arc<TurboConfig>) -> Self {
        Self {
            config,
            state: TurboState::Inactive,
            held: Buttons::empty(),
        }
    }

    pub fn config(&self) -> &Arc<TurboConfig> {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TurboState::Running { .. })
    }

    /// Swap in a new snapshot. A running cycle restarts in the press phase.
    pub fn reconfigure(&mut self, config: Arc<TurboConfig>, now: Instant) {
        self.config = config;
        match self.state {
            TurboState::Running { started, .. } => {
                self.state = TurboState::Running {
                    cycle_start: now,
                    started,
                };
            }
            TurboState::Debouncing { .. } => self.state = TurboState::Inactive,
            TurboState::Inactive => {}
        }
    }

    /// Drop any activation without producing output.
    pub fn finish(&mut self) {
        self.state = TurboState::Inactive;
        self.held = Buttons::empty();
    }

    pub fn process(&mut self, result: &mut ProcessResult, shape: ControllerShape, now: Instant) {
        let whitelist = self.config.whitelist_for(shape);
        if whitelist.is_empty() {
            self.finish();
            result.passthrough(EngineEvent::Idle);
            return;
        }

        let autokey = result.buttons & whitelist;
        let normal = result.buttons.difference(whitelist);

        match self.state {
            TurboState::Inactive => {
                if autokey.is_empty() {
                    result.passthrough(EngineEvent::Idle);
                } else if self.config.delay_start {
                    self.state = TurboState::Debouncing { since: now };
                    result.passthrough(EngineEvent::Idle);
                } else {
                    self.begin(result, autokey, normal, now);
                }
            }
            TurboState::Debouncing { since } => {
                if autokey.is_empty() {
                    self.state = TurboState::Inactive;
                    result.passthrough(EngineEvent::Idle);
                } else if now.saturating_duration_since(since) >= DELAY_START_WINDOW {
                    self.begin(result, autokey, normal, now);
                } else {
                    result.passthrough(EngineEvent::Idle);
                }
            }
            TurboState::Running { cycle_start, .. } => {
                self.run(result, autokey, normal, cycle_start, now);
            }
        }
    }

    fn begin(
        &mut self,
        result: &mut ProcessResult,
        autokey: Buttons,
        normal: Buttons,
        now: Instant,
    ) {
        log::debug!("Autofire starting on {:?}", autokey);
        self.state = TurboState::Running {
            cycle_start: now,
            started: false,
        };
        self.held = autokey;
        self.run(result, autokey, normal, now, now);
    }

    fn run(
        &mut self,
        result: &mut ProcessResult,
        autokey: Buttons,
        normal: Buttons,
        cycle_start: Instant,
        now: Instant,
    ) {
        let config = &self.config;
        let elapsed = now.saturating_duration_since(cycle_start).as_nanos();
        let position = elapsed % config.cycle().as_nanos();
        let press = config.press.as_nanos();
        let pressed = position < press;
        let phase_elapsed = if pressed { position } else { position - press };
        let settled = phase_elapsed >= config.settle().as_nanos();

        // A blank read only means a real release while we are injecting a
        // press and that press has had time to land.
        if pressed && settled && autokey.is_empty() {
            log::debug!("Autofire released");
            self.finish();
            result.passthrough(EngineEvent::Finishing);
            return;
        }

        if !autokey.is_empty() {
            self.held = autokey;
        }
        let keys = self.held;

        let event = match self.state {
            TurboState::Running { started: false, .. } => {
                self.state = TurboState::Running {
                    cycle_start,
                    started: true,
                };
                EngineEvent::Starting
            }
            _ => EngineEvent::Executing,
        };

        result.event = event;
        if pressed {
            result.other_buttons = normal | keys;
            result.joycon_buttons = keys;
        } else {
            result.other_buttons = normal;
            result.joycon_buttons = Buttons::empty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RawInputFrame;

    fn config(whitelist: Buttons, press: u64, release: u64, delay_start: bool) -> Arc<TurboConfig> {
        Arc::new(
            TurboConfig::new(
                whitelist,
                Duration::from_millis(press),
                Duration::from_millis(release),
                delay_start,
                SplitHand::Right,
            )
            .unwrap(),
        )
    }

    fn tick(engine: &mut TurboEngine, buttons: Buttons, at: Instant) -> ProcessResult {
        let mut result = ProcessResult::from_frame(&RawInputFrame::from_buttons(buttons));
        engine.process(&mut result, ControllerShape::FullPad, at);
        result
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn rejects_zero_durations() {
        let err = TurboConfig::new(Buttons::A, ms(0), ms(50), false, SplitHand::Right);
        assert!(err.is_err());
        let err = TurboConfig::new(Buttons::A, ms(50), ms(0), false, SplitHand::Right);
        assert!(err.is_err());
    }

    #[test]
    fn empty_whitelist_is_always_idle() {
        let mut engine = TurboEngine::new(config(Buttons::empty(), 100, 50, false));
        let t0 = Instant::now();
        for i in 0..20 {
            let result = tick(&mut engine, Buttons::all(), t0 + ms(i));
            assert_eq!(result.event, EngineEvent::Idle);
            assert_eq!(result.other_buttons, Buttons::all());
        }
    }

    #[test]
    fn duty_cycle_matches_configuration() {
        let mut engine = TurboEngine::new(config(Buttons::A | Buttons::B, 100, 50, false));
        let t0 = Instant::now();
        let mut pressed = 0;
        // Three whole cycles, one tick per millisecond.
        for i in 0..450 {
            let result = tick(&mut engine, Buttons::A | Buttons::X, t0 + ms(i));
            assert!(result.other_buttons.contains(Buttons::X));
            if result.other_buttons.contains(Buttons::A) {
                pressed += 1;
            }
        }
        assert_eq!(pressed, 300);
    }

    #[test]
    fn phases_follow_absolute_time() {
        let mut engine = TurboEngine::new(config(Buttons::A, 100, 50, false));
        let t0 = Instant::now();
        assert_eq!(tick(&mut engine, Buttons::A, t0).event, EngineEvent::Starting);
        assert_eq!(tick(&mut engine, Buttons::A, t0 + ms(1)).event, EngineEvent::Executing);
        // Ticks can be skipped; the phase is derived from elapsed time.
        assert!(!tick(&mut engine, Buttons::A, t0 + ms(1020)).other_buttons.contains(Buttons::A));
        assert!(tick(&mut engine, Buttons::A, t0 + ms(1050)).other_buttons.contains(Buttons::A));
    }

    #[test]
    fn blank_reads_in_release_phase_do_not_finish() {
        let mut engine = TurboEngine::new(config(Buttons::A, 100, 50, false));
        let t0 = Instant::now();
        tick(&mut engine, Buttons::A, t0);
        for i in 100..150 {
            let result = tick(&mut engine, Buttons::empty(), t0 + ms(i));
            assert_eq!(result.event, EngineEvent::Executing);
            assert!(result.other_buttons.is_empty());
        }
        // Settle window after switching back to press.
        for i in 150..160 {
            let result = tick(&mut engine, Buttons::empty(), t0 + ms(i));
            assert_eq!(result.event, EngineEvent::Executing);
            assert_eq!(result.other_buttons, Buttons::A);
        }
        let result = tick(&mut engine, Buttons::empty(), t0 + ms(160));
        assert_eq!(result.event, EngineEvent::Finishing);
        assert!(!engine.is_active());
    }

    #[test]
    fn finishing_passes_raw_through() {
        let mut engine = TurboEngine::new(config(Buttons::A, 100, 50, false));
        let t0 = Instant::now();
        tick(&mut engine, Buttons::A, t0);
        let result = tick(&mut engine, Buttons::B, t0 + ms(20));
        assert_eq!(result.event, EngineEvent::Finishing);
        assert_eq!(result.other_buttons, Buttons::B);
        assert!(result.joycon_buttons.is_empty());
        assert_eq!(tick(&mut engine, Buttons::B, t0 + ms(21)).event, EngineEvent::Idle);
    }

    #[test]
    fn delay_start_ignores_short_taps() {
        let mut engine = TurboEngine::new(config(Buttons::A, 100, 50, true));
        let t0 = Instant::now();
        for i in 0..150 {
            let result = tick(&mut engine, Buttons::A, t0 + ms(i));
            assert_eq!(result.event, EngineEvent::Idle);
            assert_eq!(result.other_buttons, Buttons::A);
        }
        tick(&mut engine, Buttons::empty(), t0 + ms(150));
        // Fresh press: the window starts over.
        assert_eq!(tick(&mut engine, Buttons::A, t0 + ms(160)).event, EngineEvent::Idle);
        assert_eq!(tick(&mut engine, Buttons::A, t0 + ms(359)).event, EngineEvent::Idle);
        assert_eq!(tick(&mut engine, Buttons::A, t0 + ms(360)).event, EngineEvent::Starting);
    }

    #[test]
    fn reconfigure_restarts_in_press_phase() {
        let mut engine = TurboEngine::new(config(Buttons::A, 100, 50, false));
        let t0 = Instant::now();
        tick(&mut engine, Buttons::A, t0);
        assert!(!tick(&mut engine, Buttons::A, t0 + ms(120)).other_buttons.contains(Buttons::A));

        engine.reconfigure(config(Buttons::A, 40, 40, false), t0 + ms(121));
        let result = tick(&mut engine, Buttons::A, t0 + ms(121));
        assert_eq!(result.event, EngineEvent::Executing);
        assert!(result.other_buttons.contains(Buttons::A));
        assert!(!tick(&mut engine, Buttons::A, t0 + ms(161)).other_buttons.contains(Buttons::A));
    }

    #[test]
    fn split_pads_only_fire_the_configured_hand() {
        let cfg = config(Buttons::A | Buttons::ZL, 100, 50, false);
        assert_eq!(cfg.whitelist_for(ControllerShape::FullPad), Buttons::A | Buttons::ZL);
        assert_eq!(cfg.whitelist_for(ControllerShape::DualStickPad), Buttons::A);
        assert_eq!(cfg.whitelist_for(ControllerShape::SplitRight), Buttons::A);
        assert_eq!(cfg.whitelist_for(ControllerShape::SplitLeft), Buttons::empty());
    }

    #[test]
    fn split_output_carries_only_the_pulse() {
        let mut engine = TurboEngine::new(config(Buttons::A, 100, 50, false));
        let t0 = Instant::now();
        let frame = RawInputFrame::from_buttons(Buttons::A | Buttons::B);
        let mut result = ProcessResult::from_frame(&frame);
        engine.process(&mut result, ControllerShape::DualStickPad, t0);
        assert_eq!(result.joycon_buttons, Buttons::A);
        assert_eq!(result.other_buttons, Buttons::A | Buttons::B);
    }
}

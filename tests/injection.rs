use std::sync::Arc;
use std::time::{Duration, Instant};
use turbopad_lib::buttons::{Buttons, StickPos};
use turbopad_lib::device::{ControllerShape, DeviceSide, PadReadings, RawInputFrame, VirtualEntry};
use turbopad_lib::engine::{
    EngineEvent, MacroEntry, MacroSet, RemapTable, SplitHand, TurboConfig,
};
use turbopad_lib::input_loop::{EngineSettings, Injector, InputLoop};
use turbopad_lib::macros::sampler::{MacroSampler, DEFAULT_STOP_COMBO};
use turbopad_lib::macros::{MacroFile, MacroFrame};
use turbopad_lib::platform::SimPlatform;

const FULL: u64 = 1;
const LEFT: u64 = 2;
const RIGHT: u64 = 3;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn turbo(whitelist: Buttons) -> Arc<TurboConfig> {
    Arc::new(TurboConfig::new(whitelist, ms(100), ms(50), false, SplitHand::Right).unwrap())
}

fn turbo_settings(whitelist: Buttons) -> EngineSettings {
    EngineSettings {
        turbo: Some(turbo(whitelist)),
        ..EngineSettings::default()
    }
}

fn sim_with_entries(entries: &[(u64, DeviceSide)]) -> Arc<SimPlatform> {
    let sim = Arc::new(SimPlatform::new());
    sim.set_entries(
        entries
            .iter()
            .map(|&(device_id, side)| VirtualEntry { device_id, side })
            .collect(),
    );
    sim
}

fn full_buttons(sim: &SimPlatform) -> Buttons {
    sim.last_published()
        .and_then(|list| list.state_for(FULL).copied())
        .map(|state| state.buttons)
        .unwrap_or_default()
}

#[test]
fn idle_ticks_publish_nothing() {
    let sim = sim_with_entries(&[(FULL, DeviceSide::Full)]);
    sim.set_input(RawInputFrame::from_buttons(Buttons::B), ControllerShape::FullPad);
    let mut injector = Injector::new(sim.clone(), turbo_settings(Buttons::A));

    let t0 = Instant::now();
    for i in 0..20 {
        let outcome = injector.tick(t0 + ms(i)).unwrap();
        assert_eq!(outcome.event, EngineEvent::Idle);
        assert!(!outcome.published);
    }
    assert!(sim.published().is_empty());
    assert!(sim.is_attached());
}

#[test]
fn autofire_pulses_reach_full_entries() {
    let sim = sim_with_entries(&[(FULL, DeviceSide::Full)]);
    sim.set_input(
        RawInputFrame::from_buttons(Buttons::A | Buttons::X),
        ControllerShape::FullPad,
    );
    let mut injector = Injector::new(sim.clone(), turbo_settings(Buttons::A | Buttons::B));

    let t0 = Instant::now();
    let outcome = injector.tick(t0).unwrap();
    assert_eq!(outcome.event, EngineEvent::Starting);
    assert!(outcome.published);
    assert_eq!(full_buttons(&sim), Buttons::A | Buttons::X);

    injector.tick(t0 + ms(120)).unwrap();
    assert_eq!(full_buttons(&sim), Buttons::X);

    injector.tick(t0 + ms(150)).unwrap();
    assert_eq!(full_buttons(&sim), Buttons::A | Buttons::X);

    // Every tick of an activation is one whole-list publish.
    assert_eq!(sim.published().len(), 3);
    assert!(sim.published().iter().all(|list| list.entries.len() == 1));
}

#[test]
fn duty_cycle_over_whole_cycles() {
    let sim = sim_with_entries(&[(FULL, DeviceSide::Full)]);
    sim.set_input(RawInputFrame::from_buttons(Buttons::A), ControllerShape::FullPad);
    let mut injector = Injector::new(sim.clone(), turbo_settings(Buttons::A | Buttons::B));

    let t0 = Instant::now();
    let mut pressed = 0;
    for i in 0..450 {
        injector.tick(t0 + ms(i)).unwrap();
        if full_buttons(&sim).contains(Buttons::A) {
            pressed += 1;
        }
    }
    // 100 ms on / 50 ms off.
    assert_eq!(pressed, 300);
}

#[test]
fn split_entries_get_their_own_half() {
    let sim = sim_with_entries(&[(LEFT, DeviceSide::Left), (RIGHT, DeviceSide::Right)]);
    sim.set_input(
        RawInputFrame::new(
            Buttons::A | Buttons::ZL | Buttons::UP,
            StickPos::new(5, 5),
            StickPos::new(7, -7),
        ),
        ControllerShape::DualStickPad,
    );
    let mut injector = Injector::new(sim.clone(), turbo_settings(Buttons::A | Buttons::ZL));
    injector.tick(Instant::now()).unwrap();

    let list = sim.last_published().unwrap();
    let left = list.state_for(LEFT).unwrap();
    let right = list.state_for(RIGHT).unwrap();
    // Right hand fires; held left-half buttons are not echoed.
    assert_eq!(right.buttons, Buttons::A);
    assert_eq!(right.stick_right, StickPos::new(7, -7));
    assert_eq!(right.stick_left, StickPos::CENTER);
    assert!(left.buttons.is_empty());
    assert_eq!(left.stick_left, StickPos::new(5, 5));
    assert_eq!(left.stick_right, StickPos::CENTER);
}

#[test]
fn lone_right_half_only_fires_its_own_buttons() {
    let sim = sim_with_entries(&[(RIGHT, DeviceSide::Right)]);
    sim.set_readings(PadReadings {
        right: Some(RawInputFrame::from_buttons(Buttons::A | Buttons::ZR)),
        ..PadReadings::default()
    });
    let mut injector = Injector::new(sim.clone(), turbo_settings(Buttons::ZR | Buttons::ZL));

    let t0 = Instant::now();
    injector.tick(t0).unwrap();
    let right = *sim.last_published().unwrap().state_for(RIGHT).unwrap();
    assert_eq!(right.buttons, Buttons::ZR);
    injector.tick(t0 + ms(120)).unwrap();
    let right = *sim.last_published().unwrap().state_for(RIGHT).unwrap();
    assert!(right.buttons.is_empty());
}

#[test]
fn macro_takes_priority_over_autofire() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("combo.macro");
    MacroFile::new_v2(
        1,
        120,
        vec![MacroFrame {
            duration_ms: 500,
            buttons: Buttons::B,
            stick_left: StickPos::new(0, 100),
            stick_right: StickPos::CENTER,
        }],
    )
    .save(&path)
    .unwrap();
    let hotkey = Buttons::ZL | Buttons::ZR;
    let macros = MacroSet::new(vec![MacroEntry { path, hotkey }]).unwrap();

    let sim = sim_with_entries(&[(FULL, DeviceSide::Full)]);
    let settings = EngineSettings {
        turbo: Some(turbo(Buttons::A)),
        macros: Some(Arc::new(macros)),
        ..EngineSettings::default()
    };
    let mut injector = Injector::new(sim.clone(), settings);

    let t0 = Instant::now();
    sim.set_input(RawInputFrame::from_buttons(Buttons::A), ControllerShape::FullPad);
    assert_eq!(injector.tick(t0).unwrap().event, EngineEvent::Starting);

    sim.set_input(
        RawInputFrame::from_buttons(Buttons::A | hotkey),
        ControllerShape::FullPad,
    );
    assert_eq!(injector.tick(t0 + ms(5)).unwrap().event, EngineEvent::Starting);
    let state = *sim.last_published().unwrap().state_for(FULL).unwrap();
    assert_eq!(state.buttons, Buttons::B);
    assert_eq!(state.stick_left, StickPos::new(0, 100));

    // Autofire stays out of the way for the whole playback.
    for i in 1..10 {
        let outcome = injector.tick(t0 + ms(5 + i * 10)).unwrap();
        assert_eq!(outcome.event, EngineEvent::Executing);
        assert_eq!(full_buttons(&sim), Buttons::B);
    }
}

#[test]
fn recorded_macro_replays_what_the_game_saw() {
    let dir = tempfile::tempdir().unwrap();
    let remap = Arc::new(RemapTable::new([
        (Buttons::ZR, Buttons::A),
        (Buttons::A, Buttons::ZR),
    ]));
    let sim = sim_with_entries(&[(FULL, DeviceSide::Full)]);
    // Physical ZR, delivered to the game as A.
    sim.set_input(RawInputFrame::from_buttons(Buttons::A), ControllerShape::FullPad);

    let sampler = MacroSampler::prepare(
        sim.clone(),
        1,
        dir.path().to_path_buf(),
        DEFAULT_STOP_COMBO,
        Some(remap.clone()),
    )
    .unwrap();
    sampler.start();
    std::thread::sleep(ms(60));
    let path = sampler.stop().unwrap().unwrap();

    let hotkey = Buttons::L | Buttons::R;
    let macros = MacroSet::new(vec![MacroEntry { path, hotkey }]).unwrap();
    let settings = EngineSettings {
        macros: Some(Arc::new(macros)),
        remap: Some(remap),
        ..EngineSettings::default()
    };
    let mut injector = Injector::new(sim.clone(), settings);
    sim.set_input(RawInputFrame::from_buttons(hotkey), ControllerShape::FullPad);
    assert_eq!(injector.tick(Instant::now()).unwrap().event, EngineEvent::Starting);
    assert_eq!(full_buttons(&sim), Buttons::A);
}

#[test]
fn hardware_remap_is_undone_before_autofire() {
    let sim = sim_with_entries(&[(FULL, DeviceSide::Full)]);
    // ZR is mapped onto A at the hardware layer, so pressing ZR reads as A.
    sim.set_input(RawInputFrame::from_buttons(Buttons::A), ControllerShape::FullPad);
    let remap = Arc::new(RemapTable::new([(Buttons::ZR, Buttons::A)]));

    let settings = EngineSettings {
        turbo: Some(turbo(Buttons::A)),
        remap: Some(remap.clone()),
        ..EngineSettings::default()
    };
    let mut injector = Injector::new(sim.clone(), settings);
    let outcome = injector.tick(Instant::now()).unwrap();
    assert_eq!(outcome.event, EngineEvent::Idle);

    let settings = EngineSettings {
        turbo: Some(turbo(Buttons::ZR)),
        remap: Some(remap),
        ..EngineSettings::default()
    };
    let mut injector = Injector::new(sim.clone(), settings);
    let t0 = Instant::now();
    assert_eq!(injector.tick(t0).unwrap().event, EngineEvent::Starting);
    // Output goes back through the mapping.
    assert_eq!(full_buttons(&sim), Buttons::A);
    injector.tick(t0 + ms(110)).unwrap();
    assert!(full_buttons(&sim).is_empty());
}

#[test]
fn pause_finishes_and_resume_restarts() {
    let sim = sim_with_entries(&[(FULL, DeviceSide::Full)]);
    sim.set_input(RawInputFrame::from_buttons(Buttons::A), ControllerShape::FullPad);
    let settings = turbo_settings(Buttons::A);
    let mut injector = Injector::new(sim.clone(), settings.clone());

    let t0 = Instant::now();
    injector.tick(t0).unwrap();
    injector.apply_settings(
        EngineSettings {
            paused: true,
            ..settings.clone()
        },
        t0 + ms(10),
    );
    let published = sim.published().len();
    let outcome = injector.tick(t0 + ms(10)).unwrap();
    assert_eq!(outcome.event, EngineEvent::Paused);
    assert_eq!(sim.published().len(), published);

    injector.apply_settings(settings, t0 + ms(20));
    assert_eq!(injector.tick(t0 + ms(20)).unwrap().event, EngineEvent::Starting);
}

#[test]
fn new_snapshot_resets_phase_same_snapshot_does_not() {
    let sim = sim_with_entries(&[(FULL, DeviceSide::Full)]);
    sim.set_input(RawInputFrame::from_buttons(Buttons::A), ControllerShape::FullPad);
    let settings = turbo_settings(Buttons::A);
    let mut injector = Injector::new(sim.clone(), settings.clone());

    let t0 = Instant::now();
    injector.tick(t0).unwrap();
    injector.apply_settings(settings.clone(), t0 + ms(120));
    injector.tick(t0 + ms(120)).unwrap();
    assert!(full_buttons(&sim).is_empty());

    injector.apply_settings(turbo_settings(Buttons::A), t0 + ms(121));
    let outcome = injector.tick(t0 + ms(121)).unwrap();
    assert_eq!(outcome.event, EngineEvent::Executing);
    assert_eq!(full_buttons(&sim), Buttons::A);
}

#[test]
fn session_failures_are_retried() {
    let sim = sim_with_entries(&[(FULL, DeviceSide::Full)]);
    sim.set_input(RawInputFrame::from_buttons(Buttons::A), ControllerShape::FullPad);
    sim.fail_next_attaches(1);
    let mut injector = Injector::new(sim.clone(), turbo_settings(Buttons::A));

    let t0 = Instant::now();
    assert!(injector.tick(t0).is_err());
    injector.reset_session();
    assert!(injector.tick(t0 + ms(1)).unwrap().published);

    sim.set_fail_apply(true);
    assert!(injector.tick(t0 + ms(2)).is_err());
    injector.reset_session();
    sim.set_fail_apply(false);
    // Entries are enumerated again after the session is rebuilt.
    assert!(injector.tick(t0 + ms(3)).unwrap().published);
}

#[test]
fn disconnected_pad_is_idle() {
    let sim = sim_with_entries(&[(FULL, DeviceSide::Full)]);
    let mut injector = Injector::new(sim.clone(), turbo_settings(Buttons::A));
    let outcome = injector.tick(Instant::now()).unwrap();
    assert_eq!(outcome.event, EngineEvent::Idle);
    assert!(sim.published().is_empty());
}

#[test]
fn loop_thread_publishes_and_detaches_on_stop() {
    let sim = sim_with_entries(&[(FULL, DeviceSide::Full)]);
    sim.set_input(RawInputFrame::from_buttons(Buttons::A), ControllerShape::FullPad);

    let mut input_loop = InputLoop::new();
    input_loop.start(sim.clone(), turbo_settings(Buttons::A)).unwrap();
    assert!(input_loop.is_running());

    let deadline = Instant::now() + Duration::from_secs(5);
    while sim.published().is_empty() && Instant::now() < deadline {
        std::thread::sleep(ms(5));
    }
    assert!(!sim.published().is_empty());

    input_loop.update(EngineSettings {
        paused: true,
        ..turbo_settings(Buttons::A)
    });
    std::thread::sleep(ms(50));
    input_loop.stop();
    assert!(!input_loop.is_running());
    assert!(!sim.is_attached());
}

use crate::buttons::Buttons;
use crate::config::{ConfigStore, MACRO};
use crate::engine::{EngineEvent, ProcessResult};
use crate::error::{Result, TurboPadError};
use crate::macros::{MacroFile, MacroFrame};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A macro file bound to the button combination that plays it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroEntry {
    pub path: PathBuf,
    pub hotkey: Buttons,
}

/// A game's macro bindings, in configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroSet {
    entries: Vec<MacroEntry>,
}

impl MacroSet {
    pub fn new(entries: Vec<MacroEntry>) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.hotkey.is_empty() {
                return Err(TurboPadError::Config(format!(
                    "macro {} has no hotkey",
                    entry.path.display()
                )));
            }
            if entries[..i].iter().any(|e| e.hotkey == entry.hotkey) {
                return Err(TurboPadError::Config(format!(
                    "hotkey {:?} bound to more than one macro",
                    entry.hotkey
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Read `macroCount`, `macro_path_<n>` and `macro_combo_<n>` from the
    /// game's own store. Relative paths resolve against `macro_dir`.
    pub fn load(store: &dyn ConfigStore, macro_dir: &Path) -> Result<Self> {
        let count = store.get_int(MACRO, "macroCount", 0).max(0);
        let mut entries = Vec::with_capacity(count as usize);
        for n in 1..=count {
            let path = store
                .get(MACRO, &format!("macro_path_{}", n))
                .ok_or_else(|| TurboPadError::Config(format!("MACRO.macro_path_{} missing", n)))?;
            let hotkey = Buttons::mask(store.get_u64(MACRO, &format!("macro_combo_{}", n), 0));
            entries.push(MacroEntry {
                path: macro_dir.join(path),
                hotkey,
            });
        }
        Self::new(entries)
    }

    pub fn entries(&self) -> &[MacroEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct Playback {
    hotkey: Buttons,
    frames: Vec<MacroFrame>,
    /// End offset of each frame from `started`.
    timeline: Vec<Duration>,
    started: Instant,
    cursor: usize,
}

impl Playback {
    fn open(entry: &MacroEntry, now: Instant) -> Result<Self> {
        let file = MacroFile::load(&entry.path)?;
        let timeline = file.timeline();
        if timeline.last().map_or(true, |end| end.is_zero()) {
            return Err(TurboPadError::MacroFormat(format!(
                "{} has no playable frames",
                entry.path.display()
            )));
        }
        Ok(Self {
            hotkey: entry.hotkey,
            frames: file.frames,
            timeline,
            started: now,
            cursor: 0,
        })
    }

    /// Frame due at `now`, or `None` once the last frame has run out.
    fn advance(&mut self, now: Instant) -> Option<&MacroFrame> {
        let elapsed = now.saturating_duration_since(self.started);
        while self.cursor < self.timeline.len() && self.timeline[self.cursor] <= elapsed {
            self.cursor += 1;
        }
        self.frames.get(self.cursor)
    }
}

/// Hotkey-triggered playback. Frames are held in memory only while playing.
pub struct MacroEngine {
    set: Arc<MacroSet>,
    playback: Option<Playback>,
    previous: Buttons,
}

impl MacroEngine {
    pub fn new(set: Arc<MacroSet>) -> Self {
        Self {
            set,
            playback: None,
            previous: Buttons::empty(),
        }
    }

    pub fn set(&self) -> &Arc<MacroSet> {
        &self.set
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_some()
    }

    /// Swap bindings. A macro already playing runs to completion.
    pub fn reconfigure(&mut self, set: Arc<MacroSet>) {
        self.set = set;
    }

    pub fn finish(&mut self) {
        self.playback = None;
    }

    /// Playback starts on the tick where a binding's full hotkey combo goes
    /// from not held to held. Pressing the same combo again stops it; holding
    /// it never retriggers.
    pub fn process(&mut self, result: &mut ProcessResult, now: Instant) {
        let raw = result.buttons;
        let previous = std::mem::replace(&mut self.previous, raw);
        let pressed = |combo: Buttons| raw.contains(combo) && !previous.contains(combo);

        let stop_requested = self.playback.as_ref().map(|p| pressed(p.hotkey));
        let event = match stop_requested {
            None => {
                let Some(entry) = self.set.entries.iter().find(|e| pressed(e.hotkey)) else {
                    result.passthrough(EngineEvent::Idle);
                    return;
                };
                match Playback::open(entry, now) {
                    Ok(playback) => {
                        log::info!("Playing macro {}", entry.path.display());
                        self.playback = Some(playback);
                        EngineEvent::Starting
                    }
                    Err(e) => {
                        log::warn!("Cannot play macro: {}", e);
                        result.passthrough(EngineEvent::Idle);
                        return;
                    }
                }
            }
            Some(true) => {
                log::info!("Macro stopped by hotkey");
                self.finish();
                result.passthrough(EngineEvent::Finishing);
                return;
            }
            Some(false) => EngineEvent::Executing,
        };

        let frame = self.playback.as_mut().and_then(|p| p.advance(now)).copied();
        match frame {
            Some(frame) => {
                result.event = event;
                result.other_buttons = frame.buttons;
                result.joycon_buttons = frame.buttons;
                result.stick_left = frame.stick_left;
                result.stick_right = frame.stick_right;
            }
            None => {
                log::debug!("Macro finished");
                self.finish();
                result.passthrough(EngineEvent::Finishing);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buttons::StickPos;
    use crate::config::JsonConfigStore;
    use crate::device::RawInputFrame;

    const HOTKEY: Buttons = Buttons::from_bits_retain(Buttons::ZL.bits() | Buttons::ZR.bits());

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn frame(duration_ms: u32, buttons: Buttons) -> MacroFrame {
        MacroFrame {
            duration_ms,
            buttons,
            stick_left: StickPos::new(100, -100),
            stick_right: StickPos::CENTER,
        }
    }

    fn engine_with(dir: &Path, frames: Vec<MacroFrame>) -> MacroEngine {
        let path = dir.join("m.macro");
        MacroFile::new_v2(1, 120, frames).save(&path).unwrap();
        let set = MacroSet::new(vec![MacroEntry { path, hotkey: HOTKEY }]).unwrap();
        MacroEngine::new(Arc::new(set))
    }

    fn tick(engine: &mut MacroEngine, buttons: Buttons, at: Instant) -> ProcessResult {
        let mut result = ProcessResult::from_frame(&RawInputFrame::from_buttons(buttons));
        engine.process(&mut result, at);
        result
    }

    #[test]
    fn rejects_duplicate_and_empty_hotkeys() {
        let entry = |hotkey| MacroEntry {
            path: PathBuf::from("a.macro"),
            hotkey,
        };
        assert!(MacroSet::new(vec![entry(HOTKEY), entry(Buttons::A)]).is_ok());
        assert!(MacroSet::new(vec![entry(HOTKEY), entry(HOTKEY)]).is_err());
        assert!(MacroSet::new(vec![entry(Buttons::empty())]).is_err());
    }

    #[test]
    fn loads_entries_in_order() {
        let store = JsonConfigStore::in_memory();
        store.set(MACRO, "macroCount", "2").unwrap();
        store.set(MACRO, "macro_path_1", "one.macro").unwrap();
        store.set(MACRO, "macro_combo_1", &HOTKEY.bits().to_string()).unwrap();
        store.set(MACRO, "macro_path_2", "/abs/two.macro").unwrap();
        store.set(MACRO, "macro_combo_2", "1").unwrap();
        let set = MacroSet::load(&store, Path::new("/m")).unwrap();
        assert_eq!(set.entries()[0].path, PathBuf::from("/m/one.macro"));
        assert_eq!(set.entries()[1].path, PathBuf::from("/abs/two.macro"));
        assert_eq!(set.entries()[1].hotkey, Buttons::A);

        store.set(MACRO, "macroCount", "3").unwrap();
        assert!(MacroSet::load(&store, Path::new("/m")).is_err());
    }

    #[test]
    fn plays_frames_by_elapsed_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(
            dir.path(),
            vec![frame(200, Buttons::A), frame(0, Buttons::X), frame(300, Buttons::B)],
        );
        let t0 = Instant::now();
        assert_eq!(tick(&mut engine, Buttons::ZL, t0).event, EngineEvent::Idle);

        let start = tick(&mut engine, HOTKEY, t0 + ms(1));
        assert_eq!(start.event, EngineEvent::Starting);
        assert_eq!(start.other_buttons, Buttons::A);
        assert_eq!(start.joycon_buttons, Buttons::A);
        assert_eq!(start.stick_left, StickPos::new(100, -100));

        let held = tick(&mut engine, HOTKEY, t0 + ms(150));
        assert_eq!(held.event, EngineEvent::Executing);
        assert_eq!(held.other_buttons, Buttons::A);

        // The zero-length frame is never shown.
        let later = tick(&mut engine, Buttons::empty(), t0 + ms(201));
        assert_eq!(later.other_buttons, Buttons::B);

        let end = tick(&mut engine, Buttons::Y, t0 + ms(501));
        assert_eq!(end.event, EngineEvent::Finishing);
        assert_eq!(end.other_buttons, Buttons::Y);
        assert!(!engine.is_playing());
        assert_eq!(tick(&mut engine, Buttons::Y, t0 + ms(502)).event, EngineEvent::Idle);
    }

    #[test]
    fn hotkey_edge_stops_playback() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(dir.path(), vec![frame(1000, Buttons::A)]);
        let t0 = Instant::now();
        tick(&mut engine, HOTKEY, t0);
        // Still held from the start press: no new edge.
        assert_eq!(tick(&mut engine, HOTKEY, t0 + ms(10)).event, EngineEvent::Executing);
        tick(&mut engine, Buttons::empty(), t0 + ms(20));
        let stop = tick(&mut engine, HOTKEY, t0 + ms(30));
        assert_eq!(stop.event, EngineEvent::Finishing);
        assert_eq!(stop.other_buttons, HOTKEY);
        // Holding after the stop does not restart.
        assert_eq!(tick(&mut engine, HOTKEY, t0 + ms(40)).event, EngineEvent::Idle);
    }

    #[test]
    fn broken_file_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.macro");
        std::fs::write(&path, b"NOPE").unwrap();
        let set = MacroSet::new(vec![MacroEntry { path, hotkey: HOTKEY }]).unwrap();
        let mut engine = MacroEngine::new(Arc::new(set));
        let result = tick(&mut engine, HOTKEY, Instant::now());
        assert_eq!(result.event, EngineEvent::Idle);
        assert_eq!(result.other_buttons, HOTKEY);
        assert!(!engine.is_playing());
    }

    #[test]
    fn v1_files_use_frame_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v1.macro");
        let mut file = MacroFile::new_v2(1, 10, vec![frame(0, Buttons::A), frame(0, Buttons::B)]);
        file.header.version = crate::macros::MacroVersion::V1;
        file.save(&path).unwrap();
        let set = MacroSet::new(vec![MacroEntry { path, hotkey: HOTKEY }]).unwrap();
        let mut engine = MacroEngine::new(Arc::new(set));
        let t0 = Instant::now();
        assert_eq!(tick(&mut engine, HOTKEY, t0).other_buttons, Buttons::A);
        assert_eq!(tick(&mut engine, HOTKEY, t0 + ms(99)).other_buttons, Buttons::A);
        assert_eq!(tick(&mut engine, HOTKEY, t0 + ms(100)).other_buttons, Buttons::B);
        assert_eq!(tick(&mut engine, HOTKEY, t0 + ms(200)).event, EngineEvent::Finishing);
    }
}

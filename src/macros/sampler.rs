use crate::buttons::Buttons;
use crate::device::RawInputFrame;
use crate::engine::{RemapEngine, RemapTable};
use crate::error::{Result, TurboPadError};
use crate::macros::{push_sample, MacroFile, MacroFrame};
use crate::platform::PlatformServices;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// ~120 Hz.
pub const SAMPLE_INTERVAL: Duration = Duration::from_nanos(8_333_333);

pub const MAX_RECORDING: Duration = Duration::from_secs(30);

/// Default combination that ends a recording.
pub const DEFAULT_STOP_COMBO: Buttons =
    Buttons::from_bits_retain(Buttons::MINUS.bits() | Buttons::PLUS.bits());

const IDLE_POLL: Duration = Duration::from_millis(10);

/// Samples collected so far. Pure data: time is passed in by the caller.
pub struct Recording {
    title_id: u64,
    frames: Vec<MacroFrame>,
    started: Instant,
    last_ms: u128,
    samples: u32,
}

impl Recording {
    pub fn new(title_id: u64, now: Instant) -> Self {
        let capacity = (MAX_RECORDING.as_nanos() / SAMPLE_INTERVAL.as_nanos()) as usize + 1;
        Self {
            title_id,
            frames: Vec::with_capacity(capacity),
            started: now,
            last_ms: 0,
            samples: 0,
        }
    }

    /// Append one sample. Its duration is the time since the previous sample,
    /// computed on absolute offsets so rounding never accumulates.
    pub fn sample(&mut self, frame: &RawInputFrame, now: Instant) {
        let frame = frame.without_pseudo_buttons();
        let elapsed_ms = now.saturating_duration_since(self.started).as_millis();
        let duration_ms = elapsed_ms.saturating_sub(self.last_ms) as u32;
        self.last_ms = elapsed_ms;
        self.samples += 1;
        push_sample(
            &mut self.frames,
            MacroFrame {
                duration_ms,
                buttons: frame.buttons,
                stick_left: frame.stick_left,
                stick_right: frame.stick_right,
            },
        );
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= MAX_RECORDING
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Trim the stop combo and trailing idle time, then build the file.
    /// `None` when nothing but neutral input remains.
    pub fn finish(mut self, stop_combo: Buttons) -> Option<MacroFile> {
        while self
            .frames
            .last()
            .is_some_and(|f| f.buttons.intersects(stop_combo))
        {
            self.frames.pop();
        }
        while self.frames.last().is_some_and(MacroFrame::is_neutral) {
            self.frames.pop();
        }
        if self.frames.is_empty() {
            return None;
        }
        let frame_rate = if self.last_ms == 0 {
            0
        } else {
            (self.samples as u128 * 1000 / self.last_ms).min(u16::MAX as u128) as u16
        };
        Some(MacroFile::new_v2(self.title_id, frame_rate, self.frames))
    }
}

/// First free `MMDD_HH_MM_SS.macro` name in `dir`, with `_<n>` on collision.
pub fn unique_macro_path(dir: &Path, time: NaiveDateTime) -> PathBuf {
    let stem = time.format("%m%d_%H_%M_%S").to_string();
    let mut path = dir.join(format!("{}.macro", stem));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.macro", stem, n));
        n += 1;
    }
    path
}

const PREPARED: u8 = 0;
const RECORDING: u8 = 1;
const STOP: u8 = 2;
const CANCEL: u8 = 3;

/// Background recorder for one title.
///
/// `prepare` spawns the sampling thread idle; `start` begins sampling. The
/// thread ends by itself when the stop combo is pressed or the cap is hit and
/// saves the file; `stop` does the same on request, `cancel` discards.
///
/// Reads are stored as physical input: with a hardware remap active, each
/// sample is mapped back through `remap` so playback can apply it forward.
pub struct MacroSampler {
    control: Arc<AtomicU8>,
    thread_handle: Option<JoinHandle<Result<Option<PathBuf>>>>,
}

impl MacroSampler {
    pub fn prepare(
        platform: Arc<dyn PlatformServices>,
        title_id: u64,
        dir: PathBuf,
        stop_combo: Buttons,
        remap: Option<Arc<RemapTable>>,
    ) -> Result<Self> {
        let control = Arc::new(AtomicU8::new(PREPARED));
        let thread_control = control.clone();
        let handle = std::thread::Builder::new()
            .name("turbopad-sampler".into())
            .spawn(move || {
                let remap = remap.map(RemapEngine::new);
                sampler_loop(
                    &*platform,
                    &thread_control,
                    title_id,
                    &dir,
                    stop_combo,
                    remap.as_ref(),
                )
            })?;
        Ok(Self {
            control,
            thread_handle: Some(handle),
        })
    }

    pub fn start(&self) {
        let _ = self
            .control
            .compare_exchange(PREPARED, RECORDING, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Whether the sampling thread has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Stop sampling and save. Returns the written path, or `None` if the
    /// recording held no input.
    pub fn stop(mut self) -> Result<Option<PathBuf>> {
        self.control.store(STOP, Ordering::SeqCst);
        self.join()
    }

    pub fn cancel(mut self) {
        self.control.store(CANCEL, Ordering::SeqCst);
        if let Err(e) = self.join() {
            log::debug!("Cancelled recording ended with error: {}", e);
        }
    }

    fn join(&mut self) -> Result<Option<PathBuf>> {
        match self.thread_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| TurboPadError::Platform("sampler thread panicked".into()))?,
            None => Ok(None),
        }
    }
}

impl Drop for MacroSampler {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.control.store(CANCEL, Ordering::SeqCst);
            let _ = self.join();
        }
    }
}

fn sampler_loop(
    platform: &dyn PlatformServices,
    control: &AtomicU8,
    title_id: u64,
    dir: &Path,
    stop_combo: Buttons,
    remap: Option<&RemapEngine>,
) -> Result<Option<PathBuf>> {
    let mut recording: Option<Recording> = None;
    // The combo only counts once it has been seen released, so a combo still
    // held from the start request does not end the recording at once.
    let mut armed = false;
    let mut next_sample = Instant::now();

    loop {
        match control.load(Ordering::SeqCst) {
            CANCEL => {
                log::info!("Recording cancelled");
                return Ok(None);
            }
            STOP => break,
            RECORDING => {}
            _ => {
                std::thread::sleep(IDLE_POLL);
                continue;
            }
        }

        let now = Instant::now();
        let rec = recording.get_or_insert_with(|| {
            log::info!("Recording macro for {:016X}", title_id);
            next_sample = now;
            Recording::new(title_id, now)
        });

        match platform.read_frame() {
            Ok(Some((mut frame, shape))) => {
                if let Some(remap) = remap {
                    frame.buttons = remap.reverse(frame.buttons, shape.owned_buttons());
                }
                rec.sample(&frame, now);
                let combo_held = frame.buttons.contains(stop_combo);
                if armed && combo_held {
                    log::info!("Stop combo pressed");
                    break;
                }
                armed |= !combo_held;
            }
            Ok(None) => rec.sample(&RawInputFrame::default(), now),
            Err(e) => log::debug!("Sampler read failed: {}", e),
        }

        if rec.is_expired(now) {
            log::info!("Recording reached {:?} cap", MAX_RECORDING);
            break;
        }

        next_sample += SAMPLE_INTERVAL;
        let now = Instant::now();
        if next_sample > now {
            std::thread::sleep(next_sample - now);
        } else {
            next_sample = now;
        }
    }

    let Some(file) = recording.and_then(|rec| rec.finish(stop_combo)) else {
        log::info!("Recording held no input; nothing saved");
        return Ok(None);
    };
    let path = unique_macro_path(dir, chrono::Local::now().naive_local());
    file.save(&path)?;
    log::info!(
        "Saved macro {} ({} frames, {:?})",
        path.display(),
        file.frames.len(),
        file.total_duration()
    );
    Ok(Some(path))
}

//! Macro file format.
//!
//! Little-endian binary: a 20-byte header followed by `frame_count` fixed-size
//! frame records.
//!
//! ```text
//! header  magic[4] "KEYX" | version u16 | frame_rate u16 | title_id u64 | frame_count u32
//! v1      buttons u64 | lx i32 | ly i32 | rx i32 | ry i32                   (24 bytes)
//! v2      duration_ms u32 | buttons u64 | lx i32 | ly i32 | rx i32 | ry i32 (28 bytes)
//! ```
//!
//! v1 frames last `1 / frame_rate` seconds each. v2 frames carry their own
//! duration, which lets identical consecutive samples be folded together.

pub mod sampler;

use crate::buttons::{Buttons, StickPos};
use crate::error::{Result, TurboPadError};
use std::path::Path;
use std::time::Duration;

pub const MAGIC: [u8; 4] = *b"KEYX";
pub const HEADER_LEN: usize = 20;
pub const FRAME_LEN_V1: usize = 24;
pub const FRAME_LEN_V2: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroVersion {
    V1 = 1,
    V2 = 2,
}

impl MacroVersion {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(MacroVersion::V1),
            2 => Some(MacroVersion::V2),
            _ => None,
        }
    }

    pub fn frame_len(self) -> usize {
        match self {
            MacroVersion::V1 => FRAME_LEN_V1,
            MacroVersion::V2 => FRAME_LEN_V2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroHeader {
    pub version: MacroVersion,
    /// Samples per second. Drives playback timing for v1 files only.
    pub frame_rate: u16,
    /// Title the macro was recorded in.
    pub title_id: u64,
    pub frame_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacroFrame {
    /// Ignored (written as absent) for v1 files.
    pub duration_ms: u32,
    pub buttons: Buttons,
    pub stick_left: StickPos,
    pub stick_right: StickPos,
}

impl MacroFrame {
    /// Same buttons and bit-identical sticks.
    pub fn same_input(&self, other: &MacroFrame) -> bool {
        self.buttons == other.buttons
            && self.stick_left == other.stick_left
            && self.stick_right == other.stick_right
    }

    pub fn is_neutral(&self) -> bool {
        self.buttons.is_empty() && self.stick_left.is_centered() && self.stick_right.is_centered()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroFile {
    pub header: MacroHeader,
    pub frames: Vec<MacroFrame>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let chunk = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| TurboPadError::MacroFormat("unexpected end of file".into()))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(chunk);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        self.take().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32> {
        self.take().map(i32::from_le_bytes)
    }

    fn stick(&mut self) -> Result<StickPos> {
        Ok(StickPos::new(self.i32()?, self.i32()?))
    }
}

impl MacroFile {
    /// A v2 file for `title_id`. `frame_count` always follows `frames`.
    pub fn new_v2(title_id: u64, frame_rate: u16, frames: Vec<MacroFrame>) -> Self {
        Self {
            header: MacroHeader {
                version: MacroVersion::V2,
                frame_rate,
                title_id,
                frame_count: frames.len() as u32,
            },
            frames,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { bytes, pos: 0 };
        let magic: [u8; 4] = reader.take()?;
        if magic != MAGIC {
            return Err(TurboPadError::MacroFormat(format!("bad magic {:02X?}", magic)));
        }
        let raw_version = reader.u16()?;
        let version = MacroVersion::from_u16(raw_version).ok_or_else(|| {
            TurboPadError::MacroFormat(format!("unsupported version {}", raw_version))
        })?;
        let frame_rate = reader.u16()?;
        let title_id = reader.u64()?;
        let frame_count = reader.u32()?;

        if version == MacroVersion::V1 && frame_rate == 0 {
            return Err(TurboPadError::MacroFormat("v1 file with zero frame rate".into()));
        }
        let expected = HEADER_LEN as u64 + frame_count as u64 * version.frame_len() as u64;
        if bytes.len() as u64 != expected {
            return Err(TurboPadError::MacroFormat(format!(
                "{} frames need {} bytes, file has {}",
                frame_count,
                expected,
                bytes.len()
            )));
        }

        let mut frames = Vec::with_capacity(frame_count as usize);
        for _ in 0..frame_count {
            let duration_ms = match version {
                MacroVersion::V1 => 0,
                MacroVersion::V2 => reader.u32()?,
            };
            frames.push(MacroFrame {
                duration_ms,
                buttons: Buttons::mask(reader.u64()?),
                stick_left: reader.stick()?,
                stick_right: reader.stick()?,
            });
        }

        Ok(Self {
            header: MacroHeader {
                version,
                frame_rate,
                title_id,
                frame_count,
            },
            frames,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let version = self.header.version;
        let mut out = Vec::with_capacity(HEADER_LEN + self.frames.len() * version.frame_len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&(version as u16).to_le_bytes());
        out.extend_from_slice(&self.header.frame_rate.to_le_bytes());
        out.extend_from_slice(&self.header.title_id.to_le_bytes());
        out.extend_from_slice(&(self.frames.len() as u32).to_le_bytes());
        for frame in &self.frames {
            if version == MacroVersion::V2 {
                out.extend_from_slice(&frame.duration_ms.to_le_bytes());
            }
            out.extend_from_slice(&frame.buttons.bits().to_le_bytes());
            for value in [
                frame.stick_left.x,
                frame.stick_left.y,
                frame.stick_right.x,
                frame.stick_right.y,
            ] {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        out
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes).map_err(|e| match e {
            TurboPadError::MacroFormat(msg) => {
                TurboPadError::MacroFormat(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Display time of frame `index`.
    pub fn frame_duration(&self, index: usize) -> Duration {
        match self.header.version {
            MacroVersion::V2 => self
                .frames
                .get(index)
                .map_or(Duration::ZERO, |f| Duration::from_millis(f.duration_ms as u64)),
            MacroVersion::V1 => self.v1_offset(index + 1) - self.v1_offset(index),
        }
    }

    /// End offset of each frame, measured from playback start.
    pub fn timeline(&self) -> Vec<Duration> {
        match self.header.version {
            MacroVersion::V2 => {
                let mut end = Duration::ZERO;
                self.frames
                    .iter()
                    .map(|f| {
                        end += Duration::from_millis(f.duration_ms as u64);
                        end
                    })
                    .collect()
            }
            MacroVersion::V1 => (1..=self.frames.len()).map(|i| self.v1_offset(i)).collect(),
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.timeline().last().copied().unwrap_or(Duration::ZERO)
    }

    /// Fold identical adjacent frames. v1 files become v2 with each frame's
    /// implicit duration made explicit.
    pub fn merge(&mut self) {
        if self.header.version == MacroVersion::V1 {
            let timeline = self.timeline();
            let mut start = Duration::ZERO;
            for (frame, end) in self.frames.iter_mut().zip(timeline) {
                frame.duration_ms = (end.as_millis() - start.as_millis()) as u32;
                start = end;
            }
            self.header.version = MacroVersion::V2;
        }
        merge_frames(&mut self.frames);
        self.header.frame_count = self.frames.len() as u32;
    }

    // Rounded on absolute offsets so v1 frame times never drift.
    fn v1_offset(&self, frames: usize) -> Duration {
        let rate = self.header.frame_rate.max(1) as u64;
        Duration::from_nanos(frames as u64 * 1_000_000_000 / rate)
    }
}

/// Append a sample, folding it into the previous frame when the input is identical.
pub fn push_sample(frames: &mut Vec<MacroFrame>, sample: MacroFrame) {
    match frames.last_mut() {
        Some(last) if last.same_input(&sample) => {
            last.duration_ms = last.duration_ms.saturating_add(sample.duration_ms);
        }
        _ => frames.push(sample),
    }
}

pub fn merge_frames(frames: &mut Vec<MacroFrame>) {
    let mut merged = Vec::with_capacity(frames.len());
    for frame in frames.drain(..) {
        push_sample(&mut merged, frame);
    }
    *frames = merged;
}

//! Audio accumulation and chunking
//!
//! Each connected participant streams raw PCM (16 kHz mono int16 LE); the
//! framer turns that stream into fixed-duration windows suitable for the
//! speech service, retaining trailing partial samples between drains.

pub mod vad;
pub mod wav;

pub use vad::EnergyGate;

/// Per-participant PCM accumulator producing fixed-size frames.
pub struct AudioFramer {
    buffer: Vec<i16>,
    window_samples: usize,
}

impl AudioFramer {
    /// `window_samples` = sample_rate * window_seconds.
    pub fn new(window_samples: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(window_samples),
            window_samples,
        }
    }

    pub fn push(&mut self, samples: &[i16]) {
        self.buffer.extend_from_slice(samples);
    }

    /// Decode a binary websocket frame (int16 little-endian) and append it.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend(
            bytes
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]])),
        );
    }

    /// Take every whole window currently buffered. Trailing partial samples
    /// stay buffered, so at most one window-minus-one-sample remains.
    pub fn drain_frames(&mut self) -> Vec<Vec<i16>> {
        let mut frames = Vec::new();
        while self.buffer.len() >= self.window_samples {
            let rest = self.buffer.split_off(self.window_samples);
            frames.push(std::mem::replace(&mut self.buffer, rest));
        }
        frames
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    pub fn window_samples(&self) -> usize {
        self.window_samples
    }
}

/// Average equal-length frames into one, normalized by participant count.
///
/// Used for shared-mode mix-on-demand: the diarizer hears the whole room,
/// not just the device that produced the triggering frame. Frames shorter
/// than the longest contribute silence past their end.
pub fn mix_frames(frames: &[&[i16]]) -> Vec<i16> {
    if frames.is_empty() {
        return Vec::new();
    }
    let len = frames.iter().map(|f| f.len()).max().unwrap_or(0);
    let count = frames.len() as i32;
    let mut mixed = Vec::with_capacity(len);
    for i in 0..len {
        let sum: i32 = frames
            .iter()
            .map(|f| f.get(i).copied().unwrap_or(0) as i32)
            .sum();
        mixed.push((sum / count) as i16);
    }
    mixed
}

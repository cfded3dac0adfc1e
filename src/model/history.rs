use super::constants::MAX_FRAMES_LIMIT;
use super::{Frame, PathRecord};
use tracing::{debug, warn};

/// Index-addressed buffer of frames, replayed to newly joined nodes.
///
/// Always holds exactly `len()` frames; out-of-range indices are ignored by
/// every mutating operation. Each frame keeps at most `max_paths_per_frame`
/// records when a cap is set, dropping the oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStore {
    frames: Vec<Frame>,
    max_paths_per_frame: Option<usize>,
}

impl HistoryStore {
    /// Create an uncapped store with `max_frames` empty frames
    pub fn new(max_frames: u32) -> Self {
        Self::with_frame_cap(max_frames, None)
    }

    pub fn with_frame_cap(max_frames: u32, max_paths_per_frame: Option<usize>) -> Self {
        Self {
            frames: vec![Frame::new(); bounded(max_frames) as usize],
            max_paths_per_frame: max_paths_per_frame.filter(|cap| *cap > 0),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, frame_index: i64) -> Option<&Frame> {
        self.slot(frame_index).map(|idx| &self.frames[idx])
    }

    /// Append `records` in order to the frame at `frame_index`.
    /// Returns `false` (and changes nothing) when the index is out of range.
    pub fn append<I>(&mut self, frame_index: i64, records: I) -> bool
    where
        I: IntoIterator<Item = PathRecord>,
    {
        let Some(idx) = self.slot(frame_index) else {
            debug!(frame_index, frames = self.frames.len(), "Ignoring append out of range");
            return false;
        };

        let frame = &mut self.frames[idx];
        frame.extend(records);

        if let Some(cap) = self.max_paths_per_frame {
            if frame.len() > cap {
                let excess = frame.len() - cap;
                frame.drain(..excess);
                debug!(frame_index, excess, "Evicted oldest records over frame cap");
            }
        }
        true
    }

    /// Empty the frame at `frame_index`. Returns `false` when out of range.
    pub fn clear(&mut self, frame_index: i64) -> bool {
        match self.slot(frame_index) {
            Some(idx) => {
                self.frames[idx].clear();
                true
            }
            None => {
                debug!(frame_index, "Ignoring clear out of range");
                false
            }
        }
    }

    /// Grow with empty frames at the end, or truncate and discard the tail.
    /// Lengths above `MAX_FRAMES_LIMIT` are clamped.
    pub fn resize(&mut self, new_max: u32) {
        self.frames.resize_with(bounded(new_max) as usize, Frame::new);
    }

    /// Empty every frame, keeping the current length.
    pub fn reset(&mut self) {
        self.frames.iter_mut().for_each(Vec::clear);
    }

    /// Replace all frames with `frames`, padded or truncated to the current length.
    pub fn replace(&mut self, mut frames: Vec<Frame>) {
        let len = self.frames.len();
        frames.resize_with(len, Frame::new);
        self.frames = frames;
    }

    pub fn snapshot(&self) -> &[Frame] {
        &self.frames
    }

    fn slot(&self, frame_index: i64) -> Option<usize> {
        usize::try_from(frame_index)
            .ok()
            .filter(|idx| *idx < self.frames.len())
    }
}

fn bounded(max_frames: u32) -> u32 {
    if max_frames > MAX_FRAMES_LIMIT {
        warn!(max_frames, limit = MAX_FRAMES_LIMIT, "Clamping frame count");
    }
    max_frames.min(MAX_FRAMES_LIMIT)
}

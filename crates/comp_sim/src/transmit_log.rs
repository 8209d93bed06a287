use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Labels transmitted by the simulator, keyed by frame index.
/// Each entry is laid out as `[data symbol][subcarrier][user]`, matching the receiver outputs.
#[derive(Debug, Clone, Default)]
pub struct TransmitLog {
    frames: Arc<Mutex<BTreeMap<u64, Vec<i64>>>>,
}

impl TransmitLog {
    pub(crate) fn record(&self, frame_index: u64, labels: Vec<i64>) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(frame_index, labels);
    }

    pub fn nb_frames(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn frame_indices(&self) -> Vec<u64> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).keys().copied().collect()
    }

    pub fn labels(&self, frame_index: u64) -> Option<Vec<i64>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).get(&frame_index).cloned()
    }

    /// Concatenated labels of several frames, or None if any of them was never sent.
    pub fn concat(&self, frame_indices: &[u64]) -> Option<Vec<i64>> {
        let frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        let mut labels = vec![];
        for index in frame_indices {
            labels.extend_from_slice(frames.get(index)?);
        }
        Some(labels)
    }
}

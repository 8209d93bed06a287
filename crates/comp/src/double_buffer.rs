use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
struct Generation<T> {
    data: Vec<T>,
    frame_indices: Vec<u64>,
}

impl<T> Generation<T> {
    fn with_capacity(nb_values: usize, nb_frames: usize) -> Self {
        Self {
            data: Vec::with_capacity(nb_values),
            frame_indices: Vec::with_capacity(nb_frames),
        }
    }

    fn clear(&mut self) {
        self.data.clear();
        self.frame_indices.clear();
    }
}

/// A sealed output generation.
/// Cheap to clone and safe to hold while the pipeline keeps writing,
/// since the writer only ever fills a different allocation.
#[derive(Debug)]
pub struct Snapshot<T> {
    generation: u64,
    inner: Arc<Generation<T>>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            inner: self.inner.clone(),
        }
    }
}

impl<T> Snapshot<T> {
    fn empty() -> Self {
        Self {
            generation: 0,
            inner: Arc::new(Generation { data: vec![], frame_indices: vec![] }),
        }
    }

    /// Starts at 1 for the first sealed generation. Zero means nothing was sealed yet.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Indices of the frames whose outputs make up this generation, in order.
    pub fn frame_indices(&self) -> &[u64] {
        &self.inner.frame_indices
    }

    pub fn as_slice(&self) -> &[T] {
        &self.inner.data
    }

    pub fn to_vec(&self) -> Vec<T> where T: Clone {
        self.inner.data.clone()
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = [T];
    fn deref(&self) -> &Self::Target {
        &self.inner.data
    }
}

/// Holds the most recently sealed generation of an output buffer.
/// Readers clone the snapshot under a short read lock and never see a partially written generation.
#[derive(Debug)]
pub struct SnapshotSlot<T> {
    latest: RwLock<Snapshot<T>>,
}

impl<T> Default for SnapshotSlot<T> {
    fn default() -> Self {
        Self {
            latest: RwLock::new(Snapshot::empty()),
        }
    }
}

impl<T> SnapshotSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Snapshot<T> {
        self.latest.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn swap(&self, snapshot: Snapshot<T>) -> Snapshot<T> {
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *latest, snapshot)
    }

    /// Releases the sealed data.
    pub fn clear(&self) {
        let _ = self.swap(Snapshot::empty());
    }
}

/// Single writer side of a double buffered output.
///
/// Frames are appended to the active generation.
/// Once it holds the configured number of frames it is sealed into the slot,
/// and the previously sealed allocation is reused for writing if no reader still holds it.
pub struct GenerationWriter<T> {
    slot: Arc<SnapshotSlot<T>>,
    nb_frames_per_generation: usize,
    nb_values_per_frame: usize,
    active: Generation<T>,
    spare: Option<Generation<T>>,
    generation: u64,
}

impl<T: Clone> GenerationWriter<T> {
    pub fn new(slot: Arc<SnapshotSlot<T>>, nb_frames_per_generation: usize, nb_values_per_frame: usize) -> Self {
        assert!(nb_frames_per_generation > 0, "Generations must hold at least one frame");
        Self {
            slot,
            nb_frames_per_generation,
            nb_values_per_frame,
            active: Generation::with_capacity(nb_frames_per_generation*nb_values_per_frame, nb_frames_per_generation),
            spare: None,
            generation: 0,
        }
    }

    pub fn nb_pending_frames(&self) -> usize {
        self.active.frame_indices.len()
    }

    /// Appends one frame of outputs.
    /// Returns the generation number and frame count if this completed a generation.
    pub fn push_frame(&mut self, frame_index: u64, values: &[T]) -> Option<(u64, usize)> {
        assert!(values.len() == self.nb_values_per_frame, "Frame has {} values but expected {}", values.len(), self.nb_values_per_frame);
        self.active.data.extend_from_slice(values);
        self.active.frame_indices.push(frame_index);
        if self.active.frame_indices.len() < self.nb_frames_per_generation {
            return None;
        }
        self.seal()
    }

    /// Publishes the active generation if it holds any frames.
    pub fn seal(&mut self) -> Option<(u64, usize)> {
        let nb_frames = self.active.frame_indices.len();
        if nb_frames == 0 {
            return None;
        }

        let next = match self.spare.take() {
            Some(spare) => spare,
            None => Generation::with_capacity(
                self.nb_frames_per_generation*self.nb_values_per_frame,
                self.nb_frames_per_generation,
            ),
        };
        let sealed = std::mem::replace(&mut self.active, next);
        self.generation += 1;
        let previous = self.slot.swap(Snapshot {
            generation: self.generation,
            inner: Arc::new(sealed),
        });

        if let Ok(mut recycled) = Arc::try_unwrap(previous.inner) {
            recycled.clear();
            self.spare = Some(recycled);
        }
        Some((self.generation, nb_frames))
    }
}

use mimo::beamformer::WeightFailure;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace, warn};

/// Why the ingest stage refused a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Index is not greater than the last accepted index.
    OutOfOrder { last_accepted: u64 },
    /// Sample count does not match the configured frame layout.
    WrongLayout { expected: usize, received: usize },
}

/// Which double buffered output a generation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputBuffer {
    Equalized,
    Demodulated,
}

/// Recoverable conditions raised while streaming.
/// None of these stop the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Frames between `expected` and `received` never arrived.
    SequenceGap { expected: u64, received: u64 },
    /// The ingest queue was full and its oldest frame was dropped.
    Overrun { dropped_frame: u64 },
    FrameRejected { frame_index: u64, reason: RejectReason },
    ChannelEstimateUpdated { frame_index: u64, nb_degraded_subcarriers: usize },
    /// Subcarriers of a frame that were output as sentinels.
    EqualizationDegraded { frame_index: u64, subcarriers: Vec<(usize, WeightFailure)> },
    /// Equalized symbols that could not be mapped to a constellation point.
    InvalidSymbols { frame_index: u64, count: usize },
    GenerationSealed { buffer: OutputBuffer, generation: u64, nb_frames: usize },
    /// Frames still in flight when the drain deadline passed.
    DrainTimeout { stage: &'static str, discarded_frames: u64 },
}

/// Monotonic counters updated by every stage.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub(crate) frames_ingested: AtomicU64,
    pub(crate) frames_equalized: AtomicU64,
    pub(crate) frames_demodulated: AtomicU64,
    pub(crate) sequence_gaps: AtomicU64,
    pub(crate) missing_frames: AtomicU64,
    pub(crate) overruns: AtomicU64,
    pub(crate) rejected_frames: AtomicU64,
    pub(crate) channel_updates: AtomicU64,
    pub(crate) degraded_subcarriers: AtomicU64,
    pub(crate) invalid_symbols: AtomicU64,
    pub(crate) equalized_generations: AtomicU64,
    pub(crate) demodulated_generations: AtomicU64,
    pub(crate) drain_timeouts: AtomicU64,
    pub(crate) drain_discarded_frames: AtomicU64,
}

impl PipelineCounters {
    #[inline(always)]
    pub(crate) fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        let load = |x: &AtomicU64| x.load(Ordering::Relaxed);
        PipelineStats {
            frames_ingested: load(&self.frames_ingested),
            frames_equalized: load(&self.frames_equalized),
            frames_demodulated: load(&self.frames_demodulated),
            sequence_gaps: load(&self.sequence_gaps),
            missing_frames: load(&self.missing_frames),
            overruns: load(&self.overruns),
            rejected_frames: load(&self.rejected_frames),
            channel_updates: load(&self.channel_updates),
            degraded_subcarriers: load(&self.degraded_subcarriers),
            invalid_symbols: load(&self.invalid_symbols),
            equalized_generations: load(&self.equalized_generations),
            demodulated_generations: load(&self.demodulated_generations),
            drain_timeouts: load(&self.drain_timeouts),
            drain_discarded_frames: load(&self.drain_discarded_frames),
        }
    }
}

/// Point in time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames accepted by ingest, including ones later dropped by an overrun.
    pub frames_ingested: u64,
    pub frames_equalized: u64,
    pub frames_demodulated: u64,
    pub sequence_gaps: u64,
    /// Total number of frame indices skipped across all gaps.
    pub missing_frames: u64,
    pub overruns: u64,
    pub rejected_frames: u64,
    pub channel_updates: u64,
    /// Summed over frames, so one bad subcarrier counts once per frame.
    pub degraded_subcarriers: u64,
    pub invalid_symbols: u64,
    pub equalized_generations: u64,
    pub demodulated_generations: u64,
    pub drain_timeouts: u64,
    pub drain_discarded_frames: u64,
}

type EventCallback = Arc<dyn Fn(&PipelineEvent) + Send + Sync + 'static>;

/// Observable channel for every non fatal condition.
/// Each event is counted, logged and forwarded to subscribers on the thread that raised it.
/// Subscribers are called without any lock held, but a slow subscriber still delays the stage that raised the event.
#[derive(Default)]
pub struct EventHub {
    counters: PipelineCounters,
    subscribers: Mutex<Vec<EventCallback>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> &PipelineCounters {
        &self.counters
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Callbacks must not block since they run inline on the pipeline stages.
    pub fn subscribe(&self, callback: impl Fn(&PipelineEvent) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    pub fn emit(&self, event: PipelineEvent) {
        let counters = &self.counters;
        match &event {
            PipelineEvent::SequenceGap { expected, received } => {
                PipelineCounters::add(&counters.sequence_gaps, 1);
                PipelineCounters::add(&counters.missing_frames, received - expected);
                warn!(expected, received, "sequence gap in ingested frames");
            },
            PipelineEvent::Overrun { dropped_frame } => {
                PipelineCounters::add(&counters.overruns, 1);
                warn!(dropped_frame, "ingest queue overrun, dropped oldest frame");
            },
            PipelineEvent::FrameRejected { frame_index, reason } => {
                PipelineCounters::add(&counters.rejected_frames, 1);
                warn!(frame_index, ?reason, "rejected frame");
            },
            PipelineEvent::ChannelEstimateUpdated { frame_index, nb_degraded_subcarriers } => {
                PipelineCounters::add(&counters.channel_updates, 1);
                debug!(frame_index, nb_degraded_subcarriers, "published channel estimate");
            },
            PipelineEvent::EqualizationDegraded { frame_index, subcarriers } => {
                PipelineCounters::add(&counters.degraded_subcarriers, subcarriers.len() as u64);
                if let Some((subcarrier, reason)) = subcarriers.first() {
                    warn!(frame_index, nb_subcarriers = subcarriers.len(), first = subcarrier, %reason, "equalization degraded");
                }
            },
            PipelineEvent::InvalidSymbols { frame_index, count } => {
                PipelineCounters::add(&counters.invalid_symbols, *count as u64);
                debug!(frame_index, count, "invalid equalized symbols");
            },
            PipelineEvent::GenerationSealed { buffer, generation, nb_frames } => {
                match buffer {
                    OutputBuffer::Equalized   => PipelineCounters::add(&counters.equalized_generations, 1),
                    OutputBuffer::Demodulated => PipelineCounters::add(&counters.demodulated_generations, 1),
                }
                trace!(?buffer, generation, nb_frames, "sealed output generation");
            },
            PipelineEvent::DrainTimeout { stage, discarded_frames } => {
                PipelineCounters::add(&counters.drain_timeouts, 1);
                PipelineCounters::add(&counters.drain_discarded_frames, *discarded_frames);
                warn!(stage, discarded_frames, "drain deadline passed, discarded in-flight frames");
            },
        }

        let subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for callback in subscribers.iter() {
            callback(&event);
        }
    }
}

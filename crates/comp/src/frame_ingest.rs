use crate::comp_frame::Frame;
use crate::pipeline_events::{EventHub, PipelineCounters, PipelineEvent, RejectReason};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::sync::Arc;

/// What happened to a frame handed to the ingest stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Accepted after dropping the oldest queued frame.
    AcceptedWithOverrun { dropped_frame: u64 },
    Rejected(RejectReason),
}

/// Entry point of the pipeline.
/// Validates frame ordering and layout, then queues frames for equalization.
/// The queue is bounded and never blocks the producer: when it is full the oldest frame is dropped.
pub struct FrameIngest {
    nb_samples_per_frame: usize,
    sender: Sender<Frame>,
    /// Second handle onto the consumer side, used only to evict the oldest frame.
    evictor: Receiver<Frame>,
    last_accepted: Option<u64>,
    events: Arc<EventHub>,
}

impl FrameIngest {
    /// Returns the ingest and the receiving end for the equalization stage.
    pub fn new(nb_samples_per_frame: usize, queue_depth: usize, events: Arc<EventHub>) -> (Self, Receiver<Frame>) {
        assert!(queue_depth > 0, "Ingest queue needs room for at least one frame");
        let (sender, receiver) = channel::bounded(queue_depth);
        let ingest = Self {
            nb_samples_per_frame,
            sender,
            evictor: receiver.clone(),
            last_accepted: None,
            events,
        };
        (ingest, receiver)
    }

    pub fn last_accepted(&self) -> Option<u64> {
        self.last_accepted
    }

    /// Number of frames currently waiting for equalization.
    pub fn occupancy(&self) -> usize {
        self.sender.len()
    }

    /// Admits a frame and raises its events on the calling thread.
    pub fn push(&mut self, frame: Frame) -> IngestOutcome {
        let (outcome, raised) = self.admit(frame);
        for event in raised {
            self.events.emit(event);
        }
        outcome
    }

    /// Admits a frame without notifying subscribers.
    /// The caller must emit the returned events, which lets it release any lock guarding the ingest first.
    pub fn admit(&mut self, frame: Frame) -> (IngestOutcome, Vec<PipelineEvent>) {
        let mut raised = vec![];
        if frame.samples.len() != self.nb_samples_per_frame {
            let reason = RejectReason::WrongLayout {
                expected: self.nb_samples_per_frame,
                received: frame.samples.len(),
            };
            raised.push(PipelineEvent::FrameRejected { frame_index: frame.frame_index, reason });
            return (IngestOutcome::Rejected(reason), raised);
        }

        if let Some(last_accepted) = self.last_accepted {
            if frame.frame_index <= last_accepted {
                let reason = RejectReason::OutOfOrder { last_accepted };
                raised.push(PipelineEvent::FrameRejected { frame_index: frame.frame_index, reason });
                return (IngestOutcome::Rejected(reason), raised);
            }
            let expected = last_accepted + 1;
            if frame.frame_index > expected {
                raised.push(PipelineEvent::SequenceGap { expected, received: frame.frame_index });
            }
        }
        self.last_accepted = Some(frame.frame_index);
        PipelineCounters::add(&self.events.counters().frames_ingested, 1);

        let mut dropped = None;
        let mut frame = frame;
        loop {
            match self.sender.try_send(frame) {
                Ok(()) => break,
                Err(TrySendError::Full(rejected)) => {
                    frame = rejected;
                    // The consumer may have emptied a slot in the meantime, in which case just retry
                    if let Ok(oldest) = self.evictor.try_recv() {
                        raised.push(PipelineEvent::Overrun { dropped_frame: oldest.frame_index });
                        dropped = Some(oldest.frame_index);
                    }
                },
                // Unreachable while the evictor holds the consumer side open
                Err(TrySendError::Disconnected(_)) => break,
            }
        }

        let outcome = match dropped {
            Some(dropped_frame) => IngestOutcome::AcceptedWithOverrun { dropped_frame },
            None => IngestOutcome::Accepted,
        };
        (outcome, raised)
    }
}

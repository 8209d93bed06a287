use crate::comp_frame::{Frame, FrameSource, SourceRead};
use crate::demodulator::{DemodulatedFrame, Demodulator};
use crate::double_buffer::{GenerationWriter, Snapshot, SnapshotSlot};
use crate::equalizer::{ChannelSlot, ChannelState, EqualizedFrame, Equalizer};
use crate::frame_ingest::{FrameIngest, IngestOutcome};
use crate::pipeline_events::{EventHub, OutputBuffer, PipelineCounters, PipelineEvent, PipelineStats};
use comp_core::comp_config::{Config, ConfigError};
use comp_core::comp_parameters::FrameParameters;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use num::complex::Complex32;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Created,
    Running,
    Stopped,
    Destroyed,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessorState::Created   => "created",
            ProcessorState::Running   => "running",
            ProcessorState::Stopped   => "stopped",
            ProcessorState::Destroyed => "destroyed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot {operation} while the processor is {state}")]
    InvalidState {
        operation: &'static str,
        state: ProcessorState,
    },
    #[error("failed to spawn the {stage} stage: {source}")]
    Spawn {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("the {stage} stage panicked")]
    StageFailed {
        stage: &'static str,
    },
}

/// Cancellation and drain signals shared with every stage thread.
struct StageControl {
    cancel: AtomicBool,
    drain_deadline: OnceLock<Instant>,
    stage_timeout: Duration,
}

impl StageControl {
    fn new(stage_timeout: Duration) -> Self {
        Self {
            cancel: AtomicBool::new(false),
            drain_deadline: OnceLock::new(),
            stage_timeout,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn begin_drain(&self, max_drain: Duration) {
        let _ = self.drain_deadline.set(Instant::now() + max_drain);
        self.cancel.store(true, Ordering::Release);
    }

    fn is_drain_expired(&self) -> bool {
        self.drain_deadline.get().map_or(false, |deadline| Instant::now() >= *deadline)
    }
}

struct RunningStages {
    control: Arc<StageControl>,
    ingest_thread: Option<JoinHandle<()>>,
    equalizer_thread: JoinHandle<()>,
    demodulator_thread: JoinHandle<()>,
}

/// Coordinated multipoint uplink receiver.
///
/// # Diagram
/// ```text
/// source/push_frame -> [ingest] -> queue -> [equalizer] -> queue -> [demodulator]
///                                                |                        |
///                                         equalized slot          demodulated slot
/// ```
///
/// Each stage runs on its own thread once started.
/// Outputs are double buffered so fetches always return a complete sealed generation.
pub struct Processor {
    config: Arc<Config>,
    params: FrameParameters,
    state: ProcessorState,
    events: Arc<EventHub>,
    channel: Arc<ChannelSlot>,
    equalized: Arc<SnapshotSlot<Complex32>>,
    demodulated: Arc<SnapshotSlot<i64>>,
    ingest: Arc<Mutex<Option<FrameIngest>>>,
    source: Option<Box<dyn FrameSource>>,
    source_exhausted: Arc<AtomicBool>,
    stages: Option<RunningStages>,
}

impl Processor {
    /// Validates the configuration. No stage is started until `start`.
    pub fn create(config: Config) -> Result<Self, ProcessorError> {
        config.validate()?;
        let params = config.frame_parameters();
        info!(
            nb_antennas = params.nb_antennas,
            nb_users = params.nb_users,
            nb_subcarriers = params.nb_subcarriers,
            schedule = %config.frame_schedule,
            modulation = ?config.modulation,
            combining = ?config.combining,
            "created processor"
        );

        Ok(Self {
            config: Arc::new(config),
            params,
            state: ProcessorState::Created,
            events: Arc::new(EventHub::new()),
            channel: Arc::new(ChannelSlot::default()),
            equalized: Arc::new(SnapshotSlot::new()),
            demodulated: Arc::new(SnapshotSlot::new()),
            ingest: Arc::new(Mutex::new(None)),
            source: None,
            source_exhausted: Arc::new(AtomicBool::new(false)),
            stages: None,
        })
    }

    pub fn from_config_path(path: impl AsRef<Path>) -> Result<Self, ProcessorError> {
        Self::create(Config::from_path(path)?)
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn frame_parameters(&self) -> &FrameParameters {
        &self.params
    }

    pub fn stats(&self) -> PipelineStats {
        self.events.stats()
    }

    /// Registers a callback for every streaming event.
    /// Callbacks run on the stage thread that raised the event and must not block.
    pub fn subscribe_events(&self, callback: impl Fn(&PipelineEvent) + Send + Sync + 'static) {
        self.events.subscribe(callback);
    }

    /// Most recently published channel state, if any pilots have been processed.
    pub fn channel_estimate(&self) -> Option<Arc<ChannelState>> {
        self.channel.load()
    }

    /// Sets the front-end that the ingest stage pulls frames from once started.
    pub fn attach_source(&mut self, source: impl FrameSource + 'static) -> Result<(), ProcessorError> {
        self.require("attach a source", &[ProcessorState::Created])?;
        self.source = Some(Box::new(source));
        Ok(())
    }

    /// True once an attached source reported that it has no more frames.
    pub fn source_exhausted(&self) -> bool {
        self.source_exhausted.load(Ordering::Acquire)
    }

    /// Polls until the attached source is exhausted or the timeout passes.
    pub fn wait_for_source(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.source_exhausted() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    pub fn start(&mut self) -> Result<(), ProcessorError> {
        self.require("start", &[ProcessorState::Created])?;

        let config = &self.config;
        let control = Arc::new(StageControl::new(Duration::from_millis(config.stage_timeout_ms)));
        let (ingest, frames_rx) = FrameIngest::new(self.params.nb_samples_per_frame, config.ingest_queue_depth, self.events.clone());
        let (equalized_tx, equalized_rx) = channel::bounded(config.stage_queue_depth);

        let demodulator_thread = spawn_stage("demodulator", {
            let demodulator = Demodulator::new(config.modulation, self.params.nb_subcarriers, self.params.nb_users, self.events.clone());
            let writer = GenerationWriter::new(self.demodulated.clone(), self.params.nb_frames_per_generation, self.params.nb_output_per_frame);
            let control = control.clone();
            let events = self.events.clone();
            move || run_demodulator(demodulator, equalized_rx, writer, &control, &events)
        })?;

        let equalizer_thread = spawn_stage("equalizer", {
            let equalizer = Equalizer::new(config, self.channel.clone(), self.events.clone());
            let writer = GenerationWriter::new(self.equalized.clone(), self.params.nb_frames_per_generation, self.params.nb_output_per_frame);
            let control = control.clone();
            let events = self.events.clone();
            move || run_equalizer(equalizer, frames_rx, equalized_tx, writer, &control, &events)
        })?;

        *lock(&self.ingest) = Some(ingest);

        let ingest_thread = match self.source.take() {
            None => None,
            Some(source) => {
                let spawned = spawn_stage("ingest", {
                    let ingest = self.ingest.clone();
                    let control = control.clone();
                    let source_exhausted = self.source_exhausted.clone();
                    let events = self.events.clone();
                    move || run_ingest(source, &ingest, &events, &control, &source_exhausted)
                });
                match spawned {
                    Ok(thread) => Some(thread),
                    Err(err) => {
                        // Closing ingest lets the other stages wind down
                        *lock(&self.ingest) = None;
                        let _ = equalizer_thread.join();
                        let _ = demodulator_thread.join();
                        return Err(err);
                    },
                }
            },
        };

        self.stages = Some(RunningStages {
            control,
            ingest_thread,
            equalizer_thread,
            demodulator_thread,
        });
        self.state = ProcessorState::Running;
        info!("processor started");
        Ok(())
    }

    /// Stops ingest immediately and drains frames already accepted.
    /// Frames still in flight after the configured drain time are discarded.
    /// Calling stop on a stopped processor does nothing.
    pub fn stop(&mut self) -> Result<(), ProcessorError> {
        match self.state {
            ProcessorState::Running => (),
            ProcessorState::Stopped => {
                debug!("processor already stopped");
                return Ok(());
            },
            state => return Err(ProcessorError::InvalidState { operation: "stop", state }),
        }

        let result = match self.stages.take() {
            Some(stages) => self.shutdown(stages),
            None => Ok(()),
        };
        self.state = ProcessorState::Stopped;

        let stats = self.events.stats();
        info!(
            frames_ingested = stats.frames_ingested,
            frames_demodulated = stats.frames_demodulated,
            overruns = stats.overruns,
            drain_discarded_frames = stats.drain_discarded_frames,
            "processor stopped"
        );
        result
    }

    fn shutdown(&mut self, stages: RunningStages) -> Result<(), ProcessorError> {
        stages.control.begin_drain(Duration::from_millis(self.config.max_drain_ms));

        let mut failed_stage = None;
        if let Some(thread) = stages.ingest_thread {
            if thread.join().is_err() {
                failed_stage = Some("ingest");
            }
        }
        // Dropping the ingest closes the frame queue so downstream stages finish once drained
        *lock(&self.ingest) = None;
        if stages.equalizer_thread.join().is_err() {
            failed_stage.get_or_insert("equalizer");
        }
        if stages.demodulator_thread.join().is_err() {
            failed_stage.get_or_insert("demodulator");
        }

        match failed_stage {
            Some(stage) => Err(ProcessorError::StageFailed { stage }),
            None => Ok(()),
        }
    }

    /// Releases every buffer and stage. A running processor is stopped first.
    pub fn destroy(&mut self) {
        if self.state == ProcessorState::Destroyed {
            return;
        }
        if self.state == ProcessorState::Running {
            if let Err(err) = self.stop() {
                warn!(%err, "stage failure while stopping for destroy");
            }
        }
        self.source = None;
        *lock(&self.ingest) = None;
        self.equalized.clear();
        self.demodulated.clear();
        self.channel.clear();
        self.state = ProcessorState::Destroyed;
        debug!("processor destroyed");
    }

    /// Hands a frame to the ingest stage from the calling thread.
    pub fn push_frame(&self, frame: Frame) -> Result<IngestOutcome, ProcessorError> {
        self.require("push a frame", &[ProcessorState::Running])?;
        let admitted = lock(&self.ingest).as_mut().map(|ingest| ingest.admit(frame));
        let (outcome, raised) = admitted.ok_or(ProcessorError::InvalidState { operation: "push a frame", state: self.state })?;
        for event in raised {
            self.events.emit(event);
        }
        Ok(outcome)
    }

    /// Number of frames waiting in the ingest queue.
    pub fn ingest_occupancy(&self) -> usize {
        lock(&self.ingest).as_ref().map_or(0, |ingest| ingest.occupancy())
    }

    /// Latest sealed generation of equalized symbols, laid out as `[frame][data symbol][subcarrier][user]`.
    pub fn fetch_equalized(&self) -> Result<Snapshot<Complex32>, ProcessorError> {
        self.require("fetch equalized data", &[ProcessorState::Running, ProcessorState::Stopped])?;
        Ok(self.equalized.load())
    }

    /// Latest sealed generation of demodulated decisions, laid out like the equalized symbols.
    pub fn fetch_demodulated(&self) -> Result<Snapshot<i64>, ProcessorError> {
        self.require("fetch demodulated data", &[ProcessorState::Running, ProcessorState::Stopped])?;
        Ok(self.demodulated.load())
    }

    fn require(&self, operation: &'static str, allowed: &[ProcessorState]) -> Result<(), ProcessorError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(ProcessorError::InvalidState { operation, state: self.state })
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_stage(stage: &'static str, body: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>, ProcessorError> {
    std::thread::Builder::new()
        .name(format!("comp-{}", stage))
        .spawn(body)
        .map_err(|source| ProcessorError::Spawn { stage, source })
}

fn run_ingest(
    mut source: Box<dyn FrameSource>,
    ingest: &Mutex<Option<FrameIngest>>,
    events: &EventHub,
    control: &StageControl,
    source_exhausted: &AtomicBool,
) {
    while !control.is_cancelled() {
        match source.next_frame(control.stage_timeout) {
            SourceRead::Frame(frame) => {
                let admitted = lock(ingest).as_mut().map(|ingest| ingest.admit(frame));
                let Some((_, raised)) = admitted else { break };
                for event in raised {
                    events.emit(event);
                }
            },
            SourceRead::Timeout => continue,
            SourceRead::Finished => {
                debug!("frame source finished");
                source_exhausted.store(true, Ordering::Release);
                break;
            },
        }
    }
}

enum Forwarded {
    Sent,
    Discarded,
    Closed,
}

/// Blocks on a full downstream queue until the drain deadline passes.
fn forward<T>(output: &Sender<T>, item: T, control: &StageControl) -> Forwarded {
    let mut item = item;
    loop {
        match output.send_timeout(item, control.stage_timeout) {
            Ok(()) => return Forwarded::Sent,
            Err(SendTimeoutError::Timeout(rejected)) => {
                if control.is_drain_expired() {
                    return Forwarded::Discarded;
                }
                item = rejected;
            },
            Err(SendTimeoutError::Disconnected(_)) => return Forwarded::Closed,
        }
    }
}

/// Pulls items until the upstream queue is closed and empty.
/// Items received after the drain deadline are counted as discarded and never processed.
fn drain_queue<T>(input: &Receiver<T>, control: &StageControl, mut process: impl FnMut(T) -> Forwarded) -> u64 {
    let mut nb_discarded = 0;
    loop {
        let item = match input.recv_timeout(control.stage_timeout) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if control.is_drain_expired() {
            nb_discarded += 1;
            continue;
        }
        match process(item) {
            Forwarded::Sent => (),
            Forwarded::Discarded => nb_discarded += 1,
            Forwarded::Closed => break,
        }
    }
    nb_discarded
}

fn finish_stage<T: Clone>(stage: &'static str, buffer: OutputBuffer, mut writer: GenerationWriter<T>, nb_discarded: u64, events: &EventHub) {
    if let Some((generation, nb_frames)) = writer.seal() {
        events.emit(PipelineEvent::GenerationSealed { buffer, generation, nb_frames });
    }
    if nb_discarded > 0 {
        events.emit(PipelineEvent::DrainTimeout { stage, discarded_frames: nb_discarded });
    }
    debug!(stage, "stage finished");
}

fn run_equalizer(
    mut equalizer: Equalizer,
    input: Receiver<Frame>,
    output: Sender<EqualizedFrame>,
    mut writer: GenerationWriter<Complex32>,
    control: &StageControl,
    events: &EventHub,
) {
    let nb_discarded = drain_queue(&input, control, |frame| {
        let equalized = equalizer.process(&frame);
        PipelineCounters::add(&events.counters().frames_equalized, 1);
        if let Some((generation, nb_frames)) = writer.push_frame(equalized.frame_index, &equalized.symbols) {
            events.emit(PipelineEvent::GenerationSealed { buffer: OutputBuffer::Equalized, generation, nb_frames });
        }
        forward(&output, equalized, control)
    });
    drop(output);
    finish_stage("equalizer", OutputBuffer::Equalized, writer, nb_discarded, events);
}

fn run_demodulator(
    demodulator: Demodulator,
    input: Receiver<EqualizedFrame>,
    mut writer: GenerationWriter<i64>,
    control: &StageControl,
    events: &EventHub,
) {
    let nb_discarded = drain_queue(&input, control, |frame| {
        let DemodulatedFrame { frame_index, decisions } = demodulator.process(&frame);
        PipelineCounters::add(&events.counters().frames_demodulated, 1);
        if let Some((generation, nb_frames)) = writer.push_frame(frame_index, &decisions) {
            events.emit(PipelineEvent::GenerationSealed { buffer: OutputBuffer::Demodulated, generation, nb_frames });
        }
        Forwarded::Sent
    });
    finish_stage("demodulator", OutputBuffer::Demodulated, writer, nb_discarded, events);
}

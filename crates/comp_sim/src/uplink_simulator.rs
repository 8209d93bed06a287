use crate::channel_model::{ChannelModel, ChannelRealisation};
use crate::gaussian_noise::{snr_db_to_noise_variance, GaussianNoise};
use crate::transmit_log::TransmitLog;
use comp::comp_frame::{Frame, FrameSource, SourceRead};
use comp::demodulator::get_constellation;
use comp_core::comp_config::{Config, ConfigError, PilotPattern, SampleDomain};
use comp_core::comp_parameters::FrameParameters;
use itertools::izip;
use mimo::constellation::Constellation;
use mimo::ofdm_front_end::OfdmFrontEnd;
use mimo::pilot_sequence;
use num::complex::Complex32;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("channel model does not fit the antenna array: {0}")]
    ChannelShape(String),
    #[error("singular subcarrier {subcarrier} is out of range for {nb_subcarriers} subcarriers")]
    SubcarrierOutOfRange {
        subcarrier: usize,
        nb_subcarriers: usize,
    },
}

#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    /// Number of frame indices to step through, including skipped ones.
    pub nb_frames: u64,
    pub first_frame_index: u64,
    /// None transmits without noise.
    pub snr_db: Option<f32>,
    pub seed: u64,
    pub channel: ChannelModel,
    /// Subcarriers on which every user shares the same channel.
    pub singular_subcarriers: Vec<usize>,
    /// Frame indices that are never transmitted.
    pub skipped_frames: Vec<u64>,
    /// Emit frames no faster than the configured radio frame duration.
    pub paced: bool,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            nb_frames: 100,
            first_frame_index: 0,
            snr_db: None,
            seed: 0,
            channel: ChannelModel::Identity,
            singular_subcarriers: vec![],
            skipped_frames: vec![],
            paced: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SymbolRole {
    Pilot { user: usize },
    Data { index: usize },
    Guard,
}

/// Generates uplink frames as the base station antennas would receive them.
///
/// Every user transmits its pilot in its own pilot symbol and random constellation points in every
/// uplink symbol. Symbols pass through the channel, pick up noise and, for time domain configs,
/// are modulated into OFDM symbols with a cyclic prefix.
pub struct UplinkSimulator {
    params: FrameParameters,
    roles: Vec<SymbolRole>,
    pilot: Vec<Complex32>,
    constellation: Constellation,
    channel: ChannelRealisation,
    front_end: Option<OfdmFrontEnd>,
    noise: GaussianNoise,
    label_rng: ChaCha8Rng,
    next_frame_index: u64,
    end_frame_index: u64,
    skipped_frames: BTreeSet<u64>,
    frame_period: Option<Duration>,
    next_due: Option<Instant>,
    log: TransmitLog,
    // scratch buffers
    bins: Vec<Complex32>,
    points: Vec<Complex32>,
}

impl UplinkSimulator {
    pub fn new(config: &Config, settings: SimulatorSettings) -> Result<Self, SimulatorError> {
        config.validate()?;
        let params = config.frame_parameters();
        let nb_subcarriers = params.nb_subcarriers;

        let mut roles = vec![SymbolRole::Guard; params.nb_symbols];
        for (user, &symbol) in params.pilot_symbols.iter().enumerate() {
            roles[symbol] = SymbolRole::Pilot { user };
        }
        for (index, &symbol) in params.data_symbols.iter().enumerate() {
            roles[symbol] = SymbolRole::Data { index };
        }

        let pilot = match config.pilot {
            PilotPattern::ZadoffChu { root } => pilot_sequence::zadoff_chu(root, nb_subcarriers),
            PilotPattern::Ones => pilot_sequence::ones(nb_subcarriers),
        };

        let mut channel = ChannelRealisation::new(&settings.channel, params.nb_antennas, params.nb_users, nb_subcarriers, settings.seed)?;
        for &subcarrier in &settings.singular_subcarriers {
            if subcarrier >= nb_subcarriers {
                return Err(SimulatorError::SubcarrierOutOfRange { subcarrier, nb_subcarriers });
            }
            channel.make_singular(subcarrier);
        }

        let front_end = match config.sample_domain {
            SampleDomain::Frequency => None,
            SampleDomain::Time => Some(OfdmFrontEnd::new(config.fft_size, config.cp_len, config.ofdm_data_start, nb_subcarriers)),
        };
        let noise_variance = settings.snr_db.map_or(0.0, snr_db_to_noise_variance);
        let frame_period = match (settings.paced, config.radio.frame_duration_us) {
            (true, us) if us > 0 => Some(Duration::from_micros(us)),
            _ => None,
        };

        debug!(
            nb_frames = settings.nb_frames,
            snr_db = ?settings.snr_db,
            channel = ?settings.channel,
            "created uplink simulator"
        );

        Ok(Self {
            roles,
            pilot,
            constellation: get_constellation(config.modulation),
            channel,
            front_end,
            // Separate streams keep the transmitted labels identical with or without noise
            noise: GaussianNoise::new(noise_variance, settings.seed.wrapping_add(1)),
            label_rng: ChaCha8Rng::seed_from_u64(settings.seed.wrapping_add(2)),
            next_frame_index: settings.first_frame_index,
            end_frame_index: settings.first_frame_index + settings.nb_frames,
            skipped_frames: settings.skipped_frames.iter().copied().collect(),
            frame_period,
            next_due: None,
            log: TransmitLog::default(),
            bins: vec![Complex32::default(); nb_subcarriers],
            points: vec![Complex32::default(); params.nb_output_per_frame],
            params,
        })
    }

    pub fn frame_parameters(&self) -> &FrameParameters {
        &self.params
    }

    pub fn constellation(&self) -> &Constellation {
        &self.constellation
    }

    pub fn channel(&self) -> &ChannelRealisation {
        &self.channel
    }

    /// Shared handle onto the labels of every generated frame.
    pub fn transmit_log(&self) -> TransmitLog {
        self.log.clone()
    }

    /// Generates one frame with fresh random data and records what was sent.
    pub fn generate_frame(&mut self, frame_index: u64) -> Frame {
        let order = self.constellation.order();
        let labels: Vec<i64> = (0..self.params.nb_output_per_frame)
            .map(|_| self.label_rng.gen_range(0..order) as i64)
            .collect();
        for (point, &label) in izip!(self.points.iter_mut(), labels.iter()) {
            *point = self.constellation.modulate(label as usize);
        }

        let mut frame = Frame::zeros(frame_index, &self.params);
        let nb_users = self.params.nb_users;
        for (symbol, role) in self.roles.iter().enumerate() {
            for antenna in 0..self.params.nb_antennas {
                for (k, bin) in self.bins.iter_mut().enumerate() {
                    *bin = match *role {
                        SymbolRole::Pilot { user } => self.channel.gain(k, antenna, user) * self.pilot[k],
                        SymbolRole::Data { index } => {
                            let start = self.params.output_index(index, k, 0);
                            (0..nb_users)
                                .map(|u| self.channel.gain(k, antenna, u) * self.points[start+u])
                                .sum()
                        },
                        SymbolRole::Guard => Complex32::default(),
                    };
                }
                self.noise.add_to(&mut self.bins);

                let out = frame.symbol_antenna_mut(&self.params, symbol, antenna);
                match &mut self.front_end {
                    Some(front_end) => front_end.modulate(&self.bins, out),
                    None => out.copy_from_slice(&self.bins),
                }
            }
        }

        self.log.record(frame_index, labels);
        trace!(frame_index, "generated frame");
        frame
    }
}

impl FrameSource for UplinkSimulator {
    fn next_frame(&mut self, timeout: Duration) -> SourceRead {
        while self.skipped_frames.contains(&self.next_frame_index) {
            debug!(frame_index = self.next_frame_index, "skipping frame");
            self.next_frame_index += 1;
        }
        if self.next_frame_index >= self.end_frame_index {
            return SourceRead::Finished;
        }

        if let Some(due) = self.next_due {
            let now = Instant::now();
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    std::thread::sleep(timeout);
                    return SourceRead::Timeout;
                }
                std::thread::sleep(wait);
            }
        }

        let frame_index = self.next_frame_index;
        self.next_frame_index += 1;
        let frame = self.generate_frame(frame_index);
        self.next_due = self.frame_period.map(|period| Instant::now() + period);
        SourceRead::Frame(frame)
    }
}

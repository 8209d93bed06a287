use crate::comp_frame::Frame;
use crate::pipeline_events::{EventHub, PipelineEvent};
use comp_core::comp_config::{CombiningCriterion, Config, PilotPattern, SampleDomain};
use comp_core::comp_parameters::FrameParameters;
use mimo::beamformer::{Beamformer, Combiner, CombiningWeights, WeightFailure};
use mimo::channel_estimator::{ChannelEstimate, ChannelEstimator};
use mimo::ofdm_front_end::OfdmFrontEnd;
use mimo::pilot_sequence;
use num::complex::Complex32;
use std::sync::{Arc, PoisonError, RwLock};

/// Channel estimate and the combining weights derived from it.
#[derive(Debug)]
pub struct ChannelState {
    /// Frame whose pilots produced this estimate.
    pub frame_index: u64,
    pub estimate: ChannelEstimate,
    pub weights: CombiningWeights,
}

/// Publication point for the current channel state.
/// A new state is fully built before it replaces the old one, so readers never see a partial estimate.
#[derive(Debug, Default)]
pub struct ChannelSlot {
    current: RwLock<Option<Arc<ChannelState>>>,
}

impl ChannelSlot {
    pub fn load(&self) -> Option<Arc<ChannelState>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn publish(&self, state: Arc<ChannelState>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Equalized symbols of one frame.
#[derive(Debug, Clone)]
pub struct EqualizedFrame {
    pub frame_index: u64,
    /// Laid out as `[data symbol][subcarrier][user]`.
    pub symbols: Vec<Complex32>,
    /// Subcarriers that were output as zeroed sentinels.
    pub degraded: Vec<bool>,
}

/// Per subcarrier conversion of the received symbols of one antenna.
enum SubcarrierSource {
    Frequency,
    Time(OfdmFrontEnd),
}

/// Channel estimation and linear combining.
///
/// Every frame starts with the pilots of each user.
/// On the refresh cadence the pilots give a new least squares channel estimate and new weights,
/// which are then applied to every uplink symbol of the frame and of following frames.
pub struct Equalizer {
    params: FrameParameters,
    source: SubcarrierSource,
    estimator: ChannelEstimator,
    beamformer: Beamformer,
    refresh_interval: u64,
    nb_frames_processed: u64,
    channel: Arc<ChannelSlot>,
    current: Option<Arc<ChannelState>>,
    events: Arc<EventHub>,
    // scratch buffers
    symbol_buffer: Vec<Complex32>,
    antenna_buffer: Vec<Complex32>,
}

impl Equalizer {
    pub fn new(config: &Config, channel: Arc<ChannelSlot>, events: Arc<EventHub>) -> Self {
        let params = config.frame_parameters();
        let nb_subcarriers = params.nb_subcarriers;

        let pilot = match config.pilot {
            PilotPattern::ZadoffChu { root } => pilot_sequence::zadoff_chu(root, nb_subcarriers),
            PilotPattern::Ones => pilot_sequence::ones(nb_subcarriers),
        };
        let combiner = match config.combining {
            CombiningCriterion::ZeroForcing => Combiner::ZeroForcing,
            CombiningCriterion::Mmse => Combiner::Mmse { noise_variance: config.noise_variance },
        };
        let source = match config.sample_domain {
            SampleDomain::Frequency => SubcarrierSource::Frequency,
            SampleDomain::Time => SubcarrierSource::Time(OfdmFrontEnd::new(
                config.fft_size, config.cp_len, config.ofdm_data_start, nb_subcarriers,
            )),
        };

        Self {
            estimator: ChannelEstimator::new(params.nb_antennas, params.nb_users, &pilot),
            beamformer: Beamformer::new(combiner, config.condition_threshold),
            refresh_interval: config.channel_refresh_interval as u64,
            nb_frames_processed: 0,
            channel,
            current: None,
            events,
            symbol_buffer: vec![Complex32::default(); params.nb_antennas*nb_subcarriers],
            antenna_buffer: vec![Complex32::default(); params.nb_antennas],
            source,
            params,
        }
    }

    pub fn process(&mut self, frame: &Frame) -> EqualizedFrame {
        assert!(frame.has_layout(&self.params), "Frame {} does not match the configured layout", frame.frame_index);

        let state = match &self.current {
            Some(state) if self.nb_frames_processed % self.refresh_interval != 0 => state.clone(),
            _ => self.refresh_channel(frame),
        };
        self.nb_frames_processed += 1;

        let nb_subcarriers = self.params.nb_subcarriers;
        let nb_users = self.params.nb_users;
        let mut symbols = vec![Complex32::default(); self.params.nb_output_per_frame];
        let mut degraded = vec![false; nb_subcarriers];
        let mut failures: Vec<(usize, WeightFailure)> = vec![];

        let data_symbols = self.params.data_symbols.clone();
        for (d, &symbol) in data_symbols.iter().enumerate() {
            self.load_symbol(frame, symbol);
            for k in 0..nb_subcarriers {
                for (a, y) in self.antenna_buffer.iter_mut().enumerate() {
                    *y = self.symbol_buffer[a*nb_subcarriers + k];
                }
                let start = self.params.output_index(d, k, 0);
                let users_out = &mut symbols[start..start+nb_users];
                if let Err(failure) = state.weights.equalize(k, &self.antenna_buffer, users_out) {
                    if !degraded[k] {
                        degraded[k] = true;
                        failures.push((k, failure));
                    }
                }
            }
        }

        if !failures.is_empty() {
            self.events.emit(PipelineEvent::EqualizationDegraded {
                frame_index: frame.frame_index,
                subcarriers: failures,
            });
        }

        EqualizedFrame {
            frame_index: frame.frame_index,
            symbols,
            degraded,
        }
    }

    fn refresh_channel(&mut self, frame: &Frame) -> Arc<ChannelState> {
        let mut estimate = self.estimator.empty_estimate();
        let nb_subcarriers = self.params.nb_subcarriers;
        let pilot_symbols = self.params.pilot_symbols.clone();
        for (user, &symbol) in pilot_symbols.iter().enumerate() {
            self.load_symbol(frame, symbol);
            for antenna in 0..self.params.nb_antennas {
                let received = &self.symbol_buffer[antenna*nb_subcarriers..(antenna+1)*nb_subcarriers];
                self.estimator.update(&mut estimate, user, antenna, received);
            }
        }

        let weights = self.beamformer.compute(&estimate);
        let nb_degraded_subcarriers = weights.nb_degraded();
        let state = Arc::new(ChannelState {
            frame_index: frame.frame_index,
            estimate,
            weights,
        });
        self.channel.publish(state.clone());
        self.current = Some(state.clone());
        self.events.emit(PipelineEvent::ChannelEstimateUpdated {
            frame_index: frame.frame_index,
            nb_degraded_subcarriers,
        });
        state
    }

    /// Converts one symbol of every antenna into subcarriers laid out as `[antenna][subcarrier]`.
    fn load_symbol(&mut self, frame: &Frame, symbol: usize) {
        let nb_subcarriers = self.params.nb_subcarriers;
        for antenna in 0..self.params.nb_antennas {
            let samples = frame.symbol_antenna(&self.params, symbol, antenna);
            let out = &mut self.symbol_buffer[antenna*nb_subcarriers..(antenna+1)*nb_subcarriers];
            match &mut self.source {
                SubcarrierSource::Frequency => out.copy_from_slice(samples),
                SubcarrierSource::Time(front_end) => front_end.demodulate(samples, out),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.bs_ant_num = 2;
        config.ue_num = 2;
        config.ofdm_data_num = 8;
        config.frame_schedule = "PPUU".into();
        config.pilot = PilotPattern::ZadoffChu { root: 3 };
        config
    }

    /// Builds a frame through a per subcarrier channel h[k][a][u].
    fn transmit(config: &Config, frame_index: u64, h: &dyn Fn(usize, usize, usize) -> Complex32, data: &[Complex32]) -> Frame {
        let params = config.frame_parameters();
        let pilot = match config.pilot {
            PilotPattern::ZadoffChu { root } => pilot_sequence::zadoff_chu(root, params.nb_subcarriers),
            PilotPattern::Ones => pilot_sequence::ones(params.nb_subcarriers),
        };
        let mut frame = Frame::zeros(frame_index, &params);
        for (user, &symbol) in params.pilot_symbols.iter().enumerate() {
            for antenna in 0..params.nb_antennas {
                let out = frame.symbol_antenna_mut(&params, symbol, antenna);
                for k in 0..params.nb_subcarriers {
                    out[k] = h(k, antenna, user) * pilot[k];
                }
            }
        }
        for (d, &symbol) in params.data_symbols.iter().enumerate() {
            for antenna in 0..params.nb_antennas {
                let out = frame.symbol_antenna_mut(&params, symbol, antenna);
                for k in 0..params.nb_subcarriers {
                    out[k] = (0..params.nb_users)
                        .map(|u| h(k, antenna, u) * data[params.output_index(d, k, u)])
                        .sum();
                }
            }
        }
        frame
    }

    fn test_data(n: usize) -> Vec<Complex32> {
        (0..n).map(|i| Complex32::new(((i % 4) as f32) - 1.5, 1.0 - ((i % 3) as f32))).collect()
    }

    #[test]
    fn test_identity_channel_recovers_symbols() {
        let config = small_config();
        let params = config.frame_parameters();
        let channel = Arc::new(ChannelSlot::default());
        let mut equalizer = Equalizer::new(&config, channel.clone(), Arc::new(EventHub::new()));

        let identity = |_k: usize, a: usize, u: usize| if a == u { Complex32::new(1.0, 0.0) } else { Complex32::default() };
        let data = test_data(params.nb_output_per_frame);
        let frame = transmit(&config, 0, &identity, &data);
        let equalized = equalizer.process(&frame);

        assert!(equalized.degraded.iter().all(|x| !x));
        for (x, y) in data.iter().zip(equalized.symbols.iter()) {
            assert!((x - y).norm() < 1e-4, "{} != {}", x, y);
        }
        assert_eq!(channel.load().map(|s| s.frame_index), Some(0));
    }

    #[test]
    fn test_singular_subcarrier_is_isolated() {
        let config = small_config();
        let params = config.frame_parameters();
        let events = Arc::new(EventHub::new());
        let raised = Arc::new(Mutex::new(vec![]));
        events.subscribe({
            let raised = raised.clone();
            move |event: &PipelineEvent| raised.lock().unwrap().push(event.clone())
        });
        let mut equalizer = Equalizer::new(&config, Arc::new(ChannelSlot::default()), events.clone());

        // Both users arrive identically on subcarrier 5
        let h = |k: usize, a: usize, u: usize| {
            if k == 5 {
                Complex32::new(1.0, 0.5)
            } else {
                Complex32::new(1.0 + a as f32, 0.3 * (u as f32) - 0.2 * (a as f32)) + if a == u { Complex32::new(2.0, 0.0) } else { Complex32::default() }
            }
        };
        let data = test_data(params.nb_output_per_frame);
        let equalized = equalizer.process(&transmit(&config, 0, &h, &data));

        for k in 0..params.nb_subcarriers {
            assert_eq!(equalized.degraded[k], k == 5);
            for d in 0..params.nb_data_symbols() {
                for u in 0..params.nb_users {
                    let i = params.output_index(d, k, u);
                    if k == 5 {
                        assert_eq!(equalized.symbols[i], Complex32::default());
                    } else {
                        assert!((equalized.symbols[i] - data[i]).norm() < 1e-3);
                    }
                }
            }
        }
        assert_eq!(events.stats().degraded_subcarriers, 1);
        assert!(raised.lock().unwrap().iter().any(|e| matches!(e,
            PipelineEvent::EqualizationDegraded { subcarriers, .. } if subcarriers.len() == 1 && subcarriers[0].0 == 5
        )));
    }

    #[test]
    fn test_refresh_cadence() {
        let mut config = small_config();
        config.channel_refresh_interval = 3;
        let params = config.frame_parameters();
        let events = Arc::new(EventHub::new());
        let channel = Arc::new(ChannelSlot::default());
        let mut equalizer = Equalizer::new(&config, channel.clone(), events.clone());

        let identity = |_k: usize, a: usize, u: usize| if a == u { Complex32::new(1.0, 0.0) } else { Complex32::default() };
        let data = test_data(params.nb_output_per_frame);
        for i in 0..7 {
            equalizer.process(&transmit(&config, i, &identity, &data));
        }
        // Refreshed on frames 0, 3 and 6
        assert_eq!(events.stats().channel_updates, 3);
        assert_eq!(channel.load().map(|s| s.frame_index), Some(6));
    }

    #[test]
    fn test_time_domain_front_end() {
        let mut config = small_config();
        config.sample_domain = SampleDomain::Time;
        config.fft_size = 16;
        config.cp_len = 4;
        config.ofdm_data_start = 4;
        config.validate().unwrap();
        let params = config.frame_parameters();

        // Build the frequency domain frame, then modulate every symbol into time
        let mut freq_config = config.clone();
        freq_config.sample_domain = SampleDomain::Frequency;
        let freq_params = freq_config.frame_parameters();
        let h = |_k: usize, a: usize, u: usize| Complex32::new(if a == u { 1.0 } else { 0.25 }, 0.1 * (a as f32));
        let data = test_data(params.nb_output_per_frame);
        let freq_frame = transmit(&freq_config, 0, &h, &data);

        let mut front_end = OfdmFrontEnd::new(16, 4, 4, 8);
        let mut frame = Frame::zeros(0, &params);
        for symbol in 0..params.nb_symbols {
            for antenna in 0..params.nb_antennas {
                let bins = freq_frame.symbol_antenna(&freq_params, symbol, antenna).to_vec();
                front_end.modulate(&bins, frame.symbol_antenna_mut(&params, symbol, antenna));
            }
        }

        let mut equalizer = Equalizer::new(&config, Arc::new(ChannelSlot::default()), Arc::new(EventHub::new()));
        let equalized = equalizer.process(&frame);
        for (x, y) in data.iter().zip(equalized.symbols.iter()) {
            assert!((x - y).norm() < 1e-3, "{} != {}", x, y);
        }
    }
}

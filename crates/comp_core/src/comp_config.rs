use crate::comp_parameters::FrameParameters;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while loading or validating a configuration record.
/// These are the only errors that are fatal to a processor.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config record: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("config field `{field}` is out of range: {reason}")]
    OutOfRange {
        field: &'static str,
        reason: String,
    },
}

/// Modulation used by every uplink user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modulation {
    #[serde(rename = "BPSK")]
    Bpsk,
    #[serde(rename = "QPSK")]
    Qpsk,
    #[serde(rename = "16QAM")]
    Qam16,
    #[serde(rename = "64QAM")]
    Qam64,
}

impl Modulation {
    /// Number of points in the constellation.
    pub fn order(&self) -> usize {
        match self {
            Modulation::Bpsk  => 2,
            Modulation::Qpsk  => 4,
            Modulation::Qam16 => 16,
            Modulation::Qam64 => 64,
        }
    }

    pub fn bits_per_symbol(&self) -> usize {
        self.order().trailing_zeros() as usize
    }
}

/// Whether ingested samples are already per subcarrier or still raw OFDM symbols in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleDomain {
    /// Each symbol carries `ofdm_data_num` subcarrier values per antenna.
    #[default]
    Frequency,
    /// Each symbol carries `cp_len + fft_size` time samples per antenna.
    Time,
}

/// The known sequence each user transmits in its pilot symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PilotPattern {
    /// Zadoff-Chu sequence of length `ofdm_data_num`. The root must be coprime with the length.
    ZadoffChu { root: u32 },
    /// All subcarriers carry 1+0j.
    Ones,
}

impl Default for PilotPattern {
    fn default() -> Self {
        PilotPattern::ZadoffChu { root: 1 }
    }
}

/// Linear combining criterion used to compute the per subcarrier beamforming weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombiningCriterion {
    #[default]
    ZeroForcing,
    Mmse,
}

/// One entry of the frame schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Carries the pilot of exactly one user. The i-th pilot symbol belongs to user i.
    Pilot,
    /// Carries uplink data from every user.
    Uplink,
    /// Ignored by the receiver.
    Guard,
}

impl SymbolKind {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'P' => Some(SymbolKind::Pilot),
            'U' => Some(SymbolKind::Uplink),
            'G' => Some(SymbolKind::Guard),
            _ => None,
        }
    }
}

/// Parameters of the radio front-end. These are carried for collaborators (simulators, loggers)
/// and are not interpreted by the processing stages, apart from the frame duration used for pacing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RadioParameters {
    pub sample_rate_hz: f64,
    pub center_frequency_hz: f64,
    pub rx_gain_db: f64,
    /// Duration of one frame on air. Zero disables pacing in simulated sources.
    pub frame_duration_us: u64,
}

impl Default for RadioParameters {
    fn default() -> Self {
        Self {
            sample_rate_hz: 7.68e6,
            center_frequency_hz: 3.6e9,
            rx_gain_db: 20.0,
            frame_duration_us: 0,
        }
    }
}

/// Immutable configuration record of a processor.
/// Loaded once and shared by every stage through an `Arc` for the lifetime of the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of base station receive antennas.
    pub bs_ant_num: usize,
    /// Number of uplink users that are spatially multiplexed.
    pub ue_num: usize,
    /// Number of data subcarriers in each OFDM symbol.
    pub ofdm_data_num: usize,
    pub modulation: Modulation,
    /// Symbol layout of one frame, e.g. "PPUUUU". See `SymbolKind`.
    pub frame_schedule: String,
    #[serde(default)]
    pub sample_domain: SampleDomain,
    /// FFT size for time domain samples.
    #[serde(default)]
    pub fft_size: usize,
    /// Cyclic prefix length for time domain samples.
    #[serde(default)]
    pub cp_len: usize,
    /// First FFT bin that carries data for time domain samples.
    #[serde(default)]
    pub ofdm_data_start: usize,
    #[serde(default)]
    pub pilot: PilotPattern,
    #[serde(default)]
    pub combining: CombiningCriterion,
    /// Noise variance per subcarrier used for MMSE regularisation.
    #[serde(default = "default_noise_variance")]
    pub noise_variance: f64,
    /// Number of pilot bearing frames between channel estimate refreshes.
    /// 1 re-estimates on every frame.
    #[serde(default = "default_one")]
    pub channel_refresh_interval: usize,
    /// The reciprocal condition number below which a subcarrier's channel is considered singular.
    #[serde(default = "default_condition_threshold")]
    pub condition_threshold: f64,
    /// Maximum number of frames waiting between ingest and equalization.
    #[serde(default = "default_queue_depth")]
    pub ingest_queue_depth: usize,
    /// Maximum number of frames waiting between equalization and demodulation.
    #[serde(default = "default_queue_depth")]
    pub stage_queue_depth: usize,
    /// How long a stage blocks on an empty queue before yielding.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    /// Maximum time spent draining in-flight frames after stop.
    #[serde(default = "default_max_drain_ms")]
    pub max_drain_ms: u64,
    /// Number of frames written into an output generation before it is sealed.
    #[serde(default = "default_one")]
    pub frames_per_generation: usize,
    #[serde(default)]
    pub radio: RadioParameters,
}

fn default_noise_variance() -> f64 { 1e-3 }
fn default_one() -> usize { 1 }
fn default_condition_threshold() -> f64 { 1e-6 }
fn default_queue_depth() -> usize { 4 }
fn default_stage_timeout_ms() -> u64 { 20 }
fn default_max_drain_ms() -> u64 { 500 }

impl Default for Config {
    fn default() -> Self {
        Self {
            bs_ant_num: 4,
            ue_num: 2,
            ofdm_data_num: 64,
            modulation: Modulation::Qam16,
            frame_schedule: "PPUUUU".into(),
            sample_domain: SampleDomain::Frequency,
            fft_size: 0,
            cp_len: 0,
            ofdm_data_start: 0,
            pilot: PilotPattern::ZadoffChu { root: 1 },
            combining: CombiningCriterion::ZeroForcing,
            noise_variance: default_noise_variance(),
            channel_refresh_interval: default_one(),
            condition_threshold: default_condition_threshold(),
            ingest_queue_depth: default_queue_depth(),
            stage_queue_depth: default_queue_depth(),
            stage_timeout_ms: default_stage_timeout_ms(),
            max_drain_ms: default_max_drain_ms(),
            frames_per_generation: default_one(),
            radio: RadioParameters::default(),
        }
    }
}

impl Config {
    /// Reads and validates a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parses and validates a JSON configuration record.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its legal range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let out_of_range = |field: &'static str, reason: String| Err(ConfigError::OutOfRange { field, reason });

        if self.bs_ant_num == 0 {
            return out_of_range("bs_ant_num", "must be at least 1".into());
        }
        if self.ue_num == 0 {
            return out_of_range("ue_num", "must be at least 1".into());
        }
        if self.ue_num > self.bs_ant_num {
            return out_of_range("ue_num", format!(
                "{} users cannot be separated with {} antennas", self.ue_num, self.bs_ant_num,
            ));
        }
        if self.ofdm_data_num == 0 {
            return out_of_range("ofdm_data_num", "must be at least 1".into());
        }

        let mut nb_pilots = 0;
        let mut nb_uplink = 0;
        for c in self.frame_schedule.chars() {
            match SymbolKind::from_char(c) {
                Some(SymbolKind::Pilot)  => nb_pilots += 1,
                Some(SymbolKind::Uplink) => nb_uplink += 1,
                Some(SymbolKind::Guard)  => (),
                None => return out_of_range("frame_schedule", format!("unknown symbol '{}', expected one of P/U/G", c)),
            }
        }
        if nb_pilots != self.ue_num {
            return out_of_range("frame_schedule", format!(
                "has {} pilot symbols but there are {} users", nb_pilots, self.ue_num,
            ));
        }
        if nb_uplink == 0 {
            return out_of_range("frame_schedule", "must contain at least one uplink symbol".into());
        }

        if self.sample_domain == SampleDomain::Time {
            if self.fft_size == 0 {
                return out_of_range("fft_size", "must be set for time domain samples".into());
            }
            if self.ofdm_data_start + self.ofdm_data_num > self.fft_size {
                return out_of_range("ofdm_data_start", format!(
                    "data subcarriers [{}, {}) exceed the FFT size {}",
                    self.ofdm_data_start, self.ofdm_data_start + self.ofdm_data_num, self.fft_size,
                ));
            }
            if self.cp_len > self.fft_size {
                return out_of_range("cp_len", format!(
                    "cyclic prefix {} is longer than the FFT size {}", self.cp_len, self.fft_size,
                ));
            }
        }

        if let PilotPattern::ZadoffChu { root } = self.pilot {
            let length = self.ofdm_data_num as u64;
            if root == 0 || greatest_common_divisor(root as u64, length) != 1 {
                return out_of_range("pilot", format!(
                    "zadoff-chu root {} must be coprime with the sequence length {}", root, length,
                ));
            }
        }

        if !self.noise_variance.is_finite() || self.noise_variance < 0.0 {
            return out_of_range("noise_variance", format!("{} must be finite and non-negative", self.noise_variance));
        }
        if self.combining == CombiningCriterion::Mmse && self.noise_variance == 0.0 {
            return out_of_range("noise_variance", "must be positive for MMSE combining".into());
        }
        if !(self.condition_threshold > 0.0 && self.condition_threshold < 1.0) {
            return out_of_range("condition_threshold", format!("{} must be in (0,1)", self.condition_threshold));
        }
        if self.channel_refresh_interval == 0 {
            return out_of_range("channel_refresh_interval", "must be at least 1".into());
        }
        if self.ingest_queue_depth == 0 {
            return out_of_range("ingest_queue_depth", "must be at least 1".into());
        }
        if self.stage_queue_depth == 0 {
            return out_of_range("stage_queue_depth", "must be at least 1".into());
        }
        if self.frames_per_generation == 0 {
            return out_of_range("frames_per_generation", "must be at least 1".into());
        }
        Ok(())
    }

    /// Symbol kinds of one frame in transmission order.
    pub fn schedule(&self) -> Vec<SymbolKind> {
        self.frame_schedule
            .chars()
            .filter_map(SymbolKind::from_char)
            .collect()
    }

    /// Number of complex samples per antenna in one symbol as delivered by the front-end.
    pub fn samples_per_symbol(&self) -> usize {
        match self.sample_domain {
            SampleDomain::Frequency => self.ofdm_data_num,
            SampleDomain::Time      => self.cp_len + self.fft_size,
        }
    }

    /// Derives the frame layout. The config should be validated beforehand.
    pub fn frame_parameters(&self) -> FrameParameters {
        FrameParameters::new(
            &self.schedule(),
            self.bs_ant_num,
            self.ue_num,
            self.ofdm_data_num,
            self.samples_per_symbol(),
            self.frames_per_generation,
        )
    }
}

fn greatest_common_divisor(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "bs_ant_num": 8,
        "ue_num": 2,
        "ofdm_data_num": 48,
        "modulation": "16QAM",
        "frame_schedule": "PPUUU"
    }"#;

    #[test]
    fn test_minimal_record_uses_defaults() {
        let config = Config::from_json_str(MINIMAL).unwrap();
        assert_eq!(config.bs_ant_num, 8);
        assert_eq!(config.modulation, Modulation::Qam16);
        assert_eq!(config.sample_domain, SampleDomain::Frequency);
        assert_eq!(config.combining, CombiningCriterion::ZeroForcing);
        assert_eq!(config.channel_refresh_interval, 1);
        assert_eq!(config.frames_per_generation, 1);
        assert_eq!(config.samples_per_symbol(), 48);
    }

    #[test]
    fn test_full_record() {
        let text = r#"{
            "bs_ant_num": 4,
            "ue_num": 1,
            "ofdm_data_num": 16,
            "modulation": "QPSK",
            "frame_schedule": "GPUUG",
            "sample_domain": "time",
            "fft_size": 32,
            "cp_len": 8,
            "ofdm_data_start": 8,
            "pilot": { "kind": "ones" },
            "combining": "mmse",
            "noise_variance": 0.01,
            "channel_refresh_interval": 4,
            "radio": { "sample_rate_hz": 1e6, "frame_duration_us": 1000 }
        }"#;
        let config = Config::from_json_str(text).unwrap();
        assert_eq!(config.pilot, PilotPattern::Ones);
        assert_eq!(config.combining, CombiningCriterion::Mmse);
        assert_eq!(config.samples_per_symbol(), 40);
        assert_eq!(config.radio.frame_duration_us, 1000);
        assert_eq!(config.radio.center_frequency_hz, RadioParameters::default().center_frequency_hz);
        assert_eq!(config.schedule(), vec![
            SymbolKind::Guard, SymbolKind::Pilot, SymbolKind::Uplink, SymbolKind::Uplink, SymbolKind::Guard,
        ]);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_path("/nonexistent/comp/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }), "{:?}", err);
    }

    #[test]
    fn test_malformed_record() {
        assert!(matches!(Config::from_json_str("{ not json"), Err(ConfigError::Malformed(_))));
        // Negative counts cannot be represented
        let negative = MINIMAL.replace("\"bs_ant_num\": 8", "\"bs_ant_num\": -1");
        assert!(matches!(Config::from_json_str(&negative), Err(ConfigError::Malformed(_))));
        let unknown = MINIMAL.replace("\"ue_num\": 2", "\"ue_num\": 2, \"bogus\": 1");
        assert!(matches!(Config::from_json_str(&unknown), Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn test_out_of_range_fields() {
        let cases = [
            ("\"bs_ant_num\": 8", "\"bs_ant_num\": 0", "bs_ant_num"),
            ("\"bs_ant_num\": 8", "\"bs_ant_num\": 1", "ue_num"),
            ("\"frame_schedule\": \"PPUUU\"", "\"frame_schedule\": \"PUUU\"", "frame_schedule"),
            ("\"frame_schedule\": \"PPUUU\"", "\"frame_schedule\": \"PPGG\"", "frame_schedule"),
            ("\"frame_schedule\": \"PPUUU\"", "\"frame_schedule\": \"PPXU\"", "frame_schedule"),
            ("\"ofdm_data_num\": 48", "\"ofdm_data_num\": 0", "ofdm_data_num"),
        ];
        for (from, to, expected_field) in cases {
            let text = MINIMAL.replace(from, to);
            match Config::from_json_str(&text) {
                Err(ConfigError::OutOfRange { field, .. }) => assert_eq!(field, expected_field, "{}", to),
                other => panic!("expected out of range for {}, got {:?}", to, other),
            }
        }
    }

    #[test]
    fn test_zadoff_chu_root_must_be_coprime() {
        let mut config = Config::default();
        config.ofdm_data_num = 48;
        config.pilot = PilotPattern::ZadoffChu { root: 6 };
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "pilot", .. })));
        config.pilot = PilotPattern::ZadoffChu { root: 5 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_time_domain_requires_fft() {
        let mut config = Config::default();
        config.sample_domain = SampleDomain::Time;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "fft_size", .. })));
        config.fft_size = 64;
        config.ofdm_data_start = 8;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "ofdm_data_start", .. })));
        config.ofdm_data_start = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cyclic_prefix_fits_symbol() {
        let mut config = Config::default();
        config.ofdm_data_num = 8;
        config.sample_domain = SampleDomain::Time;
        config.fft_size = 8;
        config.cp_len = 16;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "cp_len", .. })));
        // A prefix spanning the whole symbol is legal
        config.cp_len = 8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mmse_requires_noise() {
        let mut config = Config::default();
        config.combining = CombiningCriterion::Mmse;
        config.noise_variance = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "noise_variance", .. })));
    }

    #[test]
    fn test_modulation_orders() {
        assert_eq!(Modulation::Bpsk.bits_per_symbol(), 1);
        assert_eq!(Modulation::Qpsk.bits_per_symbol(), 2);
        assert_eq!(Modulation::Qam16.bits_per_symbol(), 4);
        assert_eq!(Modulation::Qam64.bits_per_symbol(), 6);
    }

    #[test]
    fn test_sample_config() {
        let config = Config::from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/../../configs/uplink_8x4.json")).unwrap();
        assert_eq!(config.pilot, PilotPattern::ZadoffChu { root: 5 });
        assert_eq!(config.combining, CombiningCriterion::Mmse);
        assert_eq!(config.samples_per_symbol(), 80);
        assert_eq!(config.frame_parameters().nb_data_symbols(), 6);
    }
}

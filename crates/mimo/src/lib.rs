pub mod complex_matrix;
pub mod pilot_sequence;
pub mod ofdm_front_end;
pub mod channel_estimator;
pub mod beamformer;
pub mod constellation;

pub mod gaussian_noise;
pub mod channel_model;
pub mod transmit_log;
pub mod uplink_simulator;

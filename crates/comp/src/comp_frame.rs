use comp_core::comp_parameters::FrameParameters;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use num::complex::Complex32;
use std::time::Duration;

/// Raw samples of one frame received on every antenna.
/// Samples are laid out as `[symbol][antenna][sample]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_index: u64,
    pub samples: Vec<Complex32>,
}

impl Frame {
    pub fn new(frame_index: u64, samples: Vec<Complex32>) -> Self {
        Self { frame_index, samples }
    }

    pub fn zeros(frame_index: u64, params: &FrameParameters) -> Self {
        Self::new(frame_index, vec![Complex32::default(); params.nb_samples_per_frame])
    }

    pub fn has_layout(&self, params: &FrameParameters) -> bool {
        self.samples.len() == params.nb_samples_per_frame
    }

    pub fn symbol_antenna(&self, params: &FrameParameters, symbol: usize, antenna: usize) -> &[Complex32] {
        &self.samples[sample_span(params, symbol, antenna)]
    }

    pub fn symbol_antenna_mut(&mut self, params: &FrameParameters, symbol: usize, antenna: usize) -> &mut [Complex32] {
        &mut self.samples[sample_span(params, symbol, antenna)]
    }
}

#[inline(always)]
fn sample_span(params: &FrameParameters, symbol: usize, antenna: usize) -> std::ops::Range<usize> {
    assert!(symbol < params.nb_symbols && antenna < params.nb_antennas);
    let length = params.nb_samples_per_symbol;
    let start = (symbol*params.nb_antennas + antenna)*length;
    start..start+length
}

/// Result of polling a frame source.
#[derive(Debug)]
pub enum SourceRead {
    Frame(Frame),
    /// Nothing arrived within the timeout. The source may be polled again.
    Timeout,
    /// The source will never produce another frame.
    Finished,
}

/// A radio front-end or simulator that produces frames for the ingest stage.
pub trait FrameSource: Send {
    /// Waits at most `timeout` for the next frame.
    fn next_frame(&mut self, timeout: Duration) -> SourceRead;
}

/// Frames sent into a channel by some other producer thread.
impl FrameSource for Receiver<Frame> {
    fn next_frame(&mut self, timeout: Duration) -> SourceRead {
        match self.recv_timeout(timeout) {
            Ok(frame) => SourceRead::Frame(frame),
            Err(RecvTimeoutError::Timeout) => SourceRead::Timeout,
            Err(RecvTimeoutError::Disconnected) => SourceRead::Finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comp_core::comp_config::Config;
    use crossbeam::channel;

    #[test]
    fn test_symbol_antenna_layout() {
        let mut config = Config::default();
        config.bs_ant_num = 2;
        config.ue_num = 1;
        config.ofdm_data_num = 3;
        config.frame_schedule = "PU".into();
        let params = config.frame_parameters();

        let mut frame = Frame::zeros(7, &params);
        assert!(frame.has_layout(&params));
        frame.symbol_antenna_mut(&params, 1, 0).fill(Complex32::new(1.0, 0.0));
        frame.symbol_antenna_mut(&params, 1, 1).fill(Complex32::new(2.0, 0.0));

        // [P a0][P a1][U a0][U a1]
        let expected: Vec<f32> = vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0];
        let actual: Vec<f32> = frame.samples.iter().map(|x| x.re).collect();
        assert_eq!(actual, expected);
        assert_eq!(frame.symbol_antenna(&params, 1, 1), &[Complex32::new(2.0, 0.0); 3]);
    }

    #[test]
    fn test_channel_source() {
        let (tx, mut rx) = channel::bounded(1);
        tx.send(Frame::new(0, vec![])).unwrap();
        assert!(matches!(rx.next_frame(Duration::from_millis(1)), SourceRead::Frame(f) if f.frame_index == 0));
        assert!(matches!(rx.next_frame(Duration::from_millis(1)), SourceRead::Timeout));
        drop(tx);
        assert!(matches!(rx.next_frame(Duration::from_millis(1)), SourceRead::Finished));
    }
}

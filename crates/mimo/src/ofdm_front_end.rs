use std::sync::Arc;
use num::complex::Complex32;
use rustfft::{FftPlanner, Fft};

/// Converts between time domain OFDM symbols and the subset of FFT bins carrying data.
///
/// # Diagram
/// ```text
/// | Symbol                      |
/// | Cyclic prefix | FFT         |
/// FFT bins: | ... | data_start .. data_start+nb_data | ... |
/// ```
pub struct OfdmFrontEnd {
    nb_fft: usize,
    nb_cyclic_prefix: usize,
    data_start: usize,
    nb_data: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    fft_buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl OfdmFrontEnd {
    pub fn new(nb_fft: usize, nb_cyclic_prefix: usize, data_start: usize, nb_data: usize) -> Self {
        assert!(nb_fft > 0, "FFT size must be non-zero");
        assert!(data_start + nb_data <= nb_fft, "Data bins [{},{}) exceed FFT size {}", data_start, data_start + nb_data, nb_fft);
        assert!(nb_cyclic_prefix <= nb_fft, "Cyclic prefix {} is longer than FFT size {}", nb_cyclic_prefix, nb_fft);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(nb_fft);
        let ifft = planner.plan_fft_inverse(nb_fft);
        let scratch_length = fft.get_inplace_scratch_len().max(ifft.get_inplace_scratch_len());

        Self {
            nb_fft,
            nb_cyclic_prefix,
            data_start,
            nb_data,
            fft,
            ifft,
            fft_buffer: vec![Complex32::default(); nb_fft],
            scratch: vec![Complex32::default(); scratch_length],
        }
    }

    /// Number of time samples in one symbol including the cyclic prefix.
    pub fn nb_symbol_period(&self) -> usize {
        self.nb_cyclic_prefix + self.nb_fft
    }

    pub fn nb_data(&self) -> usize {
        self.nb_data
    }

    /// Strips the cyclic prefix, runs the FFT and copies out the data bins.
    pub fn demodulate(&mut self, symbol: &[Complex32], data_out: &mut [Complex32]) {
        assert!(symbol.len() == self.nb_symbol_period(), "Symbol has {} samples but expected {}", symbol.len(), self.nb_symbol_period());
        assert!(data_out.len() == self.nb_data, "Output has {} bins but expected {}", data_out.len(), self.nb_data);

        self.fft_buffer.copy_from_slice(&symbol[self.nb_cyclic_prefix..]);
        self.fft.process_with_scratch(&mut self.fft_buffer, &mut self.scratch);
        data_out.copy_from_slice(&self.fft_buffer[span_slice(self.data_start, self.nb_data)]);
    }

    /// Places data onto its bins, runs the inverse FFT and prepends the cyclic prefix.
    /// The output is scaled so that demodulate(modulate(x)) == x.
    pub fn modulate(&mut self, data_in: &[Complex32], symbol: &mut [Complex32]) {
        assert!(data_in.len() == self.nb_data, "Input has {} bins but expected {}", data_in.len(), self.nb_data);
        assert!(symbol.len() == self.nb_symbol_period(), "Symbol has {} samples but expected {}", symbol.len(), self.nb_symbol_period());

        self.fft_buffer.fill(Complex32::default());
        self.fft_buffer[span_slice(self.data_start, self.nb_data)].copy_from_slice(data_in);
        self.ifft.process_with_scratch(&mut self.fft_buffer, &mut self.scratch);

        let scale = 1.0 / (self.nb_fft as f32);
        for x in &mut self.fft_buffer {
            *x *= scale;
        }

        let (prefix, body) = symbol.split_at_mut(self.nb_cyclic_prefix);
        body.copy_from_slice(&self.fft_buffer);
        prefix.copy_from_slice(&self.fft_buffer[self.nb_fft-self.nb_cyclic_prefix..]);
    }
}

#[inline(always)]
fn span_slice(start: usize, length: usize) -> std::ops::Range<usize> {
    start..start+length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulate_demodulate() {
        let mut front_end = OfdmFrontEnd::new(64, 16, 8, 48);
        let data: Vec<Complex32> = (0..48)
            .map(|i| Complex32::new((i as f32).cos(), (i as f32 * 0.5).sin()))
            .collect();
        let mut symbol = vec![Complex32::default(); front_end.nb_symbol_period()];
        front_end.modulate(&data, &mut symbol);

        // Cyclic prefix is a copy of the tail of the symbol
        for i in 0..16 {
            assert!((symbol[i] - symbol[64 + i]).norm() < 1e-7);
        }

        let mut recovered = vec![Complex32::default(); 48];
        front_end.demodulate(&symbol, &mut recovered);
        for (x, y) in data.iter().zip(recovered.iter()) {
            assert!((x - y).norm() < 1e-5, "{} != {}", x, y);
        }
    }

    #[test]
    #[should_panic(expected = "Cyclic prefix")]
    fn test_prefix_longer_than_fft() {
        OfdmFrontEnd::new(8, 16, 0, 8);
    }

    #[test]
    fn test_prefix_spans_whole_symbol() {
        let mut front_end = OfdmFrontEnd::new(8, 8, 0, 8);
        let data: Vec<Complex32> = (0..8).map(|i| Complex32::new(i as f32, 1.0)).collect();
        let mut symbol = vec![Complex32::default(); 16];
        front_end.modulate(&data, &mut symbol);
        assert_eq!(&symbol[..8], &symbol[8..]);
    }

    #[test]
    fn test_single_tone() {
        let mut front_end = OfdmFrontEnd::new(16, 0, 0, 16);
        let tone: Vec<Complex32> = (0..16)
            .map(|n| {
                let phase = 2.0 * std::f32::consts::PI * 3.0 * (n as f32) / 16.0;
                Complex32::new(phase.cos(), phase.sin())
            })
            .collect();
        let mut bins = vec![Complex32::default(); 16];
        front_end.demodulate(&tone, &mut bins);
        for (i, x) in bins.iter().enumerate() {
            let expected = if i == 3 { 16.0 } else { 0.0 };
            assert!((x.norm() - expected).abs() < 1e-3, "bin {} = {}", i, x);
        }
    }
}

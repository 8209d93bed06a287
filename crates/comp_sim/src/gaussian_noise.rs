use num::complex::Complex32;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Circularly symmetric complex gaussian samples through the Box-Muller transform.
/// Each call produces one complex sample from one pair of uniforms.
pub struct GaussianNoise {
    rng: ChaCha8Rng,
    /// Standard deviation of each of the real and imaginary parts.
    component_std: f32,
}

impl GaussianNoise {
    /// `variance` is the total power E[|n|^2] of each complex sample.
    pub fn new(variance: f32, seed: u64) -> Self {
        assert!(variance >= 0.0 && variance.is_finite(), "Noise variance {} must be finite and non-negative", variance);
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            component_std: (variance / 2.0).sqrt(),
        }
    }

    pub fn variance(&self) -> f32 {
        2.0 * self.component_std * self.component_std
    }

    pub fn sample(&mut self) -> Complex32 {
        if self.component_std == 0.0 {
            return Complex32::default();
        }
        let u1: f32 = self.rng.gen();
        let u2: f32 = self.rng.gen();
        // Avoid ln(0)
        let u1 = u1.max(1e-12);
        let r = (-2.0 * u1.ln()).sqrt() * self.component_std;
        let theta = 2.0 * std::f32::consts::PI * u2;
        Complex32::new(r * theta.cos(), r * theta.sin())
    }

    pub fn add_to(&mut self, samples: &mut [Complex32]) {
        if self.component_std == 0.0 {
            return;
        }
        for x in samples {
            *x += self.sample();
        }
    }
}

/// Converts a signal to noise ratio in dB to the noise variance for unit power signals.
pub fn snr_db_to_noise_variance(snr_db: f32) -> f32 {
    10.0_f32.powf(-snr_db / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_power() {
        let mut noise = GaussianNoise::new(0.5, 42);
        let n = 50_000;
        let samples: Vec<Complex32> = (0..n).map(|_| noise.sample()).collect();
        let power: f32 = samples.iter().map(|x| x.norm_sqr()).sum::<f32>() / n as f32;
        let mean: Complex32 = samples.iter().sum::<Complex32>() / n as f32;
        assert!((power - 0.5).abs() < 0.02, "power = {}", power);
        assert!(mean.norm() < 0.02, "mean = {}", mean);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let mut a = GaussianNoise::new(1.0, 7);
        let mut b = GaussianNoise::new(1.0, 7);
        for _ in 0..16 {
            assert_eq!(a.sample(), b.sample());
        }
    }

    #[test]
    fn test_zero_variance_is_silent() {
        let mut noise = GaussianNoise::new(0.0, 1);
        let mut samples = vec![Complex32::new(1.0, -1.0); 8];
        noise.add_to(&mut samples);
        assert!(samples.iter().all(|x| *x == Complex32::new(1.0, -1.0)));
    }

    #[test]
    fn test_snr_conversion() {
        assert!((snr_db_to_noise_variance(0.0) - 1.0).abs() < 1e-6);
        assert!((snr_db_to_noise_variance(20.0) - 0.01).abs() < 1e-6);
    }
}

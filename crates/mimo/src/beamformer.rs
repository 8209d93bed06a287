use crate::channel_estimator::ChannelEstimate;
use crate::complex_matrix::ComplexMatrix;
use num::complex::{Complex32, Complex64};
use std::fmt;

/// Linear combining criterion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Combiner {
    /// W = (H^H H)^-1 H^H
    ZeroForcing,
    /// W = (H^H H + sigma^2 I)^-1 H^H
    Mmse { noise_variance: f64 },
}

/// Reason a subcarrier has no usable combining weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightFailure {
    /// The channel carries no energy at all.
    NoSignal,
    /// Inversion hit a zero or non-finite pivot.
    Singular,
    /// Inversion succeeded but the result cannot be trusted.
    IllConditioned { reciprocal_condition: f64 },
}

impl fmt::Display for WeightFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightFailure::NoSignal => write!(f, "no signal"),
            WeightFailure::Singular => write!(f, "singular channel"),
            WeightFailure::IllConditioned { reciprocal_condition } => write!(f, "ill-conditioned channel (rcond={:.3e})", reciprocal_condition),
        }
    }
}

/// Combining weights for every subcarrier.
/// Each usable subcarrier holds a (users x antennas) matrix stored row major.
#[derive(Debug, Clone)]
pub struct CombiningWeights {
    pub nb_antennas: usize,
    pub nb_users: usize,
    subcarriers: Vec<Result<Vec<Complex32>, WeightFailure>>,
}

impl CombiningWeights {
    pub fn nb_subcarriers(&self) -> usize {
        self.subcarriers.len()
    }

    pub fn failure(&self, k: usize) -> Option<WeightFailure> {
        self.subcarriers[k].as_ref().err().copied()
    }

    pub fn is_degraded(&self, k: usize) -> bool {
        self.subcarriers[k].is_err()
    }

    pub fn degraded_subcarriers(&self) -> impl Iterator<Item = (usize, WeightFailure)> + '_ {
        self.subcarriers
            .iter()
            .enumerate()
            .filter_map(|(k, w)| w.as_ref().err().map(|failure| (k, *failure)))
    }

    pub fn nb_degraded(&self) -> usize {
        self.subcarriers.iter().filter(|w| w.is_err()).count()
    }

    /// Combines the received samples of every antenna on subcarrier k into one symbol per user.
    /// Degraded subcarriers produce zeroed symbols and return the failure.
    pub fn equalize(&self, k: usize, received: &[Complex32], users_out: &mut [Complex32]) -> Result<(), WeightFailure> {
        assert!(received.len() == self.nb_antennas, "Expected {} antenna samples but got {}", self.nb_antennas, received.len());
        assert!(users_out.len() == self.nb_users, "Expected {} user outputs but got {}", self.nb_users, users_out.len());

        let weights = match &self.subcarriers[k] {
            Ok(weights) => weights,
            Err(failure) => {
                users_out.fill(Complex32::default());
                return Err(*failure);
            },
        };

        for (u, x) in users_out.iter_mut().enumerate() {
            let row = &weights[u*self.nb_antennas..(u+1)*self.nb_antennas];
            *x = row.iter().zip(received.iter()).map(|(w, y)| w * y).sum();
        }
        Ok(())
    }
}

/// Computes combining weights from a channel estimate.
#[derive(Debug, Clone, Copy)]
pub struct Beamformer {
    combiner: Combiner,
    condition_threshold: f64,
}

impl Beamformer {
    pub fn new(combiner: Combiner, condition_threshold: f64) -> Self {
        assert!(condition_threshold > 0.0 && condition_threshold < 1.0, "Condition threshold {} must be in (0,1)", condition_threshold);
        if let Combiner::Mmse { noise_variance } = combiner {
            assert!(noise_variance > 0.0 && noise_variance.is_finite(), "MMSE noise variance {} must be positive", noise_variance);
        }
        Self { combiner, condition_threshold }
    }

    pub fn combiner(&self) -> Combiner {
        self.combiner
    }

    /// Weights for a single (antennas x users) channel matrix.
    pub fn compute_subcarrier(&self, h: &ComplexMatrix) -> Result<ComplexMatrix, WeightFailure> {
        if !h.is_finite() {
            return Err(WeightFailure::Singular);
        }

        let mut gram = h.gram();
        if gram.trace_re() <= 0.0 {
            return Err(WeightFailure::NoSignal);
        }
        if let Combiner::Mmse { noise_variance } = self.combiner {
            gram.add_to_diagonal(noise_variance);
        }

        let inverse = gram.inverse().ok_or(WeightFailure::Singular)?;
        let reciprocal_condition = gram.reciprocal_condition(&inverse);
        if reciprocal_condition < self.condition_threshold {
            return Err(WeightFailure::IllConditioned { reciprocal_condition });
        }
        Ok(inverse.mul(&h.hermitian()))
    }

    /// Weights for every subcarrier of the estimate.
    /// A failing subcarrier never affects its neighbours.
    pub fn compute(&self, estimate: &ChannelEstimate) -> CombiningWeights {
        let subcarriers = estimate
            .iter()
            .map(|h| {
                self.compute_subcarrier(h).map(|w| {
                    w.as_slice()
                        .iter()
                        .map(|x: &Complex64| Complex32::new(x.re as f32, x.im as f32))
                        .collect()
                })
            })
            .collect();

        CombiningWeights {
            nb_antennas: estimate.nb_antennas,
            nb_users: estimate.nb_users,
            subcarriers,
        }
    }
}

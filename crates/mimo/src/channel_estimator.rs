use crate::complex_matrix::ComplexMatrix;
use itertools::izip;
use num::complex::{Complex32, Complex64};

/// Per subcarrier uplink channel.
/// Each subcarrier holds an (antennas x users) matrix of complex gains.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEstimate {
    pub nb_antennas: usize,
    pub nb_users: usize,
    matrices: Vec<ComplexMatrix>,
}

impl ChannelEstimate {
    pub fn new(nb_antennas: usize, nb_users: usize, nb_subcarriers: usize) -> Self {
        Self {
            nb_antennas,
            nb_users,
            matrices: vec![ComplexMatrix::zeros(nb_antennas, nb_users); nb_subcarriers],
        }
    }

    /// Creates an estimate from existing per subcarrier matrices.
    pub fn from_matrices(matrices: Vec<ComplexMatrix>) -> Self {
        assert!(!matrices.is_empty(), "Channel estimate requires at least one subcarrier");
        let nb_antennas = matrices[0].rows();
        let nb_users = matrices[0].cols();
        assert!(matrices.iter().all(|m| m.rows() == nb_antennas && m.cols() == nb_users), "Subcarrier matrices must share the same shape");
        Self { nb_antennas, nb_users, matrices }
    }

    pub fn nb_subcarriers(&self) -> usize {
        self.matrices.len()
    }

    pub fn subcarrier(&self, k: usize) -> &ComplexMatrix {
        &self.matrices[k]
    }

    pub fn subcarrier_mut(&mut self, k: usize) -> &mut ComplexMatrix {
        &mut self.matrices[k]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComplexMatrix> {
        self.matrices.iter()
    }
}

/// Least squares channel estimator for time orthogonal pilots.
/// Each user transmits the same known pilot sequence in its own symbol,
/// so the received pilot on an antenna divided by the pilot gives one column of the channel.
pub struct ChannelEstimator {
    nb_antennas: usize,
    nb_users: usize,
    /// conj(p)/|p|^2 for each subcarrier.
    pilot_reciprocal: Vec<Complex64>,
}

impl ChannelEstimator {
    pub fn new(nb_antennas: usize, nb_users: usize, pilot: &[Complex32]) -> Self {
        assert!(!pilot.is_empty(), "Pilot sequence cannot be empty");
        assert!(pilot.iter().all(|p| p.norm_sqr() > 0.0), "Pilot sequence cannot contain zero valued subcarriers");

        let pilot_reciprocal = pilot
            .iter()
            .map(|p| {
                let p = Complex64::new(p.re as f64, p.im as f64);
                p.conj() / p.norm_sqr()
            })
            .collect();

        Self {
            nb_antennas,
            nb_users,
            pilot_reciprocal,
        }
    }

    pub fn nb_subcarriers(&self) -> usize {
        self.pilot_reciprocal.len()
    }

    pub fn empty_estimate(&self) -> ChannelEstimate {
        ChannelEstimate::new(self.nb_antennas, self.nb_users, self.nb_subcarriers())
    }

    /// Fills the (antenna, user) entry of every subcarrier from one received pilot symbol.
    pub fn update(&self, estimate: &mut ChannelEstimate, user: usize, antenna: usize, received: &[Complex32]) {
        assert!(user < self.nb_users, "User {} is out of range for {} users", user, self.nb_users);
        assert!(antenna < self.nb_antennas, "Antenna {} is out of range for {} antennas", antenna, self.nb_antennas);
        assert!(received.len() == self.nb_subcarriers(), "Received pilot has {} subcarriers but expected {}", received.len(), self.nb_subcarriers());
        assert!(estimate.nb_subcarriers() == self.nb_subcarriers());

        for (k, y, p) in izip!(0..received.len(), received.iter(), self.pilot_reciprocal.iter()) {
            let y = Complex64::new(y.re as f64, y.im as f64);
            estimate.subcarrier_mut(k)[(antenna, user)] = y * p;
        }
    }
}

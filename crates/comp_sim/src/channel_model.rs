use crate::gaussian_noise::GaussianNoise;
use crate::uplink_simulator::SimulatorError;
use mimo::complex_matrix::ComplexMatrix;
use num::complex::{Complex32, Complex64};

/// Propagation between the users and the base station antennas.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelModel {
    /// Antenna a hears only user a.
    Identity,
    /// Independent CN(0,1) gains for every subcarrier, antenna and user, fixed for the whole run.
    Rayleigh,
    /// One (antennas x users) matrix per subcarrier.
    Explicit(Vec<ComplexMatrix>),
}

/// Per subcarrier channel matrices realised from a model.
#[derive(Debug, Clone)]
pub struct ChannelRealisation {
    nb_antennas: usize,
    nb_users: usize,
    /// Laid out as `[subcarrier][antenna][user]`.
    gains: Vec<Complex32>,
}

impl ChannelRealisation {
    pub fn new(model: &ChannelModel, nb_antennas: usize, nb_users: usize, nb_subcarriers: usize, seed: u64) -> Result<Self, SimulatorError> {
        let nb_gains = nb_subcarriers*nb_antennas*nb_users;
        let gains = match model {
            ChannelModel::Identity => {
                let mut gains = vec![Complex32::default(); nb_gains];
                for k in 0..nb_subcarriers {
                    for u in 0..nb_users.min(nb_antennas) {
                        gains[(k*nb_antennas + u)*nb_users + u] = Complex32::new(1.0, 0.0);
                    }
                }
                gains
            },
            ChannelModel::Rayleigh => {
                let mut noise = GaussianNoise::new(1.0, seed);
                (0..nb_gains).map(|_| noise.sample()).collect()
            },
            ChannelModel::Explicit(matrices) => {
                if matrices.len() != nb_subcarriers {
                    return Err(SimulatorError::ChannelShape(format!(
                        "expected {} channel matrices but got {}", nb_subcarriers, matrices.len(),
                    )));
                }
                if let Some(m) = matrices.iter().find(|m| m.rows() != nb_antennas || m.cols() != nb_users) {
                    return Err(SimulatorError::ChannelShape(format!(
                        "expected {}x{} channel matrices but got {}x{}", nb_antennas, nb_users, m.rows(), m.cols(),
                    )));
                }
                matrices
                    .iter()
                    .flat_map(|m| m.as_slice().iter())
                    .map(|x| Complex32::new(x.re as f32, x.im as f32))
                    .collect()
            },
        };

        Ok(Self { nb_antennas, nb_users, gains })
    }

    pub fn nb_subcarriers(&self) -> usize {
        self.gains.len() / (self.nb_antennas*self.nb_users)
    }

    #[inline(always)]
    pub fn gain(&self, subcarrier: usize, antenna: usize, user: usize) -> Complex32 {
        self.gains[(subcarrier*self.nb_antennas + antenna)*self.nb_users + user]
    }

    /// Makes a subcarrier rank deficient by giving every user the channel of user 0.
    pub fn make_singular(&mut self, subcarrier: usize) {
        for a in 0..self.nb_antennas {
            let row = (subcarrier*self.nb_antennas + a)*self.nb_users;
            let first = self.gains[row];
            self.gains[row..row+self.nb_users].fill(first);
        }
    }

    /// Channel of one subcarrier as a matrix.
    pub fn matrix(&self, subcarrier: usize) -> ComplexMatrix {
        let start = subcarrier*self.nb_antennas*self.nb_users;
        let data = self.gains[start..start+self.nb_antennas*self.nb_users]
            .iter()
            .map(|x| Complex64::new(x.re as f64, x.im as f64))
            .collect();
        ComplexMatrix::from_row_major(self.nb_antennas, self.nb_users, data)
    }
}

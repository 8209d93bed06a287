use crate::comp_config::SymbolKind;

/// Describes the layout of one uplink frame as seen by the receiver.
/// A frame is one pass through the frame schedule, received on every base station antenna.
/// The i-th pilot symbol carries the pilot of user i so that pilots are orthogonal in time.
///
/// # Diagram
/// ```text
/// | Frame                                     |
/// | P(ue0) | P(ue1) | U | U | G | U | ...     |
/// ```
///
/// Samples are stored as `[symbol][antenna][sample]`.
/// Equalized outputs are stored as `[data symbol][subcarrier][user]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameParameters {
    /// Number of symbols in the frame schedule including guards.
    pub nb_symbols: usize,
    /// Number of base station antennas.
    pub nb_antennas: usize,
    /// Number of spatially multiplexed users.
    pub nb_users: usize,
    /// Number of data subcarriers per OFDM symbol.
    pub nb_subcarriers: usize,
    /// Number of complex samples per antenna per symbol as delivered by the front-end.
    pub nb_samples_per_symbol: usize,
    /// Number of complex samples for the entire frame.
    pub nb_samples_per_frame: usize,
    /// Symbol indices carrying pilots, ordered by user.
    pub pilot_symbols: Vec<usize>,
    /// Symbol indices carrying uplink data.
    pub data_symbols: Vec<usize>,
    /// Number of equalized (and demodulated) values produced per frame.
    pub nb_output_per_frame: usize,
    /// Number of frames per output generation.
    pub nb_frames_per_generation: usize,
    /// Maximum number of equalized (and demodulated) values in one output generation.
    pub nb_output_per_generation: usize,
}

impl FrameParameters {
    /// Creates all derived parameters from the frame schedule and array dimensions.
    pub fn new(
        schedule: &[SymbolKind],
        nb_antennas: usize,
        nb_users: usize,
        nb_subcarriers: usize,
        nb_samples_per_symbol: usize,
        nb_frames_per_generation: usize,
    ) -> Self
    {
        assert!(nb_users >= 1, "At least one user is required");
        assert!(nb_antennas >= nb_users, "Number of antennas {} is less than number of users {}", nb_antennas, nb_users);
        assert!(nb_samples_per_symbol >= nb_subcarriers, "Number of samples per symbol is less than number of subcarriers");
        assert!(nb_frames_per_generation >= 1, "Output generations must hold at least one frame");

        let pilot_symbols: Vec<usize> = schedule
            .iter()
            .enumerate()
            .filter(|(_, kind)| **kind == SymbolKind::Pilot)
            .map(|(i, _)| i)
            .collect();
        let data_symbols: Vec<usize> = schedule
            .iter()
            .enumerate()
            .filter(|(_, kind)| **kind == SymbolKind::Uplink)
            .map(|(i, _)| i)
            .collect();
        assert!(pilot_symbols.len() == nb_users, "Frame schedule has {} pilots for {} users", pilot_symbols.len(), nb_users);

        let nb_symbols = schedule.len();
        let nb_samples_per_frame = nb_symbols*nb_antennas*nb_samples_per_symbol;
        let nb_output_per_frame = data_symbols.len()*nb_subcarriers*nb_users;
        let nb_output_per_generation = nb_output_per_frame*nb_frames_per_generation;

        Self {
            nb_symbols,
            nb_antennas,
            nb_users,
            nb_subcarriers,
            nb_samples_per_symbol,
            nb_samples_per_frame,
            pilot_symbols,
            data_symbols,
            nb_output_per_frame,
            nb_frames_per_generation,
            nb_output_per_generation,
        }
    }

    pub fn nb_pilot_symbols(&self) -> usize {
        self.pilot_symbols.len()
    }

    pub fn nb_data_symbols(&self) -> usize {
        self.data_symbols.len()
    }

    /// Offset of an output value within one frame's equalized block.
    #[inline(always)]
    pub fn output_index(&self, data_symbol: usize, subcarrier: usize, user: usize) -> usize {
        (data_symbol*self.nb_subcarriers + subcarrier)*self.nb_users + user
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comp_config::Config;

    #[test]
    fn test_layout_from_schedule() {
        let mut config = Config::default();
        config.bs_ant_num = 4;
        config.ue_num = 2;
        config.ofdm_data_num = 64;
        config.frame_schedule = "PGPUUGU".into();
        config.frames_per_generation = 3;

        let params = config.frame_parameters();
        assert_eq!(params.nb_symbols, 7);
        assert_eq!(params.pilot_symbols, vec![0, 2]);
        assert_eq!(params.data_symbols, vec![3, 4, 6]);
        assert_eq!(params.nb_samples_per_frame, 7*4*64);
        assert_eq!(params.nb_output_per_frame, 3*64*2);
        assert_eq!(params.nb_output_per_generation, 3*3*64*2);
        assert_eq!(params.output_index(1, 2, 1), (64 + 2)*2 + 1);
    }
}

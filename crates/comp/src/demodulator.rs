use crate::equalizer::EqualizedFrame;
use crate::pipeline_events::{EventHub, PipelineEvent};
use comp_core::comp_config::Modulation;
use mimo::constellation::{Constellation, INVALID_SYMBOL};
use std::sync::Arc;

/// Hard decisions of one frame, laid out like the equalized symbols.
#[derive(Debug, Clone)]
pub struct DemodulatedFrame {
    pub frame_index: u64,
    pub decisions: Vec<i64>,
}

pub struct Demodulator {
    constellation: Constellation,
    nb_subcarriers: usize,
    nb_users: usize,
    events: Arc<EventHub>,
}

pub fn get_constellation(modulation: Modulation) -> Constellation {
    match modulation {
        Modulation::Bpsk  => Constellation::bpsk(),
        Modulation::Qpsk  => Constellation::qpsk(),
        Modulation::Qam16 => Constellation::qam16(),
        Modulation::Qam64 => Constellation::qam64(),
    }
}

impl Demodulator {
    pub fn new(modulation: Modulation, nb_subcarriers: usize, nb_users: usize, events: Arc<EventHub>) -> Self {
        Self {
            constellation: get_constellation(modulation),
            nb_subcarriers,
            nb_users,
            events,
        }
    }

    pub fn constellation(&self) -> &Constellation {
        &self.constellation
    }

    /// Degraded subcarriers map to the invalid sentinel without being sliced.
    pub fn process(&self, frame: &EqualizedFrame) -> DemodulatedFrame {
        assert!(frame.degraded.len() == self.nb_subcarriers);
        assert!(frame.symbols.len() % (self.nb_subcarriers*self.nb_users) == 0);

        let mut nb_invalid = 0;
        let decisions = frame.symbols
            .chunks_exact(self.nb_users)
            .enumerate()
            .flat_map(|(i, users)| {
                let is_degraded = frame.degraded[i % self.nb_subcarriers];
                users.iter().map(move |x| (is_degraded, *x))
            })
            .map(|(is_degraded, x)| {
                if is_degraded {
                    return INVALID_SYMBOL;
                }
                let decision = self.constellation.demodulate(x);
                if decision == INVALID_SYMBOL {
                    nb_invalid += 1;
                }
                decision
            })
            .collect();

        if nb_invalid > 0 {
            self.events.emit(PipelineEvent::InvalidSymbols {
                frame_index: frame.frame_index,
                count: nb_invalid,
            });
        }

        DemodulatedFrame {
            frame_index: frame.frame_index,
            decisions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num::complex::Complex32;

    #[test]
    fn test_decisions_follow_symbol_order() {
        let events = Arc::new(EventHub::new());
        let demodulator = Demodulator::new(Modulation::Qpsk, 2, 2, events.clone());
        let constellation = demodulator.constellation().clone();
        let labels = [3usize, 0, 1, 2, 2, 1, 0, 3];
        let frame = EqualizedFrame {
            frame_index: 9,
            symbols: labels.iter().map(|&l| constellation.modulate(l)).collect(),
            degraded: vec![false, false],
        };
        let demodulated = demodulator.process(&frame);
        assert_eq!(demodulated.frame_index, 9);
        assert_eq!(demodulated.decisions, labels.iter().map(|&l| l as i64).collect::<Vec<_>>());
        assert_eq!(events.stats().invalid_symbols, 0);
    }

    #[test]
    fn test_sentinels() {
        let events = Arc::new(EventHub::new());
        let demodulator = Demodulator::new(Modulation::Qam16, 2, 1, events.clone());
        let point = demodulator.constellation().modulate(5);
        // Two data symbols over two subcarriers, subcarrier 1 is degraded
        let frame = EqualizedFrame {
            frame_index: 0,
            symbols: vec![point, Complex32::default(), Complex32::new(f32::NAN, 0.0), point],
            degraded: vec![false, true],
        };
        let demodulated = demodulator.process(&frame);
        assert_eq!(demodulated.decisions, vec![5, INVALID_SYMBOL, INVALID_SYMBOL, INVALID_SYMBOL]);
        // Only the NaN counts as invalid, degraded subcarriers are already reported by the equalizer
        assert_eq!(events.stats().invalid_symbols, 1);
    }
}

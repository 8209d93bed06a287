use itertools::izip;
use mimo::constellation::INVALID_SYMBOL;
use serde::Serialize;
use std::fmt;

/// Per user error counts of demodulated symbols against what was transmitted.
/// Inputs are laid out with the user as the fastest changing index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhyStats {
    nb_users: usize,
    bits_per_symbol: usize,
    decoded_symbols: Vec<u64>,
    symbol_errors: Vec<u64>,
    bit_errors: Vec<u64>,
    invalid_symbols: Vec<u64>,
}

impl PhyStats {
    pub fn new(nb_users: usize, bits_per_symbol: usize) -> Self {
        assert!(nb_users > 0);
        Self {
            nb_users,
            bits_per_symbol,
            decoded_symbols: vec![0; nb_users],
            symbol_errors: vec![0; nb_users],
            bit_errors: vec![0; nb_users],
            invalid_symbols: vec![0; nb_users],
        }
    }

    /// Compares decisions with the transmitted labels.
    /// An invalid decision counts as a symbol error with every bit wrong.
    pub fn update(&mut self, decisions: &[i64], transmitted: &[i64]) {
        assert!(decisions.len() == transmitted.len(), "Got {} decisions for {} transmitted symbols", decisions.len(), transmitted.len());
        for (i, &decision, &reference) in izip!(0.., decisions.iter(), transmitted.iter()) {
            let user = i % self.nb_users;
            self.decoded_symbols[user] += 1;
            if decision == reference {
                continue;
            }
            self.symbol_errors[user] += 1;
            if decision == INVALID_SYMBOL {
                self.invalid_symbols[user] += 1;
                self.bit_errors[user] += self.bits_per_symbol as u64;
            } else {
                self.bit_errors[user] += (decision ^ reference).count_ones() as u64;
            }
        }
    }

    pub fn nb_users(&self) -> usize {
        self.nb_users
    }

    pub fn decoded_symbols(&self, user: usize) -> u64 {
        self.decoded_symbols[user]
    }

    pub fn symbol_errors(&self, user: usize) -> u64 {
        self.symbol_errors[user]
    }

    pub fn bit_errors(&self, user: usize) -> u64 {
        self.bit_errors[user]
    }

    pub fn symbol_error_rate(&self, user: usize) -> f64 {
        ratio(self.symbol_errors[user], self.decoded_symbols[user])
    }

    pub fn bit_error_rate(&self, user: usize) -> f64 {
        ratio(self.bit_errors[user], self.decoded_symbols[user]*self.bits_per_symbol as u64)
    }

    pub fn total_symbol_error_rate(&self) -> f64 {
        ratio(self.symbol_errors.iter().sum(), self.decoded_symbols.iter().sum())
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

impl fmt::Display for PhyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for user in 0..self.nb_users {
            writeln!(
                f,
                "user {}: symbols={} symbol_errors={} (SER={:.3e}) bit_errors={} (BER={:.3e}) invalid={}",
                user,
                self.decoded_symbols[user],
                self.symbol_errors[user],
                self.symbol_error_rate(user),
                self.bit_errors[user],
                self.bit_error_rate(user),
                self.invalid_symbols[user],
            )?;
        }
        Ok(())
    }
}

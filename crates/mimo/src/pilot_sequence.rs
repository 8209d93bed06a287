use num::complex::Complex32;

/// Zadoff-Chu sequence of a given root and length.
/// x[n] = exp(-j*pi*u*n*(n+c)/N) where c = N mod 2.
/// Every value has unit magnitude which keeps the least squares channel estimate well conditioned.
pub fn zadoff_chu(root: u32, length: usize) -> Vec<Complex32> {
    assert!(length > 0, "Zadoff-Chu sequence must have a non-zero length");
    let n_total = length as u128;
    let c_f = n_total % 2;
    // The phase only depends on the root modulo 2N
    let root = root as u128 % (2*n_total);
    (0..n_total)
        .map(|n| {
            let exponent = (root * n * (n + c_f)) % (2*n_total);
            let phase = -std::f64::consts::PI * (exponent as f64) / (n_total as f64);
            Complex32::new(phase.cos() as f32, phase.sin() as f32)
        })
        .collect()
}

/// Pilot where every subcarrier carries 1+0j.
pub fn ones(length: usize) -> Vec<Complex32> {
    vec![Complex32::new(1.0, 0.0); length]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zadoff_chu_constant_amplitude() {
        for length in [12, 13, 64, 139] {
            let seq = zadoff_chu(1, length);
            assert_eq!(seq.len(), length);
            for x in &seq {
                assert!((x.norm() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_zadoff_chu_zero_cyclic_autocorrelation() {
        let length = 63;
        let seq = zadoff_chu(5, length);
        for shift in 1..length {
            let corr: Complex32 = (0..length)
                .map(|n| seq[n] * seq[(n + shift) % length].conj())
                .sum();
            assert!(corr.norm() < 1e-3, "shift {} has correlation {}", shift, corr.norm());
        }
    }

    #[test]
    fn test_zadoff_chu_first_value() {
        let seq = zadoff_chu(25, 139);
        assert!((seq[0] - Complex32::new(1.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn test_zadoff_chu_root_wraps_modulo_twice_length() {
        let length = 12;
        let wrapped = zadoff_chu(u32::MAX, length);
        let reduced = zadoff_chu(u32::MAX % (2*length as u32), length);
        for (a, b) in wrapped.iter().zip(reduced.iter()) {
            assert!((a - b).norm() < 1e-6);
        }
    }

    #[test]
    fn test_zadoff_chu_large_root_and_length() {
        let length = 70_001;
        let seq = zadoff_chu(u32::MAX, length);
        assert_eq!(seq.len(), length);
        for x in seq.iter().step_by(997).chain(seq.last()) {
            assert!((x.norm() - 1.0).abs() < 1e-5);
        }
    }
}

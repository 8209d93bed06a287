use num::complex::Complex32;

/// Decision emitted for symbols that cannot be demodulated.
pub const INVALID_SYMBOL: i64 = -1;

/// Inputs further than this multiple of the peak amplitude are treated as garbage.
const OUT_OF_RANGE_FACTOR: f32 = 4.0;

/// Gray coded square constellation with unit average power.
///
/// Labels split into an in-phase half and a quadrature half.
/// Each half indexes the amplitude levels of its axis through a Gray code,
/// so that neighbouring points differ by exactly one bit.
///
/// # Diagram (16QAM, labels in hex)
/// ```text
///  Q
///  |  2 6 e a
///  |  3 7 f b
///  |  1 5 d 9
///  |  0 4 c 8
///  +----------- I
/// ```
#[derive(Debug, Clone)]
pub struct Constellation {
    bits_per_symbol: usize,
    /// Indexed by label.
    points: Vec<Complex32>,
    peak_amplitude: f32,
}

impl Constellation {
    pub fn bpsk() -> Self {
        Self {
            bits_per_symbol: 1,
            points: vec![Complex32::new(-1.0, 0.0), Complex32::new(1.0, 0.0)],
            peak_amplitude: 1.0,
        }
    }

    pub fn qpsk() -> Self {
        Self::square(2)
    }

    pub fn qam16() -> Self {
        Self::square(4)
    }

    pub fn qam64() -> Self {
        Self::square(6)
    }

    /// Returns None for unsupported sizes.
    pub fn from_bits_per_symbol(bits_per_symbol: usize) -> Option<Self> {
        match bits_per_symbol {
            1 => Some(Self::bpsk()),
            2 => Some(Self::qpsk()),
            4 => Some(Self::qam16()),
            6 => Some(Self::qam64()),
            _ => None,
        }
    }

    fn square(bits_per_symbol: usize) -> Self {
        assert!(bits_per_symbol % 2 == 0, "Square constellations need an even number of bits");
        let bits_per_axis = bits_per_symbol / 2;
        let nb_levels = 1usize << bits_per_axis;
        // Average power per axis is (L^2-1)/3
        let scale = (3.0 / (2.0 * ((nb_levels*nb_levels - 1) as f32))).sqrt();
        let level = |i: usize| scale * ((2*i) as f32 - (nb_levels - 1) as f32);

        let mut points = vec![Complex32::default(); 1 << bits_per_symbol];
        for i in 0..nb_levels {
            for q in 0..nb_levels {
                let label = (gray_code(i) << bits_per_axis) | gray_code(q);
                points[label] = Complex32::new(level(i), level(q));
            }
        }

        Self {
            bits_per_symbol,
            points,
            peak_amplitude: level(nb_levels - 1),
        }
    }

    pub fn bits_per_symbol(&self) -> usize {
        self.bits_per_symbol
    }

    pub fn order(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[Complex32] {
        &self.points
    }

    /// Largest magnitude of either component of any point.
    pub fn peak_amplitude(&self) -> f32 {
        self.peak_amplitude
    }

    pub fn modulate(&self, label: usize) -> Complex32 {
        assert!(label < self.points.len(), "Label {} is out of range for order {}", label, self.points.len());
        self.points[label]
    }

    /// Hard decision to the nearest constellation point.
    /// Returns INVALID_SYMBOL for non-finite or out of range inputs.
    pub fn demodulate(&self, x: Complex32) -> i64 {
        if !x.re.is_finite() || !x.im.is_finite() {
            return INVALID_SYMBOL;
        }
        let limit = OUT_OF_RANGE_FACTOR * self.peak_amplitude;
        if x.re.abs() > limit || x.im.abs() > limit {
            return INVALID_SYMBOL;
        }

        let mut best_label = 0;
        let mut best_distance = f32::MAX;
        for (label, point) in self.points.iter().enumerate() {
            let distance = (x - point).norm_sqr();
            if distance < best_distance {
                best_distance = distance;
                best_label = label;
            }
        }
        best_label as i64
    }
}

#[inline(always)]
fn gray_code(i: usize) -> usize {
    i ^ (i >> 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Vec<Constellation> {
        [1, 2, 4, 6].iter().filter_map(|&b| Constellation::from_bits_per_symbol(b)).collect()
    }

    #[test]
    fn test_unit_average_power() {
        for constellation in all() {
            let power: f32 = constellation.points().iter().map(|p| p.norm_sqr()).sum::<f32>() / constellation.order() as f32;
            assert!((power - 1.0).abs() < 1e-5, "order {} has power {}", constellation.order(), power);
        }
    }

    #[test]
    fn test_every_point_demodulates_to_its_label() {
        for constellation in all() {
            for label in 0..constellation.order() {
                let point = constellation.modulate(label);
                assert_eq!(constellation.demodulate(point), label as i64);
                // Small perturbation stays inside the decision region
                let nudged = point + Complex32::new(0.02, -0.02);
                assert_eq!(constellation.demodulate(nudged), label as i64);
            }
        }
    }

    #[test]
    fn test_neighbours_differ_by_one_bit() {
        let constellation = Constellation::qam16();
        let points = constellation.points();
        let spacing = 2.0 / 10.0_f32.sqrt();
        for a in 0..points.len() {
            for b in 0..points.len() {
                if ((points[a] - points[b]).norm() - spacing).abs() < 1e-4 {
                    assert_eq!((a ^ b).count_ones(), 1, "{} and {} are neighbours", a, b);
                }
            }
        }
    }

    #[test]
    fn test_qam16_layout() {
        let constellation = Constellation::qam16();
        let s = 1.0 / 10.0_f32.sqrt();
        assert!((constellation.modulate(0x0) - Complex32::new(-3.0*s, -3.0*s)).norm() < 1e-6);
        assert!((constellation.modulate(0xf) - Complex32::new(s, s)).norm() < 1e-6);
        assert!((constellation.modulate(0x8) - Complex32::new(3.0*s, -3.0*s)).norm() < 1e-6);
    }

    #[test]
    fn test_invalid_inputs() {
        let constellation = Constellation::qpsk();
        assert_eq!(constellation.demodulate(Complex32::new(f32::NAN, 0.0)), INVALID_SYMBOL);
        assert_eq!(constellation.demodulate(Complex32::new(0.0, f32::INFINITY)), INVALID_SYMBOL);
        assert_eq!(constellation.demodulate(Complex32::new(100.0, 0.1)), INVALID_SYMBOL);
        // Large but within range still decides
        let peak = constellation.peak_amplitude();
        assert!(constellation.demodulate(Complex32::new(3.0 * peak, 3.0 * peak)) >= 0);
    }

    #[test]
    fn test_unsupported_order() {
        assert!(Constellation::from_bits_per_symbol(3).is_none());
        assert!(Constellation::from_bits_per_symbol(0).is_none());
    }
}

//! Statistical helpers shared by the predictor and the optimizer
//!
//! The prediction model corrects raw target proportions with the lower
//! bound of an Agresti-Coull confidence interval, so that thin evidence is
//! discounted. The same bounds at a different confidence level rank
//! candidate codes in the optimizer. The z quantile is derived from the
//! requested two-sided confidence by bisection on the normal CDF.

/// Error function, Abramowitz & Stegun 7.1.26 (max error ~1.5e-7).
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();

    sign * y
}

/// Cumulative distribution of the standard normal.
#[inline]
pub fn normal_cdf(x: f64) -> f64 {
    const FRAC_1_SQRT_2: f64 = std::f64::consts::FRAC_1_SQRT_2;

    0.5 * (1.0 + erf(x * FRAC_1_SQRT_2))
}

/// Agresti-Coull interval bounds for a binomial proportion, precomputed
/// for one confidence level.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinomialBounds {
    z: f64,
    z_sqr: f64,
    z_sqr_half: f64,
}

impl BinomialBounds {
    /// Derive z so that `normal_cdf(z) = p/2 + 0.5`, i.e. a symmetric
    /// two-sided interval of coverage `p`. `p` is clamped to [0, 0.9999];
    /// p = 0 degenerates to the raw proportion (z = 0).
    pub fn from_confidence(p: f64) -> Self {
        let target = p.clamp(0.0, 0.9999) / 2.0 + 0.5;

        let (mut x0, mut x1) = (-5.0f64, 5.0f64);
        let mut z = 0.0;
        while x1 - x0 > 1e-6 {
            z = (x0 + x1) / 2.0;
            if normal_cdf(z) < target {
                x0 = z;
            } else {
                x1 = z;
            }
        }

        Self::from_z(z)
    }

    /// Rebuild the precomputed terms from a previously derived z, e.g.
    /// when loading a persisted model.
    pub fn from_z(z: f64) -> Self {
        Self {
            z,
            z_sqr: z * z,
            z_sqr_half: z * z / 2.0,
        }
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    #[inline]
    fn center_and_margin(&self, hits: u64, total: u64) -> (f64, f64) {
        let n_tilde = total as f64 + self.z_sqr;
        let p_tilde = (hits as f64 + self.z_sqr_half) / n_tilde;
        let margin = self.z * (p_tilde * (1.0 - p_tilde) / n_tilde).sqrt();

        (p_tilde, margin)
    }

    /// Lower bound of the interval around `hits / total`.
    #[inline]
    pub fn lower(&self, hits: u64, total: u64) -> f64 {
        let (p_tilde, margin) = self.center_and_margin(hits, total);
        p_tilde - margin
    }

    /// Upper bound of the interval around `hits / total`.
    #[inline]
    pub fn upper(&self, hits: u64, total: u64) -> f64 {
        let (p_tilde, margin) = self.center_and_margin(hits, total);
        p_tilde + margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.959964) - 0.975).abs() < 1e-4);
        assert!((normal_cdf(-1.959964) - 0.025).abs() < 1e-4);
        assert!(normal_cdf(5.0) > 0.999999);
    }

    #[test]
    fn test_z_from_confidence() {
        // Well-known two-sided quantiles.
        let b90 = BinomialBounds::from_confidence(0.9);
        assert!((b90.z - 1.6449).abs() < 1e-3);

        let b95 = BinomialBounds::from_confidence(0.95);
        assert!((b95.z - 1.9600).abs() < 1e-3);

        let b0 = BinomialBounds::from_confidence(0.0);
        assert!(b0.z.abs() < 1e-5);
    }

    #[test]
    fn test_bounds_bracket_proportion() {
        let bounds = BinomialBounds::from_confidence(0.9);

        for &(hits, total) in &[(0u64, 1u64), (1, 1), (1, 2), (5, 100), (99, 100), (50, 50)] {
            let lower = bounds.lower(hits, total);
            let upper = bounds.upper(hits, total);
            let p_tilde = (hits as f64 + bounds.z_sqr_half) / (total as f64 + bounds.z_sqr);

            assert!(lower <= p_tilde, "lower > center for {hits}/{total}");
            assert!(p_tilde <= upper, "center > upper for {hits}/{total}");
            assert!((0.0..=1.0).contains(&p_tilde));
        }
    }

    #[test]
    fn test_zero_confidence_is_raw_proportion() {
        let bounds = BinomialBounds::from_confidence(0.0);
        assert!((bounds.lower(1, 2) - 0.5).abs() < 1e-6);
        assert!((bounds.lower(1, 1) - 1.0).abs() < 1e-6);
    }
}

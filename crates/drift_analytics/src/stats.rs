//! Statistical primitives for drift detection.
//!
//! Self-contained implementations: a Welford accumulator for streaming
//! mean/variance, the two-sample Kolmogorov-Smirnov test with its
//! asymptotic p-value, a two-sample chi-squared test over a contingency
//! table, and the two effect sizes (Wasserstein-1 and total variation)
//! that guard the p-values against large-sample alert floods.

/// Running mean/variance accumulator (Welford's algorithm).
#[derive(Debug, Clone, Default)]
pub struct WelfordStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl WelfordStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance.
    #[must_use]
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Outcome of a two-sample Kolmogorov-Smirnov test.
#[derive(Debug, Clone, Copy)]
pub struct KsResult {
    pub statistic: f64,
    pub p_value: f64,
}

/// Two-sample KS test over unsorted samples.
///
/// The p-value uses the asymptotic Kolmogorov distribution with the
/// Stephens small-sample correction; both samples must be non-empty.
#[must_use]
pub fn ks_two_sample(reference: &[f64], current: &[f64]) -> KsResult {
    debug_assert!(!reference.is_empty() && !current.is_empty());

    let mut a = reference.to_vec();
    let mut b = current.to_vec();
    a.sort_unstable_by(f64::total_cmp);
    b.sort_unstable_by(f64::total_cmp);

    let na = a.len() as f64;
    let nb = b.len() as f64;
    let (mut i, mut j) = (0usize, 0usize);
    let mut statistic: f64 = 0.0;

    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        let diff = (i as f64 / na - j as f64 / nb).abs();
        if diff > statistic {
            statistic = diff;
        }
    }

    let n_eff = na * nb / (na + nb);
    let lambda = (n_eff.sqrt() + 0.12 + 0.11 / n_eff.sqrt()) * statistic;

    KsResult {
        statistic,
        p_value: kolmogorov_survival(lambda),
    }
}

/// Survival function of the Kolmogorov distribution,
/// `Q(lambda) = 2 * sum_{j>=1} (-1)^(j-1) exp(-2 j^2 lambda^2)`.
fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }

    let mut sum = 0.0;
    let mut sign = 1.0;
    for j in 1..=100 {
        let term = (-2.0 * (j as f64).powi(2) * lambda * lambda).exp();
        sum += sign * term;
        if term < 1e-10 {
            break;
        }
        sign = -sign;
    }

    (2.0 * sum).clamp(0.0, 1.0)
}

/// Wasserstein-1 distance between two empirical distributions,
/// normalized by the standard deviation of the reference sample.
///
/// The raw distance is the area between the two empirical CDFs; dividing
/// by the reference spread makes the 0.1 floor scale-free.
#[must_use]
pub fn wasserstein_normalized(reference: &[f64], current: &[f64]) -> f64 {
    debug_assert!(!reference.is_empty() && !current.is_empty());

    let mut a = reference.to_vec();
    let mut b = current.to_vec();
    a.sort_unstable_by(f64::total_cmp);
    b.sort_unstable_by(f64::total_cmp);

    let mut all: Vec<f64> = a.iter().chain(b.iter()).copied().collect();
    all.sort_unstable_by(f64::total_cmp);

    let na = a.len() as f64;
    let nb = b.len() as f64;
    let (mut i, mut j) = (0usize, 0usize);
    let mut distance = 0.0;

    for pair in all.windows(2) {
        while i < a.len() && a[i] <= pair[0] {
            i += 1;
        }
        while j < b.len() && b[j] <= pair[0] {
            j += 1;
        }
        let fa = i as f64 / na;
        let fb = j as f64 / nb;
        distance += (fa - fb).abs() * (pair[1] - pair[0]);
    }

    let mut spread = WelfordStats::new();
    for v in &a {
        spread.update(*v);
    }
    let std = spread.std_dev();
    if std <= f64::EPSILON {
        // Degenerate reference: any nonzero distance is maximal evidence.
        if distance <= f64::EPSILON {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        distance / std
    }
}

/// Outcome of a two-sample chi-squared test.
#[derive(Debug, Clone, Copy)]
pub struct ChiSquareResult {
    pub statistic: f64,
    pub p_value: f64,
    pub degrees_of_freedom: usize,
}

/// Two-sample chi-squared test of homogeneity over aligned category
/// counts. Expected counts come from the 2 x k contingency table, so
/// categories present in only one sample are handled without smoothing.
#[must_use]
pub fn chi_square_two_sample(reference: &[u64], current: &[u64]) -> ChiSquareResult {
    debug_assert_eq!(reference.len(), current.len());

    let ref_total: u64 = reference.iter().sum();
    let cur_total: u64 = current.iter().sum();
    let grand = (ref_total + cur_total) as f64;

    if grand == 0.0 {
        return ChiSquareResult {
            statistic: 0.0,
            p_value: 1.0,
            degrees_of_freedom: 0,
        };
    }

    let mut statistic = 0.0;
    let mut used_categories = 0usize;

    for (&r, &c) in reference.iter().zip(current.iter()) {
        let row_total = (r + c) as f64;
        if row_total == 0.0 {
            continue;
        }
        used_categories += 1;

        let expected_ref = row_total * ref_total as f64 / grand;
        let expected_cur = row_total * cur_total as f64 / grand;
        if expected_ref > 0.0 {
            statistic += (r as f64 - expected_ref).powi(2) / expected_ref;
        }
        if expected_cur > 0.0 {
            statistic += (c as f64 - expected_cur).powi(2) / expected_cur;
        }
    }

    let degrees_of_freedom = used_categories.saturating_sub(1);
    let p_value = if degrees_of_freedom == 0 {
        1.0
    } else {
        gamma_q(degrees_of_freedom as f64 / 2.0, statistic / 2.0)
    };

    ChiSquareResult {
        statistic,
        p_value,
        degrees_of_freedom,
    }
}

/// Total variation distance between the two category distributions,
/// `0.5 * sum_i |p_i - q_i|` over aligned counts.
#[must_use]
pub fn total_variation(reference: &[u64], current: &[u64]) -> f64 {
    debug_assert_eq!(reference.len(), current.len());

    let ref_total: u64 = reference.iter().sum();
    let cur_total: u64 = current.iter().sum();
    if ref_total == 0 || cur_total == 0 {
        return 0.0;
    }

    0.5 * reference
        .iter()
        .zip(current.iter())
        .map(|(&r, &c)| (r as f64 / ref_total as f64 - c as f64 / cur_total as f64).abs())
        .sum::<f64>()
}

/// Regularized upper incomplete gamma function `Q(a, x)`.
fn gamma_q(a: f64, x: f64) -> f64 {
    if x <= 0.0 || a <= 0.0 {
        return 1.0;
    }
    if x < a + 1.0 {
        (1.0 - gamma_p_series(a, x)).clamp(0.0, 1.0)
    } else {
        gamma_q_continued_fraction(a, x).clamp(0.0, 1.0)
    }
}

/// Series expansion of the regularized lower incomplete gamma `P(a, x)`.
fn gamma_p_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut sum = 1.0 / a;
    let mut term = sum;
    for _ in 0..500 {
        ap += 1.0;
        term *= x / ap;
        sum += term;
        if term.abs() < sum.abs() * 1e-14 {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

/// Lentz continued fraction for the regularized upper incomplete gamma.
fn gamma_q_continued_fraction(a: f64, x: f64) -> f64 {
    const TINY: f64 = 1e-30;

    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;

    for i in 1..500 {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < 1e-14 {
            break;
        }
    }

    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// Natural log of the gamma function (Lanczos approximation).
fn ln_gamma(xx: f64) -> f64 {
    const COF: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];

    let x = xx;
    let mut y = xx;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000_000_000_190_015;
    for c in COF {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * ser / x).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, offset: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 / n as f64 + offset).collect()
    }

    #[test]
    fn test_welford_matches_direct_computation() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = WelfordStats::new();
        for v in values {
            stats.update(v);
        }
        assert_eq!(stats.count(), 8);
        assert!((stats.mean() - 5.0).abs() < 1e-12);
        // Sample variance of the classic example set is 32/7.
        assert!((stats.variance() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_ks_identical_samples() {
        let a = ramp(400, 0.0);
        let result = ks_two_sample(&a, &a);
        assert!(result.statistic < 1e-12);
        assert!(result.p_value > 0.99);
    }

    #[test]
    fn test_ks_detects_shift() {
        let a = ramp(400, 0.0);
        let b = ramp(400, 0.5);
        let result = ks_two_sample(&a, &b);
        assert!(result.statistic > 0.4);
        assert!(result.p_value < 1e-6);
    }

    #[test]
    fn test_wasserstein_shift_equals_offset() {
        let a = ramp(500, 0.0);
        let b = ramp(500, 0.5);
        // W1 of a pure location shift is the shift itself; the ramp's
        // std is ~0.289 so the normalized distance is ~1.73.
        let normalized = wasserstein_normalized(&a, &b);
        assert!((normalized - 0.5 / 0.289).abs() < 0.05);
    }

    #[test]
    fn test_wasserstein_identical_is_zero() {
        let a = ramp(300, 0.0);
        assert!(wasserstein_normalized(&a, &a) < 1e-12);
    }

    #[test]
    fn test_chi_square_same_distribution() {
        let reference = [400_u64, 300, 200, 100];
        let current = [200_u64, 150, 100, 50];
        let result = chi_square_two_sample(&reference, &current);
        assert!(result.statistic < 1e-9);
        assert!(result.p_value > 0.99);
        assert_eq!(result.degrees_of_freedom, 3);
    }

    #[test]
    fn test_chi_square_detects_skew() {
        let reference = [500_u64, 300, 150, 50];
        let current = [50_u64, 150, 300, 500];
        let result = chi_square_two_sample(&reference, &current);
        assert!(result.statistic > 100.0);
        assert!(result.p_value < 1e-6);
    }

    #[test]
    fn test_chi_square_handles_one_sided_categories() {
        // Category 3 appears only in the current sample.
        let reference = [100_u64, 100, 0];
        let current = [50_u64, 50, 100];
        let result = chi_square_two_sample(&reference, &current);
        assert!(result.statistic.is_finite());
        assert!(result.p_value < 0.01);
    }

    #[test]
    fn test_total_variation_bounds() {
        let same = total_variation(&[50, 50], &[500, 500]);
        assert!(same < 1e-12);

        let disjoint = total_variation(&[100, 0], &[0, 100]);
        assert!((disjoint - 1.0).abs() < 1e-12);

        let half = total_variation(&[100, 100], &[150, 50]);
        assert!((half - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_gamma_q_reference_points() {
        // Chi-squared survival values: P(X > x) for dof=1 at x=3.841 is
        // ~0.05, for dof=2 at x=5.991 is ~0.05.
        let p1 = gamma_q(0.5, 3.841 / 2.0);
        assert!((p1 - 0.05).abs() < 0.001);
        let p2 = gamma_q(1.0, 5.991 / 2.0);
        assert!((p2 - 0.05).abs() < 0.001);
    }
}

//! Beta distribution helpers: posterior mean, regularized incomplete beta and
//! its inverse (used for credible intervals).

use serde::{Deserialize, Serialize};

const EPSILON: f64 = 1e-10;
const CF_MAX_ITERATIONS: usize = 200;
const CF_TOLERANCE: f64 = 3e-14;
const QUANTILE_ITERATIONS: usize = 64;

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaPosterior {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BetaPosterior {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl BetaPosterior {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            alpha: alpha.max(EPSILON),
            beta: beta.max(EPSILON),
        }
    }

    /// Prior centered on `mastery` carrying `strength` pseudo-observations.
    pub fn seeded(mastery: f64, strength: f64) -> Self {
        let m = mastery.clamp(0.0, 1.0);
        Self::new(m * strength, (1.0 - m) * strength)
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn variance(&self) -> f64 {
        let total = self.alpha + self.beta;
        self.alpha * self.beta / (total * total * (total + 1.0))
    }

    /// Soft observation: `outcome` in [0, 1] scaled by `weight`.
    pub fn observe(&mut self, outcome: f64, weight: f64) {
        let o = outcome.clamp(0.0, 1.0);
        self.alpha += o * weight;
        self.beta += (1.0 - o) * weight;
    }

    pub fn cdf(&self, x: f64) -> f64 {
        regularized_incomplete_beta(self.alpha, self.beta, x)
    }

    /// Inverse CDF by bisection on the regularized incomplete beta.
    pub fn quantile(&self, p: f64) -> f64 {
        if p <= 0.0 {
            return 0.0;
        }
        if p >= 1.0 {
            return 1.0;
        }
        let (mut lo, mut hi) = (0.0f64, 1.0f64);
        for _ in 0..QUANTILE_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            if self.cdf(mid) < p {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }

    /// Equal-tailed interval holding `level` of the posterior mass.
    pub fn credible_interval(&self, level: f64) -> (f64, f64) {
        let tail = (1.0 - level.clamp(0.0, 1.0)) / 2.0;
        (self.quantile(tail), self.quantile(1.0 - tail))
    }

    pub fn credible_interval_95(&self) -> (f64, f64) {
        self.credible_interval(0.95)
    }
}

pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // reflection
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut acc = LANCZOS_COEFFICIENTS[0];
    for (i, &c) in LANCZOS_COEFFICIENTS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + LANCZOS_G + 0.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// I_x(a, b) via the Lentz continued fraction.
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front =
        ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const TINY: f64 = 1e-300;
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=CF_MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < CF_TOLERANCE {
            break;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_matches_laplace_rule() {
        let mut posterior = BetaPosterior::default();
        for _ in 0..4 {
            posterior.observe(1.0, 1.0);
        }
        assert!((posterior.mean() - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn ln_gamma_matches_factorials() {
        assert!((ln_gamma(1.0)).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24f64.ln()).abs() < 1e-10);
        assert!((ln_gamma(0.5) - std::f64::consts::PI.sqrt().ln()).abs() < 1e-10);
    }

    #[test]
    fn uniform_cdf_is_identity() {
        let uniform = BetaPosterior::new(1.0, 1.0);
        for x in [0.1, 0.25, 0.5, 0.9] {
            assert!((uniform.cdf(x) - x).abs() < 1e-9);
        }
        let (lo, hi) = uniform.credible_interval_95();
        assert!((lo - 0.025).abs() < 1e-6);
        assert!((hi - 0.975).abs() < 1e-6);
    }

    #[test]
    fn interval_brackets_mean_and_narrows_with_data() {
        let small = BetaPosterior::new(3.0, 2.0);
        let large = BetaPosterior::new(30.0, 20.0);
        let (a, b) = small.credible_interval_95();
        let (c, d) = large.credible_interval_95();
        assert!(a < small.mean() && small.mean() < b);
        assert!(c < large.mean() && large.mean() < d);
        assert!(d - c < b - a);
    }

    #[test]
    fn seeded_prior_centers_on_mastery() {
        let prior = BetaPosterior::seeded(0.8, 2.0);
        assert!((prior.mean() - 0.8).abs() < 1e-9);
        assert!((prior.alpha + prior.beta - 2.0).abs() < 1e-9);
    }
}

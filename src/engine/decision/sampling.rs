//! Gamma/Beta sampling for Thompson draws.
//!
//! Beta(a, b) = X / (X + Y) with X ~ Gamma(a, 1), Y ~ Gamma(b, 1).
//! Gamma uses Marsaglia-Tsang (2000), with the shape < 1 boost.

use rand::Rng;

const EPSILON: f64 = 1e-10;
const MAX_GAMMA_ITERATIONS: usize = 1000;
const MAX_GAMMA_RECURSION: usize = 10;

pub fn sample_beta<R: Rng>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    let x = sample_gamma(rng, alpha.max(EPSILON), 0);
    let y = sample_gamma(rng, beta.max(EPSILON), 0);
    let sum = x + y;
    if sum > 0.0 && sum.is_finite() {
        x / sum
    } else {
        0.5
    }
}

fn sample_gamma<R: Rng>(rng: &mut R, shape: f64, depth: usize) -> f64 {
    if shape <= 0.0 {
        return 0.0;
    }
    if depth >= MAX_GAMMA_RECURSION {
        return shape;
    }
    if shape < 1.0 {
        let u: f64 = rng.random::<f64>().max(EPSILON);
        return sample_gamma(rng, 1.0 + shape, depth + 1) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    for _ in 0..MAX_GAMMA_ITERATIONS {
        let x = sample_normal(rng);
        let v_term = 1.0 + c * x;
        if v_term <= 0.0 {
            continue;
        }
        let v = v_term.powi(3);
        let u: f64 = rng.random();
        let x2 = x * x;

        if u < 1.0 - 0.0331 * x2 * x2 {
            return d * v;
        }
        if u.ln() < 0.5 * x2 + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
    // expected value if the rejection loop never accepts
    shape
}

fn sample_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(EPSILON);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

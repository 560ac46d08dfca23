use crate::error::{Error, Result};
use crate::model::{Model, VarId};
use rand::Rng;
use rand_distr::{Beta as BetaSampler, Distribution};
use serde::{Deserialize, Serialize};

/// A scalar prior or proposal distribution.
///
/// Discrete values are carried as `f64` (0.0 / 1.0) so every variable in a
/// model shares one value vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dist {
    Bernoulli { p: f64 },
    Uniform { lower: f64, upper: f64 },
    Beta { alpha: f64, beta: f64 },
}

impl Dist {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Dist::Bernoulli { p } => {
                if !(0.0..=1.0).contains(&p) {
                    return Err(Error::InvalidDistribution(format!(
                        "Bernoulli p must lie in [0, 1], got {p}"
                    )));
                }
            }
            Dist::Uniform { lower, upper } => {
                if !lower.is_finite() || !upper.is_finite() || lower >= upper {
                    return Err(Error::InvalidDistribution(format!(
                        "Uniform needs finite lower < upper, got [{lower}, {upper}]"
                    )));
                }
            }
            Dist::Beta { alpha, beta } => {
                if !(alpha > 0.0 && beta > 0.0) || !alpha.is_finite() || !beta.is_finite() {
                    return Err(Error::InvalidDistribution(format!(
                        "Beta shapes must be positive, got ({alpha}, {beta})"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Dist::Bernoulli { .. })
    }

    pub fn in_support(&self, x: f64) -> bool {
        match *self {
            Dist::Bernoulli { .. } => x == 0.0 || x == 1.0,
            Dist::Uniform { lower, upper } => x >= lower && x <= upper,
            Dist::Beta { .. } => x > 0.0 && x < 1.0,
        }
    }

    /// Log-density (or log-mass); `-inf` outside the support.
    pub fn logp(&self, x: f64) -> f64 {
        if !self.in_support(x) {
            return f64::NEG_INFINITY;
        }
        match *self {
            Dist::Bernoulli { p } => {
                if x == 1.0 {
                    p.ln()
                } else {
                    (1.0 - p).ln()
                }
            }
            Dist::Uniform { lower, upper } => -(upper - lower).ln(),
            Dist::Beta { alpha, beta } => {
                (alpha - 1.0) * x.ln() + (beta - 1.0) * (1.0 - x).ln() - ln_beta(alpha, beta)
            }
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Dist::Bernoulli { p } => {
                if rng.gen::<f64>() < p {
                    1.0
                } else {
                    0.0
                }
            }
            Dist::Uniform { lower, upper } => lower + (upper - lower) * rng.gen::<f64>(),
            Dist::Beta { alpha, beta } => match BetaSampler::new(alpha, beta) {
                Ok(d) => d.sample(rng),
                Err(_) => f64::NAN,
            },
        }
    }

    pub fn mean(&self) -> f64 {
        match *self {
            Dist::Bernoulli { p } => p,
            Dist::Uniform { lower, upper } => 0.5 * (lower + upper),
            Dist::Beta { alpha, beta } => alpha / (alpha + beta),
        }
    }

    pub fn std_dev(&self) -> f64 {
        match *self {
            Dist::Bernoulli { p } => (p * (1.0 - p)).sqrt(),
            Dist::Uniform { lower, upper } => (upper - lower) / 12f64.sqrt(),
            Dist::Beta { alpha, beta } => {
                let s = alpha + beta;
                (alpha * beta / (s * s * (s + 1.0))).sqrt()
            }
        }
    }

    /// Closed interval containing the support.
    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            Dist::Bernoulli { .. } | Dist::Beta { .. } => (0.0, 1.0),
            Dist::Uniform { lower, upper } => (lower, upper),
        }
    }
}

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEF: [f64; 9] = [
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

/// ln Γ(x) via the Lanczos approximation (g = 7, n = 9).
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection: Γ(x) Γ(1 - x) = π / sin(πx)
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).abs().ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + LANCZOS_G + 0.5;
    let series = LANCZOS_COEF[1..]
        .iter()
        .enumerate()
        .fold(LANCZOS_COEF[0], |acc, (i, c)| acc + c / (x + (i + 1) as f64));
    0.5 * std::f64::consts::TAU.ln() + (x + 0.5) * t.ln() - t + series.ln()
}

pub fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

// ── Bernoulli (binary outcome) ──────────────────────────────────────

pub struct Bernoulli;

impl Bernoulli {
    pub fn prior(model: &mut Model, name: &str, p: f64) -> Result<VarId> {
        model.add_latent(name, Dist::Bernoulli { p })
    }

    /// Observed outcomes whose success probability is the latent `p`.
    pub fn observed(model: &mut Model, p: VarId, obs: &[bool]) -> Result<()> {
        model.add_bernoulli_obs(p, obs)
    }
}

// ── Uniform (lower ≤ x ≤ upper) ─────────────────────────────────────

pub struct Uniform;

impl Uniform {
    pub fn prior(model: &mut Model, name: &str, lower: f64, upper: f64) -> Result<VarId> {
        model.add_latent(name, Dist::Uniform { lower, upper })
    }
}

// ── Beta (0 < x < 1) ────────────────────────────────────────────────

pub struct BetaDist;

impl BetaDist {
    pub fn prior(model: &mut Model, name: &str, alpha: f64, beta: f64) -> Result<VarId> {
        model.add_latent(name, Dist::Beta { alpha, beta })
    }
}

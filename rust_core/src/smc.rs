//! Sequential Monte Carlo with adaptive likelihood tempering.
//!
//! Particles start as prior draws and are moved through the sequence of
//! targets `prior × likelihood^β` for β rising from 0 to 1. Each stage picks
//! the next β by bisection so the incremental weights keep a fixed effective
//! sample size, resamples systematically, then mutates every particle with a
//! few Metropolis sweeps at the new temperature. The running product of mean
//! incremental weights estimates the marginal likelihood.

use crate::error::{Error, Result};
use crate::metropolis::{sweep, Proposal};
use crate::model::Model;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

const BISECTION_STEPS: usize = 60;

#[derive(Debug, Clone)]
pub struct SmcConfig {
    pub num_particles: usize,
    /// Target ESS per stage as a fraction of the particle count.
    pub ess_threshold: f64,
    /// Metropolis sweeps applied to each particle after resampling.
    pub mutation_steps: usize,
    pub max_stages: usize,
    pub p_jump: f64,
}

impl Default for SmcConfig {
    fn default() -> Self {
        Self {
            num_particles: 1000,
            ess_threshold: 0.5,
            mutation_steps: 10,
            max_stages: 100,
            p_jump: 0.5,
        }
    }
}

impl SmcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 {
            return Err(Error::InvalidConfig("num_particles must be > 0".into()));
        }
        if !(self.ess_threshold > 0.0 && self.ess_threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "ess_threshold must lie in (0, 1], got {}",
                self.ess_threshold
            )));
        }
        if self.max_stages == 0 {
            return Err(Error::InvalidConfig("max_stages must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SmcResult {
    /// Final particle cloud, one value vector per particle.
    pub particles: Vec<Vec<f64>>,
    /// Estimate of ln p(data).
    pub log_evidence: f64,
    /// Tempering schedule, starting at 0 and ending at 1.
    pub betas: Vec<f64>,
    pub accept_rate: f64,
}

pub fn run(model: &Model, config: &SmcConfig, rng: &mut ChaCha8Rng) -> Result<SmcResult> {
    config.validate()?;
    let dim = model.dim();
    if dim == 0 {
        return Err(Error::EmptyModel);
    }
    let n = config.num_particles;
    let target_ess = config.ess_threshold * n as f64;

    let mut particles: Vec<Vec<f64>> = (0..n).map(|_| model.draw_prior(rng)).collect();
    let mut loglik: Vec<f64> = particles.iter().map(|p| model.log_likelihood(p)).collect();

    let mut beta = 0.0f64;
    let mut betas = vec![beta];
    let mut log_evidence = 0.0f64;
    let mut accepted = 0usize;
    let mut proposed = 0usize;

    while beta < 1.0 {
        if betas.len() > config.max_stages {
            return Err(Error::TemperingStalled {
                stages: config.max_stages,
                beta,
            });
        }

        let next = next_beta(beta, &loglik, target_ess);
        let delta = next - beta;
        let log_w: Vec<f64> = loglik.iter().map(|&ll| tempered(delta, ll)).collect();
        let lse = log_sum_exp(&log_w);
        if lse == f64::NEG_INFINITY {
            return Err(Error::TemperingStalled {
                stages: betas.len(),
                beta,
            });
        }
        log_evidence += lse - (n as f64).ln();

        let weights: Vec<f64> = log_w.iter().map(|&lw| (lw - lse).exp()).collect();
        let picks = systematic_resample(&weights, rng);
        particles = picks.iter().map(|&i| particles[i].clone()).collect();

        beta = next;
        betas.push(beta);

        let proposals = mutation_proposals(model, &particles, config.p_jump);
        let target = |values: &[f64]| {
            let lp = model.log_prior(values);
            if lp == f64::NEG_INFINITY {
                lp
            } else {
                lp + tempered(beta, model.log_likelihood(values))
            }
        };
        let mut counts = vec![0usize; dim];
        for particle in particles.iter_mut() {
            let mut logp = target(particle);
            for _ in 0..config.mutation_steps {
                accepted += sweep(&target, particle, &mut logp, &proposals, &mut counts, rng);
                proposed += dim;
            }
        }
        loglik = particles.iter().map(|p| model.log_likelihood(p)).collect();

        debug!(
            stage = betas.len() - 1,
            beta,
            log_evidence,
            "smc stage complete"
        );
    }

    let accept_rate = if proposed > 0 {
        accepted as f64 / proposed as f64
    } else {
        0.0
    };

    Ok(SmcResult {
        particles,
        log_evidence,
        betas,
        accept_rate,
    })
}

/// `beta * ll`, with a zero temperature cancelling a `-inf` likelihood.
fn tempered(beta: f64, ll: f64) -> f64 {
    if beta == 0.0 {
        0.0
    } else {
        beta * ll
    }
}

/// Effective sample size of the weights `exp(delta * ll)`.
fn ess(delta: f64, loglik: &[f64]) -> f64 {
    let log_w: Vec<f64> = loglik.iter().map(|&ll| tempered(delta, ll)).collect();
    let max = log_w.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return 0.0;
    }
    let (sum, sum_sq) = log_w.iter().fold((0.0, 0.0), |(s, s2), &lw| {
        let w = (lw - max).exp();
        (s + w, s2 + w * w)
    });
    sum * sum / sum_sq
}

/// Largest next inverse temperature whose incremental weights keep
/// `ESS >= target_ess`, capped at 1.
fn next_beta(beta: f64, loglik: &[f64], target_ess: f64) -> f64 {
    let remaining = 1.0 - beta;
    if ess(remaining, loglik) >= target_ess {
        return 1.0;
    }
    let mut lo = 0.0;
    let mut hi = remaining;
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if ess(mid, loglik) >= target_ess {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let step = if lo > 0.0 { lo } else { hi };
    (beta + step).min(1.0)
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Systematic resampling: one uniform offset, `n` evenly spaced pointers.
pub fn systematic_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let total: f64 = weights.iter().sum();
    let offset: f64 = rng.gen();
    let mut picks = Vec::with_capacity(n);
    let mut cumulative = 0.0;
    let mut j = 0;
    for i in 0..n {
        let u = (i as f64 + offset) / n as f64 * total;
        while j + 1 < n && cumulative + weights[j] < u {
            cumulative += weights[j];
            j += 1;
        }
        picks.push(j);
    }
    picks
}

/// Flip kernels for binary variables, random walks scaled to the current
/// particle spread for continuous ones.
fn mutation_proposals(model: &Model, particles: &[Vec<f64>], p_jump: f64) -> Vec<Proposal> {
    let dim = model.dim();
    let n = particles.len() as f64;
    let scale_factor = 2.38 / (dim as f64).sqrt();
    model
        .latents
        .iter()
        .enumerate()
        .map(|(i, latent)| {
            if latent.prior.is_discrete() {
                return Proposal::Flip { p_jump };
            }
            let mean = particles.iter().map(|p| p[i]).sum::<f64>() / n;
            let var = particles.iter().map(|p| (p[i] - mean).powi(2)).sum::<f64>() / n;
            let spread = var.sqrt();
            let scale = if spread > 1e-12 {
                scale_factor * spread
            } else {
                0.1 * latent.prior.std_dev()
            };
            Proposal::RandomWalk { scale }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{ln_beta, Bernoulli, BetaDist, Uniform};
    use rand::SeedableRng;

    fn coin_model() -> Model {
        let mut m = Model::new();
        let p = BetaDist::prior(&mut m, "p", 1.0, 1.0).unwrap();
        let data = [false, true, false, false, false, false, false, false, false, true];
        Bernoulli::observed(&mut m, p, &data).unwrap();
        m
    }

    #[test]
    fn test_evidence_and_posterior_for_coin() {
        let model = coin_model();
        let config = SmcConfig {
            num_particles: 2000,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let result = run(&model, &config, &mut rng).unwrap();

        // p(data) = B(3, 9) / B(1, 1)
        let exact = ln_beta(3.0, 9.0) - ln_beta(1.0, 1.0);
        assert!(
            (result.log_evidence - exact).abs() < 0.3,
            "log evidence {} vs {}",
            result.log_evidence,
            exact
        );
        let mean = result.particles.iter().map(|p| p[0]).sum::<f64>() / 2000.0;
        assert!((mean - 0.25).abs() < 0.03, "mean = {}", mean);
        assert_eq!(*result.betas.last().unwrap(), 1.0);
        assert!(result.betas.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_prior_only_model_needs_one_stage() {
        let mut model = Model::new();
        Bernoulli::prior(&mut model, "A", 0.5).unwrap();
        Uniform::prior(&mut model, "C", 0.0, 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let result = run(&model, &SmcConfig::default(), &mut rng).unwrap();

        assert_eq!(result.betas, vec![0.0, 1.0]);
        assert!(result.log_evidence.abs() < 1e-12);
        assert_eq!(result.particles.len(), 1000);
        let freq = result.particles.iter().map(|p| p[0]).sum::<f64>() / 1000.0;
        assert!((freq - 0.5).abs() < 0.06, "freq = {}", freq);
    }

    #[test]
    fn test_systematic_resample_follows_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        assert_eq!(systematic_resample(&[0.0, 1.0, 0.0], &mut rng), vec![1, 1, 1]);

        let picks = systematic_resample(&[0.25, 0.25, 0.5, 0.0], &mut rng);
        let count = |k| picks.iter().filter(|&&i| i == k).count();
        assert_eq!(count(0), 1);
        assert_eq!(count(1), 1);
        assert_eq!(count(2), 2);
        assert_eq!(count(3), 0);
    }

    #[test]
    fn test_next_beta_keeps_target_ess() {
        let loglik: Vec<f64> = (0..100).map(|i| -(i as f64)).collect();
        let next = next_beta(0.0, &loglik, 50.0);
        assert!(next > 0.0 && next < 1.0);
        assert!((ess(next, &loglik) - 50.0).abs() < 1.0);
    }

    #[test]
    fn test_tempering_stalls_after_max_stages() {
        let mut model = Model::new();
        let p = BetaDist::prior(&mut model, "p", 1.0, 1.0).unwrap();
        let data: Vec<bool> = (0..200).map(|i| i % 3 == 0).collect();
        Bernoulli::observed(&mut model, p, &data).unwrap();
        let config = SmcConfig {
            num_particles: 500,
            max_stages: 1,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        match run(&model, &config, &mut rng) {
            Err(Error::TemperingStalled { stages, beta }) => {
                assert_eq!(stages, 1);
                assert!(beta > 0.0 && beta < 1.0, "beta = {}", beta);
            }
            other => panic!("expected TemperingStalled, got {:?}", other.map(|r| r.betas)),
        }
    }

    #[test]
    fn test_invalid_config() {
        let config = SmcConfig {
            ess_threshold: 0.0,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            run(&coin_model(), &config, &mut rng),
            Err(Error::InvalidConfig(_))
        ));
    }
}

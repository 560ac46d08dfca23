//! Component-wise Metropolis–Hastings.
//!
//! Each iteration is one sweep: every latent variable in turn gets a
//! candidate from its own proposal, accepted against the full joint
//! log-density. Discrete variables use a bit-flip proposal, continuous ones a
//! Gaussian random walk whose scale is tuned during warmup, and any variable
//! may instead use a fixed independence proposal.

use crate::distributions::Dist;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::progress::ProgressState;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

const MAX_INIT_ATTEMPTS: usize = 100;

/// Per-variable proposal kernel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Proposal {
    /// Flip a binary value with probability `p_jump`.
    Flip { p_jump: f64 },
    /// Symmetric Gaussian random walk.
    RandomWalk { scale: f64 },
    /// Draw the candidate from a fixed distribution, independent of the
    /// current value.
    Independent { dist: Dist },
}

impl Proposal {
    /// Default kernel for a prior: flips for binary priors, a random walk
    /// scaled to the prior's spread otherwise.
    pub fn for_prior(prior: &Dist, p_jump: f64) -> Self {
        if prior.is_discrete() {
            Proposal::Flip { p_jump }
        } else {
            Proposal::RandomWalk {
                scale: prior.std_dev(),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Proposal::Flip { p_jump } => {
                if !(p_jump > 0.0 && p_jump <= 1.0) {
                    return Err(Error::InvalidConfig(format!(
                        "flip probability must lie in (0, 1], got {p_jump}"
                    )));
                }
            }
            Proposal::RandomWalk { scale } => {
                if !(scale > 0.0 && scale.is_finite()) {
                    return Err(Error::InvalidConfig(format!(
                        "random-walk scale must be positive, got {scale}"
                    )));
                }
            }
            Proposal::Independent { dist } => dist.validate()?,
        }
        Ok(())
    }

    /// Draw a candidate and return it with the log Hastings correction
    /// `ln q(current | candidate) - ln q(candidate | current)`.
    pub fn propose<R: Rng + ?Sized>(&self, current: f64, rng: &mut R) -> (f64, f64) {
        match *self {
            Proposal::Flip { p_jump } => {
                if rng.gen::<f64>() < p_jump {
                    (1.0 - current, 0.0)
                } else {
                    (current, 0.0)
                }
            }
            Proposal::RandomWalk { scale } => {
                let z: f64 = StandardNormal.sample(rng);
                (current + scale * z, 0.0)
            }
            Proposal::Independent { dist } => {
                let candidate = dist.sample(rng);
                (candidate, dist.logp(current) - dist.logp(candidate))
            }
        }
    }
}

/// Configuration for a single Metropolis chain.
#[derive(Debug, Clone)]
pub struct MetropolisConfig {
    pub num_draws: usize,
    pub num_warmup: usize,
    /// Warmup iterations between random-walk scale updates.
    pub tune_interval: usize,
    /// Flip probability for binary variables without an explicit proposal.
    pub p_jump: f64,
    /// Explicit proposals keyed by variable name.
    pub proposals: HashMap<String, Proposal>,
}

impl Default for MetropolisConfig {
    fn default() -> Self {
        Self {
            num_draws: 1000,
            num_warmup: 500,
            tune_interval: 100,
            p_jump: 0.5,
            proposals: HashMap::new(),
        }
    }
}

/// Result of a single chain run.
#[derive(Debug, Clone)]
pub struct ChainResult {
    pub samples: Vec<Vec<f64>>,
    pub accept_rate: f64,
    /// Random-walk scales after tuning (`NaN` for other kernels).
    pub scales: Vec<f64>,
}

/// Resolve one proposal per variable, applying explicit overrides.
pub fn resolve_proposals(model: &Model, config: &MetropolisConfig) -> Result<Vec<Proposal>> {
    for name in config.proposals.keys() {
        model.var_id(name)?;
    }
    model
        .latents
        .iter()
        .map(|latent| {
            let proposal = config
                .proposals
                .get(&latent.name)
                .copied()
                .unwrap_or_else(|| Proposal::for_prior(&latent.prior, config.p_jump));
            proposal.validate()?;
            Ok(proposal)
        })
        .collect()
}

/// Scale factor applied after a tuning window with the given acceptance rate.
pub fn tune_factor(accept_rate: f64) -> f64 {
    if accept_rate < 0.001 {
        0.1
    } else if accept_rate < 0.05 {
        0.5
    } else if accept_rate < 0.2 {
        0.9
    } else if accept_rate > 0.95 {
        10.0
    } else if accept_rate > 0.75 {
        2.0
    } else if accept_rate > 0.5 {
        1.1
    } else {
        1.0
    }
}

/// One component-wise MH sweep over `state` against `target`.
///
/// `logp` must hold `target(state)` on entry and is kept in sync. Returns the
/// number of accepted moves; per-variable acceptances are added to `accepts`.
pub(crate) fn sweep<F, R>(
    target: &F,
    state: &mut [f64],
    logp: &mut f64,
    proposals: &[Proposal],
    accepts: &mut [usize],
    rng: &mut R,
) -> usize
where
    F: Fn(&[f64]) -> f64,
    R: Rng + ?Sized,
{
    let mut accepted = 0;
    for (i, proposal) in proposals.iter().enumerate() {
        let old = state[i];
        let (candidate, log_q) = proposal.propose(old, rng);
        state[i] = candidate;
        let logp_new = target(state);
        let log_ratio = logp_new - *logp + log_q;

        if logp_new > f64::NEG_INFINITY && rng.gen::<f64>().ln() < log_ratio {
            *logp = logp_new;
            accepts[i] += 1;
            accepted += 1;
        } else {
            state[i] = old;
        }
    }
    accepted
}

/// Draw a starting point with finite log-density from the prior.
pub(crate) fn initial_state(model: &Model, rng: &mut ChaCha8Rng) -> Result<Vec<f64>> {
    for _ in 0..MAX_INIT_ATTEMPTS {
        let q = model.draw_prior(rng);
        if model.logp(&q).is_finite() {
            return Ok(q);
        }
    }
    Err(Error::InvalidConfig(
        "could not draw a starting point with finite log-density".to_string(),
    ))
}

/// Run a single Metropolis chain.
///
/// The model is read-only; each chain owns its RNG, so results depend only
/// on the seed.
pub fn run_chain(
    model: &Model,
    config: &MetropolisConfig,
    rng: &mut ChaCha8Rng,
    init: Option<Vec<f64>>,
    progress: Option<&ProgressState>,
) -> Result<ChainResult> {
    let dim = model.dim();
    if dim == 0 {
        return Err(Error::EmptyModel);
    }
    let mut proposals = resolve_proposals(model, config)?;

    let mut q = match init {
        Some(q) if q.len() == dim => q,
        Some(q) => {
            return Err(Error::InvalidConfig(format!(
                "initial state has {} values, model has {}",
                q.len(),
                dim
            )))
        }
        None => initial_state(model, rng)?,
    };
    let target = |values: &[f64]| model.logp(values);
    let mut logp = target(&q);

    let total_iters = config.num_warmup + config.num_draws;
    let mut samples = Vec::with_capacity(config.num_draws);
    let mut window = vec![0usize; dim];
    let mut accepted_draws = 0usize;

    for iter in 0..total_iters {
        let is_warmup = iter < config.num_warmup;

        let accepted = sweep(&target, &mut q, &mut logp, &proposals, &mut window, rng);

        if let Some(p) = progress {
            p.increment(accepted, dim);
        }

        if is_warmup {
            if config.tune_interval > 0 && (iter + 1) % config.tune_interval == 0 {
                tune_window(&mut proposals, &window, config.tune_interval);
                window.iter_mut().for_each(|a| *a = 0);
            }
        } else {
            accepted_draws += accepted;
            samples.push(q.clone());
        }
    }

    let accept_rate = if config.num_draws > 0 {
        accepted_draws as f64 / (config.num_draws * dim) as f64
    } else {
        0.0
    };
    let scales = proposals
        .iter()
        .map(|p| match p {
            Proposal::RandomWalk { scale } => *scale,
            _ => f64::NAN,
        })
        .collect();
    debug!(accept_rate, draws = samples.len(), "metropolis chain finished");

    Ok(ChainResult {
        samples,
        accept_rate,
        scales,
    })
}

/// Rescale each random walk from its acceptance rate over the last window.
fn tune_window(proposals: &mut [Proposal], window: &[usize], interval: usize) {
    for (proposal, &accepted) in proposals.iter_mut().zip(window) {
        if let Proposal::RandomWalk { scale } = proposal {
            *scale *= tune_factor(accepted as f64 / interval as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Bernoulli, BetaDist};
    use rand::SeedableRng;

    fn coin_model() -> Model {
        let mut m = Model::new();
        let p = BetaDist::prior(&mut m, "p", 1.0, 1.0).unwrap();
        let data = [false, true, false, false, false, false, false, false, false, true];
        Bernoulli::observed(&mut m, p, &data).unwrap();
        m
    }

    fn mean(samples: &[Vec<f64>], idx: usize) -> f64 {
        samples.iter().map(|s| s[idx]).sum::<f64>() / samples.len() as f64
    }

    #[test]
    fn test_tune_factor_bands() {
        assert_eq!(tune_factor(0.0), 0.1);
        assert_eq!(tune_factor(0.01), 0.5);
        assert_eq!(tune_factor(0.1), 0.9);
        assert_eq!(tune_factor(0.3), 1.0);
        assert_eq!(tune_factor(0.6), 1.1);
        assert_eq!(tune_factor(0.8), 2.0);
        assert_eq!(tune_factor(0.99), 10.0);
    }

    #[test]
    fn test_independent_proposal_recovers_conjugate_posterior() {
        // Posterior is Beta(3, 9): mean 0.25.
        let model = coin_model();
        let mut config = MetropolisConfig {
            num_draws: 4000,
            num_warmup: 100,
            ..Default::default()
        };
        config.proposals.insert(
            "p".to_string(),
            Proposal::Independent {
                dist: Dist::Beta {
                    alpha: 3.0,
                    beta: 9.0,
                },
            },
        );
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let result = run_chain(&model, &config, &mut rng, None, None).unwrap();

        assert_eq!(result.samples.len(), 4000);
        // The proposal equals the posterior, so every move is accepted.
        assert!(result.accept_rate > 0.99, "accept = {}", result.accept_rate);
        let m = mean(&result.samples, 0);
        assert!((m - 0.25).abs() < 0.02, "mean = {}", m);
    }

    #[test]
    fn test_random_walk_tunes_and_recovers_posterior() {
        let model = coin_model();
        let config = MetropolisConfig {
            num_draws: 8000,
            num_warmup: 1000,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let result = run_chain(&model, &config, &mut rng, None, None).unwrap();

        let m = mean(&result.samples, 0);
        assert!((m - 0.25).abs() < 0.03, "mean = {}", m);
        assert!(result.scales[0].is_finite() && result.scales[0] > 0.0);
        assert!(result.samples.iter().all(|s| s[0] > 0.0 && s[0] < 1.0));
    }

    #[test]
    fn test_flip_proposal_matches_bernoulli_prior() {
        let mut model = Model::new();
        Bernoulli::prior(&mut model, "A", 0.3).unwrap();
        let config = MetropolisConfig {
            num_draws: 10_000,
            num_warmup: 100,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let result = run_chain(&model, &config, &mut rng, None, None).unwrap();

        let freq = mean(&result.samples, 0);
        assert!((freq - 0.3).abs() < 0.03, "freq = {}", freq);
        assert!(result.samples.iter().all(|s| s[0] == 0.0 || s[0] == 1.0));
    }

    #[test]
    fn test_rejects_bad_initial_state_and_unknown_override() {
        let model = coin_model();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let config = MetropolisConfig::default();
        assert!(matches!(
            run_chain(&model, &config, &mut rng, Some(vec![0.5, 0.5]), None),
            Err(Error::InvalidConfig(_))
        ));

        let mut config = MetropolisConfig::default();
        config
            .proposals
            .insert("q".to_string(), Proposal::RandomWalk { scale: 0.1 });
        assert!(matches!(
            run_chain(&model, &config, &mut rng, None, None),
            Err(Error::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_empty_model_is_an_error() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let result = run_chain(&Model::new(), &MetropolisConfig::default(), &mut rng, None, None);
        assert!(matches!(result, Err(Error::EmptyModel)));
    }
}

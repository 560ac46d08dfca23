use crate::error::{Error, Result};
use crate::metropolis::{self, ChainResult, MetropolisConfig, Proposal};
use crate::model::Model;
use crate::progress::{join_progress_thread, spawn_progress_thread, ProgressState};
use crate::smc::{self, SmcConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Inference backend used to draw from a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Independent ancestral draws from the prior.
    Forward,
    #[default]
    Metropolis,
    Smc,
}

/// Configuration for the multi-chain sampler.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub method: Method,
    pub num_chains: usize,
    /// Draws kept per chain (particles per run for SMC).
    pub num_draws: usize,
    pub num_warmup: usize,
    pub seed: u64,
    /// Number of threads. 0 means use Rayon's default (all cores).
    pub num_threads: usize,
    pub tune_interval: usize,
    pub p_jump: f64,
    pub proposals: HashMap<String, Proposal>,
    pub ess_threshold: f64,
    pub mutation_steps: usize,
    pub max_stages: usize,
    /// Render a stderr progress bar for Metropolis runs.
    pub progress: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            method: Method::Metropolis,
            num_chains: 4,
            num_draws: 1000,
            num_warmup: 500,
            seed: 42,
            num_threads: 0,
            tune_interval: 100,
            p_jump: 0.5,
            proposals: HashMap::new(),
            ess_threshold: 0.5,
            mutation_steps: 10,
            max_stages: 100,
            progress: false,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_chains == 0 {
            return Err(Error::InvalidConfig("num_chains must be > 0".into()));
        }
        if self.num_draws == 0 {
            return Err(Error::InvalidConfig("num_draws must be > 0".into()));
        }
        Ok(())
    }

    fn metropolis(&self) -> MetropolisConfig {
        MetropolisConfig {
            num_draws: self.num_draws,
            num_warmup: self.num_warmup,
            tune_interval: self.tune_interval,
            p_jump: self.p_jump,
            proposals: self.proposals.clone(),
        }
    }

    fn smc(&self) -> SmcConfig {
        SmcConfig {
            num_particles: self.num_draws,
            ess_threshold: self.ess_threshold,
            mutation_steps: self.mutation_steps,
            max_stages: self.max_stages,
            p_jump: self.p_jump,
        }
    }
}

/// Result of sampling across all chains.
#[derive(Debug, Clone)]
pub struct SampleResult {
    /// samples[chain][draw][var]
    pub samples: Vec<Vec<Vec<f64>>>,
    pub accept_rates: Vec<f64>,
    pub param_names: Vec<String>,
    /// Per-run log marginal likelihood (SMC only).
    pub log_evidence: Vec<f64>,
}

impl SampleResult {
    /// Every draw of every chain, chain-major.
    pub fn draws(&self) -> impl Iterator<Item = &[f64]> {
        self.samples
            .iter()
            .flat_map(|chain| chain.iter().map(|d| d.as_slice()))
    }

    pub fn total_draws(&self) -> usize {
        self.samples.iter().map(|c| c.len()).sum()
    }

    /// All draws of one variable, chain-major.
    pub fn values(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.param_names.iter().position(|n| n == name)?;
        Some(self.draws().map(|d| d[idx]).collect())
    }

    /// Posterior mean of each variable.
    pub fn mean(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.param_names.len()];
        let mut count = 0usize;
        for draw in self.draws() {
            for (s, v) in sums.iter_mut().zip(draw) {
                *s += v;
            }
            count += 1;
        }
        sums.iter().map(|s| s / count as f64).collect()
    }

    /// Posterior standard deviation of each variable.
    pub fn std(&self) -> Vec<f64> {
        let means = self.mean();
        let mut sum_sq = vec![0.0; self.param_names.len()];
        let mut count = 0usize;
        for draw in self.draws() {
            for (i, v) in draw.iter().enumerate() {
                let diff = v - means[i];
                sum_sq[i] += diff * diff;
            }
            count += 1;
        }
        sum_sq.iter().map(|s| (s / count as f64).sqrt()).collect()
    }
}

/// Run `num_chains` independent chains (or SMC runs) on the given model.
///
/// The model is wrapped in an `Arc` and shared read-only across all chains.
/// Each chain gets a deterministic RNG seeded from `config.seed + chain_index`,
/// so results do not depend on thread scheduling.
pub fn sample(model: &Model, config: &SamplerConfig) -> Result<SampleResult> {
    config.validate()?;
    if model.dim() == 0 {
        return Err(Error::EmptyModel);
    }
    if config.method == Method::Forward && model.has_observations() {
        return Err(Error::ForwardWithObservations);
    }

    if config.num_threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build_global()
            .ok();
    }

    let model = Arc::new(model.clone());
    let param_names = model.var_names();
    let chain_indices: Vec<usize> = (0..config.num_chains).collect();
    let rng_for =
        |chain_idx: usize| ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(chain_idx as u64));

    let (samples, accept_rates, log_evidence) = match config.method {
        Method::Forward => {
            let samples: Vec<Vec<Vec<f64>>> = chain_indices
                .par_iter()
                .map(|&chain_idx| {
                    let mut rng = rng_for(chain_idx);
                    (0..config.num_draws)
                        .map(|_| model.draw_prior(&mut rng))
                        .collect()
                })
                .collect();
            let rates = vec![1.0; config.num_chains];
            (samples, rates, Vec::new())
        }
        Method::Metropolis => {
            let mh_config = config.metropolis();
            let progress = config.progress.then(|| {
                Arc::new(ProgressState::new(
                    config.num_chains,
                    config.num_draws,
                    config.num_warmup,
                ))
            });
            let handle = progress.clone().map(spawn_progress_thread);

            let results: Result<Vec<ChainResult>> = chain_indices
                .par_iter()
                .map(|&chain_idx| {
                    let mut rng = rng_for(chain_idx);
                    metropolis::run_chain(
                        &model,
                        &mh_config,
                        &mut rng,
                        None,
                        progress.as_deref(),
                    )
                })
                .collect();

            if let (Some(state), Some(handle)) = (progress, handle) {
                state.finish();
                join_progress_thread(handle);
            }
            let results = results?;
            let rates = results.iter().map(|r| r.accept_rate).collect();
            let samples = results.into_iter().map(|r| r.samples).collect();
            (samples, rates, Vec::new())
        }
        Method::Smc => {
            let smc_config = config.smc();
            let results: Result<Vec<smc::SmcResult>> = chain_indices
                .par_iter()
                .map(|&chain_idx| {
                    let mut rng = rng_for(chain_idx);
                    smc::run(&model, &smc_config, &mut rng)
                })
                .collect();
            let results = results?;
            let rates = results.iter().map(|r| r.accept_rate).collect();
            let evidence = results.iter().map(|r| r.log_evidence).collect();
            let samples = results.into_iter().map(|r| r.particles).collect();
            (samples, rates, evidence)
        }
    };

    info!(
        method = ?config.method,
        chains = config.num_chains,
        draws = config.num_draws,
        "sampling complete"
    );

    Ok(SampleResult {
        samples,
        accept_rates,
        param_names,
        log_evidence,
    })
}

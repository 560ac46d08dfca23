//! Beta–Bernoulli coin experiment with a conjugate reference answer.

use crate::config::ExperimentSection;
use crate::distributions::{ln_beta, Bernoulli, BetaDist, Dist};
use crate::error::Result;
use crate::metropolis::Proposal;
use crate::model::Model;
use crate::sampler::{self, SamplerConfig};
use serde::Serialize;
use tracing::info;

/// Name of the coin-bias variable in the model.
pub const BIAS: &str = "p";

#[derive(Debug, Clone, PartialEq)]
pub struct CoinExperiment {
    pub flips: Vec<bool>,
    pub prior: (f64, f64),
    /// Independent proposal for the bias, unless the sampler config already
    /// names one.
    pub proposal: (f64, f64),
}

impl Default for CoinExperiment {
    fn default() -> Self {
        Self::from_config(&ExperimentSection::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinReport {
    pub heads: usize,
    pub flips: usize,
    pub mean: f64,
    pub std: f64,
    pub exact_mean: f64,
    pub exact_std: f64,
    pub accept_rate: f64,
    /// Mean SMC estimate of ln p(data); `None` for other methods.
    pub log_evidence: Option<f64>,
    pub exact_log_evidence: f64,
}

impl CoinExperiment {
    pub fn from_config(section: &ExperimentSection) -> Self {
        Self {
            flips: section.coin_flips(),
            prior: section.coin_prior,
            proposal: section.coin_proposal,
        }
    }

    pub fn heads(&self) -> usize {
        self.flips.iter().filter(|&&h| h).count()
    }

    pub fn model(&self) -> Result<Model> {
        let mut model = Model::new();
        let p = BetaDist::prior(&mut model, BIAS, self.prior.0, self.prior.1)?;
        Bernoulli::observed(&mut model, p, &self.flips)?;
        Ok(model)
    }

    /// The conjugate posterior `Beta(alpha + k, beta + n - k)`.
    pub fn exact_posterior(&self) -> Dist {
        let k = self.heads() as f64;
        let n = self.flips.len() as f64;
        Dist::Beta {
            alpha: self.prior.0 + k,
            beta: self.prior.1 + n - k,
        }
    }

    /// ln p(data) = ln B(alpha + k, beta + n - k) - ln B(alpha, beta).
    pub fn exact_log_evidence(&self) -> f64 {
        let k = self.heads() as f64;
        let n = self.flips.len() as f64;
        let (a, b) = self.prior;
        ln_beta(a + k, b + n - k) - ln_beta(a, b)
    }

    pub fn run(&self, config: &SamplerConfig) -> Result<CoinReport> {
        let model = self.model()?;
        let mut config = config.clone();
        config
            .proposals
            .entry(BIAS.to_string())
            .or_insert(Proposal::Independent {
                dist: Dist::Beta {
                    alpha: self.proposal.0,
                    beta: self.proposal.1,
                },
            });

        let result = sampler::sample(&model, &config)?;
        let exact = self.exact_posterior();
        let accept_rate =
            result.accept_rates.iter().sum::<f64>() / result.accept_rates.len() as f64;
        let log_evidence = (!result.log_evidence.is_empty()).then(|| {
            result.log_evidence.iter().sum::<f64>() / result.log_evidence.len() as f64
        });

        let report = CoinReport {
            heads: self.heads(),
            flips: self.flips.len(),
            mean: result.mean()[0],
            std: result.std()[0],
            exact_mean: exact.mean(),
            exact_std: exact.std_dev(),
            accept_rate,
            log_evidence,
            exact_log_evidence: self.exact_log_evidence(),
        };
        info!(
            mean = report.mean,
            exact_mean = report.exact_mean,
            accept_rate = report.accept_rate,
            "coin experiment complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::sampler::Method;

    #[test]
    fn test_exact_posterior_for_default_data() {
        let coin = CoinExperiment::default();
        assert_eq!(coin.heads(), 2);
        assert_eq!(
            coin.exact_posterior(),
            Dist::Beta {
                alpha: 3.0,
                beta: 9.0
            }
        );
        assert!((coin.exact_posterior().mean() - 0.25).abs() < 1e-12);
        assert!((coin.exact_posterior().std_dev() - 0.1201).abs() < 1e-3);
        assert!((coin.exact_log_evidence() - ln_beta(3.0, 9.0)).abs() < 1e-9);
    }

    #[test]
    fn test_metropolis_matches_conjugate_posterior() {
        let coin = CoinExperiment::default();
        let report = coin.run(&SamplerConfig::default()).unwrap();
        assert!((report.mean - report.exact_mean).abs() < 0.02, "{:?}", report);
        assert!((report.std - report.exact_std).abs() < 0.02, "{:?}", report);
        // The proposal equals the posterior, so nearly every move is accepted.
        assert!(report.accept_rate > 0.95);
        assert!(report.log_evidence.is_none());
    }

    #[test]
    fn test_explicit_proposal_is_kept() {
        let coin = CoinExperiment::default();
        let mut config = SamplerConfig::default();
        config
            .proposals
            .insert(BIAS.into(), Proposal::RandomWalk { scale: 0.1 });
        let report = coin.run(&config).unwrap();
        assert!(report.accept_rate < 0.95);
        assert!((report.mean - 0.25).abs() < 0.03);
    }

    #[test]
    fn test_smc_estimates_evidence() {
        let coin = CoinExperiment::default();
        let config = SamplerConfig {
            method: Method::Smc,
            num_chains: 2,
            ..Default::default()
        };
        let report = coin.run(&config).unwrap();
        let evidence = report.log_evidence.unwrap();
        assert!((evidence - report.exact_log_evidence).abs() < 0.3);
        assert!((report.mean - 0.25).abs() < 0.03);
    }

    #[test]
    fn test_forward_sampling_rejected() {
        let config = SamplerConfig {
            method: Method::Forward,
            ..Default::default()
        };
        assert!(matches!(
            CoinExperiment::default().run(&config),
            Err(Error::ForwardWithObservations)
        ));
    }
}

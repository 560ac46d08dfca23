use crate::distributions::Dist;
use crate::error::{Error, Result};
use rand::Rng;
use std::collections::HashMap;

/// Index of a latent variable in the model's value vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub usize);

/// A latent random variable with a fixed prior.
#[derive(Debug, Clone)]
pub struct Latent {
    pub name: String,
    pub prior: Dist,
}

/// Observation terms that contribute to the log-likelihood.
#[derive(Debug, Clone)]
pub enum Likelihood {
    /// Observed Bernoulli outcomes whose success probability is a latent
    /// variable. Only the sufficient statistics are kept.
    Bernoulli {
        p: VarId,
        successes: usize,
        trials: usize,
    },
}

/// A small generative model over named scalar latent variables.
///
/// Values are stored in declaration order, so a sampler state is a plain
/// `Vec<f64>` indexed by `VarId`. The model is immutable during sampling and
/// shared read-only across chains.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub latents: Vec<Latent>,
    pub likelihoods: Vec<Likelihood>,
    name_to_var: HashMap<String, VarId>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_latent(&mut self, name: &str, prior: Dist) -> Result<VarId> {
        prior.validate()?;
        if self.name_to_var.contains_key(name) {
            return Err(Error::DuplicateVariable(name.to_string()));
        }
        let id = VarId(self.latents.len());
        self.latents.push(Latent {
            name: name.to_string(),
            prior,
        });
        self.name_to_var.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn add_bernoulli_obs(&mut self, p: VarId, obs: &[bool]) -> Result<()> {
        let latent = self
            .latents
            .get(p.0)
            .ok_or_else(|| Error::UnknownVariable(format!("#{}", p.0)))?;
        let (lo, hi) = latent.prior.bounds();
        if lo < 0.0 || hi > 1.0 {
            return Err(Error::InvalidDistribution(format!(
                "'{}' cannot be a success probability: support [{lo}, {hi}]",
                latent.name
            )));
        }
        self.likelihoods.push(Likelihood::Bernoulli {
            p,
            successes: obs.iter().filter(|&&o| o).count(),
            trials: obs.len(),
        });
        Ok(())
    }

    /// Number of latent variables.
    pub fn dim(&self) -> usize {
        self.latents.len()
    }

    pub fn var_names(&self) -> Vec<String> {
        self.latents.iter().map(|l| l.name.clone()).collect()
    }

    pub fn var_id(&self, name: &str) -> Result<VarId> {
        self.name_to_var
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownVariable(name.to_string()))
    }

    pub fn prior(&self, id: VarId) -> &Dist {
        &self.latents[id.0].prior
    }

    pub fn has_observations(&self) -> bool {
        !self.likelihoods.is_empty()
    }

    pub fn log_prior(&self, values: &[f64]) -> f64 {
        self.latents
            .iter()
            .zip(values)
            .map(|(l, &v)| l.prior.logp(v))
            .sum()
    }

    pub fn log_likelihood(&self, values: &[f64]) -> f64 {
        self.likelihoods
            .iter()
            .map(|term| match *term {
                Likelihood::Bernoulli {
                    p,
                    successes,
                    trials,
                } => bernoulli_loglik(values[p.0], successes, trials),
            })
            .sum()
    }

    /// Unnormalised log-posterior.
    pub fn logp(&self, values: &[f64]) -> f64 {
        let lp = self.log_prior(values);
        if lp == f64::NEG_INFINITY {
            return lp;
        }
        lp + self.log_likelihood(values)
    }

    /// One ancestral draw from the prior.
    pub fn draw_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.latents.iter().map(|l| l.prior.sample(rng)).collect()
    }
}

fn bernoulli_loglik(p: f64, successes: usize, trials: usize) -> f64 {
    let failures = trials - successes;
    let mut ll = 0.0;
    // 0 * ln(0) is taken as 0 so that p on the boundary stays finite when
    // the data allow it.
    if successes > 0 {
        ll += successes as f64 * p.ln();
    }
    if failures > 0 {
        ll += failures as f64 * (1.0 - p).ln();
    }
    ll
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Bernoulli, BetaDist, Uniform};

    #[test]
    fn test_duplicate_names_rejected() {
        let mut m = Model::new();
        Bernoulli::prior(&mut m, "A", 0.5).unwrap();
        assert!(matches!(
            Bernoulli::prior(&mut m, "A", 0.5),
            Err(Error::DuplicateVariable(_))
        ));
    }

    #[test]
    fn test_logp_sums_prior_and_likelihood() {
        let mut m = Model::new();
        let p = BetaDist::prior(&mut m, "p", 1.0, 1.0).unwrap();
        Bernoulli::observed(&mut m, p, &[true, false, false]).unwrap();

        let values = [0.4];
        let expected = 0.4f64.ln() + 2.0 * 0.6f64.ln();
        assert!((m.log_prior(&values)).abs() < 1e-10);
        assert!((m.logp(&values) - expected).abs() < 1e-10);
    }

    #[test]
    fn test_probability_variable_must_be_bounded() {
        let mut m = Model::new();
        let wide = Uniform::prior(&mut m, "w", -1.0, 2.0).unwrap();
        assert!(Bernoulli::observed(&mut m, wide, &[true]).is_err());
    }

    #[test]
    fn test_lookup_by_name() {
        let mut m = Model::new();
        Bernoulli::prior(&mut m, "A", 0.5).unwrap();
        let c = Uniform::prior(&mut m, "C", 0.0, 1.0).unwrap();
        assert_eq!(m.var_id("C").unwrap(), c);
        assert!(m.var_id("Z").is_err());
        assert_eq!(m.var_names(), vec!["A".to_string(), "C".to_string()]);
    }
}

//! TOML configuration for the experiments.
//!
//! Every field has a default, so an empty file (or no file) is valid.

use crate::error::{Error, Result};
use crate::metropolis::Proposal;
use crate::sampler::{Method, SamplerConfig};
use crate::table::{Constraints, ContextTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sampler: SamplerSection,

    #[serde(default)]
    pub smc: SmcSection,

    #[serde(default)]
    pub experiment: ExperimentSection,

    #[serde(default)]
    pub constraints: ConstraintsSection,
}

/// Chain layout shared by every sampling method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerSection {
    #[serde(default)]
    pub method: Method,

    #[serde(default = "default_num_chains")]
    pub num_chains: usize,

    /// Draws per chain (particles per run for SMC)
    #[serde(default = "default_num_draws")]
    pub num_draws: usize,

    #[serde(default = "default_num_warmup")]
    pub num_warmup: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// 0 uses every core
    #[serde(default)]
    pub num_threads: usize,

    #[serde(default = "default_tune_interval")]
    pub tune_interval: usize,

    #[serde(default = "default_p_jump")]
    pub p_jump: f64,

    /// Show a progress bar on stderr (Metropolis only)
    #[serde(default)]
    pub progress: bool,

    /// Per-variable proposal overrides, keyed by variable name
    #[serde(default)]
    pub proposals: HashMap<String, Proposal>,
}

fn default_num_chains() -> usize {
    4
}

fn default_num_draws() -> usize {
    1000
}

fn default_num_warmup() -> usize {
    500
}

fn default_seed() -> u64 {
    42
}

fn default_tune_interval() -> usize {
    100
}

fn default_p_jump() -> f64 {
    0.5
}

impl Default for SamplerSection {
    fn default() -> Self {
        Self {
            method: Method::default(),
            num_chains: default_num_chains(),
            num_draws: default_num_draws(),
            num_warmup: default_num_warmup(),
            seed: default_seed(),
            num_threads: 0,
            tune_interval: default_tune_interval(),
            p_jump: default_p_jump(),
            progress: false,
            proposals: HashMap::new(),
        }
    }
}

/// Adaptive tempering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcSection {
    /// Target ESS per stage as a fraction of the particle count
    #[serde(default = "default_ess_threshold")]
    pub ess_threshold: f64,

    #[serde(default = "default_mutation_steps")]
    pub mutation_steps: usize,

    #[serde(default = "default_max_stages")]
    pub max_stages: usize,
}

fn default_ess_threshold() -> f64 {
    0.5
}

fn default_mutation_steps() -> usize {
    10
}

fn default_max_stages() -> usize {
    100
}

impl Default for SmcSection {
    fn default() -> Self {
        Self {
            ess_threshold: default_ess_threshold(),
            mutation_steps: default_mutation_steps(),
            max_stages: default_max_stages(),
        }
    }
}

/// Experiment parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSection {
    /// Accepted draws required for the global distribution
    #[serde(default = "default_target")]
    pub target: usize,

    /// Slack allowed on sampled tables before reporting a violation
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Proposals allowed per requested acceptance before giving up
    #[serde(default = "default_max_proposal_factor")]
    pub max_proposal_factor: usize,

    /// Coin flips, 1 for heads
    #[serde(default = "default_coin_data")]
    pub coin_data: Vec<u8>,

    /// Beta prior on the coin bias, as (alpha, beta)
    #[serde(default = "default_coin_prior")]
    pub coin_prior: (f64, f64),

    /// Independent Beta proposal for the coin bias, as (alpha, beta)
    #[serde(default = "default_coin_proposal")]
    pub coin_proposal: (f64, f64),
}

fn default_target() -> usize {
    10_000
}

fn default_tolerance() -> f64 {
    0.05
}

fn default_max_proposal_factor() -> usize {
    crate::global::MAX_PROPOSAL_FACTOR
}

fn default_coin_data() -> Vec<u8> {
    vec![0, 1, 0, 0, 0, 0, 0, 0, 0, 1]
}

fn default_coin_prior() -> (f64, f64) {
    (1.0, 1.0)
}

fn default_coin_proposal() -> (f64, f64) {
    (3.0, 9.0)
}

impl Default for ExperimentSection {
    fn default() -> Self {
        Self {
            target: default_target(),
            tolerance: default_tolerance(),
            max_proposal_factor: default_max_proposal_factor(),
            coin_data: default_coin_data(),
            coin_prior: default_coin_prior(),
            coin_proposal: default_coin_proposal(),
        }
    }
}

impl ExperimentSection {
    pub fn coin_flips(&self) -> Vec<bool> {
        self.coin_data.iter().map(|&v| v != 0).collect()
    }
}

/// One `[[P(0,0), P(0,1)], [P(1,0), P(1,1)]]` table per setting pair.
/// Defaults to the PR box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintsSection {
    #[serde(default = "ContextTable::correlated")]
    pub xy00: ContextTable,

    #[serde(default = "ContextTable::correlated")]
    pub xy01: ContextTable,

    #[serde(default = "ContextTable::correlated")]
    pub xy10: ContextTable,

    #[serde(default = "ContextTable::anticorrelated")]
    pub xy11: ContextTable,
}

impl Default for ConstraintsSection {
    fn default() -> Self {
        Self::from(Constraints::pr_box())
    }
}

impl From<Constraints> for ConstraintsSection {
    fn from(c: Constraints) -> Self {
        Self {
            xy00: c.tables[0][0],
            xy01: c.tables[0][1],
            xy10: c.tables[1][0],
            xy11: c.tables[1][1],
        }
    }
}

impl From<ConstraintsSection> for Constraints {
    fn from(s: ConstraintsSection) -> Self {
        Self {
            tables: [[s.xy00, s.xy01], [s.xy10, s.xy11]],
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.to_sampler_config().validate()?;
        for proposal in self.sampler.proposals.values() {
            proposal.validate()?;
        }
        if self.smc.max_stages == 0 {
            return Err(Error::InvalidConfig("smc.max_stages must be > 0".into()));
        }
        if !(self.smc.ess_threshold > 0.0 && self.smc.ess_threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "smc.ess_threshold must lie in (0, 1], got {}",
                self.smc.ess_threshold
            )));
        }
        if self.experiment.target == 0 {
            return Err(Error::InvalidConfig("experiment.target must be > 0".into()));
        }
        if !(self.experiment.tolerance >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "experiment.tolerance must be non-negative, got {}",
                self.experiment.tolerance
            )));
        }
        if self.experiment.max_proposal_factor == 0 {
            return Err(Error::InvalidConfig(
                "experiment.max_proposal_factor must be > 0".into(),
            ));
        }
        if self.experiment.coin_data.iter().any(|&v| v > 1) {
            return Err(Error::InvalidConfig(
                "experiment.coin_data entries must be 0 or 1".into(),
            ));
        }
        for (label, (a, b)) in [
            ("coin_prior", self.experiment.coin_prior),
            ("coin_proposal", self.experiment.coin_proposal),
        ] {
            if !(a > 0.0 && b > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "experiment.{label} parameters must be positive, got ({a}, {b})"
                )));
            }
        }
        self.constraints().validate()
    }

    pub fn constraints(&self) -> Constraints {
        self.constraints.into()
    }

    pub fn to_sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            method: self.sampler.method,
            num_chains: self.sampler.num_chains,
            num_draws: self.sampler.num_draws,
            num_warmup: self.sampler.num_warmup,
            seed: self.sampler.seed,
            num_threads: self.sampler.num_threads,
            tune_interval: self.sampler.tune_interval,
            p_jump: self.sampler.p_jump,
            proposals: self.sampler.proposals.clone(),
            ess_threshold: self.smc.ess_threshold,
            mutation_steps: self.smc.mutation_steps,
            max_stages: self.smc.max_stages,
            progress: self.sampler.progress,
        }
    }

    /// An annotated configuration listing every default.
    pub fn example_toml() -> &'static str {
        r#"# contextmc configuration

[sampler]
method = "metropolis"   # forward | metropolis | smc
num_chains = 4
num_draws = 1000
num_warmup = 500
seed = 42
num_threads = 0         # 0 = all cores
tune_interval = 100
p_jump = 0.5
progress = false

# Per-variable proposal overrides
# [sampler.proposals.C]
# kind = "random_walk"
# scale = 0.3

[smc]
ess_threshold = 0.5
mutation_steps = 10
max_stages = 100

[experiment]
target = 10000
tolerance = 0.05
max_proposal_factor = 1000
coin_data = [0, 1, 0, 0, 0, 0, 0, 0, 0, 1]
coin_prior = [1.0, 1.0]
coin_proposal = [3.0, 9.0]

# P(a, b | x, y) as [[P(0,0), P(0,1)], [P(1,0), P(1,1)]]
[constraints]
xy00 = [[0.5, 0.0], [0.0, 0.5]]
xy01 = [[0.5, 0.0], [0.0, 0.5]]
xy10 = [[0.5, 0.0], [0.0, 0.5]]
xy11 = [[0.0, 0.5], [0.5, 0.0]]
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Dist;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.constraints(), Constraints::pr_box());
        assert_eq!(config.to_sampler_config().num_chains, 4);
    }

    #[test]
    fn test_example_parses_to_defaults() {
        let config = Config::from_toml_str(Config::example_toml()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
[sampler]
method = "smc"
num_draws = 250

[smc]
mutation_steps = 4

[constraints]
xy11 = [[0.25, 0.25], [0.25, 0.25]]

[sampler.proposals.C]
kind = "independent"
dist = { kind = "beta", alpha = 2.0, beta = 2.0 }
"#,
        )
        .unwrap();

        let sampler = config.to_sampler_config();
        assert_eq!(sampler.method, Method::Smc);
        assert_eq!(sampler.num_draws, 250);
        assert_eq!(sampler.num_warmup, 500);
        assert_eq!(sampler.mutation_steps, 4);
        assert_eq!(
            sampler.proposals["C"],
            Proposal::Independent {
                dist: Dist::Beta {
                    alpha: 2.0,
                    beta: 2.0
                }
            }
        );
        assert_eq!(config.constraints().threshold(0, 1, 1, 1), 0.25);
        assert_eq!(config.constraints().threshold(0, 0, 0, 0), 0.5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_toml_str("[sampler]\nnum_chains = 0\n"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[constraints]\nxy00 = [[0.5, 0.5], [0.5, 0.5]]\n"),
            Err(Error::InvalidConstraints { x: 0, y: 0, .. })
        ));
        assert!(matches!(
            Config::from_toml_str("[experiment]\ncoin_data = [0, 2]\n"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[experiment]\nmax_proposal_factor = 0\n"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[sampler]\nmethod = \"hmc\"\n"),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file(Path::new("/nonexistent/contextmc.toml"));
        assert!(matches!(result, Err(Error::Io { .. })));
    }
}

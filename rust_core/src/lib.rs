//! Monte-Carlo estimation of joint outcome tables for small Bell-type
//! experiments, and the inequality tests evaluated against them.
//!
//! Models are built from Bernoulli, Beta and Uniform variables
//! ([`model`], [`distributions`]) and sampled with forward draws,
//! component-wise Metropolis–Hastings or tempered SMC ([`sampler`]).
//! [`global`] tallies accepted draws over the Foulis–Randall product
//! ([`hypergraph`]) into a 2x2x2x2 table, which [`bell`] checks for
//! signalling and CHSH violations.

pub mod bell;
pub mod coin;
pub mod config;
pub mod diagnostics;
pub mod distributions;
pub mod error;
pub mod global;
pub mod hypergraph;
pub mod metropolis;
pub mod model;
pub mod polytope;
pub mod progress;
pub mod sampler;
pub mod smc;
pub mod table;

pub use config::Config;
pub use error::{Error, Result};

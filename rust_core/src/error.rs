use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building models, sampling, or evaluating experiments.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid distribution parameters: {0}")]
    InvalidDistribution(String),

    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("duplicate variable name: {0}")]
    DuplicateVariable(String),

    #[error("model has no latent variables")]
    EmptyModel,

    #[error("invalid sampler configuration: {0}")]
    InvalidConfig(String),

    #[error("forward sampling is only defined for models without observations")]
    ForwardWithObservations,

    #[error("invalid context table for x={x}, y={y}: {reason}")]
    InvalidConstraints { x: usize, y: usize, reason: String },

    #[error("acceptance stalled: {accepted} of {target} draws accepted after {proposed} proposals")]
    AcceptanceStalled {
        accepted: usize,
        target: usize,
        proposed: usize,
    },

    #[error("tempering did not reach beta = 1 within {stages} stages (beta = {beta})")]
    TemperingStalled { stages: usize, beta: f64 },

    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

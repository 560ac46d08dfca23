//! contextmc CLI - sampled joint distributions and Bell-type inequality tests.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use contextmc_core::bell::{self, BellReport, ALGEBRAIC_BOUND, CLASSICAL_BOUND, TSIRELSON_BOUND};
use contextmc_core::coin::{CoinExperiment, CoinReport};
use contextmc_core::diagnostics;
use contextmc_core::global::{self, GlobalDistribution};
use contextmc_core::polytope::ThreeEventCorrelations;
use contextmc_core::sampler::{self, Method, SamplerConfig};
use contextmc_core::Config;
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "contextmc")]
#[command(version)]
#[command(about = "Monte-Carlo estimation of contextual joint distributions and CHSH tests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file (defaults apply without one)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Overrides for the `[sampler]` section.
#[derive(Args, Debug)]
struct SamplerArgs {
    #[arg(long, value_enum)]
    method: Option<MethodArg>,

    /// Number of chains (independent SMC runs for --method smc)
    #[arg(long)]
    chains: Option<usize>,

    /// Draws per chain
    #[arg(long)]
    draws: Option<usize>,

    #[arg(long)]
    warmup: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Show a progress bar for Metropolis runs
    #[arg(long)]
    progress: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MethodArg {
    Forward,
    Metropolis,
    Smc,
}

impl From<MethodArg> for Method {
    fn from(m: MethodArg) -> Self {
        match m {
            MethodArg::Forward => Method::Forward,
            MethodArg::Metropolis => Method::Metropolis,
            MethodArg::Smc => Method::Smc,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DiagnoseModel {
    /// Fair-coin outcomes and settings with the uniform acceptance variable
    Acceptance,
    /// Beta-Bernoulli coin posterior
    Coin,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the 2x2x2x2 global distribution and test it
    Global {
        #[command(flatten)]
        sampler: SamplerArgs,

        /// Accepted draws to collect
        #[arg(short, long)]
        target: Option<usize>,

        /// Slack allowed before reporting a violation
        #[arg(long)]
        tolerance: Option<f64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Infer a coin's bias and compare with the conjugate posterior
    Coin {
        #[command(flatten)]
        sampler: SamplerArgs,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check single and pairwise probabilities of three events against the
    /// correlation polytope
    Polytope {
        #[arg(long)]
        p1: f64,
        #[arg(long)]
        p2: f64,
        #[arg(long)]
        p3: f64,
        #[arg(long)]
        p12: f64,
        #[arg(long)]
        p13: f64,
        #[arg(long)]
        p23: f64,

        #[arg(long, default_value = "1e-9")]
        tolerance: f64,
    },

    /// Sample a model and print convergence diagnostics
    Diagnose {
        #[command(flatten)]
        sampler: SamplerArgs,

        #[arg(long, value_enum, default_value = "acceptance")]
        model: DiagnoseModel,
    },

    /// Show example configuration
    ExampleConfig,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => Ok(Config::default()),
    }
}

fn sampler_config(config: &Config, args: &SamplerArgs) -> Result<SamplerConfig> {
    let mut sc = config.to_sampler_config();
    if let Some(method) = args.method {
        sc.method = method.into();
    }
    if let Some(chains) = args.chains {
        sc.num_chains = chains;
    }
    if let Some(draws) = args.draws {
        sc.num_draws = draws;
    }
    if let Some(warmup) = args.warmup {
        sc.num_warmup = warmup;
    }
    if let Some(seed) = args.seed {
        sc.seed = seed;
    }
    sc.progress |= args.progress;
    sc.validate().context("Invalid sampler settings")?;
    Ok(sc)
}

fn print_global(dist: &GlobalDistribution, report: &BellReport) {
    println!("\n=== Global Distribution ===");
    println!(
        "Accepted:    {} of {} proposals",
        dist.accepted, dist.proposed
    );
    println!();
    println!(" x y |  p(0,0)  p(0,1)  p(1,0)  p(1,1) |    sum");
    println!("-----+---------------------------------+-------");
    for (ctx, sum) in report.context_sums.iter().enumerate() {
        let (x, y) = (ctx / 2, ctx % 2);
        let row = dist.probabilities.context(x, y);
        println!(
            " {} {} | {:>7.4} {:>7.4} {:>7.4} {:>7.4} | {:>6.4}",
            x, y, row[0], row[1], row[2], row[3], sum
        );
    }

    println!("\n=== Inequality Tests ===");
    println!(
        "Signalling δ: {:.4} ({})",
        report.delta,
        if report.no_signalling {
            "no-signalling"
        } else {
            "signalling"
        }
    );
    println!(
        "Correlators: E00 {:+.4}  E01 {:+.4}  E10 {:+.4}  E11 {:+.4}",
        report.correlators[0][0],
        report.correlators[0][1],
        report.correlators[1][0],
        report.correlators[1][1]
    );
    for term in &report.chsh {
        println!(
            "CHSH negating E{}{}: |S| = {:.4}  bound {:.4}  {}",
            term.negated.0,
            term.negated.1,
            term.value,
            term.bound,
            if term.violated { "VIOLATED" } else { "ok" }
        );
    }
    println!(
        "Max |S| {:.4} vs classical {:.1}, Tsirelson {:.4}, algebraic {:.1}",
        report.max_chsh, CLASSICAL_BOUND, TSIRELSON_BOUND, ALGEBRAIC_BOUND
    );
    println!(
        "Contextual:  {}",
        if report.contextual { "yes" } else { "no" }
    );
}

fn print_coin(report: &CoinReport) {
    println!("\n=== Coin Experiment ===");
    println!("Heads:       {} of {}", report.heads, report.flips);
    println!(
        "Mean:        {:.4} (exact {:.4})",
        report.mean, report.exact_mean
    );
    println!(
        "Std:         {:.4} (exact {:.4})",
        report.std, report.exact_std
    );
    println!("Accept rate: {:.3}", report.accept_rate);
    match report.log_evidence {
        Some(ev) => println!(
            "ln p(data):  {:.4} (exact {:.4})",
            ev, report.exact_log_evidence
        ),
        None => println!("ln p(data):  exact {:.4}", report.exact_log_evidence),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::ExampleConfig => {
            println!("{}", Config::example_toml());
        }

        Commands::Global {
            sampler,
            target,
            tolerance,
            json,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let sc = sampler_config(&config, &sampler)?;
            let target = target.unwrap_or(config.experiment.target);
            let tolerance = tolerance.unwrap_or(config.experiment.tolerance);
            let constraints = config.constraints();

            info!(method = ?sc.method, target, "generating global distribution");
            let max_proposals = target.saturating_mul(config.experiment.max_proposal_factor);
            let dist = global::generate_capped(&constraints, target, max_proposals, &sc)
                .context("Failed to generate global distribution")?;
            let report = bell::evaluate(&dist.probabilities, tolerance);

            if json {
                let counts: Vec<Vec<f64>> = dist.counts.outer_iter().map(|r| r.to_vec()).collect();
                let out = json!({
                    "accepted": dist.accepted,
                    "proposed": dist.proposed,
                    "counts": counts,
                    "edge_tallies": dist.edge_tallies,
                    "probabilities": dist.probabilities,
                    "report": report,
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&out).context("Failed to encode report")?
                );
            } else {
                print_global(&dist, &report);
            }
        }

        Commands::Coin { sampler, json } => {
            let config = load_config(cli.config.as_ref())?;
            let sc = sampler_config(&config, &sampler)?;
            let coin = CoinExperiment::from_config(&config.experiment);
            let report = coin.run(&sc).context("Coin experiment failed")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to encode report")?
                );
            } else {
                print_coin(&report);
            }
        }

        Commands::Polytope {
            p1,
            p2,
            p3,
            p12,
            p13,
            p23,
            tolerance,
        } => {
            let point = ThreeEventCorrelations {
                p1,
                p2,
                p3,
                p12,
                p13,
                p23,
            };
            let violations = point.check(tolerance);
            if violations.is_empty() {
                println!("Classical: all 16 facet inequalities hold");
            } else {
                println!("Non-classical: {} inequalities violated", violations.len());
                for v in &violations {
                    println!("  {:<40} by {:.6}", v.name, -v.value);
                }
            }
        }

        Commands::Diagnose { sampler, model } => {
            let config = load_config(cli.config.as_ref())?;
            let sc = sampler_config(&config, &sampler)?;
            let model = match model {
                DiagnoseModel::Acceptance => global::acceptance_model()?,
                DiagnoseModel::Coin => CoinExperiment::from_config(&config.experiment).model()?,
            };
            let result = sampler::sample(&model, &sc).context("Sampling failed")?;
            println!("{}", diagnostics::summarize(&result).to_table());
        }
    }

    Ok(())
}

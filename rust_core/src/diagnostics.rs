//! Convergence diagnostics for multi-chain runs: split R-hat, bulk and tail
//! ESS, Monte-Carlo standard error and central quantiles.
//!
//! Definitions follow Vehtari et al. (2021), "Rank-normalization, folding,
//! and localization: An improved R-hat for assessing convergence of MCMC".

use crate::sampler::SampleResult;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::Serialize;

/// Fewest draws per chain for which split statistics are defined.
const MIN_DRAWS: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct ParamDiagnostics {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    pub q03: f64,
    pub q97: f64,
    pub ess_bulk: f64,
    pub ess_tail: f64,
    pub r_hat: f64,
    pub mcse_mean: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub params: Vec<ParamDiagnostics>,
    pub num_chains: usize,
    pub num_draws: usize,
    pub accept_rates: Vec<f64>,
    pub log_evidence: Vec<f64>,
}

impl DiagnosticsReport {
    pub fn to_table(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "{} chains x {} draws per chain",
            self.num_chains, self.num_draws
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<10} {:>8} {:>8} {:>8} {:>8} {:>9} {:>9} {:>7} {:>10}",
            "var", "mean", "std", "q3%", "q97%", "ess_bulk", "ess_tail", "r_hat", "mcse_mean"
        ));
        lines.push("-".repeat(85));

        let fmt_ess = |v: f64| {
            if v.is_finite() {
                format!("{:.0}", v)
            } else {
                "NaN".to_string()
            }
        };
        for p in &self.params {
            lines.push(format!(
                "{:<10} {:>8.4} {:>8.4} {:>8.4} {:>8.4} {:>9} {:>9} {:>7.3} {:>10.6}",
                p.name,
                p.mean,
                p.std,
                p.q03,
                p.q97,
                fmt_ess(p.ess_bulk),
                fmt_ess(p.ess_tail),
                p.r_hat,
                p.mcse_mean,
            ));
        }
        lines.push("-".repeat(85));

        if !self.accept_rates.is_empty() {
            let avg = self.accept_rates.iter().sum::<f64>() / self.accept_rates.len() as f64;
            lines.push(format!("Mean accept rate: {:.3}", avg));
        }
        if !self.log_evidence.is_empty() {
            let avg = self.log_evidence.iter().sum::<f64>() / self.log_evidence.len() as f64;
            lines.push(format!("Mean log evidence: {:.4}", avg));
        }
        if self.params.iter().any(|p| p.r_hat > 1.01) {
            lines.push("warning: some R-hat values exceed 1.01; chains may not have mixed".into());
        }
        if self.params.iter().any(|p| p.ess_bulk < 400.0 || p.ess_tail < 400.0) {
            lines.push("warning: some ESS values are below 400; draw more samples".into());
        }
        lines.join("\n")
    }
}

/// Diagnose every variable of a sampling run.
///
/// Chains are truncated to the shortest one. Statistics that need split
/// chains are `NaN` when chains hold fewer than four draws, and R-hat and
/// ESS are `NaN` for variables that never move.
pub fn summarize(result: &SampleResult) -> DiagnosticsReport {
    let num_chains = result.samples.len();
    let num_draws = result.samples.iter().map(Vec::len).min().unwrap_or(0);

    let params = result
        .param_names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let trace = Array2::from_shape_fn((num_chains, num_draws), |(c, d)| {
                result.samples[c][d][idx]
            });
            diagnose(name, trace.view())
        })
        .collect();

    DiagnosticsReport {
        params,
        num_chains,
        num_draws,
        accept_rates: result.accept_rates.clone(),
        log_evidence: result.log_evidence.clone(),
    }
}

fn diagnose(name: &str, trace: ArrayView2<f64>) -> ParamDiagnostics {
    let total = trace.len();
    let mean = if total > 0 {
        trace.sum() / total as f64
    } else {
        f64::NAN
    };
    let std = if total > 1 {
        (trace.mapv(|v| (v - mean).powi(2)).sum() / (total - 1) as f64).sqrt()
    } else {
        f64::NAN
    };
    let sorted = sorted_values(trace);

    let (r_hat, ess_bulk, ess_tail, ess_mean) = if trace.ncols() >= MIN_DRAWS {
        let split = split_chains(trace);
        (
            rank_r_hat(split.view()),
            ess(rank_normalize(split.view()).view()),
            tail_ess(split.view(), &sorted),
            ess(split.view()),
        )
    } else {
        (f64::NAN, f64::NAN, f64::NAN, f64::NAN)
    };

    ParamDiagnostics {
        name: name.to_string(),
        mean,
        std,
        q03: quantile_sorted(&sorted, 0.03),
        q97: quantile_sorted(&sorted, 0.97),
        ess_bulk,
        ess_tail,
        r_hat,
        mcse_mean: std / ess_mean.sqrt(),
    }
}

fn sorted_values(trace: ArrayView2<f64>) -> Vec<f64> {
    let mut all: Vec<f64> = trace.iter().copied().collect();
    all.sort_unstable_by(f64::total_cmp);
    all
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = pos - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// Each chain's first and last halves as separate chains. The middle draw
/// of an odd-length chain is dropped.
fn split_chains(trace: ArrayView2<f64>) -> Array2<f64> {
    let (m, n) = trace.dim();
    let half = n / 2;
    Array2::from_shape_fn((2 * m, half), |(c, d)| {
        if c < m {
            trace[[c, d]]
        } else {
            trace[[c - m, n - half + d]]
        }
    })
}

/// Chain means and the pooled variance estimate `var+` with the mean
/// within-chain variance `W`.
fn variance_components(chains: ArrayView2<f64>) -> (Array1<f64>, f64, f64) {
    let n = chains.ncols() as f64;
    let means = chains.sum_axis(Axis(1)) / n;
    let within = chains.var_axis(Axis(1), 1.0).mean().unwrap_or(f64::NAN);
    let grand = means.sum() / means.len() as f64;
    let between_over_n =
        means.iter().map(|mu| (mu - grand).powi(2)).sum::<f64>() / (means.len() - 1) as f64;
    let var_plus = (n - 1.0) / n * within + between_over_n;
    (means, within, var_plus)
}

fn r_hat(chains: ArrayView2<f64>) -> f64 {
    let (_, within, var_plus) = variance_components(chains);
    if within <= 1e-30 {
        return f64::NAN;
    }
    (var_plus / within).sqrt()
}

/// Maximum of the bulk R-hat and the R-hat of the values folded around
/// the median.
fn rank_r_hat(split: ArrayView2<f64>) -> f64 {
    let sorted = sorted_values(split);
    let median = quantile_sorted(&sorted, 0.5);
    let folded = split.mapv(|v| (v - median).abs());
    let bulk = r_hat(rank_normalize(split).view());
    let tail = r_hat(rank_normalize(folded.view()).view());
    bulk.max(tail)
}

/// Replace every value by the normal score of its pooled rank, averaging
/// ties.
fn rank_normalize(chains: ArrayView2<f64>) -> Array2<f64> {
    let (m, n) = chains.dim();
    let total = m * n;
    let mut order: Vec<(usize, usize)> = (0..m).flat_map(|c| (0..n).map(move |d| (c, d))).collect();
    order.sort_unstable_by(|&a, &b| chains[a].total_cmp(&chains[b]));

    let mut out = Array2::zeros((m, n));
    let mut i = 0;
    while i < total {
        let mut j = i + 1;
        while j < total && chains[order[j]] == chains[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; ties share the mean of ranks i+1..=j.
        let rank = (i + j + 1) as f64 / 2.0;
        let score = inv_normal_cdf((rank - 0.375) / (total as f64 + 0.25));
        for &pos in &order[i..j] {
            out[pos] = score;
        }
        i = j;
    }
    out
}

/// Minimum ESS of the 5% and 95% quantile indicators.
fn tail_ess(split: ArrayView2<f64>, sorted: &[f64]) -> f64 {
    let lower = quantile_sorted(sorted, 0.05);
    let upper = quantile_sorted(sorted, 0.95);
    let below = |q: f64| split.mapv(|v| if v <= q { 1.0 } else { 0.0 });
    ess(below(lower).view()).min(ess(below(upper).view()))
}

/// Effective sample size of (already split) chains using Geyer's initial
/// monotone sequence of paired autocorrelations.
fn ess(chains: ArrayView2<f64>) -> f64 {
    let (m, n) = chains.dim();
    if m == 0 || n < 2 {
        return f64::NAN;
    }
    let (means, within, var_plus) = variance_components(chains);
    if var_plus <= 1e-30 {
        return f64::NAN;
    }

    let autocov = |lag: usize| -> f64 {
        chains
            .outer_iter()
            .zip(means.iter())
            .map(|(chain, &mu)| {
                (0..n - lag)
                    .map(|t| (chain[t] - mu) * (chain[t + lag] - mu))
                    .sum::<f64>()
                    / n as f64
            })
            .sum::<f64>()
            / m as f64
    };
    // Chain variances use n - 1 in the denominator, autocovariances n.
    let rho = |lag: usize| 1.0 - (within - autocov(lag)) / var_plus;

    let mut sum = 0.0;
    let mut prev_pair = f64::INFINITY;
    let mut t = 0;
    while t + 1 < n {
        let pair = if t == 0 { 1.0 + rho(1) } else { rho(t) + rho(t + 1) };
        if pair < 0.0 {
            break;
        }
        let pair = pair.min(prev_pair);
        sum += pair;
        prev_pair = pair;
        t += 2;
    }

    let total = (m * n) as f64;
    let tau = (2.0 * sum - 1.0).max(1.0 / total.log10());
    total / tau
}

/// Inverse standard normal CDF (Acklam's rational approximation, relative
/// error below 1.2e-9).
fn inv_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239e0,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838e0,
        -2.549732539343734e0,
        4.374664141464968e0,
        2.938163982698783e0,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996e0,
        3.754408661907416e0,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p > 1.0 - P_LOW {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}

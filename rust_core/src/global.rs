//! Global distribution estimation by acceptance sampling.
//!
//! Outcomes `(a, b)` and settings `(x, y)` are drawn as fair coins together
//! with a uniform `c`; the draw is kept when `c` falls under the context
//! table's probability for that outcome. Every kept draw is tallied on its
//! vertex and on each Foulis–Randall hyperedge containing it, and the vertex
//! counts are finally normalised by their hyperedge tallies.

use crate::distributions::{Bernoulli, Uniform};
use crate::error::{Error, Result};
use crate::hypergraph::{chsh_product, JointVertex, ProductHypergraph};
use crate::model::Model;
use crate::sampler::{self, SamplerConfig};
use crate::table::{Constraints, JointTable};
use ndarray::Array2;
use tracing::{debug, info, warn};

/// Default proposals allowed per requested acceptance before giving up.
pub const MAX_PROPOSAL_FACTOR: usize = 1000;

/// Fair-coin outcomes and settings plus the uniform acceptance variable.
pub fn acceptance_model() -> Result<Model> {
    let mut model = Model::new();
    for name in ["A", "B", "X", "Y"] {
        Bernoulli::prior(&mut model, name, 0.5)?;
    }
    Uniform::prior(&mut model, "C", 0.0, 1.0)?;
    Ok(model)
}

/// Position of a vertex in the 4x4 count grid: row `2x + a`, column `2y + b`.
pub fn grid_index(v: &JointVertex) -> (usize, usize) {
    (2 * v.x + v.a, 2 * v.y + v.b)
}

#[derive(Debug, Clone)]
pub struct GlobalDistribution {
    /// Raw accepted counts on the 4x4 grid.
    pub counts: Array2<f64>,
    /// Accepted counts per hyperedge, in hypergraph edge order.
    pub edge_tallies: Vec<f64>,
    pub probabilities: JointTable,
    pub accepted: usize,
    pub proposed: usize,
}

/// Running tallies over a product hypergraph.
#[derive(Debug, Clone)]
pub struct Tally {
    hypergraph: ProductHypergraph,
    counts: Array2<f64>,
    edge_tallies: Vec<f64>,
    accepted: usize,
    proposed: usize,
}

impl Tally {
    pub fn new(hypergraph: ProductHypergraph) -> Self {
        let edge_tallies = vec![0.0; hypergraph.num_edges()];
        Self {
            hypergraph,
            counts: Array2::zeros((4, 4)),
            edge_tallies,
            accepted: 0,
            proposed: 0,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn proposed(&self) -> usize {
        self.proposed
    }

    /// Add `weight` to a vertex and to every hyperedge containing it.
    pub fn add(&mut self, v: JointVertex, weight: f64) {
        for &edge in self.hypergraph.hyperedges_of(&v) {
            self.edge_tallies[edge] += weight;
        }
        self.counts[grid_index(&v)] += weight;
    }

    /// Offer one draw; returns whether it was accepted.
    pub fn record(&mut self, v: JointVertex, c: f64, constraints: &Constraints) -> bool {
        self.proposed += 1;
        if c < constraints.threshold(v.a, v.b, v.x, v.y) {
            self.add(v, 1.0);
            self.accepted += 1;
            true
        } else {
            false
        }
    }

    /// Divide each vertex count by the summed tallies of its hyperedges and
    /// scale by the vertex's hyperedge degree.
    pub fn normalize(&self) -> JointTable {
        let mut table = JointTable([0.0; 16]);
        let mut untallied = 0;
        for v in self.hypergraph.vertices() {
            let edges = self.hypergraph.hyperedges_of(&v);
            let summed: f64 = edges.iter().map(|&e| self.edge_tallies[e]).sum();
            let p = if summed > 0.0 {
                self.counts[grid_index(&v)] / summed * edges.len() as f64
            } else {
                untallied += 1;
                0.0
            };
            table.set(v.a, v.b, v.x, v.y, p);
        }
        if untallied > 0 {
            warn!(untallied, "vertices with no hyperedge tallies set to zero");
        }
        table
    }

    pub fn finish(self) -> GlobalDistribution {
        let probabilities = self.normalize();
        GlobalDistribution {
            counts: self.counts,
            edge_tallies: self.edge_tallies,
            probabilities,
            accepted: self.accepted,
            proposed: self.proposed,
        }
    }
}

fn bit(value: f64) -> usize {
    usize::from(value >= 0.5)
}

/// Sample the acceptance model in batches until `target` draws have been
/// accepted, then normalise over the CHSH Foulis–Randall product.
///
/// Every batch draws `num_chains * num_draws` values with the configured
/// method; batch `k` is seeded `seed + k * num_chains`. The last batch is
/// tallied in full, so `accepted` may exceed `target`. Gives up once
/// `target * MAX_PROPOSAL_FACTOR` draws have been proposed.
pub fn generate(
    constraints: &Constraints,
    target: usize,
    config: &SamplerConfig,
) -> Result<GlobalDistribution> {
    let max_proposals = target.saturating_mul(MAX_PROPOSAL_FACTOR);
    generate_capped(constraints, target, max_proposals, config)
}

/// [`generate`] with an explicit proposal budget. No new batch starts once
/// `max_proposals` draws have been proposed.
pub fn generate_capped(
    constraints: &Constraints,
    target: usize,
    max_proposals: usize,
    config: &SamplerConfig,
) -> Result<GlobalDistribution> {
    constraints.validate()?;
    config.validate()?;
    if target == 0 {
        return Err(Error::InvalidConfig("target must be > 0".into()));
    }

    let model = acceptance_model()?;
    let [ia, ib, ix, iy, ic] =
        ["A", "B", "X", "Y", "C"].map(|name| model.var_id(name).map(|id| id.0));
    let (ia, ib, ix, iy, ic) = (ia?, ib?, ix?, iy?, ic?);

    let mut tally = Tally::new(chsh_product());
    let mut batch = 0u64;

    while tally.accepted() < target {
        if tally.proposed() >= max_proposals {
            return Err(Error::AcceptanceStalled {
                accepted: tally.accepted(),
                target,
                proposed: tally.proposed(),
            });
        }
        let batch_config = SamplerConfig {
            seed: config
                .seed
                .wrapping_add(batch.wrapping_mul(config.num_chains as u64)),
            ..config.clone()
        };
        let result = sampler::sample(&model, &batch_config)?;
        for draw in result.draws() {
            let v = JointVertex::new(bit(draw[ia]), bit(draw[ib]), bit(draw[ix]), bit(draw[iy]));
            tally.record(v, draw[ic], constraints);
        }
        debug!(
            batch,
            accepted = tally.accepted(),
            proposed = tally.proposed(),
            "tallied batch"
        );
        batch += 1;
    }

    info!(
        accepted = tally.accepted(),
        proposed = tally.proposed(),
        batches = batch,
        "global distribution tallied"
    );
    Ok(tally.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::Method;
    use crate::table::ContextTable;

    fn assert_close(actual: &JointTable, expected: &JointTable, tol: f64) {
        for (i, (a, e)) in actual.0.iter().zip(expected.0.iter()).enumerate() {
            assert!((a - e).abs() <= tol, "entry {}: {} vs {}", i, a, e);
        }
    }

    fn weighted_tally(constraints: &Constraints) -> Tally {
        let mut tally = Tally::new(chsh_product());
        for v in chsh_product().vertices() {
            tally.add(v, constraints.threshold(v.a, v.b, v.x, v.y));
        }
        tally
    }

    #[test]
    fn test_exact_weights_normalise_to_constraints() {
        let constraints = Constraints::pr_box();
        let table = weighted_tally(&constraints).normalize();
        assert_close(&table, &JointTable::from_constraints(&constraints), 1e-12);
    }

    #[test]
    fn test_independent_marginals_survive_normalisation() {
        let (pa, pb) = (0.7, 0.6);
        let t = ContextTable([
            [pa * pb, pa * (1.0 - pb)],
            [(1.0 - pa) * pb, (1.0 - pa) * (1.0 - pb)],
        ]);
        let constraints = Constraints {
            tables: [[t, t], [t, t]],
        };
        let table = weighted_tally(&constraints).normalize();
        assert_close(&table, &JointTable::from_constraints(&constraints), 1e-12);
    }

    #[test]
    fn test_grid_layout() {
        assert_eq!(grid_index(&JointVertex::new(1, 0, 1, 1)), (3, 2));
        let mut tally = Tally::new(chsh_product());
        assert!(tally.record(JointVertex::new(0, 0, 1, 0), 0.1, &Constraints::pr_box()));
        assert!(!tally.record(JointVertex::new(0, 1, 1, 0), 0.1, &Constraints::pr_box()));
        let dist = tally.finish();
        assert_eq!(dist.counts[[2, 0]], 1.0);
        assert_eq!(dist.edge_tallies.iter().sum::<f64>(), 3.0);
        assert_eq!((dist.accepted, dist.proposed), (1, 2));
    }

    #[test]
    fn test_forward_sampling_estimates_pr_box() {
        let config = SamplerConfig {
            method: Method::Forward,
            num_chains: 2,
            num_draws: 5000,
            ..Default::default()
        };
        let constraints = Constraints::pr_box();
        let dist = generate(&constraints, 20_000, &config).unwrap();

        assert!(dist.accepted >= 20_000);
        assert_close(
            &dist.probabilities,
            &JointTable::from_constraints(&constraints),
            0.05,
        );
        // Zero-probability outcomes are never accepted.
        assert_eq!(dist.probabilities.get(0, 1, 0, 0), 0.0);
        assert_eq!(dist.probabilities.get(0, 0, 1, 1), 0.0);
    }

    #[test]
    fn test_metropolis_sampling_estimates_pr_box() {
        let config = SamplerConfig {
            method: Method::Metropolis,
            num_chains: 2,
            num_draws: 4000,
            num_warmup: 200,
            ..Default::default()
        };
        let constraints = Constraints::pr_box();
        let dist = generate(&constraints, 8000, &config).unwrap();
        assert_close(
            &dist.probabilities,
            &JointTable::from_constraints(&constraints),
            0.08,
        );
    }

    #[test]
    fn test_proposal_budget_exhausted() {
        let config = SamplerConfig {
            method: Method::Forward,
            num_chains: 1,
            num_draws: 8,
            ..Default::default()
        };
        let result = generate_capped(&Constraints::pr_box(), 1000, 8, &config);
        match result {
            Err(Error::AcceptanceStalled {
                accepted,
                target,
                proposed,
            }) => {
                assert_eq!(target, 1000);
                assert_eq!(proposed, 8);
                assert!(accepted <= 8);
            }
            other => panic!("expected AcceptanceStalled, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_constraints_rejected() {
        let mut constraints = Constraints::pr_box();
        constraints.tables[0][0] = ContextTable([[0.0; 2]; 2]);
        let result = generate(&constraints, 10, &SamplerConfig::default());
        assert!(matches!(result, Err(Error::InvalidConstraints { .. })));
    }
}

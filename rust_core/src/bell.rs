//! CHSH-type inequality tests on a 2x2x2x2 joint table.
//!
//! Outcome 0 is mapped to +1 and outcome 1 to -1. For signalling tables the
//! classical CHSH bound of 2 is relaxed to `2 (1 + δ)`, where `δ` is half the
//! total variation of each party's marginals across the other party's
//! settings (the Dzhafarov–Kujala criterion for contextuality).

use crate::table::JointTable;
use serde::Serialize;

pub const CLASSICAL_BOUND: f64 = 2.0;
pub const TSIRELSON_BOUND: f64 = 2.0 * std::f64::consts::SQRT_2;
pub const ALGEBRAIC_BOUND: f64 = 4.0;

/// ⟨A_x⟩ measured in context (x, y).
pub fn alice_marginal(p: &JointTable, x: usize, y: usize) -> f64 {
    2.0 * (p.get(0, 0, x, y) + p.get(0, 1, x, y)) - 1.0
}

/// ⟨B_y⟩ measured in context (x, y).
pub fn bob_marginal(p: &JointTable, x: usize, y: usize) -> f64 {
    2.0 * (p.get(0, 0, x, y) + p.get(1, 0, x, y)) - 1.0
}

/// ⟨A_x B_y⟩ = P(a = b) - P(a ≠ b).
pub fn correlator(p: &JointTable, x: usize, y: usize) -> f64 {
    (p.get(0, 0, x, y) + p.get(1, 1, x, y)) - (p.get(0, 1, x, y) + p.get(1, 0, x, y))
}

/// Half the summed change in each marginal when only the other party's
/// setting changes. Zero for every no-signalling table.
pub fn signalling_delta(p: &JointTable) -> f64 {
    let alice: f64 = (0..2)
        .map(|x| (alice_marginal(p, x, 0) - alice_marginal(p, x, 1)).abs())
        .sum();
    let bob: f64 = (0..2)
        .map(|y| (bob_marginal(p, 0, y) - bob_marginal(p, 1, y)).abs())
        .sum();
    (alice + bob) / 2.0
}

/// One CHSH expression `Σ s_xy ⟨A_x B_y⟩` with a single negated term.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChshTerm {
    /// Context whose correlator enters with a minus sign.
    pub negated: (usize, usize),
    /// |S|
    pub value: f64,
    /// 2 (1 + δ)
    pub bound: f64,
    pub violated: bool,
}

/// The four CHSH expressions, negating (1,1), (1,0), (0,1), (0,0) in turn.
/// A term is violated when it exceeds its bound by more than `tolerance`.
pub fn chsh_terms(p: &JointTable, delta: f64, tolerance: f64) -> [ChshTerm; 4] {
    let bound = CLASSICAL_BOUND * (1.0 + delta);
    [(1, 1), (1, 0), (0, 1), (0, 0)].map(|negated| {
        let s: f64 = [(0, 0), (0, 1), (1, 0), (1, 1)]
            .iter()
            .map(|&(x, y)| {
                let sign = if (x, y) == negated { -1.0 } else { 1.0 };
                sign * correlator(p, x, y)
            })
            .sum();
        let value = s.abs();
        ChshTerm {
            negated,
            value,
            bound,
            violated: value > bound + tolerance,
        }
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct BellReport {
    /// Total probability per context; each should be 1.
    pub context_sums: [f64; 4],
    pub delta: f64,
    pub no_signalling: bool,
    /// correlators[x][y]
    pub correlators: [[f64; 2]; 2],
    pub chsh: [ChshTerm; 4],
    pub max_chsh: f64,
    /// Some CHSH expression exceeds 2.
    pub violates_classical: bool,
    /// Some CHSH expression exceeds 2√2.
    pub exceeds_tsirelson: bool,
    /// Some CHSH expression exceeds its signalling-corrected bound.
    pub contextual: bool,
}

pub fn evaluate(p: &JointTable, tolerance: f64) -> BellReport {
    let delta = signalling_delta(p);
    let chsh = chsh_terms(p, delta, tolerance);
    let max_chsh = chsh.iter().map(|t| t.value).fold(0.0, f64::max);
    let correlators = [
        [correlator(p, 0, 0), correlator(p, 0, 1)],
        [correlator(p, 1, 0), correlator(p, 1, 1)],
    ];

    BellReport {
        context_sums: p.context_sums(),
        delta,
        no_signalling: delta <= tolerance,
        correlators,
        chsh,
        max_chsh,
        violates_classical: max_chsh > CLASSICAL_BOUND + tolerance,
        exceeds_tsirelson: max_chsh > TSIRELSON_BOUND + tolerance,
        contextual: chsh.iter().any(|t| t.violated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Constraints, ContextTable};

    fn uniform_table() -> JointTable {
        JointTable([0.25; 16])
    }

    #[test]
    fn test_pr_box_reaches_algebraic_maximum() {
        let p = JointTable::from_constraints(&Constraints::pr_box());
        let report = evaluate(&p, 1e-9);

        assert!(report.no_signalling);
        assert_eq!(report.correlators, [[1.0, 1.0], [1.0, -1.0]]);
        assert!((report.chsh[0].value - ALGEBRAIC_BOUND).abs() < 1e-12);
        assert!(report.chsh[0].violated);
        assert!(report.violates_classical && report.exceeds_tsirelson && report.contextual);
        assert_eq!(report.context_sums, [1.0; 4]);
    }

    #[test]
    fn test_uniform_noise_is_classical() {
        let report = evaluate(&uniform_table(), 1e-9);
        assert_eq!(report.delta, 0.0);
        assert_eq!(report.max_chsh, 0.0);
        assert!(!report.violates_classical && !report.contextual);
    }

    #[test]
    fn test_tsirelson_box() {
        // Quantum-optimal correlations: E = ±1/√2.
        let e = std::f64::consts::FRAC_1_SQRT_2;
        let same = (1.0 + e) / 4.0;
        let diff = (1.0 - e) / 4.0;
        let corr = ContextTable([[same, diff], [diff, same]]);
        let anti = ContextTable([[diff, same], [same, diff]]);
        let p = JointTable::from_constraints(&Constraints {
            tables: [[corr, corr], [corr, anti]],
        });
        let report = evaluate(&p, 1e-9);
        assert!((report.max_chsh - TSIRELSON_BOUND).abs() < 1e-12);
        assert!(report.violates_classical);
        assert!(!report.exceeds_tsirelson);
    }

    #[test]
    fn test_signalling_relaxes_bound() {
        // Alice's outcome is fixed to 0 when y = 0 and to 1 when y = 1, and
        // Bob copies it: ⟨A_x⟩ flips with Bob's setting.
        let zero = ContextTable([[1.0, 0.0], [0.0, 0.0]]);
        let one = ContextTable([[0.0, 0.0], [0.0, 1.0]]);
        let p = JointTable::from_constraints(&Constraints {
            tables: [[zero, one], [zero, one]],
        });
        // Alice: |1 - (-1)| twice; Bob: |1 - 1| + |-1 - (-1)|.
        assert!((signalling_delta(&p) - 2.0).abs() < 1e-12);
        let report = evaluate(&p, 1e-9);
        assert!(!report.no_signalling);
        assert!(report.chsh.iter().all(|t| (t.bound - 6.0).abs() < 1e-12));
        assert!(!report.contextual);
    }

    #[test]
    fn test_violation_flags_share_tolerance() {
        // Correlators of 0.51, 0.51, 0.51, -0.51 give |S| = 2.04 just past 2.
        let e = 0.51;
        let same = (1.0 + e) / 4.0;
        let diff = (1.0 - e) / 4.0;
        let corr = ContextTable([[same, diff], [diff, same]]);
        let anti = ContextTable([[diff, same], [same, diff]]);
        let p = JointTable::from_constraints(&Constraints {
            tables: [[corr, corr], [corr, anti]],
        });

        let loose = evaluate(&p, 0.05);
        assert!((loose.chsh[0].value - 2.04).abs() < 1e-12);
        assert!(loose.chsh.iter().all(|t| !t.violated));
        assert!(!loose.contextual);

        let strict = evaluate(&p, 1e-9);
        assert!(strict.chsh[0].violated);
        assert!(strict.contextual);
        assert_eq!(
            strict.contextual,
            strict.chsh.iter().any(|t| t.violated)
        );
    }
}

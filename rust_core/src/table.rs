use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

const SUM_TOLERANCE: f64 = 1e-9;

/// P(a, b | x, y) for one measurement context, indexed `[a][b]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextTable(pub [[f64; 2]; 2]);

impl ContextTable {
    pub fn get(&self, a: usize, b: usize) -> f64 {
        self.0[a][b]
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().flatten().sum()
    }

    /// Entries must lie in [0, 1] and sum to 1. `x` and `y` label the
    /// context in the error.
    pub fn validate(&self, x: usize, y: usize) -> Result<()> {
        let invalid = |reason: String| Error::InvalidConstraints { x, y, reason };
        if let Some(p) = self.0.iter().flatten().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(invalid(format!("entry {p} outside [0, 1]")));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(invalid(format!("entries sum to {sum}, expected 1")));
        }
        Ok(())
    }

    /// Perfectly correlated outcomes, each with probability 1/2.
    pub fn correlated() -> Self {
        Self([[0.5, 0.0], [0.0, 0.5]])
    }

    /// Perfectly anti-correlated outcomes, each with probability 1/2.
    pub fn anticorrelated() -> Self {
        Self([[0.0, 0.5], [0.5, 0.0]])
    }
}

/// One context table per setting pair, indexed `[x][y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    pub tables: [[ContextTable; 2]; 2],
}

impl Constraints {
    /// The Popescu–Rohrlich box: correlated in every context but (1, 1).
    pub fn pr_box() -> Self {
        Self {
            tables: [
                [ContextTable::correlated(), ContextTable::correlated()],
                [ContextTable::correlated(), ContextTable::anticorrelated()],
            ],
        }
    }

    pub fn table(&self, x: usize, y: usize) -> &ContextTable {
        &self.tables[x][y]
    }

    /// Acceptance threshold for outcome (a, b) under settings (x, y).
    pub fn threshold(&self, a: usize, b: usize, x: usize, y: usize) -> f64 {
        self.tables[x][y].get(a, b)
    }

    pub fn validate(&self) -> Result<()> {
        for (x, row) in self.tables.iter().enumerate() {
            for (y, table) in row.iter().enumerate() {
                table.validate(x, y)?;
            }
        }
        Ok(())
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Self::pr_box()
    }
}

/// Joint probabilities p(a, b | x, y) for the 2x2x2x2 scenario.
///
/// Entries are grouped by context (x, y) = (0,0), (0,1), (1,0), (1,1) and,
/// within a context, ordered (a, b) = (0,0), (0,1), (1,0), (1,1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointTable(pub [f64; 16]);

impl JointTable {
    pub fn index(a: usize, b: usize, x: usize, y: usize) -> usize {
        4 * (2 * x + y) + 2 * a + b
    }

    pub fn get(&self, a: usize, b: usize, x: usize, y: usize) -> f64 {
        self.0[Self::index(a, b, x, y)]
    }

    pub fn set(&mut self, a: usize, b: usize, x: usize, y: usize, value: f64) {
        self.0[Self::index(a, b, x, y)] = value;
    }

    /// The four entries of context (x, y).
    pub fn context(&self, x: usize, y: usize) -> [f64; 4] {
        let start = 4 * (2 * x + y);
        let mut out = [0.0; 4];
        out.copy_from_slice(&self.0[start..start + 4]);
        out
    }

    /// Total probability in each context, in context order.
    pub fn context_sums(&self) -> [f64; 4] {
        let mut sums = [0.0; 4];
        for (i, chunk) in self.0.chunks(4).enumerate() {
            sums[i] = chunk.iter().sum();
        }
        sums
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// The exact table described by a set of constraints.
    pub fn from_constraints(constraints: &Constraints) -> Self {
        let mut table = Self([0.0; 16]);
        for x in 0..2 {
            for y in 0..2 {
                for a in 0..2 {
                    for b in 0..2 {
                        table.set(a, b, x, y, constraints.threshold(a, b, x, y));
                    }
                }
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pr_box_is_valid() {
        assert!(Constraints::pr_box().validate().is_ok());
    }

    #[test]
    fn test_validate_reports_context() {
        let mut c = Constraints::pr_box();
        c.tables[1][0] = ContextTable([[0.5, 0.5], [0.5, 0.0]]);
        match c.validate() {
            Err(Error::InvalidConstraints { x, y, .. }) => assert_eq!((x, y), (1, 0)),
            other => panic!("unexpected {:?}", other),
        }

        c.tables[1][0] = ContextTable([[1.5, -0.5], [0.0, 0.0]]);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_single_table_validation() {
        assert!(ContextTable::correlated().validate(0, 0).is_ok());
        assert!(ContextTable([[0.5, 0.5], [0.0, 0.1]]).validate(1, 1).is_err());
        assert!(ContextTable([[f64::NAN, 1.0], [0.0, 0.0]]).validate(0, 1).is_err());
    }

    #[test]
    fn test_joint_layout() {
        let t = JointTable::from_constraints(&Constraints::pr_box());
        assert_eq!(t.context(0, 0), [0.5, 0.0, 0.0, 0.5]);
        assert_eq!(t.context(1, 1), [0.0, 0.5, 0.5, 0.0]);
        assert_eq!(JointTable::index(1, 0, 0, 1), 6);
        assert_eq!(t.context_sums(), [1.0; 4]);
    }
}

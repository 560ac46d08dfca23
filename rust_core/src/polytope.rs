//! Membership in the correlation polytope of three events.
//!
//! A vector `(p1, p2, p3, p12, p13, p23)` of single and pairwise joint
//! probabilities is classical (reproducible by a joint distribution of
//! three binary variables) iff it satisfies the 16 facet inequalities below.

use serde::Serialize;

/// Single and pairwise probabilities of three events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThreeEventCorrelations {
    pub p1: f64,
    pub p2: f64,
    pub p3: f64,
    pub p12: f64,
    pub p13: f64,
    pub p23: f64,
}

/// A facet inequality `value >= 0` together with its evaluated left side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constraint {
    pub name: String,
    pub value: f64,
}

pub type Violation = Constraint;

impl ThreeEventCorrelations {
    fn single(&self, i: usize) -> f64 {
        [self.p1, self.p2, self.p3][i]
    }

    fn pair(&self, i: usize, j: usize) -> f64 {
        match (i.min(j), i.max(j)) {
            (0, 1) => self.p12,
            (0, 2) => self.p13,
            _ => self.p23,
        }
    }

    /// Evaluate every facet inequality; each is satisfied when `value >= 0`.
    pub fn constraints(&self) -> Vec<Constraint> {
        let mut out = Vec::with_capacity(16);
        let pairs = [(0, 1), (0, 2), (1, 2)];
        let label = |i: usize| i + 1;

        for &(i, j) in &pairs {
            out.push(Constraint {
                name: format!("p{}{} >= 0", label(i), label(j)),
                value: self.pair(i, j),
            });
        }
        for &(i, j) in &pairs {
            for (a, b) in [(i, j), (j, i)] {
                out.push(Constraint {
                    name: format!("p{} >= p{}{}", label(a), label(i), label(j)),
                    value: self.single(a) - self.pair(a, b),
                });
            }
        }
        for &(i, j) in &pairs {
            out.push(Constraint {
                name: format!("p{} + p{} - p{}{} <= 1", label(i), label(j), label(i), label(j)),
                value: 1.0 - self.single(i) - self.single(j) + self.pair(i, j),
            });
        }
        for i in 0..3 {
            let (j, k) = match i {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            out.push(Constraint {
                name: format!(
                    "p{} - p{}{} - p{}{} + p{}{} >= 0",
                    label(i),
                    label(i.min(j)),
                    label(i.max(j)),
                    label(i.min(k)),
                    label(i.max(k)),
                    label(j),
                    label(k)
                ),
                value: self.single(i) - self.pair(i, j) - self.pair(i, k) + self.pair(j, k),
            });
        }
        out.push(Constraint {
            name: "p1 + p2 + p3 - p12 - p13 - p23 <= 1".to_string(),
            value: 1.0 - self.p1 - self.p2 - self.p3 + self.p12 + self.p13 + self.p23,
        });
        out
    }

    /// Inequalities violated by more than `tolerance`.
    pub fn check(&self, tolerance: f64) -> Vec<Violation> {
        self.constraints()
            .into_iter()
            .filter(|c| c.value < -tolerance)
            .collect()
    }

    pub fn is_classical(&self, tolerance: f64) -> bool {
        self.check(tolerance).is_empty()
    }

    /// Empirical frequencies from joint draws of the three events.
    pub fn from_draws(draws: &[[bool; 3]]) -> Self {
        let n = draws.len().max(1) as f64;
        let freq = |f: &dyn Fn(&[bool; 3]) -> bool| draws.iter().filter(|&d| f(d)).count() as f64 / n;
        Self {
            p1: freq(&|d| d[0]),
            p2: freq(&|d| d[1]),
            p3: freq(&|d| d[2]),
            p12: freq(&|d| d[0] && d[1]),
            p13: freq(&|d| d[0] && d[2]),
            p23: freq(&|d| d[1] && d[2]),
        }
    }

    /// The eight deterministic assignments, the vertices of the polytope.
    pub fn vertices() -> Vec<Self> {
        (0..8u8)
            .map(|bits| {
                let e = [bits & 1 != 0, bits & 2 != 0, bits & 4 != 0];
                Self::from_draws(&[e])
            })
            .collect()
    }
}

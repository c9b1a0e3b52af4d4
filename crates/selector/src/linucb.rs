use serde::{Deserialize, Serialize};

use common::{ArmSpec, ContextVector};

/// Feature dimension: the context features plus a bias term.
pub const DIM: usize = ContextVector::LEN + 1;

type Matrix = [[f64; DIM]; DIM];
type Vector = [f64; DIM];

/// Context features with a trailing constant 1.0 so each arm can learn a
/// context-free baseline.
pub fn features(ctx: &ContextVector) -> Vector {
    let mut x = [1.0; DIM];
    for (slot, value) in x.iter_mut().zip(ctx.as_array()) {
        *slot = if value.is_finite() { value } else { 0.0 };
    }
    x
}

fn mat_vec(m: &Matrix, v: &Vector) -> Vector {
    let mut out = [0.0; DIM];
    for (row, o) in m.iter().zip(out.iter_mut()) {
        *o = dot(row, v);
    }
    out
}

fn dot(a: &Vector, b: &Vector) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Inverse of a symmetric positive definite matrix by Gauss–Jordan
/// elimination with partial pivoting. `None` if a pivot vanishes.
fn invert(m: &Matrix) -> Option<Matrix> {
    let mut a = *m;
    let mut inv = [[0.0; DIM]; DIM];
    for (i, row) in inv.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    for col in 0..DIM {
        let pivot = (col..DIM).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);
        let p = a[col][col];
        for k in 0..DIM {
            a[col][k] /= p;
            inv[col][k] /= p;
        }
        for row in 0..DIM {
            if row == col {
                continue;
            }
            let f = a[row][col];
            if f == 0.0 {
                continue;
            }
            for k in 0..DIM {
                a[row][k] -= f * a[col][k];
                inv[row][k] -= f * inv[col][k];
            }
        }
    }
    Some(inv)
}

/// Posterior of one arm: the design matrix `A`, its inverse, and the reward
/// vector `b`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmState {
    pub spec: ArmSpec,
    ridge: f64,
    a: Matrix,
    a_inv: Matrix,
    b: Vector,
    /// Times this arm was chosen.
    pub pulls: u64,
    /// Rewards applied to this arm.
    pub updates: u64,
    pub reward_sum: f64,
}

impl ArmState {
    /// Fresh arm with prior `A = ridge·I`, `b = 0`.
    pub fn new(spec: ArmSpec, ridge: f64) -> Self {
        let ridge = if ridge > 0.0 { ridge } else { 1.0 };
        let mut a = [[0.0; DIM]; DIM];
        let mut a_inv = [[0.0; DIM]; DIM];
        for i in 0..DIM {
            a[i][i] = ridge;
            a_inv[i][i] = 1.0 / ridge;
        }
        Self {
            spec,
            ridge,
            a,
            a_inv,
            b: [0.0; DIM],
            pulls: 0,
            updates: 0,
            reward_sum: 0.0,
        }
    }

    /// θ = A⁻¹b.
    pub fn theta(&self) -> Vector {
        mat_vec(&self.a_inv, &self.b)
    }

    /// Upper confidence bound θᵀx + α·√(xᵀA⁻¹x).
    pub fn score(&self, x: &Vector, alpha: f64) -> f64 {
        let exploit = dot(&self.theta(), x);
        let width = dot(x, &mat_vec(&self.a_inv, x)).max(0.0).sqrt();
        exploit + alpha * width
    }

    /// Apply one reward.
    ///
    /// Old evidence is discounted toward the prior so the arm can follow a
    /// drifting market: `A ← γA + (1-γ)·ridge·I + xxᵀ`, `b ← γb + r·x`.
    /// `A` never drops below `ridge·I`, which keeps its inverse bounded by
    /// `1/ridge` however many updates arrive.
    pub fn update(&mut self, x: &Vector, reward: f64, decay: f64) {
        let gamma = if decay > 0.0 && decay <= 1.0 { decay } else { 1.0 };
        let prior = (1.0 - gamma) * self.ridge;
        for i in 0..DIM {
            for j in 0..DIM {
                self.a[i][j] = gamma * self.a[i][j] + x[i] * x[j];
            }
            self.a[i][i] += prior;
        }
        for (bi, xi) in self.b.iter_mut().zip(x) {
            *bi = gamma * *bi + reward * xi;
        }
        // A ≥ ridge·I is always invertible; keep the last inverse otherwise.
        if let Some(a_inv) = invert(&self.a) {
            self.a_inv = a_inv;
        }

        self.updates += 1;
        self.reward_sum += reward;
    }

    pub fn snapshot(&self) -> ArmSnapshot {
        ArmSnapshot {
            arm_id: self.spec.id.clone(),
            pulls: self.pulls,
            updates: self.updates,
            reward_sum: self.reward_sum,
            mean_reward: if self.updates > 0 {
                self.reward_sum / self.updates as f64
            } else {
                0.0
            },
            theta: self.theta().to_vec(),
        }
    }
}

/// Serializable view of an arm for logs and the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSnapshot {
    pub arm_id: String,
    pub pulls: u64,
    pub updates: u64,
    pub reward_sum: f64,
    pub mean_reward: f64,
    pub theta: Vec<f64>,
}

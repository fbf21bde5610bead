//! Contracts between the controllers and the numerical solvers.

use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField, convert};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ocp::Ocp;

/// Termination reason reported by a solve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SolverStatus {
    Solved,
    MaxIterations,
    /// The line search could not make progress.
    MinStep,
    /// A linear system could not be factorized.
    Failed,
}

impl SolverStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SolverStatus::Solved)
    }
}

/// Output of one solve call.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverResult<F>
where
    F: Scalar,
{
    /// Primal solution.
    pub x: DVector<F>,
    /// Objective value at `x`.
    pub f: F,
    /// Constraint multipliers.
    pub lam_g: DVector<F>,
    /// Variable-bound multipliers.
    pub lam_x: DVector<F>,
    pub status: SolverStatus,
    pub iterations: usize,
}

/// Dense QP `min 1/2 x^T h x + q^T x + offset` subject to
/// `lba <= a x <= uba` and `lbx <= x <= ubx`.
#[derive(Debug, Clone, PartialEq)]
pub struct QpProblem<F>
where
    F: Scalar,
{
    pub h: DMatrix<F>,
    pub q: DVector<F>,
    pub offset: F,
    pub a: DMatrix<F>,
    pub lba: DVector<F>,
    pub uba: DVector<F>,
    pub lbx: DVector<F>,
    pub ubx: DVector<F>,
}

impl<F> QpProblem<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub fn num_variables(&self) -> usize {
        self.q.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.a.nrows()
    }

    pub fn objective(&self, x: &DVector<F>) -> F {
        let half: F = convert(0.5);
        half * x.dot(&(&self.h * x)) + self.q.dot(x) + self.offset
    }
}

/// Solves a parametric NLP to convergence.
pub trait NlpSolver<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    /// Solves `ocp` for parameter values `p` starting from `x0`. Bounds are
    /// carried by the problem.
    fn solve(&mut self, ocp: &Ocp<F>, x0: &DVector<F>, p: &DVector<F>) -> SolverResult<F>;
}

/// Solves a dense QP with primal and dual warm starts.
pub trait QpSolver<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn solve(
        &mut self,
        qp: &QpProblem<F>,
        x0: &DVector<F>,
        lam_x0: &DVector<F>,
        lam_g0: &DVector<F>,
    ) -> SolverResult<F>;
}

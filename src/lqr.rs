//! Infinite-horizon discrete-time LQR.
//!
//! The gain is computed once, offline, by iterating the discrete algebraic
//! Riccati equation; every control step afterwards is a single matrix-vector
//! product.

use std::time::{Duration, Instant};

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField, convert};
use thiserror::Error;

use crate::error::OcpError;
use crate::layout::check_len;

const RICCATI_DEFAULT_EPS: f64 = 1e-6;
const RICCATI_DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiccatiError {
    #[error("Riccati iterate contains NaN after {iterations} iterations")]
    Diverged { iterations: usize },

    #[error("Riccati iteration did not converge within {elapsed:?} ({iterations} iterations)")]
    Timeout {
        iterations: usize,
        elapsed: Duration,
    },

    #[error("R + B^T P B is singular")]
    Singular,
}

/// Stop rule of [`solve_riccati`].
#[derive(Debug, Clone)]
pub struct RiccatiSettings<F> {
    /// Converged once every entry of `P` changes by less than this.
    pub eps: F,
    /// Wall-clock budget.
    pub timeout: Duration,
}

impl<F> Default for RiccatiSettings<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn default() -> Self {
        Self {
            eps: convert(RICCATI_DEFAULT_EPS),
            timeout: RICCATI_DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiccatiSolution<F>
where
    F: Scalar,
{
    /// Feedback gain, `nu x nx`.
    pub k: DMatrix<F>,
    /// Cost-to-go, `nx x nx`.
    pub p: DMatrix<F>,
    pub iterations: usize,
}

/// Iterates `P <- A^T P A - A^T P B (R + B^T P B)^-1 B^T P A + Q` from
/// `P = Q` and returns the gain `K = (R + B^T P B)^-1 B^T P A`.
pub fn solve_riccati<F>(
    a: &DMatrix<F>,
    b: &DMatrix<F>,
    q: &DMatrix<F>,
    r: &DMatrix<F>,
    settings: &RiccatiSettings<F>,
) -> Result<RiccatiSolution<F>, RiccatiError>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    let at = a.transpose();
    let bt = b.transpose();

    let start = Instant::now();
    let mut p = q.clone();
    let mut iterations = 0;
    loop {
        let quu_inv = (r + &bt * &p * b)
            .try_inverse()
            .ok_or(RiccatiError::Singular)?;
        let p_next = &at * &p * a - &at * &p * b * quu_inv * &bt * &p * a + q;
        iterations += 1;

        if p_next.iter().any(|v| v.partial_cmp(v).is_none()) {
            return Err(RiccatiError::Diverged { iterations });
        }
        if (&p_next - &p).abs().max() < settings.eps {
            debug!("Riccati threshold reached after {} iterations", iterations);
            break;
        }
        let elapsed = start.elapsed();
        if elapsed >= settings.timeout {
            warn!("Riccati timeout ({:?}) after {} iterations", elapsed, iterations);
            return Err(RiccatiError::Timeout {
                iterations,
                elapsed,
            });
        }
        p = p_next;
    }

    let quu_inv = (r + &bt * &p * b)
        .try_inverse()
        .ok_or(RiccatiError::Singular)?;
    let k = quu_inv * &bt * &p * a;
    Ok(RiccatiSolution { k, p, iterations })
}

/// Extra output of an LQR step. No optimization problem is solved online,
/// so there is no objective value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LqrStepInfo<F> {
    pub objective: Option<F>,
}

/// LQR controller with a precomputed gain.
#[derive(Debug, Clone)]
pub struct Lqr<F> {
    k: DMatrix<F>,
}

impl<F> Lqr<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub fn new(
        a: &DMatrix<F>,
        b: &DMatrix<F>,
        q: &DMatrix<F>,
        r: &DMatrix<F>,
        settings: &RiccatiSettings<F>,
    ) -> Result<Self, OcpError> {
        let nx = a.nrows();
        let nu = b.ncols();
        check_len("A columns", nx, a.ncols())?;
        check_len("B rows", nx, b.nrows())?;
        check_len("Q rows", nx, q.nrows())?;
        check_len("Q columns", nx, q.ncols())?;
        check_len("R rows", nu, r.nrows())?;
        check_len("R columns", nu, r.ncols())?;

        let solution = solve_riccati(a, b, q, r, settings)?;
        Ok(Self { k: solution.k })
    }

    pub fn gain(&self) -> &DMatrix<F> {
        &self.k
    }

    /// `u = -K (x - x_ref[:, 0]) + u_ref[:, 0]`. Only the first reference
    /// column of each trajectory is used; both need at least one.
    pub fn step(
        &self,
        x: &DVector<F>,
        x_ref: &DMatrix<F>,
        u_ref: &DMatrix<F>,
    ) -> Result<(DVector<F>, LqrStepInfo<F>), OcpError> {
        let (nu, nx) = self.k.shape();
        check_len("LQR state", nx, x.len())?;
        check_len("LQR state reference rows", nx, x_ref.nrows())?;
        check_len("LQR control reference rows", nu, u_ref.nrows())?;
        if x_ref.ncols() == 0 || u_ref.ncols() == 0 {
            return Err(OcpError::Dimension {
                what: "LQR reference columns",
                expected: 1,
                got: 0,
            });
        }

        let u = -(&self.k * (x - x_ref.column(0))) + u_ref.column(0);
        Ok((u, LqrStepInfo { objective: None }))
    }
}

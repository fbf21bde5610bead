//! Differentiable expressions over the flat decision and parameter vectors.
//!
//! Every constraint and cost term reads a small, fixed subset of the decision
//! vector `w` and the parameter vector `p`, declared by its [`Support`]. The
//! engine gathers those entries into local vectors, evaluates the expression
//! on them and scatters local derivatives back into the global layout.
//!
//! Derivatives default to central finite differences; expressions with a
//! closed form override [`Expression::jacobian`] and [`Expression::hessian`].

use std::fmt;

use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField, convert};

/// Flat indices an expression reads from `w` and `p`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Support {
    pub w: Vec<usize>,
    pub p: Vec<usize>,
}

impl Support {
    pub fn new(w: Vec<usize>, p: Vec<usize>) -> Self {
        Self { w, p }
    }

    /// Support on decision variables only.
    pub fn decision(w: Vec<usize>) -> Self {
        Self { w, p: Vec::new() }
    }
}

/// A vector-valued function `g(z, q)` of gathered decision entries `z` and
/// parameter entries `q`.
pub trait Expression<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    /// Number of output components.
    fn dim(&self) -> usize;

    fn support(&self) -> &Support;

    fn eval(&self, z: &DVector<F>, q: &DVector<F>) -> DVector<F>;

    /// `dim() x support().w.len()` Jacobian with respect to `z`.
    fn jacobian(&self, z: &DVector<F>, q: &DVector<F>) -> DMatrix<F> {
        jacobian(|z| self.eval(z, q), z)
    }

    /// Hessian of `lambda^T g(z, q)` with respect to `z`.
    fn hessian(&self, z: &DVector<F>, q: &DVector<F>, lambda: &DVector<F>) -> DMatrix<F> {
        hessian(|z| lambda.dot(&self.eval(z, q)), z)
    }
}

impl<F> fmt::Debug for dyn Expression<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("dim", &self.dim())
            .field("support", self.support())
            .finish()
    }
}

/// Collects `v[i]` for every `i` in `indices`.
pub fn gather<F>(v: &DVector<F>, indices: &[usize]) -> DVector<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    DVector::from_iterator(indices.len(), indices.iter().map(|&i| v[i]))
}

/// Central finite-difference Jacobian of `f` at `z`.
pub fn jacobian<F, G>(f: G, z: &DVector<F>) -> DMatrix<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
    G: Fn(&DVector<F>) -> DVector<F>,
{
    let n = z.len();
    let rows = f(z).len();
    let base = F::default_epsilon().cbrt();
    let two: F = convert(2.0);

    let mut jac = DMatrix::zeros(rows, n);
    let mut zp = z.clone();
    for j in 0..n {
        let h = base * z[j].abs().max(F::one());
        zp[j] = z[j] + h;
        let fp = f(&zp);
        zp[j] = z[j] - h;
        let fm = f(&zp);
        zp[j] = z[j];
        jac.set_column(j, &((fp - fm) / (two * h)));
    }
    jac
}

/// Central finite-difference Hessian of the scalar function `f` at `z`.
///
/// The result is symmetric by construction.
pub fn hessian<F, G>(f: G, z: &DVector<F>) -> DMatrix<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
    G: Fn(&DVector<F>) -> F,
{
    let n = z.len();
    let base = F::default_epsilon().sqrt().sqrt();
    let two: F = convert(2.0);
    let four: F = convert(4.0);
    let steps: Vec<F> = z.iter().map(|zi| base * zi.abs().max(F::one())).collect();

    let f0 = f(z);
    let mut hess = DMatrix::zeros(n, n);
    let mut zp = z.clone();
    for i in 0..n {
        let hi = steps[i];

        zp[i] = z[i] + hi;
        let fp = f(&zp);
        zp[i] = z[i] - hi;
        let fm = f(&zp);
        zp[i] = z[i];
        hess[(i, i)] = (fp - two * f0 + fm) / (hi * hi);

        for j in 0..i {
            let hj = steps[j];
            let mut corner = |si: F, sj: F| {
                zp[i] = z[i] + si * hi;
                zp[j] = z[j] + sj * hj;
                let v = f(&zp);
                zp[i] = z[i];
                zp[j] = z[j];
                v
            };
            let one = F::one();
            let value = (corner(one, one) - corner(one, -one) - corner(-one, one)
                + corner(-one, -one))
                / (four * hi * hj);
            hess[(i, j)] = value;
            hess[(j, i)] = value;
        }
    }
    hess
}

//! Quadratic tracking costs and their sum.

use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField};

use crate::constraints::{local, scatter_square, validate_support};
use crate::engine::{self, Expression, Support};
use crate::error::OcpError;
use crate::layout::check_len;

type ErrorFn<F> = Box<dyn Fn(&DVector<F>, &DVector<F>) -> DVector<F>>;

/// `e^T W e` with `e = error(w[signal], p[reference])`, subtraction by
/// default.
pub struct TrackingCost<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    weight: DMatrix<F>,
    support: Support,
    error_fn: Option<ErrorFn<F>>,
}

impl<F> TrackingCost<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    /// Replaces `signal - reference` with a custom error function. Its
    /// output must have the weight's dimension.
    pub fn with_error_fn<E>(mut self, error_fn: E) -> Self
    where
        E: Fn(&DVector<F>, &DVector<F>) -> DVector<F> + 'static,
    {
        self.error_fn = Some(Box::new(error_fn));
        self
    }

    fn error(&self, z: &DVector<F>, q: &DVector<F>) -> DVector<F> {
        match &self.error_fn {
            Some(f) => f(z, q),
            None => z - q,
        }
    }

    /// `W + W^T`
    fn symmetric_weight(&self) -> DMatrix<F> {
        &self.weight + self.weight.transpose()
    }
}

impl<F> Expression<F> for TrackingCost<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn dim(&self) -> usize {
        1
    }

    fn support(&self) -> &Support {
        &self.support
    }

    fn eval(&self, z: &DVector<F>, q: &DVector<F>) -> DVector<F> {
        let e = self.error(z, q);
        DVector::from_element(1, e.dot(&(&self.weight * &e)))
    }

    fn jacobian(&self, z: &DVector<F>, q: &DVector<F>) -> DMatrix<F> {
        let e = self.error(z, q);
        let grad_e = self.symmetric_weight() * &e;
        let grad = match &self.error_fn {
            Some(f) => engine::jacobian(|z| f(z, q), z).transpose() * grad_e,
            None => grad_e,
        };
        DMatrix::from_row_slice(1, grad.len(), grad.as_slice())
    }

    fn hessian(&self, z: &DVector<F>, q: &DVector<F>, lambda: &DVector<F>) -> DMatrix<F> {
        match &self.error_fn {
            Some(_) => engine::hessian(|z| lambda[0] * self.eval(z, q)[0], z),
            None => self.symmetric_weight() * lambda[0],
        }
    }
}

/// Tracking cost between `w[signal]` and `p[reference]` weighted by `weight`.
pub fn tracking_cost<F>(
    signal: Vec<usize>,
    reference: Vec<usize>,
    weight: DMatrix<F>,
) -> Result<TrackingCost<F>, OcpError>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    check_len("tracking reference", signal.len(), reference.len())?;
    check_len("tracking weight rows", signal.len(), weight.nrows())?;
    check_len("tracking weight columns", signal.len(), weight.ncols())?;

    Ok(TrackingCost {
        weight,
        support: Support::new(signal, reference),
        error_fn: None,
    })
}

/// Block-diagonal weight repeating `diag(per_component)` for `stages`
/// stages.
pub fn tile_weights<F>(per_component: &DVector<F>, stages: usize) -> DMatrix<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    DMatrix::from_diagonal(&tile(per_component, stages))
}

/// `per_component` repeated `stages` times.
pub fn tile<F>(per_component: &DVector<F>, stages: usize) -> DVector<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    let n = per_component.len();
    DVector::from_fn(n * stages, |i, _| per_component[i % n])
}

/// Scalar sum of cost terms.
#[derive(Debug, Default)]
pub struct Objective<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    terms: Vec<Box<dyn Expression<F>>>,
}

impl<F> Objective<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub fn new(terms: Vec<Box<dyn Expression<F>>>) -> Result<Self, OcpError> {
        for term in &terms {
            check_len("cost term dimension", 1, term.dim())?;
        }
        Ok(Self { terms })
    }

    pub fn terms(&self) -> &[Box<dyn Expression<F>>] {
        &self.terms
    }

    pub(crate) fn validate_support(&self, nw: usize, np: usize) -> Result<(), OcpError> {
        for term in &self.terms {
            validate_support(term.as_ref(), "cost term", nw, np)?;
        }
        Ok(())
    }

    pub fn value(&self, w: &DVector<F>, p: &DVector<F>) -> F {
        self.terms.iter().fold(F::zero(), |acc, term| {
            let (z, q) = local(term.as_ref(), w, p);
            acc + term.eval(&z, &q)[0]
        })
    }

    pub fn gradient(&self, w: &DVector<F>, p: &DVector<F>) -> DVector<F> {
        let mut grad = DVector::zeros(w.len());
        for term in &self.terms {
            let (z, q) = local(term.as_ref(), w, p);
            let local_grad = term.jacobian(&z, &q);
            for (j, &i) in term.support().w.iter().enumerate() {
                grad[i] += local_grad[(0, j)];
            }
        }
        grad
    }

    pub fn hessian(&self, w: &DVector<F>, p: &DVector<F>) -> DMatrix<F> {
        let one = DVector::from_element(1, F::one());
        let mut hess = DMatrix::zeros(w.len(), w.len());
        for term in &self.terms {
            let (z, q) = local(term.as_ref(), w, p);
            scatter_square(&mut hess, &term.support().w, &term.hessian(&z, &q, &one));
        }
        hess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    #[test]
    fn tracking_cost_value_and_derivatives() {
        let cost = tracking_cost(vec![0, 2], vec![1, 0], dmatrix![2.0, 0.0; 0.0, 3.0]).unwrap();
        let objective = Objective::new(vec![Box::new(cost) as Box<dyn Expression<f64>>]).unwrap();

        let w = dvector![1.0, 7.0, -2.0];
        let p = dvector![0.5, 0.25];
        // e = [1 - 0.25, -2 - 0.5]
        assert_relative_eq!(objective.value(&w, &p), 2.0 * 0.75 * 0.75 + 3.0 * 2.5 * 2.5);
        assert_relative_eq!(
            objective.gradient(&w, &p),
            dvector![4.0 * 0.75, 0.0, 6.0 * -2.5]
        );
        assert_relative_eq!(
            objective.hessian(&w, &p),
            dmatrix![4.0, 0.0, 0.0; 0.0, 0.0, 0.0; 0.0, 0.0, 6.0]
        );
    }

    #[test]
    fn custom_error_function_uses_chain_rule() {
        // e = 2 (s - r)
        let cost = tracking_cost(vec![0], vec![0], dmatrix![1.0])
            .unwrap()
            .with_error_fn(|s, r| (s - r) * 2.0);
        let z = dvector![3.0];
        let q = dvector![1.0];
        assert_relative_eq!(cost.eval(&z, &q)[0], 16.0);
        assert_relative_eq!(cost.jacobian(&z, &q)[(0, 0)], 16.0, epsilon = 1e-6);
        assert_relative_eq!(
            cost.hessian(&z, &q, &dvector![1.0])[(0, 0)],
            8.0,
            epsilon = 1e-4
        );
    }

    #[test]
    fn weights_tile_block_diagonally() {
        let w = tile_weights(&dvector![1.0, 2.0], 3);
        assert_eq!(w.shape(), (6, 6));
        assert_eq!(w.diagonal(), dvector![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert_eq!(w[(0, 1)], 0.0);
    }

    #[test]
    fn mismatched_weight_is_rejected() {
        assert!(tracking_cost(vec![0, 1], vec![0, 1], DMatrix::<f64>::identity(3, 3)).is_err());
        assert!(tracking_cost(vec![0, 1], vec![0], DMatrix::<f64>::identity(2, 2)).is_err());
    }
}

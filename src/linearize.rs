//! First-order Taylor expansions.

use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField};

use crate::constraints::ConstraintSet;
use crate::engine;

/// `f(x) ~ value + jacobian * (x - point)`
#[derive(Debug, Clone, PartialEq)]
pub struct Linearization<F>
where
    F: Scalar,
{
    pub value: DVector<F>,
    pub jacobian: DMatrix<F>,
    pub point: DVector<F>,
}

impl<F> Linearization<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub fn eval(&self, x: &DVector<F>) -> DVector<F> {
        &self.value + &self.jacobian * (x - &self.point)
    }

    /// `jacobian * point - value`, the constant that moves the expansion to
    /// the form `jacobian * x - offset`.
    pub fn offset(&self) -> DVector<F> {
        &self.jacobian * &self.point - &self.value
    }
}

/// Linearizes the whole constraint set around `point`.
pub fn linearize<F>(
    constraints: &ConstraintSet<F>,
    point: &DVector<F>,
    p: &DVector<F>,
) -> Linearization<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    Linearization {
        value: constraints.eval(point, p),
        jacobian: constraints.jacobian(point, p),
        point: point.clone(),
    }
}

/// Linearizes an arbitrary vector function around `point`.
pub fn linearize_fn<F, G>(f: G, point: &DVector<F>) -> Linearization<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
    G: Fn(&DVector<F>) -> DVector<F>,
{
    Linearization {
        value: f(point),
        jacobian: engine::jacobian(&f, point),
        point: point.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    fn cubic(x: &DVector<f64>) -> DVector<f64> {
        dvector![x[0].powi(3) / 2.0 - x[0] * x[0] - 1.0]
    }

    #[test]
    fn tangent_of_cubic() {
        for x0 in [-2.0, -0.4, 0.0, 1.2] {
            let lin = linearize_fn(cubic, &dvector![x0]);
            let slope = 1.5 * x0 * x0 - 2.0 * x0;
            assert_relative_eq!(lin.value[0], cubic(&dvector![x0])[0]);
            assert_relative_eq!(lin.jacobian[(0, 0)], slope, epsilon = 1e-8);

            let x = dvector![x0 + 0.5];
            assert_relative_eq!(lin.eval(&x)[0], lin.value[0] + 0.5 * slope, epsilon = 1e-8);
        }
    }

    #[test]
    fn expansion_is_exact_for_affine_maps() {
        let f = |x: &DVector<f64>| dvector![2.0 * x[0] - x[1] + 3.0, x[1]];
        let lin = linearize_fn(f, &dvector![1.0, 1.0]);
        let x = dvector![-4.0, 2.5];
        assert_relative_eq!(lin.eval(&x), f(&x), epsilon = 1e-9);
        assert_relative_eq!(&lin.jacobian * &x - lin.offset(), f(&x), epsilon = 1e-9);
    }
}

//! Adaptive penalty for the ADMM QP solver: residual bookkeeping and the
//! square-root rule that rebalances primal against dual progress.

use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField, convert};

/// Residuals of one ADMM iterate, with the norms used to scale them.
#[derive(Debug, Clone, Copy)]
pub struct Residuals<F> {
    pub pri_res: F,
    pub dual_res: F,
    pub pri_norm: F,
    pub dual_norm: F,
}

impl<F> Residuals<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    /// Primal residual `|C x - z|` and dual residual `|P x + q + C^T y|`,
    /// where `C` stacks the constraint matrix over the identity.
    pub fn compute(
        h: &DMatrix<F>,
        q: &DVector<F>,
        a: &DMatrix<F>,
        x: &DVector<F>,
        z: &DVector<F>,
        y: &DVector<F>,
    ) -> Self {
        let m = a.nrows();
        let n = x.len();

        let ax = a * x;
        let z_g = z.rows(0, m);
        let z_x = z.rows(m, n);
        let pri_res = amax(&(&ax - z_g)).max(amax(&(x - z_x)));
        let pri_norm = amax(&ax).max(amax(x)).max(amax(z));

        let px = h * x;
        let cty = a.transpose() * y.rows(0, m) + y.rows(m, n);
        let dual_res = amax(&(&px + q + &cty));
        let dual_norm = amax(&px).max(amax(&cty)).max(amax(q));

        Self {
            pri_res,
            dual_res,
            pri_norm,
            dual_norm,
        }
    }
}

/// Rebalances the ADMM penalty from the ratio of scaled residuals.
#[derive(Debug, Clone)]
pub struct RhoAdapter<F> {
    pub rho_min: F,
    pub rho_max: F,
    pub clip: bool,
    /// Only accept a new penalty that differs by more than this factor.
    pub tolerance: F,
}

impl<F> RhoAdapter<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    /// Scales `current_rho` by the square root of the normalized primal to
    /// dual residual ratio, clipped to `[rho_min, rho_max]` when enabled.
    pub fn predict_rho(&self, residuals: &Residuals<F>, current_rho: F) -> F {
        let eps: F = convert(1e-10);

        let normalized_pri = residuals.pri_res / (residuals.pri_norm + eps);
        let normalized_dual = residuals.dual_res / (residuals.dual_norm + eps);

        let ratio = normalized_pri / (normalized_dual + eps);

        let mut new_rho = current_rho * ratio.sqrt();

        if self.clip {
            new_rho = new_rho.max(self.rho_min).min(self.rho_max);
        }

        new_rho
    }

    /// The predicted penalty if it moved far enough to be worth a new
    /// factorization.
    pub fn adapt(&self, residuals: &Residuals<F>, current_rho: F) -> Option<F> {
        let new_rho = self.predict_rho(residuals, current_rho);
        if new_rho > current_rho * self.tolerance || new_rho * self.tolerance < current_rho {
            Some(new_rho)
        } else {
            None
        }
    }
}

fn amax<F, S>(v: &nalgebra::Matrix<F, nalgebra::Dyn, nalgebra::U1, S>) -> F
where
    F: Scalar + Copy + SimdRealField + RealField,
    S: nalgebra::Storage<F, nalgebra::Dyn, nalgebra::U1>,
{
    v.iter().fold(F::zero(), |acc, e| acc.max(e.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    fn adapter() -> RhoAdapter<f64> {
        RhoAdapter {
            rho_min: 1e-6,
            rho_max: 1e6,
            clip: true,
            tolerance: 5.0,
        }
    }

    #[test]
    fn balanced_residuals_keep_rho() {
        let r = Residuals {
            pri_res: 1e-3,
            dual_res: 1e-3,
            pri_norm: 1.0,
            dual_norm: 1.0,
        };
        assert_relative_eq!(adapter().predict_rho(&r, 0.1), 0.1, epsilon = 1e-6);
        assert_eq!(adapter().adapt(&r, 0.1), None);
    }

    #[test]
    fn large_primal_residual_raises_rho() {
        let r = Residuals {
            pri_res: 1.0,
            dual_res: 1e-4,
            pri_norm: 1.0,
            dual_norm: 1.0,
        };
        let new_rho = adapter().adapt(&r, 0.1).unwrap();
        assert_relative_eq!(new_rho, 10.0, max_relative = 1e-6);

        let clipped = RhoAdapter {
            rho_max: 1.0,
            ..adapter()
        };
        assert_eq!(clipped.predict_rho(&r, 0.1), 1.0);
    }

    #[test]
    fn unclipped_prediction_ignores_the_limits() {
        let r = Residuals {
            pri_res: 1.0,
            dual_res: 1e-4,
            pri_norm: 1.0,
            dual_norm: 1.0,
        };
        let unclipped = RhoAdapter {
            rho_max: 1.0,
            clip: false,
            ..adapter()
        };
        assert_relative_eq!(unclipped.predict_rho(&r, 0.1), 10.0, max_relative = 1e-6);
    }

    #[test]
    fn residuals_of_the_optimum_vanish() {
        // min 1/2 x^2 - x s.t. 0 <= x <= 10, x* = 1
        let h = dmatrix![1.0];
        let q = dvector![-1.0];
        let a = DMatrix::zeros(0, 1);
        let x = dvector![1.0];
        let z = dvector![1.0];
        let y = dvector![0.0];
        let r = Residuals::compute(&h, &q, &a, &x, &z, &y);
        assert_eq!(r.pri_res, 0.0);
        assert_eq!(r.dual_res, 0.0);
        assert_eq!(r.pri_norm, 1.0);
    }
}

//! Common entry point for a host control loop.

use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField};

use crate::error::OcpError;
use crate::lqr::Lqr;
use crate::nmpc::{NMPC_NAME, Nmpc};
use crate::rti::{RTI_NAME, RtiNmpc};
use crate::solver::{NlpSolver, QpSolver};

/// A feedback law queried once per control period.
pub trait Controller<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn name(&self) -> &'static str;

    /// Control to apply now, given the current state estimate and the
    /// reference trajectories (`nx x (m + 1)` and `nu x m`).
    fn control(
        &mut self,
        x_cur: &DVector<F>,
        x_ref: &DMatrix<F>,
        u_ref: &DMatrix<F>,
    ) -> Result<DVector<F>, OcpError>;
}

impl<F, S> Controller<F> for Nmpc<F, S>
where
    F: Scalar + Copy + SimdRealField + RealField,
    S: NlpSolver<F>,
{
    fn name(&self) -> &'static str {
        NMPC_NAME
    }

    fn control(
        &mut self,
        x_cur: &DVector<F>,
        x_ref: &DMatrix<F>,
        u_ref: &DMatrix<F>,
    ) -> Result<DVector<F>, OcpError> {
        let p = self.ocp().parameters.values(x_cur, x_ref, u_ref)?;
        Ok(self.step(&p)?.column(0).into_owned())
    }
}

impl<F, S> Controller<F> for RtiNmpc<F, S>
where
    F: Scalar + Copy + SimdRealField + RealField,
    S: QpSolver<F>,
{
    fn name(&self) -> &'static str {
        RTI_NAME
    }

    fn control(
        &mut self,
        x_cur: &DVector<F>,
        x_ref: &DMatrix<F>,
        u_ref: &DMatrix<F>,
    ) -> Result<DVector<F>, OcpError> {
        let p = self.ocp().parameters.values(x_cur, x_ref, u_ref)?;
        Ok(self.step(&p)?.column(0).into_owned())
    }
}

impl<F> Controller<F> for Lqr<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn name(&self) -> &'static str {
        "LQR"
    }

    fn control(
        &mut self,
        x_cur: &DVector<F>,
        x_ref: &DMatrix<F>,
        u_ref: &DMatrix<F>,
    ) -> Result<DVector<F>, OcpError> {
        Ok(self.step(x_cur, x_ref, u_ref)?.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lqr::RiccatiSettings;
    use nalgebra::dvector;

    #[test]
    fn lqr_is_usable_through_the_trait() {
        let eye = DMatrix::<f64>::identity(2, 2);
        let mut lqr = Lqr::new(&eye, &eye, &eye, &eye, &RiccatiSettings::default()).unwrap();
        let controller: &mut dyn Controller<f64> = &mut lqr;
        assert_eq!(controller.name(), "LQR");

        let u = controller
            .control(&dvector![0.0, 0.0], &DMatrix::zeros(2, 3), &DMatrix::zeros(2, 2))
            .unwrap();
        assert_eq!(u, DVector::zeros(2));

        assert!(controller
            .control(&dvector![0.0, 0.0], &DMatrix::zeros(3, 1), &DMatrix::zeros(2, 1))
            .is_err());
        assert!(controller
            .control(&dvector![0.0, 0.0], &DMatrix::zeros(2, 0), &DMatrix::zeros(2, 1))
            .is_err());
    }
}

//! Real-time iteration: one QP per control step, linearized at the current
//! guess with the latest state estimate injected.

use std::time::Instant;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField, convert};

use crate::admm::AdmmQpSolver;
use crate::cost::tile;
use crate::error::OcpError;
use crate::layout::check_len;
use crate::linearize::linearize;
use crate::metadata::{Metadata, SolverLog};
use crate::ocp::Ocp;
use crate::solver::{QpProblem, QpSolver};
use crate::sqp::{convexify, lagrangian_hessian};

pub const RTI_NAME: &str = "RTI_NMPC";

const RTI_DEFAULT_HESSIAN_REGULARIZATION: f64 = 1e-8;

/// Curvature used in the QP objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HessianApproximation {
    /// Hessian of the Lagrangian at the guess, with the current multipliers.
    #[default]
    Exact,
    /// The diagonal tracking weight.
    GaussNewton,
}

#[derive(Debug, Clone)]
pub struct RtiSettings<F> {
    pub hessian: HessianApproximation,
    /// Smallest eigenvalue enforced on the exact Hessian.
    pub hessian_regularization: F,
}

impl<F> Default for RtiSettings<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn default() -> Self {
        Self {
            hessian: HessianApproximation::default(),
            hessian_regularization: convert(RTI_DEFAULT_HESSIAN_REGULARIZATION),
        }
    }
}

/// RTI controller. Owns the primal guess and both multiplier vectors and
/// overwrites them with every QP solution.
#[derive(Debug)]
pub struct RtiNmpc<F, S = AdmmQpSolver<F>>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    ocp: Ocp<F>,
    solver: S,
    settings: RtiSettings<F>,
    /// Diagonal of the tracking weight over the whole decision vector.
    weight: DVector<F>,

    w0: DVector<F>,
    lam_g: DVector<F>,
    lam_x: DVector<F>,
    log: SolverLog<F>,
}

impl<F> RtiNmpc<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    /// Binds `ocp` to the ADMM QP solver with the exact Hessian.
    /// `state_weight` and `control_weight` are the per-component diagonals
    /// tiled over the horizon.
    pub fn new(
        ocp: Ocp<F>,
        w0: Option<DVector<F>>,
        state_weight: &DVector<F>,
        control_weight: &DVector<F>,
    ) -> Result<Self, OcpError> {
        Self::with_solver(
            ocp,
            w0,
            state_weight,
            control_weight,
            RtiSettings::default(),
            AdmmQpSolver::default(),
        )
    }
}

impl<F, S> RtiNmpc<F, S>
where
    F: Scalar + Copy + SimdRealField + RealField,
    S: QpSolver<F>,
{
    pub fn with_solver(
        ocp: Ocp<F>,
        w0: Option<DVector<F>>,
        state_weight: &DVector<F>,
        control_weight: &DVector<F>,
        settings: RtiSettings<F>,
        solver: S,
    ) -> Result<Self, OcpError> {
        let n = ocp.variables.len();
        check_len("state weight", ocp.nx(), state_weight.len())?;
        check_len("control weight", ocp.nu(), control_weight.len())?;
        let w0 = match w0 {
            Some(w0) => {
                check_len("initial guess", n, w0.len())?;
                w0
            }
            None => DVector::zeros(n),
        };

        let m = ocp.horizon();
        let mut weight = DVector::zeros(n);
        weight
            .rows_mut(0, ocp.nx() * (m + 1))
            .copy_from(&tile(state_weight, m + 1));
        weight
            .rows_mut(ocp.nx() * (m + 1), ocp.nu() * m)
            .copy_from(&tile(control_weight, m));

        Ok(Self {
            lam_g: DVector::zeros(ocp.constraints.len()),
            lam_x: DVector::zeros(n),
            ocp,
            solver,
            settings,
            weight,
            w0,
            log: SolverLog::default(),
        })
    }

    /// One RTI step for parameter values `p`. Returns the `nu x m` control
    /// trajectory of the QP solution.
    pub fn step(&mut self, p: &DVector<F>) -> Result<DMatrix<F>, OcpError> {
        self.ocp.parameters.check(p)?;
        let nx = self.ocp.nx();

        let mut w_guess = self.w0.clone();
        w_guess.rows_mut(0, nx).copy_from(&p.rows(0, nx));

        // NaN is the only value unordered with itself
        let nan = p
            .iter()
            .chain(w_guess.iter())
            .chain(self.lam_g.iter())
            .position(|v| v.partial_cmp(v).is_none());
        if let Some(index) = nan {
            warn!("{}: NaN in QP parameters at index {}", RTI_NAME, index);
            return Err(OcpError::NumericInvalid { index });
        }
        self.w0 = w_guess;

        let start = Instant::now();
        let qp = self.build_qp(p);
        let result = self
            .solver
            .solve(&qp, &self.w0, &self.lam_x, &self.lam_g);
        let duration = start.elapsed();

        if !result.status.is_success() {
            warn!(
                "{}: QP stopped with {:?} after {} iterations",
                RTI_NAME, result.status, result.iterations
            );
        }
        debug!(
            "{}: f = {} in {:?} ({} iterations)",
            RTI_NAME, result.f, duration, result.iterations
        );

        self.w0 = result.x.clone();
        self.lam_g = result.lam_g.clone();
        self.lam_x = result.lam_x.clone();

        let controls = self.ocp.variables.controls();
        let u = DMatrix::from_column_slice(
            self.ocp.nu(),
            self.ocp.horizon(),
            &result.x.as_slice()[controls],
        );
        self.log.push(result, duration);
        Ok(u)
    }

    /// QP in `w` around the current guess:
    /// `1/2 (w - wg)^T B (w - wg) + J^T (w - wg)` with `J = W (wg - w_ref)`,
    /// subject to the constraints linearized at `wg` and the variable bounds.
    fn build_qp(&self, p: &DVector<F>) -> QpProblem<F> {
        let half: F = convert(0.5);
        let w_guess = &self.w0;
        let refs = self.ocp.parameters.references();
        let w_ref = p.rows(refs.start, refs.len());

        let grad = self.weight.component_mul(&(w_guess - w_ref));
        let hess = match self.settings.hessian {
            HessianApproximation::Exact => convexify(
                lagrangian_hessian(&self.ocp, w_guess, p, &self.lam_g),
                self.settings.hessian_regularization,
            ),
            HessianApproximation::GaussNewton => DMatrix::from_diagonal(&self.weight),
        };

        let lin = linearize(&self.ocp.constraints, w_guess, p);
        let shift = lin.offset();
        let hw = &hess * w_guess;

        QpProblem {
            q: &grad - &hw,
            offset: half * w_guess.dot(&hw) - grad.dot(w_guess),
            h: hess,
            a: lin.jacobian,
            lba: self.ocp.constraints.lower() + &shift,
            uba: self.ocp.constraints.upper() + &shift,
            lbx: self.ocp.bounds.lower.clone(),
            ubx: self.ocp.bounds.upper.clone(),
        }
    }

    pub fn ocp(&self) -> &Ocp<F> {
        &self.ocp
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn settings(&self) -> &RtiSettings<F> {
        &self.settings
    }

    /// Linearization point of the next step.
    pub fn warm_start(&self) -> &DVector<F> {
        &self.w0
    }

    /// Constraint and bound multipliers of the last QP.
    pub fn multipliers(&self) -> (&DVector<F>, &DVector<F>) {
        (&self.lam_g, &self.lam_x)
    }

    pub fn log(&self) -> &SolverLog<F> {
        &self.log
    }

    pub fn reset_metadata(&mut self) {
        self.log.clear();
    }

    pub fn metadata(&self) -> Metadata<F> {
        self.log.export(RTI_NAME, &self.ocp.variables)
    }
}

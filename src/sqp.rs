//! Line-search SQP for the transcribed NLP, solving one convex QP per
//! iteration.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField, convert};

use crate::admm::{AdmmQpSolver, AdmmSettings};
use crate::ocp::Ocp;
use crate::solver::{NlpSolver, QpProblem, QpSolver, SolverResult, SolverStatus};

// Default settings
const SQP_DEFAULT_TOL: f64 = 1e-6;
const SQP_DEFAULT_MAX_ITER: usize = 100;
const SQP_DEFAULT_MIN_STEP: f64 = 1e-8;
const SQP_DEFAULT_ARMIJO: f64 = 1e-4;
const SQP_DEFAULT_MERIT_MARGIN: f64 = 1.1;
const SQP_DEFAULT_HESSIAN_REGULARIZATION: f64 = 1e-8;
const SQP_DEFAULT_WARM_START_ENTIRE_ITERATE: bool = true;
// QP tolerances relative to `tol`
const SQP_QP_TOL_RATIO: f64 = 1e-2;

/// User settings
#[derive(Debug, Clone)]
pub struct SqpSettings<F> {
    /// Tolerance on the step, the stationarity residual and the constraint
    /// violation.
    pub tol: F,
    pub max_iter: usize,
    /// Smallest accepted line-search step.
    pub min_step: F,
    /// Sufficient decrease coefficient of the merit function.
    pub armijo: F,
    /// Penalty parameter margin over the largest multiplier.
    pub merit_margin: F,
    /// Smallest eigenvalue enforced on the Lagrangian Hessian.
    pub hessian_regularization: F,
    /// Start each solve from the multipliers of the previous one.
    pub warm_start_entire_iterate: bool,
}

impl<F> Default for SqpSettings<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn default() -> Self {
        Self {
            tol: convert(SQP_DEFAULT_TOL),
            max_iter: SQP_DEFAULT_MAX_ITER,
            min_step: convert(SQP_DEFAULT_MIN_STEP),
            armijo: convert(SQP_DEFAULT_ARMIJO),
            merit_margin: convert(SQP_DEFAULT_MERIT_MARGIN),
            hessian_regularization: convert(SQP_DEFAULT_HESSIAN_REGULARIZATION),
            warm_start_entire_iterate: SQP_DEFAULT_WARM_START_ENTIRE_ITERATE,
        }
    }
}

/// SQP solver with an exact, convexified Lagrangian Hessian and an l1 merit
/// line search.
#[derive(Debug, Clone)]
pub struct SqpSolver<F, Q = AdmmQpSolver<F>> {
    pub settings: SqpSettings<F>,
    qp_solver: Q,
    lam_g: DVector<F>,
    lam_x: DVector<F>,
}

impl<F> Default for SqpSolver<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn default() -> Self {
        Self::new(SqpSettings::default())
    }
}

impl<F> SqpSolver<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    /// Uses an ADMM QP solver whose tolerances sit two orders of magnitude
    /// below `settings.tol`.
    pub fn new(settings: SqpSettings<F>) -> Self {
        let qp_tol = settings.tol * convert(SQP_QP_TOL_RATIO);
        let qp_solver = AdmmQpSolver::new(AdmmSettings {
            abs_tol: qp_tol,
            rel_tol: qp_tol,
            ..Default::default()
        });
        Self::with_qp_solver(settings, qp_solver)
    }
}

impl<F, Q> SqpSolver<F, Q>
where
    F: Scalar + Copy + SimdRealField + RealField,
    Q: QpSolver<F>,
{
    pub fn with_qp_solver(settings: SqpSettings<F>, qp_solver: Q) -> Self {
        Self {
            settings,
            qp_solver,
            lam_g: DVector::zeros(0),
            lam_x: DVector::zeros(0),
        }
    }

    pub fn qp_solver(&self) -> &Q {
        &self.qp_solver
    }

    /// Multiplier estimates kept from the last solve.
    pub fn multipliers(&self) -> (&DVector<F>, &DVector<F>) {
        (&self.lam_g, &self.lam_x)
    }

    fn initial_multipliers(&self, m: usize, n: usize) -> (DVector<F>, DVector<F>) {
        if self.settings.warm_start_entire_iterate && self.lam_g.len() == m && self.lam_x.len() == n
        {
            (self.lam_g.clone(), self.lam_x.clone())
        } else {
            (DVector::zeros(m), DVector::zeros(n))
        }
    }
}

/// Hessian of `f + lam_g^T g` at `w`.
pub(crate) fn lagrangian_hessian<F>(
    ocp: &Ocp<F>,
    w: &DVector<F>,
    p: &DVector<F>,
    lam_g: &DVector<F>,
) -> DMatrix<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    ocp.objective.hessian(w, p) + ocp.constraints.hessian(w, p, lam_g)
}

/// Symmetrizes `hess` and shifts its diagonal until the smallest eigenvalue
/// reaches `min_eigenvalue`.
pub(crate) fn convexify<F>(hess: DMatrix<F>, min_eigenvalue: F) -> DMatrix<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    let half: F = convert(0.5);
    let mut hess = (&hess + hess.transpose()) * half;

    let n = hess.nrows();
    if n == 0 {
        return hess;
    }
    let min_eig = hess.clone().symmetric_eigenvalues().min();
    if min_eig < min_eigenvalue {
        for i in 0..n {
            hess[(i, i)] += min_eigenvalue - min_eig;
        }
    }
    hess
}

/// Sum of constraint violations.
fn violation<F>(g: &DVector<F>, lower: &DVector<F>, upper: &DVector<F>) -> F
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    g.iter()
        .zip(lower.iter().zip(upper.iter()))
        .fold(F::zero(), |acc, (&g, (&l, &u))| {
            acc + (l - g).max(F::zero()) + (g - u).max(F::zero())
        })
}

/// Gradient of the Lagrangian, `grad + jac^T lam_g + lam_x`.
fn stationarity<F>(
    grad: &DVector<F>,
    jac: &DMatrix<F>,
    lam_g: &DVector<F>,
    lam_x: &DVector<F>,
) -> DVector<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    grad + jac.tr_mul(lam_g) + lam_x
}

fn amax<F>(v: &DVector<F>) -> F
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    v.iter().fold(F::zero(), |acc, e| acc.max(e.abs()))
}

impl<F, Q> NlpSolver<F> for SqpSolver<F, Q>
where
    F: Scalar + Copy + SimdRealField + RealField,
    Q: QpSolver<F>,
{
    fn solve(&mut self, ocp: &Ocp<F>, x0: &DVector<F>, p: &DVector<F>) -> SolverResult<F> {
        let n = ocp.variables.len();
        let m = ocp.constraints.len();
        let lbg = ocp.constraints.lower();
        let ubg = ocp.constraints.upper();
        let half: F = convert(0.5);

        let mut w = ocp.bounds.clamp(x0);
        let (mut lam_g, mut lam_x) = self.initial_multipliers(m, n);
        let mut mu = F::zero();
        let mut status = SolverStatus::MaxIterations;
        let mut iterations = 0;

        while iterations < self.settings.max_iter {
            let f = ocp.objective.value(&w, p);
            let grad = ocp.objective.gradient(&w, p);
            let g = ocp.constraints.eval(&w, p);
            let jac = ocp.constraints.jacobian(&w, p);

            let qp = QpProblem {
                h: convexify(
                    lagrangian_hessian(ocp, &w, p, &lam_g),
                    self.settings.hessian_regularization,
                ),
                q: grad.clone(),
                offset: f,
                a: jac.clone(),
                lba: lbg - &g,
                uba: ubg - &g,
                lbx: &ocp.bounds.lower - &w,
                ubx: &ocp.bounds.upper - &w,
            };
            let step = self.qp_solver.solve(&qp, &DVector::zeros(n), &lam_x, &lam_g);
            if step.status == SolverStatus::Failed {
                warn!("SQP: QP subproblem failed at iteration {}", iterations);
                status = SolverStatus::Failed;
                break;
            }
            iterations += 1;

            let d = step.x;
            let viol = violation(&g, lbg, ubg);
            let tol = self.settings.tol;
            let kkt = amax(&stationarity(&grad, &jac, &step.lam_g, &step.lam_x));
            let small_step = amax(&d) <= tol * (F::one() + amax(&w));
            let stationary = kkt <= tol * (F::one() + amax(&grad));
            if viol <= tol && (small_step || stationary) {
                lam_g = step.lam_g;
                lam_x = step.lam_x;
                status = SolverStatus::Solved;
                break;
            }

            // l1 merit with a penalty dominating the new multipliers
            mu = mu.max(self.settings.merit_margin * amax(&step.lam_g));
            let merit = |w: &DVector<F>| {
                ocp.objective.value(w, p) + mu * violation(&ocp.constraints.eval(w, p), lbg, ubg)
            };
            let merit0 = f + mu * viol;
            let slope = grad.dot(&d) - mu * viol;

            let mut alpha = F::one();
            let accepted = loop {
                let trial = &w + d.scale(alpha);
                if merit(&trial) <= merit0 + self.settings.armijo * alpha * slope {
                    break Some(trial);
                }
                alpha *= half;
                if alpha < self.settings.min_step {
                    break None;
                }
            };
            let Some(trial) = accepted else {
                warn!("SQP: line search stalled at iteration {}", iterations);
                status = SolverStatus::MinStep;
                break;
            };

            w = trial;
            lam_g += (step.lam_g - &lam_g).scale(alpha);
            lam_x += (step.lam_x - &lam_x).scale(alpha);
            debug!(
                "SQP: iteration {} f = {} |d| = {} kkt = {} viol = {} alpha = {}",
                iterations,
                f,
                amax(&d),
                kkt,
                viol,
                alpha
            );
        }

        if self.settings.warm_start_entire_iterate {
            self.lam_g = lam_g.clone();
            self.lam_x = lam_x.clone();
        }

        debug!("SQP: {:?} after {} iterations", status, iterations);
        SolverResult {
            f: ocp.objective.value(&w, p),
            x: w,
            lam_g,
            lam_x,
            status,
            iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{Trajectory, unit_norm};
    use crate::cost::tracking_cost;
    use crate::engine::Expression;
    use crate::layout::{StageBounds, build_parameters, build_variables};
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    /// min |x - r|^2 s.t. |x|^2 = 1, with `r` in the first reference stage.
    fn circle(bounds: Option<&StageBounds<f64>>) -> Ocp<f64> {
        let (vars, bounds) = build_variables(2, 0, 0, bounds, None).unwrap();
        let params = build_parameters(2, 0, 0);
        let cost = tracking_cost(vars.state(0).collect(), params.x_ref(0).collect(), DMatrix::identity(2, 2)).unwrap();
        let constraints = unit_norm(&vars, Trajectory::States, 0..2).unwrap();
        Ocp::new(
            vars,
            bounds,
            params,
            vec![Box::new(cost) as Box<dyn Expression<f64>>],
            constraints,
        )
        .unwrap()
    }

    #[test]
    fn projects_target_onto_circle() {
        let ocp = circle(None);
        let p = dvector![0.0, 0.0, 2.0, 1.0];
        let mut solver = SqpSolver::<f64>::default();
        let sol = solver.solve(&ocp, &dvector![1.0, 0.0], &p);

        assert_eq!(sol.status, SolverStatus::Solved);
        let s = 5.0f64.sqrt();
        assert_relative_eq!(sol.x, dvector![2.0 / s, 1.0 / s], epsilon = 1e-4);
        assert_relative_eq!(sol.lam_g[0], s - 1.0, epsilon = 1e-3);
        assert_relative_eq!(sol.f, (s - 1.0).powi(2), epsilon = 1e-4);
    }

    #[test]
    fn active_variable_bound() {
        // y <= 0.2 cuts off the unconstrained projection
        let bounds = StageBounds::new(dvector![-2.0, -2.0], dvector![2.0, 0.2]);
        let ocp = circle(Some(&bounds));
        let p = dvector![0.0, 0.0, 2.0, 1.0];
        let sol = SqpSolver::<f64>::default().solve(&ocp, &dvector![0.5, 0.0], &p);

        assert_eq!(sol.status, SolverStatus::Solved);
        assert_relative_eq!(sol.x[1], 0.2, epsilon = 1e-5);
        assert_relative_eq!(sol.x[0], (1.0f64 - 0.04).sqrt(), epsilon = 1e-4);
        assert!(sol.lam_x[1] > 0.0);
    }

    #[test]
    fn convexify_shifts_indefinite_hessians() {
        let h = convexify(dmatrix![1.0, 3.0; 1.0, 1.0], 1e-3);
        // symmetrized to [[1, 2], [2, 1]] with eigenvalues -1 and 3
        assert_relative_eq!(h, dmatrix![2.001, 2.0; 2.0, 2.001], epsilon = 1e-9);

        let spd = dmatrix![2.0, 0.0; 0.0, 1.0];
        assert_eq!(convexify(spd.clone(), 1e-3), spd);
    }

    #[test]
    fn stationarity_vanishes_at_the_solution() {
        // min |x - (2, 2)|^2 s.t. x0 + x1 = 1, x1 <= 0 at x = (1, 0)
        let grad = dvector![-2.0, -4.0];
        let jac = dmatrix![1.0, 1.0];
        let lam_g = dvector![2.0];
        let lam_x = dvector![0.0, 2.0];
        assert_eq!(stationarity(&grad, &jac, &lam_g, &lam_x), dvector![0.0, 0.0]);
    }

    #[test]
    fn qp_tolerances_follow_the_step_tolerance() {
        let solver = SqpSolver::<f64>::new(SqpSettings {
            tol: 1e-4,
            ..Default::default()
        });
        assert_relative_eq!(solver.qp_solver().settings.abs_tol, 1e-6, epsilon = 1e-18);
        assert_relative_eq!(solver.qp_solver().settings.rel_tol, 1e-6, epsilon = 1e-18);
    }

    #[test]
    fn optimal_start_with_warm_multipliers_is_solved() {
        let ocp = circle(None);
        let p = dvector![0.0, 0.0, 2.0, 1.0];
        let mut solver = SqpSolver::<f64>::default();
        let first = solver.solve(&ocp, &dvector![1.0, 0.0], &p);
        assert_eq!(first.status, SolverStatus::Solved);

        for _ in 0..5 {
            let again = solver.solve(&ocp, &first.x, &p);
            assert_eq!(again.status, SolverStatus::Solved);
            assert!(again.iterations <= 2);
            assert_relative_eq!(again.x, first.x, epsilon = 1e-6);
        }
    }

    #[test]
    fn warm_start_keeps_multipliers() {
        let ocp = circle(None);
        let p = dvector![0.0, 0.0, 2.0, 1.0];
        let mut solver = SqpSolver::<f64>::default();
        let first = solver.solve(&ocp, &dvector![1.0, 0.0], &p);
        assert_eq!(solver.multipliers().0, &first.lam_g);

        let second = solver.solve(&ocp, &first.x, &p);
        assert_eq!(second.status, SolverStatus::Solved);
        assert!(second.iterations <= first.iterations);

        let mut cold = SqpSolver::new(SqpSettings {
            warm_start_entire_iterate: false,
            ..Default::default()
        });
        cold.solve(&ocp, &dvector![1.0, 0.0], &p);
        assert!(cold.multipliers().0.is_empty());
    }
}

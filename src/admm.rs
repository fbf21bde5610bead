//! Dense ADMM for convex QPs in the operator-splitting form
//! `min 1/2 x^T P x + q^T x` subject to `l <= C x <= u`, where `C` stacks the
//! constraint matrix over the identity so that variable bounds become
//! ordinary rows.

use log::{debug, warn};
use nalgebra::{
    DMatrix, DVector, Dyn, RealField, Scalar, SimdRealField, convert,
    linalg::{Cholesky, LU},
};

use crate::rho::{Residuals, RhoAdapter};
use crate::solver::{QpProblem, QpSolver, SolverResult, SolverStatus};

// Default settings
const ADMM_DEFAULT_RHO: f64 = 1e-1;
const ADMM_DEFAULT_SIGMA: f64 = 1e-6;
const ADMM_DEFAULT_ALPHA: f64 = 1.6;
const ADMM_DEFAULT_ABS_TOL: f64 = 1e-8;
const ADMM_DEFAULT_REL_TOL: f64 = 1e-8;
const ADMM_DEFAULT_MAX_ITER: usize = 10_000;
const ADMM_DEFAULT_CHECK_TERMINATION: usize = 1;
const ADMM_DEFAULT_EQ_RHO_SCALE: f64 = 1e3;
const ADMM_DEFAULT_ADAPTIVE_RHO: bool = true;
const ADMM_DEFAULT_ADAPTIVE_RHO_INTERVAL: usize = 25;
const ADMM_DEFAULT_ADAPTIVE_RHO_TOLERANCE: f64 = 5.0;
const ADMM_DEFAULT_ADAPTIVE_RHO_MIN: f64 = 1e-6;
const ADMM_DEFAULT_ADAPTIVE_RHO_MAX: f64 = 1e6;
const ADMM_DEFAULT_POLISH: bool = true;

/// User settings
#[derive(Debug, Clone)]
pub struct AdmmSettings<F> {
    /// Penalty on inequality rows.
    pub rho: F,
    /// Proximal regularization of the primal update.
    pub sigma: F,
    /// Over-relaxation factor in `(0, 2)`.
    pub alpha: F,
    pub abs_tol: F,
    pub rel_tol: F,
    pub max_iter: usize,
    pub check_termination: usize,
    /// Penalty multiplier on rows with `l == u`.
    pub eq_rho_scale: F,

    pub adaptive_rho: bool,
    pub adaptive_rho_interval: usize,
    pub adaptive_rho_tolerance: F,
    pub adaptive_rho_min: F,
    pub adaptive_rho_max: F,

    /// Refine the final iterate by solving the KKT system of the guessed
    /// active set.
    pub polish: bool,
}

impl<F> Default for AdmmSettings<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn default() -> Self {
        Self {
            rho: convert(ADMM_DEFAULT_RHO),
            sigma: convert(ADMM_DEFAULT_SIGMA),
            alpha: convert(ADMM_DEFAULT_ALPHA),
            abs_tol: convert(ADMM_DEFAULT_ABS_TOL),
            rel_tol: convert(ADMM_DEFAULT_REL_TOL),
            max_iter: ADMM_DEFAULT_MAX_ITER,
            check_termination: ADMM_DEFAULT_CHECK_TERMINATION,
            eq_rho_scale: convert(ADMM_DEFAULT_EQ_RHO_SCALE),

            adaptive_rho: ADMM_DEFAULT_ADAPTIVE_RHO,
            adaptive_rho_interval: ADMM_DEFAULT_ADAPTIVE_RHO_INTERVAL,
            adaptive_rho_tolerance: convert(ADMM_DEFAULT_ADAPTIVE_RHO_TOLERANCE),
            adaptive_rho_min: convert(ADMM_DEFAULT_ADAPTIVE_RHO_MIN),
            adaptive_rho_max: convert(ADMM_DEFAULT_ADAPTIVE_RHO_MAX),

            polish: ADMM_DEFAULT_POLISH,
        }
    }
}

/// ADMM QP solver. Holds no state between calls apart from its settings;
/// warm starts come in through [`QpSolver::solve`].
#[derive(Debug, Clone)]
pub struct AdmmQpSolver<F> {
    pub settings: AdmmSettings<F>,
}

impl<F> Default for AdmmQpSolver<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn default() -> Self {
        Self::new(AdmmSettings::default())
    }
}

impl<F> AdmmQpSolver<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub fn new(settings: AdmmSettings<F>) -> Self {
        Self { settings }
    }
}

/// Factorization of `P + sigma I + C^T diag(rho) C`. Cholesky when the
/// matrix is positive definite, LU otherwise.
enum KktFactor<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    Cholesky(Cholesky<F, Dyn>),
    Lu(LU<F, Dyn, Dyn>),
}

impl<F> KktFactor<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn new(kkt: DMatrix<F>) -> Option<Self> {
        match Cholesky::new(kkt.clone()) {
            Some(chol) => Some(Self::Cholesky(chol)),
            None => {
                let lu = kkt.lu();
                lu.is_invertible().then_some(Self::Lu(lu))
            }
        }
    }

    fn solve(&self, rhs: &DVector<F>) -> Option<DVector<F>> {
        match self {
            Self::Cholesky(chol) => Some(chol.solve(rhs)),
            Self::Lu(lu) => lu.solve(rhs),
        }
    }
}

/// Iterates of one solve call.
struct AdmmWorkspace<F> {
    c: DMatrix<F>, // (m + n) x n
    l: DVector<F>, // m + n
    u: DVector<F>, // m + n
    rho: DVector<F>,

    x: DVector<F>, // n
    z: DVector<F>, // m + n
    y: DVector<F>, // m + n

    iter: usize,
}

impl<F> AdmmWorkspace<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn new(qp: &QpProblem<F>, x0: &DVector<F>, lam_x0: &DVector<F>, lam_g0: &DVector<F>) -> Self {
        let n = qp.num_variables();
        let m = qp.num_constraints();

        let mut c = DMatrix::zeros(m + n, n);
        c.rows_mut(0, m).copy_from(&qp.a);
        c.rows_mut(m, n).fill_with_identity();

        let mut l = DVector::zeros(m + n);
        l.rows_mut(0, m).copy_from(&qp.lba);
        l.rows_mut(m, n).copy_from(&qp.lbx);
        let mut u = DVector::zeros(m + n);
        u.rows_mut(0, m).copy_from(&qp.uba);
        u.rows_mut(m, n).copy_from(&qp.ubx);

        let x = if x0.len() == n {
            x0.clone()
        } else {
            DVector::zeros(n)
        };

        let mut y = DVector::zeros(m + n);
        if lam_g0.len() == m && lam_x0.len() == n {
            y.rows_mut(0, m).copy_from(lam_g0);
            y.rows_mut(m, n).copy_from(lam_x0);
        }

        let mut z = &c * &x;
        project(&mut z, &l, &u);

        Self {
            c,
            l,
            u,
            rho: DVector::zeros(m + n),
            x,
            z,
            y,
            iter: 0,
        }
    }

    /// Per-row penalties: `base` on inequality rows, scaled up on equality
    /// rows and down to the minimum on rows without bounds.
    fn set_rho(&mut self, base: F, settings: &AdmmSettings<F>) {
        let (l, u) = (&self.l, &self.u);
        self.rho = DVector::from_fn(l.len(), |i, _| {
            if !l[i].is_finite() && !u[i].is_finite() {
                settings.adaptive_rho_min
            } else if l[i] == u[i] {
                base * settings.eq_rho_scale
            } else {
                base
            }
        });
    }

    fn factorize(&self, h: &DMatrix<F>, sigma: F) -> Option<KktFactor<F>> {
        let n = self.x.len();
        let rho_c = DMatrix::from_fn(self.c.nrows(), n, |i, j| self.rho[i] * self.c[(i, j)]);
        let kkt = h + DMatrix::identity(n, n).scale(sigma) + self.c.tr_mul(&rho_c);
        KktFactor::new(kkt)
    }

    /// Solve the regularized linear system for the new primal iterate
    fn update_primal(
        &mut self,
        factor: &KktFactor<F>,
        q: &DVector<F>,
        settings: &AdmmSettings<F>,
    ) -> Option<DVector<F>> {
        let rhs = self.x.scale(settings.sigma) - q
            + self.c.tr_mul(&(self.rho.component_mul(&self.z) - &self.y));
        let x_tilde = factor.solve(&rhs)?;
        let z_tilde = &self.c * &x_tilde;

        let alpha = settings.alpha;
        let one_minus_alpha = F::one() - alpha;
        self.x = x_tilde.scale(alpha) + self.x.scale(one_minus_alpha);
        Some(z_tilde.scale(alpha) + self.z.scale(one_minus_alpha))
    }

    /// Project slack variables onto the bounds
    fn update_slack(&mut self, z_relaxed: &DVector<F>) -> DVector<F> {
        let mut z_new = z_relaxed + self.y.component_div(&self.rho);
        project(&mut z_new, &self.l, &self.u);
        z_new
    }

    /// Augmented Lagrangian multiplier update
    fn update_dual(&mut self, z_relaxed: &DVector<F>, z_new: DVector<F>) {
        self.y += self.rho.component_mul(&(z_relaxed - &z_new));
        self.z = z_new;
    }

    fn residuals(&self, qp: &QpProblem<F>) -> Residuals<F> {
        Residuals::compute(&qp.h, &qp.q, &qp.a, &self.x, &self.z, &self.y)
    }

    fn termination_condition(&self, residuals: &Residuals<F>, settings: &AdmmSettings<F>) -> bool {
        let eps_pri = settings.abs_tol + settings.rel_tol * residuals.pri_norm;
        let eps_dua = settings.abs_tol + settings.rel_tol * residuals.dual_norm;
        residuals.pri_res <= eps_pri && residuals.dual_res <= eps_dua
    }

    /// Solves the equality-constrained QP on the rows the current iterate
    /// marks as active and adopts the result when it satisfies the
    /// termination criteria with consistent multiplier signs.
    fn polish(&mut self, qp: &QpProblem<F>, settings: &AdmmSettings<F>) -> bool {
        let n = self.x.len();
        let active: Vec<(usize, F)> = (0..self.c.nrows())
            .filter_map(|i| {
                let (l, u, z, y) = (self.l[i], self.u[i], self.z[i], self.y[i]);
                if l == u || z - l < -y {
                    Some((i, l))
                } else if u - z < y {
                    Some((i, u))
                } else {
                    None
                }
            })
            .collect();

        let k = active.len();
        let mut kkt = DMatrix::zeros(n + k, n + k);
        kkt.view_mut((0, 0), (n, n)).copy_from(&qp.h);
        let mut rhs = DVector::zeros(n + k);
        rhs.rows_mut(0, n).copy_from(&(-&qp.q));
        for (r, &(i, bound)) in active.iter().enumerate() {
            for j in 0..n {
                kkt[(n + r, j)] = self.c[(i, j)];
                kkt[(j, n + r)] = self.c[(i, j)];
            }
            rhs[n + r] = bound;
        }
        let Some(sol) = kkt.lu().solve(&rhs) else {
            debug!("QP: polishing system is singular");
            return false;
        };

        let x = sol.rows(0, n).into_owned();
        let mut y = DVector::zeros(self.c.nrows());
        for (r, &(i, _)) in active.iter().enumerate() {
            y[i] = sol[n + r];
        }
        let slack = settings.abs_tol;
        let signs_agree = active.iter().enumerate().all(|(r, &(i, bound))| {
            let yi = sol[n + r];
            self.l[i] == self.u[i]
                || (bound == self.l[i] && yi <= slack)
                || (bound == self.u[i] && yi >= -slack)
        });
        if !signs_agree || sol.iter().any(|v| !v.is_finite()) {
            debug!("QP: polishing rejected the guessed active set");
            return false;
        }

        let mut z = &self.c * &x;
        project(&mut z, &self.l, &self.u);
        let residuals = Residuals::compute(&qp.h, &qp.q, &qp.a, &x, &z, &y);
        if !self.termination_condition(&residuals, settings) {
            debug!("QP: polished iterate misses the tolerances");
            return false;
        }

        self.x = x;
        self.z = z;
        self.y = y;
        true
    }

    fn into_result(self, qp: &QpProblem<F>, status: SolverStatus) -> SolverResult<F> {
        let m = qp.num_constraints();
        let n = qp.num_variables();
        SolverResult {
            f: qp.objective(&self.x),
            lam_g: self.y.rows(0, m).into_owned(),
            lam_x: self.y.rows(m, n).into_owned(),
            x: self.x,
            status,
            iterations: self.iter,
        }
    }
}

fn project<F>(z: &mut DVector<F>, l: &DVector<F>, u: &DVector<F>)
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    z.zip_zip_apply(l, u, |z, l, u| *z = (*z).max(l).min(u));
}

impl<F> QpSolver<F> for AdmmQpSolver<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn solve(
        &mut self,
        qp: &QpProblem<F>,
        x0: &DVector<F>,
        lam_x0: &DVector<F>,
        lam_g0: &DVector<F>,
    ) -> SolverResult<F> {
        let settings = &self.settings;
        let mut work = AdmmWorkspace::new(qp, x0, lam_x0, lam_g0);

        let adapter = RhoAdapter {
            rho_min: settings.adaptive_rho_min,
            rho_max: settings.adaptive_rho_max,
            clip: true,
            tolerance: settings.adaptive_rho_tolerance,
        };
        let mut rho = settings.rho;
        work.set_rho(rho, settings);

        let Some(mut factor) = work.factorize(&qp.h, settings.sigma) else {
            warn!("QP: KKT matrix is singular");
            return work.into_result(qp, SolverStatus::Failed);
        };

        for _ in 0..settings.max_iter {
            let Some(z_relaxed) = work.update_primal(&factor, &qp.q, settings) else {
                warn!("QP: linear solve failed after {} iterations", work.iter);
                return work.into_result(qp, SolverStatus::Failed);
            };
            let z_new = work.update_slack(&z_relaxed);
            work.update_dual(&z_relaxed, z_new);
            work.iter += 1;

            let check = work.iter % settings.check_termination.max(1) == 0;
            let adapt = settings.adaptive_rho
                && work.iter % settings.adaptive_rho_interval.max(1) == 0;
            if !check && !adapt {
                continue;
            }

            let residuals = work.residuals(qp);
            if check && work.termination_condition(&residuals, settings) {
                debug!("QP: converged in {} iterations", work.iter);
                if settings.polish {
                    work.polish(qp, settings);
                }
                return work.into_result(qp, SolverStatus::Solved);
            }

            if adapt {
                if let Some(new_rho) = adapter.adapt(&residuals, rho) {
                    debug!("QP: rho {} -> {} at iteration {}", rho, new_rho, work.iter);
                    rho = new_rho;
                    work.set_rho(rho, settings);
                    match work.factorize(&qp.h, settings.sigma) {
                        Some(f) => factor = f,
                        None => {
                            warn!("QP: refactorization failed for rho = {}", rho);
                            return work.into_result(qp, SolverStatus::Failed);
                        }
                    }
                }
            }
        }

        if settings.polish && work.polish(qp, settings) {
            debug!("QP: polished after {} iterations", work.iter);
            return work.into_result(qp, SolverStatus::Solved);
        }
        debug!("QP: reached the iteration limit of {}", settings.max_iter);
        work.into_result(qp, SolverStatus::MaxIterations)
    }
}

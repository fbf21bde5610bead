//! Receding-horizon controller that re-solves the full NLP every step.

use std::time::Instant;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField};

use crate::error::OcpError;
use crate::layout::{VariableLayout, check_len};
use crate::metadata::{Metadata, SolverLog};
use crate::ocp::Ocp;
use crate::solver::NlpSolver;
use crate::sqp::SqpSolver;

pub const NMPC_NAME: &str = "NMPC";

/// Per-call options of [`Nmpc::step_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOptions {
    /// Shift the solution one stage forward to build the next guess.
    pub shift: bool,
    /// Clear the solver log before solving.
    pub reset_meta: bool,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            shift: true,
            reset_meta: false,
        }
    }
}

/// Full NMPC: one converged NLP solve per control step, warm-started from the
/// previous solution.
#[derive(Debug)]
pub struct Nmpc<F, S = SqpSolver<F>>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    ocp: Ocp<F>,
    solver: S,
    w0: DVector<F>,
    log: SolverLog<F>,
}

impl<F> Nmpc<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    /// Binds `ocp` to the default SQP solver. The initial guess defaults to
    /// zeros.
    pub fn new(ocp: Ocp<F>, w0: Option<DVector<F>>) -> Result<Self, OcpError> {
        Self::with_solver(ocp, w0, SqpSolver::default())
    }
}

impl<F, S> Nmpc<F, S>
where
    F: Scalar + Copy + SimdRealField + RealField,
    S: NlpSolver<F>,
{
    pub fn with_solver(ocp: Ocp<F>, w0: Option<DVector<F>>, solver: S) -> Result<Self, OcpError> {
        let w0 = match w0 {
            Some(w0) => {
                check_len("initial guess", ocp.variables.len(), w0.len())?;
                w0
            }
            None => DVector::zeros(ocp.variables.len()),
        };
        Ok(Self {
            ocp,
            solver,
            w0,
            log: SolverLog::default(),
        })
    }

    /// Solves for parameter values `p`, shifting the solution into the next
    /// guess. Returns the `nu x m` control trajectory.
    pub fn step(&mut self, p: &DVector<F>) -> Result<DMatrix<F>, OcpError> {
        self.step_with(p, StepOptions::default())
    }

    pub fn step_with(
        &mut self,
        p: &DVector<F>,
        options: StepOptions,
    ) -> Result<DMatrix<F>, OcpError> {
        self.ocp.parameters.check(p)?;
        if options.reset_meta {
            self.log.clear();
        }

        let start = Instant::now();
        let result = self.solver.solve(&self.ocp, &self.w0, p);
        let duration = start.elapsed();

        if !result.status.is_success() {
            warn!(
                "{}: solver stopped with {:?} after {} iterations",
                NMPC_NAME, result.status, result.iterations
            );
        }
        debug!(
            "{}: f = {} in {:?} ({} iterations)",
            NMPC_NAME, result.f, duration, result.iterations
        );

        let (_, u) = self.ocp.variables.split(&result.x);
        self.w0 = if options.shift {
            shift_guess(&self.ocp.variables, &result.x)
        } else {
            result.x.clone()
        };
        self.log.push(result, duration);

        Ok(u)
    }

    pub fn ocp(&self) -> &Ocp<F> {
        &self.ocp
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Primal guess for the next step.
    pub fn warm_start(&self) -> &DVector<F> {
        &self.w0
    }

    pub fn log(&self) -> &SolverLog<F> {
        &self.log
    }

    pub fn reset_metadata(&mut self) {
        self.log.clear();
    }

    pub fn metadata(&self) -> Metadata<F> {
        self.log.export(NMPC_NAME, &self.ocp.variables)
    }
}

/// Drops the first state and control stage and repeats the last one.
pub fn shift_guess<F>(variables: &VariableLayout, w: &DVector<F>) -> DVector<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    let m = variables.horizon();
    let mut next = w.clone();
    for k in 0..=m {
        let from = variables.state((k + 1).min(m));
        next.rows_mut(variables.state(k).start, from.len())
            .copy_from(&w.rows(from.start, from.len()));
    }
    for k in 0..m {
        let from = variables.control((k + 1).min(m - 1));
        next.rows_mut(variables.control(k).start, from.len())
            .copy_from(&w.rows(from.start, from.len()));
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{build_parameters, build_variables};
    use crate::solver::{SolverResult, SolverStatus};
    use nalgebra::dvector;

    const NX: usize = 2;
    const NU: usize = 1;
    const M: usize = 3;

    /// Returns a fixed solution and records every guess it receives.
    #[derive(Debug)]
    struct Replay {
        solution: DVector<f64>,
        guesses: Vec<DVector<f64>>,
        status: SolverStatus,
    }

    impl NlpSolver<f64> for Replay {
        fn solve(&mut self, ocp: &Ocp<f64>, x0: &DVector<f64>, _p: &DVector<f64>) -> SolverResult<f64> {
            self.guesses.push(x0.clone());
            SolverResult {
                x: self.solution.clone(),
                f: 0.5,
                lam_g: DVector::zeros(ocp.constraints.len()),
                lam_x: DVector::zeros(ocp.variables.len()),
                status: self.status,
                iterations: 4,
            }
        }
    }

    fn controller(status: SolverStatus) -> Nmpc<f64, Replay> {
        let (vars, bounds) = build_variables(NX, NU, M, None, None).unwrap();
        let params = build_parameters(NX, NU, M);
        let solution = DVector::from_fn(vars.len(), |i, _| i as f64);
        let ocp = Ocp::new(vars, bounds, params, vec![], vec![]).unwrap();
        let solver = Replay {
            solution,
            guesses: Vec::new(),
            status,
        };
        Nmpc::with_solver(ocp, None, solver).unwrap()
    }

    fn params(nmpc: &Nmpc<f64, Replay>) -> DVector<f64> {
        DVector::zeros(nmpc.ocp().parameters.len())
    }

    #[test]
    fn shift_moves_stages_forward_and_repeats_the_tail() {
        let mut nmpc = controller(SolverStatus::Solved);
        let p = params(&nmpc);
        let u = nmpc.step(&p).unwrap();

        // x occupies 0..8, u occupies 8..11
        assert_eq!(u, DMatrix::from_row_slice(NU, M, &[8.0, 9.0, 10.0]));
        let w0 = nmpc.warm_start();
        assert_eq!(w0.rows(0, NX), dvector![2.0, 3.0]);
        assert_eq!(w0.rows(4, NX), dvector![6.0, 7.0]);
        assert_eq!(w0.rows(6, NX), dvector![6.0, 7.0]);
        assert_eq!(w0.rows(8, 3), dvector![9.0, 10.0, 10.0]);

        nmpc.step(&p).unwrap();
        assert_eq!(nmpc.solver().guesses[0], DVector::zeros(11));
        assert_eq!(&nmpc.solver().guesses[1], &shift_guess(&nmpc.ocp().variables, &nmpc.solver().solution));
    }

    #[test]
    fn unshifted_guess_is_the_raw_solution() {
        let mut nmpc = controller(SolverStatus::Solved);
        let p = params(&nmpc);
        nmpc.step_with(
            &p,
            StepOptions {
                shift: false,
                reset_meta: false,
            },
        )
        .unwrap();
        assert_eq!(nmpc.warm_start(), &nmpc.solver().solution);
    }

    #[test]
    fn log_grows_until_reset() {
        let mut nmpc = controller(SolverStatus::Solved);
        let p = params(&nmpc);
        assert_eq!(nmpc.metadata().steps(), 0);

        nmpc.step(&p).unwrap();
        nmpc.step(&p).unwrap();
        assert_eq!(nmpc.log().len(), 2);

        nmpc.step_with(
            &p,
            StepOptions {
                shift: true,
                reset_meta: true,
            },
        )
        .unwrap();
        let meta = nmpc.metadata();
        assert_eq!(meta.controller_name, "NMPC");
        assert_eq!(meta.steps(), 1);
        assert_eq!(meta.solution_states[0].shape(), (NX, M + 1));
        assert_eq!(meta.solution_controls[0].shape(), (NU, M));

        nmpc.reset_metadata();
        assert!(nmpc.log().is_empty());
    }

    #[test]
    fn non_convergence_is_reported_not_raised() {
        let mut nmpc = controller(SolverStatus::MaxIterations);
        let p = params(&nmpc);
        assert!(nmpc.step(&p).is_ok());
        assert_eq!(nmpc.metadata().statuses, vec![SolverStatus::MaxIterations]);
    }

    #[test]
    fn wrong_parameter_length_is_rejected_before_solving() {
        let mut nmpc = controller(SolverStatus::Solved);
        let err = nmpc.step(&DVector::zeros(3)).unwrap_err();
        assert!(matches!(err, OcpError::ShapeMismatch(_)));
        assert!(nmpc.solver().guesses.is_empty());
        assert!(nmpc.log().is_empty());
    }

    #[test]
    fn initial_guess_length_is_checked() {
        let (vars, bounds) = build_variables::<f64>(NX, NU, M, None, None).unwrap();
        let ocp = Ocp::new(vars, bounds, build_parameters(NX, NU, M), vec![], vec![]).unwrap();
        let err = Nmpc::new(ocp, Some(DVector::zeros(5))).unwrap_err();
        assert!(matches!(err, OcpError::Dimension { expected: 11, got: 5, .. }));
    }
}

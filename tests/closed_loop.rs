mod common;

use common::*;
use nalgebra::{DMatrix, DVector, dvector};
use ocpmpc::{
    AdmmQpSolver, Controller, HessianApproximation, Lqr, Nmpc, RiccatiSettings, RtiNmpc,
    RtiSettings, SolverStatus, Transition, discrete_linear_system, discretize,
};

const STEPS: usize = 80;

/// Runs `controller` from rest at the origin against an RK4 simulation of the
/// double integrator and returns the final state.
fn simulate(controller: &mut dyn Controller<f64>) -> DVector<f64> {
    simulate_from(controller, DVector::zeros(NX))
}

fn simulate_from(controller: &mut dyn Controller<f64>, x0: DVector<f64>) -> DVector<f64> {
    let plant = discretize(DoubleIntegrator, DT);
    let (x_ref, u_ref) = references();
    let mut x = x0;
    for _ in 0..STEPS {
        let u = controller.control(&x, &x_ref, &u_ref).unwrap();
        assert_eq!(u.len(), NU);
        x = plant.transition(&x, &u);
    }
    x
}

fn rti(hessian: HessianApproximation) -> RtiNmpc<f64> {
    let settings = RtiSettings {
        hessian,
        ..Default::default()
    };
    RtiNmpc::with_solver(
        tracking_ocp(),
        None,
        &state_weight(),
        &control_weight(),
        settings,
        AdmmQpSolver::default(),
    )
    .unwrap()
}

#[test]
fn nmpc_reaches_the_target() {
    init_logger();
    let mut nmpc = Nmpc::new(tracking_ocp(), None).unwrap();
    let x = simulate(&mut nmpc);

    assert!((x[0] - TARGET).abs() < 0.05, "final position {}", x[0]);
    assert!(x[1].abs() < 0.1, "final velocity {}", x[1]);

    let meta = nmpc.metadata();
    assert_eq!(meta.controller_name, "NMPC");
    assert_eq!(meta.steps(), STEPS);
    assert_eq!(meta.statuses, vec![SolverStatus::Solved; STEPS]);
}

#[test]
fn nmpc_converges_at_every_step_from_a_distant_start() {
    init_logger();
    let mut nmpc = Nmpc::new(tracking_ocp(), None).unwrap();
    let x = simulate_from(&mut nmpc, dvector![-20.0, 3.0]);
    assert!(x.iter().all(|v| v.is_finite()));

    let statuses = nmpc.metadata().statuses;
    for (k, status) in statuses.iter().enumerate() {
        assert_eq!(*status, SolverStatus::Solved, "step {k}");
    }
}

#[test]
fn rti_reaches_the_target() {
    init_logger();
    for hessian in [HessianApproximation::GaussNewton, HessianApproximation::Exact] {
        let mut controller = rti(hessian);
        let x = simulate(&mut controller);

        assert!((x[0] - TARGET).abs() < 0.05, "{hessian:?}: final position {}", x[0]);
        assert!(x[1].abs() < 0.1, "{hessian:?}: final velocity {}", x[1]);
        assert_eq!(controller.metadata().controller_name, "RTI_NMPC");
        assert_eq!(controller.log().len(), STEPS);
    }
}

#[test]
fn lqr_reaches_the_target() {
    let x_lin = DVector::zeros(NX);
    let u_lin = DVector::zeros(NU);
    let (a, b) = discrete_linear_system(&DoubleIntegrator, &x_lin, &u_lin, DT);
    let q = DMatrix::from_diagonal(&state_weight());
    let r = DMatrix::from_diagonal(&control_weight());
    let mut lqr = Lqr::new(&a, &b, &q, &r, &RiccatiSettings::default()).unwrap();

    let x = simulate(&mut lqr);
    assert!((x[0] - TARGET).abs() < 0.05, "final position {}", x[0]);
}

#[test]
fn predictions_respect_the_control_bounds() {
    let mut nmpc = Nmpc::new(tracking_ocp(), None).unwrap();
    let (x_ref, u_ref) = references();
    let p = nmpc
        .ocp()
        .parameters
        .values(&dvector![-5.0, 0.0], &x_ref, &u_ref)
        .unwrap();
    let u = nmpc.step(&p).unwrap();

    assert_eq!(u.shape(), (NU, HORIZON));
    assert!(u.iter().all(|a| a.abs() <= 5.0 + 1e-4));
    // far from the target the first move saturates
    assert!(u[(0, 0)] > 5.0 - 1e-2);
}

#[test]
fn identical_controllers_produce_identical_histories() {
    let (x_ref, u_ref) = references();
    let mut first = rti(HessianApproximation::GaussNewton);
    let mut second = rti(HessianApproximation::GaussNewton);
    let mut x = dvector![0.3, -0.2];
    for _ in 0..5 {
        let a = first.control(&x, &x_ref, &u_ref).unwrap();
        let b = second.control(&x, &x_ref, &u_ref).unwrap();
        assert_eq!(a, b);
        x = discretize(DoubleIntegrator, DT).transition(&x, &a);
    }

    let (left, right) = (first.metadata(), second.metadata());
    assert_eq!(left.residuals, right.residuals);
    assert_eq!(left.solution_states, right.solution_states);
    assert_eq!(left.solution_controls, right.solution_controls);
}

#[test]
fn repeated_nmpc_runs_agree() {
    let (x_ref, u_ref) = references();
    let mut first = Nmpc::new(tracking_ocp(), None).unwrap();
    let mut second = Nmpc::new(tracking_ocp(), None).unwrap();
    let mut x = dvector![0.3, -0.2];
    for _ in 0..5 {
        let a = first.control(&x, &x_ref, &u_ref).unwrap();
        let b = second.control(&x, &x_ref, &u_ref).unwrap();
        assert_eq!(a, b);
        x = discretize(DoubleIntegrator, DT).transition(&x, &a);
    }

    let (left, right) = (first.metadata(), second.metadata());
    assert_eq!(left.residuals, right.residuals);
    assert_eq!(left.statuses, right.statuses);
    assert_eq!(left.solution_states, right.solution_states);
    assert_eq!(left.solution_controls, right.solution_controls);
    assert_eq!(first.warm_start(), second.warm_start());
}

#[cfg(feature = "serde")]
#[test]
fn metadata_exports_as_json() {
    let mut nmpc = Nmpc::new(tracking_ocp(), None).unwrap();
    let (x_ref, u_ref) = references();
    for _ in 0..3 {
        nmpc.control(&DVector::zeros(NX), &x_ref, &u_ref).unwrap();
    }

    let json = serde_json::to_value(nmpc.metadata()).unwrap();
    assert_eq!(json["controller_name"], "NMPC");
    assert_eq!(json["num_states"], NX);
    assert_eq!(json["horizon_length"], HORIZON);
    assert_eq!(json["residuals"].as_array().map(Vec::len), Some(3));
    assert_eq!(json["statuses"][0], "Solved");
    assert_eq!(json["computation_times"].as_array().map(Vec::len), Some(3));
}

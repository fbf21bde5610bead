#![allow(dead_code)]

use nalgebra::{DMatrix, DVector, dvector};
use ocpmpc::{
    Expression, Ocp, OdeModel, StageBounds, build_parameters, build_variables, discretize,
    initial_value, multiple_shooting, tile_weights, tracking_cost,
};

pub const NX: usize = 2;
pub const NU: usize = 1;
pub const HORIZON: usize = 10;
pub const DT: f64 = 0.1;
pub const TARGET: f64 = 1.0;

/// Point mass on a line: position, velocity, commanded acceleration.
#[derive(Debug, Clone, Copy)]
pub struct DoubleIntegrator;

impl OdeModel<f64> for DoubleIntegrator {
    fn state_labels(&self) -> &[&'static str] {
        &["p", "v"]
    }

    fn control_labels(&self) -> &[&'static str] {
        &["a"]
    }

    fn neutral_state(&self) -> DVector<f64> {
        DVector::zeros(NX)
    }

    fn ode(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        dvector![x[1], u[0]]
    }
}

pub fn state_weight() -> DVector<f64> {
    dvector![10.0, 1.0]
}

pub fn control_weight() -> DVector<f64> {
    dvector![0.1]
}

/// Tracking problem with `|a| <= 5` over the whole horizon.
pub fn tracking_ocp() -> Ocp<f64> {
    let control_bounds = StageBounds::new(dvector![-5.0], dvector![5.0]);
    let (vars, bounds) = build_variables(NX, NU, HORIZON, None, Some(&control_bounds)).unwrap();
    let params = build_parameters(NX, NU, HORIZON);

    let state_cost = tracking_cost(
        vars.states().collect(),
        (params.x_ref(0).start..params.x_ref(HORIZON).end).collect(),
        tile_weights(&state_weight(), HORIZON + 1),
    )
    .unwrap();
    let control_cost = tracking_cost(
        vars.controls().collect(),
        (params.u_ref(0).start..params.u_ref(HORIZON - 1).end).collect(),
        tile_weights(&control_weight(), HORIZON),
    )
    .unwrap();

    let mut constraints = initial_value(&vars, &params);
    constraints.extend(multiple_shooting(&vars, discretize(DoubleIntegrator, DT)).unwrap());

    Ocp::new(
        vars,
        bounds,
        params,
        vec![
            Box::new(state_cost) as Box<dyn Expression<f64>>,
            Box::new(control_cost),
        ],
        constraints,
    )
    .unwrap()
}

/// Constant reference: rest at `TARGET` with zero acceleration.
pub fn references() -> (DMatrix<f64>, DMatrix<f64>) {
    let mut x_ref = DMatrix::zeros(NX, HORIZON + 1);
    x_ref.row_mut(0).fill(TARGET);
    (x_ref, DMatrix::zeros(NU, HORIZON))
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

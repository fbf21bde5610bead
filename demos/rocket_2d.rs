use log::debug;
use nalgebra::{DMatrix, DVector, dvector};
use ocpmpc::{
    Controller, Expression, Nmpc, Ocp, OdeModel, StageBounds, Transition, build_parameters,
    build_variables, discretize, initial_value, multiple_shooting, tile_weights, tracking_cost,
};

const NX: usize = 6;
const NU: usize = 2;
const NH: usize = 20;
const DT: f64 = 0.1;
const NSIM: usize = 50;

/// Planar rocket: position, velocity, attitude and its rate, driven by a
/// thrust along the body axis and a torque.
struct Rocket {
    mass: f64,
    inertia: f64,
    linear_friction: f64,
    angular_friction: f64,
}

impl Default for Rocket {
    fn default() -> Self {
        Self {
            mass: 1.0,
            inertia: 1.0,
            linear_friction: 0.0,
            angular_friction: 0.0,
        }
    }
}

impl OdeModel<f64> for Rocket {
    fn state_labels(&self) -> &[&'static str] {
        &["px", "py", "vx", "vy", "phi", "omega"]
    }

    fn control_labels(&self) -> &[&'static str] {
        &["f", "t"]
    }

    fn neutral_state(&self) -> DVector<f64> {
        DVector::zeros(NX)
    }

    fn ode(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let (vx, vy, phi, omega) = (x[2], x[3], x[4], x[5]);
        let (f, t) = (u[0], u[1]);
        dvector![
            vx,
            vy,
            phi.cos() * f / self.mass - self.linear_friction * vx,
            phi.sin() * f / self.mass - self.linear_friction * vy,
            omega,
            t / self.inertia - self.angular_friction * omega
        ]
    }
}

fn rocket_ocp() -> Ocp<f64> {
    let control_bounds = StageBounds::new(dvector![0.0, -20.0], dvector![2000.0, 20.0]);
    let (vars, bounds) = build_variables(NX, NU, NH, None, Some(&control_bounds)).unwrap();
    let params = build_parameters(NX, NU, NH);

    let q = DVector::from_vec(Q.to_vec());
    let r = DVector::from_vec(R.to_vec());
    let state_cost = tracking_cost(
        vars.states().collect(),
        (params.x_ref(0).start..params.x_ref(NH).end).collect(),
        tile_weights(&q, NH + 1),
    )
    .unwrap();
    let control_cost = tracking_cost(
        vars.controls().collect(),
        (params.u_ref(0).start..params.u_ref(NH - 1).end).collect(),
        tile_weights(&r, NH),
    )
    .unwrap();

    let mut constraints = initial_value(&vars, &params);
    constraints.extend(multiple_shooting(&vars, discretize(Rocket::default(), DT)).unwrap());

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

fn main() {
    env_logger::init();

    let plant = discretize(Rocket::default(), DT);
    let ocp = rocket_ocp();
    let w0 = ocp
        .variables
        .tiled_guess(&plant.model().neutral_state(), &DVector::zeros(NU))
        .unwrap();
    let mut mpc = Nmpc::new(ocp, Some(w0)).unwrap();

    // Hover target at (100, 100)
    let mut x_ref = DMatrix::<f64>::zeros(NX, NH + 1);
    x_ref.rows_mut(0, 2).fill(100.0);
    let u_ref = DMatrix::<f64>::zeros(NU, NH);

    let mut x = plant.model().neutral_state();
    let mut squared_error = 0.0;
    for k in 0..NSIM {
        let u = mpc.control(&x, &x_ref, &u_ref).unwrap();
        debug!(
            "At step {k:3} got position ({:8.3}, {:8.3}), controls {:?}",
            x[0],
            x[1],
            u.as_slice()
        );
        squared_error += (x.rows(0, 2) - x_ref.column(0).rows(0, 2)).norm_squared();
        x = plant.transition(&x, &u);
    }
    squared_error += (x.rows(0, 2) - x_ref.column(0).rows(0, 2)).norm_squared();

    let meta = mpc.metadata();
    let total_time: f64 = meta.computation_times.iter().sum();
    println!("Position MSE: {:.6}", squared_error / (2 * (NSIM + 1)) as f64);
    println!(
        "Solved {} steps in {:.3} s, last status {:?}",
        meta.steps(),
        total_time,
        meta.statuses.last()
    );
}

#[rustfmt::skip]
const Q: [f64; NX] = [1e-2, 1e-2, 0.0, 0.0, 0.0, 1e-3];

#[rustfmt::skip]
const R: [f64; NU] = [1e-6, 1e-4];

//! Nonlinear model predictive control on a direct multiple shooting
//! transcription.
//!
//! A model's ODE is discretized into a stage transition, the layout builder
//! maps the state and control trajectories onto one flat decision vector, and
//! constraint and cost modules produce the pieces of an [`Ocp`]. Two
//! controllers consume it:
//!
//! * [`Nmpc`] re-solves the full NLP every control step with [`SqpSolver`],
//!   warm-started from the shifted previous solution;
//! * [`RtiNmpc`] performs one real-time iteration per step, a single QP
//!   linearized at the current guess and solved with [`AdmmQpSolver`].
//!
//! [`Lqr`] covers the linear-quadratic case with an offline Riccati gain.

pub mod admm;
pub mod constraints;
pub mod controller;
pub mod cost;
pub mod discretize;
pub mod engine;
pub mod error;
pub mod layout;
pub mod linearize;
pub mod lqr;
pub mod metadata;
pub mod nmpc;
pub mod ocp;
pub mod rho;
pub mod rti;
pub mod solver;
pub mod sqp;

pub use admm::{AdmmQpSolver, AdmmSettings};
pub use constraints::{
    Constraint, ConstraintSet, Trajectory, affine, initial_value, linear, multiple_shooting,
    quaternion_product, unit_norm,
};
pub use controller::Controller;
pub use cost::{Objective, TrackingCost, tile_weights, tracking_cost};
pub use discretize::{
    Discretized, ExplicitEuler, Integrator, OdeModel, Rk4, Transition, discrete_linear_system,
    discretize, discretize_with,
};
pub use engine::{Expression, Support};
pub use error::{MismatchKind, OcpError, ShapeMismatch};
pub use layout::{
    Bounds, ParameterLayout, StageBounds, VariableLayout, build_parameters, build_variables,
};
pub use linearize::{Linearization, linearize, linearize_fn};
pub use lqr::{Lqr, LqrStepInfo, RiccatiError, RiccatiSettings, RiccatiSolution, solve_riccati};
pub use metadata::{LogEntry, Metadata, SolverLog};
pub use nmpc::{Nmpc, StepOptions};
pub use ocp::Ocp;
pub use rti::{HessianApproximation, RtiNmpc, RtiSettings};
pub use solver::{NlpSolver, QpProblem, QpSolver, SolverResult, SolverStatus};
pub use sqp::{SqpSettings, SqpSolver};

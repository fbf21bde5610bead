//! Fixed-step discretization of continuous-time models.

use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField, convert};

use crate::engine;

/// A continuous-time dynamic model `x' = f(x, u)`.
pub trait OdeModel<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn state_labels(&self) -> &[&'static str];

    fn control_labels(&self) -> &[&'static str];

    fn num_states(&self) -> usize {
        self.state_labels().len()
    }

    fn num_controls(&self) -> usize {
        self.control_labels().len()
    }

    /// Resting state, used as the default initial guess.
    fn neutral_state(&self) -> DVector<F>;

    fn ode(&self, x: &DVector<F>, u: &DVector<F>) -> DVector<F>;
}

/// One-step integration scheme.
pub trait Integrator<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn integrate<M: OdeModel<F> + ?Sized>(
        &self,
        model: &M,
        x: &DVector<F>,
        u: &DVector<F>,
        h: F,
    ) -> DVector<F>;
}

/// Classic 4th-order Runge-Kutta, four model evaluations per step.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rk4;

impl<F> Integrator<F> for Rk4
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn integrate<M: OdeModel<F> + ?Sized>(
        &self,
        model: &M,
        x: &DVector<F>,
        u: &DVector<F>,
        h: F,
    ) -> DVector<F> {
        let two: F = convert(2.0);
        let six: F = convert(6.0);
        let half = h / two;

        let k1 = model.ode(x, u);
        let k2 = model.ode(&(x + &k1 * half), u);
        let k3 = model.ode(&(x + &k2 * half), u);
        let k4 = model.ode(&(x + &k3 * h), u);
        x + (k1 + k2 * two + k3 * two + k4) * (h / six)
    }
}

/// Explicit (forward) Euler, one model evaluation per step.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitEuler;

impl<F> Integrator<F> for ExplicitEuler
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn integrate<M: OdeModel<F> + ?Sized>(
        &self,
        model: &M,
        x: &DVector<F>,
        u: &DVector<F>,
        h: F,
    ) -> DVector<F> {
        x + model.ode(x, u) * h
    }
}

/// A discrete-time state transition `x_next = phi(x, u)`.
pub trait Transition<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn nx(&self) -> usize;

    fn nu(&self) -> usize;

    fn transition(&self, x: &DVector<F>, u: &DVector<F>) -> DVector<F>;

    /// Integrates from the perturbed state `x + v`.
    fn transition_perturbed(&self, x: &DVector<F>, u: &DVector<F>, v: &DVector<F>) -> DVector<F> {
        self.transition(&(x + v), u)
    }

    /// `(d phi / dx, d phi / du)` at `(x, u)`.
    fn jacobians(&self, x: &DVector<F>, u: &DVector<F>) -> (DMatrix<F>, DMatrix<F>) {
        let (nx, nu) = (self.nx(), self.nu());
        let mut xu = DVector::zeros(nx + nu);
        xu.rows_mut(0, nx).copy_from(x);
        xu.rows_mut(nx, nu).copy_from(u);

        let jac = engine::jacobian(
            |xu| self.transition(&xu.rows(0, nx).into_owned(), &xu.rows(nx, nu).into_owned()),
            &xu,
        );
        (
            jac.columns(0, nx).into_owned(),
            jac.columns(nx, nu).into_owned(),
        )
    }

    /// `(d phi / dx, d phi / du, d phi / dv)` of the perturbed transition.
    fn perturbed_jacobians(
        &self,
        x: &DVector<F>,
        u: &DVector<F>,
        v: &DVector<F>,
    ) -> (DMatrix<F>, DMatrix<F>, DMatrix<F>) {
        let (a, b) = self.jacobians(&(x + v), u);
        (a.clone(), b, a)
    }
}

/// A model discretized with a fixed step size.
#[derive(Debug, Clone)]
pub struct Discretized<F, M, I = Rk4> {
    model: M,
    step_size: F,
    integrator: I,
}

impl<F, M, I> Discretized<F, M, I>
where
    F: Scalar + Copy + SimdRealField + RealField,
    M: OdeModel<F>,
    I: Integrator<F>,
{
    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn step_size(&self) -> F {
        self.step_size
    }
}

impl<F, M, I> Transition<F> for Discretized<F, M, I>
where
    F: Scalar + Copy + SimdRealField + RealField,
    M: OdeModel<F>,
    I: Integrator<F>,
{
    fn nx(&self) -> usize {
        self.model.num_states()
    }

    fn nu(&self) -> usize {
        self.model.num_controls()
    }

    fn transition(&self, x: &DVector<F>, u: &DVector<F>) -> DVector<F> {
        self.integrator.integrate(&self.model, x, u, self.step_size)
    }
}

/// Discretizes `model` with RK4.
pub fn discretize<F, M>(model: M, step_size: F) -> Discretized<F, M, Rk4>
where
    F: Scalar + Copy + SimdRealField + RealField,
    M: OdeModel<F>,
{
    discretize_with(model, step_size, Rk4)
}

/// Discretizes `model` with the given integrator.
pub fn discretize_with<F, M, I>(model: M, step_size: F, integrator: I) -> Discretized<F, M, I>
where
    F: Scalar + Copy + SimdRealField + RealField,
    M: OdeModel<F>,
    I: Integrator<F>,
{
    Discretized {
        model,
        step_size,
        integrator,
    }
}

/// Forward-Euler linearization `(I + dt df/dx, dt df/du)` around
/// `(x_lin, u_lin)`.
pub fn discrete_linear_system<F, M>(
    model: &M,
    x_lin: &DVector<F>,
    u_lin: &DVector<F>,
    dt: F,
) -> (DMatrix<F>, DMatrix<F>)
where
    F: Scalar + Copy + SimdRealField + RealField,
    M: OdeModel<F> + ?Sized,
{
    let nx = x_lin.len();
    let dfdx = engine::jacobian(|x| model.ode(x, u_lin), x_lin);
    let dfdu = engine::jacobian(|u| model.ode(x_lin, u), u_lin);
    (DMatrix::identity(nx, nx) + dfdx * dt, dfdu * dt)
}

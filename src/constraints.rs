//! Constraint generators producing ordered `(expression, lower, upper)`
//! triples, and their concatenation.

use std::ops::Range;
use std::rc::Rc;

use nalgebra::{DMatrix, DVector, Quaternion, RealField, Scalar, SimdRealField, convert};

use crate::discretize::Transition;
use crate::engine::{self, Expression, Support};
use crate::error::OcpError;
use crate::layout::{ParameterLayout, VariableLayout, check_len};

/// One constraint triple `lower <= expr(w, p) <= upper`.
#[derive(Debug)]
pub struct Constraint<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub expr: Box<dyn Expression<F>>,
    pub lower: DVector<F>,
    pub upper: DVector<F>,
}

impl<F> Constraint<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub fn new(expr: Box<dyn Expression<F>>, lower: DVector<F>, upper: DVector<F>) -> Self {
        Self { expr, lower, upper }
    }

    /// Equality `expr(w, p) == 0`.
    pub fn equality(expr: Box<dyn Expression<F>>) -> Self {
        let n = expr.dim();
        Self::new(expr, DVector::zeros(n), DVector::zeros(n))
    }

    pub fn len(&self) -> usize {
        self.expr.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered concatenation of constraint triples.
///
/// The order is fixed at construction; multiplier vectors are indexed
/// against it.
#[derive(Debug)]
pub struct ConstraintSet<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    constraints: Vec<Constraint<F>>,
    offsets: Vec<usize>,
    lower: DVector<F>,
    upper: DVector<F>,
}

impl<F> ConstraintSet<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub fn new(constraints: Vec<Constraint<F>>) -> Result<Self, OcpError> {
        let mut offsets = Vec::with_capacity(constraints.len());
        let mut lower = Vec::new();
        let mut upper = Vec::new();

        for c in &constraints {
            check_len("constraint lower bound", c.len(), c.lower.len())?;
            check_len("constraint upper bound", c.len(), c.upper.len())?;
            if let Some(i) = c.lower.iter().zip(c.upper.iter()).position(|(l, u)| l > u) {
                return Err(OcpError::InvalidBounds {
                    what: "constraint",
                    index: lower.len() + i,
                });
            }
            offsets.push(lower.len());
            lower.extend(c.lower.iter().copied());
            upper.extend(c.upper.iter().copied());
        }

        Ok(Self {
            constraints,
            offsets,
            lower: DVector::from_vec(lower),
            upper: DVector::from_vec(upper),
        })
    }

    /// Total number of constraint components.
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn lower(&self) -> &DVector<F> {
        &self.lower
    }

    pub fn upper(&self) -> &DVector<F> {
        &self.upper
    }

    pub fn constraints(&self) -> &[Constraint<F>] {
        &self.constraints
    }

    /// Flat range of the `i`-th triple.
    pub fn range(&self, i: usize) -> Range<usize> {
        self.offsets[i]..self.offsets[i] + self.constraints[i].len()
    }

    pub(crate) fn validate_support(&self, nw: usize, np: usize) -> Result<(), OcpError> {
        for c in &self.constraints {
            validate_support(c.expr.as_ref(), "constraint", nw, np)?;
        }
        Ok(())
    }

    pub fn eval(&self, w: &DVector<F>, p: &DVector<F>) -> DVector<F> {
        let mut g = DVector::zeros(self.len());
        for (c, &offset) in self.constraints.iter().zip(&self.offsets) {
            let (z, q) = local(c.expr.as_ref(), w, p);
            g.rows_mut(offset, c.len()).copy_from(&c.expr.eval(&z, &q));
        }
        g
    }

    /// `len() x w.len()` Jacobian.
    pub fn jacobian(&self, w: &DVector<F>, p: &DVector<F>) -> DMatrix<F> {
        let mut jac = DMatrix::zeros(self.len(), w.len());
        for (c, &offset) in self.constraints.iter().zip(&self.offsets) {
            let (z, q) = local(c.expr.as_ref(), w, p);
            let local_jac = c.expr.jacobian(&z, &q);
            for (j, &col) in c.expr.support().w.iter().enumerate() {
                for i in 0..c.len() {
                    jac[(offset + i, col)] += local_jac[(i, j)];
                }
            }
        }
        jac
    }

    /// Hessian of `lambda^T g(w, p)` with respect to `w`.
    pub fn hessian(&self, w: &DVector<F>, p: &DVector<F>, lambda: &DVector<F>) -> DMatrix<F> {
        let mut hess = DMatrix::zeros(w.len(), w.len());
        for (c, &offset) in self.constraints.iter().zip(&self.offsets) {
            let weights = lambda.rows(offset, c.len()).into_owned();
            if weights.iter().all(|l| *l == F::zero()) {
                continue;
            }
            let (z, q) = local(c.expr.as_ref(), w, p);
            scatter_square(&mut hess, &c.expr.support().w, &c.expr.hessian(&z, &q, &weights));
        }
        hess
    }
}

pub(crate) fn local<F>(
    expr: &dyn Expression<F>,
    w: &DVector<F>,
    p: &DVector<F>,
) -> (DVector<F>, DVector<F>)
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    let support = expr.support();
    (engine::gather(w, &support.w), engine::gather(p, &support.p))
}

pub(crate) fn scatter_square<F>(target: &mut DMatrix<F>, indices: &[usize], local: &DMatrix<F>)
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    for (i, &row) in indices.iter().enumerate() {
        for (j, &col) in indices.iter().enumerate() {
            target[(row, col)] += local[(i, j)];
        }
    }
}

pub(crate) fn validate_support<F>(
    expr: &dyn Expression<F>,
    what: &'static str,
    nw: usize,
    np: usize,
) -> Result<(), OcpError>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    let support = expr.support();
    for (indices, len) in [(&support.w, nw), (&support.p, np)] {
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(OcpError::SupportOutOfRange { what, index, len });
        }
    }
    Ok(())
}

/// `x[:, 0] - x_cur`
#[derive(Debug)]
struct InitialValue {
    support: Support,
}

impl<F> Expression<F> for InitialValue
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn dim(&self) -> usize {
        self.support.w.len()
    }

    fn support(&self) -> &Support {
        &self.support
    }

    fn eval(&self, z: &DVector<F>, q: &DVector<F>) -> DVector<F> {
        z - q
    }

    fn jacobian(&self, z: &DVector<F>, _q: &DVector<F>) -> DMatrix<F> {
        DMatrix::identity(z.len(), z.len())
    }

    fn hessian(&self, z: &DVector<F>, _q: &DVector<F>, _lambda: &DVector<F>) -> DMatrix<F> {
        DMatrix::zeros(z.len(), z.len())
    }
}

/// Pins the first predicted state to the current state estimate.
pub fn initial_value<F>(vars: &VariableLayout, params: &ParameterLayout) -> Vec<Constraint<F>>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    let support = Support::new(vars.state(0).collect(), params.x_cur().collect());
    vec![Constraint::equality(Box::new(InitialValue { support }))]
}

/// `x[:, k + 1] - phi(x[:, k], u[:, k])` over the local vector
/// `[x_k; u_k; x_{k+1}]`.
struct ShootingGap<F, T: ?Sized> {
    transition: Rc<T>,
    nx: usize,
    nu: usize,
    support: Support,
    _scalar: std::marker::PhantomData<F>,
}

impl<F, T> Expression<F> for ShootingGap<F, T>
where
    F: Scalar + Copy + SimdRealField + RealField,
    T: Transition<F> + ?Sized,
{
    fn dim(&self) -> usize {
        self.nx
    }

    fn support(&self) -> &Support {
        &self.support
    }

    fn eval(&self, z: &DVector<F>, _q: &DVector<F>) -> DVector<F> {
        let (nx, nu) = (self.nx, self.nu);
        let x = z.rows(0, nx).into_owned();
        let u = z.rows(nx, nu).into_owned();
        z.rows(nx + nu, nx) - self.transition.transition(&x, &u)
    }

    fn jacobian(&self, z: &DVector<F>, _q: &DVector<F>) -> DMatrix<F> {
        let (nx, nu) = (self.nx, self.nu);
        let x = z.rows(0, nx).into_owned();
        let u = z.rows(nx, nu).into_owned();
        let (a, b) = self.transition.jacobians(&x, &u);

        let mut jac = DMatrix::zeros(nx, 2 * nx + nu);
        jac.columns_mut(0, nx).copy_from(&(-a));
        jac.columns_mut(nx, nu).copy_from(&(-b));
        jac.columns_mut(nx + nu, nx).fill_with_identity();
        jac
    }

    fn hessian(&self, z: &DVector<F>, _q: &DVector<F>, lambda: &DVector<F>) -> DMatrix<F> {
        // The x_{k+1} term is linear; only the transition contributes.
        let (nx, nu) = (self.nx, self.nu);
        let xu = z.rows(0, nx + nu).into_owned();
        let curvature = engine::hessian(
            |xu| {
                let x_next = self
                    .transition
                    .transition(&xu.rows(0, nx).into_owned(), &xu.rows(nx, nu).into_owned());
                -lambda.dot(&x_next)
            },
            &xu,
        );

        let mut hess = DMatrix::zeros(z.len(), z.len());
        hess.view_mut((0, 0), (nx + nu, nx + nu)).copy_from(&curvature);
        hess
    }
}

/// Direct multiple shooting: one dynamics-consistency equality per stage, in
/// stage order.
pub fn multiple_shooting<F, T>(vars: &VariableLayout, transition: T) -> Result<Vec<Constraint<F>>, OcpError>
where
    F: Scalar + Copy + SimdRealField + RealField,
    T: Transition<F> + 'static,
{
    check_len("transition state dimension", vars.nx(), transition.nx())?;
    check_len("transition control dimension", vars.nu(), transition.nu())?;

    let transition = Rc::new(transition);
    Ok((0..vars.horizon())
        .map(|k| {
            let w = vars
                .state(k)
                .chain(vars.control(k))
                .chain(vars.state(k + 1))
                .collect();
            Constraint::equality(Box::new(ShootingGap {
                transition: Rc::clone(&transition),
                nx: vars.nx(),
                nu: vars.nu(),
                support: Support::decision(w),
                _scalar: std::marker::PhantomData,
            }) as Box<dyn Expression<F>>)
        })
        .collect())
}

/// `A * w[indices]`
#[derive(Debug)]
struct Linear<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    a: DMatrix<F>,
    support: Support,
}

impl<F> Expression<F> for Linear<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn dim(&self) -> usize {
        self.a.nrows()
    }

    fn support(&self) -> &Support {
        &self.support
    }

    fn eval(&self, z: &DVector<F>, _q: &DVector<F>) -> DVector<F> {
        &self.a * z
    }

    fn jacobian(&self, _z: &DVector<F>, _q: &DVector<F>) -> DMatrix<F> {
        self.a.clone()
    }

    fn hessian(&self, z: &DVector<F>, _q: &DVector<F>, _lambda: &DVector<F>) -> DMatrix<F> {
        DMatrix::zeros(z.len(), z.len())
    }
}

/// `lower <= A * w[indices] <= upper`
pub fn linear<F>(
    indices: Vec<usize>,
    a: DMatrix<F>,
    lower: DVector<F>,
    upper: DVector<F>,
) -> Result<Vec<Constraint<F>>, OcpError>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    check_len("linear constraint columns", indices.len(), a.ncols())?;
    check_len("linear constraint lower bound", a.nrows(), lower.len())?;
    check_len("linear constraint upper bound", a.nrows(), upper.len())?;

    let expr = Linear {
        a,
        support: Support::decision(indices),
    };
    Ok(vec![Constraint::new(Box::new(expr), lower, upper)])
}

/// `lower <= A * w[indices] + b <= upper`, stored as a linear constraint with
/// bounds shifted by `-b`.
pub fn affine<F>(
    indices: Vec<usize>,
    a: DMatrix<F>,
    b: &DVector<F>,
    lower: DVector<F>,
    upper: DVector<F>,
) -> Result<Vec<Constraint<F>>, OcpError>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    check_len("affine constraint offset", a.nrows(), b.len())?;
    check_len("affine constraint lower bound", a.nrows(), lower.len())?;
    check_len("affine constraint upper bound", a.nrows(), upper.len())?;
    linear(indices, a, lower - b, upper - b)
}

/// Which trajectory a per-stage constraint reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trajectory {
    States,
    Controls,
}

/// `|z|^2 - 1`
#[derive(Debug)]
struct UnitNorm {
    support: Support,
}

impl<F> Expression<F> for UnitNorm
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    fn dim(&self) -> usize {
        1
    }

    fn support(&self) -> &Support {
        &self.support
    }

    fn eval(&self, z: &DVector<F>, _q: &DVector<F>) -> DVector<F> {
        DVector::from_element(1, z.norm_squared() - F::one())
    }

    fn jacobian(&self, z: &DVector<F>, _q: &DVector<F>) -> DMatrix<F> {
        let two: F = convert(2.0);
        DMatrix::from_row_slice(1, z.len(), (z * two).as_slice())
    }

    fn hessian(&self, z: &DVector<F>, _q: &DVector<F>, lambda: &DVector<F>) -> DMatrix<F> {
        let two: F = convert(2.0);
        DMatrix::identity(z.len(), z.len()) * (two * lambda[0])
    }
}

/// Per-stage unit-norm equality on `components` of the chosen trajectory,
/// e.g. keeping a quaternion inside the control vector normalized.
pub fn unit_norm<F>(
    vars: &VariableLayout,
    trajectory: Trajectory,
    components: Range<usize>,
) -> Result<Vec<Constraint<F>>, OcpError>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    let (width, stages) = match trajectory {
        Trajectory::States => (vars.nx(), vars.horizon() + 1),
        Trajectory::Controls => (vars.nu(), vars.horizon()),
    };
    if components.end > width {
        return Err(OcpError::SupportOutOfRange {
            what: "unit-norm components",
            index: components.end - 1,
            len: width,
        });
    }

    Ok((0..stages)
        .map(|k| {
            let stage = match trajectory {
                Trajectory::States => vars.state(k),
                Trajectory::Controls => vars.control(k),
            };
            let w = components.clone().map(|i| stage.start + i).collect();
            Constraint::equality(Box::new(UnitNorm {
                support: Support::decision(w),
            }) as Box<dyn Expression<F>>)
        })
        .collect())
}

/// Hamilton product `a * b` of quaternions stored as `[w, x, y, z]`, real
/// part first.
pub fn quaternion_product<F>(a: &DVector<F>, b: &DVector<F>) -> Result<DVector<F>, OcpError>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    check_len("left quaternion", 4, a.len())?;
    check_len("right quaternion", 4, b.len())?;
    let r = Quaternion::new(a[0], a[1], a[2], a[3]) * Quaternion::new(b[0], b[1], b[2], b[3]);
    Ok(DVector::from_column_slice(&[r.w, r.i, r.j, r.k]))
}

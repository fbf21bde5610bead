use nalgebra::{RealField, Scalar, SimdRealField};

use crate::constraints::{Constraint, ConstraintSet};
use crate::cost::Objective;
use crate::engine::Expression;
use crate::error::OcpError;
use crate::layout::{Bounds, ParameterLayout, VariableLayout, check_len};

/// A transcribed optimal control problem: layouts, bounds, objective and
/// constraints, immutable once assembled.
#[derive(Debug)]
pub struct Ocp<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub variables: VariableLayout,
    pub bounds: Bounds<F>,
    pub parameters: ParameterLayout,
    pub objective: Objective<F>,
    pub constraints: ConstraintSet<F>,
}

impl<F> Ocp<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    /// Assembles the problem, checking that bounds and parameters match the
    /// variable layout and that every term reads inside `w` and `p`.
    pub fn new(
        variables: VariableLayout,
        bounds: Bounds<F>,
        parameters: ParameterLayout,
        costs: Vec<Box<dyn Expression<F>>>,
        constraints: Vec<Constraint<F>>,
    ) -> Result<Self, OcpError> {
        check_len("lower variable bounds", variables.len(), bounds.lower.len())?;
        check_len("upper variable bounds", variables.len(), bounds.upper.len())?;
        check_len("parameter state dimension", variables.nx(), parameters.nx())?;
        check_len("parameter control dimension", variables.nu(), parameters.nu())?;
        check_len("parameter horizon", variables.horizon(), parameters.horizon())?;

        let objective = Objective::new(costs)?;
        let constraints = ConstraintSet::new(constraints)?;
        objective.validate_support(variables.len(), parameters.len())?;
        constraints.validate_support(variables.len(), parameters.len())?;

        Ok(Self {
            variables,
            bounds,
            parameters,
            objective,
            constraints,
        })
    }

    pub fn nx(&self) -> usize {
        self.variables.nx()
    }

    pub fn nu(&self) -> usize {
        self.variables.nu()
    }

    pub fn horizon(&self) -> usize {
        self.variables.horizon()
    }
}

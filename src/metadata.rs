//! Per-step solver history and its exported table.

use std::time::Duration;

use nalgebra::{DMatrix, RealField, Scalar, SimdRealField};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::layout::VariableLayout;
use crate::solver::{SolverResult, SolverStatus};

/// One `step` call: the solve output and how long it took.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry<F>
where
    F: Scalar,
{
    pub result: SolverResult<F>,
    pub duration: Duration,
}

/// Append-only solver history owned by a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverLog<F>
where
    F: Scalar,
{
    entries: Vec<LogEntry<F>>,
}

impl<F> Default for SolverLog<F>
where
    F: Scalar,
{
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<F> SolverLog<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub fn push(&mut self, result: SolverResult<F>, duration: Duration) {
        self.entries.push(LogEntry { result, duration });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry<F>] {
        &self.entries
    }

    pub fn last(&self) -> Option<&LogEntry<F>> {
        self.entries.last()
    }

    /// Flattens the history into the exported table. Every sequence has one
    /// element per logged step.
    pub fn export(&self, controller_name: &str, variables: &VariableLayout) -> Metadata<F> {
        let mut meta = Metadata {
            controller_name: controller_name.to_owned(),
            num_states: variables.nx(),
            num_controls: variables.nu(),
            horizon_length: variables.horizon(),
            residuals: Vec::with_capacity(self.len()),
            solution_states: Vec::with_capacity(self.len()),
            solution_controls: Vec::with_capacity(self.len()),
            statuses: Vec::with_capacity(self.len()),
            computation_times: Vec::with_capacity(self.len()),
        };
        for entry in &self.entries {
            let (x, u) = variables.split(&entry.result.x);
            meta.residuals.push(entry.result.f);
            meta.solution_states.push(x);
            meta.solution_controls.push(u);
            meta.statuses.push(entry.result.status);
            meta.computation_times.push(entry.duration.as_secs_f64());
        }
        meta
    }
}

/// Exported controller history.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Metadata<F>
where
    F: Scalar,
{
    pub controller_name: String,
    pub num_states: usize,
    pub num_controls: usize,
    pub horizon_length: usize,
    /// Objective value per step.
    pub residuals: Vec<F>,
    /// Predicted states per step, `num_states x (horizon_length + 1)`.
    pub solution_states: Vec<DMatrix<F>>,
    /// Predicted controls per step, `num_controls x horizon_length`.
    pub solution_controls: Vec<DMatrix<F>>,
    pub statuses: Vec<SolverStatus>,
    /// Wall-clock seconds per step.
    pub computation_times: Vec<f64>,
}

impl<F> Metadata<F>
where
    F: Scalar,
{
    /// Number of logged steps.
    pub fn steps(&self) -> usize {
        self.residuals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn result(vars: &VariableLayout, value: f64) -> SolverResult<f64> {
        SolverResult {
            x: DVector::from_element(vars.len(), value),
            f: value,
            lam_g: DVector::zeros(0),
            lam_x: DVector::zeros(vars.len()),
            status: SolverStatus::Solved,
            iterations: 1,
        }
    }

    #[test]
    fn empty_log_exports_empty_sequences() {
        let vars = VariableLayout::new(3, 2, 4);
        let meta = SolverLog::<f64>::default().export("NMPC", &vars);
        assert_eq!(meta.controller_name, "NMPC");
        assert_eq!((meta.num_states, meta.num_controls, meta.horizon_length), (3, 2, 4));
        assert_eq!(meta.steps(), 0);
        assert!(meta.solution_states.is_empty());
        assert!(meta.computation_times.is_empty());
    }

    #[test]
    fn export_grows_along_the_step_axis() {
        let vars = VariableLayout::new(3, 2, 4);
        let mut log = SolverLog::default();
        log.push(result(&vars, 1.0), Duration::from_millis(5));
        log.push(result(&vars, 2.0), Duration::from_millis(7));

        let meta = log.export("RTI_NMPC", &vars);
        assert_eq!(meta.steps(), 2);
        assert_eq!(meta.residuals, vec![1.0, 2.0]);
        assert_eq!(meta.solution_states[1].shape(), (3, 5));
        assert_eq!(meta.solution_controls[0].shape(), (2, 4));
        assert_eq!(meta.computation_times, vec![0.005, 0.007]);
        assert_eq!(meta.statuses, vec![SolverStatus::Solved; 2]);

        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.export("RTI_NMPC", &vars).steps(), 0);
    }
}

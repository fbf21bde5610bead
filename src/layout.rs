//! Named-block layouts over flat decision and parameter vectors.

use std::ops::Range;

use nalgebra::{DMatrix, DVector, RealField, Scalar, SimdRealField, convert};

use crate::error::{MismatchKind, OcpError, ShapeMismatch};

/// One named matrix block stored column-major at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: &'static str,
    pub rows: usize,
    pub cols: usize,
    pub offset: usize,
}

impl Block {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Flat range of column `col`.
    pub fn column(&self, col: usize) -> Range<usize> {
        let start = self.offset + col * self.rows;
        start..start + self.rows
    }
}

/// Ordered named blocks concatenated into one flat vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    blocks: Vec<Block>,
    len: usize,
}

impl BlockLayout {
    pub fn new(entries: &[(&'static str, usize, usize)]) -> Self {
        let mut offset = 0;
        let blocks = entries
            .iter()
            .map(|&(name, rows, cols)| {
                let block = Block {
                    name,
                    rows,
                    cols,
                    offset,
                };
                offset += rows * cols;
                block
            })
            .collect();
        Self {
            blocks,
            len: offset,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Flattens named values into one vector.
    ///
    /// The supplied keys must cover every block exactly once with matching
    /// shapes. Otherwise every offending key is reported; nothing is
    /// truncated or padded.
    pub fn fill<F>(&self, values: &[(&str, DMatrix<F>)]) -> Result<DVector<F>, OcpError>
    where
        F: Scalar + Copy + SimdRealField + RealField,
    {
        let mut mismatches = Vec::new();

        for block in &self.blocks {
            let mut supplied = values.iter().filter(|(key, _)| *key == block.name);
            match (supplied.next(), supplied.next()) {
                (None, _) => mismatches.push(ShapeMismatch {
                    key: block.name.to_string(),
                    kind: MismatchKind::Missing,
                    expected: Some(block.shape()),
                    supplied: None,
                }),
                (Some(_), Some((_, dup))) => mismatches.push(ShapeMismatch {
                    key: block.name.to_string(),
                    kind: MismatchKind::Duplicate,
                    expected: Some(block.shape()),
                    supplied: Some(dup.shape()),
                }),
                (Some((_, value)), None) if value.shape() != block.shape() => {
                    mismatches.push(ShapeMismatch {
                        key: block.name.to_string(),
                        kind: MismatchKind::Shape,
                        expected: Some(block.shape()),
                        supplied: Some(value.shape()),
                    })
                }
                _ => {}
            }
        }
        for (key, value) in values {
            if self.block(key).is_none() {
                mismatches.push(ShapeMismatch {
                    key: key.to_string(),
                    kind: MismatchKind::Unexpected,
                    expected: None,
                    supplied: Some(value.shape()),
                });
            }
        }
        if !mismatches.is_empty() {
            return Err(OcpError::ShapeMismatch(mismatches));
        }

        let mut flat = DVector::zeros(self.len);
        for block in &self.blocks {
            // Validated above: exactly one value per block.
            if let Some((_, value)) = values.iter().find(|(key, _)| *key == block.name) {
                flat.rows_mut(block.offset, block.len())
                    .copy_from_slice(value.as_slice());
            }
        }
        Ok(flat)
    }

    /// Reshapes the block `name` of `flat` back into a matrix.
    pub fn extract<F>(&self, name: &str, flat: &DVector<F>) -> Option<DMatrix<F>>
    where
        F: Scalar + Copy + SimdRealField + RealField,
    {
        let block = self.block(name)?;
        Some(DMatrix::from_column_slice(
            block.rows,
            block.cols,
            &flat.as_slice()[block.range()],
        ))
    }
}

/// Per-component bound pair applied at every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageBounds<F>
where
    F: Scalar,
{
    pub lower: DVector<F>,
    pub upper: DVector<F>,
}

impl<F> StageBounds<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub fn new(lower: DVector<F>, upper: DVector<F>) -> Self {
        Self { lower, upper }
    }

    /// `(-inf, +inf)` for `n` components.
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: DVector::from_element(n, convert(f64::NEG_INFINITY)),
            upper: DVector::from_element(n, convert(f64::INFINITY)),
        }
    }

    fn validate(&self, what: &'static str, n: usize) -> Result<(), OcpError> {
        for len in [self.lower.len(), self.upper.len()] {
            if len != n {
                return Err(OcpError::Dimension {
                    what,
                    expected: n,
                    got: len,
                });
            }
        }
        match self.lower.iter().zip(self.upper.iter()).position(|(l, u)| l > u) {
            Some(index) => Err(OcpError::InvalidBounds { what, index }),
            None => Ok(()),
        }
    }
}

/// Lower and upper bounds on the full decision vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds<F>
where
    F: Scalar,
{
    pub lower: DVector<F>,
    pub upper: DVector<F>,
}

impl<F> Bounds<F>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Projects `w` into the box.
    pub fn clamp(&self, w: &DVector<F>) -> DVector<F> {
        w.zip_zip_map(&self.lower, &self.upper, |w, l, u| w.clamp(l, u))
    }
}

/// Decision-variable layout of direct multiple shooting: the state trajectory
/// `x` (`nx x (m + 1)`) followed by the control trajectory `u` (`nu x m`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableLayout {
    nx: usize,
    nu: usize,
    m: usize,
    blocks: BlockLayout,
}

impl VariableLayout {
    pub fn new(nx: usize, nu: usize, m: usize) -> Self {
        Self {
            nx,
            nu,
            m,
            blocks: BlockLayout::new(&[("x", nx, m + 1), ("u", nu, m)]),
        }
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn nu(&self) -> usize {
        self.nu
    }

    /// Horizon length `m`.
    pub fn horizon(&self) -> usize {
        self.m
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &BlockLayout {
        &self.blocks
    }

    /// Flat range of state stage `k` in `0..=m`.
    pub fn state(&self, k: usize) -> Range<usize> {
        let start = k * self.nx;
        start..start + self.nx
    }

    /// Flat range of control stage `k` in `0..m`.
    pub fn control(&self, k: usize) -> Range<usize> {
        let start = self.nx * (self.m + 1) + k * self.nu;
        start..start + self.nu
    }

    pub fn states(&self) -> Range<usize> {
        0..self.nx * (self.m + 1)
    }

    pub fn controls(&self) -> Range<usize> {
        self.nx * (self.m + 1)..self.len()
    }

    /// Reshapes `w` into the `nx x (m + 1)` state and `nu x m` control
    /// trajectories.
    pub fn split<F>(&self, w: &DVector<F>) -> (DMatrix<F>, DMatrix<F>)
    where
        F: Scalar + Copy + SimdRealField + RealField,
    {
        let x = self.blocks.extract("x", w);
        let u = self.blocks.extract("u", w);
        (
            x.unwrap_or_else(|| DMatrix::zeros(self.nx, self.m + 1)),
            u.unwrap_or_else(|| DMatrix::zeros(self.nu, self.m)),
        )
    }

    /// Constant guess holding `x0` at every state stage and `u0` at every
    /// control stage.
    pub fn tiled_guess<F>(&self, x0: &DVector<F>, u0: &DVector<F>) -> Result<DVector<F>, OcpError>
    where
        F: Scalar + Copy + SimdRealField + RealField,
    {
        check_len("initial state guess", self.nx, x0.len())?;
        check_len("initial control guess", self.nu, u0.len())?;

        let mut w = DVector::zeros(self.len());
        for k in 0..=self.m {
            w.rows_mut(k * self.nx, self.nx).copy_from(x0);
        }
        for k in 0..self.m {
            w.rows_mut(self.control(k).start, self.nu).copy_from(u0);
        }
        Ok(w)
    }
}

/// Parameter layout: current state `x_cur` (`nx x 1`), reference states
/// `x_ref` (`nx x (m + 1)`) and reference controls `u_ref` (`nu x m`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterLayout {
    nx: usize,
    nu: usize,
    m: usize,
    blocks: BlockLayout,
}

impl ParameterLayout {
    pub fn new(nx: usize, nu: usize, m: usize) -> Self {
        Self {
            nx,
            nu,
            m,
            blocks: BlockLayout::new(&[("x_cur", nx, 1), ("x_ref", nx, m + 1), ("u_ref", nu, m)]),
        }
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn nu(&self) -> usize {
        self.nu
    }

    pub fn horizon(&self) -> usize {
        self.m
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &BlockLayout {
        &self.blocks
    }

    pub fn x_cur(&self) -> Range<usize> {
        0..self.nx
    }

    /// Flat range of reference state stage `k` in `0..=m`.
    pub fn x_ref(&self, k: usize) -> Range<usize> {
        let start = self.nx + k * self.nx;
        start..start + self.nx
    }

    /// Flat range of reference control stage `k` in `0..m`.
    pub fn u_ref(&self, k: usize) -> Range<usize> {
        let start = self.nx * (self.m + 2) + k * self.nu;
        start..start + self.nu
    }

    /// The whole reference block, ordered like the decision vector.
    pub fn references(&self) -> Range<usize> {
        self.nx..self.len()
    }

    /// Rejects an already flattened parameter vector of the wrong length.
    pub fn check<F>(&self, p: &DVector<F>) -> Result<(), OcpError>
    where
        F: Scalar + Copy + SimdRealField + RealField,
    {
        if p.len() == self.len() {
            return Ok(());
        }
        Err(OcpError::ShapeMismatch(vec![ShapeMismatch {
            key: "p".to_string(),
            kind: MismatchKind::Shape,
            expected: Some((self.len(), 1)),
            supplied: Some((p.len(), 1)),
        }]))
    }

    /// Flattens named parameter values, see [`BlockLayout::fill`].
    pub fn fill<F>(&self, values: &[(&str, DMatrix<F>)]) -> Result<DVector<F>, OcpError>
    where
        F: Scalar + Copy + SimdRealField + RealField,
    {
        self.blocks.fill(values)
    }

    /// Flattens the three standard blocks.
    pub fn values<F>(
        &self,
        x_cur: &DVector<F>,
        x_ref: &DMatrix<F>,
        u_ref: &DMatrix<F>,
    ) -> Result<DVector<F>, OcpError>
    where
        F: Scalar + Copy + SimdRealField + RealField,
    {
        self.fill(&[
            (
                "x_cur",
                DMatrix::from_column_slice(x_cur.len(), 1, x_cur.as_slice()),
            ),
            ("x_ref", x_ref.clone()),
            ("u_ref", u_ref.clone()),
        ])
    }
}

/// Builds the decision-variable layout and its bounds, broadcasting the
/// per-stage bound pairs over the horizon.
pub fn build_variables<F>(
    nx: usize,
    nu: usize,
    m: usize,
    state_bounds: Option<&StageBounds<F>>,
    control_bounds: Option<&StageBounds<F>>,
) -> Result<(VariableLayout, Bounds<F>), OcpError>
where
    F: Scalar + Copy + SimdRealField + RealField,
{
    let layout = VariableLayout::new(nx, nu, m);

    let state_bounds = state_bounds.cloned().unwrap_or_else(|| StageBounds::unbounded(nx));
    let control_bounds = control_bounds
        .cloned()
        .unwrap_or_else(|| StageBounds::unbounded(nu));
    state_bounds.validate("state bounds", nx)?;
    control_bounds.validate("control bounds", nu)?;

    let mut lower = DVector::zeros(layout.len());
    let mut upper = DVector::zeros(layout.len());
    for k in 0..=m {
        let r = layout.state(k);
        lower.rows_mut(r.start, nx).copy_from(&state_bounds.lower);
        upper.rows_mut(r.start, nx).copy_from(&state_bounds.upper);
    }
    for k in 0..m {
        let r = layout.control(k);
        lower.rows_mut(r.start, nu).copy_from(&control_bounds.lower);
        upper.rows_mut(r.start, nu).copy_from(&control_bounds.upper);
    }

    Ok((layout, Bounds { lower, upper }))
}

pub fn build_parameters(nx: usize, nu: usize, m: usize) -> ParameterLayout {
    ParameterLayout::new(nx, nu, m)
}

pub(crate) fn check_len(what: &'static str, expected: usize, got: usize) -> Result<(), OcpError> {
    if expected == got {
        Ok(())
    } else {
        Err(OcpError::Dimension {
            what,
            expected,
            got,
        })
    }
}

use std::fmt;

use thiserror::Error;

use crate::lqr::RiccatiError;

/// Errors raised while assembling an OCP or running a controller step.
#[derive(Debug, Error)]
pub enum OcpError {
    #[error("shape mismatch: {}", DisplayList(.0))]
    ShapeMismatch(Vec<ShapeMismatch>),

    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    Dimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("lower bound exceeds upper bound for {what} at component {index}")]
    InvalidBounds { what: &'static str, index: usize },

    #[error("{what} reads index {index} of a vector of length {len}")]
    SupportOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("parameter vector contains NaN at index {index}")]
    NumericInvalid { index: usize },

    #[error(transparent)]
    Riccati(#[from] RiccatiError),
}

/// Why one named block failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    /// The layout has the key but no value was supplied.
    Missing,
    /// A value was supplied for a key the layout does not know.
    Unexpected,
    /// The key was supplied more than once.
    Duplicate,
    /// The supplied shape differs from the layout entry.
    Shape,
}

/// One offending (key, expected shape, supplied shape) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub key: String,
    pub kind: MismatchKind,
    pub expected: Option<(usize, usize)>,
    pub supplied: Option<(usize, usize)>,
}

impl fmt::Display for ShapeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = |s: Option<(usize, usize)>| match s {
            Some((r, c)) => format!("{r}x{c}"),
            None => "none".to_string(),
        };
        write!(
            f,
            "'{}' ({:?}): expected {}, supplied {}",
            self.key,
            self.kind,
            shape(self.expected),
            shape(self.supplied)
        )
    }
}

struct DisplayList<'a>(&'a [ShapeMismatch]);

impl fmt::Display for DisplayList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{m}")?;
        }
        Ok(())
    }
}

use thiserror::Error;

use crate::specobj::ReadinessError;

/// Errors raised while finding or linking objects.
///
/// Running out of objects is not an error: the finders return an empty
/// collection in that case.
#[derive(Error, Debug)]
pub enum ObjFindError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Number of unique slit ids in the slit mask ({found}) does not match the number of orders ({expected})")]
    OrderCountMismatch { found: usize, expected: usize },

    #[error("Shape mismatch for {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("Object {objid} has {count} members on order index {order}")]
    DuplicateOrderMember {
        objid: usize,
        order: usize,
        count: usize,
    },

    #[error("Object {name} is not ready for extraction: {source}")]
    NotReady {
        name: String,
        #[source]
        source: ReadinessError,
    },
}

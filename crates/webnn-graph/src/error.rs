//! Error types for graph construction and validation

use crate::data_type::DataType;
use crate::operand::{OperandId, OperandKind};

/// Result type for graph validation
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Shape arithmetic failures, independent of any graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// Two shapes cannot be broadcast together
    #[error("shapes {lhs:?} and {rhs:?} are not broadcast-compatible at dimension {axis}")]
    NotBroadcastable { lhs: Vec<u32>, rhs: Vec<u32>, axis: usize },

    /// A dimension pair with a zero-sized side
    #[error("shapes {lhs:?} and {rhs:?} pair a zero-sized dimension at {axis}")]
    ZeroSizedDimension { lhs: Vec<u32>, rhs: Vec<u32>, axis: usize },

    /// Element or byte count does not fit in usize
    #[error("element count of {0:?} overflows")]
    Overflow(Vec<u32>),

    /// Permutation is not a permutation of `0..rank`
    #[error("invalid permutation {permutation:?} for rank {rank}")]
    InvalidPermutation { permutation: Vec<u32>, rank: usize },

    /// Reshape changes the number of elements
    #[error("cannot reshape {from:?} ({from_count} elements) to {to:?} ({to_count} elements)")]
    ElementCountMismatch {
        from: Vec<u32>,
        to: Vec<u32>,
        from_count: usize,
        to_count: usize,
    },

    /// Rank does not match what the operation needs
    #[error("expected rank {expected}, got {actual}")]
    RankMismatch { expected: usize, actual: usize },

    /// Element type is not accepted
    #[error("unexpected data type {actual}, expected {expected}")]
    DataTypeMismatch { expected: String, actual: DataType },

    /// Any other attribute problem
    #[error("{0}")]
    Invalid(String),
}

impl ShapeError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Structural problems found by [`crate::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Operand table, operator list or output list is empty
    #[error("graph has no {0}")]
    Empty(&'static str),

    /// An id does not resolve in the operand table
    #[error("operand {0} is not in the operand table")]
    UnknownOperand(OperandId),

    /// Byte length of an operand is not representable
    #[error("operand {id}: byte length of {dimensions:?} x {data_type} overflows")]
    ByteLengthOverflow {
        id: OperandId,
        dimensions: Vec<u32>,
        data_type: DataType,
    },

    /// A constant's payload length disagrees with its descriptor
    #[error("constant operand {id} has {actual} bytes, expected {expected}")]
    ConstantLength { id: OperandId, expected: usize, actual: usize },

    /// A constant operand has no payload
    #[error("constant operand {0} has no data")]
    MissingConstantData(OperandId),

    /// Operand kind is wrong for where it is used
    #[error("operand {id} is {actual}, expected {expected}")]
    UnexpectedKind {
        id: OperandId,
        expected: &'static str,
        actual: OperandKind,
    },

    /// Input or output operand without a usable name
    #[error("operand {0} must have a non-empty name")]
    MissingName(OperandId),

    /// Two inputs or two outputs share a name
    #[error("name {0:?} is bound to more than one operand")]
    DuplicateName(String),

    /// Operator reads an operand that no earlier step produced
    #[error("operator {index} ({operator}) reads operand {operand} before it is produced")]
    NotTopological {
        index: usize,
        operator: &'static str,
        operand: OperandId,
    },

    /// Operand written by more than one operator
    #[error("operand {0} is produced more than once")]
    MultipleProducers(OperandId),

    /// Graph output without a producing operator
    #[error("output operand {0} is never produced")]
    OutputNotProduced(OperandId),

    /// Operator specific rule violated
    #[error("operator {index} ({operator}): {source}")]
    InvalidOperator {
        index: usize,
        operator: &'static str,
        #[source]
        source: ShapeError,
    },

    /// Declared output type differs from the inferred one
    #[error("operand {id} is declared {declared} but {operator} produces {inferred}")]
    DataTypeMismatch {
        id: OperandId,
        operator: &'static str,
        declared: DataType,
        inferred: DataType,
    },

    /// Declared output shape differs from the inferred one
    #[error("operand {id} is declared {declared:?} but {operator} produces {inferred:?}")]
    ShapeMismatch {
        id: OperandId,
        operator: &'static str,
        declared: Vec<u32>,
        inferred: Vec<u32>,
    },

    /// Graph JSON could not be parsed
    #[error("malformed graph description: {0}")]
    Malformed(String),
}

impl ValidationError {
    pub fn invalid_operator(index: usize, operator: &'static str, source: ShapeError) -> Self {
        Self::InvalidOperator {
            index,
            operator,
            source,
        }
    }
}

//! Operands: the data nodes of a graph

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data_type::DataType;
use crate::shape;

/// Identifier of an operand, unique within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperandId(u64);

impl OperandId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role an operand plays in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperandKind {
    Input,
    Constant,
    Output,
    Intermediate,
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperandKind::Input => "input",
            OperandKind::Constant => "constant",
            OperandKind::Output => "output",
            OperandKind::Intermediate => "intermediate",
        };
        f.write_str(name)
    }
}

/// One tensor slot in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    pub kind: OperandKind,
    pub data_type: DataType,
    /// Empty for scalars
    #[serde(default)]
    pub dimensions: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Operand {
    pub fn new(kind: OperandKind, data_type: DataType, dimensions: impl Into<Vec<u32>>) -> Self {
        Self {
            kind,
            data_type,
            dimensions: dimensions.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Packed byte length, `None` if it overflows.
    pub fn byte_length(&self) -> Option<usize> {
        shape::byte_length(&self.dimensions, self.data_type)
    }

    /// Name if present and non-empty.
    pub fn non_empty_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_length_uses_element_size() {
        let operand = Operand::new(OperandKind::Input, DataType::Float16, [1, 2, 3]);
        assert_eq!(operand.byte_length(), Some(12));
        assert_eq!(operand.rank(), 3);
    }

    #[test]
    fn scalar_has_one_element() {
        let operand = Operand::new(OperandKind::Constant, DataType::Int64, []);
        assert_eq!(operand.byte_length(), Some(8));
    }

    #[test]
    fn empty_name_is_not_a_name() {
        let operand = Operand::new(OperandKind::Input, DataType::Float32, [1]).with_name("");
        assert_eq!(operand.non_empty_name(), None);
        let named = operand.with_name("x");
        assert_eq!(named.non_empty_name(), Some("x"));
    }

    #[test]
    fn operand_id_display_is_plain_number() {
        assert_eq!(OperandId::new(42).to_string(), "42");
        assert_eq!(OperandKind::Intermediate.to_string(), "intermediate");
    }
}

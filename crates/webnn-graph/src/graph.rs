//! The unit of compilation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, ValidationError};
use crate::operand::{Operand, OperandId};
use crate::operator::Operator;

/// Backend-neutral description of a tensor computation.
///
/// Built once by the caller, validated once, then treated as immutable.
/// Maps are ordered so that the serialized form is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphInfo {
    pub operands: BTreeMap<OperandId, Operand>,
    pub operators: Vec<Operator>,
    pub inputs: Vec<OperandId>,
    pub outputs: Vec<OperandId>,
    #[serde(default)]
    pub constants: BTreeMap<OperandId, Vec<u8>>,
}

impl GraphInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a graph from its JSON form. The result is not yet validated.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    pub fn operand(&self, id: OperandId) -> Result<&Operand> {
        self.operands
            .get(&id)
            .ok_or(ValidationError::UnknownOperand(id))
    }

    pub fn constant_data(&self, id: OperandId) -> Option<&[u8]> {
        self.constants.get(&id).map(Vec::as_slice)
    }

    /// `(name, id)` of every graph input, in declaration order.
    pub fn input_names(&self) -> impl Iterator<Item = (&str, OperandId)> + '_ {
        self.named(&self.inputs)
    }

    /// `(name, id)` of every graph output, in declaration order.
    pub fn output_names(&self) -> impl Iterator<Item = (&str, OperandId)> + '_ {
        self.named(&self.outputs)
    }

    fn named<'a>(&'a self, ids: &'a [OperandId]) -> impl Iterator<Item = (&'a str, OperandId)> + 'a {
        ids.iter().filter_map(move |id| {
            self.operands
                .get(id)
                .and_then(Operand::non_empty_name)
                .map(|name| (name, *id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::operand::OperandKind;
    use crate::operator::OperatorKind;

    fn relu_graph() -> GraphInfo {
        let mut graph = GraphInfo::new();
        let x = OperandId::new(0);
        let y = OperandId::new(1);
        graph.operands.insert(
            x,
            Operand::new(OperandKind::Input, DataType::Float32, [1, 2, 3, 4]).with_name("input"),
        );
        graph.operands.insert(
            y,
            Operand::new(OperandKind::Output, DataType::Float32, [1, 2, 3, 4]).with_name("output"),
        );
        graph.operators.push(Operator::new(OperatorKind::Relu, [x], y));
        graph.inputs.push(x);
        graph.outputs.push(y);
        graph
    }

    #[test]
    fn json_round_trip() {
        let graph = relu_graph();
        let json = graph.to_json().unwrap();
        assert_eq!(GraphInfo::from_json(&json).unwrap(), graph);
    }

    #[test]
    fn parses_handwritten_json() {
        let json = r#"{
            "operands": {
                "0": { "kind": "input", "data_type": "float32", "dimensions": [2], "name": "x" },
                "1": { "kind": "output", "data_type": "float32", "dimensions": [2], "name": "y" }
            },
            "operators": [ { "kind": { "type": "sigmoid" }, "inputs": [0], "outputs": [1] } ],
            "inputs": [0],
            "outputs": [1]
        }"#;
        let graph = GraphInfo::from_json(json).unwrap();
        assert_eq!(graph.operators[0].kind, OperatorKind::Sigmoid);
        assert!(graph.constants.is_empty());
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        assert!(matches!(
            GraphInfo::from_json("{ not json"),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn names_follow_declaration_order() {
        let graph = relu_graph();
        let inputs: Vec<_> = graph.input_names().collect();
        assert_eq!(inputs, vec![("input", OperandId::new(0))]);
        assert!(graph.operand(OperandId::new(9)).is_err());
    }
}

//! Incremental construction of a [`GraphInfo`]

use crate::data_type::DataType;
use crate::error::{Result, ValidationError};
use crate::graph::GraphInfo;
use crate::infer::infer_output;
use crate::operand::{Operand, OperandId, OperandKind};
use crate::operator::{Operator, OperatorKind};

/// Builds a graph operand by operand.
///
/// The typed helpers (`operation`, `reshape`, `cast`) infer the result shape
/// so a well-formed graph never has to spell out intermediate dimensions.
/// The raw helpers (`declare`, `push_operator`) take everything verbatim and
/// are how malformed graphs are produced for validation tests.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: GraphInfo,
    next_id: u64,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an operand as-is and return its id.
    pub fn declare(&mut self, operand: Operand) -> OperandId {
        let id = OperandId::new(self.next_id);
        self.next_id += 1;
        if operand.kind == OperandKind::Input {
            self.graph.inputs.push(id);
        }
        if operand.kind == OperandKind::Output {
            self.graph.outputs.push(id);
        }
        self.graph.operands.insert(id, operand);
        id
    }

    pub fn input(&mut self, name: &str, data_type: DataType, dimensions: &[u32]) -> OperandId {
        self.declare(Operand::new(OperandKind::Input, data_type, dimensions).with_name(name))
    }

    pub fn constant(&mut self, data_type: DataType, dimensions: &[u32], bytes: Vec<u8>) -> OperandId {
        let id = self.declare(Operand::new(OperandKind::Constant, data_type, dimensions));
        self.graph.constants.insert(id, bytes);
        id
    }

    pub fn constant_f32(&mut self, dimensions: &[u32], values: &[f32]) -> OperandId {
        let bytes = bytemuck::cast_slice(values).to_vec();
        self.constant(DataType::Float32, dimensions, bytes)
    }

    /// Declared output operand without a producer.
    pub fn output(&mut self, name: &str, data_type: DataType, dimensions: &[u32]) -> OperandId {
        self.declare(Operand::new(OperandKind::Output, data_type, dimensions).with_name(name))
    }

    pub fn intermediate(&mut self, data_type: DataType, dimensions: &[u32]) -> OperandId {
        self.declare(Operand::new(OperandKind::Intermediate, data_type, dimensions))
    }

    /// Append an operator verbatim.
    pub fn push_operator(&mut self, operator: Operator) {
        self.graph.operators.push(operator);
    }

    /// Apply `kind` to `inputs`, producing an intermediate of inferred shape.
    pub fn operation(&mut self, kind: OperatorKind, inputs: &[OperandId]) -> Result<OperandId> {
        self.apply(kind, inputs, None, None)
    }

    /// Apply `kind` to `inputs`, producing a named graph output.
    pub fn output_operation(
        &mut self,
        name: &str,
        kind: OperatorKind,
        inputs: &[OperandId],
    ) -> Result<OperandId> {
        self.apply(kind, inputs, None, Some(name))
    }

    pub fn reshape(&mut self, input: OperandId, dimensions: &[u32], name: Option<&str>) -> Result<OperandId> {
        let data_type = self.graph.operand(input)?.data_type;
        let target = Operand::new(OperandKind::Intermediate, data_type, dimensions);
        self.apply(OperatorKind::Reshape, &[input], Some(target), name)
    }

    pub fn cast(&mut self, input: OperandId, data_type: DataType, name: Option<&str>) -> Result<OperandId> {
        let dimensions = self.graph.operand(input)?.dimensions.clone();
        let target = Operand::new(OperandKind::Intermediate, data_type, dimensions);
        self.apply(OperatorKind::Cast, &[input], Some(target), name)
    }

    fn apply(
        &mut self,
        kind: OperatorKind,
        inputs: &[OperandId],
        target: Option<Operand>,
        output_name: Option<&str>,
    ) -> Result<OperandId> {
        let index = self.graph.operators.len();
        let operands = inputs
            .iter()
            .map(|id| self.graph.operand(*id))
            .collect::<Result<Vec<_>>>()?;
        let inferred = infer_output(&kind, &operands, target.as_ref())
            .map_err(|e| ValidationError::invalid_operator(index, kind.name(), e))?;

        let mut operand = Operand::new(OperandKind::Intermediate, inferred.data_type, inferred.dimensions);
        if let Some(name) = output_name {
            operand.kind = OperandKind::Output;
            operand.name = Some(name.to_string());
        }
        let output = self.declare(operand);
        self.graph.operators.push(Operator::new(kind, inputs, output));
        Ok(output)
    }

    pub fn build(self) -> GraphInfo {
        self.graph
    }
}

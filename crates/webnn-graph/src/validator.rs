//! Structural validation of a [`GraphInfo`]
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. operand table, operator list and output list are non-empty
//! 2. byte lengths are representable and constants carry exactly their bytes
//! 3. graph inputs are uniquely named `Input` operands
//! 4. operators reference known, already-available operands and satisfy the
//!    per-kind shape and type rules; intermediates match the inferred result
//! 5. graph outputs are uniquely named `Output` operands whose declared type
//!    and shape equal the inferred ones
//!
//! Validation only reads the graph.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::error::{Result, ValidationError};
use crate::graph::GraphInfo;
use crate::infer::{infer_output, Inferred};
use crate::operand::{Operand, OperandId, OperandKind};

#[tracing::instrument(
    skip(graph),
    fields(
        operands = graph.operands.len(),
        operators = graph.operators.len(),
    )
)]
pub fn validate(graph: &GraphInfo) -> Result<()> {
    let start = Instant::now();

    check_non_empty(graph)?;
    check_byte_lengths(graph)?;
    check_inputs(graph)?;
    let inferred = check_operators(graph)?;
    check_outputs(graph, &inferred)?;

    tracing::debug!(
        duration_us = start.elapsed().as_micros() as u64,
        "graph_validated"
    );
    Ok(())
}

fn check_non_empty(graph: &GraphInfo) -> Result<()> {
    if graph.operands.is_empty() {
        return Err(ValidationError::Empty("operands"));
    }
    if graph.operators.is_empty() {
        return Err(ValidationError::Empty("operators"));
    }
    if graph.outputs.is_empty() {
        return Err(ValidationError::Empty("outputs"));
    }
    Ok(())
}

fn check_byte_lengths(graph: &GraphInfo) -> Result<()> {
    for (&id, operand) in &graph.operands {
        let byte_length = operand
            .byte_length()
            .ok_or_else(|| ValidationError::ByteLengthOverflow {
                id,
                dimensions: operand.dimensions.clone(),
                data_type: operand.data_type,
            })?;

        if operand.kind == OperandKind::Constant {
            let data = graph
                .constants
                .get(&id)
                .ok_or(ValidationError::MissingConstantData(id))?;
            if data.len() != byte_length {
                return Err(ValidationError::ConstantLength {
                    id,
                    expected: byte_length,
                    actual: data.len(),
                });
            }
        }
    }

    for &id in graph.constants.keys() {
        let operand = graph.operand(id)?;
        expect_kind(id, operand, OperandKind::Constant, "constant")?;
    }
    Ok(())
}

fn check_inputs(graph: &GraphInfo) -> Result<()> {
    let mut names = HashSet::new();
    for &id in &graph.inputs {
        let operand = graph.operand(id)?;
        expect_kind(id, operand, OperandKind::Input, "input")?;
        let name = operand
            .non_empty_name()
            .ok_or(ValidationError::MissingName(id))?;
        if !names.insert(name) {
            return Err(ValidationError::DuplicateName(name.to_string()));
        }
    }
    Ok(())
}

/// Returns the inferred result of every produced operand.
fn check_operators(graph: &GraphInfo) -> Result<HashMap<OperandId, (Inferred, &'static str)>> {
    let mut available: HashSet<OperandId> = graph.inputs.iter().copied().collect();
    available.extend(graph.constants.keys().copied());

    let mut inferred = HashMap::with_capacity(graph.operators.len());

    for (index, operator) in graph.operators.iter().enumerate() {
        let name = operator.name();

        for &id in operator.inputs.iter().chain(&operator.outputs) {
            graph.operand(id)?;
        }

        let mut inputs = Vec::with_capacity(operator.inputs.len());
        for &id in &operator.inputs {
            if !available.contains(&id) {
                return Err(ValidationError::NotTopological {
                    index,
                    operator: name,
                    operand: id,
                });
            }
            inputs.push(graph.operand(id)?);
        }

        if operator.outputs.len() != 1 {
            return Err(ValidationError::invalid_operator(
                index,
                name,
                crate::error::ShapeError::invalid(format!(
                    "expected 1 output, got {}",
                    operator.outputs.len()
                )),
            ));
        }
        let output_id = operator.outputs[0];
        let output = graph.operand(output_id)?;

        if !matches!(output.kind, OperandKind::Intermediate | OperandKind::Output) {
            return Err(ValidationError::UnexpectedKind {
                id: output_id,
                expected: "intermediate or output",
                actual: output.kind,
            });
        }
        if !available.insert(output_id) {
            return Err(ValidationError::MultipleProducers(output_id));
        }

        let result = infer_output(&operator.kind, &inputs, Some(output))
            .map_err(|e| ValidationError::invalid_operator(index, name, e))?;

        if output.kind == OperandKind::Intermediate {
            check_declared(output_id, output, &result, name)?;
        }
        inferred.insert(output_id, (result, name));
    }

    Ok(inferred)
}

fn check_outputs(
    graph: &GraphInfo,
    inferred: &HashMap<OperandId, (Inferred, &'static str)>,
) -> Result<()> {
    let mut names = HashSet::new();
    for &id in &graph.outputs {
        let operand = graph.operand(id)?;
        expect_kind(id, operand, OperandKind::Output, "output")?;
        let name = operand
            .non_empty_name()
            .ok_or(ValidationError::MissingName(id))?;
        if !names.insert(name) {
            return Err(ValidationError::DuplicateName(name.to_string()));
        }
        let (result, operator) = inferred
            .get(&id)
            .ok_or(ValidationError::OutputNotProduced(id))?;
        check_declared(id, operand, result, operator)?;
    }
    Ok(())
}

fn check_declared(id: OperandId, declared: &Operand, inferred: &Inferred, operator: &'static str) -> Result<()> {
    if declared.data_type != inferred.data_type {
        return Err(ValidationError::DataTypeMismatch {
            id,
            operator,
            declared: declared.data_type,
            inferred: inferred.data_type,
        });
    }
    if declared.dimensions != inferred.dimensions {
        return Err(ValidationError::ShapeMismatch {
            id,
            operator,
            declared: declared.dimensions.clone(),
            inferred: inferred.dimensions.clone(),
        });
    }
    Ok(())
}

fn expect_kind(id: OperandId, operand: &Operand, kind: OperandKind, expected: &'static str) -> Result<()> {
    if operand.kind != kind {
        return Err(ValidationError::UnexpectedKind {
            id,
            expected,
            actual: operand.kind,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::data_type::DataType;
    use crate::operator::{BinaryOp, Operator, OperatorKind};

    fn relu_graph() -> GraphInfo {
        let mut builder = GraphBuilder::new();
        let x = builder.input("input", DataType::Float32, &[1, 2, 3, 4]);
        builder
            .output_operation("output", OperatorKind::Relu, &[x])
            .unwrap();
        builder.build()
    }

    #[test]
    fn accepts_valid_graph() {
        assert_eq!(validate(&relu_graph()), Ok(()));
    }

    #[test]
    fn empty_graph() {
        assert_eq!(validate(&GraphInfo::new()), Err(ValidationError::Empty("operands")));

        let mut graph = relu_graph();
        graph.operators.clear();
        assert_eq!(validate(&graph), Err(ValidationError::Empty("operators")));
    }

    #[test]
    fn dangling_operand() {
        let mut graph = relu_graph();
        graph.operators[0].inputs[0] = OperandId::new(77);
        assert_eq!(
            validate(&graph),
            Err(ValidationError::UnknownOperand(OperandId::new(77)))
        );
    }

    #[test]
    fn byte_length_overflow() {
        let mut graph = relu_graph();
        graph.operands.insert(
            OperandId::new(50),
            Operand::new(OperandKind::Intermediate, DataType::Int64, [u32::MAX, u32::MAX, u32::MAX]),
        );
        assert!(matches!(
            validate(&graph),
            Err(ValidationError::ByteLengthOverflow { .. })
        ));
    }

    #[test]
    fn constant_length_must_match() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[2]);
        let c = builder.constant(DataType::Float32, &[2], vec![0; 7]);
        builder
            .output_operation("y", OperatorKind::add(), &[x, c])
            .unwrap();
        assert!(matches!(
            validate(&builder.build()),
            Err(ValidationError::ConstantLength { expected: 8, actual: 7, .. })
        ));
    }

    #[test]
    fn input_needs_name() {
        let mut graph = relu_graph();
        let input = graph.inputs[0];
        graph.operands.get_mut(&input).unwrap().name = Some(String::new());
        assert_eq!(validate(&graph), Err(ValidationError::MissingName(input)));
    }

    #[test]
    fn duplicate_input_names() {
        let mut builder = GraphBuilder::new();
        let a = builder.input("x", DataType::Float32, &[2]);
        let b = builder.input("x", DataType::Float32, &[2]);
        builder
            .output_operation("y", OperatorKind::add(), &[a, b])
            .unwrap();
        assert_eq!(
            validate(&builder.build()),
            Err(ValidationError::DuplicateName("x".into()))
        );
    }

    #[test]
    fn non_topological_order() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[2]);
        let t = builder.intermediate(DataType::Float32, &[2]);
        let y = builder.output("y", DataType::Float32, &[2]);
        builder.push_operator(Operator::new(OperatorKind::Relu, [t], y));
        builder.push_operator(Operator::new(OperatorKind::Relu, [x], t));
        assert!(matches!(
            validate(&builder.build()),
            Err(ValidationError::NotTopological { index: 0, operand, .. }) if operand == t
        ));
    }

    #[test]
    fn mismatched_binary_types() {
        let mut builder = GraphBuilder::new();
        let a = builder.input("a", DataType::Float32, &[2]);
        let b = builder.input("b", DataType::Int32, &[2]);
        let y = builder.output("y", DataType::Float32, &[2]);
        builder.push_operator(Operator::new(OperatorKind::binary(BinaryOp::Mul), [a, b], y));
        assert!(matches!(
            validate(&builder.build()),
            Err(ValidationError::InvalidOperator { index: 0, operator: "mul", .. })
        ));
    }

    #[test]
    fn zero_sized_broadcast_pair() {
        let mut builder = GraphBuilder::new();
        let a = builder.input("a", DataType::Float32, &[0, 2]);
        let b = builder.input("b", DataType::Float32, &[1, 2]);
        let y = builder.output("y", DataType::Float32, &[0, 2]);
        builder.push_operator(Operator::new(OperatorKind::add(), [a, b], y));
        assert!(matches!(
            validate(&builder.build()),
            Err(ValidationError::InvalidOperator { .. })
        ));
    }

    #[test]
    fn output_shape_mismatch() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[2, 2]);
        let y = builder.output("y", DataType::Float32, &[4]);
        builder.push_operator(Operator::new(OperatorKind::Relu, [x], y));
        assert!(matches!(
            validate(&builder.build()),
            Err(ValidationError::ShapeMismatch { operator: "relu", .. })
        ));
    }

    #[test]
    fn intermediate_mismatch_caught_at_operator() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[2, 2]);
        let t = builder.intermediate(DataType::Float16, &[2, 2]);
        let y = builder.output("y", DataType::Float16, &[2, 2]);
        builder.push_operator(Operator::new(OperatorKind::Relu, [x], t));
        builder.push_operator(Operator::new(OperatorKind::Relu, [t], y));
        assert!(matches!(
            validate(&builder.build()),
            Err(ValidationError::DataTypeMismatch { declared: DataType::Float16, inferred: DataType::Float32, .. })
        ));
    }

    #[test]
    fn reshape_element_count() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[1, 2, 3, 4]);
        let y = builder.output("y", DataType::Float32, &[1, 1, 6, 5]);
        builder.push_operator(Operator::new(OperatorKind::Reshape, [x], y));
        assert!(validate(&builder.build()).is_err());

        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[1, 2, 3, 4]);
        let y = builder.output("y", DataType::Float32, &[1, 1, 6, 4]);
        builder.push_operator(Operator::new(OperatorKind::Reshape, [x], y));
        assert_eq!(validate(&builder.build()), Ok(()));
    }

    #[test]
    fn unproduced_output() {
        let mut graph = relu_graph();
        let orphan = OperandId::new(10);
        graph.operands.insert(
            orphan,
            Operand::new(OperandKind::Output, DataType::Float32, [1]).with_name("orphan"),
        );
        graph.outputs.push(orphan);
        assert_eq!(validate(&graph), Err(ValidationError::OutputNotProduced(orphan)));
    }

    #[test]
    fn output_written_twice() {
        let mut graph = relu_graph();
        let op = graph.operators[0].clone();
        graph.operators.push(op);
        assert!(matches!(validate(&graph), Err(ValidationError::MultipleProducers(_))));
    }

    #[test]
    fn input_listed_as_output() {
        let mut graph = relu_graph();
        let input = graph.inputs[0];
        graph.outputs.push(input);
        assert!(matches!(
            validate(&graph),
            Err(ValidationError::UnexpectedKind { expected: "output", .. })
        ));
    }

    #[test]
    fn validation_does_not_mutate() {
        let graph = relu_graph();
        let before = graph.clone();
        let _ = validate(&graph);
        assert_eq!(graph, before);
    }
}

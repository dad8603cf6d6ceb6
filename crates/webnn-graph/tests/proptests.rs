//! Property-based tests for graph validation
//!
//! Every corruption of a known-good graph must be rejected, and reshape
//! validation must agree exactly with element-count equality.

use proptest::prelude::*;
use webnn_graph::{
    validate, BinaryOp, DataType, GraphBuilder, GraphInfo, Operand, OperandId, OperandKind,
    Operator, OperatorKind, ValidationError,
};

// ===== Strategies =====

fn arb_dims(max_rank: usize) -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(1u32..5, 1..=max_rank)
}

/// add(x, relu(y)) -> out, with both inputs broadcast-compatible
fn valid_graph(dims: &[u32]) -> GraphInfo {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", DataType::Float32, dims);
    let y = builder.input("y", DataType::Float32, &dims[dims.len() - 1..]);
    let relu = builder
        .operation(OperatorKind::Relu, &[y])
        .expect("relu is always valid");
    builder
        .output_operation("out", OperatorKind::binary(BinaryOp::Add), &[x, relu])
        .expect("trailing axis broadcasts");
    builder.build()
}

#[derive(Debug, Clone)]
enum Corruption {
    DanglingInput,
    SwapOperators,
    MixedTypes,
    WrongOutputShape,
    UnnamedOutput,
}

fn arb_corruption() -> impl Strategy<Value = Corruption> {
    prop_oneof![
        Just(Corruption::DanglingInput),
        Just(Corruption::SwapOperators),
        Just(Corruption::MixedTypes),
        Just(Corruption::WrongOutputShape),
        Just(Corruption::UnnamedOutput),
    ]
}

fn corrupt(graph: &mut GraphInfo, corruption: &Corruption) {
    let out = graph.outputs[0];
    match corruption {
        Corruption::DanglingInput => graph.operators[1].inputs[0] = OperandId::new(1_000),
        Corruption::SwapOperators => graph.operators.swap(0, 1),
        Corruption::MixedTypes => {
            let y = graph.inputs[1];
            if let Some(operand) = graph.operands.get_mut(&y) {
                operand.data_type = DataType::Int32;
            }
        }
        Corruption::WrongOutputShape => {
            if let Some(operand) = graph.operands.get_mut(&out) {
                operand.dimensions.push(7);
            }
        }
        Corruption::UnnamedOutput => {
            if let Some(operand) = graph.operands.get_mut(&out) {
                operand.name = None;
            }
        }
    }
}

// ===== Property Tests =====

proptest! {
    #[test]
    fn prop_valid_graphs_pass(dims in arb_dims(4)) {
        prop_assert_eq!(validate(&valid_graph(&dims)), Ok(()));
    }

    #[test]
    fn prop_corrupted_graphs_fail(dims in arb_dims(4), corruption in arb_corruption()) {
        let mut graph = valid_graph(&dims);
        corrupt(&mut graph, &corruption);
        prop_assert!(validate(&graph).is_err(), "{:?} was accepted", corruption);
    }

    #[test]
    fn prop_reshape_requires_equal_counts(from in arb_dims(4), to in arb_dims(4)) {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &from);
        let y = builder.output("y", DataType::Float32, &to);
        builder.push_operator(Operator::new(OperatorKind::Reshape, [x], y));
        let graph = builder.build();

        let count = |dims: &[u32]| dims.iter().map(|&d| d as u64).product::<u64>();
        let result = validate(&graph);
        if count(&from) == count(&to) {
            prop_assert_eq!(result, Ok(()));
        } else {
            let rejected = matches!(result, Err(ValidationError::InvalidOperator { operator: "reshape", .. }));
            prop_assert!(rejected);
        }
    }

    #[test]
    fn prop_json_round_trip_preserves_validity(dims in arb_dims(3)) {
        let graph = valid_graph(&dims);
        let parsed = GraphInfo::from_json(&graph.to_json().unwrap()).unwrap();
        prop_assert_eq!(&parsed, &graph);
        prop_assert_eq!(validate(&parsed), Ok(()));
    }
}

#[test]
fn constant_map_names_only_constants() {
    let mut graph = valid_graph(&[2, 3]);
    let x = graph.inputs[0];
    graph.constants.insert(x, vec![0; 24]);
    assert!(matches!(
        validate(&graph),
        Err(ValidationError::UnexpectedKind { expected: "constant", .. })
    ));
}

#[test]
fn intermediate_cannot_be_an_input() {
    let mut graph = valid_graph(&[2]);
    let fake = OperandId::new(500);
    graph
        .operands
        .insert(fake, Operand::new(OperandKind::Intermediate, DataType::Float32, [2]).with_name("fake"));
    graph.inputs.push(fake);
    assert!(matches!(
        validate(&graph),
        Err(ValidationError::UnexpectedKind { expected: "input", .. })
    ));
}
